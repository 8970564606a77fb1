//! Applying processor-side payment failures and refunds to orders.

use rusqlite::TransactionBehavior;

use crate::db::{AppState, queries};
use crate::models::OrderStatus;
use crate::notify::Notification;
use crate::payments::{Charge, PaymentIntent};

use super::{WebhookAck, WebhookError};

const PROVIDER: &str = "stripe";

/// `payment_intent.payment_failed`: a pending order becomes failed.
/// Orders in any other state are left alone.
pub fn mark_payment_failed(
    state: &AppState,
    intent: &PaymentIntent,
) -> Result<WebhookAck, WebhookError> {
    let conn = state.db.get()?;

    match queries::fail_pending_order(&conn, &intent.id)? {
        Some(order_id) => {
            tracing::info!(order_id = %order_id, payment_intent = %intent.id, "Order marked failed");
            Ok(WebhookAck::for_order("failed", order_id))
        }
        None => {
            tracing::debug!(payment_intent = %intent.id, "No pending order for failed payment");
            Ok(WebhookAck::new("ignored"))
        }
    }
}

/// `charge.refunded`: bring the order's refund total up to the charge's
/// cumulative `amount_refunded`.
///
/// The amount is cumulative, so applying it is naturally idempotent and
/// order-independent: an older delivery carries a smaller number and
/// changes nothing.
pub fn apply_charge_refunded(
    state: &AppState,
    event_id: &str,
    charge: &Charge,
) -> Result<WebhookAck, WebhookError> {
    let Some(payment_intent) = charge.payment_intent.as_deref() else {
        tracing::debug!(charge = %charge.id, "Refunded charge has no payment intent");
        return Ok(WebhookAck::new("ignored"));
    };

    let mut conn = state.db.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let Some(order) = queries::get_order_by_payment_intent(&tx, payment_intent)? else {
        tracing::info!(payment_intent = %payment_intent, "Refund for unknown payment");
        return Ok(WebhookAck::new("ignored"));
    };

    if !queries::try_record_webhook_event(&tx, PROVIDER, event_id)? {
        tracing::debug!(event_id = %event_id, order_id = %order.id, "Refund event replayed");
        return Ok(WebhookAck::for_order("duplicate", order.id));
    }

    let target = charge.amount_refunded.min(order.total_cents);
    let moved = queries::raise_refund_amount(&tx, &order.id, target)?;

    let mut status = order.status;
    if moved {
        status = OrderStatus::after_refund(target, order.total_cents);
        if status == OrderStatus::Refunded {
            let cancelled = queries::cancel_tickets_for_order(&tx, &order.id)?;
            tracing::debug!(order_id = %order.id, cancelled, "Tickets cancelled");
        }
    }

    tx.commit()?;

    if !moved {
        tracing::debug!(
            order_id = %order.id,
            recorded = order.refund_amount_cents,
            reported = charge.amount_refunded,
            "Refund already reflected"
        );
        return Ok(WebhookAck::for_order("already_applied", order.id));
    }

    tracing::info!(
        order_id = %order.id,
        previous = order.refund_amount_cents,
        new_total = target,
        status = %status,
        "Refund reconciled from processor"
    );

    state.notifier.enqueue(Notification::RefundReconciled {
        order_id: order.id.clone(),
        purchaser_email: order.purchaser_email.clone(),
        total_refunded_cents: target,
        order_status: status,
    });

    Ok(WebhookAck::for_order("refund_applied", order.id))
}
