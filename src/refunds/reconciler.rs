use std::sync::Arc;

use rusqlite::{Connection, TransactionBehavior};

use crate::db::{AppState, DbPool, queries};
use crate::error::AppError;
use crate::id::{is_valid_prefixed_id, short_id};
use crate::identity::Caller;
use crate::models::{
    Order, OrderStatus, RefundOrderSummary, RefundRequest, RefundResponse, RefundSummary,
};
use crate::notify::{Notification, Notifier};
use crate::payments::{CreateRefund, PaymentProcessor, ProcessorError};

use super::{RefundError, RefundPolicy, calculate_refund};

/// Runs a customer refund from eligibility checks to the persisted result.
pub struct RefundReconciler {
    db: DbPool,
    processor: Arc<dyn PaymentProcessor>,
    notifier: Notifier,
    policy: RefundPolicy,
}

impl RefundReconciler {
    pub fn new(
        db: DbPool,
        processor: Arc<dyn PaymentProcessor>,
        notifier: Notifier,
        policy: RefundPolicy,
    ) -> Self {
        Self {
            db,
            processor,
            notifier,
            policy,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.db.clone(),
            state.processor.clone(),
            state.notifier.clone(),
            state.refund_policy,
        )
    }

    pub async fn refund(
        &self,
        caller: Option<&Caller>,
        request: &RefundRequest,
    ) -> Result<RefundResponse, RefundError> {
        self.refund_at(caller, request, queries::now()).await
    }

    /// Same as `refund`, evaluated at `now` for the deadline check.
    pub async fn refund_at(
        &self,
        caller: Option<&Caller>,
        request: &RefundRequest,
        now: i64,
    ) -> Result<RefundResponse, RefundError> {
        let caller = caller.ok_or(RefundError::Unauthenticated)?;

        // Preconditions are checked against fresh rows; the pooled
        // connection is released before the processor call.
        let (order, payment_intent_id) = {
            let conn = self.db.get()?;
            let order = find_order(&conn, &request.order_id)?;

            if !caller.owns(&order) {
                tracing::warn!(
                    order_id = %order.id,
                    caller = %caller.label(),
                    "Refund requested for another purchaser's order"
                );
                return Err(RefundError::NotOwner);
            }

            if order.is_fully_refunded() {
                return Err(RefundError::AlreadyRefunded);
            }

            if !matches!(
                order.status,
                OrderStatus::Completed | OrderStatus::PartiallyRefunded
            ) {
                return Err(RefundError::InvalidState(order.status));
            }

            let event = queries::get_event_by_id(&conn, &order.event_id)?.ok_or_else(|| {
                AppError::Internal(format!("order {} references missing event", order.id))
            })?;
            self.policy.check(&event, request.refund_type, now)?;

            let payment_intent_id = order
                .stripe_payment_intent_id
                .clone()
                .ok_or(RefundError::NotOnlineRefundable)?;

            (order, payment_intent_id)
        };

        let quote = calculate_refund(
            order.refundable_cents(),
            request.refund_type,
            self.policy.processing_fee_cents,
        );
        if quote.net_cents == 0 {
            return Err(RefundError::NothingToRefund);
        }

        let previous = order.refund_amount_cents;
        let refund = self
            .processor
            .create_refund(CreateRefund {
                payment_intent_id,
                amount_cents: quote.net_cents,
                idempotency_key: format!("refund:{}:{}", order.id, previous),
                order_id: order.id.clone(),
                reason: request.reason.clone(),
            })
            .await
            .map_err(|e| match e {
                ProcessorError::Timeout => {
                    tracing::error!(
                        order_id = %order.id,
                        amount = quote.net_cents,
                        "Refund call timed out; outcome unknown, not retrying"
                    );
                    RefundError::OutcomeUnknown {
                        order_id: order.id.clone(),
                    }
                }
                other => {
                    tracing::error!(order_id = %order.id, error = %other, "Refund rejected by processor");
                    RefundError::Processor(other)
                }
            })?;

        let new_total = (previous + refund.amount).min(order.total_cents);
        let status = OrderStatus::after_refund(new_total, order.total_cents);

        let final_status = self
            .persist(&order, previous, new_total, status, request.reason.as_deref())
            .map_err(|e| {
                tracing::error!(
                    alert = "reconciliation_required",
                    order_id = %order.id,
                    refund_id = %refund.id,
                    amount = refund.amount,
                    error = %e,
                    "Refund issued by processor but order not updated"
                );
                RefundError::ReconciliationRequired {
                    order_id: order.id.clone(),
                    refund_id: refund.id.clone(),
                }
            })?;

        tracing::info!(
            order_id = %order.id,
            refund_id = %refund.id,
            refund_type = %request.refund_type,
            amount = refund.amount,
            fee = quote.fee_cents,
            previous,
            new_total,
            "Refund issued"
        );

        self.notifier.enqueue(Notification::RefundIssued {
            order_id: order.id.clone(),
            purchaser_email: order.purchaser_email.clone(),
            refund_id: refund.id.clone(),
            amount_cents: refund.amount,
            fee_cents: quote.fee_cents,
            total_refunded_cents: new_total,
            order_status: final_status,
        });

        Ok(RefundResponse {
            refund: RefundSummary {
                id: refund.id,
                amount: refund.amount,
                fee: quote.fee_cents,
                status: refund.status.unwrap_or_else(|| "pending".to_string()),
            },
            order: RefundOrderSummary {
                id: order.id,
                status: final_status,
                total_amount: order.total_cents,
                previous_refund_amount: previous,
                new_refund_amount: new_total,
            },
        })
    }

    /// Record the new cumulative amount and, once fully refunded, cancel the
    /// order's tickets. Returns the order status now on record.
    fn persist(
        &self,
        order: &Order,
        previous: i64,
        new_total: i64,
        status: OrderStatus,
        reason: Option<&str>,
    ) -> Result<OrderStatus, AppError> {
        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if queries::record_refund(&tx, &order.id, previous, new_total, status, reason)? {
            if status == OrderStatus::Refunded {
                let cancelled = queries::cancel_tickets_for_order(&tx, &order.id)?;
                tracing::debug!(order_id = %order.id, cancelled, "Tickets cancelled");
            }
            tx.commit()?;
            return Ok(status);
        }

        // Lost the compare-and-set. A charge.refunded webhook for this same
        // refund may already have recorded it.
        let current = queries::get_order_by_id(&tx, &order.id)?
            .ok_or_else(|| AppError::NotFound(format!("order {}", order.id)))?;
        if current.refund_amount_cents >= new_total {
            tracing::info!(
                order_id = %order.id,
                recorded = current.refund_amount_cents,
                "Refund already recorded by webhook"
            );
            return Ok(current.status);
        }

        Err(AppError::Internal(format!(
            "refund amount changed concurrently (expected {}, found {})",
            previous, current.refund_amount_cents
        )))
    }
}

/// Look an order up by full id or by its 8-character display form.
pub fn find_order(conn: &Connection, reference: &str) -> Result<Order, RefundError> {
    let reference = reference.trim();

    if reference.starts_with("bo_ord_") {
        if !is_valid_prefixed_id(reference) {
            return Err(RefundError::NotFound);
        }
        return queries::get_order_by_id(conn, reference)?.ok_or(RefundError::NotFound);
    }

    if reference.len() != 8 || !reference.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(RefundError::NotFound);
    }

    let mut matches = queries::find_orders_by_short_id(conn, reference)?;
    match matches.len() {
        0 => Err(RefundError::NotFound),
        1 => Ok(matches.remove(0)),
        _ => {
            tracing::warn!(short_id = %short_id(reference), "Ambiguous order short id");
            Err(RefundError::AmbiguousOrderId)
        }
    }
}
