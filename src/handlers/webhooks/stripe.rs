use axum::{body::Bytes, extract::State, http::HeaderMap};
use serde::de::DeserializeOwned;

use crate::db::AppState;
use crate::payments::{Charge, PaymentIntent, Refund, SignatureError, StripeWebhookEvent};

use super::{WebhookAck, WebhookError, fulfillment, reconcile};

/// Verified processor notification, narrowed to what this service acts on.
#[derive(Debug)]
pub enum ProcessorEvent {
    PaymentSucceeded(PaymentIntent),
    ChargeSucceeded(Charge),
    PaymentFailed(PaymentIntent),
    ChargeRefunded(Charge),
    RefundCreated(Refund),
    RefundFailed(Refund),
    Ignored(String),
}

fn object<T: DeserializeOwned>(event: &StripeWebhookEvent) -> Result<T, WebhookError> {
    serde_json::from_value(event.data.object.clone()).map_err(|e| {
        WebhookError::MalformedPayload(format!("{} object: {}", event.event_type, e))
    })
}

/// Parse a verified body. Returns the processor's event id alongside.
pub fn parse_event(body: &[u8]) -> Result<(String, ProcessorEvent), WebhookError> {
    let event: StripeWebhookEvent = serde_json::from_slice(body)
        .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

    let parsed = match event.event_type.as_str() {
        "payment_intent.succeeded" => ProcessorEvent::PaymentSucceeded(object(&event)?),
        "charge.succeeded" => ProcessorEvent::ChargeSucceeded(object(&event)?),
        "payment_intent.payment_failed" => ProcessorEvent::PaymentFailed(object(&event)?),
        "charge.refunded" => ProcessorEvent::ChargeRefunded(object(&event)?),
        "refund.created" => ProcessorEvent::RefundCreated(object(&event)?),
        "refund.failed" => ProcessorEvent::RefundFailed(object(&event)?),
        other => ProcessorEvent::Ignored(other.to_string()),
    };

    Ok((event.id, parsed))
}

/// Route a parsed event to its handler.
pub async fn dispatch(
    state: &AppState,
    event_id: &str,
    event: ProcessorEvent,
) -> Result<WebhookAck, WebhookError> {
    match event {
        ProcessorEvent::PaymentSucceeded(intent) => fulfillment::fulfill_payment(state, &intent),
        ProcessorEvent::ChargeSucceeded(charge) => {
            // The charge lacks checkout metadata; the intent has it.
            let intent_id = charge.payment_intent.ok_or_else(|| {
                WebhookError::MalformedPayload(format!("charge {} has no payment intent", charge.id))
            })?;
            let intent = state.processor.retrieve_payment_intent(&intent_id).await?;
            fulfillment::fulfill_payment(state, &intent)
        }
        ProcessorEvent::PaymentFailed(intent) => reconcile::mark_payment_failed(state, &intent),
        ProcessorEvent::ChargeRefunded(charge) => {
            reconcile::apply_charge_refunded(state, event_id, &charge)
        }
        ProcessorEvent::RefundCreated(refund) => {
            tracing::info!(
                refund_id = %refund.id,
                amount = refund.amount,
                payment_intent = ?refund.payment_intent,
                status = ?refund.status,
                "Refund created at processor"
            );
            Ok(WebhookAck::new("logged"))
        }
        ProcessorEvent::RefundFailed(refund) => {
            tracing::warn!(
                refund_id = %refund.id,
                amount = refund.amount,
                payment_intent = ?refund.payment_intent,
                failure_reason = ?refund.failure_reason,
                "Refund failed at processor"
            );
            Ok(WebhookAck::new("logged"))
        }
        ProcessorEvent::Ignored(kind) => {
            tracing::debug!(event_id = %event_id, kind = %kind, "Ignoring webhook event");
            Ok(WebhookAck::new("ignored"))
        }
    }
}

pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<WebhookAck, WebhookError> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(SignatureError::MissingHeader)?;

    state.verifier.verify(&body, signature)?;

    let (event_id, event) = parse_event(&body)?;
    dispatch(&state, &event_id, event).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_kind_is_ignored() {
        let body = br#"{"id":"evt_1","type":"customer.created","data":{"object":{}}}"#;
        let (id, event) = parse_event(body).unwrap();
        assert_eq!(id, "evt_1");
        assert!(matches!(event, ProcessorEvent::Ignored(kind) if kind == "customer.created"));
    }

    #[test]
    fn test_payment_intent_kinds() {
        let body = br#"{"id":"evt_2","type":"payment_intent.payment_failed","data":{"object":
            {"id":"pi_1","amount":100,"currency":"usd","status":"requires_payment_method"}}}"#;
        let (_, event) = parse_event(body).unwrap();
        assert!(matches!(event, ProcessorEvent::PaymentFailed(pi) if pi.id == "pi_1"));
    }

    #[test]
    fn test_charge_refunded_parses_cumulative_amount() {
        let body = br#"{"id":"evt_3","type":"charge.refunded","data":{"object":
            {"id":"ch_1","amount":5000,"amount_refunded":4970,"refunded":false,"payment_intent":"pi_1"}}}"#;
        let (_, event) = parse_event(body).unwrap();
        assert!(matches!(event, ProcessorEvent::ChargeRefunded(c) if c.amount_refunded == 4970));
    }

    #[test]
    fn test_malformed_bodies() {
        assert!(matches!(parse_event(b"not json"), Err(WebhookError::MalformedPayload(_))));
        let body = br#"{"id":"evt_4","type":"payment_intent.succeeded","data":{"object":{"id":"pi_1"}}}"#;
        assert!(matches!(parse_event(body), Err(WebhookError::MalformedPayload(_))));
    }
}
