//! Payment processor seam: webhook signatures, wire types, and the outbound
//! client used for intent lookups and refunds.

mod signature;
mod stripe;

pub use signature::*;
pub use stripe::*;

use futures::future::BoxFuture;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessorError {
    /// No response within the client timeout. The outcome is unknown.
    #[error("processor request timed out")]
    Timeout,

    #[error("processor rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("processor unreachable: {0}")]
    Transport(String),

    #[error("unexpected processor response: {0}")]
    Decode(String),
}

/// Outbound refund request.
#[derive(Debug, Clone)]
pub struct CreateRefund {
    pub payment_intent_id: String,
    pub amount_cents: i64,
    /// Replays with the same key return the original refund instead of a new one
    pub idempotency_key: String,
    pub order_id: String,
    pub reason: Option<String>,
}

/// Operations the engine needs from the payment processor.
pub trait PaymentProcessor: Send + Sync {
    fn retrieve_payment_intent<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<PaymentIntent, ProcessorError>>;

    fn create_refund(&self, req: CreateRefund) -> BoxFuture<'_, Result<Refund, ProcessorError>>;
}
