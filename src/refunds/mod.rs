//! Customer-initiated refunds: fee policy, eligibility, and the
//! processor round-trip with its persistence.

mod calculator;
mod reconciler;

pub use calculator::*;
pub use reconciler::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::error::{AppError, ErrorResponse};
use crate::models::{Event, OrderStatus, RefundType};
use crate::payments::ProcessorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundPolicy {
    /// Fixed fee kept on customer-requested refunds
    pub processing_fee_cents: i64,
    /// Customer requests close this many hours before the event starts
    pub cutoff_hours: i64,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self {
            processing_fee_cents: 30,
            cutoff_hours: 24,
        }
    }
}

impl RefundPolicy {
    /// Last instant (exclusive) a customer request is accepted for `event`.
    pub fn deadline(&self, event: &Event) -> i64 {
        event.starts_at - self.cutoff_hours * 3600
    }

    /// Classification and deadline rules.
    ///
    /// `full_cancellation` only for cancelled events; `customer_request`
    /// only for live events, strictly before the deadline.
    pub fn check(&self, event: &Event, refund_type: RefundType, now: i64) -> Result<(), RefundError> {
        match refund_type {
            RefundType::FullCancellation if !event.cancelled => Err(RefundError::PolicyMismatch {
                refund_type,
                event_cancelled: false,
            }),
            RefundType::CustomerRequest if event.cancelled => Err(RefundError::PolicyMismatch {
                refund_type,
                event_cancelled: true,
            }),
            RefundType::CustomerRequest if now >= self.deadline(event) => {
                Err(RefundError::DeadlinePassed {
                    deadline: self.deadline(event),
                })
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Error)]
pub enum RefundError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("order not found")]
    NotFound,

    /// Reported to the caller exactly like `NotFound`.
    #[error("order not found")]
    NotOwner,

    #[error("order id matches more than one order")]
    AmbiguousOrderId,

    #[error("order is already fully refunded")]
    AlreadyRefunded,

    #[error("order status {0} is not refundable")]
    InvalidState(OrderStatus),

    #[error("{refund_type} refunds are not allowed when event cancelled = {event_cancelled}")]
    PolicyMismatch {
        refund_type: RefundType,
        event_cancelled: bool,
    },

    #[error("refund deadline passed at {deadline}")]
    DeadlinePassed { deadline: i64 },

    #[error("order was not paid online")]
    NotOnlineRefundable,

    #[error("nothing left to refund after fees")]
    NothingToRefund,

    #[error("payment processor error: {0}")]
    Processor(ProcessorError),

    /// The processor did not answer in time; the refund may or may not exist.
    #[error("refund outcome unknown for order {order_id}")]
    OutcomeUnknown { order_id: String },

    /// Money moved at the processor but the order row was not updated.
    #[error("refund {refund_id} issued for order {order_id} but not recorded")]
    ReconciliationRequired { order_id: String, refund_id: String },

    #[error(transparent)]
    Storage(#[from] AppError),
}

impl From<r2d2::Error> for RefundError {
    fn from(e: r2d2::Error) -> Self {
        Self::Storage(e.into())
    }
}

impl RefundError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::NotOwner => StatusCode::FORBIDDEN,
            Self::AmbiguousOrderId
            | Self::AlreadyRefunded
            | Self::InvalidState(_)
            | Self::PolicyMismatch { .. }
            | Self::DeadlinePassed { .. }
            | Self::NotOnlineRefundable
            | Self::NothingToRefund => StatusCode::BAD_REQUEST,
            Self::Processor(_)
            | Self::OutcomeUnknown { .. }
            | Self::ReconciliationRequired { .. }
            | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::NotFound | Self::NotOwner => "order_not_found",
            Self::AmbiguousOrderId => "ambiguous_order_id",
            Self::AlreadyRefunded => "already_refunded",
            Self::InvalidState(_) => "invalid_order_state",
            Self::PolicyMismatch { .. } => "refund_type_mismatch",
            Self::DeadlinePassed { .. } => "refund_deadline_passed",
            Self::NotOnlineRefundable => "not_online_refundable",
            Self::NothingToRefund => "nothing_to_refund",
            Self::Processor(_) => "processor_error",
            Self::OutcomeUnknown { .. } => "refund_outcome_unknown",
            Self::ReconciliationRequired { .. } => "reconciliation_required",
            Self::Storage(_) => "internal_error",
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Processor(_) => "Refund could not be processed".to_string(),
            Self::OutcomeUnknown { .. } => {
                "Refund status unknown; do not retry, support will follow up".to_string()
            }
            Self::ReconciliationRequired { .. } => {
                "Refund issued but not yet recorded; support will follow up".to_string()
            }
            Self::Storage(_) => "Internal server error".to_string(),
            other => {
                let mut msg = other.to_string();
                if let Some(first) = msg.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                msg
            }
        }
    }
}

impl IntoResponse for RefundError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Refund failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "Refund rejected");
        }

        ErrorResponse {
            error: self.public_message(),
            code: Some(self.code()),
            details: None,
        }
        .into_response_with(status)
    }
}
