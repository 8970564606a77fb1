//! Processor webhooks: verify, dispatch, apply, acknowledge.
//!
//! Status codes matter here because they drive the processor's redelivery:
//! 2xx stops it, 4xx means "this will never work", 5xx means "try again".

pub mod fulfillment;
pub mod reconcile;
pub mod stripe;

pub use stripe::handle_stripe_webhook;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Serialize;
use thiserror::Error;

use crate::db::AppState;
use crate::error::{AppError, ErrorResponse};
use crate::inventory::InventoryError;
use crate::payments::{ProcessorError, SignatureError};

use fulfillment::MetadataError;

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/stripe", post(handle_stripe_webhook))
}

/// Body of every 200 webhook response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

impl WebhookAck {
    pub fn new(status: &'static str) -> Self {
        Self {
            received: true,
            status,
            order_id: None,
        }
    }

    pub fn for_order(status: &'static str, order_id: impl Into<String>) -> Self {
        Self {
            received: true,
            status,
            order_id: Some(order_id.into()),
        }
    }
}

impl IntoResponse for WebhookAck {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("missing checkout metadata: {0}")]
    MissingMetadata(MetadataError),

    #[error("invalid checkout metadata: {0}")]
    InvalidMetadata(MetadataError),

    #[error("event {0} not found")]
    UnresolvableEvent(String),

    /// Ticket items don't fit the event or the amount paid.
    #[error("invalid ticket items: {0}")]
    InvalidItems(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(InventoryError),

    /// Order row exists but its tickets were not issued. Redelivery repairs it.
    #[error("order {order_id} created but tickets not issued")]
    PartialFulfillment { order_id: String },

    #[error("payment processor error: {0}")]
    Processor(#[from] ProcessorError),

    #[error(transparent)]
    Storage(#[from] AppError),
}

impl From<MetadataError> for WebhookError {
    fn from(e: MetadataError) -> Self {
        if e.missing.is_empty() {
            Self::InvalidMetadata(e)
        } else {
            Self::MissingMetadata(e)
        }
    }
}

impl From<InventoryError> for WebhookError {
    fn from(e: InventoryError) -> Self {
        match e {
            InventoryError::Storage(inner) => Self::Storage(inner),
            e if e.is_capacity() => Self::CapacityExceeded(e),
            e => Self::InvalidItems(e.to_string()),
        }
    }
}

impl From<r2d2::Error> for WebhookError {
    fn from(e: r2d2::Error) -> Self {
        Self::Storage(e.into())
    }
}

impl From<rusqlite::Error> for WebhookError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.into())
    }
}

impl WebhookError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            Self::MalformedPayload(_)
            | Self::MissingMetadata(_)
            | Self::InvalidMetadata(_)
            | Self::InvalidItems(_) => StatusCode::BAD_REQUEST,
            Self::UnresolvableEvent(_) => StatusCode::NOT_FOUND,
            Self::CapacityExceeded(_) => StatusCode::CONFLICT,
            Self::PartialFulfillment { .. } | Self::Processor(_) | Self::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSignature(_) => "invalid_signature",
            Self::MalformedPayload(_) => "malformed_payload",
            Self::MissingMetadata(_) => "missing_metadata",
            Self::InvalidMetadata(_) => "invalid_metadata",
            Self::UnresolvableEvent(_) => "unresolvable_event",
            Self::InvalidItems(_) => "invalid_ticket_items",
            Self::CapacityExceeded(_) => "capacity_exceeded",
            Self::PartialFulfillment { .. } => "partial_fulfillment",
            Self::Processor(_) => "processor_error",
            Self::Storage(_) => "internal_error",
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error, details) = match &self {
            // Don't tell an unauthenticated sender why verification failed.
            Self::InvalidSignature(_) => ("Invalid signature".to_string(), None),
            Self::Storage(_) | Self::Processor(_) => ("Internal server error".to_string(), None),
            Self::MissingMetadata(e) | Self::InvalidMetadata(e) => {
                ("Checkout metadata rejected".to_string(), Some(e.to_string()))
            }
            other => (other.to_string(), None),
        };

        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Webhook processing failed");
        } else {
            tracing::warn!(code = self.code(), error = %self, "Webhook rejected");
        }

        ErrorResponse {
            error,
            code: Some(self.code()),
            details,
        }
        .into_response_with(status)
    }
}
