//! boxoffice - payment reconciliation and ticket fulfillment
//!
//! Turns at-least-once payment processor webhooks into exactly-once order,
//! ticket and refund state, and serves customer-initiated refunds.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod id;
pub mod identity;
pub mod inventory;
pub mod models;
pub mod notify;
pub mod payments;
pub mod refunds;

use axum::Router;
use tower_http::trace::TraceLayer;

use db::AppState;

/// The full HTTP surface with request tracing.
pub fn app(state: AppState) -> Router {
    handlers::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
