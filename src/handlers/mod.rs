pub mod availability;
pub mod health;
pub mod refunds;
pub mod webhooks;

use axum::{
    Router,
    routing::{get, post},
};

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/refunds", post(refunds::create_refund))
        .route(
            "/events/{event_ref}/availability",
            post(availability::check_availability),
        )
        .merge(webhooks::router())
}
