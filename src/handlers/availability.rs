use axum::extract::State;
use serde::Deserialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::inventory::{self, Availability, LineItem};

#[derive(Debug, Deserialize)]
pub struct AvailabilityRequest {
    pub items: Vec<LineItem>,
}

/// Pre-purchase check: can these seats be bought right now?
///
/// Advisory. The authoritative check happens when the payment arrives.
pub async fn check_availability(
    State(state): State<AppState>,
    Path(event_ref): Path<String>,
    Json(request): Json<AvailabilityRequest>,
) -> Result<Json<Availability>> {
    if request.items.is_empty() {
        return Err(AppError::BadRequest("items must not be empty".into()));
    }
    if let Some(bad) = request.items.iter().find(|i| i.quantity < 1) {
        return Err(AppError::BadRequest(format!(
            "quantity for {} must be at least 1",
            bad.ticket_type_id
        )));
    }

    let conn = state.db.get()?;
    let event = state
        .catalog
        .resolve(&conn, &event_ref)?
        .ok_or_else(|| AppError::NotFound(format!("event {}", event_ref)))?;

    let availability =
        inventory::check_availability(&conn, &event, &request.items, queries::now())?;
    Ok(Json(availability))
}
