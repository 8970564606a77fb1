use axum::extract::State;
use serde::Serialize;

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
}

/// Liveness plus a datastore round-trip.
pub async fn health(State(state): State<AppState>) -> Result<Json<Health>> {
    let conn = state.db.get()?;
    conn.query_row("SELECT 1", [], |_| Ok(()))?;
    Ok(Json(Health { status: "ok" }))
}
