use axum::extract::State;

use crate::db::AppState;
use crate::extractors::Json;
use crate::identity::MaybeCaller;
use crate::models::{RefundRequest, RefundResponse};
use crate::refunds::{RefundError, RefundReconciler};

pub async fn create_refund(
    State(state): State<AppState>,
    MaybeCaller(caller): MaybeCaller,
    Json(request): Json<RefundRequest>,
) -> Result<Json<RefundResponse>, RefundError> {
    let reconciler = RefundReconciler::from_state(&state);
    let response = reconciler.refund(caller.as_ref(), &request).await?;
    Ok(Json(response))
}
