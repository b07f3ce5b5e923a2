//! Document number allocation endpoint.

use axum::extract::{Json, State};
use service_core::error::AppError;

use crate::dtos::{NumberRequest, NumberResponse};
use crate::startup::AppState;

/// Allocate the next number for a document kind in the current year.
///
/// Exhausting the attempt budget answers 409 so the caller can try again;
/// a storage failure answers 500.
///
/// POST /api/numbers
pub async fn allocate_number(
    State(state): State<AppState>,
    Json(req): Json<NumberRequest>,
) -> Result<Json<NumberResponse>, AppError> {
    let number = state.service.preview_number(req.kind).await?;
    Ok(Json(number.into()))
}
