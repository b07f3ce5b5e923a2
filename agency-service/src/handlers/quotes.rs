//! Quote handlers.

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::{
    ConvertQuoteRequest, CreateDocumentRequest, DocumentResponse, DocumentsQuery, ListResponse,
    QuoteStatusRequest, UpdateDocumentRequest,
};
use crate::models::DocumentKind;
use crate::startup::AppState;

/// Create a draft quote under a freshly allocated `ORC` number.
///
/// POST /api/quotes
pub async fn create_quote(
    State(state): State<AppState>,
    Json(req): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<DocumentResponse>), AppError> {
    req.validate_request()?;
    let quote = state
        .service
        .create_document(DocumentKind::Quote, req.into())
        .await?;
    Ok((StatusCode::CREATED, Json(quote.into())))
}

/// GET /api/quotes
pub async fn list_quotes(
    State(state): State<AppState>,
    Query(query): Query<DocumentsQuery>,
) -> Result<Json<ListResponse<DocumentResponse>>, AppError> {
    let filter = query.into_filter(DocumentKind::Quote)?;
    let quotes = state.service.list_documents(&filter).await?;

    Ok(Json(ListResponse::new(
        quotes.into_iter().map(Into::into).collect(),
        filter.page.max(1),
        filter.limit() as u32,
    )))
}

/// GET /api/quotes/:id
pub async fn get_quote(
    State(state): State<AppState>,
    Path(quote_id): Path<Uuid>,
) -> Result<Json<DocumentResponse>, AppError> {
    let quote = state
        .service
        .get_document(DocumentKind::Quote, quote_id)
        .await?;
    Ok(Json(quote.into()))
}

/// PATCH /api/quotes/:id
pub async fn update_quote(
    State(state): State<AppState>,
    Path(quote_id): Path<Uuid>,
    Json(req): Json<UpdateDocumentRequest>,
) -> Result<Json<DocumentResponse>, AppError> {
    req.validate_request()?;
    let quote = state
        .service
        .update_document(DocumentKind::Quote, quote_id, req.into())
        .await?;
    Ok(Json(quote.into()))
}

/// Soft delete; the quote number is never handed out again.
///
/// DELETE /api/quotes/:id
pub async fn delete_quote(
    State(state): State<AppState>,
    Path(quote_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .service
        .delete_document(DocumentKind::Quote, quote_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/quotes/:id/status
pub async fn set_quote_status(
    State(state): State<AppState>,
    Path(quote_id): Path<Uuid>,
    Json(req): Json<QuoteStatusRequest>,
) -> Result<Json<DocumentResponse>, AppError> {
    let quote = state.service.set_quote_status(quote_id, req.status).await?;
    Ok(Json(quote.into()))
}

/// Create a pending invoice from the quote. The body is optional.
///
/// POST /api/quotes/:id/convert
pub async fn convert_quote(
    State(state): State<AppState>,
    Path(quote_id): Path<Uuid>,
    body: Option<Json<ConvertQuoteRequest>>,
) -> Result<(StatusCode, Json<DocumentResponse>), AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    req.validate_request()?;
    let invoice = state.service.convert_quote(quote_id, req.into()).await?;
    Ok((StatusCode::CREATED, Json(invoice.into())))
}
