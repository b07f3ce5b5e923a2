//! Invoice and payment handlers.

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::{
    CreateDocumentRequest, DocumentResponse, DocumentsQuery, ListResponse, MarkOverdueRequest,
    MarkOverdueResponse, PaymentRecordedResponse, PaymentResponse, RecordPaymentRequest,
    UpdateDocumentRequest,
};
use crate::models::DocumentKind;
use crate::startup::AppState;

// ============================================================================
// Invoices
// ============================================================================

/// Create a pending invoice under a freshly allocated `FAT` number.
///
/// POST /api/invoices
pub async fn create_invoice(
    State(state): State<AppState>,
    Json(req): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<DocumentResponse>), AppError> {
    req.validate_request()?;
    let invoice = state
        .service
        .create_document(DocumentKind::Invoice, req.into())
        .await?;
    Ok((StatusCode::CREATED, Json(invoice.into())))
}

/// GET /api/invoices
pub async fn list_invoices(
    State(state): State<AppState>,
    Query(query): Query<DocumentsQuery>,
) -> Result<Json<ListResponse<DocumentResponse>>, AppError> {
    let filter = query.into_filter(DocumentKind::Invoice)?;
    let invoices = state.service.list_documents(&filter).await?;

    Ok(Json(ListResponse::new(
        invoices.into_iter().map(Into::into).collect(),
        filter.page.max(1),
        filter.limit() as u32,
    )))
}

/// GET /api/invoices/:id
pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<DocumentResponse>, AppError> {
    let invoice = state
        .service
        .get_document(DocumentKind::Invoice, invoice_id)
        .await?;
    Ok(Json(invoice.into()))
}

/// PATCH /api/invoices/:id
pub async fn update_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(req): Json<UpdateDocumentRequest>,
) -> Result<Json<DocumentResponse>, AppError> {
    req.validate_request()?;
    let invoice = state
        .service
        .update_document(DocumentKind::Invoice, invoice_id, req.into())
        .await?;
    Ok(Json(invoice.into()))
}

/// DELETE /api/invoices/:id
pub async fn delete_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state
        .service
        .delete_document(DocumentKind::Invoice, invoice_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Run the overdue sweep now. `as_of` defaults to today.
///
/// POST /api/invoices/mark-overdue
pub async fn mark_overdue(
    State(state): State<AppState>,
    body: Option<Json<MarkOverdueRequest>>,
) -> Result<Json<MarkOverdueResponse>, AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let marked = state.service.mark_overdue(req.as_of).await?;
    Ok(Json(MarkOverdueResponse { marked }))
}

// ============================================================================
// Payments
// ============================================================================

/// POST /api/invoices/:id/payments
pub async fn record_payment(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(req): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<PaymentRecordedResponse>), AppError> {
    req.validate_request()?;
    let today = state.service.clock().today();
    let (payment, invoice) = state
        .service
        .record_payment(req.into_payment(invoice_id, today))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(PaymentRecordedResponse {
            payment: payment.into(),
            invoice: invoice.into(),
        }),
    ))
}

/// GET /api/invoices/:id/payments
pub async fn list_payments(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Vec<PaymentResponse>>, AppError> {
    let payments = state.service.list_payments(invoice_id).await?;
    Ok(Json(payments.into_iter().map(Into::into).collect()))
}
