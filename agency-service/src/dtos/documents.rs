use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use super::{derived_errors, field_error, into_result};
use crate::models::{
    ClientSnapshot, ConvertQuote, CreateDocument, Document, DocumentChanges, DocumentKind,
    DocumentStatus, LineItem, LineItemInput, ListDocumentsFilter, QuoteStatus, Totals,
};

// ============================================================================
// Requests
// ============================================================================

/// Client contact details given inline on a document.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ClientDetails {
    #[validate(length(min = 1, max = 200, message = "Client name is required"))]
    pub name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub tax_id: Option<String>,
}

impl From<ClientDetails> for ClientSnapshot {
    fn from(details: ClientDetails) -> Self {
        Self {
            name: details.name,
            email: details.email,
            phone: details.phone,
            address: details.address,
            tax_id: details.tax_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LineItemRequest {
    #[validate(length(min = 1, max = 500, message = "Line item description is required"))]
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl From<LineItemRequest> for LineItemInput {
    fn from(req: LineItemRequest) -> Self {
        Self {
            description: req.description,
            quantity: req.quantity,
            unit_price: req.unit_price,
        }
    }
}

fn check_line_items(errors: &mut ValidationErrors, items: &[LineItemRequest]) {
    if items.iter().any(|item| item.quantity <= Decimal::ZERO) {
        field_error(
            errors,
            "line_items",
            "quantity",
            "Line item quantity must be positive",
        );
    }
    if items.iter().any(|item| item.unit_price < Decimal::ZERO) {
        field_error(
            errors,
            "line_items",
            "unit_price",
            "Line item unit price cannot be negative",
        );
    }
}

/// Amounts must stay inside the `Decimal` range at the given rate.
fn check_totals(errors: &mut ValidationErrors, items: &[LineItemRequest], tax_rate: Decimal) {
    let inputs: Vec<LineItemInput> = items.iter().cloned().map(Into::into).collect();
    if Totals::compute(&inputs, tax_rate).is_err() {
        field_error(
            errors,
            "line_items",
            "overflow",
            "Line item amounts are too large",
        );
    }
}

fn check_tax_rate(errors: &mut ValidationErrors, tax_rate: Option<Decimal>) {
    if let Some(rate) = tax_rate {
        if rate < Decimal::ZERO || rate > Decimal::ONE {
            field_error(
                errors,
                "tax_rate",
                "range",
                "Tax rate must be between 0 and 1",
            );
        }
    }
}

fn check_dates(
    errors: &mut ValidationErrors,
    issue_date: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
    valid_until: Option<NaiveDate>,
) {
    let Some(issue_date) = issue_date else {
        return;
    };
    if due_date.is_some_and(|due| due < issue_date) {
        field_error(
            errors,
            "due_date",
            "before_issue_date",
            "Due date cannot be before the issue date",
        );
    }
    if valid_until.is_some_and(|until| until < issue_date) {
        field_error(
            errors,
            "valid_until",
            "before_issue_date",
            "Validity cannot end before the issue date",
        );
    }
}

/// Body of `POST /api/quotes` and `POST /api/invoices`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateDocumentRequest {
    pub client_id: Option<Uuid>,
    #[validate(nested)]
    pub client: Option<ClientDetails>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub tax_rate: Option<Decimal>,
    #[validate(length(max = 5000))]
    pub notes: Option<String>,
    #[validate(nested)]
    #[serde(default)]
    pub line_items: Vec<LineItemRequest>,
}

impl CreateDocumentRequest {
    /// Field checks plus the money and date rules the derive cannot express.
    pub fn validate_request(&self) -> Result<(), ValidationErrors> {
        let mut errors = derived_errors(self.validate());
        check_line_items(&mut errors, &self.line_items);
        check_tax_rate(&mut errors, self.tax_rate);
        check_totals(
            &mut errors,
            &self.line_items,
            self.tax_rate.unwrap_or(Decimal::ZERO),
        );
        check_dates(
            &mut errors,
            self.issue_date,
            self.due_date,
            self.valid_until,
        );
        into_result(errors)
    }
}

impl From<CreateDocumentRequest> for CreateDocument {
    fn from(req: CreateDocumentRequest) -> Self {
        Self {
            client_id: req.client_id,
            client: req.client.map(Into::into),
            issue_date: req.issue_date,
            due_date: req.due_date,
            valid_until: req.valid_until,
            tax_rate: req.tax_rate.unwrap_or(Decimal::ZERO),
            notes: req.notes,
            line_items: req.line_items.into_iter().map(Into::into).collect(),
        }
    }
}

/// Body of `PATCH /api/quotes/:id` and `PATCH /api/invoices/:id`.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateDocumentRequest {
    #[validate(nested)]
    pub client: Option<ClientDetails>,
    pub due_date: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub tax_rate: Option<Decimal>,
    #[validate(length(max = 5000))]
    pub notes: Option<String>,
    #[validate(nested)]
    pub line_items: Option<Vec<LineItemRequest>>,
}

impl UpdateDocumentRequest {
    pub fn validate_request(&self) -> Result<(), ValidationErrors> {
        let mut errors = derived_errors(self.validate());
        if let Some(items) = &self.line_items {
            check_line_items(&mut errors, items);
            // The stored rate is at most 1.
            check_totals(&mut errors, items, self.tax_rate.unwrap_or(Decimal::ONE));
        }
        check_tax_rate(&mut errors, self.tax_rate);
        into_result(errors)
    }
}

impl From<UpdateDocumentRequest> for DocumentChanges {
    fn from(req: UpdateDocumentRequest) -> Self {
        Self {
            client: req.client.map(Into::into),
            due_date: req.due_date,
            valid_until: req.valid_until,
            tax_rate: req.tax_rate,
            notes: req.notes,
            line_items: req
                .line_items
                .map(|items| items.into_iter().map(Into::into).collect()),
        }
    }
}

/// Body of `POST /api/quotes/:id/status`.
#[derive(Debug, Deserialize)]
pub struct QuoteStatusRequest {
    pub status: QuoteStatus,
}

/// Body of `POST /api/quotes/:id/convert`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct ConvertQuoteRequest {
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
}

impl ConvertQuoteRequest {
    pub fn validate_request(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        check_dates(&mut errors, self.issue_date, self.due_date, None);
        into_result(errors)
    }
}

impl From<ConvertQuoteRequest> for ConvertQuote {
    fn from(req: ConvertQuoteRequest) -> Self {
        Self {
            issue_date: req.issue_date,
            due_date: req.due_date,
        }
    }
}

/// Body of `POST /api/invoices/mark-overdue`.
#[derive(Debug, Default, Deserialize)]
pub struct MarkOverdueRequest {
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkOverdueResponse {
    pub marked: u64,
}

/// Query string for document listings.
#[derive(Debug, Default, Deserialize)]
pub struct DocumentsQuery {
    pub status: Option<String>,
    pub client_id: Option<Uuid>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl DocumentsQuery {
    pub fn into_filter(self, kind: DocumentKind) -> Result<ListDocumentsFilter, AppError> {
        let mut filter = ListDocumentsFilter::new(kind);
        if let Some(status) = self.status {
            filter.status = Some(
                DocumentStatus::parse(kind, &status)
                    .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?,
            );
        }
        filter.client_id = self.client_id;
        if let Some(page) = self.page {
            filter.page = page;
        }
        if let Some(page_size) = self.page_size {
            filter.page_size = page_size;
        }
        Ok(filter)
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub document_id: Uuid,
    pub kind: DocumentKind,
    pub number: String,
    pub status: DocumentStatus,
    pub client_id: Option<Uuid>,
    pub client: ClientSnapshot,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub tax_rate: Decimal,
    #[serde(flatten)]
    pub totals: Totals,
    pub amount_paid: Decimal,
    pub amount_due: Decimal,
    pub notes: Option<String>,
    pub quote_id: Option<Uuid>,
    pub line_items: Vec<LineItem>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl From<Document> for DocumentResponse {
    fn from(document: Document) -> Self {
        let amount_due = document.amount_due();
        Self {
            document_id: document.document_id,
            kind: document.kind,
            number: document.number,
            status: document.status,
            client_id: document.client_id,
            client: document.client,
            issue_date: document.issue_date,
            due_date: document.due_date,
            valid_until: document.valid_until,
            tax_rate: document.tax_rate,
            totals: document.totals,
            amount_paid: document.amount_paid,
            amount_due,
            notes: document.notes,
            quote_id: document.quote_id,
            line_items: document.line_items,
            created_utc: document.created_utc,
            updated_utc: document.updated_utc,
        }
    }
}
