//! Request and response bodies for the REST API.

mod clients;
mod documents;
mod numbers;
mod payments;

pub use clients::{ClientResponse, ClientsQuery, CreateClientRequest, UpdateClientRequest};
pub use documents::{
    ClientDetails, ConvertQuoteRequest, CreateDocumentRequest, DocumentResponse, DocumentsQuery,
    LineItemRequest, MarkOverdueRequest, MarkOverdueResponse, QuoteStatusRequest,
    UpdateDocumentRequest,
};
pub use numbers::{NumberRequest, NumberResponse};
pub use payments::{PaymentRecordedResponse, PaymentResponse, RecordPaymentRequest};

use serde::Serialize;
use validator::{ValidationError, ValidationErrors, ValidationErrorsKind};

/// List envelope shared by every collection endpoint.
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
}

impl<T> ListResponse<T> {
    pub fn new(items: Vec<T>, page: u32, page_size: u32) -> Self {
        Self {
            items,
            page,
            page_size,
        }
    }
}

fn field_error(
    errors: &mut ValidationErrors,
    field: &'static str,
    code: &'static str,
    message: &'static str,
) {
    let error = ValidationError::new(code).with_message(message.into());
    // `add` panics on a field that already holds nested errors.
    let nested = errors
        .errors()
        .get(field)
        .is_some_and(|kind| !matches!(kind, ValidationErrorsKind::Field(_)));
    if nested {
        errors.add("__all__", error);
    } else {
        errors.add(field, error);
    }
}

/// Start from the derived checks so every failure is reported at once.
fn derived_errors(result: Result<(), ValidationErrors>) -> ValidationErrors {
    result.err().unwrap_or_default()
}

fn into_result(errors: ValidationErrors) -> Result<(), ValidationErrors> {
    if errors.errors().is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
