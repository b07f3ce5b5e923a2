//! Storage contract shared by the Postgres and in-memory backends.

use crate::models::{
    AmountOverflow, Client, ClientChanges, Document, DocumentChanges, DocumentKind,
    DocumentStatus, ListClientsFilter, ListDocumentsFilter, NewClient, NewDocument, NewPayment,
    Payment,
};
use crate::numbering::{NumberStore, NumberingError, SequenceStore};
use async_trait::async_trait;
use chrono::NaiveDate;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

/// Unique constraint on `documents(kind, number)`.
pub const NUMBER_CONSTRAINT: &str = "documents_kind_number_key";

/// Unique constraint on `documents(quote_id)`: a quote converts at most once.
pub const QUOTE_LINK_CONSTRAINT: &str = "documents_quote_id_key";

/// Storage failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(anyhow::Error),

    #[error("Unique constraint {constraint} violated")]
    UniqueViolation { constraint: String },

    #[error("Malformed document number: {0:?}")]
    MalformedNumber(String),

    /// The (kind, year) counter has no sequence values left.
    #[error("{kind} sequence for {year} is exhausted")]
    SequenceExhausted { kind: DocumentKind, year: i32 },

    #[error(transparent)]
    AmountOverflow(#[from] AmountOverflow),
}

impl StoreError {
    pub fn unavailable(context: &str, err: impl std::fmt::Display) -> Self {
        StoreError::Unavailable(anyhow::anyhow!("{}: {}", context, err))
    }

    /// The insert lost a race for its document number.
    pub fn is_number_conflict(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { constraint } if constraint == NUMBER_CONSTRAINT)
    }

    pub fn is_quote_link_conflict(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { constraint } if constraint == QUOTE_LINK_CONSTRAINT)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(e) => AppError::DatabaseError(e),
            StoreError::UniqueViolation { constraint } if constraint == QUOTE_LINK_CONSTRAINT => {
                AppError::Conflict(anyhow::anyhow!("Quote has already been converted"))
            }
            StoreError::UniqueViolation { constraint } => {
                AppError::Conflict(anyhow::anyhow!("Unique constraint {} violated", constraint))
            }
            StoreError::MalformedNumber(n) => AppError::InternalError(anyhow::anyhow!(
                "Stored document number {:?} is malformed",
                n
            )),
            StoreError::SequenceExhausted { kind, year } => {
                NumberingError::SequenceExhausted { kind, year }.into()
            }
            StoreError::AmountOverflow(e) => AppError::BadRequest(e.into()),
        }
    }
}

/// Persistence for clients, documents and payments.
///
/// Conditional writes take the statuses a document may be in for the write to
/// apply and return `None` (or `false`) when the document is missing, deleted
/// or in another status. Callers read the document first to tell these apart.
#[async_trait]
pub trait DocumentStore: NumberStore + SequenceStore {
    async fn health_check(&self) -> Result<(), StoreError>;

    // Clients

    async fn create_client(&self, input: &NewClient) -> Result<Client, StoreError>;

    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, StoreError>;

    async fn list_clients(&self, filter: &ListClientsFilter) -> Result<Vec<Client>, StoreError>;

    async fn update_client(
        &self,
        client_id: Uuid,
        changes: &ClientChanges,
    ) -> Result<Option<Client>, StoreError>;

    /// Documents referencing the client keep their snapshot and lose the link.
    async fn delete_client(&self, client_id: Uuid) -> Result<bool, StoreError>;

    // Documents

    /// Insert a document and its line items in one write.
    ///
    /// Fails with [`StoreError::UniqueViolation`] on [`NUMBER_CONSTRAINT`] if
    /// the number is already taken, deleted documents included.
    async fn insert_document(&self, input: &NewDocument) -> Result<Document, StoreError>;

    /// A live (not deleted) document of `kind`.
    async fn get_document(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
    ) -> Result<Option<Document>, StoreError>;

    /// Live documents, newest first.
    async fn list_documents(
        &self,
        filter: &ListDocumentsFilter,
    ) -> Result<Vec<Document>, StoreError>;

    /// Apply `changes`, recomputing totals when they touch line items or the
    /// tax rate.
    async fn update_document(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
        editable: &[DocumentStatus],
        changes: &DocumentChanges,
    ) -> Result<Option<Document>, StoreError>;

    async fn set_status(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
        from: &[DocumentStatus],
        to: DocumentStatus,
    ) -> Result<Option<Document>, StoreError>;

    /// Soft delete. Only documents without payments can be deleted; the
    /// number stays taken.
    async fn soft_delete_document(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
        deletable: &[DocumentStatus],
    ) -> Result<bool, StoreError>;

    /// Insert `invoice` and mark the quote converted in one write.
    ///
    /// Returns `None` without inserting anything when the quote is not in one
    /// of `convertible`.
    async fn convert_quote(
        &self,
        quote_id: Uuid,
        convertible: &[DocumentStatus],
        invoice: &NewDocument,
    ) -> Result<Option<Document>, StoreError>;

    /// Move pending invoices due before `as_of` to overdue. Returns how many
    /// changed.
    async fn mark_overdue(&self, as_of: NaiveDate) -> Result<u64, StoreError>;

    // Payments

    /// Record a payment and add it to the invoice's `amount_paid`, switching
    /// the invoice to paid once fully covered.
    ///
    /// Returns `None` when the invoice does not accept payments or the amount
    /// exceeds what is still due.
    async fn record_payment(
        &self,
        input: &NewPayment,
    ) -> Result<Option<(Payment, Document)>, StoreError>;

    async fn list_payments(&self, invoice_id: Uuid) -> Result<Vec<Payment>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_conflict_is_recognised_by_constraint() {
        let err = StoreError::UniqueViolation {
            constraint: NUMBER_CONSTRAINT.to_string(),
        };
        assert!(err.is_number_conflict());
        assert!(!err.is_quote_link_conflict());
    }

    #[test]
    fn quote_link_conflict_maps_to_conflict() {
        let err: AppError = StoreError::UniqueViolation {
            constraint: QUOTE_LINK_CONSTRAINT.to_string(),
        }
        .into();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn unavailable_maps_to_database_error() {
        let err: AppError = StoreError::unavailable("Failed to connect", "refused").into();
        assert!(matches!(err, AppError::DatabaseError(_)));
    }
}
