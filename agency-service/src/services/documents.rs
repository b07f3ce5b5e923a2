//! Quote and invoice operations.

use super::clock::Clock;
use super::metrics::{
    DOCUMENTS_TOTAL, ERRORS_TOTAL, NUMBER_ALLOCATIONS_TOTAL, NUMBER_INSERT_CONFLICTS_TOTAL,
    OVERDUE_MARKED_TOTAL, PAYMENTS_TOTAL, PAYMENT_AMOUNT_TOTAL,
};
use super::store::{DocumentStore, StoreError};
use crate::models::{
    Client, ClientChanges, ClientSnapshot, ConvertQuote, CreateDocument, Document,
    DocumentChanges, DocumentKind, DocumentStatus, InvoiceStatus, ListClientsFilter,
    ListDocumentsFilter, NewClient, NewDocument, NewPayment, Payment, QuoteStatus, Totals,
};
use crate::numbering::{DocumentNumber, NumberAllocator, NumberingError, DEFAULT_MAX_ATTEMPTS};
use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const EDITABLE_QUOTES: [DocumentStatus; 2] = [
    DocumentStatus::Quote(QuoteStatus::Draft),
    DocumentStatus::Quote(QuoteStatus::Sent),
];

const CONVERTIBLE_QUOTES: [DocumentStatus; 3] = [
    DocumentStatus::Quote(QuoteStatus::Draft),
    DocumentStatus::Quote(QuoteStatus::Sent),
    DocumentStatus::Quote(QuoteStatus::Accepted),
];

const DELETABLE_QUOTES: [DocumentStatus; 4] = [
    DocumentStatus::Quote(QuoteStatus::Draft),
    DocumentStatus::Quote(QuoteStatus::Sent),
    DocumentStatus::Quote(QuoteStatus::Accepted),
    DocumentStatus::Quote(QuoteStatus::Declined),
];

const EDITABLE_INVOICES: [DocumentStatus; 1] = [DocumentStatus::Invoice(InvoiceStatus::Pending)];

const DELETABLE_INVOICES: [DocumentStatus; 2] = [
    DocumentStatus::Invoice(InvoiceStatus::Pending),
    DocumentStatus::Invoice(InvoiceStatus::Overdue),
];

fn not_found(kind: DocumentKind) -> AppError {
    let label = match kind {
        DocumentKind::Quote => "Quote",
        DocumentKind::Invoice => "Invoice",
    };
    AppError::NotFound(anyhow::anyhow!("{} not found", label))
}

fn modified_concurrently() -> AppError {
    AppError::Conflict(anyhow::anyhow!(
        "Document was modified concurrently, please try again"
    ))
}

/// Document operations over a store, a number allocator and a clock.
pub struct DocumentService {
    store: Arc<dyn DocumentStore>,
    allocator: Arc<dyn NumberAllocator>,
    clock: Arc<dyn Clock>,
    max_insert_attempts: u32,
}

impl DocumentService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        allocator: Arc<dyn NumberAllocator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            allocator,
            clock,
            max_insert_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// How many times an insert that lost the race for its number is retried
    /// with a freshly allocated one.
    pub fn with_max_insert_attempts(mut self, attempts: u32) -> Self {
        self.max_insert_attempts = attempts.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // -------------------------------------------------------------------------
    // Clients
    // -------------------------------------------------------------------------

    pub async fn create_client(&self, input: NewClient) -> Result<Client, AppError> {
        Ok(self.store.create_client(&input).await?)
    }

    pub async fn get_client(&self, client_id: Uuid) -> Result<Client, AppError> {
        self.store
            .get_client(client_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Client not found")))
    }

    pub async fn list_clients(&self, filter: &ListClientsFilter) -> Result<Vec<Client>, AppError> {
        Ok(self.store.list_clients(filter).await?)
    }

    pub async fn update_client(
        &self,
        client_id: Uuid,
        changes: ClientChanges,
    ) -> Result<Client, AppError> {
        self.store
            .update_client(client_id, &changes)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Client not found")))
    }

    pub async fn delete_client(&self, client_id: Uuid) -> Result<(), AppError> {
        if !self.store.delete_client(client_id).await? {
            return Err(AppError::NotFound(anyhow::anyhow!("Client not found")));
        }
        info!(client_id = %client_id, "Client deleted");
        Ok(())
    }

    async fn resolve_client(
        &self,
        client_id: Option<Uuid>,
        inline: Option<ClientSnapshot>,
    ) -> Result<ClientSnapshot, AppError> {
        match (client_id, inline) {
            (Some(id), inline) => {
                let client = self.store.get_client(id).await?.ok_or_else(|| {
                    AppError::BadRequest(anyhow::anyhow!("Client {} does not exist", id))
                })?;
                Ok(inline.unwrap_or_else(|| client.snapshot()))
            }
            (None, Some(snapshot)) => Ok(snapshot),
            (None, None) => Err(AppError::BadRequest(anyhow::anyhow!(
                "Either client_id or client details are required"
            ))),
        }
    }

    // -------------------------------------------------------------------------
    // Numbering
    // -------------------------------------------------------------------------

    fn current_year(&self) -> i32 {
        self.clock.today().year()
    }

    async fn allocate(&self, kind: DocumentKind, year: i32) -> Result<DocumentNumber, AppError> {
        match self.allocator.allocate(kind, year).await {
            Ok(number) => Ok(number),
            Err(err) => {
                let outcome = match &err {
                    NumberingError::AllocationExhausted { .. } => "exhausted",
                    NumberingError::StorageUnavailable(_) => "storage_error",
                    NumberingError::MalformedNumber(_) => "malformed",
                    NumberingError::SequenceExhausted { .. } => "sequence_exhausted",
                };
                NUMBER_ALLOCATIONS_TOTAL
                    .with_label_values(&[kind.as_str(), outcome])
                    .inc();
                ERRORS_TOTAL.with_label_values(&[outcome]).inc();
                Err(err.into())
            }
        }
    }

    /// Run `insert` under a freshly allocated number, allocating again when the
    /// insert loses the race for its number.
    ///
    /// Any other failure aborts at once.
    async fn with_fresh_number<T, F, Fut>(
        &self,
        kind: DocumentKind,
        mut insert: F,
    ) -> Result<T, AppError>
    where
        F: FnMut(DocumentNumber) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let year = self.current_year();

        for attempt in 1..=self.max_insert_attempts {
            let number = self.allocate(kind, year).await?;

            match insert(number).await {
                Ok(value) => {
                    NUMBER_ALLOCATIONS_TOTAL
                        .with_label_values(&[kind.as_str(), "allocated"])
                        .inc();
                    return Ok(value);
                }
                Err(err) if err.is_number_conflict() => {
                    NUMBER_INSERT_CONFLICTS_TOTAL
                        .with_label_values(&[kind.as_str()])
                        .inc();
                    warn!(
                        number = %number,
                        attempt = attempt,
                        "Document number taken by a concurrent insert, allocating again"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        NUMBER_ALLOCATIONS_TOTAL
            .with_label_values(&[kind.as_str(), "exhausted"])
            .inc();
        ERRORS_TOTAL.with_label_values(&["exhausted"]).inc();
        Err(NumberingError::AllocationExhausted {
            kind,
            year,
            attempts: self.max_insert_attempts,
        }
        .into())
    }

    /// Allocate a number for `kind` in the current year without creating a
    /// document.
    #[instrument(skip(self))]
    pub async fn preview_number(&self, kind: DocumentKind) -> Result<DocumentNumber, AppError> {
        let number = self.allocate(kind, self.current_year()).await?;
        NUMBER_ALLOCATIONS_TOTAL
            .with_label_values(&[kind.as_str(), "allocated"])
            .inc();
        Ok(number)
    }

    // -------------------------------------------------------------------------
    // Documents
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input))]
    pub async fn create_document(
        &self,
        kind: DocumentKind,
        input: CreateDocument,
    ) -> Result<Document, AppError> {
        // Checked before a number is spent on the insert.
        Totals::compute(&input.line_items, input.tax_rate).map_err(StoreError::from)?;

        let client = self
            .resolve_client(input.client_id, input.client.clone())
            .await?;
        let status = match kind {
            DocumentKind::Quote => DocumentStatus::Quote(QuoteStatus::Draft),
            DocumentKind::Invoice => DocumentStatus::Invoice(InvoiceStatus::Pending),
        };
        let issue_date = input.issue_date.unwrap_or_else(|| self.clock.today());

        let store = &self.store;
        let document = self
            .with_fresh_number(kind, |number| {
                let new_document = NewDocument {
                    number,
                    status,
                    client_id: input.client_id,
                    client: client.clone(),
                    issue_date,
                    due_date: input.due_date,
                    valid_until: input.valid_until,
                    tax_rate: input.tax_rate,
                    notes: input.notes.clone(),
                    quote_id: None,
                    line_items: input.line_items.clone(),
                };
                async move { store.insert_document(&new_document).await }
            })
            .await?;

        DOCUMENTS_TOTAL.with_label_values(&[kind.as_str()]).inc();

        info!(
            document_id = %document.document_id,
            number = %document.number,
            total = %document.totals.total,
            "Document created"
        );

        Ok(document)
    }

    pub async fn get_document(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
    ) -> Result<Document, AppError> {
        self.store
            .get_document(kind, document_id)
            .await?
            .ok_or_else(|| not_found(kind))
    }

    pub async fn list_documents(
        &self,
        filter: &ListDocumentsFilter,
    ) -> Result<Vec<Document>, AppError> {
        Ok(self.store.list_documents(filter).await?)
    }

    #[instrument(skip(self, changes))]
    pub async fn update_document(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
        changes: DocumentChanges,
    ) -> Result<Document, AppError> {
        let current = self.get_document(kind, document_id).await?;
        let editable: &[DocumentStatus] = match kind {
            DocumentKind::Quote => &EDITABLE_QUOTES,
            DocumentKind::Invoice => &EDITABLE_INVOICES,
        };
        if !editable.contains(&current.status) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "A {} in status {} cannot be edited",
                kind,
                current.status.as_str()
            )));
        }

        self.store
            .update_document(kind, document_id, editable, &changes)
            .await?
            .ok_or_else(modified_concurrently)
    }

    /// Explicit quote status change. Conversion has its own operation.
    #[instrument(skip(self))]
    pub async fn set_quote_status(
        &self,
        quote_id: Uuid,
        to: QuoteStatus,
    ) -> Result<Document, AppError> {
        let quote = self.get_document(DocumentKind::Quote, quote_id).await?;
        let Some(current) = quote.quote_status() else {
            return Err(not_found(DocumentKind::Quote));
        };

        if to == QuoteStatus::Converted {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Quotes are converted by creating an invoice from them"
            )));
        }
        if !current.can_transition_to(to) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Cannot change quote status from {} to {}",
                current.as_str(),
                to.as_str()
            )));
        }

        let updated = self
            .store
            .set_status(
                DocumentKind::Quote,
                quote_id,
                &[DocumentStatus::Quote(current)],
                DocumentStatus::Quote(to),
            )
            .await?
            .ok_or_else(modified_concurrently)?;

        info!(
            quote_id = %quote_id,
            from = current.as_str(),
            to = to.as_str(),
            "Quote status changed"
        );

        Ok(updated)
    }

    /// Create a pending invoice from a quote and mark the quote converted.
    #[instrument(skip(self, input))]
    pub async fn convert_quote(
        &self,
        quote_id: Uuid,
        input: ConvertQuote,
    ) -> Result<Document, AppError> {
        let quote = self.get_document(DocumentKind::Quote, quote_id).await?;
        match quote.quote_status() {
            Some(QuoteStatus::Converted) => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Quote has already been converted"
                )))
            }
            Some(status) if status.is_convertible() => {}
            _ => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "A quote in status {} cannot be converted",
                    quote.status.as_str()
                )))
            }
        }

        let issue_date = input.issue_date.unwrap_or_else(|| self.clock.today());
        let line_items = quote.line_item_inputs();

        let store = &self.store;
        let quote = &quote;
        let invoice = self
            .with_fresh_number(DocumentKind::Invoice, |number| {
                let new_invoice = NewDocument {
                    number,
                    status: DocumentStatus::Invoice(InvoiceStatus::Pending),
                    client_id: quote.client_id,
                    client: quote.client.clone(),
                    issue_date,
                    due_date: input.due_date,
                    valid_until: None,
                    tax_rate: quote.tax_rate,
                    notes: quote.notes.clone(),
                    quote_id: Some(quote_id),
                    line_items: line_items.clone(),
                };
                async move {
                    store
                        .convert_quote(quote_id, &CONVERTIBLE_QUOTES, &new_invoice)
                        .await
                }
            })
            .await?
            .ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!(
                    "Quote was converted or changed concurrently"
                ))
            })?;

        DOCUMENTS_TOTAL
            .with_label_values(&[DocumentKind::Invoice.as_str()])
            .inc();

        info!(
            quote_id = %quote_id,
            invoice_id = %invoice.document_id,
            number = %invoice.number,
            "Quote converted to invoice"
        );

        Ok(invoice)
    }

    /// Soft delete. The number stays taken.
    #[instrument(skip(self))]
    pub async fn delete_document(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
    ) -> Result<(), AppError> {
        let current = self.get_document(kind, document_id).await?;

        let deletable: &[DocumentStatus] = match kind {
            DocumentKind::Quote => &DELETABLE_QUOTES,
            DocumentKind::Invoice => &DELETABLE_INVOICES,
        };
        if current.amount_paid > Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invoices with payments cannot be deleted"
            )));
        }
        if !deletable.contains(&current.status) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "A {} in status {} cannot be deleted",
                kind,
                current.status.as_str()
            )));
        }

        if !self
            .store
            .soft_delete_document(kind, document_id, deletable)
            .await?
        {
            return Err(modified_concurrently());
        }

        info!(document_id = %document_id, number = %current.number, "Document deleted");

        Ok(())
    }

    /// Move every pending invoice due before `as_of` (default today) to overdue.
    #[instrument(skip(self))]
    pub async fn mark_overdue(&self, as_of: Option<NaiveDate>) -> Result<u64, AppError> {
        let as_of = as_of.unwrap_or_else(|| self.clock.today());
        let marked = self.store.mark_overdue(as_of).await?;

        if marked > 0 {
            OVERDUE_MARKED_TOTAL.inc_by(marked);
            info!(count = marked, as_of = %as_of, "Invoices marked overdue");
        }

        Ok(marked)
    }

    // -------------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(invoice_id = %input.invoice_id))]
    pub async fn record_payment(&self, input: NewPayment) -> Result<(Payment, Document), AppError> {
        if input.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Payment amount must be positive"
            )));
        }

        let invoice = self
            .get_document(DocumentKind::Invoice, input.invoice_id)
            .await?;
        let accepts = invoice
            .invoice_status()
            .is_some_and(|s| s.accepts_payments());
        if !accepts {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "An invoice in status {} does not accept payments",
                invoice.status.as_str()
            )));
        }
        if input.amount > invoice.amount_due() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Payment of {} exceeds the amount due of {}",
                input.amount,
                invoice.amount_due()
            )));
        }

        let (payment, invoice) = self
            .store
            .record_payment(&input)
            .await?
            .ok_or_else(modified_concurrently)?;

        PAYMENTS_TOTAL
            .with_label_values(&[payment.method.as_str()])
            .inc();
        PAYMENT_AMOUNT_TOTAL
            .with_label_values(&[payment.method.as_str()])
            .inc_by(payment.amount.to_f64().unwrap_or(0.0));

        info!(
            payment_id = %payment.payment_id,
            amount = %payment.amount,
            status = invoice.status.as_str(),
            "Payment recorded"
        );

        Ok((payment, invoice))
    }

    pub async fn list_payments(&self, invoice_id: Uuid) -> Result<Vec<Payment>, AppError> {
        self.get_document(DocumentKind::Invoice, invoice_id).await?;
        Ok(self.store.list_payments(invoice_id).await?)
    }
}
