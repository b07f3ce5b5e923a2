//! In-process store for dev mode and tests.
//!
//! Enforces the same uniqueness rules as the Postgres schema and reports
//! violations under the same constraint names.

use super::store::{DocumentStore, StoreError, NUMBER_CONSTRAINT, QUOTE_LINK_CONSTRAINT};
use crate::models::{
    Client, ClientChanges, Document, DocumentChanges, DocumentKind, DocumentStatus,
    InvoiceStatus, LineItem, LineItemInput, ListClientsFilter, ListDocumentsFilter, NewClient,
    NewDocument, NewPayment, Payment, QuoteStatus, Totals,
};
use crate::numbering::{highest_sequence, DocumentNumber, NumberStore, SequenceStore};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Totals and line items of a document, computed before the lock is taken.
struct Priced {
    totals: Totals,
    line_items: Vec<LineItem>,
}

impl Priced {
    fn of(input: &NewDocument) -> Result<Self, StoreError> {
        Ok(Self {
            totals: input.totals()?,
            line_items: LineItemInput::to_line_items(&input.line_items)?,
        })
    }
}

#[derive(Default)]
struct State {
    clients: HashMap<Uuid, Client>,
    /// In creation order.
    documents: Vec<Document>,
    sequences: HashMap<(DocumentKind, i32), u32>,
    payments: Vec<Payment>,
}

impl State {
    fn live_mut(&mut self, kind: DocumentKind, document_id: Uuid) -> Option<&mut Document> {
        self.documents
            .iter_mut()
            .find(|d| d.document_id == document_id && d.kind == kind && d.deleted_utc.is_none())
    }

    fn partition_numbers(&self, kind: DocumentKind, year: i32) -> impl Iterator<Item = &str> {
        let pattern = DocumentNumber::partition_pattern(kind, year);
        let prefix = pattern.trim_end_matches('%').to_string();
        self.documents
            .iter()
            .filter(move |d| d.kind == kind && d.number.starts_with(&prefix))
            .map(|d| d.number.as_str())
    }

    fn insert(&mut self, input: &NewDocument, priced: Priced) -> Result<Document, StoreError> {
        let kind = input.kind();
        let number = input.number.to_string();

        if self
            .documents
            .iter()
            .any(|d| d.kind == kind && d.number == number)
        {
            return Err(StoreError::UniqueViolation {
                constraint: NUMBER_CONSTRAINT.to_string(),
            });
        }
        if let Some(quote_id) = input.quote_id {
            if self.documents.iter().any(|d| d.quote_id == Some(quote_id)) {
                return Err(StoreError::UniqueViolation {
                    constraint: QUOTE_LINK_CONSTRAINT.to_string(),
                });
            }
        }

        let now = Utc::now();
        let document = Document {
            document_id: Uuid::new_v4(),
            kind,
            number,
            status: input.status,
            client_id: input.client_id,
            client: input.client.clone(),
            issue_date: input.issue_date,
            due_date: input.due_date,
            valid_until: input.valid_until,
            tax_rate: input.tax_rate,
            totals: priced.totals,
            amount_paid: Decimal::ZERO,
            notes: input.notes.clone(),
            quote_id: input.quote_id,
            line_items: priced.line_items,
            created_utc: now,
            updated_utc: now,
            deleted_utc: None,
        };
        self.documents.push(document.clone());
        Ok(document)
    }
}

/// Store backed by process memory. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`StoreError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(anyhow::anyhow!(
                "Memory store is unavailable"
            )));
        }
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable(anyhow::anyhow!("Memory store lock poisoned")))
    }
}

#[async_trait]
impl NumberStore for MemoryStore {
    async fn latest_number(
        &self,
        kind: DocumentKind,
        year: i32,
    ) -> Result<Option<String>, StoreError> {
        let state = self.state()?;
        let latest = state.partition_numbers(kind, year).last().map(str::to_string);
        Ok(latest)
    }

    async fn number_exists(
        &self,
        kind: DocumentKind,
        number: &DocumentNumber,
    ) -> Result<bool, StoreError> {
        let state = self.state()?;
        let number = number.to_string();
        Ok(state
            .documents
            .iter()
            .any(|d| d.kind == kind && d.number == number))
    }
}

#[async_trait]
impl SequenceStore for MemoryStore {
    async fn next_sequence(&self, kind: DocumentKind, year: i32) -> Result<u32, StoreError> {
        let mut state = self.state()?;
        let current = match state.sequences.get(&(kind, year)) {
            Some(value) => *value,
            None => highest_sequence(kind, year, state.partition_numbers(kind, year))?,
        };
        let next = current
            .checked_add(1)
            .ok_or(StoreError::SequenceExhausted { kind, year })?;
        state.sequences.insert((kind, year), next);
        Ok(next)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.state().map(|_| ())
    }

    async fn create_client(&self, input: &NewClient) -> Result<Client, StoreError> {
        let mut state = self.state()?;
        let now = Utc::now();
        let client = Client {
            client_id: Uuid::new_v4(),
            name: input.name.clone(),
            email: input.email.clone(),
            phone: input.phone.clone(),
            address: input.address.clone(),
            tax_id: input.tax_id.clone(),
            notes: input.notes.clone(),
            created_utc: now,
            updated_utc: now,
        };
        state.clients.insert(client.client_id, client.clone());
        Ok(client)
    }

    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, StoreError> {
        Ok(self.state()?.clients.get(&client_id).cloned())
    }

    async fn list_clients(&self, filter: &ListClientsFilter) -> Result<Vec<Client>, StoreError> {
        let state = self.state()?;
        let search = filter.search.as_ref().map(|s| s.to_lowercase());
        let mut clients: Vec<Client> = state
            .clients
            .values()
            .filter(|c| match &search {
                Some(term) => c.name.to_lowercase().contains(term),
                None => true,
            })
            .cloned()
            .collect();
        clients.sort_by(|a, b| a.name.cmp(&b.name).then(a.client_id.cmp(&b.client_id)));
        Ok(clients
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect())
    }

    async fn update_client(
        &self,
        client_id: Uuid,
        changes: &ClientChanges,
    ) -> Result<Option<Client>, StoreError> {
        let mut state = self.state()?;
        let Some(client) = state.clients.get_mut(&client_id) else {
            return Ok(None);
        };
        if let Some(name) = &changes.name {
            client.name = name.clone();
        }
        if let Some(email) = &changes.email {
            client.email = Some(email.clone());
        }
        if let Some(phone) = &changes.phone {
            client.phone = Some(phone.clone());
        }
        if let Some(address) = &changes.address {
            client.address = Some(address.clone());
        }
        if let Some(tax_id) = &changes.tax_id {
            client.tax_id = Some(tax_id.clone());
        }
        if let Some(notes) = &changes.notes {
            client.notes = Some(notes.clone());
        }
        client.updated_utc = Utc::now();
        Ok(Some(client.clone()))
    }

    async fn delete_client(&self, client_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        if state.clients.remove(&client_id).is_none() {
            return Ok(false);
        }
        for document in state
            .documents
            .iter_mut()
            .filter(|d| d.client_id == Some(client_id))
        {
            document.client_id = None;
        }
        Ok(true)
    }

    async fn insert_document(&self, input: &NewDocument) -> Result<Document, StoreError> {
        let priced = Priced::of(input)?;
        self.state()?.insert(input, priced)
    }

    async fn get_document(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
    ) -> Result<Option<Document>, StoreError> {
        let state = self.state()?;
        Ok(state
            .documents
            .iter()
            .find(|d| d.document_id == document_id && d.kind == kind && d.deleted_utc.is_none())
            .cloned())
    }

    async fn list_documents(
        &self,
        filter: &ListDocumentsFilter,
    ) -> Result<Vec<Document>, StoreError> {
        let state = self.state()?;
        Ok(state
            .documents
            .iter()
            .rev()
            .filter(|d| d.kind == filter.kind && d.deleted_utc.is_none())
            .filter(|d| filter.status.map_or(true, |s| d.status == s))
            .filter(|d| filter.client_id.map_or(true, |id| d.client_id == Some(id)))
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .cloned()
            .collect())
    }

    async fn update_document(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
        editable: &[DocumentStatus],
        changes: &DocumentChanges,
    ) -> Result<Option<Document>, StoreError> {
        let mut state = self.state()?;
        let Some(document) = state.live_mut(kind, document_id) else {
            return Ok(None);
        };
        if !editable.contains(&document.status) {
            return Ok(None);
        }

        let repriced = if changes.touches_totals() {
            let items = changes
                .line_items
                .clone()
                .unwrap_or_else(|| document.line_item_inputs());
            let tax_rate = changes.tax_rate.unwrap_or(document.tax_rate);
            let line_items = changes
                .line_items
                .as_deref()
                .map(LineItemInput::to_line_items)
                .transpose()?;
            Some((Totals::compute(&items, tax_rate)?, tax_rate, line_items))
        } else {
            None
        };

        if let Some(client) = &changes.client {
            document.client = client.clone();
        }
        if let Some(due_date) = changes.due_date {
            document.due_date = Some(due_date);
        }
        if let Some(valid_until) = changes.valid_until {
            document.valid_until = Some(valid_until);
        }
        if let Some(notes) = &changes.notes {
            document.notes = Some(notes.clone());
        }
        if let Some((totals, tax_rate, line_items)) = repriced {
            document.totals = totals;
            document.tax_rate = tax_rate;
            if let Some(line_items) = line_items {
                document.line_items = line_items;
            }
        }
        document.updated_utc = Utc::now();
        Ok(Some(document.clone()))
    }

    async fn set_status(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
        from: &[DocumentStatus],
        to: DocumentStatus,
    ) -> Result<Option<Document>, StoreError> {
        let mut state = self.state()?;
        let Some(document) = state.live_mut(kind, document_id) else {
            return Ok(None);
        };
        if !from.contains(&document.status) {
            return Ok(None);
        }
        document.status = to;
        document.updated_utc = Utc::now();
        Ok(Some(document.clone()))
    }

    async fn soft_delete_document(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
        deletable: &[DocumentStatus],
    ) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let Some(document) = state.live_mut(kind, document_id) else {
            return Ok(false);
        };
        if !deletable.contains(&document.status) || document.amount_paid != Decimal::ZERO {
            return Ok(false);
        }
        let now = Utc::now();
        document.deleted_utc = Some(now);
        document.updated_utc = now;
        Ok(true)
    }

    async fn convert_quote(
        &self,
        quote_id: Uuid,
        convertible: &[DocumentStatus],
        invoice: &NewDocument,
    ) -> Result<Option<Document>, StoreError> {
        let priced = Priced::of(invoice)?;
        let mut state = self.state()?;
        match state.live_mut(DocumentKind::Quote, quote_id) {
            Some(quote) if convertible.contains(&quote.status) => {}
            _ => return Ok(None),
        }

        let created = state.insert(invoice, priced)?;

        if let Some(quote) = state.live_mut(DocumentKind::Quote, quote_id) {
            quote.status = QuoteStatus::Converted.into();
            quote.updated_utc = Utc::now();
        }
        Ok(Some(created))
    }

    async fn mark_overdue(&self, as_of: NaiveDate) -> Result<u64, StoreError> {
        let mut state = self.state()?;
        let now = Utc::now();
        let mut marked = 0;
        for document in state.documents.iter_mut().filter(|d| {
            d.deleted_utc.is_none()
                && d.status == DocumentStatus::Invoice(InvoiceStatus::Pending)
                && d.due_date.is_some_and(|due| due < as_of)
        }) {
            document.status = InvoiceStatus::Overdue.into();
            document.updated_utc = now;
            marked += 1;
        }
        Ok(marked)
    }

    async fn record_payment(
        &self,
        input: &NewPayment,
    ) -> Result<Option<(Payment, Document)>, StoreError> {
        let mut state = self.state()?;
        let Some(invoice) = state.live_mut(DocumentKind::Invoice, input.invoice_id) else {
            return Ok(None);
        };
        let accepts = invoice
            .invoice_status()
            .is_some_and(|s| s.accepts_payments());
        let amount_paid = match invoice.amount_paid.checked_add(input.amount) {
            Some(paid) if accepts && paid <= invoice.totals.total => paid,
            _ => return Ok(None),
        };

        let now = Utc::now();
        invoice.amount_paid = amount_paid;
        if amount_paid >= invoice.totals.total {
            invoice.status = InvoiceStatus::Paid.into();
        }
        invoice.updated_utc = now;
        let invoice = invoice.clone();

        let payment = Payment {
            payment_id: Uuid::new_v4(),
            invoice_id: input.invoice_id,
            amount: input.amount,
            method: input.method,
            reference: input.reference.clone(),
            paid_on: input.paid_on,
            notes: input.notes.clone(),
            created_utc: now,
        };
        state.payments.push(payment.clone());
        Ok(Some((payment, invoice)))
    }

    async fn list_payments(&self, invoice_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let state = self.state()?;
        let mut payments: Vec<Payment> = state
            .payments
            .iter()
            .filter(|p| p.invoice_id == invoice_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| (p.paid_on, p.created_utc));
        Ok(payments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClientSnapshot, PaymentMethod};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn new_document(number: &str, status: DocumentStatus) -> NewDocument {
        NewDocument {
            number: DocumentNumber::parse(number).unwrap(),
            status,
            client_id: None,
            client: ClientSnapshot {
                name: "Studio Rossi".to_string(),
                email: Some("info@studiorossi.it".to_string()),
                phone: None,
                address: None,
                tax_id: None,
            },
            issue_date: date(2026, 3, 1),
            due_date: Some(date(2026, 3, 31)),
            valid_until: None,
            tax_rate: dec("0.22"),
            notes: None,
            quote_id: None,
            line_items: vec![LineItemInput {
                description: "Landing page".to_string(),
                quantity: dec("1"),
                unit_price: dec("1000"),
            }],
        }
    }

    fn pending() -> DocumentStatus {
        InvoiceStatus::Pending.into()
    }

    #[tokio::test]
    async fn duplicate_number_violates_constraint() {
        let store = MemoryStore::new();
        store
            .insert_document(&new_document("FAT-2026-001", pending()))
            .await
            .unwrap();

        let err = store
            .insert_document(&new_document("FAT-2026-001", pending()))
            .await
            .unwrap_err();
        assert!(err.is_number_conflict());
    }

    #[tokio::test]
    async fn sequence_past_u32_is_exhausted_not_malformed() {
        let store = MemoryStore::new();
        store
            .insert_document(&new_document("FAT-2026-4294967295", pending()))
            .await
            .unwrap();

        let err = store
            .next_sequence(DocumentKind::Invoice, 2026)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::SequenceExhausted {
                kind: DocumentKind::Invoice,
                year: 2026
            }
        ));
        assert_eq!(store.next_sequence(DocumentKind::Invoice, 2027).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn overflowing_amounts_leave_the_store_usable() {
        let store = MemoryStore::new();
        let mut huge = new_document("FAT-2026-001", pending());
        huge.line_items[0].quantity = dec("79228162514264337593543950335");
        huge.line_items[0].unit_price = dec("2");

        let err = store.insert_document(&huge).await.unwrap_err();
        assert!(matches!(err, StoreError::AmountOverflow(_)));

        store.health_check().await.unwrap();
        let created = store
            .insert_document(&new_document("FAT-2026-001", pending()))
            .await
            .unwrap();
        assert_eq!(created.totals.total, dec("1220"));
    }

    #[tokio::test]
    async fn same_sequence_in_other_kind_is_allowed() {
        let store = MemoryStore::new();
        store
            .insert_document(&new_document("FAT-2026-001", pending()))
            .await
            .unwrap();
        store
            .insert_document(&new_document("ORC-2026-001", QuoteStatus::Draft.into()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn deleted_numbers_stay_taken() {
        let store = MemoryStore::new();
        let doc = store
            .insert_document(&new_document("FAT-2026-001", pending()))
            .await
            .unwrap();
        assert!(store
            .soft_delete_document(DocumentKind::Invoice, doc.document_id, &[pending()])
            .await
            .unwrap());

        let number = DocumentNumber::new(DocumentKind::Invoice, 2026, 1);
        assert!(store
            .number_exists(DocumentKind::Invoice, &number)
            .await
            .unwrap());
        assert_eq!(
            store
                .latest_number(DocumentKind::Invoice, 2026)
                .await
                .unwrap()
                .as_deref(),
            Some("FAT-2026-001")
        );
        assert!(store
            .get_document(DocumentKind::Invoice, doc.document_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn sequence_is_seeded_from_existing_numbers() {
        let store = MemoryStore::new();
        for number in ["FAT-2026-001", "FAT-2026-007", "FAT-2026-003"] {
            store
                .insert_document(&new_document(number, pending()))
                .await
                .unwrap();
        }

        assert_eq!(store.next_sequence(DocumentKind::Invoice, 2026).await.unwrap(), 8);
        assert_eq!(store.next_sequence(DocumentKind::Invoice, 2026).await.unwrap(), 9);
        assert_eq!(store.next_sequence(DocumentKind::Invoice, 2027).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn converting_twice_is_refused() {
        let store = MemoryStore::new();
        let quote = store
            .insert_document(&new_document("ORC-2026-001", QuoteStatus::Accepted.into()))
            .await
            .unwrap();
        let convertible: Vec<DocumentStatus> = vec![QuoteStatus::Accepted.into()];

        let mut invoice = new_document("FAT-2026-001", pending());
        invoice.quote_id = Some(quote.document_id);
        let created = store
            .convert_quote(quote.document_id, &convertible, &invoice)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.quote_id, Some(quote.document_id));

        let quote = store
            .get_document(DocumentKind::Quote, quote.document_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(quote.status, DocumentStatus::Quote(QuoteStatus::Converted));

        let mut second = new_document("FAT-2026-002", pending());
        second.quote_id = Some(quote.document_id);
        let again = store
            .convert_quote(quote.document_id, &convertible, &second)
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn failed_conversion_leaves_quote_untouched() {
        let store = MemoryStore::new();
        store
            .insert_document(&new_document("FAT-2026-001", pending()))
            .await
            .unwrap();
        let quote = store
            .insert_document(&new_document("ORC-2026-001", QuoteStatus::Sent.into()))
            .await
            .unwrap();

        let mut invoice = new_document("FAT-2026-001", pending());
        invoice.quote_id = Some(quote.document_id);
        let err = store
            .convert_quote(quote.document_id, &[QuoteStatus::Sent.into()], &invoice)
            .await
            .unwrap_err();
        assert!(err.is_number_conflict());

        let quote = store
            .get_document(DocumentKind::Quote, quote.document_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(quote.status, DocumentStatus::Quote(QuoteStatus::Sent));
    }

    #[tokio::test]
    async fn full_payment_marks_invoice_paid() {
        let store = MemoryStore::new();
        let invoice = store
            .insert_document(&new_document("FAT-2026-001", pending()))
            .await
            .unwrap();
        assert_eq!(invoice.totals.total, dec("1220"));

        let payment = |amount: &str| NewPayment {
            invoice_id: invoice.document_id,
            amount: dec(amount),
            method: PaymentMethod::BankTransfer,
            reference: None,
            paid_on: date(2026, 3, 10),
            notes: None,
        };

        let (_, partial) = store.record_payment(&payment("220")).await.unwrap().unwrap();
        assert_eq!(partial.status, pending());
        assert_eq!(partial.amount_due(), dec("1000"));

        assert!(store.record_payment(&payment("1000.01")).await.unwrap().is_none());

        let (_, paid) = store.record_payment(&payment("1000")).await.unwrap().unwrap();
        assert_eq!(paid.status, DocumentStatus::Invoice(InvoiceStatus::Paid));
        assert_eq!(
            store.list_payments(invoice.document_id).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn mark_overdue_only_touches_past_due_pending() {
        let store = MemoryStore::new();
        let mut late = new_document("FAT-2026-001", pending());
        late.due_date = Some(date(2026, 3, 31));
        let mut on_time = new_document("FAT-2026-002", pending());
        on_time.due_date = Some(date(2026, 4, 30));
        let mut no_due_date = new_document("FAT-2026-003", pending());
        no_due_date.due_date = None;
        for doc in [&late, &on_time, &no_due_date] {
            store.insert_document(doc).await.unwrap();
        }

        assert_eq!(store.mark_overdue(date(2026, 4, 1)).await.unwrap(), 1);
        assert_eq!(store.mark_overdue(date(2026, 4, 1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn deleting_client_keeps_document_snapshot() {
        let store = MemoryStore::new();
        let client = store
            .create_client(&NewClient {
                name: "Studio Rossi".to_string(),
                email: None,
                phone: None,
                address: None,
                tax_id: None,
                notes: None,
            })
            .await
            .unwrap();
        let mut input = new_document("FAT-2026-001", pending());
        input.client_id = Some(client.client_id);
        let doc = store.insert_document(&input).await.unwrap();

        assert!(store.delete_client(client.client_id).await.unwrap());

        let doc = store
            .get_document(DocumentKind::Invoice, doc.document_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.client_id, None);
        assert_eq!(doc.client.name, "Studio Rossi");
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.health_check().await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.latest_number(DocumentKind::Quote, 2026).await,
            Err(StoreError::Unavailable(_))
        ));

        store.set_unavailable(false);
        assert!(store.health_check().await.is_ok());
    }
}
