//! Quote and invoice documents.

use super::{AmountOverflow, ClientSnapshot, LineItem, LineItemInput, Totals};
use crate::numbering::DocumentNumber;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Document kind. Each kind is its own numbering partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Quote,
    Invoice,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Quote => "quote",
            DocumentKind::Invoice => "invoice",
        }
    }

    /// Number prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentKind::Quote => "ORC",
            DocumentKind::Invoice => "FAT",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "ORC" => Some(DocumentKind::Quote),
            "FAT" => Some(DocumentKind::Invoice),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quote" => Ok(DocumentKind::Quote),
            "invoice" => Ok(DocumentKind::Invoice),
            _ => Err(format!("Invalid document kind: {}", s)),
        }
    }
}

/// Quote status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Draft,
    Sent,
    Accepted,
    Declined,
    Converted,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Draft => "draft",
            QuoteStatus::Sent => "sent",
            QuoteStatus::Accepted => "accepted",
            QuoteStatus::Declined => "declined",
            QuoteStatus::Converted => "converted",
        }
    }

    /// Transitions reachable through an explicit status change.
    ///
    /// `Converted` is only ever reached by creating an invoice from the quote.
    pub fn can_transition_to(&self, next: QuoteStatus) -> bool {
        matches!(
            (self, next),
            (QuoteStatus::Draft, QuoteStatus::Sent)
                | (QuoteStatus::Draft, QuoteStatus::Declined)
                | (QuoteStatus::Sent, QuoteStatus::Accepted)
                | (QuoteStatus::Sent, QuoteStatus::Declined)
        )
    }

    pub fn is_convertible(&self) -> bool {
        matches!(
            self,
            QuoteStatus::Draft | QuoteStatus::Sent | QuoteStatus::Accepted
        )
    }
}

impl FromStr for QuoteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(QuoteStatus::Draft),
            "sent" => Ok(QuoteStatus::Sent),
            "accepted" => Ok(QuoteStatus::Accepted),
            "declined" => Ok(QuoteStatus::Declined),
            "converted" => Ok(QuoteStatus::Converted),
            _ => Err(format!("Invalid quote status: {}", s)),
        }
    }
}

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Overdue,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
        }
    }

    pub fn accepts_payments(&self) -> bool {
        matches!(self, InvoiceStatus::Pending | InvoiceStatus::Overdue)
    }
}

impl FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvoiceStatus::Pending),
            "paid" => Ok(InvoiceStatus::Paid),
            "overdue" => Ok(InvoiceStatus::Overdue),
            _ => Err(format!("Invalid invoice status: {}", s)),
        }
    }
}

/// Status of either document kind. Serializes as the bare status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentStatus {
    Quote(QuoteStatus),
    Invoice(InvoiceStatus),
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Quote(s) => s.as_str(),
            DocumentStatus::Invoice(s) => s.as_str(),
        }
    }

    pub fn kind(&self) -> DocumentKind {
        match self {
            DocumentStatus::Quote(_) => DocumentKind::Quote,
            DocumentStatus::Invoice(_) => DocumentKind::Invoice,
        }
    }

    /// Parse a stored status string for the given kind.
    pub fn parse(kind: DocumentKind, s: &str) -> Result<Self, String> {
        match kind {
            DocumentKind::Quote => s.parse().map(DocumentStatus::Quote),
            DocumentKind::Invoice => s.parse().map(DocumentStatus::Invoice),
        }
    }
}

impl From<QuoteStatus> for DocumentStatus {
    fn from(status: QuoteStatus) -> Self {
        DocumentStatus::Quote(status)
    }
}

impl From<InvoiceStatus> for DocumentStatus {
    fn from(status: InvoiceStatus) -> Self {
        DocumentStatus::Invoice(status)
    }
}

/// A quote or an invoice with its line items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
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
    pub notes: Option<String>,
    pub quote_id: Option<Uuid>,
    pub line_items: Vec<LineItem>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub deleted_utc: Option<DateTime<Utc>>,
}

impl Document {
    pub fn quote_status(&self) -> Option<QuoteStatus> {
        match self.status {
            DocumentStatus::Quote(s) => Some(s),
            DocumentStatus::Invoice(_) => None,
        }
    }

    pub fn invoice_status(&self) -> Option<InvoiceStatus> {
        match self.status {
            DocumentStatus::Invoice(s) => Some(s),
            DocumentStatus::Quote(_) => None,
        }
    }

    pub fn amount_due(&self) -> Decimal {
        self.totals.total - self.amount_paid
    }

    /// Line items as inputs, for copying into a new document.
    pub fn line_item_inputs(&self) -> Vec<LineItemInput> {
        self.line_items
            .iter()
            .map(|item| LineItemInput {
                description: item.description.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect()
    }
}

/// Input for creating a quote or an invoice.
///
/// The client comes from `client_id`, from the inline snapshot, or from the
/// client record overridden by the inline snapshot when both are given.
#[derive(Debug, Clone, Default)]
pub struct CreateDocument {
    pub client_id: Option<Uuid>,
    pub client: Option<ClientSnapshot>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub tax_rate: Decimal,
    pub notes: Option<String>,
    pub line_items: Vec<LineItemInput>,
}

/// Input for converting a quote into an invoice.
#[derive(Debug, Clone, Default)]
pub struct ConvertQuote {
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
}

/// A fully resolved document ready to be inserted under `number`.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub number: DocumentNumber,
    pub status: DocumentStatus,
    pub client_id: Option<Uuid>,
    pub client: ClientSnapshot,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub tax_rate: Decimal,
    pub notes: Option<String>,
    pub quote_id: Option<Uuid>,
    pub line_items: Vec<LineItemInput>,
}

impl NewDocument {
    pub fn kind(&self) -> DocumentKind {
        self.number.kind()
    }

    pub fn totals(&self) -> Result<Totals, AmountOverflow> {
        Totals::compute(&self.line_items, self.tax_rate)
    }
}

/// Changes to an editable document. `None` leaves a field untouched.
///
/// When `line_items` or `tax_rate` is set, stores recompute all totals in the
/// same write.
#[derive(Debug, Clone, Default)]
pub struct DocumentChanges {
    pub client: Option<ClientSnapshot>,
    pub due_date: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub tax_rate: Option<Decimal>,
    pub notes: Option<String>,
    pub line_items: Option<Vec<LineItemInput>>,
}

impl DocumentChanges {
    pub fn touches_totals(&self) -> bool {
        self.tax_rate.is_some() || self.line_items.is_some()
    }
}

/// Filter parameters for listing documents.
#[derive(Debug, Clone)]
pub struct ListDocumentsFilter {
    pub kind: DocumentKind,
    pub status: Option<DocumentStatus>,
    pub client_id: Option<Uuid>,
    pub page: u32,
    pub page_size: u32,
}

impl ListDocumentsFilter {
    pub fn new(kind: DocumentKind) -> Self {
        Self {
            kind,
            status: None,
            client_id: None,
            page: 1,
            page_size: 20,
        }
    }

    pub fn limit(&self) -> i64 {
        self.page_size.clamp(1, 100) as i64
    }

    pub fn offset(&self) -> i64 {
        (self.page.max(1) as i64 - 1) * self.limit()
    }
}
