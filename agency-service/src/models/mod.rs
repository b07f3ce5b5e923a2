//! Domain models for agency-service.

mod client;
mod document;
mod line_item;
mod payment;

pub use client::{Client, ClientChanges, ClientSnapshot, ListClientsFilter, NewClient};
pub use document::{
    ConvertQuote, CreateDocument, Document, DocumentChanges, DocumentKind, DocumentStatus,
    InvoiceStatus, ListDocumentsFilter, NewDocument, QuoteStatus,
};
pub use line_item::{AmountOverflow, LineItem, LineItemInput, Totals};
pub use payment::{NewPayment, Payment, PaymentMethod};
