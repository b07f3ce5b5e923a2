//! HTTP handlers for agency-service.

pub mod clients;
pub mod health;
pub mod invoices;
pub mod numbers;
pub mod quotes;
