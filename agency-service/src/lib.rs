//! agency-service: clients, quotes, invoices and payments for a small agency,
//! with sequential `ORC`/`FAT` document numbering.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod numbering;
pub mod services;
pub mod startup;
pub mod workers;

pub use startup::AppState;
