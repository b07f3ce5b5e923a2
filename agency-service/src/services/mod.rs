//! Services module for agency-service.

pub mod clock;
pub mod database;
pub mod documents;
pub mod memory;
pub mod metrics;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use database::PgStore;
pub use documents::DocumentService;
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use store::{DocumentStore, StoreError, NUMBER_CONSTRAINT, QUOTE_LINK_CONSTRAINT};
