use super::{DocumentNumber, NumberAllocator, NumberingError, SequenceStore};
use crate::models::DocumentKind;
use async_trait::async_trait;
use std::sync::Arc;

/// Allocates from an atomic per-(kind, year) counter.
///
/// The store increments and returns the counter in one step, so concurrent
/// callers always receive distinct values and no retry loop is needed.
/// Values are never handed back, which leaves a gap whenever the following
/// insert fails.
pub struct SequenceAllocator {
    store: Arc<dyn SequenceStore>,
}

impl SequenceAllocator {
    pub fn new(store: Arc<dyn SequenceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NumberAllocator for SequenceAllocator {
    async fn allocate(
        &self,
        kind: DocumentKind,
        year: i32,
    ) -> Result<DocumentNumber, NumberingError> {
        let sequence = self.store.next_sequence(kind, year).await?;
        Ok(DocumentNumber::new(kind, year, sequence))
    }
}
