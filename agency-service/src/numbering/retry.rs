//! Check-and-retry allocator.

use super::{DocumentNumber, NumberAllocator, NumberStore, NumberingError};
use crate::models::DocumentKind;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Attempts before giving up with [`NumberingError::AllocationExhausted`].
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Pause between attempts, to de-correlate competing callers.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Allocates by reading the latest number of the partition and checking that
/// its successor is still free.
///
/// Each attempt is two sequential store reads. The check and the caller's
/// insert are separate operations, so a rival can still take the candidate in
/// between; only the store's uniqueness constraint closes that window.
pub struct RetryingAllocator {
    store: Arc<dyn NumberStore>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl RetryingAllocator {
    pub fn new(store: Arc<dyn NumberStore>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    async fn candidate(
        &self,
        kind: DocumentKind,
        year: i32,
    ) -> Result<DocumentNumber, NumberingError> {
        match self.store.latest_number(kind, year).await? {
            Some(last) => DocumentNumber::parse_in(kind, year, &last)?.successor(),
            None => Ok(DocumentNumber::new(kind, year, 1)),
        }
    }
}

#[async_trait]
impl NumberAllocator for RetryingAllocator {
    async fn allocate(
        &self,
        kind: DocumentKind,
        year: i32,
    ) -> Result<DocumentNumber, NumberingError> {
        for attempt in 1..=self.max_attempts {
            let candidate = self.candidate(kind, year).await?;

            if !self.store.number_exists(kind, &candidate).await? {
                return Ok(candidate);
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(NumberingError::AllocationExhausted {
            kind,
            year,
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Number store scripted for allocator tests.
    ///
    /// `steal_on_check` simulates rivals: while positive, every existence check
    /// finds the candidate taken and records it as the newest number.
    #[derive(Default)]
    struct ScriptedStore {
        numbers: Mutex<Vec<String>>,
        steal_on_check: AtomicU32,
        fail_reads: bool,
        latest_calls: AtomicU32,
        check_calls: AtomicU32,
    }

    impl ScriptedStore {
        fn with_numbers(numbers: &[&str]) -> Self {
            Self {
                numbers: Mutex::new(numbers.iter().map(|n| n.to_string()).collect()),
                ..Default::default()
            }
        }

        fn push(&self, number: &DocumentNumber) {
            self.numbers.lock().unwrap().push(number.to_string());
        }
    }

    #[async_trait]
    impl NumberStore for ScriptedStore {
        async fn latest_number(
            &self,
            kind: DocumentKind,
            year: i32,
        ) -> Result<Option<String>, StoreError> {
            self.latest_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads {
                return Err(StoreError::Unavailable(anyhow::anyhow!("connection reset")));
            }
            let prefix = format!("{}-{:04}-", kind.prefix(), year);
            Ok(self
                .numbers
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|n| n.starts_with(&prefix))
                .cloned())
        }

        async fn number_exists(
            &self,
            _kind: DocumentKind,
            number: &DocumentNumber,
        ) -> Result<bool, StoreError> {
            self.check_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.steal_on_check.load(Ordering::SeqCst);
            if remaining > 0 {
                self.steal_on_check.store(remaining - 1, Ordering::SeqCst);
                self.push(number);
                return Ok(true);
            }
            let rendered = number.to_string();
            Ok(self.numbers.lock().unwrap().iter().any(|n| *n == rendered))
        }
    }

    fn allocator(store: Arc<ScriptedStore>) -> RetryingAllocator {
        RetryingAllocator::new(store).with_retry_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn first_invoice_of_year_is_001() {
        let store = Arc::new(ScriptedStore::default());
        let number = allocator(store)
            .allocate(DocumentKind::Invoice, 2026)
            .await
            .unwrap();
        assert_eq!(number.to_string(), "FAT-2026-001");
    }

    #[tokio::test]
    async fn sequential_allocations_have_no_gaps() {
        let store = Arc::new(ScriptedStore::default());
        let allocator = allocator(store.clone());

        let mut issued = Vec::new();
        for _ in 0..12 {
            let number = allocator
                .allocate(DocumentKind::Invoice, 2026)
                .await
                .unwrap();
            store.push(&number);
            issued.push(number.sequence());
        }

        assert_eq!(issued, (1..=12).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn continues_after_existing_quote() {
        let store = Arc::new(ScriptedStore::with_numbers(&["ORC-2026-008", "ORC-2026-009"]));
        let number = allocator(store)
            .allocate(DocumentKind::Quote, 2026)
            .await
            .unwrap();
        assert_eq!(number.to_string(), "ORC-2026-010");
    }

    #[tokio::test]
    async fn new_year_restarts_at_one() {
        let store = Arc::new(ScriptedStore::with_numbers(&[
            "FAT-2026-001",
            "FAT-2026-002",
            "FAT-2026-003",
        ]));
        let number = allocator(store)
            .allocate(DocumentKind::Invoice, 2027)
            .await
            .unwrap();
        assert_eq!(number.to_string(), "FAT-2027-001");
    }

    #[tokio::test]
    async fn kinds_are_separate_partitions() {
        let store = Arc::new(ScriptedStore::with_numbers(&["FAT-2026-005"]));
        let number = allocator(store)
            .allocate(DocumentKind::Quote, 2026)
            .await
            .unwrap();
        assert_eq!(number.to_string(), "ORC-2026-001");
    }

    #[tokio::test]
    async fn collision_retries_with_a_different_number() {
        let store = Arc::new(ScriptedStore::default());
        store.steal_on_check.store(1, Ordering::SeqCst);

        let number = allocator(store.clone())
            .allocate(DocumentKind::Invoice, 2026)
            .await
            .unwrap();

        assert_eq!(number.to_string(), "FAT-2026-002");
        assert_eq!(store.latest_calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.check_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ten_collisions_exhaust_the_budget() {
        let store = Arc::new(ScriptedStore::default());
        store.steal_on_check.store(u32::MAX, Ordering::SeqCst);

        let result = allocator(store.clone())
            .allocate(DocumentKind::Invoice, 2026)
            .await;

        assert!(matches!(
            result,
            Err(NumberingError::AllocationExhausted {
                kind: DocumentKind::Invoice,
                year: 2026,
                attempts: 10
            })
        ));
        assert_eq!(store.latest_calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn nine_collisions_still_succeed() {
        let store = Arc::new(ScriptedStore::default());
        store.steal_on_check.store(9, Ordering::SeqCst);

        let number = allocator(store)
            .allocate(DocumentKind::Invoice, 2026)
            .await
            .unwrap();
        assert_eq!(number.to_string(), "FAT-2026-010");
    }

    #[tokio::test]
    async fn taken_successor_that_never_becomes_latest_exhausts() {
        // FAT-2026-002 was created before FAT-2026-001, so the latest row keeps
        // pointing at a successor that is already taken.
        let store = Arc::new(ScriptedStore::with_numbers(&["FAT-2026-002", "FAT-2026-001"]));

        let result = allocator(store)
            .with_max_attempts(3)
            .allocate(DocumentKind::Invoice, 2026)
            .await;

        assert!(matches!(
            result,
            Err(NumberingError::AllocationExhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn storage_failure_is_not_retried() {
        let store = Arc::new(ScriptedStore {
            fail_reads: true,
            ..Default::default()
        });

        let result = allocator(store.clone())
            .allocate(DocumentKind::Quote, 2026)
            .await;

        assert!(matches!(result, Err(NumberingError::StorageUnavailable(_))));
        assert_eq!(store.latest_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.check_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_latest_number_is_an_error() {
        let store = Arc::new(ScriptedStore::with_numbers(&["FAT-2026-ABC"]));

        let result = allocator(store)
            .allocate(DocumentKind::Invoice, 2026)
            .await;

        assert!(matches!(result, Err(NumberingError::MalformedNumber(n)) if n == "FAT-2026-ABC"));
    }

    #[tokio::test]
    async fn sequence_widens_past_999() {
        let store = Arc::new(ScriptedStore::with_numbers(&["FAT-2026-999"]));
        let number = allocator(store)
            .allocate(DocumentKind::Invoice, 2026)
            .await
            .unwrap();
        assert_eq!(number.to_string(), "FAT-2026-1000");
    }
}
