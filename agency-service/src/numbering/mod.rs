//! Document numbering for quotes and invoices.
//!
//! An allocator only computes a candidate number; the caller's insert is the
//! reservation, backed by the `(kind, number)` uniqueness constraint in the
//! store. Two strategies are provided:
//!
//! - [`SequenceAllocator`] reads and increments an atomic per-(kind, year)
//!   counter in one step.
//! - [`RetryingAllocator`] reads the latest number, checks the successor is
//!   free and retries on collision, for stores without a counter.

mod number;
mod retry;
mod sequence;

pub use number::DocumentNumber;
pub use retry::{RetryingAllocator, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
pub use sequence::SequenceAllocator;

use crate::models::DocumentKind;
use crate::services::StoreError;
use async_trait::async_trait;
use service_core::error::AppError;
use std::str::FromStr;
use thiserror::Error;

/// Numbering failures.
#[derive(Debug, Error)]
pub enum NumberingError {
    /// The store could not be read. Never retried by the allocator.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(anyhow::Error),

    /// Every attempt collided with an existing number.
    #[error("Could not allocate a unique {kind} number for {year} after {attempts} attempts")]
    AllocationExhausted {
        kind: DocumentKind,
        year: i32,
        attempts: u32,
    },

    /// A stored number does not have the `PREFIX-YEAR-SEQ` shape.
    #[error("Malformed document number: {0:?}")]
    MalformedNumber(String),

    /// The partition's sequence has reached `u32::MAX`.
    #[error("The {kind} sequence for {year} is exhausted")]
    SequenceExhausted { kind: DocumentKind, year: i32 },
}

impl From<StoreError> for NumberingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(e) => NumberingError::StorageUnavailable(e),
            StoreError::MalformedNumber(n) => NumberingError::MalformedNumber(n),
            StoreError::SequenceExhausted { kind, year } => {
                NumberingError::SequenceExhausted { kind, year }
            }
            other @ (StoreError::UniqueViolation { .. } | StoreError::AmountOverflow(_)) => {
                NumberingError::StorageUnavailable(anyhow::anyhow!(
                    "Unexpected store error while numbering: {}",
                    other
                ))
            }
        }
    }
}

impl From<NumberingError> for AppError {
    fn from(err: NumberingError) -> Self {
        match err {
            NumberingError::StorageUnavailable(e) => AppError::DatabaseError(e),
            NumberingError::AllocationExhausted { kind, .. } => AppError::Conflict(anyhow::anyhow!(
                "Could not allocate a unique {} number, please try again",
                kind
            )),
            NumberingError::MalformedNumber(n) => AppError::InternalError(anyhow::anyhow!(
                "Stored document number {:?} is malformed",
                n
            )),
            NumberingError::SequenceExhausted { kind, year } => AppError::Conflict(
                anyhow::anyhow!("No {} numbers are left for {}", kind, year),
            ),
        }
    }
}

/// Reads needed by the check-and-retry allocator.
#[async_trait]
pub trait NumberStore: Send + Sync {
    /// Number of the most recently created document of `kind` in `year`,
    /// deleted documents included.
    async fn latest_number(
        &self,
        kind: DocumentKind,
        year: i32,
    ) -> Result<Option<String>, StoreError>;

    /// Whether any document of `kind`, deleted or not, holds `number`.
    async fn number_exists(
        &self,
        kind: DocumentKind,
        number: &DocumentNumber,
    ) -> Result<bool, StoreError>;
}

/// Atomic per-(kind, year) counter.
#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Increment and return the counter for `(kind, year)`.
    ///
    /// A partition seen for the first time is seeded from the highest sequence
    /// already stored in it, so the counter can take over from existing data.
    async fn next_sequence(&self, kind: DocumentKind, year: i32) -> Result<u32, StoreError>;
}

/// Produces candidate document numbers.
#[async_trait]
pub trait NumberAllocator: Send + Sync {
    async fn allocate(
        &self,
        kind: DocumentKind,
        year: i32,
    ) -> Result<DocumentNumber, NumberingError>;
}

/// Which allocator the service runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberingStrategy {
    Sequence,
    Retry,
}

impl NumberingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            NumberingStrategy::Sequence => "sequence",
            NumberingStrategy::Retry => "retry",
        }
    }
}

impl FromStr for NumberingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequence" => Ok(NumberingStrategy::Sequence),
            "retry" => Ok(NumberingStrategy::Retry),
            _ => Err(format!("Invalid numbering strategy: {}", s)),
        }
    }
}

/// Highest sequence among `numbers` for a partition, failing on any number
/// that does not parse.
pub(crate) fn highest_sequence<'a>(
    kind: DocumentKind,
    year: i32,
    numbers: impl IntoIterator<Item = &'a str>,
) -> Result<u32, StoreError> {
    numbers.into_iter().try_fold(0, |max, raw| {
        let number = DocumentNumber::parse_in(kind, year, raw)
            .map_err(|_| StoreError::MalformedNumber(raw.to_string()))?;
        Ok(max.max(number.sequence()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_sequence_of_partition() {
        let numbers = ["FAT-2026-001", "FAT-2026-012", "FAT-2026-004"];
        assert_eq!(
            highest_sequence(DocumentKind::Invoice, 2026, numbers).unwrap(),
            12
        );
        assert_eq!(
            highest_sequence(DocumentKind::Invoice, 2026, std::iter::empty()).unwrap(),
            0
        );
    }

    #[test]
    fn highest_sequence_rejects_malformed() {
        let result = highest_sequence(DocumentKind::Invoice, 2026, ["FAT-2026-001", "FAT-2026-x"]);
        assert!(matches!(result, Err(StoreError::MalformedNumber(n)) if n == "FAT-2026-x"));
    }

    #[test]
    fn exhaustion_maps_to_conflict() {
        let err: AppError = NumberingError::AllocationExhausted {
            kind: DocumentKind::Invoice,
            year: 2026,
            attempts: 10,
        }
        .into();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn sequence_exhaustion_survives_the_store_boundary() {
        let err: NumberingError = StoreError::SequenceExhausted {
            kind: DocumentKind::Quote,
            year: 2026,
        }
        .into();
        assert!(matches!(
            err,
            NumberingError::SequenceExhausted {
                kind: DocumentKind::Quote,
                year: 2026
            }
        ));
        assert!(matches!(AppError::from(err), AppError::Conflict(_)));
    }

    #[test]
    fn storage_failure_maps_to_database_error() {
        let err: AppError = NumberingError::StorageUnavailable(anyhow::anyhow!("down")).into();
        assert!(matches!(err, AppError::DatabaseError(_)));
    }

    #[test]
    fn strategy_parses_case_insensitively() {
        assert_eq!(
            "Sequence".parse::<NumberingStrategy>(),
            Ok(NumberingStrategy::Sequence)
        );
        assert_eq!(
            "retry".parse::<NumberingStrategy>(),
            Ok(NumberingStrategy::Retry)
        );
        assert!("lock".parse::<NumberingStrategy>().is_err());
    }
}
