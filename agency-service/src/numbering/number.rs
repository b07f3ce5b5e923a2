//! The `PREFIX-YEAR-SEQ` document number.

use super::NumberingError;
use crate::models::DocumentKind;
use serde::{Serialize, Serializer};
use std::fmt;

/// Human-readable document number, e.g. `FAT-2026-003`.
///
/// The sequence is zero-padded to at least three digits and grows wider
/// without truncation past 999.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentNumber {
    kind: DocumentKind,
    year: i32,
    sequence: u32,
}

impl DocumentNumber {
    pub fn new(kind: DocumentKind, year: i32, sequence: u32) -> Self {
        Self {
            kind,
            year,
            sequence,
        }
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// The number that follows this one in the same partition.
    pub fn successor(&self) -> Result<Self, NumberingError> {
        let sequence = self
            .sequence
            .checked_add(1)
            .ok_or(NumberingError::SequenceExhausted {
                kind: self.kind,
                year: self.year,
            })?;
        Ok(Self::new(self.kind, self.year, sequence))
    }

    /// `LIKE` pattern matching every number of a (kind, year) partition.
    pub fn partition_pattern(kind: DocumentKind, year: i32) -> String {
        format!("{}-{:04}-%", kind.prefix(), year)
    }

    /// Parse a stored number. Anything that is not exactly
    /// `PREFIX-YYYY-DIGITS` with a known prefix is rejected.
    pub fn parse(s: &str) -> Result<Self, NumberingError> {
        let malformed = || NumberingError::MalformedNumber(s.to_string());

        let mut parts = s.split('-');
        let (Some(prefix), Some(year), Some(sequence), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };

        let kind = DocumentKind::from_prefix(prefix).ok_or_else(malformed)?;

        if year.len() != 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let year: i32 = year.parse().map_err(|_| malformed())?;

        if sequence.is_empty() || !sequence.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let sequence: u32 = sequence.parse().map_err(|_| malformed())?;
        if sequence == 0 {
            return Err(malformed());
        }

        Ok(Self::new(kind, year, sequence))
    }

    /// Parse a number that must belong to the given partition.
    pub fn parse_in(kind: DocumentKind, year: i32, s: &str) -> Result<Self, NumberingError> {
        let number = Self::parse(s)?;
        if number.kind != kind || number.year != year {
            return Err(NumberingError::MalformedNumber(s.to_string()));
        }
        Ok(number)
    }
}

impl fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:04}-{:03}",
            self.kind.prefix(),
            self.year,
            self.sequence
        )
    }
}

impl Serialize for DocumentNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_three_digit_padding() {
        let number = DocumentNumber::new(DocumentKind::Invoice, 2026, 3);
        assert_eq!(number.to_string(), "FAT-2026-003");

        let number = DocumentNumber::new(DocumentKind::Quote, 2026, 42);
        assert_eq!(number.to_string(), "ORC-2026-042");
    }

    #[test]
    fn widens_past_three_digits() {
        let number = DocumentNumber::new(DocumentKind::Invoice, 2026, 1000);
        assert_eq!(number.to_string(), "FAT-2026-1000");
        assert_eq!(DocumentNumber::parse("FAT-2026-1000").unwrap().sequence(), 1000);
    }

    #[test]
    fn parses_well_formed_numbers() {
        let number = DocumentNumber::parse("ORC-2026-009").unwrap();
        assert_eq!(number.kind(), DocumentKind::Quote);
        assert_eq!(number.year(), 2026);
        assert_eq!(number.sequence(), 9);
        assert_eq!(number.successor().unwrap().to_string(), "ORC-2026-010");
    }

    #[test]
    fn rejects_malformed_numbers() {
        for bad in [
            "",
            "FAT-2026",
            "FAT-2026-ABC",
            "FAT-2026-",
            "FAT-26-001",
            "XYZ-2026-001",
            "FAT-2026-001-2",
            "FAT-2026-000",
            "FAT-2026--01",
            "FAT-2026-99999999999",
        ] {
            assert!(
                matches!(
                    DocumentNumber::parse(bad),
                    Err(NumberingError::MalformedNumber(_))
                ),
                "expected {:?} to be rejected",
                bad
            );
        }
    }

    #[test]
    fn last_sequence_has_no_successor() {
        let number = DocumentNumber::new(DocumentKind::Quote, 2026, u32::MAX);
        assert!(matches!(
            number.successor(),
            Err(NumberingError::SequenceExhausted {
                kind: DocumentKind::Quote,
                year: 2026
            })
        ));
    }

    #[test]
    fn parse_in_checks_partition() {
        assert!(DocumentNumber::parse_in(DocumentKind::Invoice, 2026, "FAT-2026-001").is_ok());
        assert!(DocumentNumber::parse_in(DocumentKind::Invoice, 2025, "FAT-2026-001").is_err());
        assert!(DocumentNumber::parse_in(DocumentKind::Quote, 2026, "FAT-2026-001").is_err());
    }

    #[test]
    fn partition_pattern_matches_prefix_and_year() {
        assert_eq!(
            DocumentNumber::partition_pattern(DocumentKind::Quote, 2027),
            "ORC-2027-%"
        );
    }

    #[test]
    fn serializes_as_string() {
        let number = DocumentNumber::new(DocumentKind::Invoice, 2026, 1);
        assert_eq!(serde_json::to_string(&number).unwrap(), "\"FAT-2026-001\"");
    }
}
