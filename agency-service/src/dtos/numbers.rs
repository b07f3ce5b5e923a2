use serde::{Deserialize, Serialize};

use crate::models::DocumentKind;
use crate::numbering::DocumentNumber;

/// Body of `POST /api/numbers`.
#[derive(Debug, Deserialize)]
pub struct NumberRequest {
    pub kind: DocumentKind,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NumberResponse {
    pub number: String,
}

impl From<DocumentNumber> for NumberResponse {
    fn from(number: DocumentNumber) -> Self {
        Self {
            number: number.to_string(),
        }
    }
}
