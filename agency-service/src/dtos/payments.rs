use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use super::{derived_errors, field_error, into_result, DocumentResponse};
use crate::models::{NewPayment, Payment, PaymentMethod};

/// Body of `POST /api/invoices/:id/payments`.
#[derive(Debug, Deserialize, Validate)]
pub struct RecordPaymentRequest {
    pub amount: Decimal,
    pub method: PaymentMethod,
    #[validate(length(max = 200))]
    pub reference: Option<String>,
    /// Defaults to today.
    pub paid_on: Option<NaiveDate>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

impl RecordPaymentRequest {
    pub fn validate_request(&self) -> Result<(), ValidationErrors> {
        let mut errors = derived_errors(self.validate());
        if self.amount <= Decimal::ZERO {
            field_error(
                &mut errors,
                "amount",
                "range",
                "Payment amount must be positive",
            );
        }
        into_result(errors)
    }

    pub fn into_payment(self, invoice_id: Uuid, today: NaiveDate) -> NewPayment {
        NewPayment {
            invoice_id,
            amount: self.amount,
            method: self.method,
            reference: self.reference,
            paid_on: self.paid_on.unwrap_or(today),
            notes: self.notes,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub paid_on: NaiveDate,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            payment_id: payment.payment_id,
            invoice_id: payment.invoice_id,
            amount: payment.amount,
            method: payment.method,
            reference: payment.reference,
            paid_on: payment.paid_on,
            notes: payment.notes,
            created_utc: payment.created_utc,
        }
    }
}

/// The payment and the invoice as it stands after it.
#[derive(Debug, Serialize)]
pub struct PaymentRecordedResponse {
    pub payment: PaymentResponse,
    pub invoice: DocumentResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_amount_is_rejected() {
        let req = RecordPaymentRequest {
            amount: Decimal::ZERO,
            method: PaymentMethod::BankTransfer,
            reference: None,
            paid_on: None,
            notes: None,
        };
        let errors = req.validate_request().unwrap_err();
        assert!(errors.field_errors().contains_key("amount"));
    }

    #[test]
    fn paid_on_defaults_to_today() {
        let today = NaiveDate::from_ymd_opt(2026, 5, 4).unwrap();
        let req = RecordPaymentRequest {
            amount: Decimal::new(5000, 2),
            method: PaymentMethod::Card,
            reference: Some("ch_123".to_string()),
            paid_on: None,
            notes: None,
        };
        let payment = req.into_payment(Uuid::new_v4(), today);
        assert_eq!(payment.paid_on, today);
        assert_eq!(payment.amount, Decimal::new(50, 0));
    }
}
