//! Line items and the totals derived from them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A line amount or total fell outside the `Decimal` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Document amounts exceed the supported range")]
pub struct AmountOverflow;

/// Line item on a quote or invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub line_item_id: Uuid,
    pub position: i32,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

/// Input for a line item.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItemInput {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl LineItemInput {
    pub fn amount(&self) -> Result<Decimal, AmountOverflow> {
        self.quantity
            .checked_mul(self.unit_price)
            .ok_or(AmountOverflow)
    }

    /// Materialize with a fresh id at the given position.
    pub fn to_line_item(&self, position: i32) -> Result<LineItem, AmountOverflow> {
        Ok(LineItem {
            line_item_id: Uuid::new_v4(),
            position,
            description: self.description.clone(),
            quantity: self.quantity,
            unit_price: self.unit_price,
            amount: self.amount()?,
        })
    }

    /// Materialize a whole list, positions following input order.
    pub fn to_line_items(items: &[LineItemInput]) -> Result<Vec<LineItem>, AmountOverflow> {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| item.to_line_item(i as i32))
            .collect()
    }
}

/// Monetary totals of a document.
///
/// `subtotal = Σ(quantity × unit_price)`, `tax_amount = subtotal × tax_rate`,
/// `total = subtotal + tax_amount`. Always written together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

impl Totals {
    pub fn compute(items: &[LineItemInput], tax_rate: Decimal) -> Result<Self, AmountOverflow> {
        let subtotal = items.iter().try_fold(Decimal::ZERO, |acc, item| {
            acc.checked_add(item.amount()?).ok_or(AmountOverflow)
        })?;
        Self::from_subtotal(subtotal, tax_rate)
    }

    fn from_subtotal(subtotal: Decimal, tax_rate: Decimal) -> Result<Self, AmountOverflow> {
        let tax_amount = subtotal.checked_mul(tax_rate).ok_or(AmountOverflow)?;
        let total = subtotal.checked_add(tax_amount).ok_or(AmountOverflow)?;
        Ok(Self {
            subtotal,
            tax_amount,
            total,
        })
    }
}
