//! Validation utilities for ledger quantities

use rust_decimal::Decimal;

/// Decimal places stored for every quantity (`NUMERIC(12, 2)`)
pub const QUANTITY_SCALE: u32 = 2;

/// Integer digits available to a stored quantity
const QUANTITY_INTEGER_DIGITS: u32 = 10;

// ============================================================================
// Quantity Validations
// ============================================================================

/// Validate that a quantity fits the stored precision.
///
/// Trailing zeros are ignored, so `1.500` is accepted as `1.50`.
pub fn validate_quantity_precision(quantity: Decimal) -> Result<(), &'static str> {
    if quantity.normalize().scale() > QUANTITY_SCALE {
        return Err("Quantity cannot have more than 2 decimal places");
    }
    let limit = Decimal::from(10u64.pow(QUANTITY_INTEGER_DIGITS));
    if quantity.abs() >= limit {
        return Err("Quantity is too large");
    }
    Ok(())
}

/// Validate a quantity that must be strictly positive (receipts, consumptions)
pub fn validate_positive_quantity(quantity: Decimal) -> Result<(), &'static str> {
    if quantity <= Decimal::ZERO {
        return Err("Quantity must be positive");
    }
    validate_quantity_precision(quantity)
}

/// Validate a physical count: zero is a valid count, negative stock is not
pub fn validate_physical_count(quantity: Decimal) -> Result<(), &'static str> {
    if quantity < Decimal::ZERO {
        return Err("Physical count cannot be negative");
    }
    validate_quantity_precision(quantity)
}

/// Amount an automatic consumption may draw from a balance: never more than
/// requested and never below zero.
pub fn cascade_take(remaining: Decimal, balance: Decimal) -> Decimal {
    remaining.min(balance.max(Decimal::ZERO)).max(Decimal::ZERO)
}

// ============================================================================
// Tests
// ============================================================================
