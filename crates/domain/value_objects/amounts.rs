use rust_decimal::{Decimal, prelude::ToPrimitive};
use thiserror::Error;

/// Fractional digits stored for every ledger amount.
pub const AMOUNT_SCALE: u32 = 2;

/// Upper bound (exclusive) of a `numeric(10, 2)` column.
pub const MAX_AMOUNT_EXCLUSIVE: Decimal = Decimal::from_parts(100_000_000, 0, 0, false, 0);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount must be greater than zero")]
    NotPositive,
    #[error("amount must have at most {} decimal places", AMOUNT_SCALE)]
    TooPrecise,
    #[error("amount must be less than {}", MAX_AMOUNT_EXCLUSIVE)]
    TooLarge,
    #[error("amount {0} cannot be expressed in minor units")]
    NotConvertible(Decimal),
}

/// Checks a caller-supplied amount and returns it rescaled to two places.
pub fn validate_amount(amount: Decimal) -> Result<Decimal, AmountError> {
    if amount <= Decimal::ZERO {
        return Err(AmountError::NotPositive);
    }
    if amount.normalize().scale() > AMOUNT_SCALE {
        return Err(AmountError::TooPrecise);
    }
    if amount >= MAX_AMOUNT_EXCLUSIVE {
        return Err(AmountError::TooLarge);
    }

    let mut amount = amount;
    amount.rescale(AMOUNT_SCALE);
    Ok(amount)
}

/// Converts currency units to minor units (x100). Fails on fractions of a
/// minor unit, non-positive values and overflow.
pub fn to_minor_units(amount: Decimal) -> Result<u64, AmountError> {
    let minor = amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .ok_or(AmountError::NotConvertible(amount))?;

    if minor <= Decimal::ZERO || !minor.fract().is_zero() {
        return Err(AmountError::NotConvertible(amount));
    }

    minor.to_u64().ok_or(AmountError::NotConvertible(amount))
}
