use crate::state::CoreError;
use anchor_lang::prelude::*;

/// Multiply then divide signed fixed-point values, rounding the quotient
/// toward positive infinity.
///
/// This is the ledger-favoring rounding rule used on the whole debt path:
/// a positive debt amount charges accounts at least the distributed value
/// and a negative amount (a credit) refunds at most it, so the rounding
/// remainder always stays with the ledger.
///
/// `divisor` must be positive.
pub fn mul_div_ceil(value: i128, numerator: i128, divisor: i128) -> Result<i128> {
    require!(divisor > 0, CoreError::InvalidParameters);
    let product = value
        .checked_mul(numerator)
        .ok_or(CoreError::MathOverflow)?;
    let quotient = product.div_euclid(divisor);
    if product.rem_euclid(divisor) != 0 {
        quotient.checked_add(1).ok_or_else(|| error!(CoreError::MathOverflow))
    } else {
        Ok(quotient)
    }
}

/// Multiply then divide, rounding toward negative infinity. Used for
/// capacity bounds, where under-estimating is the conservative direction.
pub fn mul_div_floor(value: i128, numerator: i128, divisor: i128) -> Result<i128> {
    require!(divisor > 0, CoreError::InvalidParameters);
    let product = value
        .checked_mul(numerator)
        .ok_or(CoreError::MathOverflow)?;
    Ok(product.div_euclid(divisor))
}

/// Unsigned multiply-then-divide, rounding up. Used for share burns so a
/// withdrawal can never leave shares with no collateral behind them.
pub fn mul_div_ceil_u128(value: u128, numerator: u128, divisor: u128) -> Result<u128> {
    require!(divisor > 0, CoreError::InvalidParameters);
    let product = value
        .checked_mul(numerator)
        .ok_or(CoreError::MathOverflow)?;
    let quotient = product / divisor;
    if product % divisor != 0 {
        quotient.checked_add(1).ok_or_else(|| error!(CoreError::MathOverflow))
    } else {
        Ok(quotient)
    }
}
