//! DECIMAL conversions.
//!
//! The engine stores decimals as a 128-bit unscaled integer with a fixed
//! precision and scale. Rescaling only ever adds zeros; a value that would
//! need rounding or that needs more digits than the precision allows is an
//! error.

use crate::error::{DriverError, DriverResult};
use rust_decimal::Decimal;

fn pow10(exp: u32) -> Option<i128> {
    10i128.checked_pow(exp)
}

/// Encode `value` as an unscaled integer at `scale`, checked against `precision`.
pub fn to_unscaled(value: &Decimal, precision: u8, scale: u8) -> DriverResult<i128> {
    let target = u32::from(scale);
    let mut value = *value;
    if value.scale() > target {
        value = value.normalize();
        if value.scale() > target {
            return Err(DriverError::conversion(format!(
                "{} does not fit Decimal({},{}) without rounding",
                value, precision, scale
            )));
        }
    }
    let factor = pow10(target - value.scale())
        .ok_or_else(|| DriverError::conversion(format!("Decimal scale {} is too large", scale)))?;
    let unscaled = value.mantissa().checked_mul(factor).ok_or_else(|| {
        DriverError::conversion(format!("{} overflows Decimal({},{})", value, precision, scale))
    })?;
    let limit = pow10(u32::from(precision)).ok_or_else(|| {
        DriverError::conversion(format!("Decimal precision {} is too large", precision))
    })?;
    if unscaled.abs() >= limit {
        return Err(DriverError::conversion(format!(
            "{} overflows Decimal({},{})",
            value, precision, scale
        )));
    }
    Ok(unscaled)
}

/// Decode an unscaled integer at `scale`.
pub fn from_unscaled(unscaled: i128, scale: u8) -> DriverResult<Decimal> {
    Decimal::try_from_i128_with_scale(unscaled, u32::from(scale)).map_err(|e| {
        DriverError::conversion(format!(
            "Decimal {}e-{} cannot be represented: {}",
            unscaled, scale, e
        ))
    })
}
