//! Fixed-point conversions for concentrated-liquidity pools.
//!
//! Pool prices are stored as `sqrtPriceX96 = sqrt(token1/token0) * 2^96` in
//! raw token units. Everything here works on 256/512-bit integers and
//! produces [`Decimal`]s, so no binary floating point is involved.
//!
//! # Price Calculation
//!
//! ```text
//! price(token1 per token0) = sqrtPriceX96^2 / 2^192 * 10^(decimals0 - decimals1)
//! ```
//!
//! Every function is total: out-of-range or malformed input yields `None` or
//! zero rather than panicking.

use alloy::primitives::{I256, U256, U512};
use rust_decimal::Decimal;

/// Number of fractional bits in a Q96 value.
pub const Q96_BITS: usize = 96;

/// Lowest sqrt price a pool can reach (tick -887272).
pub const MIN_SQRT_RATIO: U256 = U256::from_limbs([4_295_128_739, 0, 0, 0]);

/// Highest sqrt price a pool can reach (tick 887272).
pub const MAX_SQRT_RATIO: U256 = U256::from_limbs([
    0x5d95_1d52_6398_8d26,
    0xefd1_fc6a_5064_8849,
    0x0000_0000_fffd_8963,
    0,
]);

/// Largest mantissa a [`Decimal`] can hold (2^96 - 1).
const MAX_MANTISSA: u128 = (1_u128 << 96) - 1;

/// Largest scale a [`Decimal`] supports.
const MAX_SCALE: u32 = 28;

/// Token amounts held by a liquidity position, in human units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenAmounts {
    /// Token0 amount
    pub amount0: Decimal,
    /// Token1 amount
    pub amount1: Decimal,
}

/// `2^96` as a 512-bit integer.
#[must_use]
pub fn q96() -> U512 {
    U512::from(1_u8) << Q96_BITS
}

fn pow10(exp: u32) -> Option<U512> {
    U512::from(10_u8).checked_pow(U512::from(exp))
}

/// Converts an integer with an implied decimal `scale` to a [`Decimal`].
///
/// Digits beyond what the 96-bit mantissa can hold are truncated from the
/// fractional part. Returns `None` when the integer part alone overflows.
#[must_use]
pub fn u512_to_decimal(mut value: U512, mut scale: u32) -> Option<Decimal> {
    let max = U512::from(MAX_MANTISSA);
    let ten = U512::from(10_u8);
    while value > max && scale > 0 {
        value /= ten;
        scale -= 1;
    }
    if value > max {
        return None;
    }

    let mantissa = i128::try_from(u128::try_from(value).ok()?).ok()?;
    Decimal::try_from_i128_with_scale(mantissa, scale)
        .ok()
        .map(|d| d.normalize())
}

/// `numerator / denominator * 10^exp10` as a [`Decimal`].
///
/// `None` on a zero denominator or when the result cannot be represented.
#[must_use]
pub fn ratio_to_decimal(numerator: U512, denominator: U512, exp10: i32) -> Option<Decimal> {
    if denominator.is_zero() {
        return None;
    }

    // Keep MAX_SCALE fractional digits, then let u512_to_decimal trim.
    let shift = exp10.checked_add(i32::try_from(MAX_SCALE).ok()?)?;
    let quotient = if shift >= 0 {
        numerator.checked_mul(pow10(shift.unsigned_abs())?)? / denominator
    } else {
        let divisor = denominator.checked_mul(pow10(shift.unsigned_abs())?)?;
        numerator / divisor
    };

    u512_to_decimal(quotient, MAX_SCALE)
}

/// Price of token0 in units of token1.
///
/// `None` for a zero sqrt price or an unrepresentable result.
#[must_use]
pub fn sqrt_price_x96_to_price(
    sqrt_price_x96: U256,
    decimals0: u8,
    decimals1: u8,
) -> Option<Decimal> {
    if sqrt_price_x96.is_zero() {
        return None;
    }
    let sqrt = U512::from(sqrt_price_x96);
    let numerator = sqrt.checked_mul(sqrt)?;
    let denominator = q96() * q96();
    ratio_to_decimal(
        numerator,
        denominator,
        i32::from(decimals0) - i32::from(decimals1),
    )
}

/// Price of token1 in units of token0, computed directly from the fixed-point
/// value rather than by inverting a rounded price.
#[must_use]
pub fn sqrt_price_x96_to_inverse_price(
    sqrt_price_x96: U256,
    decimals0: u8,
    decimals1: u8,
) -> Option<Decimal> {
    if sqrt_price_x96.is_zero() {
        return None;
    }
    let sqrt = U512::from(sqrt_price_x96);
    let denominator = sqrt.checked_mul(sqrt)?;
    let numerator = q96() * q96();
    ratio_to_decimal(
        numerator,
        denominator,
        i32::from(decimals1) - i32::from(decimals0),
    )
}

/// Token amounts of `liquidity` over `[sqrt_lower, sqrt_upper]` at the
/// current `sqrt_price`.
///
/// Below the range the position is all token0, above it all token1, and in
/// between it is split. Inverted or zero bounds yield zero amounts.
#[must_use]
pub fn liquidity_to_amounts(
    liquidity: u128,
    sqrt_price_x96: U256,
    sqrt_lower: U256,
    sqrt_upper: U256,
    decimals0: u8,
    decimals1: u8,
) -> TokenAmounts {
    if sqrt_lower.is_zero() || sqrt_lower >= sqrt_upper || sqrt_price_x96.is_zero() {
        return TokenAmounts::default();
    }

    let l = U512::from(liquidity);
    let price = U512::from(sqrt_price_x96);
    let lower = U512::from(sqrt_lower);
    let upper = U512::from(sqrt_upper);
    let q = q96();

    let exp0 = -i32::from(decimals0);
    let exp1 = -i32::from(decimals1);
    let zero = Decimal::ZERO;

    // amount0 = L * (b - a) * Q96 / (a * b); amount1 = L * (b - a) / Q96
    let amount0_between = |a: U512, b: U512| {
        ratio_to_decimal(l * (b - a) * q, a * b, exp0).unwrap_or(zero)
    };
    let amount1_between = |a: U512, b: U512| ratio_to_decimal(l * (b - a), q, exp1).unwrap_or(zero);

    if price <= lower {
        TokenAmounts {
            amount0: amount0_between(lower, upper),
            amount1: zero,
        }
    } else if price < upper {
        TokenAmounts {
            amount0: amount0_between(price, upper),
            amount1: amount1_between(lower, price),
        }
    } else {
        TokenAmounts {
            amount0: zero,
            amount1: amount1_between(lower, upper),
        }
    }
}

/// Human amount of a raw unsigned token quantity.
#[must_use]
pub fn amount_to_decimal(raw: U256, decimals: u8) -> Decimal {
    ratio_to_decimal(U512::from(raw), U512::from(1_u8), -i32::from(decimals))
        .unwrap_or(Decimal::ZERO)
}

/// Human amount of a signed decimal string such as a stored swap amount.
///
/// Malformed input yields zero.
#[must_use]
pub fn raw_amount_to_decimal(raw: &str, decimals: u8) -> Decimal {
    let Ok(value) = raw.trim().parse::<I256>() else {
        return Decimal::ZERO;
    };
    let magnitude = amount_to_decimal(value.unsigned_abs(), decimals);
    if value.is_negative() {
        -magnitude
    } else {
        magnitude
    }
}
