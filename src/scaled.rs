//! Fixed-exponent arbitrary-precision money.
//!
//! Every amount — balances, prices, quantities alike — is scaled by a
//! single global exponent (`Exp = 10^12`) and stored as an arbitrary-width
//! integer, never a fixed-width one: a fixed-width type would have to
//! assume a ceiling on `price * quantity`, and nothing here wants to make
//! that assumption. `Scaled` wraps [`num_bigint::BigInt`] at that fixed
//! exponent and is the only numeric type that crosses a wire or log
//! boundary.
//!
//! There is no per-asset decimals table — the scale factor is a single
//! crate-wide constant.

use num_bigint::BigInt;
use num_integer::Integer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;
use thiserror::Error;

/// Decimal exponent shared by every amount in the system (`10^12`).
pub const SCALE_EXP: u32 = 12;

fn scale_factor() -> BigInt {
    BigInt::from(10u64).pow(SCALE_EXP)
}

#[derive(Debug, Error)]
pub enum ScaledError {
    #[error("invalid decimal string: {0}")]
    InvalidFormat(String),
    #[error("amount must not be negative here: {0}")]
    Negative(String),
}

/// A signed, arbitrary-precision quantity scaled by `10^12`.
///
/// Construct from the wire/log decimal-string representation with
/// [`Scaled::parse`]; render back with [`Scaled::to_decimal_string`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Scaled(BigInt);

impl Scaled {
    pub fn zero() -> Self {
        Scaled(BigInt::from(0))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == BigInt::from(0)
    }

    pub fn is_negative(&self) -> bool {
        self.0 < BigInt::from(0)
    }

    /// Raw scaled integer, for logging / RPC conversions that need the bits.
    pub fn raw(&self) -> &BigInt {
        &self.0
    }

    pub fn from_raw(raw: BigInt) -> Self {
        Scaled(raw)
    }

    /// Parses a client/wire decimal string (e.g. `"1.5"`, `"100"`) into a
    /// scaled integer. Rejects scientific notation, commas, and more
    /// fractional digits than the scale supports losslessly — excess
    /// fractional digits are accepted and truncated only if they are all
    /// zero, otherwise rejected (no silent precision loss).
    pub fn parse(s: &str) -> Result<Self, ScaledError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ScaledError::InvalidFormat("empty string".into()));
        }
        let (sign, body) = match s.strip_prefix('-') {
            Some(rest) => (-1, rest),
            None => (1, s.strip_prefix('+').unwrap_or(s)),
        };
        if body.is_empty() || !body.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return Err(ScaledError::InvalidFormat(s.to_string()));
        }
        let mut parts = body.splitn(2, '.');
        let whole = parts.next().unwrap_or("");
        let frac = parts.next();
        if whole.is_empty() {
            return Err(ScaledError::InvalidFormat(s.to_string()));
        }
        let whole_val = BigInt::from_str(whole)
            .map_err(|_| ScaledError::InvalidFormat(s.to_string()))?;

        let mut scaled = whole_val * scale_factor();

        if let Some(frac) = frac {
            if frac.is_empty() {
                return Err(ScaledError::InvalidFormat(s.to_string()));
            }
            let digits = frac.len();
            if digits as u32 > SCALE_EXP {
                // allow trailing zeros beyond the scale, reject real precision loss
                let (kept, excess) = frac.split_at(SCALE_EXP as usize);
                if excess.chars().any(|c| c != '0') {
                    return Err(ScaledError::InvalidFormat(format!(
                        "{s}: more than {SCALE_EXP} fractional digits"
                    )));
                }
                let frac_val = BigInt::from_str(kept)
                    .map_err(|_| ScaledError::InvalidFormat(s.to_string()))?;
                scaled += frac_val;
            } else {
                let pad = SCALE_EXP as usize - digits;
                let frac_val = BigInt::from_str(frac)
                    .map_err(|_| ScaledError::InvalidFormat(s.to_string()))?;
                scaled += frac_val * BigInt::from(10u64).pow(pad as u32);
            }
        }

        Ok(Scaled(scaled * sign))
    }

    /// Same as [`Scaled::parse`] but rejects negative amounts — used at
    /// boundaries where a quantity/price can never be signed.
    pub fn parse_positive(s: &str) -> Result<Self, ScaledError> {
        let v = Self::parse(s)?;
        if v.is_negative() {
            return Err(ScaledError::Negative(s.to_string()));
        }
        Ok(v)
    }

    /// Renders back to the canonical decimal-string wire format.
    pub fn to_decimal_string(&self) -> String {
        let factor = scale_factor();
        // div_mod_floor on the magnitude, not the signed value, so
        // "-1.5" round-trips as "-1.5" rather than "-2" + a positive
        // fractional borrow.
        let neg = self.0 < BigInt::from(0);
        let abs = if neg { -self.0.clone() } else { self.0.clone() };
        let (whole, frac) = abs.div_mod_floor(&factor);
        let frac_str = format!("{:0width$}", frac, width = SCALE_EXP as usize);
        let trimmed = frac_str.trim_end_matches('0');
        let sign = if neg && !(whole.to_string() == "0" && trimmed.is_empty()) {
            "-"
        } else {
            ""
        };
        if trimmed.is_empty() {
            format!("{sign}{whole}")
        } else {
            format!("{sign}{whole}.{trimmed}")
        }
    }

    /// `(self * qty) / SCALE` — the amount formula used by the match loop
    /// (`amount = (price * quantity) / SCALE`, §4.3) and by fee
    /// calculation (`fee = value * feeRate`, §4.2).
    pub fn mul_scaled(&self, other: &Scaled) -> Scaled {
        Scaled((&self.0 * &other.0).div_floor(&scale_factor()))
    }

    pub fn checked_sub_nonneg(&self, other: &Scaled) -> Option<Scaled> {
        let r = &self.0 - &other.0;
        if r < BigInt::from(0) { None } else { Some(Scaled(r)) }
    }
}

impl Add for Scaled {
    type Output = Scaled;
    fn add(self, rhs: Self) -> Self::Output {
        Scaled(self.0 + rhs.0)
    }
}

impl Add for &Scaled {
    type Output = Scaled;
    fn add(self, rhs: Self) -> Self::Output {
        Scaled(&self.0 + &rhs.0)
    }
}

impl Sub for Scaled {
    type Output = Scaled;
    fn sub(self, rhs: Self) -> Self::Output {
        Scaled(self.0 - rhs.0)
    }
}

impl Sub for &Scaled {
    type Output = Scaled;
    fn sub(self, rhs: Self) -> Self::Output {
        Scaled(&self.0 - &rhs.0)
    }
}

impl Neg for Scaled {
    type Output = Scaled;
    fn neg(self) -> Self::Output {
        Scaled(-self.0)
    }
}

impl fmt::Display for Scaled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal_string())
    }
}

/// Wire/log representation is always the decimal string, never the raw
/// scaled integer — matching `BalanceLog.freeChange string` etc. in the
/// original's JSON schema.
impl Serialize for Scaled {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_decimal_string())
    }
}

impl<'de> Deserialize<'de> for Scaled {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Scaled::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qa_parse_and_render_roundtrip() {
        for s in ["0", "1", "1.5", "100.000001", "0.000000000001"] {
            let v = Scaled::parse(s).unwrap();
            assert_eq!(v.to_decimal_string(), s);
        }
    }

    #[test]
    fn qa_parse_rejects_scientific_and_commas() {
        assert!(Scaled::parse("1e2").is_err());
        assert!(Scaled::parse("1,000").is_err());
        assert!(Scaled::parse("").is_err());
    }

    #[test]
    fn qa_parse_rejects_excess_precision() {
        assert!(Scaled::parse("1.0000000000001").is_err());
        // trailing zeros beyond the scale are fine
        assert!(Scaled::parse("1.0000000000000").is_ok());
    }

    #[test]
    fn qa_negative_roundtrip() {
        let v = Scaled::parse("-5.25").unwrap();
        assert!(v.is_negative());
        assert_eq!(v.to_decimal_string(), "-5.25");
    }

    #[test]
    fn qa_mul_scaled_matches_price_times_qty_over_scale() {
        // price=100, qty=2 -> amount=200
        let price = Scaled::parse("100").unwrap();
        let qty = Scaled::parse("2").unwrap();
        assert_eq!(price.mul_scaled(&qty).to_decimal_string(), "200");

        // price=100, qty=0.5 -> amount=50
        let qty = Scaled::parse("0.5").unwrap();
        assert_eq!(price.mul_scaled(&qty).to_decimal_string(), "50");
    }

    #[test]
    fn qa_checked_sub_nonneg() {
        let a = Scaled::parse("10").unwrap();
        let b = Scaled::parse("4").unwrap();
        assert_eq!(
            a.checked_sub_nonneg(&b).unwrap().to_decimal_string(),
            "6"
        );
        assert!(b.checked_sub_nonneg(&a).is_none());
    }
}
