//! Trade fee calculation.
//!
//! `fee_level` travels with every [`crate::domain::OrderReq`]/
//! [`crate::domain::Ticket`] rather than coming from a fixed symbol-level
//! constant, so the fee rate for a trade is whatever its resting order
//! carried. The arithmetic uses the same `value * rate / SCALE` shape as
//! `amount = price * quantity / SCALE` in the match loop.
//!
//! There is no minimum-fee-of-1 floor: at `Scaled`'s 10^-12 precision a
//! true zero fee is a real possible value, not necessarily rounding
//! noise.

use crate::scaled::Scaled;

/// `fee = value * rate`. `rate` is itself a [`Scaled`] fraction (e.g.
/// `0.001` for 0.1%) rather than an integer-with-implied-precision —
/// `Scaled::mul_scaled` already divides by the shared scale factor, so a
/// `rate` of one unit means "100%".
pub fn calculate_fee(value: &Scaled, rate: &Scaled) -> Scaled {
    value.mul_scaled(rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Scaled {
        Scaled::parse(v).unwrap()
    }

    #[test]
    fn qa_calculate_fee_basic() {
        // 1 BTC * 0.20% = 0.002 BTC
        assert_eq!(calculate_fee(&s("1"), &s("0.002")).to_decimal_string(), "0.002");
        // 1 BTC * 0.10% = 0.001 BTC
        assert_eq!(calculate_fee(&s("1"), &s("0.001")).to_decimal_string(), "0.001");
    }

    #[test]
    fn qa_calculate_fee_zero() {
        assert!(calculate_fee(&s("0"), &s("0.001")).is_zero());
        assert!(calculate_fee(&s("100"), &s("0")).is_zero());
    }

    #[test]
    fn qa_calculate_fee_large_value_no_overflow() {
        let value = s("100000000000"); // 10^11
        let fee = calculate_fee(&value, &s("0.002"));
        assert_eq!(fee.to_decimal_string(), "200000000");
    }
}
