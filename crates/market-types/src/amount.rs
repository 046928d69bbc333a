use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

/// Token amount in indivisible base units.
///
/// All market accounting (escrow requirements, per-byte retrieval pricing,
/// voucher amounts) is carried in base units; checked arithmetic only, so a
/// corrupt peer cannot wrap a balance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TokenAmount(u128);

impl TokenAmount {
    pub const ZERO: TokenAmount = TokenAmount(0);

    pub const fn from_base_units(units: u128) -> Self {
        Self(units)
    }

    pub const fn base_units(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: TokenAmount) -> Option<TokenAmount> {
        self.0.checked_add(other.0).map(TokenAmount)
    }

    pub fn checked_sub(self, other: TokenAmount) -> Option<TokenAmount> {
        self.0.checked_sub(other.0).map(TokenAmount)
    }

    /// Per-unit price times a unit count (bytes retrieved, epochs stored).
    pub fn checked_mul_u64(self, units: u64) -> Option<TokenAmount> {
        self.0.checked_mul(units as u128).map(TokenAmount)
    }

    pub fn saturating_sub(self, other: TokenAmount) -> TokenAmount {
        TokenAmount(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Sum for TokenAmount {
    fn sum<I: Iterator<Item = TokenAmount>>(iter: I) -> Self {
        iter.fold(TokenAmount::ZERO, |acc, a| {
            TokenAmount(acc.0.saturating_add(a.0))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_arithmetic() {
        let a = TokenAmount::from_base_units(1000);
        let b = TokenAmount::from_base_units(500);
        assert_eq!(a.checked_add(b), Some(TokenAmount::from_base_units(1500)));
        assert_eq!(a.checked_sub(b), Some(TokenAmount::from_base_units(500)));
        assert_eq!(b.checked_sub(a), None);
        assert_eq!(
            a.checked_mul_u64(19_920),
            Some(TokenAmount::from_base_units(19_920_000))
        );
    }

    #[test]
    fn test_overflow_detected() {
        let max = TokenAmount::from_base_units(u128::MAX);
        assert_eq!(max.checked_add(TokenAmount::from_base_units(1)), None);
        assert_eq!(max.checked_mul_u64(2), None);
    }

    #[test]
    fn test_sum() {
        let total: TokenAmount = [
            TokenAmount::from_base_units(10_136_000),
            TokenAmount::from_base_units(9_784_000),
        ]
        .into_iter()
        .sum();
        assert_eq!(total, TokenAmount::from_base_units(19_920_000));
    }
}
