//! Shared type definitions used across runledger crates.

use std::fmt;
use std::iter::Sum;
use std::ops::Add;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

/// Number of fractional digits kept for every monetary amount.
pub const MONEY_SCALE: u32 = 10;

/// Unique identifier for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a fresh random run id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RunId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is still executing
    #[default]
    Running,
    /// Run finished successfully
    Completed,
    /// Run finished with an error
    Failed,
}

impl RunStatus {
    /// Returns true once the run can no longer change status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` is an allowed transition.
    ///
    /// Only `running -> completed` and `running -> failed` are allowed.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (Self::Running, Self::Completed) | (Self::Running, Self::Failed)
        )
    }

    /// Canonical lowercase name, as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`RunStatus`] from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown run status: {0}")]
pub struct UnknownRunStatus(pub String);

impl FromStr for RunStatus {
    type Err = UnknownRunStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownRunStatus(other.to_string())),
        }
    }
}

/// Error returned when text is not a valid decimal amount.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid decimal amount {input:?}: {reason}")]
pub struct CostAmountError {
    /// The rejected input
    pub input: String,
    /// Why it was rejected
    pub reason: String,
}

/// An amount of fractional US cents with exact decimal arithmetic.
///
/// Amounts are always rendered with exactly [`MONEY_SCALE`] fractional digits
/// (`"0.1000000000"`), both in `Display` and when serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UsdCents(Decimal);

impl UsdCents {
    /// Zero cents.
    pub const ZERO: UsdCents = UsdCents(Decimal::ZERO);

    /// Wrap a decimal, rounding half away from zero to [`MONEY_SCALE`] digits.
    pub fn new(value: Decimal) -> Self {
        Self(value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero))
    }

    /// The underlying decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Extended cost of `quantity` units at this unit price.
    ///
    /// Returns `None` if the product overflows the decimal range.
    pub fn checked_extend(&self, quantity: Decimal) -> Option<UsdCents> {
        self.0.checked_mul(quantity).map(Self::new)
    }

    /// Add two amounts, returning `None` on overflow.
    pub fn checked_add(&self, other: UsdCents) -> Option<UsdCents> {
        self.0.checked_add(other.0).map(Self::new)
    }

    /// Fixed-scale text form, e.g. `"0.4500000000"`.
    pub fn to_fixed(&self) -> String {
        let mut scaled = self.0;
        scaled.rescale(MONEY_SCALE);
        scaled.to_string()
    }
}

impl From<Decimal> for UsdCents {
    fn from(value: Decimal) -> Self {
        Self::new(value)
    }
}

impl FromStr for UsdCents {
    type Err = CostAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Decimal::from_str_exact(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .map(Self::new)
            .map_err(|e| CostAmountError {
                input: s.to_string(),
                reason: e.to_string(),
            })
    }
}

impl fmt::Display for UsdCents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_fixed())
    }
}

impl Add for UsdCents {
    type Output = UsdCents;

    fn add(self, rhs: UsdCents) -> UsdCents {
        UsdCents(self.0 + rhs.0)
    }
}

impl Sum for UsdCents {
    fn sum<I: Iterator<Item = UsdCents>>(iter: I) -> Self {
        iter.fold(UsdCents::ZERO, |acc, x| acc + x)
    }
}

impl<'a> Sum<&'a UsdCents> for UsdCents {
    fn sum<I: Iterator<Item = &'a UsdCents>>(iter: I) -> Self {
        iter.fold(UsdCents::ZERO, |acc, x| acc + *x)
    }
}

impl Serialize for UsdCents {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_fixed())
    }
}

impl<'de> Deserialize<'de> for UsdCents {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cents(s: &str) -> UsdCents {
        s.parse().unwrap()
    }

    #[test]
    fn test_zero_renders_with_ten_digits() {
        assert_eq!(UsdCents::ZERO.to_string(), "0.0000000000");
        assert_eq!(Vec::<UsdCents>::new().iter().sum::<UsdCents>().to_string(), "0.0000000000");
    }

    #[test]
    fn test_decimal_sum_has_no_float_drift() {
        // 0.1 added ten times is exactly 1 in decimal arithmetic
        let total: UsdCents = std::iter::repeat_n(cents("0.1"), 10).sum();
        assert_eq!(total.to_string(), "1.0000000000");
    }

    #[test]
    fn test_extend_rounds_half_away_from_zero() {
        let unit = cents("0.0000000005");
        let total = unit.checked_extend(Decimal::from_str("0.5").unwrap()).unwrap();
        // 0.00000000025 rounds up at the 10th digit
        assert_eq!(total.to_string(), "0.0000000003");

        let unit = cents("0.0003000000");
        let total = unit.checked_extend(Decimal::from(1000)).unwrap();
        assert_eq!(total.to_string(), "0.3000000000");
    }

    #[test]
    fn test_serde_as_fixed_string() {
        let json = serde_json::to_string(&cents("12.5")).unwrap();
        assert_eq!(json, "\"12.5000000000\"");

        let back: UsdCents = serde_json::from_str("\"0.0012\"").unwrap();
        assert_eq!(back, cents("0.0012000000"));
    }

    #[test]
    fn test_invalid_amount_is_rejected() {
        let err = "twelve".parse::<UsdCents>().unwrap_err();
        assert_eq!(err.input, "twelve");
    }

    #[test]
    fn test_status_transitions() {
        assert!(RunStatus::Running.can_transition_to(RunStatus::Completed));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Completed));
        assert!(!RunStatus::Running.can_transition_to(RunStatus::Running));
    }

    #[test]
    fn test_status_text_form() {
        for status in [RunStatus::Running, RunStatus::Completed, RunStatus::Failed] {
            assert_eq!(status.to_string().parse::<RunStatus>().unwrap(), status);
        }
        assert!("paused".parse::<RunStatus>().is_err());
        assert_eq!(serde_json::to_string(&RunStatus::Completed).unwrap(), "\"completed\"");
    }

    #[test]
    fn test_run_id_parse() {
        let id = RunId::new();
        assert_eq!(id.to_string().parse::<RunId>().unwrap(), id);
        assert!("not-a-uuid".parse::<RunId>().is_err());
    }
}
