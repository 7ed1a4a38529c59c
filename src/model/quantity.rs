//! Decimal input normalization.
//!
//! User-entered amounts accept `.` or `,` as the decimal separator and are
//! normalized to a [`Decimal`] with exactly two fractional digits before any
//! validation or persistence. Digits beyond the second fractional place are
//! rounded half away from zero. Grouping separators (`1.000,5`) are rejected.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Fractional digits of every stored quantity, cost and duration.
pub const SCALE: u32 = 2;

static DECIMAL_INPUT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\d+(?:[.,]\d*)?|[.,]\d+)$").expect("decimal input pattern is valid")
});

/// Round to [`SCALE`] places and pin the scale, so `1.5` is stored as `1.50`.
pub fn canonical(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(SCALE);
    rounded
}

/// Parse user text into a canonical non-negative decimal.
///
/// # Errors
///
/// `Missing` for blank input, `NotNumeric` for anything that is not a plain
/// unsigned decimal.
pub fn normalize_decimal(text: &str) -> Result<Decimal, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Missing);
    }
    if !DECIMAL_INPUT.is_match(trimmed) {
        return Err(ValidationError::NotNumeric(trimmed.to_string()));
    }
    let mut dotted = trimmed.replace(',', ".");
    if dotted.starts_with('.') {
        dotted.insert(0, '0');
    }
    if dotted.ends_with('.') {
        dotted.pop();
    }
    let value = Decimal::from_str(&dotted)
        .map_err(|_| ValidationError::NotNumeric(trimmed.to_string()))?;
    Ok(canonical(value))
}

/// A strictly positive amount of a part, in the part's unit of measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Quantity(Decimal);

impl Quantity {
    /// Smallest accepted increment.
    pub const MIN: Decimal = Decimal::from_parts(1, 0, 0, false, SCALE);

    /// Parse user-entered text (`"1,5"`, `"1.5"`, `" 4 "`).
    ///
    /// # Errors
    ///
    /// Propagates [`normalize_decimal`] errors, and `NonPositive` when the
    /// normalized value is below 0.01.
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        Self::new(normalize_decimal(text)?)
    }

    /// # Errors
    ///
    /// `NonPositive` when the canonical value is below 0.01.
    pub fn new(value: Decimal) -> Result<Self, ValidationError> {
        let value = canonical(value);
        if value < Self::MIN {
            return Err(ValidationError::NonPositive);
        }
        Ok(Self(value))
    }

    pub fn value(self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Quantity {
    type Error = ValidationError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for Decimal {
    fn from(q: Quantity) -> Self {
        q.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
