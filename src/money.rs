//! Fixed-point currency values.
//!
//! All amounts in this system are integer minor units (cents for 2-decimal
//! currencies) paired with a lowercase ISO 4217 code. Nothing here touches a
//! binary float: parsing, formatting, and arithmetic are all integer-based so
//! that `49.99 + 49.99` is exactly `99.98`.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MoneyError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: String, right: String },
}

/// A monetary value in minor units of a single currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Amount in minor units (e.g. cents). May be negative for deltas.
    pub cents: i64,
    /// Lowercase ISO 4217 code, e.g. "usd".
    pub currency: String,
}

impl Money {
    pub fn new(cents: i64, currency: &str) -> Self {
        Self {
            cents,
            currency: currency.to_lowercase(),
        }
    }

    pub fn zero(currency: &str) -> Self {
        Self::new(0, currency)
    }

    pub fn is_zero(&self) -> bool {
        self.cents == 0
    }

    /// Parse a decimal string like "99.99" into minor units.
    ///
    /// At most two fractional digits are accepted; currencies with other
    /// minor-unit scales are out of scope for this service.
    pub fn from_decimal_str(s: &str, currency: &str) -> Result<Self, MoneyError> {
        let s = s.trim();
        let bad = || MoneyError::InvalidAmount(s.to_string());

        let (negative, rest) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let (whole, frac) = match rest.split_once('.') {
            Some((w, f)) => (w, f),
            None => (rest, ""),
        };

        if whole.is_empty() && frac.is_empty() {
            return Err(bad());
        }
        if frac.len() > 2 {
            return Err(bad());
        }
        if !whole.chars().all(|c| c.is_ascii_digit())
            || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(bad());
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| bad())?
        };

        // Right-pad the fraction: "9" means 90 cents, not 9.
        let frac_cents: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| bad())? * 10,
            _ => frac.parse().map_err(|_| bad())?,
        };

        let cents = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac_cents))
            .ok_or_else(bad)?;
        let cents = if negative { -cents } else { cents };

        Ok(Self::new(cents, currency))
    }

    /// Format as a decimal string with exactly two fractional digits.
    pub fn to_decimal_string(&self) -> String {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        format!("{}{}.{:02}", sign, abs / 100, abs % 100)
    }

    fn check_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency.clone(),
                right: other.currency.clone(),
            });
        }
        Ok(())
    }

    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.check_currency(other)?;
        let cents = self
            .cents
            .checked_add(other.cents)
            .ok_or_else(|| MoneyError::InvalidAmount("overflow".into()))?;
        Ok(Money::new(cents, &self.currency))
    }

    pub fn subtract(&self, other: &Money) -> Result<Money, MoneyError> {
        self.check_currency(other)?;
        let cents = self
            .cents
            .checked_sub(other.cents)
            .ok_or_else(|| MoneyError::InvalidAmount("overflow".into()))?;
        Ok(Money::new(cents, &self.currency))
    }

    /// Compare two amounts of the same currency.
    pub fn compare(&self, other: &Money) -> Result<Ordering, MoneyError> {
        self.check_currency(other)?;
        Ok(self.cents.cmp(&other.cents))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_decimal_string(), self.currency)
    }
}
