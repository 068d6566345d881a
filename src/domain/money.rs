use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const NANO_FACTOR: i64 = 1_000_000_000;

/// Fixed-point money value in the broker wire format: integer `units`
/// plus a `nano` fraction carrying the same sign as the whole value.
///
/// Invariant: `nano` is in `[0, 1e9)` when `units >= 0` and in
/// `(-1e9, 0]` when `units < 0`. The decimal value is
/// `units + nano / 1e9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Money {
    pub units: i64,
    pub nano: i32,
}

impl Money {
    pub fn new(units: i64, nano: i32) -> Self {
        Self { units, nano }
    }

    /// Build from optional RPC fields. The upstream gateway drops
    /// zero-valued struct members, so absent `units` or `nano` read as 0.
    pub fn from_parts(units: Option<i64>, nano: Option<i32>) -> Self {
        Self {
            units: units.unwrap_or(0),
            nano: nano.unwrap_or(0),
        }
    }

    pub fn from_units(units: i64) -> Self {
        Self { units, nano: 0 }
    }

    /// Convert to a double. For negative `units` the fraction is taken
    /// with the same (negative) sign even if the wire carried a positive
    /// `nano`; when `units` is zero the sign of `nano` decides.
    pub fn to_f64(self) -> f64 {
        let units = self.units as f64;
        let frac = self.nano as f64 / NANO_FACTOR as f64;
        if self.units > 0 {
            units + frac.abs()
        } else if self.units < 0 {
            units - frac.abs()
        } else {
            frac
        }
    }

    /// Exact construction from a decimal. Returns `None` when the value
    /// does not fit the nano granularity or overflows `units`.
    pub fn from_decimal(value: Decimal) -> Option<Self> {
        let whole = value.trunc();
        let units = whole.to_i64()?;
        let nano_dec = (value - whole) * Decimal::from(NANO_FACTOR);
        if nano_dec != nano_dec.trunc() {
            return None;
        }
        let nano = nano_dec.to_i32()?;
        Some(Self { units, nano })
    }

    pub fn is_positive(self) -> bool {
        self.units > 0 || (self.units == 0 && self.nano > 0)
    }

    pub fn is_zero(self) -> bool {
        self.units == 0 && self.nano == 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Currency {
    Rub,
    Usd,
    Eur,
}

impl Currency {
    pub fn iso(self) -> &'static str {
        match self {
            Currency::Rub => "RUB",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
        }
    }
}

/// A positive amount parsed from a human-readable money string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayMoney {
    pub value: f64,
    pub currency: Currency,
}

/// Parse strings like `"1 234 567,89 руб"`, `"$1,234.56"` or `"€999"`.
///
/// Currency is detected by symbol (`$` USD, `€` EUR, everything else RUB).
/// Returns `None` for non-positive or unparseable inputs.
pub fn parse_money_display(raw: &str) -> Option<DisplayMoney> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let currency = if trimmed.contains('$') {
        Currency::Usd
    } else if trimmed.contains('€') {
        Currency::Eur
    } else {
        Currency::Rub
    };

    // Keep only digits, separators and sign. Spaces (incl. NBSP and the
    // narrow no-break space used by Russian formatting) group thousands.
    let mut cleaned = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        match c {
            '0'..='9' | ',' | '.' | '-' => cleaned.push(c),
            _ => {}
        }
    }
    if cleaned.is_empty() {
        return None;
    }

    let has_comma = cleaned.contains(',');
    let has_dot = cleaned.contains('.');
    let normalized = if has_comma && has_dot {
        // "$1,234.56": comma groups thousands, dot is the decimal point.
        cleaned.replace(',', "")
    } else if has_comma {
        // "1 234 567,89": comma is the decimal point.
        cleaned.replace(',', ".")
    } else {
        cleaned
    };

    let value = Decimal::from_str(&normalized).ok()?.to_f64()?;
    if !value.is_finite() || value <= 0.0 {
        return None;
    }

    Some(DisplayMoney { value, currency })
}
