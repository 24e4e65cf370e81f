// Numbers with a decimal precision marker
// Keeps decimal-looking arithmetic from growing spurious trailing digits

use std::fmt;

/// Largest precision tracked. f64 cannot carry more significant fractional digits.
pub const MAX_PRECISION: u8 = 15;

/// An IEEE double plus the count of significant fractional decimal digits.
///
/// `precision` is `None` until something needs it; it is then derived from the
/// shortest round-trip decimal text of the value.
#[derive(Clone, Copy, Debug)]
pub struct Number {
    value: f64,
    precision: Option<u8>,
}

impl Number {
    /// A number whose precision is resolved lazily from its value.
    #[inline]
    pub fn new(value: f64) -> Self {
        Number {
            value,
            precision: None,
        }
    }

    #[inline]
    pub fn with_precision(value: f64, precision: u8) -> Self {
        Number {
            value,
            precision: Some(precision.min(MAX_PRECISION)),
        }
    }

    #[inline]
    pub fn integer(value: i64) -> Self {
        Number::with_precision(value as f64, 0)
    }

    /// Parse decimal text, taking the precision from the digits actually written.
    ///
    /// `"2.50"` keeps precision 2 even though `2.5` would resolve to 1.
    pub fn parse(text: &str) -> Option<Self> {
        let value: f64 = text.trim().parse().ok()?;
        Some(Number {
            value,
            precision: Some(precision_of_text(text.trim())),
        })
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }

    /// The raw marker, `None` when unresolved.
    #[inline]
    pub fn precision_marker(&self) -> Option<u8> {
        self.precision
    }

    /// The precision, resolving it from the decimal text when unset.
    pub fn precision(&self) -> u8 {
        self.precision
            .unwrap_or_else(|| resolve_precision(self.value))
    }

    #[inline]
    pub fn is_integral(&self) -> bool {
        self.value.is_finite() && self.value.fract() == 0.0
    }

    pub fn as_i64(&self) -> Option<i64> {
        if self.is_integral() && self.value >= i64::MIN as f64 && self.value <= i64::MAX as f64 {
            Some(self.value as i64)
        } else {
            None
        }
    }

    /// The value rounded to its precision, which is what the number "means".
    pub fn rounded(&self) -> f64 {
        round_to(self.value, self.precision())
    }

    pub fn add(self, other: Number) -> Number {
        let value = self.value + other.value;
        self.combine(other, value, |a, b| a.max(b))
    }

    pub fn sub(self, other: Number) -> Number {
        let value = self.value - other.value;
        self.combine(other, value, |a, b| a.max(b))
    }

    pub fn mul(self, other: Number) -> Number {
        let value = self.value * other.value;
        self.combine(other, value, |a, b| a.max(b))
    }

    /// Returns `None` on a zero divisor.
    pub fn div(self, other: Number) -> Option<Number> {
        if other.value == 0.0 {
            return None;
        }
        Some(self.unresolved_result(other, self.value / other.value))
    }

    /// Returns `None` on a zero divisor.
    pub fn rem(self, other: Number) -> Option<Number> {
        if other.value == 0.0 {
            return None;
        }
        let value = self.value % other.value;
        Some(self.combine(other, value, |a, b| a.max(b)))
    }

    pub fn pow(self, other: Number) -> Number {
        let value = self.value.powf(other.value);
        self.combine(other, value, |a, b| a.max(b))
    }

    pub fn neg(self) -> Number {
        Number {
            value: -self.value,
            precision: self.precision,
        }
    }

    /// Equality on the rounded values, at the larger of the two precisions.
    pub fn numeric_eq(&self, other: &Number) -> bool {
        if self.value.is_nan() || other.value.is_nan() {
            return false;
        }
        let p = self.precision().max(other.precision());
        round_to(self.value, p) == round_to(other.value, p)
    }

    pub fn numeric_cmp(&self, other: &Number) -> Option<std::cmp::Ordering> {
        let p = self.precision().max(other.precision());
        round_to(self.value, p).partial_cmp(&round_to(other.value, p))
    }

    fn combine(self, other: Number, value: f64, pick: impl Fn(u8, u8) -> u8) -> Number {
        let (lp, rp) = (self.precision(), other.precision());
        if lp == 0 && rp == 0 && value.fract() == 0.0 {
            return Number::with_precision(value, 0);
        }
        Number::with_precision(value, pick(lp, rp))
    }

    fn unresolved_result(self, other: Number, value: f64) -> Number {
        if self.precision() == 0 && other.precision() == 0 && value.fract() == 0.0 {
            Number::with_precision(value, 0)
        } else {
            Number::new(value)
        }
    }
}

/// Count the fractional digits of the shortest round-trip text of `value`.
pub fn resolve_precision(value: f64) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    precision_of_text(&format!("{}", value))
}

fn precision_of_text(text: &str) -> u8 {
    let (mantissa, exponent) = match text.find(['e', 'E']) {
        Some(idx) => (&text[..idx], text[idx + 1..].parse::<i32>().unwrap_or(0)),
        None => (text, 0),
    };
    let fraction = mantissa.split_once('.').map(|(_, f)| f.len()).unwrap_or(0) as i32;
    (fraction - exponent).clamp(0, MAX_PRECISION as i32) as u8
}

fn round_to(value: f64, precision: u8) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(precision as i32);
    let scaled = (value * factor).round() / factor;
    if scaled.is_finite() {
        scaled
    } else {
        value
    }
}

impl From<f64> for Number {
    #[inline]
    fn from(value: f64) -> Self {
        Number::new(value)
    }
}

impl From<i64> for Number {
    #[inline]
    fn from(value: i64) -> Self {
        Number::integer(value)
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.numeric_eq(other)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.value.is_finite() {
            return write!(f, "null");
        }
        let precision = self.precision() as usize;
        if precision == 0 {
            // `+ 0.0` folds -0 into 0
            write!(f, "{:.0}", self.value.round() + 0.0)
        } else {
            write!(f, "{:.*}", precision, self.value)
        }
    }
}
