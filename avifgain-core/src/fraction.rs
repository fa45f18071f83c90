//! Exact rational numbers for gain map metadata.
//!
//! Gain map metadata is stored as numerator/denominator pairs. [`Fraction`]
//! has a signed numerator (offsets, log2 gain bounds); [`UFraction`] is fully
//! unsigned (gamma, headrooms). Arithmetic is overflow-checked and fails
//! instead of saturating.

use alloc::format;

use crate::types::{Error, Result};

/// Iteration cap for the continued fraction expansion. The golden ratio is
/// the slowest converging input and needs 39 steps.
const MAX_CONTINUED_FRACTION_TERMS: usize = 39;

/// A signed fraction with a positive denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fraction {
    /// Numerator, carrying the sign.
    pub numerator: i32,
    /// Denominator.
    pub denominator: u32,
}

impl Default for Fraction {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

/// An unsigned fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UFraction {
    /// Numerator.
    pub numerator: u32,
    /// Denominator.
    pub denominator: u32,
}

impl Default for UFraction {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn to_i32(v: i64, what: &str) -> Result<i32> {
    i32::try_from(v).map_err(|_| Error::FractionOverflow(format!("{} {} does not fit in i32", what, v)))
}

fn to_u32(v: i64, what: &str) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::FractionOverflow(format!("{} {} does not fit in u32", what, v)))
}

impl Fraction {
    /// Create a fraction.
    pub const fn new(numerator: i32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Reduce to lowest terms. A zero denominator is left untouched.
    pub fn simplify(self) -> Self {
        if self.denominator == 0 {
            return self;
        }
        let divisor = gcd(self.numerator.unsigned_abs() as u64, self.denominator as u64);
        if divisor <= 1 {
            return self;
        }
        Self {
            numerator: (self.numerator as i64 / divisor as i64) as i32,
            denominator: (self.denominator as u64 / divisor) as u32,
        }
    }

    /// Rescale both fractions (after simplifying them) to a shared
    /// denominator.
    ///
    /// Fails if any rescaled term overflows.
    pub fn common_denominator(a: Self, b: Self) -> Result<(Self, Self)> {
        let a = a.simplify();
        let b = b.simplify();
        if a.denominator == b.denominator {
            return Ok((a, b));
        }
        let ad = a.denominator as i64;
        let bd = b.denominator as i64;
        let a_n = to_i32(a.numerator as i64 * bd, "numerator")?;
        let b_n = to_i32(b.numerator as i64 * ad, "numerator")?;
        let d = to_u32(ad * bd, "denominator")?;
        Ok((Self::new(a_n, d), Self::new(b_n, d)))
    }

    /// `self + other`, simplified. Fails on overflow.
    pub fn checked_add(self, other: Self) -> Result<Self> {
        let (a, b) = Self::common_denominator(self, other)?;
        let n = to_i32(a.numerator as i64 + b.numerator as i64, "sum")?;
        Ok(Self::new(n, a.denominator).simplify())
    }

    /// `self - other`, simplified. Fails on overflow.
    pub fn checked_sub(self, other: Self) -> Result<Self> {
        let (a, b) = Self::common_denominator(self, other)?;
        let n = to_i32(a.numerator as i64 - b.numerator as i64, "difference")?;
        Ok(Self::new(n, a.denominator).simplify())
    }

    /// Closest fraction to `v` with `|numerator| <= i32::MAX`.
    ///
    /// Fails on NaN and on magnitudes that cannot be represented.
    pub fn from_f64(v: f64) -> Result<Self> {
        let (n, d) = continued_fraction(v.abs(), i32::MAX as u32).ok_or_else(|| {
            Error::InvalidArgument(format!("{} cannot be represented as a signed fraction", v))
        })?;
        let n = n as i32;
        Ok(Self::new(if v < 0.0 { -n } else { n }, d))
    }

    /// Value as a float. Fails if the denominator is 0.
    pub fn to_f64(self) -> Result<f64> {
        if self.denominator == 0 {
            return Err(Error::InvalidArgument(format!(
                "fraction {}/0 has a zero denominator",
                self.numerator
            )));
        }
        Ok(self.numerator as f64 / self.denominator as f64)
    }
}

impl UFraction {
    /// Create a fraction.
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Reduce to lowest terms. A zero denominator is left untouched.
    pub fn simplify(self) -> Self {
        if self.denominator == 0 {
            return self;
        }
        let divisor = gcd(self.numerator as u64, self.denominator as u64);
        if divisor <= 1 {
            return self;
        }
        Self {
            numerator: (self.numerator as u64 / divisor) as u32,
            denominator: (self.denominator as u64 / divisor) as u32,
        }
    }

    /// Closest fraction to `v` with both terms fitting in `u32`.
    ///
    /// Fails on NaN, negative values and values above `u32::MAX`.
    pub fn from_f64(v: f64) -> Result<Self> {
        let (n, d) = continued_fraction(v, u32::MAX).ok_or_else(|| {
            Error::InvalidArgument(format!("{} cannot be represented as an unsigned fraction", v))
        })?;
        Ok(Self::new(n, d))
    }

    /// Value as a float. Fails if the denominator is 0.
    pub fn to_f64(self) -> Result<f64> {
        if self.denominator == 0 {
            return Err(Error::InvalidArgument(format!(
                "fraction {}/0 has a zero denominator",
                self.numerator
            )));
        }
        Ok(self.numerator as f64 / self.denominator as f64)
    }

    /// Signed view, if the numerator fits in `i32`.
    pub fn to_signed(self) -> Result<Fraction> {
        Ok(Fraction::new(
            to_i32(self.numerator as i64, "numerator")?,
            self.denominator,
        ))
    }
}

/// Best rational approximation of a non-negative `v` using continued
/// fractions, with the numerator bounded by `max_numerator` and the
/// denominator by `u32::MAX`.
///
/// Returns `None` for NaN, negative or too large inputs.
fn continued_fraction(v: f64, max_numerator: u32) -> Option<(u32, u32)> {
    if v.is_nan() || v < 0.0 || v > max_numerator as f64 {
        return None;
    }

    // Largest denominator that keeps the numerator within bounds.
    let max_d = if v <= 1.0 {
        u32::MAX as f64
    } else {
        (max_numerator as f64 / v).floor()
    };

    let mut denominator: f64 = 1.0;
    let mut previous_d: f64 = 0.0;
    let mut numerator: f64 = v.round();
    let mut remainder = v - v.floor();

    for _ in 0..MAX_CONTINUED_FRACTION_TERMS {
        let exact = denominator * v;
        if exact > max_numerator as f64 {
            break;
        }
        numerator = exact.round();
        if exact == numerator {
            break;
        }
        remainder = 1.0 / remainder;
        let next_d = previous_d + remainder.floor() * denominator;
        if next_d > max_d {
            break;
        }
        previous_d = denominator;
        denominator = next_d;
        remainder -= remainder.floor();
    }

    Some((numerator as u32, denominator as u32))
}
