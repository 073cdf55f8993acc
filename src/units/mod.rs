use std::fmt;
use std::iter::Sum;

use bigdecimal::{BigDecimal, RoundingMode, Zero};
use num_bigint::BigInt;

/// Decimal places kept by every division, rounded half-up.
pub const DIVISION_SCALE: i64 = 20;

/// Decimal places of native coin amounts.
pub const NATIVE_DECIMAL_PLACES: i64 = 12;

/// Decimal places of CAT token amounts.
pub const CAT_DECIMAL_PLACES: i64 = 3;

const CAPACITY_UNITS: [&str; 6] = ["GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"];

/// Divides with the aggregator's rounding rules (20 places, half-up).
///
/// The caller guarantees a non-zero divisor.
pub fn div_rounded(numerator: &BigDecimal, denominator: &BigDecimal) -> BigDecimal {
    (numerator / denominator).with_scale_round(DIVISION_SCALE, RoundingMode::HalfUp)
}

/// Renders a decimal without exponent notation or trailing zeros.
pub fn decimal_string(value: &BigDecimal) -> String {
    value.normalized().to_plain_string()
}

fn kib() -> BigDecimal {
    BigDecimal::from(1024u32)
}

/// Storage capacity held in GiB as an exact decimal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd)]
pub struct Capacity {
    gib: BigDecimal,
}

impl Capacity {
    /// Converts a byte count into GiB.
    pub fn from_bytes(bytes: impl Into<BigInt>) -> Self {
        let bytes = BigDecimal::new(bytes.into(), 0);
        let gib_divisor = BigDecimal::from(1024u64 * 1024 * 1024);

        Self {
            gib: div_rounded(&bytes, &gib_divisor),
        }
    }

    /// Wraps an already converted GiB value.
    pub fn from_gib(gib: BigDecimal) -> Self {
        Self { gib }
    }

    pub fn zero() -> Self {
        Self {
            gib: BigDecimal::zero(),
        }
    }

    pub fn gib(&self) -> &BigDecimal {
        &self.gib
    }

    pub fn to_mib(&self) -> BigDecimal {
        &self.gib * kib()
    }

    /// Scales up to the largest unit below 1024 and formats with `precision` places.
    pub fn to_display_string(&self, precision: i64) -> String {
        let threshold = kib();
        let mut value = self.gib.clone();
        let mut unit = 0;
        while value >= threshold && unit < CAPACITY_UNITS.len() - 1 {
            value = div_rounded(&value, &threshold);
            unit += 1;
        }

        format!(
            "{} {}",
            value
                .with_scale_round(precision, RoundingMode::HalfUp)
                .to_plain_string(),
            CAPACITY_UNITS[unit],
        )
    }
}

impl Sum for Capacity {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Self {
            gib: iter.fold(BigDecimal::zero(), |acc, c| acc + c.gib),
        }
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string(2))
    }
}

/// Coin amount converted from raw minimal units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChiaAmount(BigDecimal);

impl ChiaAmount {
    /// Shifts the decimal point of `raw` left by `decimal_places`.
    pub fn from_raw(raw: impl Into<BigInt>, decimal_places: i64) -> Self {
        Self(BigDecimal::new(raw.into(), decimal_places))
    }

    pub fn from_raw_native(raw: impl Into<BigInt>) -> Self {
        Self::from_raw(raw, NATIVE_DECIMAL_PLACES)
    }

    pub fn value(&self) -> &BigDecimal {
        &self.0
    }
}

impl fmt::Display for ChiaAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&decimal_string(&self.0))
    }
}

/// On-disk to effective space factor for a plot of size `k`:
/// `0.7797 - 0.0004489 * (k - 32)`.
pub fn plot_size_factor(k: u8) -> BigDecimal {
    let base = BigDecimal::new(BigInt::from(7797), 4);
    let step = BigDecimal::new(BigInt::from(4489), 7);

    base - step * BigDecimal::from(i64::from(k) - 32)
}

/// Effective plot size in bytes: `(2k + 1) * 2^(k - 1) * factor(k)`.
pub fn effective_plot_size_bytes(k: u8) -> BigDecimal {
    let entries = BigDecimal::from(2 * u64::from(k) + 1);
    let shift = usize::from(k.saturating_sub(1));
    let table_size = BigDecimal::new(BigInt::from(1u8) << shift, 0);

    entries * table_size * plot_size_factor(k)
}

/// Effective capacity of a set of plots given as `(k, count)` pairs.
pub fn effective_plot_capacity(plots: impl IntoIterator<Item = (u8, u64)>) -> Capacity {
    let bytes = plots
        .into_iter()
        .fold(BigDecimal::zero(), |acc, (k, count)| {
            acc + effective_plot_size_bytes(k) * BigDecimal::from(count)
        });
    let gib_divisor = BigDecimal::from(1024u64 * 1024 * 1024);

    Capacity::from_gib(div_rounded(&bytes, &gib_divisor))
}
