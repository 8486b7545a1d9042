//! Lenient scalar deserialization.
//!
//! Harness configuration arrives as untyped bags where integer-typed fields
//! may be JSON numbers, floats that should be integers, or numeric strings.
//! The deserializers here accept all three, mirroring the leniency the query
//! response parser applies to server-side numerics.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Deserializer, de};

/// Helper for untagged deserialization of a lenient integer.
///
/// Serde tries each variant in order: integer, float, then string.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    #[allow(clippy::cast_possible_truncation)]
    fn into_i64<E: de::Error>(self) -> Result<i64, E> {
        match self {
            Scalar::Int(n) => Ok(n),
            Scalar::Float(f) if f.is_finite() => Ok(f as i64),
            Scalar::Float(f) => Err(E::custom(format!("non-finite number {f}"))),
            Scalar::Text(s) if s.is_empty() => Ok(0),
            Scalar::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|e| E::custom(format!("invalid integer {s:?}: {e}"))),
        }
    }
}

/// Deserialize an `i64` from a number, float, or numeric string.
///
/// # Errors
///
/// Returns an error when the value is none of the accepted shapes.
pub fn i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Scalar::deserialize(deserializer)?.into_i64()
}

/// Deserialize a `u64` from a number, float, or numeric string.
///
/// # Errors
///
/// Returns an error on negative or non-numeric input.
#[allow(clippy::cast_sign_loss)]
pub fn u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let n = Scalar::deserialize(deserializer)?.into_i64::<D::Error>()?;
    if n < 0 {
        return Err(de::Error::custom(format!("expected unsigned value, got {n}")));
    }
    Ok(n as u64)
}

/// Deserialize a `u32` from a number, float, or numeric string.
///
/// # Errors
///
/// Returns an error on negative, oversized, or non-numeric input.
pub fn u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let n = u64(deserializer)?;
    u32::try_from(n).map_err(|_| de::Error::custom(format!("value {n} out of range for u32")))
}

/// Deserialize a `usize` from a number, float, or numeric string.
///
/// # Errors
///
/// Returns an error on negative or non-numeric input.
pub fn usize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    let n = u64(deserializer)?;
    usize::try_from(n).map_err(|_| de::Error::custom(format!("value {n} out of range for usize")))
}

/// Deserialize a name → count map whose values are lenient unsigned integers.
///
/// # Errors
///
/// Returns an error when any value is negative or non-numeric.
#[allow(clippy::cast_sign_loss)]
pub fn u64_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<FxHashMap<String, u64>, D::Error> {
    let raw: FxHashMap<String, Scalar> = FxHashMap::deserialize(deserializer)?;
    let mut out = FxHashMap::default();
    for (k, v) in raw {
        let n = v.into_i64::<D::Error>()?;
        if n < 0 {
            return Err(de::Error::custom(format!(
                "cardinality for {k:?} must not be negative, got {n}"
            )));
        }
        out.insert(k, n as u64);
    }
    Ok(out)
}
