//! Resource quantity normalization.
//!
//! Kubernetes accepts quantities only as strings ("500m", "2Gi"). Specs
//! written by older operator releases stored cpu and memory as bare JSON
//! numbers, so every leaf is normalized to the canonical string form before
//! it reaches the API server.

use serde_json::Value;

use crate::controller::error::{Error, Result};

const BINARY_SUFFIXES: [&str; 6] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
const DECIMAL_SUFFIXES: [&str; 7] = ["m", "k", "M", "G", "T", "P", "E"];

/// Float noise allowed when converting to milli-units (0.1 * 1000 is not 100)
const MILLI_TOLERANCE: f64 = 1e-6;

/// Convert an integral float, refusing values that would saturate.
fn integral(value: f64) -> Result<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is already out of range
    if value >= i64::MIN as f64 && value < i64::MAX as f64 {
        Ok(value as i64)
    } else {
        Err(Error::Validation(format!("quantity {} is out of range", value)))
    }
}

/// A raw cpu/memory value as found in a stored document.
#[derive(Clone, Debug, PartialEq)]
pub enum LeafValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl LeafValue {
    /// Classify a JSON value. Objects, arrays, booleans and null are not leaves.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(LeafValue::Integer)
                .or_else(|| n.as_f64().map(LeafValue::Float)),
            Value::String(s) => Some(LeafValue::Text(s.clone())),
            _ => None,
        }
    }

    /// Canonical quantity string for this value.
    ///
    /// Integers are kept as-is, fractional floats become milli-units and
    /// strings must already match the quantity grammar. A float that does not
    /// fit an i64 or has sub-milli precision is rejected rather than rounded.
    pub fn canonical(&self) -> Result<String> {
        match self {
            LeafValue::Integer(n) => Ok(n.to_string()),
            LeafValue::Float(f) => {
                if !f.is_finite() {
                    return Err(Error::Validation(format!("non-finite quantity {}", f)));
                }
                if f.fract() == 0.0 {
                    return Ok(format!("{}", integral(*f)?));
                }
                let milli = f * 1000.0;
                let rounded = milli.round();
                if (milli - rounded).abs() > MILLI_TOLERANCE {
                    return Err(Error::Validation(format!(
                        "quantity {} is finer than milli precision",
                        f
                    )));
                }
                Ok(format!("{}m", integral(rounded)?))
            }
            LeafValue::Text(s) => {
                let trimmed = s.trim();
                if is_quantity(trimmed) {
                    Ok(trimmed.to_string())
                } else {
                    Err(Error::Validation(format!("invalid quantity '{}'", s)))
                }
            }
        }
    }

    /// Whether this leaf is already stored in canonical form.
    pub fn is_canonical(&self) -> bool {
        match self {
            LeafValue::Text(s) => self.canonical().is_ok_and(|c| &c == s),
            _ => false,
        }
    }
}

/// Check a string against the Kubernetes quantity grammar:
/// `[+-]number[suffix]` where suffix is a binary SI, decimal SI or
/// `e`/`E` exponent suffix.
pub fn is_quantity(s: &str) -> bool {
    let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);

    let number_end = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(number_end);

    if !is_number(number) {
        return false;
    }

    suffix.is_empty()
        || BINARY_SUFFIXES.contains(&suffix)
        || DECIMAL_SUFFIXES.contains(&suffix)
        || is_exponent(suffix)
}

fn is_number(s: &str) -> bool {
    let mut parts = s.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let frac = parts.next();
    if frac.is_some_and(|f| f.contains('.')) {
        return false;
    }
    let digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    match frac {
        None => !whole.is_empty() && digits(whole),
        Some(f) => (!whole.is_empty() || !f.is_empty()) && digits(whole) && digits(f),
    }
}

fn is_exponent(s: &str) -> bool {
    let Some(rest) = s.strip_prefix(['e', 'E']) else {
        return false;
    };
    let digits = rest.strip_prefix(['+', '-']).unwrap_or(rest);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}
