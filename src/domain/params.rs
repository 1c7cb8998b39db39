//! Parameter maps and the fingerprints derived from them.
//!
//! A parameter map is an insertion-ordered JSON object (`serde_json` is built
//! with `preserve_order`). Fingerprints serialise the map as-is, so two maps
//! holding the same values under a different key order produce different
//! fingerprints. Callers must not rely on fingerprint equality across such
//! maps.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flat `name -> scalar/string/boolean` map supplied by the customiser.
pub type Parameters = Map<String, Value>;

/// Canonical key derived from a parameter map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive the fingerprint of `parameters`.
    pub fn of(parameters: &Parameters) -> Self {
        Self(Value::Object(parameters.clone()).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Convert an `f64` into a JSON number, preferring the integer form when the
/// value is integral so `12.0` fingerprints the same as a caller-supplied `12`.
pub fn number_value(value: f64) -> Value {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

/// Build a parameter map from `(name, value)` pairs, keeping their order.
pub fn parameters<I, K, V>(pairs: I) -> Parameters
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}
