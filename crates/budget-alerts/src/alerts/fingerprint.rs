//! Content fingerprints used as the ledger's deduplication key.
//!
//! Payloads are canonicalized before hashing: keys are ordered (RFC 8785 via
//! `serde_jcs`), monetary amounts are rendered with exactly two decimals, and an
//! explicit `Null` is kept distinct from an absent key.

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Lowercase, 64 character SHA-256 digest identifying one alert for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct DispatchFingerprint(String);

impl DispatchFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accepts an already computed digest, e.g. when reading ledger rows back.
    pub fn from_hex(value: &str) -> Option<Self> {
        let valid = value.len() == 64
            && value
                .bytes()
                .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte));
        valid.then(|| Self(value.to_string()))
    }
}

impl fmt::Display for DispatchFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value stored in a [`CanonicalPayload`].
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalValue {
    Null,
    Flag(bool),
    Integer(i64),
    /// Monetary or ratio value, serialized as a fixed two-decimal string.
    Amount(f64),
    Text(String),
    List(Vec<CanonicalValue>),
    Object(CanonicalPayload),
}

impl CanonicalValue {
    /// Converts arbitrary JSON, treating non-integral numbers as amounts.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(flag) => Self::Flag(*flag),
            Value::Number(number) => match number.as_i64() {
                Some(integer) => Self::Integer(integer),
                None => Self::Amount(number.as_f64().unwrap_or_default()),
            },
            Value::String(text) => Self::Text(text.clone()),
            Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => Self::Object(CanonicalPayload(
                map.iter()
                    .map(|(key, value)| (key.clone(), Self::from_json(value)))
                    .collect(),
            )),
        }
    }
}

impl From<&str> for CanonicalValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CanonicalValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for CanonicalValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for CanonicalValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl<T: Into<CanonicalValue>> From<Option<T>> for CanonicalValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

impl Serialize for CanonicalValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CanonicalValue::Null => serializer.serialize_none(),
            CanonicalValue::Flag(flag) => serializer.serialize_bool(*flag),
            CanonicalValue::Integer(integer) => serializer.serialize_i64(*integer),
            CanonicalValue::Amount(amount) => serializer.serialize_str(&format_amount(*amount)),
            CanonicalValue::Text(text) => serializer.serialize_str(text),
            CanonicalValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            CanonicalValue::Object(payload) => payload.serialize(serializer),
        }
    }
}

/// Key-ordered description of "what would be sent", independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalPayload(BTreeMap<String, CanonicalValue>);

impl CanonicalPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<CanonicalValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<CanonicalValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn with_amount(self, key: impl Into<String>, amount: f64) -> Self {
        self.with(key, CanonicalValue::Amount(amount))
    }

    pub fn get(&self, key: &str) -> Option<&CanonicalValue> {
        self.0.get(key)
    }

    pub fn from_json(value: &Value) -> Self {
        match CanonicalValue::from_json(value) {
            CanonicalValue::Object(payload) => payload,
            other => Self::new().with("value", other),
        }
    }

    /// JSON snapshot stored alongside ledger records for audits.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for CanonicalPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Errors raised while canonicalizing a payload.
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("failed to canonicalize payload: {0}")]
    Canonicalization(String),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FingerprintInput<'a> {
    event_id: &'a str,
    recipient: &'a str,
    payload: &'a CanonicalPayload,
}

/// Hashes the canonical form of `(event_id, recipient, payload)` with SHA-256.
pub fn fingerprint(
    event_id: &str,
    recipient: &str,
    payload: &CanonicalPayload,
) -> Result<DispatchFingerprint, FingerprintError> {
    let input = FingerprintInput {
        event_id,
        recipient,
        payload,
    };
    let bytes = serde_jcs::to_vec(&input)
        .map_err(|err| FingerprintError::Canonicalization(err.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(DispatchFingerprint(hex_encode(&hasher.finalize())))
}

/// Rounds to whole cents, half away from zero. Non-finite amounts count as zero.
///
/// Every place that shows or hashes an amount goes through this, so the rendered
/// figure and the deduplicated one never disagree.
pub(crate) fn amount_cents(amount: f64) -> i64 {
    if amount.is_finite() {
        (amount * 100.0).round() as i64
    } else {
        0
    }
}

/// Two-decimal form of [`amount_cents`]; `-0.00` collapses to `0.00`.
pub(crate) fn format_amount(amount: f64) -> String {
    let cents = amount_cents(amount);
    let sign = if cents < 0 { "-" } else { "" };
    let magnitude = cents.unsigned_abs();
    format!("{sign}{}.{:02}", magnitude / 100, magnitude % 100)
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}
