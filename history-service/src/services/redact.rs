//! Redaction engine - field-level transformation applied before any row
//! leaves the trust boundary.

use serde_json::{Map, Value};

use crate::utils::crypto;

/// Field-name substrings that identify PII or secret material. Any matching
/// field is dropped (or, for correlation keys like `vin`, pseudonymized).
pub const DENYLIST_SUBSTRINGS: &[&str] = &[
    "email",
    "phone",
    "name",
    "address",
    "street",
    "token",
    "password",
    "otp",
    "secret",
    "ssn",
    "iban",
    "ip_",
    "user_agent",
];

/// Marker key stamped on every redacted output so downstream consumers can
/// assert the invariant instead of inferring it from absence.
pub const REDACTED_MARKER: &str = "redacted";

/// Fields that are useful correlation keys but must not leave in the clear;
/// they are replaced with a keyed hash instead of dropped.
const PSEUDONYMIZE_FIELDS: &[&str] = &["vin"];

#[derive(Debug, Clone, Copy)]
pub enum RedactMode<'a> {
    /// Keep only the named fields. Used when the output schema is small and
    /// fixed.
    Allowlist(&'a [&'a str]),
    /// Drop any field whose name contains a denylist substring. Used for
    /// ad-hoc exports of loosely-typed rows.
    DenylistBySubstring,
}

fn is_denylisted(key: &str) -> bool {
    let key = key.to_lowercase();
    DENYLIST_SUBSTRINGS.iter().any(|s| key.contains(s))
}

fn is_pseudonymized(key: &str) -> bool {
    PSEUDONYMIZE_FIELDS.iter().any(|f| key.eq_ignore_ascii_case(f))
}

/// Redact one row (a JSON object). Non-object values pass through untouched
/// apart from being wrapped with the marker.
pub fn redact(row: &Value, mode: RedactMode<'_>, secret: &str) -> Result<Value, anyhow::Error> {
    let mut out = Map::new();

    if let Some(obj) = row.as_object() {
        for (key, value) in obj {
            if is_pseudonymized(key) {
                let raw = value.as_str().map(str::to_owned).unwrap_or_else(|| value.to_string());
                out.insert(
                    key.clone(),
                    Value::String(crypto::derive(secret, "pseudonym", &raw)?),
                );
                continue;
            }
            let keep = match mode {
                RedactMode::Allowlist(fields) => fields.contains(&key.as_str()),
                RedactMode::DenylistBySubstring => !is_denylisted(key),
            };
            if keep {
                out.insert(key.clone(), value.clone());
            }
        }
    }

    out.insert(REDACTED_MARKER.to_string(), Value::Bool(true));
    Ok(Value::Object(out))
}

/// Denylist filter for audit metadata: drops matching keys recursively.
/// Infallible by design so audit-event construction can never fail on it.
pub fn strip_denylisted(metadata: &Value) -> Value {
    match metadata {
        Value::Object(obj) => {
            let mut out = Map::new();
            for (key, value) in obj {
                if is_denylisted(key) {
                    continue;
                }
                out.insert(key.clone(), strip_denylisted(value));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(strip_denylisted).collect()),
        other => other.clone(),
    }
}
