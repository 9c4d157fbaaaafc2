//! Core domain types for cdrwatch
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Account** | One portal login (identifier + secret), owned by exactly one worker |
//! | **RawRecord** | A row exactly as the portal returned it, list- or map-shaped |
//! | **CanonicalRecord** | The normalized call record, with a deterministic identity key |
//! | **Seen-set** | Process-wide set of identity keys that were already emitted |
//!
//! The portal exposes no unique record identifier, so a record's identity is
//! derived from `(account, caller, time)`. Two rows describing the same call
//! always produce byte-identical ids.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================
// Account
// ============================================

/// Credentials for one portal account.
///
/// Immutable for the process lifetime. The secret never appears in `Debug`
/// output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    identifier: String,
    secret: String,
}

impl Account {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }

    /// Login identifier (usually an email address)
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .finish()
    }
}

// ============================================
// Raw records
// ============================================

/// A row as returned by the portal, before normalization.
///
/// JSON rows may be arrays (positional) or objects (keyed). HTML table rows
/// are always positional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawRecord {
    /// Field values in portal column order: caller, callee, time, duration, type
    Positional(Vec<String>),
    /// Field values under portal-defined key names
    Keyed(BTreeMap<String, String>),
}

impl RawRecord {
    /// Convert one JSON row into a raw record.
    ///
    /// Returns `None` for scalar rows, which carry no fields. Object entries
    /// whose value is `null` or an empty string are dropped so that key
    /// fallback moves on to the next candidate.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;

        match value {
            Value::Array(items) => Some(RawRecord::Positional(
                items.iter().map(json_cell_text).collect(),
            )),
            Value::Object(map) => Some(RawRecord::Keyed(
                map.iter()
                    .map(|(k, v)| (k.clone(), json_cell_text(v)))
                    .filter(|(_, v)| !v.is_empty())
                    .collect(),
            )),
            _ => None,
        }
    }
}

/// Text of a JSON cell: strings verbatim, `null` empty, everything else as JSON.
fn json_cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================
// Canonical records
// ============================================

/// A normalized call detail record.
///
/// Produced by [`crate::normalize::normalize`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// `account|caller|time`
    pub id: String,
    pub caller_number: String,
    pub callee_number: String,
    pub time_label: String,
    pub duration_label: String,
    pub type_label: String,
    pub account_identifier: String,
}
