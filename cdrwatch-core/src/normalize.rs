//! Raw record normalization
//!
//! Maps positional and keyed portal rows onto [`CanonicalRecord`]. Keyed rows
//! name the same field differently depending on the endpoint, so each
//! canonical field tries a list of candidate keys in order.

use crate::types::{CanonicalRecord, RawRecord};

/// Joins account, caller and time into a record id
pub const ID_SEPARATOR: char = '|';

const CALLER_KEYS: &[&str] = &["cli", "source", "caller", "from"];
const CALLEE_KEYS: &[&str] = &["to", "destination"];
const TIME_KEYS: &[&str] = &["time", "timestamp", "start_time"];
const DURATION_KEYS: &[&str] = &["duration"];
const TYPE_KEYS: &[&str] = &["type", "status"];

/// Normalize one raw row for `account_identifier`.
///
/// Missing fields become empty strings, so every positional or keyed row
/// yields a record, including one whose id is just `account||`. Values that
/// are neither shape never become a [`RawRecord`] (see
/// [`RawRecord::from_json`]).
pub fn normalize(raw: &RawRecord, account_identifier: &str) -> Option<CanonicalRecord> {
    let [caller, callee, time, duration, kind] = match raw {
        RawRecord::Positional(cells) => {
            let at = |i: usize| cells.get(i).map(|c| c.trim().to_string()).unwrap_or_default();
            [at(0), at(1), at(2), at(3), at(4)]
        }
        RawRecord::Keyed(fields) => {
            let first = |keys: &[&str]| {
                keys.iter()
                    .filter_map(|k| fields.get(*k))
                    .map(|v| v.trim())
                    .find(|v| !v.is_empty())
                    .unwrap_or_default()
                    .to_string()
            };
            [
                first(CALLER_KEYS),
                first(CALLEE_KEYS),
                first(TIME_KEYS),
                first(DURATION_KEYS),
                first(TYPE_KEYS),
            ]
        }
    };

    Some(CanonicalRecord {
        id: record_id(account_identifier, &caller, &time),
        caller_number: caller,
        callee_number: callee,
        time_label: time,
        duration_label: duration,
        type_label: kind,
        account_identifier: account_identifier.to_string(),
    })
}

/// Normalize a batch in row order
pub fn normalize_all(rows: &[RawRecord], account_identifier: &str) -> Vec<CanonicalRecord> {
    rows.iter()
        .filter_map(|raw| normalize(raw, account_identifier))
        .collect()
}

/// Deterministic identity key for a call.
pub fn record_id(account_identifier: &str, caller: &str, time: &str) -> String {
    format!(
        "{}{sep}{}{sep}{}",
        account_identifier,
        caller,
        time,
        sep = ID_SEPARATOR
    )
}
