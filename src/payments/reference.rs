//! Transaction references of the form `ORDER{order_id}_{epoch_millis}`.
//!
//! The reference is the only link between an asynchronous callback and the
//! order it settles. The timestamp suffix exists for uniqueness at the
//! provider and is never validated on the way back in.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static REFERENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ORDER(\d+)_(\d+)$").expect("reference pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReference {
    pub order_id: i64,
    pub timestamp_millis: i64,
}

impl TransactionReference {
    pub fn new(order_id: i64, at: DateTime<Utc>) -> Self {
        Self {
            order_id,
            timestamp_millis: at.timestamp_millis(),
        }
    }

    pub fn generate(order_id: i64) -> Self {
        Self::new(order_id, Utc::now())
    }

    /// Returns `None` when the string does not carry a positive order id.
    pub fn parse(raw: &str) -> Option<Self> {
        let captures = REFERENCE_RE.captures(raw.trim())?;
        let order_id: i64 = captures.get(1)?.as_str().parse().ok()?;
        let timestamp_millis: i64 = captures.get(2)?.as_str().parse().ok()?;
        if order_id <= 0 {
            return None;
        }
        Some(Self {
            order_id,
            timestamp_millis,
        })
    }
}

impl fmt::Display for TransactionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ORDER{}_{}", self.order_id, self.timestamp_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_order_id_and_millis() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(
            TransactionReference::new(42, at).to_string(),
            "ORDER42_1700000000123"
        );
    }

    #[test]
    fn parses_back_the_order_id() {
        let reference = TransactionReference::parse("ORDER7_1700000000000").unwrap();
        assert_eq!(reference.order_id, 7);
        assert_eq!(reference.timestamp_millis, 1_700_000_000_000);
    }

    #[test]
    fn rejects_malformed_references() {
        for raw in [
            "",
            "ORDER_1700000000000",
            "ORDER42",
            "order42_1",
            "ORDERabc_1",
            "ORDER0_1",
            "ORDER42_1_extra",
            "ORDER99999999999999999999_1",
        ] {
            assert!(TransactionReference::parse(raw).is_none(), "{}", raw);
        }
    }
}
