#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

//! Data model shared by the legacy shard decoder and the write sinks.
//!
//! These types describe the *logical* content of an InfluxDB 0.9.x data
//! directory: the replayed catalog (databases and their retention policies)
//! and the decoded time-series data, batched the way the legacy storage
//! engines batch it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// A set of tag key/value pairs attached to a series, escapes resolved.
pub type TagSet = BTreeMap<String, String>;

/// A database reconstructed from the metadata log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Database {
    /// The database name.
    pub name: String,
    /// Retention policies in log-replay order.
    pub policies: Vec<RetentionPolicy>,
    /// Name of the default retention policy; empty when never set.
    pub default_policy: String,
}

/// A named duration + replication factor governing a subset of a
/// database's data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub name: String,
    /// How long points are kept. Zero means "keep forever".
    pub duration: Duration,
    /// Replication factor. Only meaningful in clustered deployments.
    pub replica_n: u32,
}

/// A single typed field value.
///
/// String payloads are kept as raw bytes: the legacy engines never
/// validated UTF-8 on the write path, and the migration must round-trip
/// whatever was stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    String(Vec<u8>),
}

/// One decoded point of one series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub measurement: String,
    /// Nanoseconds since the Unix epoch.
    pub time: i64,
    pub tags: TagSet,
    pub fields: BTreeMap<String, FieldValue>,
}

/// A group of points destined for one database/retention-policy pair.
///
/// The grouping unit follows the source engine: the b1 reader emits one
/// batch per series bucket, the bz1 reader one batch per compressed block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchPoints {
    pub database: String,
    pub retention_policy: String,
    pub points: Vec<Point>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_value_round_trips_through_serde() {
        let fields: BTreeMap<String, FieldValue> = [
            ("f".to_string(), FieldValue::Float(3.25)),
            ("i".to_string(), FieldValue::Integer(-5)),
            ("b".to_string(), FieldValue::Boolean(true)),
            ("s".to_string(), FieldValue::String(b"hi".to_vec())),
        ]
        .into_iter()
        .collect();

        let json = serde_json::to_string(&fields).unwrap();
        let back: BTreeMap<String, FieldValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(fields, back);
    }

    #[test]
    fn default_database_has_no_policies() {
        let db = Database {
            name: "db0".into(),
            ..Default::default()
        };
        assert!(db.policies.is_empty());
        assert!(db.default_policy.is_empty());
    }
}
