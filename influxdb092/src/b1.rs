//! Reader for the b1 storage engine.
//!
//! A b1 shard stores one point per key: every series has its own
//! top-level bucket, named by the series key, whose entries map an
//! 8-byte big-endian nanosecond timestamp to one field-value record.
//! Next to the series buckets sit the reserved bookkeeping buckets;
//! `fields` holds one binary schema record per measurement.

use crate::store::Store;
use crate::{encoding, field, key, BadKeySnafu, BucketMissingSnafu, Error, StoreSnafu};
use heed::RoTxn;
use migrate_types::{BatchPoints, Point};
use snafu::{OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use tokio::sync::mpsc;
use tracing::warn;

/// Bookkeeping buckets that are never series buckets.
const RESERVED_BUCKETS: [&str; 4] = ["fields", "series", "meta", "wal"];

/// Drains every series bucket of a b1 shard into the point sink, one
/// batch per series bucket.
///
/// Returns `ControlFlow::Break` when the sink's consumer went away.
pub(crate) fn read(
    store: &Store,
    rtxn: &RoTxn<'_>,
    database: &str,
    retention_policy: &str,
    sink: &mpsc::UnboundedSender<BatchPoints>,
) -> Result<ControlFlow<()>, Error> {
    let shard = store.path().display().to_string();
    let fields = store.bucket(rtxn, "fields")?.context(BucketMissingSnafu {
        shard: &shard,
        bucket: "fields",
    })?;

    let mut schemas: BTreeMap<String, field::FieldSet> = BTreeMap::new();
    for entry in fields.iter(rtxn).context(StoreSnafu { path: store.path() })? {
        let (name, value) = entry.context(StoreSnafu { path: store.path() })?;
        let measurement = String::from_utf8_lossy(name).into_owned();
        let set = field::FieldSet::from_binary(&measurement, value)?;
        schemas.insert(measurement, set);
    }

    for bucket_name in store.bucket_names(rtxn)? {
        if RESERVED_BUCKETS.contains(&bucket_name.as_str()) {
            continue;
        }

        let parsed = match key::parse_series_key(bucket_name.as_bytes())
            .context(BadKeySnafu { key: &bucket_name })
        {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!(%error, shard = %shard, "skipping series bucket");
                continue;
            }
        };
        let Some(set) = schemas.get(&parsed.measurement) else {
            warn!(
                measurement = %parsed.measurement,
                shard = %shard,
                "measurement missing from field schemas, skipping series bucket"
            );
            continue;
        };
        let Some(bucket) = store.bucket(rtxn, &bucket_name)? else {
            continue;
        };

        let mut batch = BatchPoints {
            database: database.to_owned(),
            retention_policy: retention_policy.to_owned(),
            points: Vec::new(),
        };
        for entry in bucket.iter(rtxn).context(StoreSnafu { path: store.path() })? {
            let (ts_key, value) = entry.context(StoreSnafu { path: store.path() })?;
            let time = match encoding::u64_be(ts_key) {
                Ok(ts) => ts as i64,
                Err(error) => {
                    warn!(%error, measurement = %parsed.measurement, "dropping entry with short timestamp key");
                    continue;
                }
            };
            match field::decode_values(&parsed.measurement, set, value) {
                Ok(fields) => batch.points.push(Point {
                    measurement: parsed.measurement.clone(),
                    time,
                    tags: parsed.tags.clone(),
                    fields,
                }),
                Err(error) => warn!(
                    %error,
                    measurement = %parsed.measurement,
                    tags = ?parsed.tags,
                    time,
                    raw = ?value,
                    "dropping undecodable entry"
                ),
            }
        }

        if sink.send(batch).is_err() {
            return Ok(ControlFlow::Break(()));
        }
    }

    Ok(ControlFlow::Continue(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use crate::testutil;
    use migrate_types::FieldValue;

    fn schema_record(fields: &[(u8, &str, FieldType)]) -> Vec<u8> {
        testutil::encode_schema(fields)
    }

    fn entry(id: u8, v: f64) -> Vec<u8> {
        let mut buf = vec![id];
        buf.extend_from_slice(&v.to_bits().to_be_bytes());
        buf
    }

    #[test]
    fn reads_one_batch_per_series_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1");

        testutil::write_store(&path, |env, wtxn| {
            testutil::put(
                env,
                wtxn,
                "fields",
                b"cpu",
                &schema_record(&[(1, "temp", FieldType::Float)]),
            );
            testutil::create_bucket(env, wtxn, "series");
            testutil::create_bucket(env, wtxn, "wal");
            testutil::put(
                env,
                wtxn,
                "cpu,host=h1",
                &1_700_000_000_000_000_000u64.to_be_bytes(),
                &entry(1, 23.5),
            );
            testutil::put(
                env,
                wtxn,
                "cpu,host=h2",
                &42u64.to_be_bytes(),
                &entry(1, -1.0),
            );
            // unknown measurement: skipped with a diagnostic
            testutil::put(env, wtxn, "mem,host=h1", &7u64.to_be_bytes(), &entry(1, 0.5));
        });

        let store = Store::open(&path).unwrap();
        let rtxn = store.begin().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let flow = read(&store, &rtxn, "db", "rp", &tx).unwrap();
        assert_eq!(flow, ControlFlow::Continue(()));
        drop(tx);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.database, "db");
        assert_eq!(first.retention_policy, "rp");
        assert_eq!(first.points.len(), 1);
        assert_eq!(first.points[0].measurement, "cpu");
        assert_eq!(first.points[0].time, 1_700_000_000_000_000_000);
        assert_eq!(first.points[0].tags["host"], "h1");
        assert_eq!(first.points[0].fields["temp"], FieldValue::Float(23.5));

        let second = rx.try_recv().unwrap();
        assert_eq!(second.points[0].tags["host"], "h2");

        // the mem bucket was skipped
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn missing_fields_bucket_is_fatal_for_the_shard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1");

        testutil::write_store(&path, |env, wtxn| {
            testutil::put(env, wtxn, "cpu", &1u64.to_be_bytes(), &entry(1, 1.0));
        });

        let store = Store::open(&path).unwrap();
        let rtxn = store.begin().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = read(&store, &rtxn, "db", "rp", &tx).unwrap_err();
        assert!(matches!(
            err,
            Error::BucketMissing { ref bucket, .. } if bucket == "fields"
        ));
    }
}
