//! Reader for the bz1 storage engine.
//!
//! bz1 packs many points per value: the `points` bucket has one child
//! bucket per series, and each child entry is a compressed block. A
//! block value starts with 8 bytes of block metadata (the minimum
//! timestamp, which decoding does not need) followed by a snappy raw
//! stream. The decompressed payload is a run of entries:
//!
//! ```text
//! entry := [timestamp:8 BE][data_len:4 BE][data:data_len]
//! ```
//!
//! where `data` is one field-value record. The shard-wide field schemas
//! live under `meta`/`fields` as snappy-compressed JSON.

use crate::store::Store;
use crate::{
    encoding, field, key, BadKeySnafu, BucketMissingSnafu, DecompressSnafu, Error,
    SchemaIndexSnafu, StoreSnafu,
};
use heed::RoTxn;
use migrate_types::{BatchPoints, Point};
use snafu::{OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use tokio::sync::mpsc;
use tracing::warn;

/// Bytes of block metadata preceding the compressed payload.
const BLOCK_HEADER_SIZE: usize = 8;

/// Bytes of header preceding each entry's data.
const ENTRY_HEADER_SIZE: usize = 8 + 4;

/// Drains every series of a bz1 shard into the point sink, one batch per
/// compressed block.
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

    let meta = store.bucket(rtxn, "meta")?.context(BucketMissingSnafu {
        shard: &shard,
        bucket: "meta",
    })?;
    let compressed = meta
        .get(rtxn, b"fields")
        .context(StoreSnafu { path: store.path() })?
        .context(BucketMissingSnafu {
            shard: &shard,
            bucket: "meta/fields",
        })?;
    let raw = snap::raw::Decoder::new()
        .decompress_vec(compressed)
        .context(DecompressSnafu)?;
    let schemas: BTreeMap<String, field::FieldSet> =
        serde_json::from_slice(&raw).context(SchemaIndexSnafu)?;

    store.bucket(rtxn, "points")?.context(BucketMissingSnafu {
        shard: &shard,
        bucket: "points",
    })?;

    for series in store.child_bucket_names(rtxn, "points")? {
        let parsed = match key::parse_series_key(series.as_bytes())
            .context(BadKeySnafu { key: &series })
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
        let Some(bucket) = store.child_bucket(rtxn, "points", &series)? else {
            continue;
        };

        for entry in bucket.iter(rtxn).context(StoreSnafu { path: store.path() })? {
            let (_, block) = entry.context(StoreSnafu { path: store.path() })?;

            if block.len() < BLOCK_HEADER_SIZE {
                warn!(series = %series, len = block.len(), "skipping block with short header");
                continue;
            }
            // block[..8] is the block min-time; decoding does not use it
            let payload = match snap::raw::Decoder::new().decompress_vec(&block[BLOCK_HEADER_SIZE..])
            {
                Ok(payload) => payload,
                Err(error) => {
                    warn!(%error, series = %series, "skipping undecompressable block");
                    continue;
                }
            };

            let Some(batch) =
                decode_block(&payload, &parsed, set, database, retention_policy, &series)
            else {
                continue;
            };
            if sink.send(batch).is_err() {
                return Ok(ControlFlow::Break(()));
            }
        }
    }

    Ok(ControlFlow::Continue(()))
}

/// Decodes one decompressed block into a batch.
///
/// Returns `None` when the entry framing is corrupt; a single entry
/// whose field record fails to decode is dropped with a diagnostic while
/// the rest of the block survives.
fn decode_block(
    payload: &[u8],
    parsed: &key::ParsedSeriesKey,
    set: &field::FieldSet,
    database: &str,
    retention_policy: &str,
    series: &str,
) -> Option<BatchPoints> {
    let mut batch = BatchPoints {
        database: database.to_owned(),
        retention_policy: retention_policy.to_owned(),
        points: Vec::new(),
    };

    let mut buf = payload;
    while !buf.is_empty() {
        if buf.len() < ENTRY_HEADER_SIZE {
            warn!(series = %series, trailing = buf.len(), "dropping block with truncated entry header");
            return None;
        }
        let time = encoding::u64_be(buf).ok()? as i64;
        let data_len = encoding::u32_be(&buf[8..]).ok()? as usize;
        let end = ENTRY_HEADER_SIZE + data_len;
        if buf.len() < end {
            warn!(
                series = %series,
                want = end,
                have = buf.len(),
                "dropping block with truncated entry data"
            );
            return None;
        }

        match field::decode_values(&parsed.measurement, set, &buf[ENTRY_HEADER_SIZE..end]) {
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
                raw = ?&buf[ENTRY_HEADER_SIZE..end],
                "dropping undecodable entry"
            ),
        }
        buf = &buf[end..];
    }

    Some(batch)
}
