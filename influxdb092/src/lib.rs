#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

//! Decoder for the on-disk layout of InfluxDB 0.9.x.
//!
//! This crate reads a legacy data directory and turns it back into
//! logical records for re-ingestion into a modern instance:
//!
//! 1. the metadata store at `meta/raft.db` is replayed into a catalog of
//!    [`Database`] records;
//! 2. every shard file under `data/<db>/<rp>/` is opened read-only, its
//!    engine (`b1` or `bz1`) detected, and its series decoded into
//!    [`BatchPoints`].
//!
//! Both outputs stream through caller-provided channels; see [`decode`].
//! This is a one-shot migration reader: nothing here writes to the
//! legacy store.

use migrate_types::{BatchPoints, Database};
use snafu::Snafu;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info};

mod b1;
mod bz1;
mod encoding;
pub mod escape;
pub mod field;
pub mod key;
mod meta;
mod shard;
mod store;

/// Errors surfaced while decoding a legacy data directory.
///
/// Severity depends on where an error arises: entry-level damage is
/// logged and skipped by the readers, shard-level damage skips the
/// shard, and only [`Error::UnknownEngine`] (or a failure to replay the
/// metadata store) aborts the migration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("cannot open store {}: {source}", path.display()))]
    Open { path: PathBuf, source: heed::Error },

    #[snafu(display("store read failed on {}: {source}", path.display()))]
    Store { path: PathBuf, source: heed::Error },

    #[snafu(display("shard {shard} has no {bucket} bucket"))]
    BucketMissing { shard: String, bucket: String },

    #[snafu(display("buffer too short: want {want} bytes, have {have}"))]
    ShortBuffer { want: usize, have: usize },

    #[snafu(display(
        "truncated value record in measurement {measurement}: field id {field_id} wants {want} bytes, {have} remain"
    ))]
    Truncated {
        measurement: String,
        field_id: u8,
        want: usize,
        have: usize,
    },

    #[snafu(display("measurement {measurement} has unknown field type tag {type_tag}"))]
    BadFieldType { measurement: String, type_tag: i32 },

    #[snafu(display("bad series key {key:?}: {source}"))]
    BadKey { key: String, source: key::Error },

    #[snafu(display("unknown shard engine format {format:?}"))]
    UnknownEngine { format: String },

    #[snafu(display("corrupt compressed data: {source}"))]
    Decompress { source: snap::Error },

    #[snafu(display("corrupt field schema record for measurement {measurement}: {source}"))]
    SchemaRecord {
        measurement: String,
        source: prost::DecodeError,
    },

    #[snafu(display("corrupt shard field index: {source}"))]
    SchemaIndex { source: serde_json::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Decodes the legacy data directory at `datapath`.
///
/// The catalog is replayed first and emitted in full on `catalog_sink`;
/// that stream closes before the first shard is opened. Decoded point
/// batches then stream on `point_sink`, shard by shard. Dropping a
/// receiver cancels the decoder cooperatively at the next batch
/// boundary, without error.
///
/// Shards that cannot be read are skipped with a diagnostic. An error is
/// returned only for damage the migration must not paper over: a
/// metadata store that cannot be replayed, or a shard in an unknown
/// storage format.
pub fn decode(
    datapath: impl AsRef<Path>,
    catalog_sink: mpsc::UnboundedSender<Database>,
    point_sink: mpsc::UnboundedSender<BatchPoints>,
) -> Result<()> {
    let datapath = datapath.as_ref();

    let databases = meta::replay(&datapath.join("meta").join("raft.db"))?;
    info!(databases = databases.len(), "replayed metadata log");

    for database in &databases {
        if catalog_sink.send(database.clone()).is_err() {
            debug!("catalog consumer went away; stopping");
            return Ok(());
        }
    }
    // Close the catalog stream before any shard is opened: consumers may
    // rely on the catalog being complete once the stream ends.
    drop(catalog_sink);

    if let ControlFlow::Break(()) = shard::stream_points(datapath, &databases, &point_sink)? {
        debug!("point consumer went away; stopping");
    }
    Ok(())
}
