//! Shard discovery and engine dispatch.
//!
//! Shards live at `<datapath>/data/<database>/<retention policy>/<shard>`,
//! one store file per shard. The storage engine that wrote a shard is
//! recorded under `meta`/`format`; shards predating that marker are b1.

use crate::store::Store;
use crate::{b1, bz1, Error, StoreSnafu, UnknownEngineSnafu};
use migrate_types::{BatchPoints, Database};
use snafu::ResultExt;
use std::fs;
use std::io;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Walks every shard of every database/retention-policy pair and streams
/// decoded batches into `sink`.
///
/// A shard that cannot be opened or read is logged and skipped; an
/// unknown engine format aborts the whole migration. Returns
/// `ControlFlow::Break` when the sink's consumer went away.
pub(crate) fn stream_points(
    datapath: &Path,
    databases: &[Database],
    sink: &mpsc::UnboundedSender<BatchPoints>,
) -> Result<ControlFlow<()>, Error> {
    for database in databases {
        for policy in &database.policies {
            let dir = datapath
                .join("data")
                .join(&database.name)
                .join(&policy.name);
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                // a retention policy without shards contributes no points
                Err(error) if error.kind() == io::ErrorKind::NotFound => continue,
                Err(error) => {
                    warn!(
                        %error,
                        dir = %dir.display(),
                        "cannot list shard directory, skipping"
                    );
                    continue;
                }
            };

            let mut shards: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.is_file() && !is_lock_file(path))
                .collect();
            shards.sort();

            for path in shards {
                debug!(shard = %path.display(), database = %database.name, policy = %policy.name, "reading shard");
                match read_shard(&path, &database.name, &policy.name, sink) {
                    Ok(ControlFlow::Continue(())) => {}
                    Ok(ControlFlow::Break(())) => return Ok(ControlFlow::Break(())),
                    Err(err @ Error::UnknownEngine { .. }) => return Err(err),
                    Err(err) => {
                        error!(error = %err, shard = %path.display(), "skipping unreadable shard");
                    }
                }
            }
        }
    }

    Ok(ControlFlow::Continue(()))
}

/// The store engine drops a `<shard>-lock` companion next to each file
/// it maps; those are not shards.
fn is_lock_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with("-lock"))
}

fn read_shard(
    path: &Path,
    database: &str,
    retention_policy: &str,
    sink: &mpsc::UnboundedSender<BatchPoints>,
) -> Result<ControlFlow<()>, Error> {
    let store = Store::open(path)?;
    let rtxn = store.begin()?;

    let format = match store.bucket(&rtxn, "meta")? {
        Some(meta) => meta
            .get(&rtxn, b"format")
            .context(StoreSnafu { path: store.path() })?
            .map(<[u8]>::to_vec),
        None => None,
    };
    // shards written before the format marker existed are b1
    let format = format.unwrap_or_else(|| b"b1".to_vec());

    match format.as_slice() {
        b"b1" => b1::read(&store, &rtxn, database, retention_policy, sink),
        b"bz1" => bz1::read(&store, &rtxn, database, retention_policy, sink),
        other => UnknownEngineSnafu {
            format: String::from_utf8_lossy(other).into_owned(),
        }
        .fail(),
    }
}
