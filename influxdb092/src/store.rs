//! Access to the single-file bucket stores the legacy layout is made of.
//!
//! Both the metadata store (`meta/raft.db`) and every shard file are
//! embedded key-value stores organized as named buckets of ordered
//! key/value pairs. This module confines the mapping onto the embedded
//! engine:
//!
//! * a store file is one LMDB environment opened `NO_SUB_DIR` and
//!   read-only (the engine's `<file>-lock` companion is ignored by the
//!   shard walker);
//! * a top-level bucket is a named database, and enumerating buckets is
//!   a key scan of the unnamed main database;
//! * a child bucket `X` nested under `points` is the named database
//!   `points/X`.
//!
//! Everything here is read-only; the decoder never writes to a legacy
//! store.

use crate::{Error, OpenSnafu, StoreSnafu};
use heed::types::{Bytes, DecodeIgnore, Str};
use heed::{Database, Env, EnvFlags, EnvOpenOptions, RoTxn};
use snafu::ResultExt;
use std::path::{Path, PathBuf};

/// Upper bound on named buckets in one store file.
const MAX_BUCKETS: u32 = 32_768;

/// Virtual address space reserved for one store mapping.
const MAP_SIZE: usize = 1 << 30;

/// An ordered bucket of key/value pairs.
pub(crate) type Bucket = Database<Bytes, Bytes>;

/// A read-only handle to one store file.
///
/// The handle is exclusive to the decoder and released on drop, on every
/// exit path.
#[derive(Debug)]
pub(crate) struct Store {
    env: Env,
    path: PathBuf,
}

impl Store {
    /// Opens the store file at `path` read-only.
    pub(crate) fn open(path: &Path) -> Result<Self, Error> {
        let mut options = EnvOpenOptions::new();
        options.map_size(MAP_SIZE).max_dbs(MAX_BUCKETS);
        // Safety: both flags only restrict what the mapping may do; the
        // file is never written through this environment.
        let env = unsafe {
            options.flags(EnvFlags::NO_SUB_DIR | EnvFlags::READ_ONLY);
            options.open(path)
        }
        .context(OpenSnafu { path })?;

        Ok(Self {
            env,
            path: path.to_owned(),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Starts a read transaction covering the whole store.
    pub(crate) fn begin(&self) -> Result<RoTxn<'_>, Error> {
        self.env.read_txn().context(StoreSnafu { path: &self.path })
    }

    /// Opens the top-level bucket `name`, if present.
    pub(crate) fn bucket(&self, rtxn: &RoTxn<'_>, name: &str) -> Result<Option<Bucket>, Error> {
        self.env
            .open_database(rtxn, Some(name))
            .context(StoreSnafu { path: &self.path })
    }

    /// Opens the child bucket `name` nested under `parent`, if present.
    pub(crate) fn child_bucket(
        &self,
        rtxn: &RoTxn<'_>,
        parent: &str,
        name: &str,
    ) -> Result<Option<Bucket>, Error> {
        self.bucket(rtxn, &format!("{parent}/{name}"))
    }

    /// Names of all top-level buckets, in key order.
    pub(crate) fn bucket_names(&self, rtxn: &RoTxn<'_>) -> Result<Vec<String>, Error> {
        Ok(self
            .names(rtxn)?
            .into_iter()
            .filter(|name| !name.contains('/'))
            .collect())
    }

    /// Names of the child buckets nested under `parent`, in key order.
    pub(crate) fn child_bucket_names(
        &self,
        rtxn: &RoTxn<'_>,
        parent: &str,
    ) -> Result<Vec<String>, Error> {
        let prefix = format!("{parent}/");
        Ok(self
            .names(rtxn)?
            .into_iter()
            .filter_map(|name| name.strip_prefix(&prefix).map(str::to_owned))
            .collect())
    }

    fn names(&self, rtxn: &RoTxn<'_>) -> Result<Vec<String>, Error> {
        let main = self
            .env
            .open_database::<Str, DecodeIgnore>(rtxn, None)
            .context(StoreSnafu { path: &self.path })?;
        let Some(main) = main else {
            return Ok(Vec::new());
        };

        let mut names = Vec::new();
        for entry in main.iter(rtxn).context(StoreSnafu { path: &self.path })? {
            let (name, ()) = entry.context(StoreSnafu { path: &self.path })?;
            names.push(name.to_owned());
        }
        Ok(names)
    }
}
