//! Replay of the replicated metadata log into the catalog.
//!
//! The metadata store is a single bucket store whose `logs` bucket holds
//! the replicated log, one entry per key in log-index order. Every value
//! is a MessagePack envelope whose `Data` payload is a protobuf command
//! record; folding the commands over an empty catalog reconstructs the
//! databases and retention policies that existed when the log was last
//! written.
//!
//! Entries that do not carry a command (noops, configuration changes,
//! envelopes from other tooling) are skipped. Databases and retention
//! policies whose name ends in `internal` are system-owned and never
//! enter the catalog.

use crate::store::Store;
use crate::{BucketMissingSnafu, Error, StoreSnafu};
use migrate_types::{Database, RetentionPolicy};
use prost::Message;
use serde::Deserialize;
use snafu::{OptionExt, ResultExt};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const INTERNAL_SUFFIX: &str = "internal";

/// Replays the metadata store at `path` and returns the catalog in
/// log-fold order.
pub(crate) fn replay(path: &Path) -> Result<Vec<Database>, Error> {
    let store = Store::open(path)?;
    let rtxn = store.begin()?;
    let logs = store
        .bucket(&rtxn, "logs")?
        .context(BucketMissingSnafu {
            shard: path.display().to_string(),
            bucket: "logs",
        })?;

    let mut catalog = Catalog::default();
    for entry in logs.iter(&rtxn).context(StoreSnafu { path: store.path() })? {
        let (_, value) = entry.context(StoreSnafu { path: store.path() })?;

        let envelope: LogEntry = match rmp_serde::from_slice(value) {
            Ok(envelope) => envelope,
            Err(error) => {
                debug!(%error, "skipping undecodable log envelope");
                continue;
            }
        };
        let command = match Command::decode(&envelope.data[..]) {
            Ok(command) => command,
            Err(error) => {
                debug!(%error, index = envelope.index, "skipping non-command log entry");
                continue;
            }
        };
        catalog.apply(&command);
    }

    Ok(catalog.databases)
}

/// The subset of the log-entry envelope the replay needs. Remaining
/// envelope keys (`Term`, `Type`, ...) are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LogEntry {
    #[serde(default)]
    index: u64,
    #[serde(default)]
    data: serde_bytes::ByteBuf,
}

/// Catalog state while folding the log: databases in creation order plus
/// a by-name index.
#[derive(Debug, Default)]
struct Catalog {
    databases: Vec<Database>,
    index: HashMap<String, usize>,
}

impl Catalog {
    fn apply(&mut self, command: &Command) {
        let Some(tag) = command.command_type else {
            return;
        };
        // Unknown tags are newer (or cluster-level) commands the
        // migration does not care about.
        let Ok(tag) = CommandType::try_from(tag) else {
            return;
        };

        match tag {
            CommandType::CreateDatabase => {
                let Some(create) = &command.create_database else {
                    return;
                };
                let name = create.name.clone().unwrap_or_default();
                if name.ends_with(INTERNAL_SUFFIX) || self.index.contains_key(&name) {
                    return;
                }
                self.index.insert(name.clone(), self.databases.len());
                self.databases.push(Database {
                    name,
                    ..Default::default()
                });
            }
            CommandType::DropDatabase => {
                let Some(drop) = &command.drop_database else {
                    return;
                };
                let name = drop.name.as_deref().unwrap_or_default();
                if self.index.remove(name).is_some() {
                    self.databases.retain(|db| db.name != name);
                    self.reindex();
                }
            }
            CommandType::CreateRetentionPolicy => {
                let Some(create) = &command.create_retention_policy else {
                    return;
                };
                let Some(info) = &create.retention_policy else {
                    return;
                };
                let policy = info.name.clone().unwrap_or_default();
                if policy.ends_with(INTERNAL_SUFFIX) {
                    return;
                }
                if let Some(db) = self.get_mut(create.database.as_deref().unwrap_or_default()) {
                    db.policies.push(RetentionPolicy {
                        name: policy,
                        duration: duration_from_ns(info.duration.unwrap_or_default()),
                        replica_n: info.replica_n.unwrap_or_default(),
                    });
                }
            }
            CommandType::DropRetentionPolicy => {
                let Some(drop) = &command.drop_retention_policy else {
                    return;
                };
                let name = drop.name.as_deref().unwrap_or_default().to_owned();
                if let Some(db) = self.get_mut(drop.database.as_deref().unwrap_or_default()) {
                    db.policies.retain(|rp| rp.name != name);
                }
            }
            CommandType::SetDefaultRetentionPolicy => {
                let Some(set) = &command.set_default_retention_policy else {
                    return;
                };
                let name = set.name.clone().unwrap_or_default();
                if let Some(db) = self.get_mut(set.database.as_deref().unwrap_or_default()) {
                    db.default_policy = name;
                }
            }
        }
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Database> {
        let i = *self.index.get(name)?;
        self.databases.get_mut(i)
    }

    fn reindex(&mut self) {
        self.index = self
            .databases
            .iter()
            .enumerate()
            .map(|(i, db)| (db.name.clone(), i))
            .collect();
    }
}

/// The on-disk duration is signed nanoseconds; 0.9.x never writes a
/// negative value.
fn duration_from_ns(ns: i64) -> Duration {
    Duration::from_nanos(ns.max(0) as u64)
}

/// Flat mirror of the legacy `Command` record: the type tag plus one
/// field per command kind at the legacy extension numbers (103-107).
/// Dispatch is on the tag; the extension double-dispatch of the original
/// schema is deliberately not reproduced.
#[derive(Clone, PartialEq, ::prost::Message)]
struct Command {
    #[prost(int32, optional, tag = "1")]
    command_type: Option<i32>,
    #[prost(message, optional, tag = "103")]
    create_database: Option<CreateDatabaseCommand>,
    #[prost(message, optional, tag = "104")]
    drop_database: Option<DropDatabaseCommand>,
    #[prost(message, optional, tag = "105")]
    create_retention_policy: Option<CreateRetentionPolicyCommand>,
    #[prost(message, optional, tag = "106")]
    drop_retention_policy: Option<DropRetentionPolicyCommand>,
    #[prost(message, optional, tag = "107")]
    set_default_retention_policy: Option<SetDefaultRetentionPolicyCommand>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
enum CommandType {
    CreateDatabase = 3,
    DropDatabase = 4,
    CreateRetentionPolicy = 5,
    DropRetentionPolicy = 6,
    SetDefaultRetentionPolicy = 7,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct CreateDatabaseCommand {
    #[prost(string, optional, tag = "1")]
    name: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct DropDatabaseCommand {
    #[prost(string, optional, tag = "1")]
    name: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct CreateRetentionPolicyCommand {
    #[prost(string, optional, tag = "1")]
    database: Option<String>,
    #[prost(message, optional, tag = "2")]
    retention_policy: Option<RetentionPolicyInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct RetentionPolicyInfo {
    #[prost(string, optional, tag = "1")]
    name: Option<String>,
    #[prost(int64, optional, tag = "2")]
    duration: Option<i64>,
    #[prost(int64, optional, tag = "3")]
    shard_group_duration: Option<i64>,
    #[prost(uint32, optional, tag = "4")]
    replica_n: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct DropRetentionPolicyCommand {
    #[prost(string, optional, tag = "1")]
    database: Option<String>,
    #[prost(string, optional, tag = "2")]
    name: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct SetDefaultRetentionPolicyCommand {
    #[prost(string, optional, tag = "1")]
    database: Option<String>,
    #[prost(string, optional, tag = "2")]
    name: Option<String>,
}
