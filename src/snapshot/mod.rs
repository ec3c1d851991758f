use crate::endpoint::{Command, Endpoint};
use crate::error::{Result, SxError};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::sync::Arc;

#[cfg(test)]
mod tests;

const NAME_PREFIX: &str = "sx-";
const NAME_SUFFIX: &str = "-utc";
const NAME_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Encode a UTC instant (second resolution) as `sx-YYYYMMDD-hhmmss-utc`.
/// Lexicographic order on the encoding matches chronological order, which
/// is what lets the snapshot store sort by name instead of re-parsing.
pub fn encode_name(ts: DateTime<Utc>) -> String {
    format!("{}{}{}", NAME_PREFIX, ts.format(NAME_FORMAT), NAME_SUFFIX)
}

/// Parse a managed snapshot name back to its timestamp. Anything not
/// matching the strict pattern is not a managed snapshot and yields `None`
/// rather than an error — the store silently ignores such entries.
pub fn decode_name(name: &str) -> Option<DateTime<Utc>> {
    let rest = name.strip_prefix(NAME_PREFIX)?.strip_suffix(NAME_SUFFIX)?;
    let naive = NaiveDateTime::parse_from_str(rest, NAME_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// A single read-only, timestamped snapshot living under a container
/// subvolume on some endpoint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub container_path: String,
}

impl Snapshot {
    pub fn name(&self) -> String {
        encode_name(self.timestamp)
    }

    pub fn path(&self) -> String {
        format!("{}/{}", self.container_path.trim_end_matches('/'), self.name())
    }
}

/// Enumerate, create, and delete timestamped snapshots under one container
/// subvolume at one endpoint (spec C3).
pub trait SnapshotStore {
    fn endpoint(&self) -> &Endpoint;
    fn container_path(&self) -> &str;

    /// Managed snapshots, ascending by timestamp. Unparseable entries are
    /// silently dropped, never deleted.
    fn list(&self) -> Result<Vec<Snapshot>>;

    /// Atomically snapshot the job's source subvolume under the container,
    /// named `encode_name(now)`. Fails with `NameCollision` if that name is
    /// already taken; the caller retries after a short wait.
    fn create(&self, now: DateTime<Utc>) -> Result<Snapshot>;

    /// Remove the snapshot's subvolume. A no-op if it is already gone.
    fn delete(&self, snapshot: &Snapshot) -> Result<()>;

    /// The highest-timestamp snapshot whose name (hence UTC timestamp)
    /// appears in both this store and `other`. No content comparison is
    /// performed — identical name is the entire sync-point contract.
    fn latest_common(&self, other: &dyn SnapshotStore) -> Result<Option<Snapshot>> {
        let ours = self.list()?;
        let theirs = other.list()?;
        Ok(ours
            .into_iter()
            .rev()
            .find(|s| theirs.iter().any(|t| t.timestamp == s.timestamp)))
    }
}

/// Real snapshot store, backed by the filesystem command vocabulary of
/// spec §6: `subvolume list`, `subvolume snapshot -r`, `subvolume delete`.
pub struct BtrfsSnapshotStore {
    endpoint: Endpoint,
    subvolume_path: String,
    container_path: String,
    command: Arc<dyn Command>,
}

impl BtrfsSnapshotStore {
    pub fn new(
        endpoint: Endpoint,
        subvolume_path: impl Into<String>,
        container_path: impl Into<String>,
        command: Arc<dyn Command>,
    ) -> Self {
        BtrfsSnapshotStore {
            endpoint,
            subvolume_path: subvolume_path.into(),
            container_path: container_path.into(),
            command,
        }
    }

    /// Extract the basename (last path segment) of a raw `subvolume list`
    /// output line. The line format carries several columns ending in the
    /// subvolume's relative path; only the trailing token is meaningful
    /// here, mirroring the house style of treating this output as a fixed,
    /// whitespace-delimited text format rather than reaching for a parser
    /// crate.
    fn basename_of_entry(line: &str) -> Option<String> {
        let path = line.split_ascii_whitespace().last()?;
        path.rsplit('/').next().map(|s| s.to_string())
    }
}

impl SnapshotStore for BtrfsSnapshotStore {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn container_path(&self) -> &str {
        &self.container_path
    }

    fn list(&self) -> Result<Vec<Snapshot>> {
        let argv = vec![
            "btrfs".to_string(),
            "subvolume".to_string(),
            "list".to_string(),
            "-o".to_string(),
            self.container_path.clone(),
        ];
        let output = self.command.exec(&self.endpoint, &argv)?;

        let mut snapshots: Vec<Snapshot> = output
            .stdout_string()
            .lines()
            .filter_map(Self::basename_of_entry)
            .filter_map(|name| {
                decode_name(&name).map(|timestamp| Snapshot {
                    timestamp,
                    container_path: self.container_path.clone(),
                })
            })
            .collect();

        snapshots.sort_by_key(|s| s.timestamp);
        snapshots.dedup_by_key(|s| s.timestamp);
        Ok(snapshots)
    }

    fn create(&self, now: DateTime<Utc>) -> Result<Snapshot> {
        let snapshot = Snapshot {
            timestamp: now,
            container_path: self.container_path.clone(),
        };
        let argv = vec![
            "btrfs".to_string(),
            "subvolume".to_string(),
            "snapshot".to_string(),
            "-r".to_string(),
            self.subvolume_path.clone(),
            snapshot.path(),
        ];

        match self.command.exec(&self.endpoint, &argv) {
            Ok(_) => Ok(snapshot),
            Err(SxError::Endpoint { stderr_tail, .. })
                if stderr_tail.contains("File exists") =>
            {
                Err(SxError::NameCollision(snapshot.name()))
            }
            Err(other) => Err(other),
        }
    }

    fn delete(&self, snapshot: &Snapshot) -> Result<()> {
        let argv = vec![
            "btrfs".to_string(),
            "subvolume".to_string(),
            "delete".to_string(),
            snapshot.path(),
        ];

        match self.command.exec(&self.endpoint, &argv) {
            Ok(_) => Ok(()),
            Err(SxError::Endpoint { stderr_tail, .. })
                if stderr_tail.contains("No such file or directory")
                    || stderr_tail.contains("not a btrfs subvolume") =>
            {
                Ok(())
            }
            Err(other) => Err(other),
        }
    }
}
