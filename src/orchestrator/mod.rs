use crate::clock::Clock;
use crate::descriptor::{DescriptorStore, JobDescriptor, CURRENT_FORMAT_VERSION};
use crate::error::{Result, SxError};
use crate::log_sink::LogSink;
use crate::pipeline::{CancelToken, PipelinePlan, PipelineOutcome, PipelineRunner, PipelineStage};
use crate::retention::RetentionExpr;
use crate::snapshot::{Snapshot, SnapshotStore};
use chrono::{DateTime, Utc};
use std::thread;
use std::time::Duration as StdDuration;


const MAX_NAME_COLLISION_RETRIES: u32 = 3;
const NAME_COLLISION_WAIT: StdDuration = StdDuration::from_secs(1);

/// Result of a successful `run`/`transfer` (spec §4.6 state machine).
#[derive(Debug)]
pub struct RunOutcome {
    pub new_snapshot: Snapshot,
    pub used_incremental: bool,
    pub source_deleted: Vec<Snapshot>,
    pub destination_deleted: Vec<Snapshot>,
}

/// Result of a `destroy`, noting whether remote cleanup was skipped rather
/// than failed (spec §4.6 `destroy`).
#[derive(Debug, Default)]
pub struct DestroyOutcome {
    pub source_descriptor_removed: bool,
    pub destination_descriptor_removed: bool,
    pub destination_unreachable: bool,
    pub purged_source: Vec<Snapshot>,
    pub purged_destination: Vec<Snapshot>,
}

/// Read-only view for `info` (spec §4.6 `info`): the CLI layer is
/// responsible for rendering timestamps in both UTC and local time.
#[derive(Debug)]
pub struct JobInfo {
    pub descriptor: JobDescriptor,
    pub source_snapshots: Vec<Snapshot>,
    pub destination_snapshots: Vec<Snapshot>,
}

/// Result of a `purge` (spec §4.6 `purge`): retention evaluation and
/// deletion only, no snapshot creation or transfer.
#[derive(Debug, Default)]
pub struct PurgeOutcome {
    pub source_deleted: Vec<Snapshot>,
    pub destination_deleted: Vec<Snapshot>,
}

/// Drives one job's finite state machine over a `(source, destination)`
/// snapshot store pair (spec C6), using injected collaborators so tests can
/// substitute fakes for the clock, log sink, pipeline runner, and stores.
pub struct Orchestrator<'a> {
    pub source: &'a dyn SnapshotStore,
    pub destination: &'a dyn SnapshotStore,
    pub descriptors: &'a dyn DescriptorStore,
    pub pipeline: &'a dyn PipelineRunner,
    pub clock: &'a dyn Clock,
    pub log: &'a dyn LogSink,
}

impl<'a> Orchestrator<'a> {
    /// `init`: validate both sides, write mirrored descriptors, create no
    /// snapshots.
    pub fn init(
        &self,
        source_url: &str,
        destination_url: &str,
        source_retention: &str,
        destination_retention: &str,
        compress: bool,
    ) -> Result<()> {
        RetentionExpr::parse(source_retention)?;
        RetentionExpr::parse(destination_retention)?;

        let source_descriptor = JobDescriptor {
            source: Some(source_url.to_string()),
            destination: Some(destination_url.to_string()),
            source_container: self.source.container_path().to_string(),
            destination_container: self.destination.container_path().to_string(),
            source_retention: source_retention.to_string(),
            destination_retention: destination_retention.to_string(),
            compress,
            format_version: CURRENT_FORMAT_VERSION,
            last_synced: None,
            unknown: Default::default(),
        };
        let destination_descriptor = source_descriptor.clone();

        self.descriptors.write(
            self.source.endpoint(),
            self.source.container_path(),
            &source_descriptor,
        )?;
        self.descriptors.write(
            self.destination.endpoint(),
            self.destination.container_path(),
            &destination_descriptor,
        )?;
        self.log.info("job initialised");
        Ok(())
    }

    /// `update`: rewrite retention/compression fields on both descriptors.
    /// Absent overrides leave the existing value untouched — the tri-state
    /// compress flag this fixes against the historical "always activates
    /// compression" bug.
    pub fn update(
        &self,
        source_retention: Option<&str>,
        destination_retention: Option<&str>,
        compress: Option<bool>,
    ) -> Result<()> {
        if let Some(r) = source_retention {
            RetentionExpr::parse(r)?;
        }
        if let Some(r) = destination_retention {
            RetentionExpr::parse(r)?;
        }

        let mut descriptor = self.load_agreeing_descriptor()?;
        if let Some(r) = source_retention {
            descriptor.source_retention = r.to_string();
        }
        if let Some(r) = destination_retention {
            descriptor.destination_retention = r.to_string();
        }
        if let Some(c) = compress {
            descriptor.compress = c;
        }

        self.write_both(&descriptor)?;
        self.log.info("job descriptor updated");
        Ok(())
    }

    /// `info`: read-only listing of descriptor and both inventories.
    pub fn info(&self) -> Result<JobInfo> {
        let descriptor = self.load_agreeing_descriptor()?;
        Ok(JobInfo {
            descriptor,
            source_snapshots: self.source.list()?,
            destination_snapshots: self.destination.list()?,
        })
    }

    /// `run`: the full state machine of spec §4.6 — parent selection,
    /// snapshot, transfer, dual retention sweep, metadata sync.
    pub fn run(&self, cancel: &CancelToken) -> Result<RunOutcome> {
        let descriptor = self.load_agreeing_descriptor()?;

        let parent = self.source.latest_common(self.destination)?;
        let used_incremental = parent.is_some();
        if !used_incremental {
            self.log
                .warn("no common parent snapshot found; sending a full snapshot");
        }

        let now = self.clock.now();
        let new_snapshot = self.create_with_retry(now)?;
        self.log.info(&format!("created snapshot {}", new_snapshot.name()));

        let plan = self.build_plan(&new_snapshot, parent.as_ref(), descriptor.compress);
        match self.pipeline.run(&plan, cancel) {
            Ok(PipelineOutcome::Success) => {}
            Ok(PipelineOutcome::Interrupted) => {
                self.source.delete(&new_snapshot)?;
                return Err(SxError::Interrupted);
            }
            Ok(PipelineOutcome::Failed { stage, exit_code }) => {
                self.source.delete(&new_snapshot)?;
                return Err(SxError::Transfer { stage, exit_code });
            }
            Err(e) => {
                self.source.delete(&new_snapshot)?;
                return Err(e);
            }
        }
        self.log.info("transfer complete");

        let source_retention = RetentionExpr::parse(&descriptor.source_retention)?;
        let mut source_inventory = self.source.list()?;
        if !source_inventory
            .iter()
            .any(|s| s.timestamp == new_snapshot.timestamp)
        {
            source_inventory.push(new_snapshot.clone());
        }
        let source_deleted = self.sweep(self.source, &source_retention, &source_inventory, now)?;

        let destination_retention = RetentionExpr::parse(&descriptor.destination_retention)?;
        let destination_inventory = self.destination.list()?;
        let destination_deleted = self.sweep(
            self.destination,
            &destination_retention,
            &destination_inventory,
            now,
        )?;

        let mut synced = descriptor;
        synced.last_synced = Some(new_snapshot.name());
        self.write_both(&synced)?;
        self.log.info("metadata synced");

        Ok(RunOutcome {
            new_snapshot,
            used_incremental,
            source_deleted,
            destination_deleted,
        })
    }

    /// `transfer`: an ad hoc synchronisation outside the job's schedule —
    /// the same state machine as `run`.
    pub fn transfer(&self, cancel: &CancelToken) -> Result<RunOutcome> {
        self.run(cancel)
    }

    /// `purge`: retention evaluation and deletion only; `overrides`, if
    /// given, replace the persisted expressions for this invocation
    /// without being written back.
    pub fn purge(
        &self,
        source_retention_override: Option<&str>,
        destination_retention_override: Option<&str>,
    ) -> Result<PurgeOutcome> {
        let descriptor = self.load_agreeing_descriptor()?;
        let now = self.clock.now();

        let source_retention_str = source_retention_override.unwrap_or(&descriptor.source_retention);
        let source_retention = RetentionExpr::parse(source_retention_str)?;
        let source_inventory = self.source.list()?;
        let source_deleted = self.sweep(self.source, &source_retention, &source_inventory, now)?;

        let destination_retention_str =
            destination_retention_override.unwrap_or(&descriptor.destination_retention);
        let destination_retention = RetentionExpr::parse(destination_retention_str)?;
        let destination_inventory = self.destination.list()?;
        let destination_deleted = self.sweep(
            self.destination,
            &destination_retention,
            &destination_inventory,
            now,
        )?;

        Ok(PurgeOutcome {
            source_deleted,
            destination_deleted,
        })
    }

    /// `destroy`: remove descriptors on both sides; with `purge` also
    /// delete every managed snapshot. A destination that can't be reached
    /// is reported as skipped, not an error, so local cleanup always
    /// completes.
    pub fn destroy(&self, purge: bool) -> Result<DestroyOutcome> {
        let mut outcome = DestroyOutcome::default();

        if purge {
            match self.source.list() {
                Ok(snapshots) => {
                    for s in &snapshots {
                        self.source.delete(s)?;
                    }
                    outcome.purged_source = snapshots;
                }
                Err(e) => return Err(e),
            }
        }
        self.remove_descriptor(self.source)?;
        outcome.source_descriptor_removed = true;

        let destination_result: Result<()> = (|| {
            if purge {
                let snapshots = self.destination.list()?;
                for s in &snapshots {
                    self.destination.delete(s)?;
                }
                outcome.purged_destination = snapshots;
            }
            self.remove_descriptor(self.destination)
        })();

        match destination_result {
            Ok(()) => {
                outcome.destination_descriptor_removed = true;
            }
            Err(SxError::Endpoint { .. }) => {
                outcome.destination_unreachable = true;
                self.log
                    .warn("destination unreachable; remote cleanup skipped");
            }
            Err(e) => return Err(e),
        }

        Ok(outcome)
    }

    fn build_plan(
        &self,
        new: &Snapshot,
        parent: Option<&Snapshot>,
        compress: bool,
    ) -> PipelinePlan {
        let mut producer_argv = vec!["btrfs".to_string(), "send".to_string()];
        if let Some(p) = parent {
            producer_argv.push("-p".to_string());
            producer_argv.push(p.path());
        }
        producer_argv.push(new.path());

        let consumer_argv = vec![
            "btrfs".to_string(),
            "receive".to_string(),
            self.destination.container_path().to_string(),
        ];

        let (compressor, decompressor) = if compress {
            (
                Some(PipelineStage::new(
                    "compressor",
                    vec!["lzop".to_string(), "-c".to_string()],
                )),
                Some(PipelineStage::new(
                    "decompressor",
                    vec!["lzop".to_string(), "-d".to_string()],
                )),
            )
        } else {
            (None, None)
        };

        PipelinePlan {
            source_endpoint: self.source.endpoint().clone(),
            dest_endpoint: self.destination.endpoint().clone(),
            producer: PipelineStage::new("producer", producer_argv),
            progress: None,
            compressor,
            decompressor,
            consumer: PipelineStage::new("consumer", consumer_argv),
        }
    }

    fn create_with_retry(&self, now: DateTime<Utc>) -> Result<Snapshot> {
        let mut attempt = 0;
        let mut when = now;
        loop {
            match self.source.create(when) {
                Ok(s) => return Ok(s),
                Err(SxError::NameCollision(_)) if attempt < MAX_NAME_COLLISION_RETRIES => {
                    attempt += 1;
                    self.log.warn("snapshot name collision, retrying");
                    thread::sleep(NAME_COLLISION_WAIT);
                    when = self.clock.now();
                }
                Err(other) => return Err(other),
            }
        }
    }

    fn sweep(
        &self,
        store: &dyn SnapshotStore,
        retention: &RetentionExpr,
        inventory: &[Snapshot],
        now: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>> {
        let keep = retention.keep(inventory, now);
        let dropped: Vec<Snapshot> = inventory
            .iter()
            .filter(|s| !keep.iter().any(|k| k.timestamp == s.timestamp))
            .cloned()
            .collect();
        for s in &dropped {
            store.delete(s)?;
        }
        Ok(dropped)
    }

    fn remove_descriptor(&self, store: &dyn SnapshotStore) -> Result<()> {
        self.descriptors
            .delete(store.endpoint(), store.container_path())
    }

    fn load_agreeing_descriptor(&self) -> Result<JobDescriptor> {
        let source_descriptor = self
            .descriptors
            .read(self.source.endpoint(), self.source.container_path())?
            .ok_or_else(|| {
                SxError::Config(format!(
                    "no job descriptor at {}; run init first",
                    self.source.container_path()
                ))
            })?;
        let destination_descriptor = self
            .descriptors
            .read(self.destination.endpoint(), self.destination.container_path())?
            .ok_or_else(|| {
                SxError::Config(format!(
                    "no job descriptor at {}; run init first",
                    self.destination.container_path()
                ))
            })?;

        if source_descriptor.source_retention != destination_descriptor.source_retention
            || source_descriptor.destination_retention != destination_descriptor.destination_retention
            || source_descriptor.compress != destination_descriptor.compress
        {
            return Err(SxError::ConfigMismatch(
                "source and destination descriptors disagree".to_string(),
            ));
        }

        Ok(source_descriptor)
    }

    fn write_both(&self, descriptor: &JobDescriptor) -> Result<()> {
        self.descriptors
            .write(self.source.endpoint(), self.source.container_path(), descriptor)?;
        self.descriptors.write(
            self.destination.endpoint(),
            self.destination.container_path(),
            descriptor,
        )?;
        Ok(())
    }
}
