extern crate sxbackup;

use anyhow::{Context as _, Result as AnyhowResult};
use chrono::Local;
use clap::{Parser, Subcommand};
use log::{debug, info};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use sxbackup::clock::SystemClock;
use sxbackup::descriptor::{DescriptorStore, FileDescriptorStore, DEFAULT_CONTAINER_NAME};
use sxbackup::endpoint::{parse_endpoint_url, Command as EndpointCommand, CommandSystem, Endpoint};
use sxbackup::error::SxError;
use sxbackup::log_sink::StdLogSink;
use sxbackup::orchestrator::Orchestrator;
use sxbackup::pipeline::{CancelToken, SystemPipelineRunner};
use sxbackup::snapshot::{BtrfsSnapshotStore, SnapshotStore};

/// Snapshot-based backup orchestrator for copy-on-write filesystems.
#[derive(Parser)]
#[command(name = "sxbackup", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Register a new backup job, writing mirrored descriptors on both sides.
    Init {
        /// Source subvolume, local path or ssh://[user@]host[:port]/path
        source: String,
        /// Destination container subvolume, local path or ssh url
        destination: String,
        #[arg(long, default_value = "7")]
        source_retention: String,
        #[arg(long, default_value = "7")]
        destination_retention: String,
        #[arg(long)]
        compress: bool,
    },
    /// Rewrite retention / compression fields on an existing job.
    Update {
        /// Path to the job's container subvolume (holds .btrfs-sxbackup)
        job: String,
        #[arg(long)]
        source_retention: Option<String>,
        #[arg(long)]
        destination_retention: Option<String>,
        #[arg(long, conflicts_with = "no_compress")]
        compress: bool,
        #[arg(long)]
        no_compress: bool,
    },
    /// Snapshot, transfer, and retain — the job's regular scheduled action.
    Run { job: String },
    /// Ad hoc synchronisation outside the job's schedule; same as `run`.
    Transfer { job: String },
    /// Read-only view of the job's descriptor and both snapshot inventories.
    Info { job: String },
    /// Evaluate retention and delete on both sides without transferring.
    Purge {
        job: String,
        #[arg(long)]
        source_retention: Option<String>,
        #[arg(long)]
        destination_retention: Option<String>,
    },
    /// Remove the job's descriptors; with --purge also delete all snapshots.
    Destroy {
        job: String,
        #[arg(long)]
        purge: bool,
    },
}

fn main() {
    env_logger::init();

    if let Err(err) = try_main() {
        eprintln!("error: {:#}", err);
        let code = err.downcast_ref::<SxError>().map(|e| e.exit_code()).unwrap_or(1);
        process::exit(code);
    }
}

fn try_main() -> AnyhowResult<()> {
    let cli = Cli::parse();
    let command: Arc<dyn EndpointCommand> = Arc::new(CommandSystem);
    let descriptors = FileDescriptorStore::new(command.clone());
    let pipeline = SystemPipelineRunner;
    let clock = SystemClock;
    let log = StdLogSink;

    match cli.command {
        Cmd::Init {
            source,
            destination,
            source_retention,
            destination_retention,
            compress,
        } => {
            let (source_endpoint, source_subvolume_path) = parse_endpoint_url(&source)
                .with_context(|| format!("invalid source url \"{}\"", source))?;
            let (destination_endpoint, destination_container_path) =
                parse_endpoint_url(&destination)
                    .with_context(|| format!("invalid destination url \"{}\"", destination))?;
            let source_container_path = format!(
                "{}/{}",
                source_subvolume_path.trim_end_matches('/'),
                DEFAULT_CONTAINER_NAME
            );

            let source_store = BtrfsSnapshotStore::new(
                source_endpoint,
                source_subvolume_path,
                source_container_path,
                command.clone(),
            );
            let destination_store = BtrfsSnapshotStore::new(
                destination_endpoint,
                destination_container_path.clone(),
                destination_container_path,
                command.clone(),
            );

            let orchestrator = Orchestrator {
                source: &source_store,
                destination: &destination_store,
                descriptors: &descriptors,
                pipeline: &pipeline,
                clock: &clock,
                log: &log,
            };
            orchestrator.init(
                &source,
                &destination,
                &source_retention,
                &destination_retention,
                compress,
            )?;
            info!("job initialised at \"{}\"", source_store.container_path());
        }
        Cmd::Update {
            job,
            source_retention,
            destination_retention,
            compress,
            no_compress,
        } => {
            let compress_override = match (compress, no_compress) {
                (true, _) => Some(true),
                (false, true) => Some(false),
                (false, false) => None,
            };
            let (source_store, destination_store) = open_job(command.clone(), &job)?;
            let orchestrator = Orchestrator {
                source: &source_store,
                destination: &destination_store,
                descriptors: &descriptors,
                pipeline: &pipeline,
                clock: &clock,
                log: &log,
            };
            orchestrator.update(
                source_retention.as_deref(),
                destination_retention.as_deref(),
                compress_override,
            )?;
        }
        Cmd::Run { job } => {
            let (source_store, destination_store) = open_job(command.clone(), &job)?;
            let orchestrator = Orchestrator {
                source: &source_store,
                destination: &destination_store,
                descriptors: &descriptors,
                pipeline: &pipeline,
                clock: &clock,
                log: &log,
            };
            let cancel = install_cancel_token()?;
            let outcome = orchestrator.run(&cancel)?;
            info!(
                "run complete: snapshot {} ({} transfer), {} deleted on source, {} on destination",
                outcome.new_snapshot.name(),
                if outcome.used_incremental { "incremental" } else { "full" },
                outcome.source_deleted.len(),
                outcome.destination_deleted.len(),
            );
        }
        Cmd::Transfer { job } => {
            let (source_store, destination_store) = open_job(command.clone(), &job)?;
            let orchestrator = Orchestrator {
                source: &source_store,
                destination: &destination_store,
                descriptors: &descriptors,
                pipeline: &pipeline,
                clock: &clock,
                log: &log,
            };
            let cancel = install_cancel_token()?;
            let outcome = orchestrator.transfer(&cancel)?;
            info!("transfer complete: snapshot {}", outcome.new_snapshot.name());
        }
        Cmd::Info { job } => {
            let (source_store, destination_store) = open_job(command.clone(), &job)?;
            let orchestrator = Orchestrator {
                source: &source_store,
                destination: &destination_store,
                descriptors: &descriptors,
                pipeline: &pipeline,
                clock: &clock,
                log: &log,
            };
            let info = orchestrator.info()?;
            println!("source:              {}", info.descriptor.source.as_deref().unwrap_or("-"));
            println!(
                "destination:         {}",
                info.descriptor.destination.as_deref().unwrap_or("-")
            );
            println!("source retention:    {}", info.descriptor.source_retention);
            println!(
                "destination retention: {}",
                info.descriptor.destination_retention
            );
            println!("compress:            {}", info.descriptor.compress);
            println!(
                "last synced:         {}",
                info.descriptor.last_synced.as_deref().unwrap_or("-")
            );
            println!("\nsource snapshots:");
            for s in &info.source_snapshots {
                println!(
                    "  {} ({} utc, {} local)",
                    s.name(),
                    s.timestamp,
                    s.timestamp.with_timezone(&Local)
                );
            }
            println!("\ndestination snapshots:");
            for s in &info.destination_snapshots {
                println!(
                    "  {} ({} utc, {} local)",
                    s.name(),
                    s.timestamp,
                    s.timestamp.with_timezone(&Local)
                );
            }
        }
        Cmd::Purge {
            job,
            source_retention,
            destination_retention,
        } => {
            let (source_store, destination_store) = open_job(command.clone(), &job)?;
            let orchestrator = Orchestrator {
                source: &source_store,
                destination: &destination_store,
                descriptors: &descriptors,
                pipeline: &pipeline,
                clock: &clock,
                log: &log,
            };
            let outcome = orchestrator.purge(source_retention.as_deref(), destination_retention.as_deref())?;
            info!(
                "purge complete: {} deleted on source, {} on destination",
                outcome.source_deleted.len(),
                outcome.destination_deleted.len()
            );
        }
        Cmd::Destroy { job, purge } => {
            let (source_store, destination_store) = open_job(command.clone(), &job)?;
            let orchestrator = Orchestrator {
                source: &source_store,
                destination: &destination_store,
                descriptors: &descriptors,
                pipeline: &pipeline,
                clock: &clock,
                log: &log,
            };
            let outcome = orchestrator.destroy(purge)?;
            if outcome.destination_unreachable {
                info!("destination unreachable; remote cleanup skipped");
            }
            info!("job destroyed");
        }
    }

    Ok(())
}

/// Bootstrap both snapshot stores for an existing job by reading its
/// descriptor at the local container path, then parsing each side's
/// recorded endpoint URL. Only the source side ever calls `create`, so the
/// destination store's nominal "subvolume path" is never exercised.
fn open_job(
    command: Arc<dyn EndpointCommand>,
    job_container_path: &str,
) -> AnyhowResult<(BtrfsSnapshotStore, BtrfsSnapshotStore)> {
    let descriptors = FileDescriptorStore::new(command.clone());
    let descriptor = descriptors
        .read(&Endpoint::Local, job_container_path)?
        .with_context(|| format!("no job descriptor at \"{}\"; run init first", job_container_path))?;

    debug!("loaded descriptor at \"{}\"", job_container_path);

    let source_url = descriptor
        .source
        .as_deref()
        .context("descriptor is missing its source url")?;
    let (source_endpoint, source_subvolume_path) = parse_endpoint_url(source_url)
        .with_context(|| format!("invalid source url \"{}\" in descriptor", source_url))?;

    let destination_url = descriptor
        .destination
        .as_deref()
        .context("descriptor is missing its destination url")?;
    let (destination_endpoint, _) = parse_endpoint_url(destination_url)
        .with_context(|| format!("invalid destination url \"{}\" in descriptor", destination_url))?;

    let source_store = BtrfsSnapshotStore::new(
        source_endpoint,
        source_subvolume_path,
        descriptor.source_container.clone(),
        command.clone(),
    );
    let destination_store = BtrfsSnapshotStore::new(
        destination_endpoint,
        descriptor.destination_container.clone(),
        descriptor.destination_container.clone(),
        command,
    );

    Ok((source_store, destination_store))
}

/// Wire SIGINT/SIGTERM/SIGHUP to a `CancelToken` the orchestrator polls at
/// its suspension points (spec §5).
fn install_cancel_token() -> AnyhowResult<CancelToken> {
    let cancel = CancelToken::new();
    let flag = Arc::new(AtomicBool::new(false));
    let flag_handler = flag.clone();
    let token = cancel.clone();
    ctrlc::set_handler(move || {
        if !flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("interrupt received, stopping at next suspension point");
        }
        token.cancel();
    })
    .context("failed to install signal handler")?;
    Ok(cancel)
}
