use crate::endpoint::{shell_quote, Endpoint};
use crate::error::{Result, SxError};
use std::io::Read;
use std::process::{Child, Command as ProcessCommand, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};


/// One stage of a pipeline: a command vector plus a label used only for
/// diagnostics (which stage first failed).
#[derive(Debug, Clone)]
pub struct PipelineStage {
    pub label: String,
    pub argv: Vec<String>,
}

impl PipelineStage {
    pub fn new(label: impl Into<String>, argv: Vec<String>) -> Self {
        PipelineStage {
            label: label.into(),
            argv,
        }
    }
}

/// A full producer -> [progress] -> [compressor] -> (ssh hop if needed) ->
/// [decompressor] -> consumer pipeline, as composed by the orchestrator for
/// a snapshot transfer (spec C2).
pub struct PipelinePlan {
    pub source_endpoint: Endpoint,
    pub dest_endpoint: Endpoint,
    pub producer: PipelineStage,
    pub progress: Option<PipelineStage>,
    pub compressor: Option<PipelineStage>,
    pub decompressor: Option<PipelineStage>,
    pub consumer: PipelineStage,
}

impl PipelinePlan {
    fn source_stages(&self) -> Vec<&PipelineStage> {
        let mut stages = vec![&self.producer];
        if let Some(p) = &self.progress {
            stages.push(p);
        }
        if let Some(c) = &self.compressor {
            stages.push(c);
        }
        stages
    }

    fn dest_stages(&self) -> Vec<&PipelineStage> {
        let mut stages = Vec::new();
        if let Some(d) = &self.decompressor {
            stages.push(d);
        }
        stages.push(&self.consumer);
        stages
    }
}

/// Cooperative cancellation flag shared between the orchestrator and a
/// running pipeline.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How the pipeline ended, for the orchestrator to translate into a
/// `SxError` or an "interrupted" exit.
pub enum PipelineOutcome {
    Success,
    Failed { stage: String, exit_code: i32 },
    Interrupted,
}

pub trait PipelineRunner {
    fn run(&self, plan: &PipelinePlan, cancel: &CancelToken) -> Result<PipelineOutcome>;
}

/// Real pipeline runner: spawns one OS process per local stage, piping
/// stdout directly into the next stage's stdin, and crosses hosts with
/// exactly one `ssh` hop carrying the remaining remote stages as a single
/// shell pipeline (spec C2 property 3).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPipelineRunner;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);
const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(5);

type Spawned = (Vec<(String, Child)>, Vec<(String, thread::JoinHandle<Vec<u8>>)>, Option<Stdio>);

impl SystemPipelineRunner {
    /// Spawn every stage that runs on `endpoint`. If `endpoint` is `Local`
    /// each stage is its own child process, chained stage-to-stage by local
    /// pipes. If `endpoint` is `Remote`, the whole group is a single `ssh`
    /// invocation running a shell pipeline remotely — this is the "exactly
    /// one channel" property from spec C2(3).
    ///
    /// Returns the spawned children (for wait/kill), their stderr-drain
    /// threads, and — if `capture_stdout` — a `Stdio` wrapping the group's
    /// final stdout, ready to feed as another group's stdin.
    fn spawn_side(
        &self,
        endpoint: &Endpoint,
        stages: &[&PipelineStage],
        stdin: Stdio,
        capture_stdout: bool,
    ) -> Result<Spawned> {
        match endpoint {
            Endpoint::Local => {
                let mut children = Vec::new();
                let mut stderr_handles = Vec::new();
                let mut prev_stdout = Some(stdin);
                let mut last_stdout = None;

                for (idx, stage) in stages.iter().enumerate() {
                    let this_stdin = prev_stdout.take().unwrap_or(Stdio::null());
                    let is_last = idx + 1 == stages.len();
                    let stdout = if is_last && !capture_stdout {
                        Stdio::null()
                    } else {
                        Stdio::piped()
                    };

                    let mut cmd = ProcessCommand::new(&stage.argv[0]);
                    cmd.args(&stage.argv[1..]);
                    cmd.stdin(this_stdin).stdout(stdout).stderr(Stdio::piped());
                    let mut child = cmd.spawn()?;

                    let handle = Self::drain_stderr(&mut child);
                    stderr_handles.push((stage.label.clone(), handle));

                    if is_last && capture_stdout {
                        last_stdout = child.stdout.take().map(Stdio::from);
                    } else {
                        prev_stdout = child.stdout.take().map(Stdio::from);
                    }
                    children.push((stage.label.clone(), child));
                }

                Ok((children, stderr_handles, last_stdout))
            }
            Endpoint::Remote { user, host, port } => {
                let joined = stages
                    .iter()
                    .map(|s| shell_quote(&s.argv))
                    .collect::<Vec<_>>()
                    .join(" | ");

                let mut cmd = ProcessCommand::new("ssh");
                if let Some(p) = port {
                    cmd.arg("-p").arg(p.to_string());
                }
                let target = match user {
                    Some(u) => format!("{}@{}", u, host),
                    None => host.clone(),
                };
                cmd.arg(target).arg(joined);
                cmd.stdin(stdin)
                    .stdout(if capture_stdout {
                        Stdio::piped()
                    } else {
                        Stdio::null()
                    })
                    .stderr(Stdio::piped());

                let label = stages
                    .last()
                    .map(|s| s.label.clone())
                    .unwrap_or_else(|| "ssh".to_string());
                let mut child = cmd.spawn()?;
                let handle = Self::drain_stderr(&mut child);
                let captured = if capture_stdout {
                    child.stdout.take().map(Stdio::from)
                } else {
                    None
                };

                Ok((vec![(label.clone(), child)], vec![(label, handle)], captured))
            }
        }
    }

    fn drain_stderr(child: &mut Child) -> thread::JoinHandle<Vec<u8>> {
        let mut stderr = child.stderr.take().expect("stderr was piped");
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            buf
        })
    }
}

impl PipelineRunner for SystemPipelineRunner {
    fn run(&self, plan: &PipelinePlan, cancel: &CancelToken) -> Result<PipelineOutcome> {
        let same_host = plan.source_endpoint.same_host(&plan.dest_endpoint);

        let source_stages = plan.source_stages();
        let dest_stages = plan.dest_stages();

        let mut children: Vec<(String, Child)> = Vec::new();
        let mut stderr_handles = Vec::new();

        if same_host {
            // Entirely on one host (local, or one remote host): no ssh hop
            // needed in the middle (spec C2 property 3).
            let mut all_stages = source_stages;
            all_stages.extend(dest_stages.iter().copied());

            let (c, h, _) =
                self.spawn_side(&plan.source_endpoint, &all_stages, Stdio::null(), false)?;
            children.extend(c);
            stderr_handles.extend(h);
        } else {
            // Cross-host: spawn the source-side stages on the source
            // endpoint capturing their combined stdout, then feed that into
            // the destination-side stages on the destination endpoint.
            // Whichever side is `Remote` contributes exactly one ssh
            // channel; at most one side is ever remote in practice, since
            // this process always runs on one of the two endpoints.
            let (c1, h1, boundary) =
                self.spawn_side(&plan.source_endpoint, &source_stages, Stdio::null(), true)?;
            children.extend(c1);
            stderr_handles.extend(h1);

            let (c2, h2, _) = self.spawn_side(
                &plan.dest_endpoint,
                &dest_stages,
                boundary.unwrap_or(Stdio::null()),
                false,
            )?;
            children.extend(c2);
            stderr_handles.extend(h2);
        }

        // Wait loop: poll for cancellation while children run. `exit_codes`
        // is indexed by each child's position in `children`, which is
        // exactly stage order (source stages first, then destination
        // stages) — not the order in which children happen to finish —
        // so poison selection below can recover true stage order.
        let deadline_after_cancel = Instant::now();
        let mut cancelled_at: Option<Instant> = None;
        let mut exit_codes: Vec<Option<i32>> = vec![None; children.len()];

        'wait: loop {
            if cancel.is_cancelled() && cancelled_at.is_none() {
                cancelled_at = Some(Instant::now());
                if let Some((_, first)) = children.first_mut() {
                    let _ = first.kill();
                }
            }

            let mut all_done = true;
            for (idx, (_, child)) in children.iter_mut().enumerate() {
                match child.try_wait()? {
                    Some(status) => {
                        if exit_codes[idx].is_none() {
                            exit_codes[idx] = Some(status.code().unwrap_or(-1));
                        }
                    }
                    None => all_done = false,
                }
            }

            if all_done {
                break 'wait;
            }

            if let Some(started) = cancelled_at {
                if started.elapsed() > CANCEL_GRACE_PERIOD {
                    for (_, child) in children.iter_mut() {
                        let _ = child.kill();
                    }
                }
            }

            if Instant::now().duration_since(deadline_after_cancel) > Duration::from_secs(3600) {
                break 'wait;
            }

            thread::sleep(CANCEL_POLL_INTERVAL);
        }

        for (_, handle) in stderr_handles {
            let _ = handle.join();
        }

        if cancelled_at.is_some() {
            return Ok(PipelineOutcome::Interrupted);
        }

        // Poison semantics: first non-zero exit, by stage order.
        for (idx, code) in exit_codes.iter().enumerate() {
            if let Some(code) = code {
                if *code != 0 {
                    return Ok(PipelineOutcome::Failed {
                        stage: children[idx].0.clone(),
                        exit_code: *code,
                    });
                }
            }
        }

        Ok(PipelineOutcome::Success)
    }
}

impl From<PipelineOutcome> for Result<()> {
    fn from(outcome: PipelineOutcome) -> Self {
        match outcome {
            PipelineOutcome::Success => Ok(()),
            PipelineOutcome::Interrupted => Err(SxError::Interrupted),
            PipelineOutcome::Failed { stage, exit_code } => {
                Err(SxError::Transfer { stage, exit_code })
            }
        }
    }
}
