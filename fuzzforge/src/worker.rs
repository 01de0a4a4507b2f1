//! Worker process (`spec.md` §4.5).
//!
//! A worker is a subprocess — the harness binary re-exec'd via
//! [`std::env::current_exe`] with [`ipc::WORKER_ID_ENV`] set — never a
//! thread or a `fork()` of the orchestrator (`spec.md` §5 "Fork safety").
//! Its main loop runs forever: draw, mutate, invoke, observe, report,
//! consume broadcasts.

use crate::config::{StartMethod, WorkerConfig};
use crate::corpus::{Corpus, Sample};
use crate::coverage::CoverageMap;
use crate::error::Result;
use crate::ipc::{self, ControlMsg, WorkerReport};
use crate::mutator::Mutator;
use crate::state::SessionState;
use crate::tracer;
use ipc_channel::ipc::{IpcReceiver, IpcSender};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::io::Write;
use std::process::{Child, Command, Stdio};

/// The orchestrator's handle onto one live worker process.
pub struct WorkerHandle {
    pub id: usize,
    pub child: Child,
    pub report_rx: IpcReceiver<WorkerReport>,
    pub control_tx: IpcSender<ControlMsg>,
}

/// Spawns worker `id`, completes the IPC handshake, and ships it the
/// starting corpus/coverage snapshot plus its configuration.
pub fn spawn(id: usize, config: &WorkerConfig, snapshot: &SessionState) -> Result<WorkerHandle> {
    let (server, server_name) = ipc::bootstrap_server()?;

    let exe = std::env::current_exe()?;
    let mut cmd = Command::new(exe);
    cmd.env(ipc::BOOTSTRAP_ENV, &server_name)
        .env(ipc::WORKER_ID_ENV, id.to_string());

    if config.close_stdout {
        cmd.stdout(Stdio::null());
    }
    if config.close_stderr {
        cmd.stderr(Stdio::null());
    }

    let child = cmd.spawn()?;

    let (_bootstrap_rx, channels) = server.accept().map_err(|e| {
        crate::error::Error::ReportChannelLost {
            worker_id: id,
            message: e.to_string(),
        }
    })?;
    let ipc::WorkerChannels {
        report_rx,
        control_tx,
    } = channels;

    control_tx
        .send(ControlMsg::Init {
            corpus: snapshot.corpus.iter().cloned().collect(),
            coverage: snapshot.coverage.to_pairs(),
            config: config.clone(),
        })
        .map_err(|e| crate::error::Error::ReportChannelLost {
            worker_id: id,
            message: e.to_string(),
        })?;

    Ok(WorkerHandle {
        id,
        child,
        report_rx,
        control_tx,
    })
}

/// Entry point run inside a worker process (detected in [`crate::run`] via
/// [`ipc::WORKER_ID_ENV`]). Never returns on its own; exits the process on
/// `Shutdown` or when the control/report channel is lost.
pub fn worker_main() -> ! {
    let worker_id: usize = std::env::var(ipc::WORKER_ID_ENV)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let server_name =
        std::env::var(ipc::BOOTSTRAP_ENV).expect("worker process missing bootstrap env var");

    let (report_tx, control_rx) = ipc::connect_worker(&server_name)
        .unwrap_or_else(|e| panic!("worker {worker_id} failed IPC handshake: {e:?}"));

    let (mut corpus, mut local_coverage, config) = match control_rx.recv() {
        Ok(ControlMsg::Init {
            corpus,
            coverage,
            config,
        }) => (
            Corpus::from_samples(corpus),
            CoverageMap::from_pairs(coverage),
            config,
        ),
        other => panic!("worker {worker_id} expected Init as first control message, got {other:?}"),
    };

    let mut rng = ChaCha20Rng::from_rng(rand::rngs::OsRng).expect("OS entropy source available");

    tracer::install();

    // Executions since the last report of any kind. Flushed as part of the
    // next `NewCoverage`/`Crash` report, or on its own via `ExecCount` once
    // `EXEC_FLUSH_INTERVAL` uninteresting executions pile up — otherwise the
    // orchestrator's `execs=`/`execs/s=` progress line would only ever count
    // reports, not the (much larger) true number of target invocations.
    let mut execs_since_report: u64 = 0;

    loop {
        for msg in drain_pending(&control_rx) {
            match msg {
                ControlMsg::NewSample(sample) => {
                    corpus.put(sample);
                }
                ControlMsg::Shutdown => std::process::exit(0),
                ControlMsg::Init { .. } => {}
            }
        }

        let sample = corpus.sample(&mut rng);
        let mutated = Mutator::mutate(&sample, &mut rng);

        let (outcome, new_edges) = run_one(&mutated, config.start_method);
        execs_since_report += 1;

        let newly_known = local_coverage.merge(&new_edges);

        let report = match outcome {
            Err(error_text) => Some(WorkerReport::Crash {
                sample: mutated,
                error_text,
                new_edges: newly_known,
                execs: execs_since_report,
            }),
            Ok(()) if !newly_known.is_empty() => Some(WorkerReport::NewCoverage {
                sample: mutated,
                new_edges: newly_known,
                execs: execs_since_report,
            }),
            Ok(()) if execs_since_report >= EXEC_FLUSH_INTERVAL => {
                Some(WorkerReport::ExecCount(execs_since_report))
            }
            Ok(()) => None,
        };

        if let Some(report) = report {
            execs_since_report = 0;
            if report_tx.send(report).is_err() {
                // Lost the report channel: the orchestrator is gone.
                std::process::exit(0);
            }
        }
    }
}

/// How many uninteresting executions a worker runs before it flushes an
/// `ExecCount` heartbeat on its own, rather than waiting on a `NewCoverage`
/// or `Crash` report to piggy-back the tally onto.
pub const EXEC_FLUSH_INTERVAL: u64 = 4096;

fn drain_pending(control_rx: &IpcReceiver<ControlMsg>) -> Vec<ControlMsg> {
    let mut msgs = Vec::new();
    while let Ok(msg) = control_rx.try_recv() {
        msgs.push(msg);
    }
    msgs
}

/// Runs one target invocation and returns its outcome plus the edges
/// observed while running it. In `Spawn` mode this happens directly inside
/// the worker process; in `ForkServer` mode it is isolated inside a
/// short-lived child so a native abort inside the target only costs that
/// one invocation, never the worker's accumulated corpus/coverage state.
fn run_one(input: &[u8], start_method: StartMethod) -> (Result<(), String>, CoverageMap) {
    match start_method {
        StartMethod::Spawn => run_in_process(input),
        StartMethod::ForkServer => run_in_fork(input).unwrap_or_else(|e| {
            (
                Err(format!("forkserver invocation failed: {e}")),
                CoverageMap::new(),
            )
        }),
    }
}

fn run_in_process(input: &[u8]) -> (Result<(), String>, CoverageMap) {
    tracer::reinstall_if_displaced();
    tracer::reset();
    let outcome = std::panic::catch_unwind(|| fuzzforge_target::invoke(input))
        .unwrap_or_else(|payload| Err(panic_message(payload)));
    (outcome, tracer::drain())
}

#[cfg(unix)]
fn run_in_fork(input: &[u8]) -> std::io::Result<(Result<(), String>, CoverageMap)> {
    use nix::sys::wait::waitpid;
    use nix::unistd::{fork, ForkResult};
    use std::fs::File;
    use std::io::Read;

    let (read_end, write_end) = nix::unistd::pipe().map_err(std::io::Error::from)?;

    match unsafe { fork() }.map_err(std::io::Error::from)? {
        ForkResult::Parent { child } => {
            drop(write_end);
            let mut read_file = File::from(read_end);
            let mut buf = Vec::new();
            read_file.read_to_end(&mut buf)?;
            waitpid(child, None).map_err(std::io::Error::from)?;
            let decoded = bincode::deserialize(&buf)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            Ok(decoded)
        }
        ForkResult::Child => {
            drop(read_end);
            let (outcome, edges) = run_in_process(input);
            let payload = bincode::serialize(&(outcome, edges)).expect("report always serializes");
            let mut write_file = File::from(write_end);
            let _ = write_file.write_all(&payload);
            let _ = write_file.flush();
            std::process::exit(0);
        }
    }
}

#[cfg(not(unix))]
fn run_in_fork(input: &[u8]) -> std::io::Result<(Result<(), String>, CoverageMap)> {
    Ok(run_in_process(input))
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "target panicked with a non-string payload".to_string()
    }
}

