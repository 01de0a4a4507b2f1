//! The orchestrator (`spec.md` §4.6).
//!
//! Single-threaded and reactive: it multiplexes over the worker report
//! channels, a periodic timer, and termination conditions. Only it mutates
//! the canonical corpus and coverage map; workers only ever see snapshots
//! and broadcasts of them.

use crate::config::FuzzConfig;
use crate::corpus::Sample;
use crate::coverage::CoverageMap;
use crate::crash::CrashDirectory;
use crate::error::Result;
use crate::ipc::{ControlMsg, WorkerReport};
use crate::state::SessionState;
use crate::worker::{self, WorkerHandle};
use ipc_channel::ipc::TryRecvError;
use std::time::{Duration, Instant};

/// Lifecycle of a `fuzz` run (`spec.md` §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Running,
    Draining,
    Stopped,
}

/// Counters reported on the periodic stdout progress line.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub executions: u64,
    pub edges: usize,
    pub corpus_size: usize,
    pub crashes: u64,
}

/// Runs a full `fuzz` session: spawns workers, drives the Running loop until
/// a termination condition fires, drains, checkpoints, and returns the exit
/// code per `spec.md` §6 (0 clean, 1 if any crash was recorded).
pub fn run(config: &FuzzConfig) -> Result<i32> {
    let mut phase = Phase::Initializing;
    log::info!("{phase:?}: loading state, seeds, and (optionally) prior crashes");

    let mut state = initialize(config)?;
    let crashes = CrashDirectory::open(&config.crash_dir)?;

    let mut workers: Vec<WorkerHandle> = Vec::with_capacity(config.num_workers);
    let worker_config = config.worker_config();
    for id in 0..config.num_workers {
        workers.push(worker::spawn(id, &worker_config, &state)?);
    }

    phase = Phase::Running;
    log::info!("{phase:?}: {} worker(s) online", workers.len());

    let mut stats = Stats {
        corpus_size: state.corpus.len(),
        edges: state.coverage.size(),
        ..Stats::default()
    };
    let mut crash_count: u64 = 0;

    let start = Instant::now();
    let mut last_stat = Instant::now();
    let mut last_checkpoint = Instant::now();
    let poll_interval = Duration::from_millis(50);

    'running: loop {
        if let Some(max_time) = config.max_time {
            if start.elapsed() >= max_time {
                break 'running;
            }
        }
        if let Some(max_crashes) = config.max_crashes {
            if crash_count >= max_crashes {
                break 'running;
            }
        }

        let mut made_progress = false;
        let mut broadcasts: Vec<Sample> = Vec::new();
        let mut dead: Vec<usize> = Vec::new();

        for (idx, worker) in workers.iter_mut().enumerate() {
            match worker.report_rx.try_recv() {
                Ok(WorkerReport::ExecCount(execs)) => {
                    made_progress = true;
                    stats.executions += execs;
                }
                Ok(report) => {
                    made_progress = true;
                    stats.executions += report.execs();
                    if let Some(new_sample) =
                        apply_report(&mut state, &crashes, report, &mut stats, &mut crash_count)?
                    {
                        broadcasts.push(new_sample);
                    }
                }
                Err(TryRecvError::Empty) => continue,
                Err(TryRecvError::IpcError(_)) => {
                    // `spec.md` §6/§7: the worker process died without
                    // sending a report first (a native abort, a kill -9, ...).
                    // The sample that killed it is lost; respawn from
                    // current canonical state and keep going.
                    log::warn!(
                        "worker {} lost its report channel (likely died without reporting); respawning",
                        worker.id
                    );
                    dead.push(idx);
                }
            }
        }

        for idx in dead {
            let _ = workers[idx].child.kill();
            let _ = workers[idx].child.wait();
            let id = workers[idx].id;
            workers[idx] = worker::spawn(id, &worker_config, &state)?;
            made_progress = true;
        }

        for sample in broadcasts {
            for worker in &workers {
                // Best-effort: spec §5 treats a full/gone buffer as
                // drop-oldest-and-reconverge, not fatal.
                let _ = worker.control_tx.send(ControlMsg::NewSample(sample.clone()));
            }
        }

        if last_stat.elapsed() >= config.stat_frequency {
            emit_stats(&stats, start.elapsed());
            last_stat = Instant::now();
        }

        if last_checkpoint.elapsed() >= config.checkpoint_interval {
            if let Some(path) = &config.state_path {
                state.save_atomically(path)?;
            }
            last_checkpoint = Instant::now();
        }

        if !made_progress {
            std::thread::sleep(poll_interval);
        }
    }

    phase = Phase::Draining;
    log::info!("{phase:?}: shutting down workers");
    drain(&mut workers, config.worker_grace_period);

    if let Some(path) = &config.state_path {
        state.save_atomically(path)?;
    }
    emit_stats(&stats, start.elapsed());

    phase = Phase::Stopped;
    log::info!("{phase:?}: {crash_count} crash(es) recorded");

    Ok(if crash_count > 0 { 1 } else { 0 })
}

/// Loads the starting `(Corpus, CoverageMap)` per `spec.md` §4.6
/// Initialization steps 1-3 (step 4, spawning workers, is the caller's job).
fn initialize(config: &FuzzConfig) -> Result<SessionState> {
    let mut state = match &config.state_path {
        Some(path) => SessionState::load_or_default(path)?,
        None => SessionState::new(),
    };

    if !config.seed_dir.is_dir() {
        return Err(crate::error::Error::SeedDirInvalid(config.seed_dir.clone()));
    }
    for entry in std::fs::read_dir(&config.seed_dir)?.filter_map(|e| e.ok()) {
        if entry.path().is_file() {
            if let Ok(bytes) = std::fs::read(entry.path()) {
                state.corpus.put(bytes);
            }
        }
    }

    if config.load_crashes_as_seeds && config.crash_dir.is_dir() {
        let crashes = CrashDirectory::open(&config.crash_dir)?;
        for path in crashes.iter()? {
            if let Ok(bytes) = std::fs::read(&path) {
                state.corpus.put(bytes);
            }
        }
    }

    Ok(state)
}

/// Applies one worker report to canonical state, per the merge rules of
/// `spec.md` §4.6 "Running loop". Returns `Some(sample)` if the sample should
/// be broadcast to every worker (it entered the canonical corpus).
fn apply_report(
    state: &mut SessionState,
    crashes: &CrashDirectory,
    report: WorkerReport,
    stats: &mut Stats,
    crash_count: &mut u64,
) -> Result<Option<Sample>> {
    match report {
        WorkerReport::NewCoverage {
            sample,
            new_edges,
            execs: _,
        } => {
            let genuinely_new = state.coverage.merge(&new_edges);
            stats.edges = state.coverage.size();
            if !genuinely_new.is_empty() && state.corpus.put(sample.clone()) {
                stats.corpus_size = state.corpus.len();
                return Ok(Some(sample));
            }
            Ok(None)
        }
        WorkerReport::Crash {
            sample,
            error_text: _,
            new_edges,
            execs: _,
        } => {
            let genuinely_new = state.coverage.merge(&new_edges);
            stats.edges = state.coverage.size();

            let is_new_crash = record_crash_with_retry(crashes, &sample)?;
            if is_new_crash {
                *crash_count += 1;
                stats.crashes = *crash_count;
            }

            if !genuinely_new.is_empty() && state.corpus.put(sample.clone()) {
                stats.corpus_size = state.corpus.len();
                return Ok(Some(sample));
            }
            Ok(None)
        }
        WorkerReport::ExecCount(_) => {
            // The run loop and `run_once_in_process` both intercept
            // `ExecCount` before it reaches this function; it carries no
            // sample or edges to merge.
            unreachable!("ExecCount is handled by the caller before apply_report")
        }
    }
}

/// `spec.md` §7 "Crash-directory write failure": logged, retried once, then
/// escalated (the error propagates and the orchestrator does not continue,
/// since a crash the engine cannot durably record is one it cannot safely
/// claim to have found).
fn record_crash_with_retry(crashes: &CrashDirectory, sample: &[u8]) -> Result<bool> {
    match crashes.record(sample) {
        Ok(created) => Ok(created),
        Err(e) => {
            log::warn!("failed to write crash to disk, retrying once: {e}");
            crashes.record(sample)
        }
    }
}

/// Emits the structured stdout progress line (`spec.md` §4.6, §7 "User-visible
/// failure behavior": progress always goes to stdout).
fn emit_stats(stats: &Stats, elapsed: Duration) {
    let secs = elapsed.as_secs_f64().max(1e-9);
    let exec_per_sec = stats.executions as f64 / secs;
    println!(
        "execs={} execs/s={:.1} edges={} corpus={} crashes={}",
        stats.executions, exec_per_sec, stats.edges, stats.corpus_size, stats.crashes
    );
}

/// Draining: shutdown every worker, wait up to `grace_period`, force-kill the
/// stragglers (`spec.md` §4.6 "Draining", §5 "Cancellation").
fn drain(workers: &mut [WorkerHandle], grace_period: Duration) {
    for worker in workers.iter() {
        let _ = worker.control_tx.send(ControlMsg::Shutdown);
    }

    let deadline = Instant::now() + grace_period;
    for worker in workers.iter_mut() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if !wait_with_timeout(&mut worker.child, remaining) {
            log::warn!(
                "worker {} did not exit within the grace period; killing",
                worker.id
            );
            let _ = worker.child.kill();
            let _ = worker.child.wait();
        }
    }
}

/// Polls `child` for exit until `timeout` elapses. There is no portable
/// `std::process::Child::wait_timeout`, so we poll `try_wait` on a short
/// interval, matching what `spec.md` §5 calls a "bounded grace period".
fn wait_with_timeout(child: &mut std::process::Child, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {
                if Instant::now() >= deadline {
                    return false;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(_) => return false,
        }
    }
}

/// Regression mode (`spec.md` §4.6 "distinct entry point"): no workers, no
/// mutation. Every recorded crash is replayed in-process under
/// `catch_unwind`; samples that still raise are reported on stdout. Returns
/// the count that still reproduce.
pub fn run_regression(crash_dir: &std::path::Path) -> Result<usize> {
    let crashes = CrashDirectory::open(crash_dir)?;
    let mut still_crashing = 0;

    for path in crashes.iter()? {
        let bytes = std::fs::read(&path)?;
        let outcome = std::panic::catch_unwind(|| fuzzforge_target::invoke(&bytes));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error_text)) => {
                still_crashing += 1;
                println!("{}: {}", path.display(), error_text);
            }
            Err(_) => {
                still_crashing += 1;
                println!("{}: target panicked", path.display());
            }
        }
    }

    Ok(still_crashing)
}

/// In-process test harness (`SPEC_FULL.md` §12): exercises the Running loop
/// against a registered target without spawning real OS processes, so the
/// concrete scenarios of `spec.md` §8 can run deterministically inside
/// `cargo test`. Single in-process "worker" that draws, mutates, and invokes
/// the target directly; the merge rules are identical to the real loop.
#[doc(hidden)]
pub fn run_once_in_process(
    config: &FuzzConfig,
    max_executions: u64,
) -> Result<(SessionState, Stats)> {
    use crate::mutator::Mutator;
    use crate::tracer;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    let mut state = initialize(config)?;
    let crashes = CrashDirectory::open(&config.crash_dir)?;
    let mut stats = Stats {
        corpus_size: state.corpus.len(),
        edges: state.coverage.size(),
        ..Stats::default()
    };
    let mut crash_count: u64 = 0;

    tracer::install();

    let mut rng = ChaCha20Rng::seed_from_u64(0);
    let start = Instant::now();

    for _ in 0..max_executions {
        if let Some(max_time) = config.max_time {
            if start.elapsed() >= max_time {
                break;
            }
        }
        if let Some(max_crashes) = config.max_crashes {
            if crash_count >= max_crashes {
                break;
            }
        }

        let sample = state.corpus.sample(&mut rng);
        let mutated = Mutator::mutate(&sample, &mut rng);

        tracer::reinstall_if_displaced();
        tracer::reset();
        let outcome = std::panic::catch_unwind(|| fuzzforge_target::invoke(&mutated))
            .unwrap_or_else(|payload| {
                Err(worker_panic_message(payload))
            });
        let new_edges = tracer::drain();

        stats.executions += 1;

        let report = match outcome {
            Err(error_text) => WorkerReport::Crash {
                sample: mutated,
                error_text,
                new_edges,
                execs: 1,
            },
            Ok(()) => {
                let already_known = new_edges.is_empty();
                if already_known {
                    continue;
                }
                WorkerReport::NewCoverage {
                    sample: mutated,
                    new_edges,
                    execs: 1,
                }
            }
        };

        apply_report(&mut state, &crashes, report, &mut stats, &mut crash_count)?;
    }

    Ok((state, stats))
}

fn worker_panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "target panicked with a non-string payload".to_string()
    }
}

// `cargo test` runs tests in this module on separate threads inside one
// process, but `fuzzforge_target::TARGET` and the tracer's coverage statics
// are process-global (`spec.md` §9 "global mutable state" accepts exactly
// this tradeoff for a worker process). Run with `--test-threads=1` if these
// ever interleave; not fixed here for the same reason `tracer.rs`'s own
// tests aren't.
#[cfg(test)]
mod test {
    use super::*;
    use crate::config::StartMethod;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Once;

    // `fuzzforge_target::TARGET` is a process-global `OnceCell`: it can be
    // registered exactly once per test binary. Every test in this module
    // shares one target whose behavior is toggled through `CRASH_ENABLED`,
    // rather than each test trying to register its own.
    static REGISTER: Once = Once::new();
    static CRASH_ENABLED: AtomicBool = AtomicBool::new(false);

    fn register_shared_target() {
        REGISTER.call_once(|| {
            fuzzforge_target::register(|bytes: &[u8]| {
                if CRASH_ENABLED.load(Ordering::SeqCst) && bytes.first() == Some(&0x41) {
                    Err("divide by zero".to_string())
                } else {
                    Ok(())
                }
            });
        });
    }

    fn base_config(seed_dir: &std::path::Path, crash_dir: &std::path::Path) -> FuzzConfig {
        FuzzConfig {
            seed_dir: seed_dir.to_path_buf(),
            crash_dir: crash_dir.to_path_buf(),
            state_path: None,
            num_workers: 1,
            max_time: Some(Duration::from_secs(5)),
            max_crashes: None,
            stat_frequency: Duration::from_secs(3600),
            close_stdout: false,
            close_stderr: false,
            start_method: StartMethod::Spawn,
            load_crashes_as_seeds: false,
            checkpoint_interval: Duration::from_secs(3600),
            worker_grace_period: Duration::from_secs(1),
        }
    }

    #[test]
    fn scenario_1_trivial_crash_is_recorded() {
        register_shared_target();
        CRASH_ENABLED.store(true, Ordering::SeqCst);

        let seed_dir = tempfile::tempdir().unwrap();
        std::fs::write(seed_dir.path().join("empty"), b"").unwrap();
        let crash_dir = tempfile::tempdir().unwrap();

        let config = base_config(seed_dir.path(), crash_dir.path());
        let (_, stats) = run_once_in_process(&config, 20_000).unwrap();

        assert!(stats.crashes >= 1, "expected at least one recorded crash");
        let crashes = CrashDirectory::open(crash_dir.path()).unwrap();
        let recorded: Vec<_> = crashes.iter().unwrap().collect();
        assert_eq!(recorded.len() as u64, stats.crashes);
        let any_starts_with_0x41 = recorded
            .iter()
            .any(|p| std::fs::read(p).map(|b| b.first() == Some(&0x41)).unwrap_or(false));
        assert!(any_starts_with_0x41);
    }

    #[test]
    fn scenario_3_no_op_target_terminates_cleanly() {
        register_shared_target();
        CRASH_ENABLED.store(false, Ordering::SeqCst);

        let seed_dir = tempfile::tempdir().unwrap();
        std::fs::write(seed_dir.path().join("seed"), b"anything").unwrap();
        let crash_dir = tempfile::tempdir().unwrap();

        let mut config = base_config(seed_dir.path(), crash_dir.path());
        config.max_time = Some(Duration::from_millis(50));

        let (_, stats) = run_once_in_process(&config, 1_000_000).unwrap();
        assert_eq!(stats.crashes, 0);
    }
}
