//! Worker transport (`spec.md` §4.5, §6, §9 "Worker transport").
//!
//! A bidirectional, length-prefixed, typed channel per worker. `ipc-channel`
//! gives us that framing plus the ability to hand freshly created channel
//! endpoints across the process boundary during the bootstrap handshake,
//! which is the part a hand-rolled pipe protocol would otherwise have to
//! reimplement.

use crate::config::WorkerConfig;
use crate::coverage::CoverageMap;
use crate::corpus::Sample;
use ipc_channel::ipc::{self, IpcOneShotServer, IpcReceiver, IpcSender};
use serde::{Deserialize, Serialize};

/// Env var a spawned worker reads to find the bootstrap one-shot server.
pub const BOOTSTRAP_ENV: &str = "FUZZFORGE_BOOTSTRAP_SERVER";
/// Env var marking a process as a worker (vs. the orchestrator/CLI).
pub const WORKER_ID_ENV: &str = "FUZZFORGE_WORKER_ID";

#[derive(Debug, Serialize, Deserialize)]
pub enum WorkerReport {
    /// The sample produced at least one edge not previously known to this
    /// worker. `execs` is the number of target invocations this worker has
    /// run since its last report of any kind (inclusive of this one), so the
    /// orchestrator's execution tally stays accurate even though
    /// uninteresting executions are otherwise discarded (`spec.md` §4.6's
    /// progress line needs a true count, not a count of reports).
    NewCoverage {
        sample: Sample,
        new_edges: CoverageMap,
        execs: u64,
    },
    /// The target raised an uncaught error.
    Crash {
        sample: Sample,
        error_text: String,
        new_edges: CoverageMap,
        execs: u64,
    },
    /// A periodic heartbeat carrying the number of target invocations run
    /// since the last report, sent whenever a worker goes
    /// [`crate::worker::EXEC_FLUSH_INTERVAL`] executions without anything
    /// interesting to report — otherwise a long uninteresting stretch would
    /// never be reflected in `execs=`/`execs/s=`.
    ExecCount(u64),
}

impl WorkerReport {
    /// The number of target invocations this report accounts for. `0` for
    /// `ExecCount`, which the caller is expected to match on directly instead
    /// (it carries no sample/edges to merge).
    pub fn execs(&self) -> u64 {
        match self {
            WorkerReport::NewCoverage { execs, .. } => *execs,
            WorkerReport::Crash { execs, .. } => *execs,
            WorkerReport::ExecCount(_) => 0,
        }
    }
}

/// Messages the orchestrator sends down to a worker.
#[derive(Debug, Serialize, Deserialize)]
pub enum ControlMsg {
    /// Sent exactly once, immediately after the handshake: the worker's
    /// starting local corpus/coverage snapshot and its configuration.
    Init {
        corpus: Vec<Sample>,
        coverage: Vec<((u64, u64), u64)>,
        config: WorkerConfig,
    },
    /// A sample the orchestrator's canonical corpus just grew by; workers
    /// fold it into their local corpus on their next non-blocking drain.
    NewSample(Sample),
    Shutdown,
}

/// The payload a worker sends through the bootstrap one-shot server: the
/// receiving half of a fresh report channel (so the orchestrator can receive
/// from it) and the sending half of a fresh control channel (so the
/// orchestrator can send to it). Handing over already-constructed channel
/// endpoints like this is exactly what `ipc-channel`'s one-shot server is
/// for; a worker cannot usefully send its own `IpcSender` for reports,
/// because the *orchestrator* is the party that must end up holding the
/// `IpcReceiver`.
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerChannels {
    pub report_rx: IpcReceiver<WorkerReport>,
    pub control_tx: IpcSender<ControlMsg>,
}

/// Orchestrator side of the handshake: open the bootstrap server, return its
/// name (to be passed to the child via [`BOOTSTRAP_ENV`]) and a closure that
/// completes the handshake once the child has connected.
pub fn bootstrap_server() -> std::io::Result<(IpcOneShotServer<WorkerChannels>, String)> {
    IpcOneShotServer::<WorkerChannels>::new()
}

/// Worker side of the handshake: connect to the orchestrator's bootstrap
/// server and hand it fresh report/control channel endpoints. Returns the
/// worker's own sending half for reports and receiving half for control.
pub fn connect_worker(
    server_name: &str,
) -> std::io::Result<(IpcSender<WorkerReport>, IpcReceiver<ControlMsg>)> {
    let bootstrap_tx: IpcSender<WorkerChannels> =
        IpcSender::connect(server_name.to_string()).map_err(to_io_error)?;
    let (report_tx, report_rx) = ipc::channel::<WorkerReport>().map_err(to_io_error)?;
    let (control_tx, control_rx) = ipc::channel::<ControlMsg>().map_err(to_io_error)?;
    bootstrap_tx
        .send(WorkerChannels {
            report_rx,
            control_tx,
        })
        .map_err(to_io_error)?;
    Ok((report_tx, control_rx))
}

fn to_io_error(e: impl std::fmt::Debug) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, format!("{e:?}"))
}
