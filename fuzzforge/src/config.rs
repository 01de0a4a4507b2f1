//! Shared configuration types, passed from the CLI layer into the
//! orchestrator and, via the `Init` control message, into every worker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartMethod {
    Spawn,
    ForkServer,
}

impl fmt::Display for StartMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StartMethod::Spawn => "spawn",
            StartMethod::ForkServer => "forkserver",
        })
    }
}

/// Parses `--start-method`. Recognizes (and rejects with a descriptive
/// error) the literal value `fork`, rather than letting it fall through to
/// clap's generic "invalid value" message — `spec.md` §8's "No-fork"
/// property wants a *descriptive* failure, not just an absent enum variant.
impl FromStr for StartMethod {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spawn" => Ok(StartMethod::Spawn),
            "forkserver" => Ok(StartMethod::ForkServer),
            "fork" => Err(crate::error::Error::ForkForbidden),
            other => Err(crate::error::Error::InvalidArgument(format!(
                "--start-method: unknown value {other:?} (expected spawn, forkserver)"
            ))),
        }
    }
}

/// The subset of fuzzing configuration a worker actually needs, shipped to
/// it over the `Init` control message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub start_method: StartMethod,
    pub close_stdout: bool,
    pub close_stderr: bool,
}

/// Orchestrator-only configuration (everything the CLI's `fuzz` subcommand
/// accepts), per `spec.md` §6.
#[derive(Debug, Clone)]
pub struct FuzzConfig {
    pub seed_dir: PathBuf,
    pub crash_dir: PathBuf,
    pub state_path: Option<PathBuf>,
    pub num_workers: usize,
    pub max_time: Option<Duration>,
    pub max_crashes: Option<u64>,
    pub stat_frequency: Duration,
    pub close_stdout: bool,
    pub close_stderr: bool,
    pub start_method: StartMethod,
    pub load_crashes_as_seeds: bool,
    pub checkpoint_interval: Duration,
    pub worker_grace_period: Duration,
}

impl FuzzConfig {
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            start_method: self.start_method,
            close_stdout: self.close_stdout,
            close_stderr: self.close_stderr,
        }
    }
}
