use std::path::PathBuf;

/// Error kinds surfaced to the CLI boundary (`cli.rs`), which maps them to
/// the exit codes documented for the `fuzz`/`show` subcommands.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("seed directory {0:?} does not exist or is not a directory")]
    SeedDirInvalid(PathBuf),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("state file {path:?} has schema version {found}, expected {expected}")]
    StateSchemaMismatch {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("state file {path:?} is corrupt: {source}")]
    StateCorrupt {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("failed to write crash {path:?}: {source}")]
    CrashWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("the `fork` start method is forbidden: the orchestrator may hold locks (inside the serialization or logging layers) at fork time that would deadlock a forked worker; use `spawn` or `forkserver`")]
    ForkForbidden,

    #[error("lost the report channel to worker {worker_id}: {message}")]
    ReportChannelLost { worker_id: usize, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Exit codes, per the CLI contract: 0 clean, 1 crash recorded, 2 invalid
/// invocation, other non-zero is a fatal internal error.
impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::SeedDirInvalid(_) | Error::ForkForbidden | Error::InvalidArgument(_) => 2,
            Error::StateSchemaMismatch { .. } | Error::StateCorrupt { .. } => 2,
            Error::CrashWrite { .. } | Error::ReportChannelLost { .. } | Error::Io(_) => 70,
        }
    }
}
