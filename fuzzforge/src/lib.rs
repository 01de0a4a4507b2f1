//! `fuzzforge`: a coverage-guided, in-process fuzzing engine.
//!
//! A harness binary depends on this crate and on `fuzzforge-target`, calls
//! `fuzzforge_target::fuzz_target!` once, then calls [`run`] from its own
//! `main`. [`run`] detects whether the current process is the orchestrator
//! (the CLI) or a worker re-exec'd by [`worker::spawn`], and dispatches
//! accordingly.

pub mod config;
pub mod corpus;
pub mod coverage;
pub mod crash;
pub mod error;
pub mod ipc;
pub mod mutator;
pub mod orchestrator;
pub mod state;
pub mod tracer;
pub mod worker;

pub use error::{Error, Result};

/// Entry point called from a harness binary's `main`, after
/// `fuzz_target!`. If the process was re-exec'd as a worker (the
/// [`ipc::WORKER_ID_ENV`] env var is set), it never returns — it runs the
/// worker main loop until killed. Otherwise it parses `std::env::args()` as
/// the `fuzzforge` CLI and runs the orchestrator, exiting with the code
/// documented in `spec.md` §6.
pub fn run() -> ! {
    if std::env::var_os(ipc::WORKER_ID_ENV).is_some() {
        worker::worker_main();
    }
    crate::cli::main();
}

mod cli;
