//! The `fuzzforge` command-line surface (`spec.md` §6), modeled on the
//! teacher's `main.rs`/`options.rs` split: a `Command` enum dispatched
//! through a small `RunCommand`-style trait, one function per subcommand.

use crate::config::{FuzzConfig, StartMethod};
use crate::error::{Error, Result};
use crate::orchestrator;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "fuzzforge", version, about = "A coverage-guided, in-process fuzzing engine")]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalOpts {
    /// Directory recorded crashes are written to.
    #[arg(long, global = true, default_value = "./crashes")]
    crash_dir: PathBuf,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the fuzzer (or, with `--regression`, replay recorded crashes).
    Fuzz(FuzzArgs),
    /// Print each recorded crash's path and a truncated payload preview.
    Show,
}

#[derive(Debug, Args)]
struct FuzzArgs {
    /// Directory of seed inputs.
    seed_dir: PathBuf,

    /// State file location. Absent disables persistence.
    #[arg(long)]
    state: Option<PathBuf>,

    /// Number of worker processes. Defaults to the host's CPU count.
    #[arg(long)]
    num_workers: Option<usize>,

    /// Global wall-clock budget, in seconds.
    #[arg(long)]
    max_time: Option<u64>,

    /// Stop after this many distinct crashes have been recorded.
    #[arg(long)]
    max_crashes: Option<u64>,

    /// Progress reporting period, in seconds.
    #[arg(long, default_value_t = 3)]
    stat_frequency: u64,

    /// Workers close stdout before invoking the target.
    #[arg(long)]
    close_stdout: bool,

    /// Workers close stderr before invoking the target.
    #[arg(long)]
    close_stderr: bool,

    /// Replay the crash directory instead of fuzzing (`spec.md` §4.6
    /// "Regression mode").
    #[arg(long)]
    regression: bool,

    /// Worker process-creation discipline. `fork` is a recognized value
    /// that is deliberately rejected, not merely absent (`spec.md` §8
    /// "No-fork").
    #[arg(long, default_value = "spawn")]
    start_method: String,
}

/// Parsed from `std::env::args()` by [`crate::run`]. Never returns; calls
/// `std::process::exit` with the code documented in `spec.md` §6.
pub fn main() -> ! {
    env_logger::init();
    let cli = Cli::parse();
    let code = match dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fuzzforge: {e}");
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Fuzz(args) => run_fuzz(&cli.global, args),
        Command::Show => run_show(&cli.global),
    }
}

fn run_fuzz(global: &GlobalOpts, args: FuzzArgs) -> Result<i32> {
    if args.regression {
        let still_crashing = orchestrator::run_regression(&global.crash_dir)?;
        return Ok(if still_crashing > 0 { 1 } else { 0 });
    }

    let start_method: StartMethod = args.start_method.parse()?;

    let config = FuzzConfig {
        seed_dir: args.seed_dir,
        crash_dir: global.crash_dir.clone(),
        state_path: args.state,
        num_workers: args.num_workers.unwrap_or_else(num_cpus::get),
        max_time: args.max_time.map(Duration::from_secs),
        max_crashes: args.max_crashes,
        stat_frequency: Duration::from_secs(args.stat_frequency),
        close_stdout: args.close_stdout,
        close_stderr: args.close_stderr,
        start_method,
        load_crashes_as_seeds: true,
        checkpoint_interval: Duration::from_secs(30),
        worker_grace_period: Duration::from_secs(2),
    };

    orchestrator::run(&config)
}

fn run_show(global: &GlobalOpts) -> Result<i32> {
    use crate::crash::CrashDirectory;

    let crashes = CrashDirectory::open(&global.crash_dir)?;
    for path in crashes.iter()? {
        let bytes = std::fs::read(&path).map_err(Error::Io)?;
        let preview_len = bytes.len().min(256);
        let preview = String::from_utf8_lossy(&bytes[..preview_len]);
        println!("{}\t{}", path.display(), preview);
    }
    Ok(0)
}
