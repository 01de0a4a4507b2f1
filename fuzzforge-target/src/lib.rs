//! Harness-side glue for `fuzzforge`.
//!
//! A fuzz target crate depends on this crate (for [`fuzz_target!`]) and on
//! `fuzzforge` (to actually run the engine). The macro registers the user's
//! closure in a process-global slot; `fuzzforge::run` looks it up once, at
//! startup, in both the orchestrator process and every worker process.

pub use arbitrary;
use once_cell::sync::OnceCell;
use std::fmt;

#[doc(hidden)]
pub static TARGET: OnceCell<Box<dyn Fn(&[u8]) -> Result<(), String> + Send + Sync>> =
    OnceCell::new();

#[doc(hidden)]
pub static DEBUG_DUMP_PATH: OnceCell<String> = OnceCell::new();

/// Converts a fuzz target body's return value into the crash/no-crash outcome
/// the engine understands. Implemented for `()` (the target cannot itself
/// signal failure other than by panicking) and for any `Result<T, E>` where
/// `E: Display` (an `Err` is reported as a crash with that text).
pub trait ReportOutcome {
    fn into_outcome(self) -> Result<(), String>;
}

impl ReportOutcome for () {
    fn into_outcome(self) -> Result<(), String> {
        Ok(())
    }
}

impl<T, E: fmt::Display> ReportOutcome for Result<T, E> {
    fn into_outcome(self) -> Result<(), String> {
        self.map(|_| ()).map_err(|e| e.to_string())
    }
}

#[doc(hidden)]
pub fn register(target: impl Fn(&[u8]) -> Result<(), String> + Send + Sync + 'static) {
    if let Ok(path) = std::env::var("FUZZFORGE_DEBUG_DUMP_PATH") {
        let _ = DEBUG_DUMP_PATH.set(path);
    }
    TARGET
        .set(Box::new(target))
        .unwrap_or_else(|_| panic!("fuzz_target! invoked more than once in this binary"));
}

/// Invokes the registered target. Returns `Err` describing the symbol that
/// is missing if no harness crate ever called [`fuzz_target!`].
#[doc(hidden)]
pub fn invoke(bytes: &[u8]) -> Result<(), String> {
    let target = TARGET
        .get()
        .expect("no fuzz target registered; call fuzz_target!() in your harness crate's main");
    if let Some(path) = DEBUG_DUMP_PATH.get() {
        let _ = std::fs::write(path, bytes);
    }
    target(bytes)
}

/// Define a fuzz target.
///
/// Call this once, from the harness binary's `main`, before
/// `fuzzforge::run()`:
///
/// ```ignore
/// fn main() {
///     fuzzforge_target::fuzz_target!(|data: &[u8]| {
///         let _ = my_crate::parse(data);
///     });
///     fuzzforge::run();
/// }
/// ```
///
/// The body may evaluate to `()` (only panics are reported as crashes) or to
/// a `Result<T, E>` (an `Err` is also reported as a crash, using `E`'s
/// `Display` output as the crash's error text).
///
/// ## Arbitrary input types
///
/// As with `libfuzzer-sys`, a typed parameter implementing [`arbitrary::Arbitrary`]
/// may be used instead of a raw byte slice; inputs too short for that type are
/// skipped rather than treated as a crash.
#[macro_export]
macro_rules! fuzz_target {
    (|$data:ident| $body:expr) => {
        $crate::fuzz_target!(|$data: &[u8]| $body);
    };

    (|$data:ident: &[u8]| $body:expr) => {
        $crate::register(|$data: &[u8]| {
            use $crate::ReportOutcome;
            ($body).into_outcome()
        })
    };

    (|$data:ident: $dty:ty| $body:expr) => {
        $crate::register(|bytes: &[u8]| {
            use $crate::arbitrary::{Arbitrary, Unstructured};
            use $crate::ReportOutcome;

            if bytes.len() < <$dty as Arbitrary>::size_hint(0).0 {
                return Ok(());
            }
            let mut u = Unstructured::new(bytes);
            let $data = match <$dty as Arbitrary>::arbitrary_take_rest(&mut u) {
                Ok(d) => d,
                Err(_) => return Ok(()),
            };
            ($body).into_outcome()
        })
    };
}
