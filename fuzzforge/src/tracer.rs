//! Tracer adapter (`spec.md` §4.4).
//!
//! The actual edge-hit notifications are an external collaborator (`spec.md`
//! §1): some coverage instrumentation — here, a SanitizerCoverage-style
//! `-Cpasses=sancov-module` build of the harness, in the spirit of the
//! teacher's use of `libafl_targets`' `COUNTERS_MAPS`/guard callbacks — calls
//! into [`__sanitizer_cov_trace_pc_guard`] on every control-flow transfer.
//! Everything this module owns — turning those calls into `(prev, cur)`
//! edges, the per-process coverage set, `reset`/`drain` — is in scope.

use crate::coverage::CoverageMap;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

thread_local! {
    /// The previous location, shifted right by one bit to break the
    /// A→B / B→A symmetry (a standard SanitizerCoverage trick).
    static PREV_LOCATION: Cell<u64> = Cell::new(0);
}

static LOCAL_COVERAGE: Mutex<Option<CoverageMap>> = Mutex::new(None);
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Installs the adapter as the process's coverage collector. Idempotent;
/// safe to call more than once (e.g. speculatively, from both the
/// orchestrator and every worker).
pub fn install() {
    if INSTALLED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        *LOCAL_COVERAGE.lock().unwrap() = Some(CoverageMap::new());
    }
}

/// Re-installs the adapter if something displaced it. Rust offers no
/// portable way to *detect* that a competing tracer took over the single
/// instrumentation slot a host runtime exposes (unlike a VM with a single
/// mutable hook register); `reset`/`drain` always operate on our own static,
/// so in practice this is a no-op beyond the first call. Kept as a distinct
/// entry point, called once per worker iteration, so a future host runtime
/// that *can* report displacement has somewhere to plug in.
pub fn reinstall_if_displaced() {
    install();
}

/// Called by instrumented code on every control-flow transfer into the
/// location identified by `*guard`. Records the edge `(prev, cur)` and
/// updates `prev <- cur >> 1`.
///
/// # Safety
/// `guard` must point at a valid, `'static`-lived `u32` allocated by the
/// instrumentation pass (the usual SanitizerCoverage contract).
#[no_mangle]
pub unsafe extern "C" fn __sanitizer_cov_trace_pc_guard(guard: *mut u32) {
    if guard.is_null() {
        return;
    }
    let cur = *guard as u64;
    record_edge(cur);
}

fn record_edge(cur: u64) {
    let prev = PREV_LOCATION.with(|p| p.get());
    let mut guard = LOCAL_COVERAGE.lock().unwrap();
    let map = guard.get_or_insert_with(CoverageMap::new);
    map.observe((prev, cur));
    PREV_LOCATION.with(|p| p.set(cur >> 1));
}

/// Clears this process's local coverage, keeping the installed hook in
/// place. Called by the worker loop before every target invocation.
pub fn reset() {
    install();
    PREV_LOCATION.with(|p| p.set(0));
    if let Some(map) = LOCAL_COVERAGE.lock().unwrap().as_mut() {
        *map = CoverageMap::new();
    }
}

/// Returns this process's local coverage observed since the last `reset`
/// and clears it.
pub fn drain() -> CoverageMap {
    install();
    LOCAL_COVERAGE
        .lock()
        .unwrap()
        .replace(CoverageMap::new())
        .unwrap_or_default()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn record_then_drain_observes_edge() {
        reset();
        record_edge(10);
        record_edge(20);
        let drained = drain();
        assert!(drained.size() >= 1);
    }

    #[test]
    fn drain_clears_local_state() {
        reset();
        record_edge(1);
        let _ = drain();
        let again = drain();
        assert!(again.is_empty());
    }
}
