//! Process-wide, one-shot backend initialization (`spec.md` §5:
//! "The backend library requires a one-shot global initialization (install
//! fatal-error handler, register targets/disassemblers). This runs exactly
//! once per process, guarded by a process-wide flag").
//!
//! Grounded in `examples/original_source/llvm/InitializeLLVM.cpp` and
//! `initialize-llvm.cc`: both call `LLVMInitializeNativeTarget` /
//! `llvm::InitializeNativeTarget` plus the disassembler and fatal-error
//! handler exactly once, guarded by whatever the source's own call site
//! ensures. `std::sync::Once` is the idiomatic Rust realization of that
//! discipline (`SPEC_FULL.md` §5, expansion).

use std::sync::Once;

static INIT: Once = Once::new();

/// Runs `init_fn` exactly once for the lifetime of the process. Subsequent
/// calls, even with a different `init_fn`, are no-ops — matching the
/// source's assumption that "all subsequent `Run` calls assume
/// initialization is complete."
///
/// `init_fn` should install the backend's fatal-error handler and register
/// whatever targets/disassemblers it needs; this crate does not call into a
/// real backend itself; `Backend` implementations are expected to call
/// this from their own constructor.
pub fn ensure_backend_initialized(init_fn: impl FnOnce()) {
    INIT.call_once(init_fn);
}

/// True once `ensure_backend_initialized` has run at least once. Useful in
/// multithreaded-mode assertions (`spec.md` §5: "the initialization routine
/// must assert that flag").
pub fn backend_is_initialized() -> bool {
    INIT.is_completed()
}
