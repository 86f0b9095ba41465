// src/engine/common.rs
//
// Common utilities shared across engine modules.
// Codec calls go through `run_with_panic_policy` so a panic inside a native
// codec binding becomes a job error instead of killing the unit thread.

use crate::error::ProcessError;
use std::panic::{catch_unwind, AssertUnwindSafe};

pub type EngineResult<T> = std::result::Result<T, ProcessError>;

/// Run `f`, converting a panic into `ProcessError::InternalPanic`.
///
/// `label` names the operation (e.g. `"encode:jpeg"`) and is carried into
/// the error message.
pub fn run_with_panic_policy<T, F>(label: &'static str, f: F) -> EngineResult<T>
where
    F: FnOnce() -> EngineResult<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            tracing::error!(target: "imgbatch::pipeline", label, %detail, "codec panicked");
            Err(ProcessError::internal_panic(format!("{label}: {detail}")))
        }
    }
}
