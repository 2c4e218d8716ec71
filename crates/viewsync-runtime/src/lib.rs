//! viewsync-runtime: async render coordination and Context lifecycle for
//! viewsync, plus the engine facade and inspection socket used by the
//! `viewsync` binary.
//!
//! All engine state is process-local and in memory. The binary runs on a
//! current-thread tokio runtime, so Contexts interleave cooperatively on one
//! worker; the library itself works on either flavor.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod server;

pub use config::EngineConfig;
pub use coordinator::RenderCoordinator;
pub use engine::Engine;
pub use error::{ConfigError, EngineError};
pub use lifecycle::{DEFAULT_CLEANUP_DELAY, LifecycleManager};

/// Lock a std mutex, recovering the data if a panicking holder poisoned it.
/// None of the guarded state is left half-updated across a panic point.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
