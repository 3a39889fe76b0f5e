//! Shared utilities and error types

pub mod error;

pub use error::{BootstrapError, RequestError, Result};

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Guarded state in this crate is plain flags and handles, so a poisoned lock
/// never leaves it half-updated.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
