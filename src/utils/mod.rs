// src/utils/mod.rs

pub mod error;
pub mod file;
pub mod locale;
pub mod logger;
pub mod path;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock without propagating poisoning; the guarded data stays usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
