//! Test support
//!
//! Tests that touch the process-wide engine hold this lock so allocation
//! counts and the handler slot are observed without interference from other
//! tests. Operations take the engine's own operation lock internally, so
//! this is a separate mutex layered above it.

use std::sync::{Mutex, MutexGuard};

static SERIAL: Mutex<()> = Mutex::new(());

pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
