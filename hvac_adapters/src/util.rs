use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use crate::error::{AdapterError, Result};

/// Acquire `m`, polling `try_lock` until it succeeds or `timeout` expires.
/// Sleeps in small intervals to avoid CPU spinning. A poisoned lock is
/// recovered, since the guarded data is reloaded from disk anyway.
pub fn lock_with_timeout<T>(
    m: &Mutex<T>,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<MutexGuard<'_, T>> {
    let deadline = Instant::now() + timeout;
    loop {
        match m.try_lock() {
            Ok(g) => return Ok(g),
            Err(TryLockError::Poisoned(p)) => return Ok(p.into_inner()),
            Err(TryLockError::WouldBlock) => {}
        }
        if Instant::now() >= deadline {
            return Err(AdapterError::LockTimeout);
        }
        std::thread::sleep(poll_interval);
    }
}

/// Escape a line-protocol tag key or value: commas, equals signs and spaces.
pub fn escape_tag(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, ',' | '=' | ' ') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape a line-protocol string field value: double quotes and backslashes.
pub fn escape_field_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
