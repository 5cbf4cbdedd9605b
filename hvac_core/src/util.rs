//! Common time helpers for hvac_core.

/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;
/// Number of milliseconds in one hour.
pub const MILLIS_PER_HOUR: u64 = 3_600_000;

#[inline]
pub fn secs_to_ms(secs: u64) -> u64 {
    secs.saturating_mul(MILLIS_PER_SEC)
}

/// Fractional seconds to whole milliseconds; negative and non-finite map to 0.
#[inline]
pub fn fsecs_to_ms(secs: f64) -> u64 {
    if !secs.is_finite() || secs <= 0.0 {
        return 0;
    }
    (secs * MILLIS_PER_SEC as f64).round().min(u64::MAX as f64) as u64
}

#[inline]
pub fn ms_to_secs(ms: u64) -> f64 {
    ms as f64 / MILLIS_PER_SEC as f64
}

#[inline]
pub fn ms_to_hours(ms: u64) -> f64 {
    ms as f64 / MILLIS_PER_HOUR as f64
}

/// Controller `dt` in seconds: elapsed since the previous evaluation, capped at
/// `max_secs`, or `default_secs` on the first evaluation.
#[inline]
pub fn step_dt_secs(last_ms: Option<u64>, now_ms: u64, default_secs: f64, max_secs: f64) -> f64 {
    match last_ms {
        Some(prev) if now_ms > prev => ms_to_secs(now_ms - prev).min(max_secs),
        _ => default_secs,
    }
}
