//! Exponential backoff schedule.

use std::time::Duration;

/// Delay to wait before retry number `retry` (0-based).
///
/// The schedule is `initial, initial*m, initial*m^2, ...`, each value clamped
/// to `max`. Multipliers below 1.0 are treated as 1.0.
pub fn calculate_backoff(retry: u32, initial: Duration, multiplier: f64, max: Duration) -> Duration {
    let exponent = retry.min(i32::MAX as u32) as i32;
    let factor = multiplier.max(1.0).powi(exponent);
    let delay_ms = initial.as_millis() as f64 * factor;
    let capped_ms = delay_ms.min(max.as_millis() as f64);

    Duration::from_millis(capped_ms as u64)
}
