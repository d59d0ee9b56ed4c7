//! Reconnection backoff calculation.
//!
//! Pure, sync-only math. The client endpoint supplies the randomness and does
//! the sleeping.

use std::time::Duration;

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Exponential backoff with symmetric jitter.
///
/// Formula: `min(max_delay, base_delay * 2^attempt) * (1 + (random * 2 - 1) * jitter)`
///
/// `attempt` is zero-based (0 for the first retry) and `random` should be a
/// value in `[0.0, 1.0)` from a PRNG. A jitter factor of 0.2 varies the delay
/// by ±20% around the capped exponential value.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn backoff_delay(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> Duration {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor.clamp(0.0, 1.0);
    let with_jitter = (capped as f64) * jitter;

    Duration::from_millis(with_jitter.round().max(0.0) as u64)
}

/// Whether `attempts` consecutive failures exhaust a retry budget.
///
/// `None` means retry forever.
#[must_use]
pub fn retries_exhausted(attempts: u32, max_retries: Option<u32>) -> bool {
    max_retries.is_some_and(|max| attempts > max)
}
