//! Failure classification and backoff delays.

use std::time::Duration;

use lumagate_core::UpstreamError;
use rand::Rng;

/// Upper bound of the additive jitter, as a fraction of the exponential delay.
pub const JITTER_RATIO: f64 = 0.3;

/// Whether retrying `error` can help.
///
/// Rate limits, 5xx responses, timeouts, cancellations and transport failures
/// are transient. Every other client error is permanent: the request itself is
/// invalid and will fail the same way again.
pub fn is_retryable(error: &UpstreamError) -> bool {
    match error {
        UpstreamError::RateLimited
        | UpstreamError::Timeout
        | UpstreamError::Cancelled
        | UpstreamError::Connection(_) => true,
        UpstreamError::Status { status: code, .. } | UpstreamError::Vendor { code, .. } => {
            is_transient_status(*code)
        }
        UpstreamError::InvalidRequest(_)
        | UpstreamError::DeviceNotFound(_)
        | UpstreamError::Unauthorized(_) => false,
    }
}

/// Whether `error` is a rate limit signal (HTTP 429 or the vendor equivalent).
pub fn is_rate_limit(error: &UpstreamError) -> bool {
    match error {
        UpstreamError::RateLimited => true,
        UpstreamError::Status { status: code, .. } | UpstreamError::Vendor { code, .. } => {
            *code == 429
        }
        _ => false,
    }
}

fn is_transient_status(code: u16) -> bool {
    matches!(code, 408 | 429 | 500..=599)
}

/// Exponential backoff with additive jitter, capped at `max`.
///
/// `delay = min(initial * 2^attempt + jitter, max)` where jitter is uniform in
/// `[0, 0.3 * initial * 2^attempt]`.
pub fn backoff_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let sample = rand::thread_rng().gen_range(0.0..=1.0);
    jittered_delay(attempt, initial, max, sample)
}

/// Deterministic form of [`backoff_delay`]. `sample` is the uniform draw in
/// `[0, 1]` that scales the jitter; values outside are clamped.
pub fn jittered_delay(attempt: u32, initial: Duration, max: Duration, sample: f64) -> Duration {
    let base = exponential_delay(attempt, initial);
    let jitter_ms = base.as_secs_f64() * 1000.0 * JITTER_RATIO * sample.clamp(0.0, 1.0);
    let jitter = Duration::from_micros((jitter_ms * 1000.0).round() as u64);
    base.saturating_add(jitter).min(max)
}

/// `initial * 2^attempt` without jitter or cap, saturating on overflow.
pub fn exponential_delay(attempt: u32, initial: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    initial.saturating_mul(factor)
}
