//! Retry helpers for node RPC calls
//!
//! Exponential backoff with a cap, driven by the `bitcoin_rpc` config section.

use std::time::Duration;

/// Calculate next backoff duration using exponential backoff with a maximum cap
///
/// `new_backoff = min(current_backoff * multiplier, max_backoff)`
///
/// # Example
/// ```
/// use std::time::Duration;
/// use counterparty_txcodec::backend::calculate_next_backoff;
///
/// let backoff = Duration::from_millis(100);
/// let next = calculate_next_backoff(backoff, 2.0, 30);
/// assert_eq!(next, Duration::from_millis(200));
/// ```
pub fn calculate_next_backoff(
    current_backoff: Duration,
    multiplier: f64,
    max_backoff_seconds: u64,
) -> Duration {
    Duration::from_millis((current_backoff.as_millis() as f64 * multiplier) as u64)
        .min(Duration::from_secs(max_backoff_seconds))
}

/// Node messages that mean "does not exist"; retrying cannot help
pub fn is_not_found_message(message: &str) -> bool {
    message.contains("No such mempool or blockchain transaction")
        || message.contains("Invalid or non-wallet transaction id")
}
