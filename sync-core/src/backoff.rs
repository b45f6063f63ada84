//! Retry and reconnect delays.

use std::time::Duration;

/// Upper bound on the delay between retries of one failed item.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Upper bound on reconnect jitter, in milliseconds.
const MAX_JITTER_MS: u64 = 5000;

/// Delay before an item that failed `attempts` times is eligible again.
///
/// Formula: min(300s, 2^attempts seconds)
pub fn retry_delay(attempts: u32) -> Duration {
    // 2^9 already exceeds the cap.
    let base_secs = 2u64.pow(attempts.min(9));
    Duration::from_secs(base_secs).min(MAX_RETRY_DELAY)
}

/// Random delay applied before the first cycle after reconnecting, so many
/// clients coming back online together do not hit the remote at once.
///
/// Falls back to no delay if the OS random source is unavailable.
pub fn reconnect_jitter() -> Duration {
    let mut bytes = [0u8; 8];
    match getrandom::getrandom(&mut bytes) {
        Ok(()) => {
            let random = u64::from_le_bytes(bytes);
            Duration::from_millis(random % (MAX_JITTER_MS + 1))
        }
        Err(_) => Duration::ZERO,
    }
}
