//! Outbound request timeout shared by model providers and tools.
//!
//! Streaming chat requests are exempt; only whole-body calls are bounded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const TIMEOUT_ENV: &str = "REFLEX_HTTP_TIMEOUT_SECS";
const DEFAULT_SECS: u64 = 60;

static TIMEOUT_SECS: AtomicU64 = AtomicU64::new(DEFAULT_SECS);

/// Positive whole seconds, surrounding whitespace allowed.
fn parse_secs(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|secs| *secs > 0)
}

/// Apply `REFLEX_HTTP_TIMEOUT_SECS` when it holds a positive number and
/// return the timeout now in effect.
pub fn init_from_env() -> Duration {
    if let Ok(raw) = std::env::var(TIMEOUT_ENV) {
        match parse_secs(&raw) {
            Some(secs) => set_duration(Duration::from_secs(secs)),
            None => tracing::warn!(
                target: "reflex::providers",
                value = %raw,
                "ignoring invalid {TIMEOUT_ENV}"
            ),
        }
    }
    get_duration()
}

pub fn get_duration() -> Duration {
    Duration::from_secs(TIMEOUT_SECS.load(Ordering::Relaxed))
}

/// Sub-second values round up to one second.
pub fn set_duration(timeout: Duration) {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    TIMEOUT_SECS.store(secs.max(1), Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_positive_seconds_only() {
        assert_eq!(parse_secs(" 45 "), Some(45));
        assert_eq!(parse_secs("0"), None);
        assert_eq!(parse_secs("-3"), None);
        assert_eq!(parse_secs("soon"), None);
    }

    #[test]
    fn set_rounds_up_and_never_reaches_zero() {
        let before = get_duration();
        set_duration(Duration::from_millis(1500));
        assert_eq!(get_duration(), Duration::from_secs(2));
        set_duration(Duration::ZERO);
        assert_eq!(get_duration(), Duration::from_secs(1));
        set_duration(before);
        assert_eq!(get_duration(), before);
    }
}
