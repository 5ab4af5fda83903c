//! Timeout validation for browser operations

use std::time::Duration;

use crate::error::{ScraperError, ScraperResult};

/// Maximum timeout for page loads (5 minutes)
pub const MAX_NAVIGATION_TIMEOUT_MS: u64 = 300_000;

/// Maximum timeout for waiting on page content (2 minutes)
pub const MAX_INTERACTION_TIMEOUT_MS: u64 = 120_000;

/// Validate the page-load timeout
///
/// Zero is rejected; a navigation that may not take any time never succeeds.
pub fn validate_navigation_timeout(timeout_ms: u64) -> ScraperResult<Duration> {
    if timeout_ms == 0 || timeout_ms > MAX_NAVIGATION_TIMEOUT_MS {
        return Err(ScraperError::InvalidSearch(format!(
            "Page load timeout must be between 1ms and {}ms ({} minutes). Received: {}ms",
            MAX_NAVIGATION_TIMEOUT_MS,
            MAX_NAVIGATION_TIMEOUT_MS / 60_000,
            timeout_ms
        )));
    }

    Ok(Duration::from_millis(timeout_ms))
}

/// Validate a content wait (result rows, inbound screen)
pub fn validate_interaction_timeout(timeout_ms: u64) -> ScraperResult<Duration> {
    if timeout_ms > MAX_INTERACTION_TIMEOUT_MS {
        return Err(ScraperError::InvalidSearch(format!(
            "Wait timeout cannot exceed {}ms ({} seconds). Received: {}ms ({} seconds)",
            MAX_INTERACTION_TIMEOUT_MS,
            MAX_INTERACTION_TIMEOUT_MS / 1000,
            timeout_ms,
            timeout_ms / 1000
        )));
    }

    Ok(Duration::from_millis(timeout_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_bounds() {
        assert!(validate_navigation_timeout(0).is_err());
        assert!(validate_navigation_timeout(MAX_NAVIGATION_TIMEOUT_MS + 1).is_err());
        assert_eq!(
            validate_navigation_timeout(60_000).unwrap(),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn interaction_allows_zero() {
        assert_eq!(validate_interaction_timeout(0).unwrap(), Duration::ZERO);
        assert!(validate_interaction_timeout(MAX_INTERACTION_TIMEOUT_MS + 1).is_err());
    }
}
