//! Fixed-window rate limiting keyed by credential or network origin.
//!
//! One counting slot per key, guarded by a single lock so a check and its
//! increment are atomic: two concurrent requests can never both claim the
//! last allowance in a window.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use relay_core::Clock;

/// Configuration for the ingestion rate limiter.
#[derive(Debug, Clone)]
pub struct LimitConfig {
    /// Length of one counting window.
    pub window: Duration,
    /// Requests allowed per key per window.
    pub max_requests: u32,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self { window: Duration::from_secs(1), max_requests: 5 }
    }
}

/// Key a request is counted under.
///
/// Requests carrying a credential are counted per token; everything else is
/// counted per normalized network origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateKey {
    /// Keyed by the presented secret token.
    Token(String),
    /// Keyed by the normalized network origin.
    Origin(String),
}

impl RateKey {
    /// Derives the counting key for one request.
    ///
    /// Prefers the credential token; an absent or empty token falls back to
    /// the caller's normalized network origin.
    pub fn derive(token: Option<&str>, origin: IpAddr) -> Self {
        match token {
            Some(token) if !token.is_empty() => Self::Token(token.to_owned()),
            _ => Self::Origin(canonical_origin(origin)),
        }
    }
}

/// Normalizes a network origin for rate-limit keying.
///
/// IPv4-mapped IPv6 addresses collapse to their IPv4 form. Native IPv6
/// addresses are truncated to their /64 prefix, since a caller typically
/// controls the whole interface suffix and could otherwise dodge the
/// counter by varying it.
fn canonical_origin(origin: IpAddr) -> String {
    match origin {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => match v6.to_canonical() {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => {
                let segments = v6.segments();
                format!(
                    "{:x}:{:x}:{:x}:{:x}::/64",
                    segments[0], segments[1], segments[2], segments[3]
                )
            },
        },
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowSlot {
    window_index: u64,
    count: u32,
}

/// Fixed-window request counter.
///
/// Windows are aligned to wall-clock multiples of the configured width. A
/// slot whose window has passed is reset in place on the next request for
/// its key.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    config: LimitConfig,
    windows: Mutex<HashMap<RateKey, WindowSlot>>,
}

impl RateLimiter {
    /// Creates a limiter counting against the given clock.
    pub fn new(config: LimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self { clock, config, windows: Mutex::new(HashMap::new()) }
    }

    /// Counts one request against the key and reports whether it is allowed.
    ///
    /// A rejected request is still counted as an attempt in its window, but
    /// rejections never extend or reset the window.
    pub fn allow(&self, key: &RateKey) -> bool {
        let window_ms =
            u64::try_from(self.config.window.as_millis()).unwrap_or(u64::MAX).max(1);
        let window_index = self.clock.unix_millis() / window_ms;

        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let slot =
            windows.entry(key.clone()).or_insert(WindowSlot { window_index, count: 0 });

        if slot.window_index != window_index {
            slot.window_index = window_index;
            slot.count = 0;
        }

        if slot.count >= self.config.max_requests {
            return false;
        }

        slot.count += 1;
        true
    }
}
