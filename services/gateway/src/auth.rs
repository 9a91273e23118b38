//! API-key authentication with per-IP rate limiting and temporary blocks.
//!
//! Every HTTP endpoint requires a non-empty `X-API-Key` matching the
//! configured key. Requests are limited per IP per minute, and three failed
//! auth attempts within a minute block the IP for five minutes.

use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};
use std::net::IpAddr;
use std::time::{Duration, Instant};

const FAILURE_WINDOW: Duration = Duration::from_secs(60);
const FAILURES_BEFORE_BLOCK: u32 = 3;
const BLOCK_DURATION: Duration = Duration::from_secs(300);

/// Why a request was rejected.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthRejection {
    /// Missing or wrong key.
    InvalidKey,
    /// Per-minute ceiling reached.
    RateLimited,
    /// IP temporarily blocked after repeated auth failures.
    Blocked,
}

struct WindowCounter {
    window_start: Instant,
    count: u32,
}

struct FailureRecord {
    window_start: Instant,
    failures: u32,
    blocked_until: Option<Instant>,
}

pub struct ApiKeyAuth {
    key: SecretString,
    max_per_minute: u32,
    requests: DashMap<IpAddr, WindowCounter>,
    failures: DashMap<IpAddr, FailureRecord>,
}

impl ApiKeyAuth {
    pub fn new(key: SecretString, max_per_minute: u32) -> Self {
        Self {
            key,
            max_per_minute,
            requests: DashMap::new(),
            failures: DashMap::new(),
        }
    }

    /// Validates one request from `ip` carrying `provided` as its key.
    pub fn check(&self, ip: IpAddr, provided: Option<&str>) -> Result<(), AuthRejection> {
        let now = Instant::now();

        if let Some(record) = self.failures.get(&ip) {
            if let Some(until) = record.blocked_until {
                if now < until {
                    return Err(AuthRejection::Blocked);
                }
            }
        }

        if !self.within_rate_limit(ip, now) {
            return Err(AuthRejection::RateLimited);
        }

        let valid = provided
            .map(|key| !key.is_empty() && key == self.key.expose_secret())
            .unwrap_or(false);
        if valid {
            return Ok(());
        }

        self.record_failure(ip, now);
        Err(AuthRejection::InvalidKey)
    }

    fn within_rate_limit(&self, ip: IpAddr, now: Instant) -> bool {
        let mut entry = self.requests.entry(ip).or_insert_with(|| WindowCounter {
            window_start: now,
            count: 0,
        });
        if now.duration_since(entry.window_start) >= Duration::from_secs(60) {
            entry.window_start = now;
            entry.count = 0;
        }
        entry.count += 1;
        entry.count <= self.max_per_minute
    }

    fn record_failure(&self, ip: IpAddr, now: Instant) {
        let mut record = self.failures.entry(ip).or_insert_with(|| FailureRecord {
            window_start: now,
            failures: 0,
            blocked_until: None,
        });
        if now.duration_since(record.window_start) >= FAILURE_WINDOW {
            record.window_start = now;
            record.failures = 0;
        }
        record.failures += 1;
        if record.failures >= FAILURES_BEFORE_BLOCK {
            record.blocked_until = Some(now + BLOCK_DURATION);
            tracing::warn!(%ip, "ip blocked after repeated auth failures");
        }
    }
}
