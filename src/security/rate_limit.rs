//! Per-address abuse rate limiting.
//!
//! Every request adds one drip to its source address's bucket and a
//! background task leaks `average` drips per second from every bucket.
//! Above `burst` drips the client is told to slow down; above `hard_limit`
//! the address is banned for a fixed `ban_secs`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

use crate::config::schema::RateLimitConfig;
use crate::observability::metrics;

/// Leak interval of the decay task.
pub const DECAY_INTERVAL: Duration = Duration::from_secs(1);

/// Result of recording one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateCheck {
    pub count: u32,
    pub soft_exceeded: bool,
}

/// Gate decision for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    SlowDown { retry_after_secs: u64 },
    Banned { retry_after_secs: u64 },
}

#[derive(Default)]
struct LimiterState {
    buckets: HashMap<IpAddr, u32>,
    bans: HashMap<IpAddr, Instant>,
}

/// Shared limiter state, guarded by a single lock.
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            state: Mutex::new(LimiterState::default()),
            config,
        }
    }

    /// Add one drip for `addr`, banning it when the hard limit is crossed.
    pub fn record_and_check(&self, addr: IpAddr) -> RateCheck {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        let bucket = state.buckets.entry(addr).or_insert(0);
        *bucket = bucket.saturating_add(1);
        let count = *bucket;

        if count > self.config.hard_limit && !state.bans.contains_key(&addr) {
            let ban = Duration::from_secs(self.config.ban_secs);
            state.bans.insert(addr, Instant::now() + ban);
            tracing::warn!(client = %addr, count, ban_secs = self.config.ban_secs, "Banning client");
        }

        RateCheck {
            count,
            soft_exceeded: count > self.config.burst,
        }
    }

    pub fn is_banned(&self, addr: IpAddr) -> bool {
        self.ban_remaining(addr).is_some()
    }

    fn ban_remaining(&self, addr: IpAddr) -> Option<Duration> {
        let state = self.state.lock().expect("rate limiter mutex poisoned");
        state
            .bans
            .get(&addr)
            .and_then(|until| until.checked_duration_since(Instant::now()))
            .filter(|remaining| !remaining.is_zero())
    }

    /// Current drip count for `addr`.
    pub fn count(&self, addr: IpAddr) -> u32 {
        let state = self.state.lock().expect("rate limiter mutex poisoned");
        state.buckets.get(&addr).copied().unwrap_or(0)
    }

    /// Gate one connection from `addr`.
    pub fn admit(&self, addr: IpAddr) -> Admission {
        if !self.config.enabled {
            return Admission::Allowed;
        }

        if let Some(remaining) = self.ban_remaining(addr) {
            metrics::record_rate_limited("banned");
            return Admission::Banned {
                retry_after_secs: remaining.as_secs().max(1),
            };
        }

        let check = self.record_and_check(addr);
        if let Some(remaining) = self.ban_remaining(addr) {
            metrics::record_rate_limited("banned");
            return Admission::Banned {
                retry_after_secs: remaining.as_secs().max(1),
            };
        }

        if check.soft_exceeded {
            metrics::record_rate_limited("slow_down");
            let excess = u64::from(check.count - self.config.burst);
            let average = u64::from(self.config.average.max(1));
            return Admission::SlowDown {
                retry_after_secs: excess.div_ceil(average),
            };
        }

        Admission::Allowed
    }

    /// Leak every bucket once and expire finished bans.
    pub fn decay(&self) {
        let leak = self.config.average;
        let now = Instant::now();
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");

        state.buckets.retain(|_, drips| {
            if *drips <= leak {
                false
            } else {
                *drips -= leak;
                true
            }
        });
        state.bans.retain(|addr, until| {
            let active = *until > now;
            if !active {
                tracing::info!(client = %addr, "Ban expired");
            }
            active
        });
    }

    /// Run the periodic leak until shutdown.
    pub async fn run_decay(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(DECAY_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.decay(),
                _ = shutdown.recv() => {
                    tracing::debug!("Rate limiter decay task stopping");
                    break;
                }
            }
        }
    }
}
