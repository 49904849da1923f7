//! Tier-keyed rate limiting over the shared KV.
//!
//! Fixed windows (minute, hour, day) with atomic `INCR` and an `EXPIRE` on
//! the first write of each window. A KV outage fails open: the caller is
//! allowed through and a warning is logged, because an unavailable limiter
//! must degrade availability of the limiter, not of the kernel.

use rmk_core::{Clock, Error, Result, SharedKv, Tier, UserContext};
use std::sync::Arc;
use std::time::Duration;

/// One window's quota.
#[derive(Debug, Clone, Copy)]
struct Window {
    name: &'static str,
    secs: i64,
    limit: u32,
}

/// Per-tier quotas over the three windows.
#[derive(Debug, Clone, Copy)]
pub struct TierQuota {
    pub per_minute: u32,
    pub per_hour: u32,
    pub per_day: u32,
}

impl TierQuota {
    /// Quota for a tier; `None` means unlimited.
    #[must_use]
    pub fn for_tier(tier: Tier) -> Option<Self> {
        match tier {
            Tier::Free => Some(Self {
                per_minute: 20,
                per_hour: 300,
                per_day: 2_000,
            }),
            Tier::Pro => Some(Self {
                per_minute: 120,
                per_hour: 3_000,
                per_day: 20_000,
            }),
            Tier::Enterprise => Some(Self {
                per_minute: 600,
                per_hour: 20_000,
                per_day: 200_000,
            }),
            Tier::Unlimited => None,
        }
    }

    fn windows(&self) -> [Window; 3] {
        [
            Window {
                name: "minute",
                secs: 60,
                limit: self.per_minute,
            },
            Window {
                name: "hour",
                secs: 3_600,
                limit: self.per_hour,
            },
            Window {
                name: "day",
                secs: 86_400,
                limit: self.per_day,
            },
        ]
    }
}

/// Windowed counter rate limiter.
pub struct RateLimiter {
    kv: Arc<dyn SharedKv>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(kv: Arc<dyn SharedKv>, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    /// Count one call for `(user, endpoint)` and enforce the tier quota.
    ///
    /// Returns [`Error::RateLimited`] with the seconds until the tightest
    /// exceeded window rolls over.
    pub async fn check(&self, user: &UserContext, endpoint: &str) -> Result<()> {
        let Some(quota) = TierQuota::for_tier(user.tier) else {
            return Ok(());
        };

        let now = self.clock.now().timestamp();
        for window in quota.windows() {
            let window_start = now - now.rem_euclid(window.secs);
            let key = format!(
                "ratelimit:{}:{}:{}:{}",
                user.user_id, endpoint, window.name, window_start
            );

            let count = match self.kv.incr(&key).await {
                Ok(count) => count,
                Err(err) => {
                    // Fail open: the limiter being down is not a reason to
                    // refuse service.
                    tracing::warn!(error = %err, "rate-limit kv unavailable, allowing request");
                    return Ok(());
                }
            };
            if count == 1 {
                // First hit of the window owns the expiry. Slack past the
                // window end keeps the key alive for late readers.
                let ttl = Duration::from_secs((window.secs + 5) as u64);
                if let Err(err) = self.kv.expire(&key, ttl).await {
                    tracing::warn!(error = %err, "rate-limit expire failed");
                }
            }

            if count > i64::from(window.limit) {
                let retry_after_secs = (window_start + window.secs - now).max(0) as u64;
                return Err(Error::RateLimited { retry_after_secs });
            }
        }
        Ok(())
    }
}
