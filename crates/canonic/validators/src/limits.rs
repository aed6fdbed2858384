use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use canonic_registry::{Validator, ValidatorFault};
use canonic_types::{ActionContext, Verdict};
use serde::{Deserialize, Serialize};

pub const RATE_ID: &str = "rate.limit";
pub const RECIPIENT_LIMIT_ID: &str = "recipient.limit";

/// Payload of `rate.limit`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Actions permitted per initiator within one window.
    pub max_actions: usize,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_actions: 20,
            window_secs: 60,
        }
    }
}

/// Sliding-window limit on actions per initiator.
///
/// The only built-in with shared mutable state; evaluations of concurrent
/// actions serialize on the counter.
pub struct RateLimit {
    config: RateLimitConfig,
    seen: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimit {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            seen: Mutex::new(HashMap::new()),
        }
    }

    fn admit(&self, initiator: &str, now: Instant) -> Result<Verdict, ValidatorFault> {
        let window = Duration::from_secs(self.config.window_secs);
        let mut seen = self
            .seen
            .lock()
            .map_err(|_| ValidatorFault::Internal("rate counter lock poisoned".into()))?;
        // Initiators whose window has emptied are forgotten.
        seen.retain(|_, recent| {
            while recent
                .front()
                .is_some_and(|oldest| now.duration_since(*oldest) >= window)
            {
                recent.pop_front();
            }
            !recent.is_empty()
        });
        let recent = seen.entry(initiator.to_string()).or_default();

        if recent.len() >= self.config.max_actions {
            return Ok(Verdict::fail(format!(
                "rate limit exceeded: {} actions in {}s",
                recent.len(),
                self.config.window_secs
            )));
        }
        recent.push_back(now);
        Ok(Verdict::Pass)
    }
}

#[async_trait]
impl Validator for RateLimit {
    fn id(&self) -> &str {
        RATE_ID
    }

    async fn check(&self, context: &ActionContext) -> Result<Verdict, ValidatorFault> {
        self.admit(&context.initiator, Instant::now())
    }
}

/// Payload of `recipient.limit`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecipientLimitConfig {
    /// Above this many recipients the action proceeds with a warning.
    pub warn_above: usize,
    /// Above this many recipients the action is blocked.
    pub max: usize,
}

impl Default for RecipientLimitConfig {
    fn default() -> Self {
        Self {
            warn_above: 10,
            max: 50,
        }
    }
}

/// Soft and hard caps on recipient count.
pub struct RecipientLimit {
    config: RecipientLimitConfig,
}

impl RecipientLimit {
    pub fn new(config: RecipientLimitConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Validator for RecipientLimit {
    fn id(&self) -> &str {
        RECIPIENT_LIMIT_ID
    }

    async fn check(&self, context: &ActionContext) -> Result<Verdict, ValidatorFault> {
        let count = context.recipients.len();
        if count > self.config.max {
            Ok(Verdict::fail(format!(
                "too many recipients: {} exceeds limit {}",
                count, self.config.max
            )))
        } else if count > self.config.warn_above {
            Ok(Verdict::warn(format!(
                "{} recipients exceeds soft limit {}",
                count, self.config.warn_above
            )))
        } else {
            Ok(Verdict::Pass)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from(initiator: &str, recipients: usize) -> ActionContext {
        ActionContext::builder(initiator)
            .recipients((0..recipients).map(|i| format!("r{}@x.com", i)))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn rate_limit_counts_per_initiator() {
        let limit = RateLimit::new(RateLimitConfig {
            max_actions: 2,
            window_secs: 3600,
        });
        let dex = from("user:dex", 1);
        assert_eq!(limit.check(&dex).await.unwrap(), Verdict::Pass);
        assert_eq!(limit.check(&dex).await.unwrap(), Verdict::Pass);
        assert_eq!(
            limit.check(&dex).await.unwrap(),
            Verdict::fail("rate limit exceeded: 2 actions in 3600s")
        );
        assert_eq!(limit.check(&from("user:ana", 1)).await.unwrap(), Verdict::Pass);
    }

    #[tokio::test]
    async fn rate_limit_window_expires() {
        let limit = RateLimit::new(RateLimitConfig {
            max_actions: 1,
            window_secs: 0,
        });
        let dex = from("user:dex", 1);
        assert_eq!(limit.check(&dex).await.unwrap(), Verdict::Pass);
        assert_eq!(limit.check(&dex).await.unwrap(), Verdict::Pass);
    }

    #[tokio::test]
    async fn idle_initiators_are_forgotten() {
        let limit = RateLimit::new(RateLimitConfig {
            max_actions: 1,
            window_secs: 0,
        });
        for i in 0..5 {
            let who = format!("user:{i}");
            assert_eq!(limit.check(&from(&who, 1)).await.unwrap(), Verdict::Pass);
        }
        // Only the latest initiator's window still holds an action.
        let seen = limit.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen.contains_key("user:4"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checks_admit_exactly_the_limit() {
        let limit = std::sync::Arc::new(RateLimit::new(RateLimitConfig {
            max_actions: 5,
            window_secs: 3600,
        }));
        let dex = from("user:dex", 1);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let limit = limit.clone();
                let ctx = dex.clone();
                tokio::spawn(async move { limit.check(&ctx).await.unwrap() })
            })
            .collect();

        let mut passed = 0;
        let mut failed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Verdict::Pass => passed += 1,
                Verdict::Fail { .. } => failed += 1,
                other => panic!("unexpected verdict {other:?}"),
            }
        }
        assert_eq!(passed, 5);
        assert_eq!(failed, 27);
    }

    #[tokio::test]
    async fn recipient_limit_warns_then_fails() {
        let limit = RecipientLimit::new(RecipientLimitConfig {
            warn_above: 2,
            max: 4,
        });
        assert_eq!(limit.check(&from("u", 2)).await.unwrap(), Verdict::Pass);
        assert_eq!(
            limit.check(&from("u", 3)).await.unwrap(),
            Verdict::warn("3 recipients exceeds soft limit 2")
        );
        assert_eq!(
            limit.check(&from("u", 5)).await.unwrap(),
            Verdict::fail("too many recipients: 5 exceeds limit 4")
        );
    }
}
