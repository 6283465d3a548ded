//! Chat channel abstraction.
//!
//! The core only depends on a two-operation reply capability — deliver text,
//! deliver an image — plus a long-poll lifecycle. Transient delivery and
//! polling failures are retried with exponential backoff; unrecoverable
//! errors (bad credentials) stop the channel.

pub mod telegram;

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Retry policy & state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl RetryPolicy {
    /// Delay for the n-th retry attempt (0-indexed):
    /// `min(initial_delay * backoff_factor^attempt, max_delay)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(attempt as i32);
        Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as f64) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
        }
    }
}

/// Per-channel retry bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub attempts: u32,
    pub last_error: Option<String>,
    pub in_cooldown: bool,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transient failure. Returns `true` while the caller should
    /// keep retrying; `false` once retries are exhausted and the channel
    /// enters cooldown.
    pub fn record_failure(&mut self, policy: &RetryPolicy, error: String) -> bool {
        self.last_error = Some(error.clone());
        self.attempts += 1;
        if self.attempts >= policy.max_retries {
            self.in_cooldown = true;
            warn!(
                error_kind = %error,
                retry_count = self.attempts,
                max_retries = policy.max_retries,
                "Retries exhausted, entering cooldown"
            );
            false
        } else {
            warn!(
                error_kind = %error,
                retry_count = self.attempts,
                max_retries = policy.max_retries,
                "Transient failure recorded, will retry"
            );
            true
        }
    }

    pub fn reset(&mut self) {
        if self.attempts > 0 {
            info!(retry_count = self.attempts, "Retry state reset after recovery");
        }
        self.attempts = 0;
        self.last_error = None;
        self.in_cooldown = false;
    }

    pub fn next_delay(&self, policy: &RetryPolicy) -> Duration {
        policy.delay_for_attempt(self.attempts)
    }
}

// ---------------------------------------------------------------------------
// Channel trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;
    /// Run the channel until it stops (long-poll loop). Blocks the caller.
    async fn start(&mut self) -> Result<()>;
    async fn stop(&mut self) -> Result<()>;
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()>;
    async fn send_image(&self, chat_id: &str, path: &Path, caption: &str) -> Result<()>;

    /// Check a sender against the allow-list. Empty list = allow all.
    fn is_allowed(&self, sender_id: &str, allow_list: &[String]) -> bool {
        if allow_list.is_empty() {
            return true;
        }
        allow_list.iter().any(|a| a == sender_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
        }
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let p = policy(10);
        assert_eq!(p.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(400));
        // 100ms * 2^10 = 102.4s, capped to 5s.
        assert_eq!(p.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn record_failure_enters_cooldown_when_exhausted() {
        let p = policy(3);
        let mut state = RetryState::new();
        assert!(state.record_failure(&p, "err1".into()));
        assert!(state.record_failure(&p, "err2".into()));
        assert!(!state.in_cooldown);
        assert!(!state.record_failure(&p, "err3".into()));
        assert!(state.in_cooldown);
        assert_eq!(state.last_error.as_deref(), Some("err3"));
    }

    #[test]
    fn reset_clears_state() {
        let p = policy(2);
        let mut state = RetryState::new();
        state.record_failure(&p, "err".into());
        state.record_failure(&p, "err".into());
        assert!(state.in_cooldown);

        state.reset();
        assert_eq!(state.attempts, 0);
        assert!(state.last_error.is_none());
        assert!(!state.in_cooldown);
    }

    #[test]
    fn next_delay_tracks_attempt_count() {
        let p = policy(5);
        let mut state = RetryState::new();
        assert_eq!(state.next_delay(&p), Duration::from_millis(100));
        state.record_failure(&p, "err".into());
        assert_eq!(state.next_delay(&p), Duration::from_millis(200));
    }

    struct DummyChannel;

    #[async_trait]
    impl Channel for DummyChannel {
        fn name(&self) -> &str {
            "dummy"
        }
        async fn start(&mut self) -> Result<()> {
            Ok(())
        }
        async fn stop(&mut self) -> Result<()> {
            Ok(())
        }
        async fn send_text(&self, _chat_id: &str, _text: &str) -> Result<()> {
            Ok(())
        }
        async fn send_image(&self, _chat_id: &str, _path: &Path, _caption: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn empty_allow_list_allows_everyone() {
        let ch = DummyChannel;
        assert!(ch.is_allowed("anyone", &[]));
        assert!(ch.is_allowed("42", &["42".to_string()]));
        assert!(!ch.is_allowed("43", &["42".to_string()]));
    }
}
