//! Retry policy: decides backoff delays for transient failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::TaskRecord;

/// Exponential backoff for auto-retries.
///
/// delay = base_delay * multiplier^(retry - 1), capped at `max_delay`.
///
/// Example with base_delay=2s, multiplier=2.0:
/// - retry 1: 2s
/// - retry 2: 4s
/// - retry 3: 8s
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Base delay for the first retry.
    #[serde(with = "millis")]
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for a single delay.
    #[serde(with = "millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-indexed).
    pub fn next_delay(&self, retry: u32) -> Duration {
        self.delay_from(self.base_delay, retry)
    }

    /// Delay for the task's upcoming retry, honouring a per-task base override.
    pub fn delay_for(&self, task: &TaskRecord) -> Duration {
        let base = task
            .retry_base_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(self.base_delay);
        self.delay_from(base, task.retry_count + 1)
    }

    fn delay_from(&self, base: Duration, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = base.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Serialize `Duration` as integer milliseconds.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentBackend, TaskId, TaskSpec};
    use chrono::Utc;
    use ulid::Ulid;

    #[test]
    fn default_policy_has_reasonable_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_secs(2));
        assert_eq!(policy.multiplier, 2.0);
    }

    #[test]
    fn exponential_backoff_increases() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.next_delay(1), Duration::from_secs(2));
        assert_eq!(policy.next_delay(2), Duration::from_secs(4));
        assert_eq!(policy.next_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(30), Duration::from_secs(60));
        assert_eq!(policy.next_delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn per_task_base_delay_overrides_policy() {
        let policy = RetryPolicy::default();
        let mut spec = TaskSpec::new("t", "p", "/tmp", AgentBackend::Claude);
        spec.retry_base_delay_ms = Some(100);
        let mut task = TaskRecord::new(TaskId::from_ulid(Ulid::new()), spec, 3, Utc::now());

        assert_eq!(policy.delay_for(&task), Duration::from_millis(100));
        task.retry_count = 1;
        assert_eq!(policy.delay_for(&task), Duration::from_millis(200));
    }
}
