use std::time::Duration;

use crate::error::Error;

/// Per-request retry state a [`RetryPolicy`] reads and updates.
pub trait Retryable {
    fn retry_count(&self) -> u32;

    fn prepare_retry(&mut self);

    fn reset_retry(&mut self);
}

/// The retry counter carried from one task to its replacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryCounter {
    count: u32,
}

impl RetryCounter {
    pub fn new(count: u32) -> Self { Self { count } }
}

impl Retryable for RetryCounter {
    fn retry_count(&self) -> u32 { self.count }

    fn prepare_retry(&mut self) { self.count = self.count.saturating_add(1); }

    fn reset_retry(&mut self) { self.count = 0; }
}

/// What a [`RetryPolicy`] wants done with a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,

    /// Wait before resubmitting. Never blocks a thread.
    pub delay: Duration,
}

impl RetryDecision {
    pub fn retry_after(delay: Duration) -> Self {
        Self {
            should_retry: true,
            delay,
        }
    }

    pub fn give_up() -> Self {
        Self {
            should_retry: false,
            delay:        Duration::ZERO,
        }
    }
}

/// Decides whether a failed request is attempted again.
///
/// Policies are advisory: they update the counter and return a decision,
/// resubmission is up to the caller.
pub trait RetryPolicy: Send + Sync {
    fn retry(&self, request: &mut dyn Retryable, error: &Error) -> RetryDecision;
}

/// Retries any failure up to `max_retries` times with a constant delay.
///
/// The counter is incremented before it is compared, so `max_retries = 3`
/// allows exactly three resubmissions. Once exhausted the counter is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultRetryPolicy {
    pub max_retries: u32,
    pub delay:       Duration,
}

impl Default for DefaultRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay:       Duration::ZERO,
        }
    }
}

impl DefaultRetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self { Self { max_retries, delay } }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn retry(&self, request: &mut dyn Retryable, _error: &Error) -> RetryDecision {
        request.prepare_retry();
        if request.retry_count() <= self.max_retries {
            RetryDecision::retry_after(self.delay)
        } else {
            request.reset_retry();
            RetryDecision::give_up()
        }
    }
}

/// Like [`DefaultRetryPolicy`] but doubling the delay on every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub max_retries: u32,
    pub base:        Duration,
}

impl ExponentialBackoff {
    pub fn new(max_retries: u32, base: Duration) -> Self { Self { max_retries, base } }

    /// Wait before resubmission number `retry_count`, counting from 1.
    ///
    /// The first resubmission waits `base`, every later one twice as long as
    /// the one before. Saturates at [`Duration::MAX`].
    ///
    /// ```
    /// use std::time::Duration;
    /// use courier::core::ExponentialBackoff;
    ///
    /// let policy = ExponentialBackoff::new(5, Duration::from_millis(50));
    /// assert_eq!(policy.delay_for(1), Duration::from_millis(50));
    /// assert_eq!(policy.delay_for(4), Duration::from_millis(400));
    /// ```
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let doublings = retry_count.saturating_sub(1);
        self.base.saturating_mul(2_u32.saturating_pow(doublings))
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn retry(&self, request: &mut dyn Retryable, _error: &Error) -> RetryDecision {
        request.prepare_retry();
        let count = request.retry_count();
        if count <= self.max_retries {
            RetryDecision::retry_after(self.delay_for(count))
        } else {
            request.reset_retry();
            RetryDecision::give_up()
        }
    }
}
