//! Retry logic for remote calls.

use crate::error::{Error, Result};
use crate::types::RetryPolicy;
use std::thread;

/// Callback trait for retry progress notifications.
pub trait RetryCallback {
    /// Called when an operation is being retried.
    ///
    /// # Arguments
    /// * `attempt` - Attempt that just failed (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The error that triggered the retry
    /// * `delay_secs` - Seconds until next attempt
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay_secs: u64);
}

/// No-op callback that does nothing.
pub struct NoCallback;

impl RetryCallback for NoCallback {
    fn on_retry(&self, _attempt: u32, _max_attempts: u32, _error: &Error, _delay_secs: u64) {}
}

/// Callback that reports retries through the `log` facade.
pub struct LogCallback;

impl RetryCallback for LogCallback {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay_secs: u64) {
        log::warn!("Attempt {attempt}/{max_attempts} failed: {error}. Retrying in {delay_secs}s...");
    }
}

/// Execute an operation under a retry policy.
///
/// Errors the policy does not consider retryable are returned immediately.
/// Otherwise the operation is attempted up to `policy.max_attempts` times
/// and the last error is returned.
pub fn with_retry<T, F>(
    policy: &RetryPolicy,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut last_error: Option<Error> = None;

    for attempt in 0..policy.max_attempts.max(1) {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !policy.should_retry(&e) {
                    return Err(e);
                }

                if attempt + 1 >= policy.max_attempts {
                    last_error = Some(e);
                    break;
                }

                let delay = policy.delay_for_attempt(attempt);
                if let Some(cb) = callback {
                    cb.on_retry(attempt + 1, policy.max_attempts, &e, delay.as_secs());
                }

                thread::sleep(delay);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Other("retry exhausted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Duration;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(max_attempts, Duration::from_millis(1))
    }

    fn unreachable() -> Error {
        Error::Transport {
            host: "sdw1".to_string(),
            message: "Connection refused".to_string(),
        }
    }

    fn exit_one() -> Error {
        Error::CommandFailed {
            host: "sdw1".to_string(),
            command: "false".to_string(),
            exit_code: 1,
            stderr: String::new(),
        }
    }

    #[test]
    fn test_with_retry_success_first_try() {
        let result = with_retry(&RetryPolicy::no_retry(), None, || Ok::<_, Error>(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_transport_failure_is_retried_until_success() {
        let attempts = Cell::new(0);
        let result = with_retry(&fast(3), None, || {
            attempts.set(attempts.get() + 1);
            if attempts.get() < 3 {
                Err(unreachable())
            } else {
                Ok("up")
            }
        });

        assert_eq!(result.unwrap(), "up");
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_command_failure_is_not_retried_by_default() {
        let attempts = Cell::new(0);
        let result: Result<()> = with_retry(&fast(5), None, || {
            attempts.set(attempts.get() + 1);
            Err(exit_one())
        });

        assert!(matches!(result, Err(Error::CommandFailed { .. })));
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_command_failure_retried_when_opted_in() {
        let attempts = Cell::new(0);
        let policy = fast(4).retrying_command_failures();
        let result: Result<()> = with_retry(&policy, None, || {
            attempts.set(attempts.get() + 1);
            Err(exit_one())
        });

        assert!(result.is_err());
        assert_eq!(attempts.get(), 4);
    }

    #[test]
    fn test_callback_invoked_between_attempts() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicU32, Ordering};

        struct CountingCallback(Arc<AtomicU32>);
        impl RetryCallback for CountingCallback {
            fn on_retry(&self, _: u32, _: u32, _: &Error, _: u64) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let count = Arc::new(AtomicU32::new(0));
        let callback = CountingCallback(count.clone());
        let _: Result<()> = with_retry(&fast(3), Some(&callback), || Err(unreachable()));

        // Not called after the final attempt
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
