use crate::*;
use rand::Rng;
use std::thread;
use std::time::Duration;

/// Bounded exponential backoff around `ChainConflict`.
///
/// Every other error is returned to the caller on the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 8,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Backoff before retry number `attempt` (1-based), before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    pub fn run<T, F>(&self, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Result<T, Error>,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let backoff = self.backoff(attempt);
                    let jitter = match backoff.as_micros() as u64 {
                        0 => 0,
                        micros => rand::thread_rng().gen_range(0, micros / 2 + 1),
                    };
                    debug!(
                        "attempt {} of {} lost a race ({}), backing off",
                        attempt, self.max_attempts, e
                    );
                    thread::sleep(backoff + Duration::from_micros(jitter));
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_conflicts_only() {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_micros(10),
            max_backoff: Duration::from_micros(50),
        };

        let mut calls = 0;
        let result = policy.run(|| {
            calls += 1;
            if calls < 3 {
                Err(Error::ChainConflict {
                    expected: 1,
                    found: 2,
                })
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);

        let mut calls = 0;
        let result: Result<(), Error> = policy.run(|| {
            calls += 1;
            Err(Error::TokenAlreadyUsed)
        });
        assert!(matches!(result, Err(Error::TokenAlreadyUsed)));
        assert_eq!(calls, 1);

        // Gives up after max_attempts
        let mut calls = 0;
        let result: Result<(), Error> = policy.run(|| {
            calls += 1;
            Err(Error::ChainConflict {
                expected: 1,
                found: 2,
            })
        });
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls, 4);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(5));
        assert_eq!(policy.backoff(2), Duration::from_millis(10));
        assert_eq!(policy.backoff(30), Duration::from_millis(250));
    }
}
