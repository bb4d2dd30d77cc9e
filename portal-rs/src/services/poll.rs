use std::future::Future;
use std::time::Duration;

/// Linear backoff: attempt `n` (zero-based) waits `n * step` before probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub step: Duration,
}

impl RetryPolicy {
    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        Self { max_attempts, step }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.step * attempt
    }

    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts).map(|attempt| self.delay_for(attempt))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Found { value: T, attempts: u32 },
    Exhausted { attempts: u32 },
}

/// Repeatedly runs `probe` until it yields `Some` or the policy runs out.
///
/// `sleep` is awaited before every attempt with that attempt's delay, the
/// first one included (a zero delay). Probe errors count as a miss.
pub async fn poll_until<T, E, P, PF, S, SF>(
    policy: RetryPolicy,
    mut sleep: S,
    mut probe: P,
) -> PollOutcome<T>
where
    E: std::fmt::Display,
    P: FnMut(u32) -> PF,
    PF: Future<Output = Result<Option<T>, E>>,
    S: FnMut(Duration) -> SF,
    SF: Future<Output = ()>,
{
    for (attempt, delay) in (0..).zip(policy.delays()) {
        if !delay.is_zero() {
            tracing::debug!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "poll backoff");
        }
        sleep(delay).await;

        match probe(attempt).await {
            Ok(Some(value)) => {
                return PollOutcome::Found {
                    value,
                    attempts: attempt + 1,
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(attempt = attempt + 1, "poll probe failed: {e}"),
        }
    }

    PollOutcome::Exhausted {
        attempts: policy.max_attempts,
    }
}
