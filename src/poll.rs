//! Cooperative polling primitives.
//!
//! Every wait in the pipeline goes through one of these two loops. Both sleep
//! on the tokio timer between probe evaluations (never busy-wait, the page
//! keeps rendering underneath us) and both are bounded: running out of budget
//! yields [`PollOutcome::TimedOut`], a normal reportable outcome rather than
//! an error, so callers decide whether to abort or continue degraded.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

/// Interval and attempt budget for one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollConfig {
    /// A zero interval would spin against the CDP socket; it is clamped to
    /// 1ms with a warning. A zero attempt budget is clamped to one attempt.
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        let interval = if interval.is_zero() {
            warn!("poll interval of 0 requested; clamping to 1ms");
            Duration::from_millis(1)
        } else {
            interval
        };
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }
}

/// Result of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Satisfied { value: T, attempts: u32 },
    TimedOut { attempts: u32 },
}

/// What one probe evaluation tells a debounced wait.
///
/// `Confirm` is trusted immediately (a positive marker was seen). `Hold` is
/// absence-of-evidence and must repeat for the required number of consecutive
/// evaluations before it is trusted. `Reset` clears the streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal<T> {
    Confirm(T),
    Hold(T),
    Reset,
}

/// Evaluate `probe` up to `config.max_attempts` times, sleeping the interval
/// between evaluations. The first evaluation runs immediately. `Some(value)`
/// satisfies the wait; probe errors abort it.
pub async fn poll_until<T, E, F, Fut>(config: &PollConfig, mut probe: F) -> Result<PollOutcome<T>, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    for attempt in 1..=config.max_attempts {
        if attempt > 1 {
            sleep(config.interval).await;
        }
        if let Some(value) = probe(attempt).await? {
            return Ok(PollOutcome::Satisfied { value, attempts: attempt });
        }
    }
    Ok(PollOutcome::TimedOut {
        attempts: config.max_attempts,
    })
}

/// Debounced variant: a `Hold` signal must repeat for `required_streak`
/// consecutive evaluations before the wait is satisfied (the value from the
/// last hold is returned). `Confirm` short-circuits, `Reset` clears the
/// streak. Transient flickers below the streak never flip the outcome.
pub async fn poll_until_stable<T, E, F, Fut>(
    config: &PollConfig,
    required_streak: u32,
    mut probe: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Signal<T>, E>>,
{
    let required = required_streak.max(1);
    let mut streak = 0u32;
    for attempt in 1..=config.max_attempts {
        if attempt > 1 {
            sleep(config.interval).await;
        }
        match probe(attempt).await? {
            Signal::Confirm(value) => {
                return Ok(PollOutcome::Satisfied { value, attempts: attempt });
            }
            Signal::Hold(value) => {
                streak += 1;
                if streak >= required {
                    return Ok(PollOutcome::Satisfied { value, attempts: attempt });
                }
            }
            Signal::Reset => {
                if streak > 0 {
                    debug!("stability streak of {streak} reset at attempt {attempt}");
                }
                streak = 0;
            }
        }
    }
    Ok(PollOutcome::TimedOut {
        attempts: config.max_attempts,
    })
}
