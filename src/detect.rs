//! Completion detection.
//!
//! The host never announces that a response finished; the only signals are
//! transient controls near the composer. While generating, a stop control
//! (the busy marker) is rendered; once idle, a voice-mode control (the idle
//! marker) takes its place. Both signals are racy: the busy marker can
//! flicker out for a frame mid-generation, so its absence is only trusted
//! after holding for a configured number of consecutive ticks. The positive
//! idle marker needs no debouncing. Timing out is a reportable outcome, not
//! an error; the caller decides what to do with it.

use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::dom::{DomError, DomSurface};
use crate::poll::{PollConfig, PollOutcome, Signal, poll_until_stable};
use crate::selectors::{Pick, SelectorSet, resolve};

/// Where a response stands. `Processing` only ever exists inside the wait;
/// the wait itself resolves to `Finished` or `TimedOut`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionState {
    Processing,
    Finished,
    TimedOut,
}

/// Marker identities are configuration: the defaults match the host's
/// current markup, but nothing here assumes they stay stable.
#[derive(Debug, Clone)]
pub struct CompletionMarkers {
    pub busy: SelectorSet,
    pub idle: SelectorSet,
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionTiming {
    /// Delay before the first tick, so we do not race the host's own
    /// transition into the generating state right after send.
    pub grace: Duration,
    pub poll: PollConfig,
    /// Consecutive busy-absent ticks required before absence is trusted.
    pub quiet_streak: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinishVia {
    IdleMarker,
    QuietPeriod,
}

/// One tick's evidence, reduced to a debounce signal. The busy marker wins
/// over everything: as long as it is present the response is generating.
fn classify(busy_present: bool, idle_present: bool) -> Signal<FinishVia> {
    if busy_present {
        Signal::Reset
    } else if idle_present {
        Signal::Confirm(FinishVia::IdleMarker)
    } else {
        Signal::Hold(FinishVia::QuietPeriod)
    }
}

/// Wait for the response to finish. Returns `Finished` or `TimedOut`.
pub async fn await_completion(
    dom: &dyn DomSurface,
    markers: &CompletionMarkers,
    timing: &CompletionTiming,
) -> Result<CompletionState, DomError> {
    sleep(timing.grace).await;
    debug!(
        "watching for completion (interval {:?}, up to {} attempts, quiet streak {})",
        timing.poll.interval, timing.poll.max_attempts, timing.quiet_streak
    );

    let outcome = poll_until_stable(&timing.poll, timing.quiet_streak, |_attempt| async move {
        let busy = resolve(dom, &markers.busy, Pick::First).await?.is_some();
        let idle = if busy {
            false
        } else {
            resolve(dom, &markers.idle, Pick::First).await?.is_some()
        };
        Ok::<_, DomError>(classify(busy, idle))
    })
    .await?;

    match outcome {
        PollOutcome::Satisfied { value, attempts } => {
            info!("response finished after {attempts} ticks ({value:?})");
            Ok(CompletionState::Finished)
        }
        PollOutcome::TimedOut { attempts } => {
            warn!("no completion signal within {attempts} ticks");
            Ok(CompletionState::TimedOut)
        }
    }
}
