//! Resolution state machine

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Phase of one resolution attempt.
///
/// `Joining -> AwaitingMetadata -> Validating`, ending in one of the
/// terminal phases `Completed`, `Failed` or `TimedOut`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionPhase {
    Joining,
    AwaitingMetadata,
    Validating,
    Completed,
    Failed(String),
    TimedOut,
}

impl ResolutionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResolutionPhase::Completed | ResolutionPhase::Failed(_) | ResolutionPhase::TimedOut
        )
    }
}

impl fmt::Display for ResolutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionPhase::Joining => write!(f, "joining"),
            ResolutionPhase::AwaitingMetadata => write!(f, "awaiting metadata"),
            ResolutionPhase::Validating => write!(f, "validating"),
            ResolutionPhase::Completed => write!(f, "completed"),
            ResolutionPhase::Failed(reason) => write!(f, "failed ({reason})"),
            ResolutionPhase::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Current phase plus the clock it is measured against.
///
/// Elapsed time uses the tokio clock, so paused-time tests observe the
/// same boundaries as real runs.
#[derive(Debug)]
pub struct ResolutionState {
    phase: ResolutionPhase,
    started: Instant,
}

impl ResolutionState {
    pub fn new() -> Self {
        Self {
            phase: ResolutionPhase::Joining,
            started: Instant::now(),
        }
    }

    pub fn phase(&self) -> &ResolutionPhase {
        &self.phase
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Moves to `next`. Returns `false` and stays put once terminal.
    pub fn advance(&mut self, next: ResolutionPhase) -> bool {
        if self.phase.is_terminal() {
            tracing::debug!("Ignoring transition {} -> {}", self.phase, next);
            return false;
        }
        tracing::debug!(
            "Resolution {} -> {} after {:?}",
            self.phase,
            next,
            self.elapsed()
        );
        self.phase = next;
        true
    }
}

impl Default for ResolutionState {
    fn default() -> Self {
        Self::new()
    }
}
