//! Run counters and the stopping rule.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting for the first renderable content.
    WarmingUp,
    /// Interact / extract / fold passes.
    Scrolling,
    /// Stopped because the list stopped yielding or the target was met.
    Converged,
    /// Stopped by the pass ceiling or the wall-clock budget.
    TimedOut,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WarmingUp => write!(f, "warming up"),
            Self::Scrolling => write!(f, "scrolling"),
            Self::Converged => write!(f, "converged"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Why the pass loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetReached,
    NoGrowth,
    /// The source has no next page.
    Exhausted,
    PassCeiling,
    Budget,
}

impl StopReason {
    /// Terminal phase this reason leads to.
    pub fn phase(self) -> Phase {
        match self {
            Self::TargetReached | Self::NoGrowth | Self::Exhausted => Phase::Converged,
            Self::PassCeiling | Self::Budget => Phase::TimedOut,
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TargetReached => write!(f, "target reached"),
            Self::NoGrowth => write!(f, "no growth"),
            Self::Exhausted => write!(f, "source exhausted"),
            Self::PassCeiling => write!(f, "pass ceiling"),
            Self::Budget => write!(f, "time budget"),
        }
    }
}

/// Limits checked after every pass.
#[derive(Debug, Clone, Copy)]
pub struct StopRule {
    pub no_growth_threshold: u32,
    pub max_passes: u32,
    pub budget: Duration,
}

/// Mutable counters of one run.
#[derive(Debug, Clone)]
pub struct RunState {
    rule: StopRule,
    passes: u32,
    last_size: usize,
    streak: u32,
    target: Option<usize>,
}

impl RunState {
    pub fn new(rule: StopRule) -> Self {
        Self {
            rule,
            passes: 0,
            last_size: 0,
            streak: 0,
            target: None,
        }
    }

    pub fn passes(&self) -> u32 {
        self.passes
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn target(&self) -> Option<usize> {
        self.target
    }

    /// Set the target size. A known target is only ever lowered.
    pub fn set_target(&mut self, target: usize) {
        self.target = Some(self.target.map_or(target, |t| t.min(target)));
    }

    /// Record a finished pass with the store at `size` after `elapsed`.
    ///
    /// Growth resets the streak, a flat pass extends it. Checks run in a
    /// fixed order: target, streak, pass ceiling, budget.
    pub fn observe(&mut self, size: usize, elapsed: Duration) -> Option<StopReason> {
        self.passes += 1;
        if size > self.last_size {
            self.streak = 0;
        } else {
            self.streak += 1;
        }
        self.last_size = size;

        if self.target.is_some_and(|t| size >= t) {
            Some(StopReason::TargetReached)
        } else if self.streak >= self.rule.no_growth_threshold {
            Some(StopReason::NoGrowth)
        } else if self.passes >= self.rule.max_passes {
            Some(StopReason::PassCeiling)
        } else if elapsed >= self.rule.budget {
            Some(StopReason::Budget)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(threshold: u32, max_passes: u32) -> RunState {
        RunState::new(StopRule {
            no_growth_threshold: threshold,
            max_passes,
            budget: Duration::from_secs(60),
        })
    }

    #[test]
    fn test_streak_resets_on_growth() {
        let mut s = state(3, 100);
        let zero = Duration::ZERO;
        assert_eq!(s.observe(2, zero), None);
        assert_eq!(s.observe(2, zero), None);
        assert_eq!(s.streak(), 1);
        assert_eq!(s.observe(5, zero), None);
        assert_eq!(s.streak(), 0);
    }

    #[test]
    fn test_converges_after_threshold_flat_passes() {
        let mut s = state(2, 100);
        let zero = Duration::ZERO;
        assert_eq!(s.observe(4, zero), None);
        assert_eq!(s.observe(4, zero), None);
        assert_eq!(s.observe(4, zero), Some(StopReason::NoGrowth));
        assert_eq!(s.passes(), 3);
        assert_eq!(StopReason::NoGrowth.phase(), Phase::Converged);
    }

    #[test]
    fn test_target_checked_before_streak() {
        let mut s = state(1, 100);
        s.set_target(3);
        s.set_target(10);
        assert_eq!(s.target(), Some(3));
        assert_eq!(s.observe(3, Duration::ZERO), Some(StopReason::TargetReached));
    }

    #[test]
    fn test_ceiling_and_budget_time_out() {
        let mut s = state(10, 2);
        assert_eq!(s.observe(1, Duration::ZERO), None);
        assert_eq!(s.observe(2, Duration::ZERO), Some(StopReason::PassCeiling));
        assert_eq!(StopReason::PassCeiling.phase(), Phase::TimedOut);

        let mut s = state(10, 100);
        assert_eq!(
            s.observe(1, Duration::from_secs(61)),
            Some(StopReason::Budget)
        );
        assert_eq!(StopReason::Budget.phase(), Phase::TimedOut);
    }
}
