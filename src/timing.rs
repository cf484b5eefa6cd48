//! Cooperative time budgets.
//!
//! Each inference phase gets its own wall-clock budget plus a share of the
//! overall budget. Phases poll [`PhaseTimer::expired`] at safe points; nothing
//! is ever interrupted from outside.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Per-phase and overall budgets, in seconds. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Timeouts {
    pub lhs: Option<f64>,
    pub ilp: Option<f64>,
    pub sol: Option<f64>,
    pub all: Option<f64>,
}

impl Timeouts {
    /// Parse one `-T [phase=]seconds` argument. A bare number sets the
    /// overall budget.
    pub fn apply(&mut self, spec: &str) -> Result<(), String> {
        let (phase, value) = match spec.split_once('=') {
            Some((phase, value)) => (phase, value),
            None => ("all", spec),
        };
        let seconds: f64 = value
            .parse()
            .map_err(|_| format!("invalid timeout value: {value:?}"))?;
        match phase {
            "lhs" => self.lhs = Some(seconds),
            "ilp" => self.ilp = Some(seconds),
            "sol" => self.sol = Some(seconds),
            "all" => self.all = Some(seconds),
            other => return Err(format!("unknown timeout phase: {other:?}")),
        }
        Ok(())
    }
}

/// The clock one phase polls. Combines the phase budget with the remainder
/// of the overall budget.
#[derive(Debug, Clone, Copy)]
pub struct PhaseTimer {
    started: Instant,
    phase_budget: Option<Duration>,
    overall_deadline: Option<Instant>,
}

impl PhaseTimer {
    pub fn unlimited() -> PhaseTimer {
        PhaseTimer {
            started: Instant::now(),
            phase_budget: None,
            overall_deadline: None,
        }
    }

    pub fn start(phase_budget: Option<f64>, overall_deadline: Option<Instant>) -> PhaseTimer {
        PhaseTimer {
            started: Instant::now(),
            phase_budget: phase_budget.map(Duration::from_secs_f64),
            overall_deadline,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn expired(&self) -> bool {
        if let Some(budget) = self.phase_budget {
            if self.started.elapsed() > budget {
                return true;
            }
        }
        if let Some(deadline) = self.overall_deadline {
            if Instant::now() > deadline {
                return true;
            }
        }
        false
    }

    /// Remaining budget, for handing into a solver that accepts one.
    pub fn remaining(&self) -> Option<Duration> {
        let phase_left = self
            .phase_budget
            .map(|b| b.saturating_sub(self.started.elapsed()));
        let overall_left = self
            .overall_deadline
            .map(|d| d.saturating_duration_since(Instant::now()));
        match (phase_left, overall_left) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_spec_parsing() {
        let mut timeouts = Timeouts::default();
        timeouts.apply("30").unwrap();
        timeouts.apply("lhs=5").unwrap();
        timeouts.apply("sol=2.5").unwrap();
        assert_eq!(timeouts.all, Some(30.0));
        assert_eq!(timeouts.lhs, Some(5.0));
        assert_eq!(timeouts.sol, Some(2.5));
        assert!(timeouts.apply("warp=1").is_err());
        assert!(timeouts.apply("lhs=abc").is_err());
    }

    #[test]
    fn test_unlimited_never_expires() {
        let timer = PhaseTimer::unlimited();
        assert!(!timer.expired());
        assert!(timer.remaining().is_none());
    }

    #[test]
    fn test_zero_budget_expires() {
        let timer = PhaseTimer::start(Some(0.0), None);
        std::thread::sleep(Duration::from_millis(2));
        assert!(timer.expired());
    }
}
