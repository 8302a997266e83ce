//! Clocks for the simulation and diagnostics

use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Wall clock in Unix milliseconds, sent to clients in the welcome
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

static SERVER_START: OnceLock<Instant> = OnceLock::new();

/// Mark the process start. Later calls are ignored.
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Seconds since [`init_server_time`], zero before it ran
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// One tick's wall time measured against the tick period
#[derive(Debug, Clone, Copy)]
pub struct TickBudget {
    started: Instant,
    budget: Duration,
}

impl TickBudget {
    pub fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time spent so far, when it already exceeds the budget
    pub fn overrun(&self) -> Option<Duration> {
        let elapsed = self.started.elapsed();
        (elapsed > self.budget).then_some(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generous_budget_is_not_overrun() {
        let budget = TickBudget::start(Duration::from_secs(3600));
        assert!(budget.overrun().is_none());
    }

    #[test]
    fn slow_tick_reports_overrun() {
        let budget = TickBudget::start(Duration::from_micros(100));
        std::thread::sleep(Duration::from_millis(2));
        let spent = budget.overrun().unwrap();
        assert!(spent >= Duration::from_millis(2));
    }
}
