//! Per-bus read cycle timing

/// Start times of one bus' read cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusSchedule {
    pub period_ms: u32,
    pub last_cycle_start: Option<u64>,
}

impl BusSchedule {
    pub const fn new(period_ms: u32) -> Self {
        Self {
            period_ms,
            last_cycle_start: None,
        }
    }

    /// A bus that never ran a cycle is due immediately
    pub fn is_due(&self, now_ms: u64) -> bool {
        match self.last_cycle_start {
            None => true,
            Some(start) => now_ms.saturating_sub(start) >= u64::from(self.period_ms),
        }
    }

    /// Record a new cycle start when one is due
    pub fn start_cycle_if_due(&mut self, now_ms: u64) -> bool {
        if self.is_due(now_ms) {
            self.last_cycle_start = Some(now_ms);
            true
        } else {
            false
        }
    }

    pub fn set_period(&mut self, period_ms: u32) {
        self.period_ms = period_ms;
    }
}
