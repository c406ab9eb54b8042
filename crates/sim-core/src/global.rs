//! The global clock: scales reference (CPU) cycles to per-subsystem ticks.

use crate::Cycle;

/// Handle for a subsystem registered with the global queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemId(pub usize);

struct SystemSync {
    /// Subsystem clock in Hz.
    frequency: f64,
    /// Fractional ticks carried between `cycle` calls so non-integer
    /// frequency ratios never drift.
    sync: f64,
}

/// Coordinates subsystems running at different clock rates against a single
/// reference cycle counter.
pub struct GlobalEventQueue {
    /// Reference (CPU) clock in Hz.
    frequency: f64,
    current_cycle: Cycle,
    systems: Vec<SystemSync>,
}

impl GlobalEventQueue {
    #[must_use]
    pub fn new(cpu_frequency_hz: f64) -> Self {
        Self {
            frequency: cpu_frequency_hz,
            current_cycle: 0,
            systems: Vec::new(),
        }
    }

    /// Reference cycles elapsed.
    #[must_use]
    pub fn current_cycle(&self) -> Cycle {
        self.current_cycle
    }

    pub fn set_frequency(&mut self, cpu_frequency_hz: f64) {
        self.frequency = cpu_frequency_hz;
    }

    /// Register a subsystem running at `frequency_hz`.
    pub fn add_system(&mut self, frequency_hz: f64) -> SystemId {
        self.systems.push(SystemSync {
            frequency: frequency_hz,
            sync: 0.0,
        });
        SystemId(self.systems.len() - 1)
    }

    /// Advance the reference clock by `steps` cycles. Returns, per
    /// registered subsystem, the whole ticks it should execute; the
    /// fractional remainder is carried to the next call.
    pub fn cycle(&mut self, steps: Cycle) -> Vec<(SystemId, Cycle)> {
        self.current_cycle += steps;

        self.systems
            .iter_mut()
            .enumerate()
            .map(|(index, system)| {
                let due = (steps as f64) * (system.frequency / self.frequency) + system.sync;
                let ticks = due.floor();
                system.sync = due - ticks;
                (SystemId(index), ticks as Cycle)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unity_ratio_ticks_one_for_one() {
        let mut global = GlobalEventQueue::new(2_000_000_000.0);
        let id = global.add_system(2_000_000_000.0);
        assert_eq!(global.cycle(10), vec![(id, 10)]);
        assert_eq!(global.current_cycle(), 10);
    }

    #[test]
    fn fractional_ratio_accumulates_without_drift() {
        // Memory at 2/3 the CPU clock: 3000 reference cycles must yield
        // exactly 2000 ticks regardless of step size.
        let mut global = GlobalEventQueue::new(3_000.0);
        let id = global.add_system(2_000.0);
        let mut total = 0;
        for _ in 0..3000 {
            total += global
                .cycle(1)
                .into_iter()
                .find(|(sys, _)| *sys == id)
                .map_or(0, |(_, ticks)| ticks);
        }
        assert_eq!(total, 2000);
    }

    #[test]
    fn multiple_systems_tick_independently() {
        let mut global = GlobalEventQueue::new(1_000.0);
        let fast = global.add_system(1_000.0);
        let slow = global.add_system(250.0);
        let ticks = global.cycle(8);
        assert_eq!(ticks, vec![(fast, 8), (slow, 2)]);
    }
}
