//! Generic prescaled timers with expiry callbacks
//!
//! The FM chip's two interval timers and any platform-level periodic work run
//! through the same `Timer` type. A timer divides an input clock by a
//! prescaler, counts the divided ticks up to a period, then either rearms
//! (periodic) or stops (one-shot). Fractional prescaler remainders carry over
//! between ticks so long-running timers never drift.

use bitflags::bitflags;
use log::debug;

bitflags! {
    /// Timer status bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimerFlags: u8 {
        /// Timer is counting
        const RUNNING = 0b01;
        /// Timer reached its period since the flag was last cleared
        const EXPIRED = 0b10;
    }
}

/// Rearm behavior on expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerMode {
    /// Stop after the first expiry
    OneShot,
    /// Reload and keep counting
    #[default]
    Periodic,
}

/// Callback invoked on every timer expiry
pub type TimerCallback = Box<dyn FnMut() + Send>;

/// A prescaled up-counting interval timer
pub struct Timer {
    period: u32,
    prescaler: u32,
    counter: u32,
    remainder: u32,
    mode: TimerMode,
    flags: TimerFlags,
    callback: Option<TimerCallback>,
}

impl Timer {
    /// Create a stopped timer with a unit prescaler and period
    pub fn new() -> Self {
        Self {
            period: 1,
            prescaler: 1,
            counter: 0,
            remainder: 0,
            mode: TimerMode::Periodic,
            flags: TimerFlags::empty(),
            callback: None,
        }
    }

    /// Set period and mode; zero periods are clamped to 1
    pub fn configure(&mut self, period: u32, mode: TimerMode) {
        self.period = period.max(1);
        self.mode = mode;
    }

    /// Set the input clock divider; zero is clamped to 1
    pub fn set_prescaler(&mut self, prescaler: u32) {
        self.prescaler = prescaler.max(1);
    }

    /// Install the expiry callback, replacing any previous one
    pub fn set_callback(&mut self, callback: TimerCallback) {
        self.callback = Some(callback);
    }

    /// Start counting from zero, clearing any pending expiry
    pub fn start(&mut self) {
        self.counter = 0;
        self.remainder = 0;
        self.flags = TimerFlags::RUNNING;
        debug!(
            "timer start: period={} prescaler={} mode={:?}",
            self.period, self.prescaler, self.mode
        );
    }

    /// Stop counting and discard progress toward the next expiry
    pub fn stop(&mut self) {
        self.flags.remove(TimerFlags::RUNNING);
        self.counter = 0;
        self.remainder = 0;
    }

    /// Suspend counting; the counter keeps its value
    pub fn pause(&mut self) {
        self.flags.remove(TimerFlags::RUNNING);
    }

    /// Continue counting from where [`Timer::pause`] left off
    pub fn resume(&mut self) {
        self.flags.insert(TimerFlags::RUNNING);
    }

    /// Current status flags
    pub fn state(&self) -> TimerFlags {
        self.flags
    }

    /// Whether the timer is currently counting
    pub fn is_running(&self) -> bool {
        self.flags.contains(TimerFlags::RUNNING)
    }

    /// Whether the timer expired since [`Timer::clear_expired`]
    pub fn is_expired(&self) -> bool {
        self.flags.contains(TimerFlags::EXPIRED)
    }

    /// Acknowledge a pending expiry
    pub fn clear_expired(&mut self) {
        self.flags.remove(TimerFlags::EXPIRED);
    }

    /// Current counter value in prescaled ticks
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Advance the timer by `elapsed` input-clock cycles.
    ///
    /// Returns the number of expiries that occurred. A periodic timer can
    /// expire several times in one call when `elapsed` covers multiple
    /// periods; the callback runs once per expiry.
    pub fn tick(&mut self, elapsed: u32) -> u32 {
        if !self.flags.contains(TimerFlags::RUNNING) {
            return 0;
        }

        let total = self.remainder as u64 + elapsed as u64;
        let ticks = (total / self.prescaler as u64) as u32;
        self.remainder = (total % self.prescaler as u64) as u32;
        self.counter += ticks;

        let mut expiries = 0;
        while self.counter >= self.period {
            self.flags.insert(TimerFlags::EXPIRED);
            expiries += 1;
            if let Some(cb) = self.callback.as_mut() {
                cb();
            }
            match self.mode {
                TimerMode::Periodic => self.counter -= self.period,
                TimerMode::OneShot => {
                    self.counter = 0;
                    self.flags.remove(TimerFlags::RUNNING);
                    break;
                }
            }
        }
        expiries
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("period", &self.period)
            .field("prescaler", &self.prescaler)
            .field("counter", &self.counter)
            .field("mode", &self.mode)
            .field("flags", &self.flags)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}
