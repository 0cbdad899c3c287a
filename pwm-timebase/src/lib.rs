//! Prescaler and period solver for hardware PWM timers.
//!
//! # Description
//! A timer counts its input clock divided by `prescaler + 1` up to `period`. In center-aligned
//! mode the counter runs up and then down again, so one PWM cycle spans `2 * (period + 1)`
//! prescaled ticks. This crate turns a target PWM frequency into the register values that
//! realize it and maps normalized duty cycles into compare values.
#![cfg_attr(not(test), no_std)]

/// The largest auto-reload value of a 16-bit timer.
pub const MAX_PERIOD_16BIT: u32 = 0xFFFF;

/// The largest prescaler value of a 16-bit prescaler register.
pub const MAX_PRESCALER_16BIT: u32 = 0xFFFF;

/// Represents errors that can occur while solving for a timebase.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The frequency was zero, negative or not a number.
    InvalidFrequency,

    /// The frequency leaves less than two counts per cycle.
    FrequencyTooHigh,

    /// No prescaler up to the register maximum brings the period into range.
    FrequencyTooLow,
}

/// The counting mode of the timer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CountMode {
    /// Count up, reload at `period`.
    Edge,

    /// Count up to `period`, then back down to zero.
    Center,
}

impl CountMode {
    fn cycle_divisor(&self) -> f64 {
        match self {
            CountMode::Edge => 1.0,
            CountMode::Center => 2.0,
        }
    }
}

/// The register limits of a timer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Counter {
    pub max_period: u32,
    pub max_prescaler: u32,
    pub mode: CountMode,
}

impl Counter {
    /// A 16-bit counter with a 16-bit prescaler in center-aligned mode.
    pub const fn center_aligned_16bit() -> Self {
        Self {
            max_period: MAX_PERIOD_16BIT,
            max_prescaler: MAX_PRESCALER_16BIT,
            mode: CountMode::Center,
        }
    }

    /// A 16-bit counter with a 16-bit prescaler in edge-aligned mode.
    pub const fn edge_aligned_16bit() -> Self {
        Self {
            max_period: MAX_PERIOD_16BIT,
            max_prescaler: MAX_PRESCALER_16BIT,
            mode: CountMode::Edge,
        }
    }
}

/// A solved timer configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Timebase {
    /// The timer input clock in Hz.
    pub clock_hz: u32,

    /// The prescaler register value. The clock is divided by `prescaler + 1`.
    pub prescaler: u32,

    /// The auto-reload register value.
    pub period: u32,

    pub mode: CountMode,
}

impl Timebase {
    /// Solve for the timer registers producing a PWM frequency.
    ///
    /// # Note
    /// The prescaler is searched from zero upward and the first value whose period fits in the
    /// counter is accepted. This keeps the period, and therefore the duty-cycle resolution, as
    /// large as possible.
    ///
    /// # Args
    /// * `clock_hz` - The timer input clock.
    /// * `frequency_hz` - The desired PWM frequency.
    /// * `counter` - The register limits and counting mode of the timer.
    ///
    /// # Returns
    /// The timebase, or an error if the frequency cannot be realized by the timer.
    pub fn solve(clock_hz: u32, frequency_hz: f32, counter: &Counter) -> Result<Self, Error> {
        if !frequency_hz.is_finite() || frequency_hz <= 0.0 || clock_hz == 0 {
            return Err(Error::InvalidFrequency);
        }

        let total_ticks = clock_hz as f64 / (counter.mode.cycle_divisor() * frequency_hz as f64);

        // Round to the nearest whole tick.
        let total_ticks = (total_ticks + 0.5) as u64;
        if total_ticks < 2 {
            return Err(Error::FrequencyTooHigh);
        }

        for prescaler in 0..=counter.max_prescaler {
            let ticks = total_ticks / (prescaler as u64 + 1);
            if ticks < 2 {
                break;
            }

            let period = ticks - 1;
            if period <= counter.max_period as u64 {
                return Ok(Self {
                    clock_hz,
                    prescaler,
                    period: period as u32,
                    mode: counter.mode,
                });
            }
        }

        Err(Error::FrequencyTooLow)
    }

    /// The PWM frequency actually produced by this timebase.
    pub fn frequency(&self) -> f32 {
        let ticks = self.mode.cycle_divisor()
            * (self.prescaler as f64 + 1.0)
            * (self.period as f64 + 1.0);
        (self.clock_hz as f64 / ticks) as f32
    }

    /// Map a normalized duty cycle onto a compare register value.
    ///
    /// # Args
    /// * `duty` - The duty cycle in the range [0, 1]. Values outside the range are clamped.
    pub fn compare(&self, duty: f32) -> u32 {
        // NaN compares false and lands on zero.
        if !(duty > 0.0) {
            return 0;
        }

        let compare = (duty as f64 * (self.period as f64 + 1.0) + 0.5) as u32;
        compare.min(self.period)
    }

    /// The fraction of a PWM cycle taken by a dead-time interval.
    ///
    /// # Args
    /// * `dead_time_ns` - The dead time in nanoseconds.
    pub fn dead_time_fraction(&self, dead_time_ns: u32) -> f32 {
        (dead_time_ns as f64 * 1e-9 * self.frequency() as f64) as f32
    }
}
