//! IGBT power stage drive
//!
//! # Description
//! The power stage turns the current setpoint into a PWM duty cycle once per tick. Hard inhibits
//! are evaluated first and zero the output unconditionally. Otherwise the regulator output is
//! limited by the predicted current headroom, shaped by the duty windows and finally bounded to
//! the permitted duty range before it is written to the timer(s).
//!
//! Up to two timers are driven. The primary timer is the time-base master; the secondary timer is
//! slaved to its update trigger so both counters restart together on every PWM cycle.
use pwm_timebase::Timebase;

use crate::error::Error;
use crate::hardware::{Instant, PwmTimer, SyncRole};
use crate::pid::{Gains, Pid};
use crate::safety::SafetyStatus;
use crate::state::SharedState;

/// Guards divisions by configured resistances.
const RESISTANCE_EPSILON: f32 = 1e-6;

/// Width of the optional deadband at either end of the duty range.
const DEADBAND: f32 = 0.05;

/// How the secondary timer output follows the primary.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub enum SecondaryMode {
    /// Identical duty cycle to the primary.
    Mirrored,

    /// The complement of the primary duty cycle, separated by the dead time.
    Complementary,
}

/// Bring a normalized duty cycle through the permitted duty windows.
///
/// # Args
/// * `duty` - The preset duty cycle.
/// * `min_pct` - Duty cycles below this percentage are suppressed.
/// * `max_pct` - Duty cycles above this percentage are driven to full conduction.
/// * `deadband` - Additionally snap values within 5% of either end.
pub fn apply_duty_window(duty: f32, min_pct: f32, max_pct: f32, deadband: bool) -> f32 {
    // NaN is suppressed.
    if !(duty > 0.0) {
        return 0.0;
    }

    let pct = duty * 100.0;
    if pct < min_pct {
        0.0
    } else if pct > max_pct {
        1.0
    } else if deadband && duty <= DEADBAND {
        0.0
    } else if deadband && duty >= 1.0 - DEADBAND {
        1.0
    } else {
        duty.min(1.0)
    }
}

/// The largest duty cycle supported by the predicted current headroom.
///
/// # Args
/// * `set_current` - The requested current, already limited to the permitted range.
/// * `probe_voltage` - The measured output voltage.
/// * `min_load_resistance` - The smallest expected load resistance.
pub fn headroom_limit(set_current: f32, probe_voltage: f32, min_load_resistance: f32) -> f32 {
    if !(set_current > 0.0) {
        return 0.0;
    }

    let predicted_max = probe_voltage.max(0.0) / min_load_resistance.max(RESISTANCE_EPSILON);
    if predicted_max <= 0.0 {
        // Nothing to predict from.
        return 1.0;
    }

    (set_current / predicted_max).min(1.0)
}

pub struct PowerStage<T> {
    primary: T,
    secondary: Option<(T, SecondaryMode)>,
    timebase: Option<Timebase>,
    requested_frequency: f32,
    pid: Pid,
}

impl<T: PwmTimer> PowerStage<T> {
    /// Construct the power stage. The outputs stay off until a timebase has been configured.
    ///
    /// # Args
    /// * `primary` - The time-base master timer.
    /// * `secondary` - An optional second timer and how it follows the primary.
    pub fn new(primary: T, secondary: Option<(T, SecondaryMode)>) -> Self {
        let mut stage = Self {
            primary,
            secondary,
            timebase: None,
            requested_frequency: 0.0,
            pid: Pid::new(),
        };
        stage.write(0.0, 0.0);
        stage
    }

    pub fn timebase(&self) -> Option<&Timebase> {
        self.timebase.as_ref()
    }

    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    pub fn primary(&self) -> &T {
        &self.primary
    }

    pub fn secondary(&self) -> Option<&T> {
        self.secondary.as_ref().map(|(timer, _)| timer)
    }

    /// Program both timers for a PWM frequency.
    ///
    /// # Note
    /// If the frequency cannot be realized, the timers keep their previous configuration.
    ///
    /// # Returns
    /// The new timebase.
    pub fn configure(&mut self, frequency_hz: f32) -> Result<Timebase, Error> {
        self.requested_frequency = frequency_hz;

        let timebase = Timebase::solve(
            self.primary.clock_hz(),
            frequency_hz,
            &self.primary.counter(),
        )?;

        // Stop the outputs while the period changes.
        self.write(0.0, 0.0);

        self.primary.apply(&timebase);
        match self.secondary.as_mut() {
            Some((secondary, _)) => {
                secondary.apply(&timebase);
                self.primary.set_sync(SyncRole::Master);
                secondary.set_sync(SyncRole::Slave);
            }
            None => self.primary.set_sync(SyncRole::Standalone),
        }

        log::info!(
            "PWM configured: {} Hz (prescaler {}, period {})",
            timebase.frequency(),
            timebase.prescaler,
            timebase.period
        );

        self.timebase.replace(timebase);
        Ok(timebase)
    }

    fn dead_time_fraction(&self, state: &SharedState) -> f32 {
        match (self.secondary.as_ref(), self.timebase.as_ref()) {
            (Some((_, SecondaryMode::Complementary)), Some(timebase)) => {
                timebase.dead_time_fraction(state.dead_time_ns.get())
            }
            _ => 0.0,
        }
    }

    fn write(&mut self, duty: f32, dead_time: f32) {
        let Some(timebase) = self.timebase else {
            self.primary.set_compare(0);
            if let Some((secondary, _)) = self.secondary.as_mut() {
                secondary.set_compare(0);
            }
            return;
        };

        self.primary.set_compare(timebase.compare(duty));

        if let Some((secondary, mode)) = self.secondary.as_mut() {
            let secondary_duty = match mode {
                SecondaryMode::Mirrored => duty,

                // Both switches stay off while the output is inhibited.
                SecondaryMode::Complementary if duty > 0.0 => (1.0 - duty - dead_time).max(0.0),
                SecondaryMode::Complementary => 0.0,
            };
            secondary.set_compare(timebase.compare(secondary_duty));
        }
    }

    fn inhibit(&mut self, state: &SharedState) -> f32 {
        self.pid.reset();
        self.write(0.0, 0.0);
        state.duty.set(0.0);
        0.0
    }

    /// Compute and program the duty cycle for one control tick.
    ///
    /// # Args
    /// * `state` - The shared system state.
    /// * `safety` - The interlock status of this tick.
    /// * `now` - The time of this tick.
    ///
    /// # Returns
    /// The duty cycle written to the primary timer.
    pub fn update(&mut self, state: &SharedState, safety: &SafetyStatus, now: Instant) -> f32 {
        let frequency = state.pwm_frequency_hz.get();
        if frequency != self.requested_frequency {
            match self.configure(frequency) {
                Ok(timebase) => state.pwm_frequency.set(timebase.frequency()),
                Err(error) => {
                    log::warn!("PWM frequency {} Hz rejected: {:?}", frequency, error);
                    state.config_error.set(true);
                }
            }
        }

        if self.timebase.is_none() || safety.inhibited() {
            return self.inhibit(state);
        }

        let limit = state.current_limit_max.get();
        let set_current = state.set_current.get().max(0.0).min(limit);
        if !state.waveform_running.get() && !(set_current > 0.0) {
            return self.inhibit(state);
        }

        let gains = Gains {
            kp: state.pid_kp.get(),
            ki: state.pid_ki.get(),
            kd: state.pid_kd.get(),
        };
        let probe_current = state.probe_current.get();
        let regulated =
            self.pid.update(&gains, set_current, probe_current, now) * state.duty_scale.get();

        let preset = if probe_current > set_current {
            // Already above the setpoint.
            0.0
        } else {
            let upper = headroom_limit(
                set_current,
                state.probe_voltage.get(),
                state.min_load_resistance.get(),
            );
            regulated.min(upper)
        };

        let mut duty = apply_duty_window(
            preset,
            state.min_duty_pct.get(),
            state.max_duty_pct.get(),
            state.duty_deadband.get(),
        );

        let dead_time = self.dead_time_fraction(state);
        let max_duty = state.max_duty.get();
        if duty > 0.0 {
            duty = duty
                .min(max_duty - dead_time)
                .max(state.min_duty.get())
                .min(max_duty);
        }

        self.write(duty, dead_time);
        state.duty.set(duty);
        duty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duty_windows() {
        assert_eq!(apply_duty_window(0.04, 5.0, 95.0, false), 0.0);
        assert_eq!(apply_duty_window(0.5, 5.0, 95.0, false), 0.5);
        assert_eq!(apply_duty_window(0.96, 5.0, 95.0, false), 1.0);
        assert_eq!(apply_duty_window(-0.2, 5.0, 95.0, false), 0.0);
        assert_eq!(apply_duty_window(f32::NAN, 5.0, 95.0, false), 0.0);

        // The deadband snaps values the windows would pass.
        assert_eq!(apply_duty_window(0.05, 0.0, 100.0, true), 0.0);
        assert_eq!(apply_duty_window(0.95, 0.0, 100.0, true), 1.0);
        assert_eq!(apply_duty_window(0.5, 0.0, 100.0, true), 0.5);
    }

    #[test]
    fn headroom() {
        // 100 V across 1 Ohm supports 100 A at full conduction.
        assert_eq!(headroom_limit(50.0, 100.0, 1.0), 0.5);
        assert_eq!(headroom_limit(500.0, 100.0, 1.0), 1.0);
        assert_eq!(headroom_limit(0.0, 100.0, 1.0), 0.0);
        assert_eq!(headroom_limit(10.0, -5.0, 1.0), 1.0);
        assert!(headroom_limit(10.0, 100.0, 0.0) < 1e-6);
    }
}
