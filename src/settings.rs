//! Controller runtime settings
//!
//! # Description
//! All tunable values live in a single [Settings] tree. Every item is addressable by its path
//! (e.g. `/pid_kp` or `/ramp_up`) through `miniconf`, and the whole record is validated before it
//! replaces the active configuration.
use miniconf::{Leaf, Tree};

use crate::linear_transformation::{Cubic, LinearTransformation};
use crate::waveform::WaveformTrigger;

/// Probe input midpoint for bipolar probes centered in the ADC range.
pub const DEFAULT_PROBE_MIDPOINT: f32 = 1.65;

/// The maximum permissible output current. Amps.
pub const DEFAULT_CURRENT_LIMIT_MAX: f32 = 360.0;

/// The output voltage above which duty synthesis is inhibited.
pub const DEFAULT_OVER_VOLTAGE_LIMIT: f32 = 100.0;

/// Represents the tunable configuration of the controller.
#[derive(Tree, Debug, Clone, PartialEq)]
pub struct Settings {
    /// Maps the voltage probe input (volts relative to the midpoint) to output voltage.
    pub voltage_calibration: Leaf<LinearTransformation>,

    /// Maps the current probe input (volts relative to the midpoint) to output current.
    pub current_calibration: Leaf<LinearTransformation>,

    /// Maps the thermistor input voltage to degrees Celsius.
    pub temperature_calibration: Leaf<Cubic>,

    /// The probe input voltage that reads as zero on the bipolar probes. Volts.
    pub probe_midpoint: Leaf<f32>,

    /// Smoothing factor of the probe channel moving average.
    pub filter_alpha: Leaf<f32>,

    /// The output voltage corresponding to full scale on the voltage monitor output.
    pub voltage_monitor_full_scale: Leaf<f32>,

    /// The output current corresponding to full scale on the current monitor output.
    pub current_monitor_full_scale: Leaf<f32>,

    /// The maximum permissible output current. Amps.
    pub current_limit_max: Leaf<f32>,

    /// The output voltage at or above which duty synthesis is inhibited. Volts.
    pub over_voltage_limit: Leaf<f32>,

    /// The smallest expected load resistance, used to predict the current headroom. Ohms.
    pub min_load_resistance: Leaf<f32>,

    /// The probe current above which the SCR crowbar is fired.
    pub scr_fire_threshold: Leaf<f32>,

    /// The output voltage at or above which the warning lamp blinks.
    pub warn_voltage_threshold: Leaf<f32>,

    pub warn_blink_interval_ms: Leaf<u32>,

    /// The time the external enable input must be stable before it is accepted as asserted.
    pub debounce_delay_us: Leaf<u32>,

    /// The duration of the gate driver reset pulse.
    pub reset_pulse_us: Leaf<u32>,

    pub pid_kp: Leaf<f32>,
    pub pid_ki: Leaf<f32>,
    pub pid_kd: Leaf<f32>,

    /// Converts the regulator output into a normalized duty cycle.
    pub duty_scale: Leaf<f32>,

    pub min_duty: Leaf<f32>,
    pub max_duty: Leaf<f32>,

    /// Duty cycles (in percent) below this value are suppressed.
    pub min_duty_pct: Leaf<f32>,

    /// Duty cycles (in percent) above this value are driven to full conduction.
    pub max_duty_pct: Leaf<f32>,

    /// Additionally snap duty cycles within 5% of either end of the range.
    pub duty_deadband: Leaf<bool>,

    pub pwm_frequency_hz: Leaf<f32>,

    pub dead_time_ns: Leaf<u32>,

    /// The duration of the ramp-up segment. Seconds.
    pub ramp_t1: Leaf<f32>,

    /// The duration of the hold segment. Seconds.
    pub ramp_hold: Leaf<f32>,

    /// The duration of the ramp-down segment. Seconds.
    pub ramp_t2: Leaf<f32>,

    pub ramp_up: Leaf<Cubic>,
    pub ramp_down: Leaf<Cubic>,

    pub waveform_trigger: Leaf<WaveformTrigger>,

    /// Abort a running waveform when the charger relay is switched on.
    pub abort_on_charger_relay: Leaf<bool>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            // The voltage probe divider spans 200 V per volt around the midpoint.
            voltage_calibration: Leaf::from(LinearTransformation::new(200.0, 0.0)),

            // The current transducer spans the full current limit over half the ADC range.
            current_calibration: Leaf::from(LinearTransformation::new(
                DEFAULT_CURRENT_LIMIT_MAX / 1.65,
                0.0,
            )),

            // Thermistor divider fit over 0-3.3 V.
            temperature_calibration: Leaf::from(Cubic::new(-7.22, 121.0, -69.3, 18.4)),

            probe_midpoint: Leaf::from(DEFAULT_PROBE_MIDPOINT),
            filter_alpha: Leaf::from(0.1),

            voltage_monitor_full_scale: Leaf::from(200.0),
            current_monitor_full_scale: Leaf::from(DEFAULT_CURRENT_LIMIT_MAX),

            current_limit_max: Leaf::from(DEFAULT_CURRENT_LIMIT_MAX),
            over_voltage_limit: Leaf::from(DEFAULT_OVER_VOLTAGE_LIMIT),
            min_load_resistance: Leaf::from(1.0),
            scr_fire_threshold: Leaf::from(400.0),

            warn_voltage_threshold: Leaf::from(50.0),
            warn_blink_interval_ms: Leaf::from(500),
            debounce_delay_us: Leaf::from(1000),
            reset_pulse_us: Leaf::from(10),

            pid_kp: Leaf::from(0.4),
            pid_ki: Leaf::from(0.05),
            pid_kd: Leaf::from(0.01),
            duty_scale: Leaf::from(0.00125),

            min_duty: Leaf::from(0.0),
            max_duty: Leaf::from(1.0),
            min_duty_pct: Leaf::from(5.0),
            max_duty_pct: Leaf::from(95.0),
            duty_deadband: Leaf::from(false),

            pwm_frequency_hz: Leaf::from(20_000.0),
            dead_time_ns: Leaf::from(0),

            ramp_t1: Leaf::from(1.0),
            ramp_hold: Leaf::from(0.5),
            ramp_t2: Leaf::from(1.0),
            ramp_up: Leaf::from(Cubic::new(0.0, 0.0, 0.0, 100.0)),
            ramp_down: Leaf::from(Cubic::new(100.0, 0.0, 0.0, -100.0)),

            waveform_trigger: Leaf::from(WaveformTrigger::Command),
            abort_on_charger_relay: Leaf::from(false),
        }
    }
}

impl Settings {
    /// Check that the settings describe a usable configuration.
    ///
    /// # Returns
    /// Ok if the settings may be applied, otherwise a description of the first problem found.
    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.voltage_calibration.is_valid() {
            return Err("Invalid voltage calibration");
        }

        if !self.current_calibration.is_valid() {
            return Err("Invalid current calibration");
        }

        if !self.temperature_calibration.is_finite() {
            return Err("Invalid temperature calibration");
        }

        if !(0.0..=3.3).contains(&*self.probe_midpoint) {
            return Err("Probe midpoint out of range");
        }

        if !(*self.filter_alpha > 0.0 && *self.filter_alpha <= 1.0) {
            return Err("Filter alpha out of range");
        }

        let non_negative = [
            *self.current_limit_max,
            *self.over_voltage_limit,
            *self.min_load_resistance,
            *self.scr_fire_threshold,
            *self.warn_voltage_threshold,
            *self.pid_kp,
            *self.pid_ki,
            *self.pid_kd,
            *self.duty_scale,
            *self.ramp_t1,
            *self.ramp_hold,
            *self.ramp_t2,
        ];
        // NaN fails the comparison as well.
        if !non_negative.iter().all(|x| *x >= 0.0 && x.is_finite()) {
            return Err("Negative or non-finite limit");
        }

        if !(*self.voltage_monitor_full_scale > 0.0 && *self.current_monitor_full_scale > 0.0) {
            return Err("Invalid monitor full scale");
        }

        if !(0.0 <= *self.min_duty && *self.min_duty <= *self.max_duty && *self.max_duty <= 1.0)
        {
            return Err("Invalid duty bounds");
        }

        if !(0.0 <= *self.min_duty_pct
            && *self.min_duty_pct <= *self.max_duty_pct
            && *self.max_duty_pct <= 100.0)
        {
            return Err("Invalid duty window");
        }

        if !(*self.pwm_frequency_hz > 0.0 && self.pwm_frequency_hz.is_finite()) {
            return Err("Invalid PWM frequency");
        }

        if *self.reset_pulse_us == 0 {
            return Err("Reset pulse must be nonzero");
        }

        if !self.ramp_up.is_finite() || !self.ramp_down.is_finite() {
            return Err("Invalid ramp coefficients");
        }

        Ok(())
    }
}
