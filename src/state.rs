//! Process-wide controller state shared between the control tick and the host context
//!
//! # Description
//! Every field of [SharedState] is an independent atomic. The control tick and the host command
//! channel may run on different execution contexts, so no field may be torn, but no update ever
//! needs to change more than one field atomically. Each field has a single writer:
//!
//! * Measurements are written by the sensor channels.
//! * Safety flags are written by the safety state machine.
//! * The active current setpoint is written by the `curr_set` command or, while a waveform runs,
//!   by the waveform sequencer. Settings updates never touch it.
//! * Commands and tunables are written by the host command channel.
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::linear_transformation::{Cubic, LinearTransformation};
use crate::settings::Settings;
use crate::waveform::WaveformTrigger;

/// An `f32` stored in an `AtomicU32`.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    /// Construct a zero-valued atomic.
    pub const fn zero() -> Self {
        // The bit pattern of 0.0 is all zeros.
        Self(AtomicU32::new(0))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed)
    }
}

/// A flag.
#[derive(Debug, Default)]
pub struct Flag(AtomicBool);

impl Flag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, value: bool) {
        self.0.store(value, Ordering::Relaxed)
    }

    /// Clear the flag, returning its previous value.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::Relaxed)
    }
}

/// An unsigned integer tunable or counter.
#[derive(Debug, Default)]
pub struct Word(AtomicU32);

impl Word {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, value: u32) {
        self.0.store(value, Ordering::Relaxed)
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

/// An atomically stored [LinearTransformation]. Slope and offset are independent fields.
#[derive(Debug, Default)]
pub struct AtomicTransformation {
    pub slope: AtomicF32,
    pub offset: AtomicF32,
}

impl AtomicTransformation {
    pub const fn zero() -> Self {
        Self {
            slope: AtomicF32::zero(),
            offset: AtomicF32::zero(),
        }
    }

    pub fn get(&self) -> LinearTransformation {
        LinearTransformation::new(self.slope.get(), self.offset.get())
    }

    pub fn set(&self, transform: &LinearTransformation) {
        self.slope.set(transform.slope);
        self.offset.set(transform.offset);
    }
}

/// An atomically stored [Cubic]. Each coefficient is an independent field.
#[derive(Debug, Default)]
pub struct AtomicCubic {
    pub a: AtomicF32,
    pub b: AtomicF32,
    pub c: AtomicF32,
    pub d: AtomicF32,
}

impl AtomicCubic {
    pub const fn zero() -> Self {
        Self {
            a: AtomicF32::zero(),
            b: AtomicF32::zero(),
            c: AtomicF32::zero(),
            d: AtomicF32::zero(),
        }
    }

    pub fn get(&self) -> Cubic {
        Cubic::new(self.a.get(), self.b.get(), self.c.get(), self.d.get())
    }

    pub fn set(&self, cubic: &Cubic) {
        self.a.set(cubic.a);
        self.b.set(cubic.b);
        self.c.set(cubic.c);
        self.d.set(cubic.d);
    }
}

/// The system state record.
///
/// # Note
/// A freshly constructed state is all zeros: every output is off and both enables are inactive.
/// Tunables must be loaded with [SharedState::apply_settings] before the first control tick.
#[derive(Debug, Default)]
pub struct SharedState {
    // Setpoints
    pub set_voltage: AtomicF32,
    pub set_current: AtomicF32,

    // Measurements
    pub probe_voltage: AtomicF32,
    pub probe_current: AtomicF32,
    pub internal_temperature: AtomicF32,
    pub meas_voltage_pwm: AtomicF32,
    pub meas_current_pwm: AtomicF32,

    // Safety
    pub external_enable: Flag,
    pub internal_enable: Flag,
    pub output_enabled: Flag,
    pub gate_fault: Flag,
    pub fault_lockout: Flag,
    pub over_voltage: Flag,

    // Actuator commands
    pub charger_relay: Flag,
    pub dump_relay: Flag,
    pub dump_fan: Flag,
    pub warn_lamp: Flag,
    pub lamp_test: Flag,
    pub scr_trigger: Flag,
    pub scr_inhibit: Flag,
    pub scr_fire_request: Flag,

    // Requests consumed by the control tick
    pub reset_request: Flag,
    pub run_request: Flag,

    // Status
    pub waveform_running: Flag,
    pub duty: AtomicF32,
    pub pwm_frequency: AtomicF32,
    pub config_error: Flag,
    pub protocol_errors: Word,

    // Calibration
    pub voltage_calibration: AtomicTransformation,
    pub current_calibration: AtomicTransformation,
    pub temperature_calibration: AtomicCubic,
    pub probe_midpoint: AtomicF32,
    pub filter_alpha: AtomicF32,
    pub voltage_monitor_full_scale: AtomicF32,
    pub current_monitor_full_scale: AtomicF32,

    // Limits
    pub current_limit_max: AtomicF32,
    pub over_voltage_limit: AtomicF32,
    pub min_load_resistance: AtomicF32,
    pub scr_fire_threshold: AtomicF32,
    pub warn_voltage_threshold: AtomicF32,
    pub warn_blink_interval_ms: Word,
    pub debounce_delay_us: Word,
    pub reset_pulse_us: Word,

    // Regulator
    pub pid_kp: AtomicF32,
    pub pid_ki: AtomicF32,
    pub pid_kd: AtomicF32,
    pub duty_scale: AtomicF32,
    pub min_duty: AtomicF32,
    pub max_duty: AtomicF32,
    pub min_duty_pct: AtomicF32,
    pub max_duty_pct: AtomicF32,
    pub duty_deadband: Flag,
    pub pwm_frequency_hz: AtomicF32,
    pub dead_time_ns: Word,

    // Waveform
    pub ramp_t1: AtomicF32,
    pub ramp_hold: AtomicF32,
    pub ramp_t2: AtomicF32,
    pub ramp_up: AtomicCubic,
    pub ramp_down: AtomicCubic,
    pub trigger_on_enable_edge: Flag,
    pub abort_on_charger_relay: Flag,
}

/// A plain copy of the reported state, suitable for serialization.
#[derive(serde::Serialize, Debug, Copy, Clone, PartialEq)]
pub struct Status {
    pub set_voltage: f32,
    pub set_current: f32,
    pub probe_voltage: f32,
    pub probe_current: f32,
    pub internal_temperature: f32,
    pub external_enable: bool,
    pub internal_enable: bool,
    pub output_enabled: bool,
    pub gate_fault: bool,
    pub fault_lockout: bool,
    pub over_voltage: bool,
    pub charger_relay: bool,
    pub dump_relay: bool,
    pub dump_fan: bool,
    pub warn_lamp: bool,
    pub scr_trigger: bool,
    pub scr_inhibit: bool,
    pub waveform_running: bool,
    pub duty: f32,
    pub meas_voltage_pwm: f32,
    pub meas_current_pwm: f32,
    pub config_error: bool,
    pub protocol_errors: u32,
}

impl SharedState {
    /// Construct the state in its safe, all-off condition.
    pub const fn new() -> Self {
        Self {
            set_voltage: AtomicF32::zero(),
            set_current: AtomicF32::zero(),
            probe_voltage: AtomicF32::zero(),
            probe_current: AtomicF32::zero(),
            internal_temperature: AtomicF32::zero(),
            meas_voltage_pwm: AtomicF32::zero(),
            meas_current_pwm: AtomicF32::zero(),
            external_enable: Flag::new(),
            internal_enable: Flag::new(),
            output_enabled: Flag::new(),
            gate_fault: Flag::new(),
            fault_lockout: Flag::new(),
            over_voltage: Flag::new(),
            charger_relay: Flag::new(),
            dump_relay: Flag::new(),
            dump_fan: Flag::new(),
            warn_lamp: Flag::new(),
            lamp_test: Flag::new(),
            scr_trigger: Flag::new(),
            scr_inhibit: Flag::new(),
            scr_fire_request: Flag::new(),
            reset_request: Flag::new(),
            run_request: Flag::new(),
            waveform_running: Flag::new(),
            duty: AtomicF32::zero(),
            pwm_frequency: AtomicF32::zero(),
            config_error: Flag::new(),
            protocol_errors: Word::new(),
            voltage_calibration: AtomicTransformation::zero(),
            current_calibration: AtomicTransformation::zero(),
            temperature_calibration: AtomicCubic::zero(),
            probe_midpoint: AtomicF32::zero(),
            filter_alpha: AtomicF32::zero(),
            voltage_monitor_full_scale: AtomicF32::zero(),
            current_monitor_full_scale: AtomicF32::zero(),
            current_limit_max: AtomicF32::zero(),
            over_voltage_limit: AtomicF32::zero(),
            min_load_resistance: AtomicF32::zero(),
            scr_fire_threshold: AtomicF32::zero(),
            warn_voltage_threshold: AtomicF32::zero(),
            warn_blink_interval_ms: Word::new(),
            debounce_delay_us: Word::new(),
            reset_pulse_us: Word::new(),
            pid_kp: AtomicF32::zero(),
            pid_ki: AtomicF32::zero(),
            pid_kd: AtomicF32::zero(),
            duty_scale: AtomicF32::zero(),
            min_duty: AtomicF32::zero(),
            max_duty: AtomicF32::zero(),
            min_duty_pct: AtomicF32::zero(),
            max_duty_pct: AtomicF32::zero(),
            duty_deadband: Flag::new(),
            pwm_frequency_hz: AtomicF32::zero(),
            dead_time_ns: Word::new(),
            ramp_t1: AtomicF32::zero(),
            ramp_hold: AtomicF32::zero(),
            ramp_t2: AtomicF32::zero(),
            ramp_up: AtomicCubic::zero(),
            ramp_down: AtomicCubic::zero(),
            trigger_on_enable_edge: Flag::new(),
            abort_on_charger_relay: Flag::new(),
        }
    }

    /// Load validated settings into the live state.
    ///
    /// # Note
    /// Fields are stored one at a time. The control tick may observe a mix of old and new
    /// tunables for one tick, which is acceptable because every tunable is independently valid.
    ///
    /// The setpoints are re-clamped against the new limits.
    pub fn apply_settings(&self, settings: &Settings) {
        self.voltage_calibration.set(&settings.voltage_calibration);
        self.current_calibration.set(&settings.current_calibration);
        self.temperature_calibration
            .set(&settings.temperature_calibration);
        self.probe_midpoint.set(*settings.probe_midpoint);
        self.filter_alpha.set(*settings.filter_alpha);
        self.voltage_monitor_full_scale
            .set(*settings.voltage_monitor_full_scale);
        self.current_monitor_full_scale
            .set(*settings.current_monitor_full_scale);

        self.current_limit_max.set(*settings.current_limit_max);
        self.over_voltage_limit.set(*settings.over_voltage_limit);
        self.min_load_resistance.set(*settings.min_load_resistance);
        self.scr_fire_threshold.set(*settings.scr_fire_threshold);
        self.warn_voltage_threshold
            .set(*settings.warn_voltage_threshold);
        self.warn_blink_interval_ms
            .set(*settings.warn_blink_interval_ms);
        self.debounce_delay_us.set(*settings.debounce_delay_us);
        self.reset_pulse_us.set(*settings.reset_pulse_us);

        self.pid_kp.set(*settings.pid_kp);
        self.pid_ki.set(*settings.pid_ki);
        self.pid_kd.set(*settings.pid_kd);
        self.duty_scale.set(*settings.duty_scale);
        self.min_duty.set(*settings.min_duty);
        self.max_duty.set(*settings.max_duty);
        self.min_duty_pct.set(*settings.min_duty_pct);
        self.max_duty_pct.set(*settings.max_duty_pct);
        self.duty_deadband.set(*settings.duty_deadband);
        self.pwm_frequency_hz.set(*settings.pwm_frequency_hz);
        self.dead_time_ns.set(*settings.dead_time_ns);

        self.ramp_t1.set(*settings.ramp_t1);
        self.ramp_hold.set(*settings.ramp_hold);
        self.ramp_t2.set(*settings.ramp_t2);
        self.ramp_up.set(&settings.ramp_up);
        self.ramp_down.set(&settings.ramp_down);
        self.trigger_on_enable_edge
            .set(*settings.waveform_trigger == WaveformTrigger::EnableEdge);
        self.abort_on_charger_relay
            .set(*settings.abort_on_charger_relay);

        // The current setpoint is left to its writers. The power stage clamps it on use.
        self.set_voltage
            .set(self.set_voltage.get().clamp(0.0, *settings.over_voltage_limit));
    }

    /// Capture the reported state.
    pub fn snapshot(&self) -> Status {
        Status {
            set_voltage: self.set_voltage.get(),
            set_current: self.set_current.get(),
            probe_voltage: self.probe_voltage.get(),
            probe_current: self.probe_current.get(),
            internal_temperature: self.internal_temperature.get(),
            external_enable: self.external_enable.get(),
            internal_enable: self.internal_enable.get(),
            output_enabled: self.output_enabled.get(),
            gate_fault: self.gate_fault.get(),
            fault_lockout: self.fault_lockout.get(),
            over_voltage: self.over_voltage.get(),
            charger_relay: self.charger_relay.get(),
            dump_relay: self.dump_relay.get(),
            dump_fan: self.dump_fan.get(),
            warn_lamp: self.warn_lamp.get(),
            scr_trigger: self.scr_trigger.get(),
            scr_inhibit: self.scr_inhibit.get(),
            waveform_running: self.waveform_running.get(),
            duty: self.duty.get(),
            meas_voltage_pwm: self.meas_voltage_pwm.get(),
            meas_current_pwm: self.meas_current_pwm.get(),
            config_error: self.config_error.get(),
            protocol_errors: self.protocol_errors.get(),
        }
    }

    /// Read a state field by its host-facing name.
    ///
    /// # Args
    /// * `name` - The field name. Command names resolve to the value they control.
    ///
    /// # Returns
    /// The value, with flags reported as 0 or 1. None if the name is unknown.
    pub fn get(&self, name: &str) -> Option<f32> {
        let flag = |f: &Flag| if f.get() { 1.0 } else { 0.0 };

        let value = match name {
            "volt_set" => self.set_voltage.get(),
            "curr_set" => self.set_current.get(),
            "volt_act" => self.probe_voltage.get(),
            "curr_act" => self.probe_current.get(),
            "temperature" => self.internal_temperature.get(),
            "meas_voltage_pwm" => self.meas_voltage_pwm.get(),
            "meas_current_pwm" => self.meas_current_pwm.get(),
            "ext_enable" => flag(&self.external_enable),
            "int_enable" => flag(&self.internal_enable),
            "output_enable" => flag(&self.output_enabled),
            "igbt_fault" => flag(&self.gate_fault),
            "fault_lockout" => flag(&self.fault_lockout),
            "over_voltage" => flag(&self.over_voltage),
            "charger_relay" => flag(&self.charger_relay),
            "dump_relay" => flag(&self.dump_relay),
            "dump_fan" => flag(&self.dump_fan),
            "warn_lamp" => flag(&self.warn_lamp),
            "lamp_test" => flag(&self.lamp_test),
            "scr_trig" => flag(&self.scr_trigger),
            "scr_inhibit" => flag(&self.scr_inhibit),
            "wave_running" | "run_wave" => flag(&self.waveform_running),
            "duty" => self.duty.get(),
            "pwm_freq_actual" => self.pwm_frequency.get(),
            "config_error" => flag(&self.config_error),
            "protocol_errors" => self.protocol_errors.get() as f32,
            "volt_scale" => self.voltage_calibration.slope.get(),
            "volt_offset" => self.voltage_calibration.offset.get(),
            "curr_scale" => self.current_calibration.slope.get(),
            "curr_offset" => self.current_calibration.offset.get(),
            "curr_limit_max" => self.current_limit_max.get(),
            "over_volt_limit" => self.over_voltage_limit.get(),
            "min_load_res" => self.min_load_resistance.get(),
            "scr_fire_threshold" => self.scr_fire_threshold.get(),
            "warn_volt_threshold" => self.warn_voltage_threshold.get(),
            "warn_blink_ms" => self.warn_blink_interval_ms.get() as f32,
            "debounce_us" => self.debounce_delay_us.get() as f32,
            "pid_kp" => self.pid_kp.get(),
            "pid_ki" => self.pid_ki.get(),
            "pid_kd" => self.pid_kd.get(),
            "duty_scale" => self.duty_scale.get(),
            "min_duty" => self.min_duty.get(),
            "max_duty" => self.max_duty.get(),
            "min_duty_pct" => self.min_duty_pct.get(),
            "max_duty_pct" => self.max_duty_pct.get(),
            "pwm_freq" => self.pwm_frequency_hz.get(),
            "dead_time_ns" => self.dead_time_ns.get() as f32,
            "wave_t1" => self.ramp_t1.get(),
            "wave_thold" => self.ramp_hold.get(),
            "wave_t2" => self.ramp_t2.get(),
            "wave_a1" => self.ramp_up.a.get(),
            "wave_b1" => self.ramp_up.b.get(),
            "wave_c1" => self.ramp_up.c.get(),
            "wave_d1" => self.ramp_up.d.get(),
            "wave_a2" => self.ramp_down.a.get(),
            "wave_b2" => self.ramp_down.b.get(),
            "wave_c2" => self.ramp_down.c.get(),
            "wave_d2" => self.ramp_down.d.get(),
            _ => return None,
        };

        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_is_safe() {
        let state = SharedState::new();
        let status = state.snapshot();
        assert!(!status.output_enabled);
        assert!(!status.charger_relay);
        assert_eq!(status.duty, 0.0);
    }

    #[test]
    fn apply_settings_clamps_voltage_setpoint() {
        let state = SharedState::new();
        state.set_voltage.set(1000.0);
        state.set_current.set(1000.0);
        state.apply_settings(&Settings::default());
        assert_eq!(state.set_voltage.get(), 100.0);
        assert_eq!(state.set_current.get(), 1000.0);
        assert_eq!(state.pid_kp.get(), 0.4);
        assert_eq!(state.ramp_up.get(), Cubic::new(0.0, 0.0, 0.0, 100.0));
    }

    #[test]
    fn named_getters() {
        let state = SharedState::new();
        state.apply_settings(&Settings::default());
        state.gate_fault.set(true);
        assert_eq!(state.get("igbt_fault"), Some(1.0));
        assert_eq!(state.get("ext_enable"), Some(0.0));
        assert_eq!(state.get("curr_limit_max"), Some(360.0));
        assert_eq!(state.get("bogus"), None);
    }

    #[test]
    fn snapshot_serializes() {
        let state = SharedState::new();
        let json: heapless::String<1024> = serde_json_core::to_string(&state.snapshot()).unwrap();
        assert!(json.starts_with("{\"set_voltage\":"));
    }
}
