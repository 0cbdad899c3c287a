//! Host command ingestion
//!
//! # Description
//! The host (and the display panel, through the host) sends named value events:
//!
//! ```json
//! {"name": "curr_set", "value": 12.5}
//! {"display_event": {"name": "dump_fan", "value": true}}
//! ```
//!
//! The value may be a number, a boolean or a numeric string. Each name maps onto exactly one
//! mutation. Runtime commands write the shared state directly. Configuration commands update the
//! settings tree, which is validated as a whole and only then loaded into the shared state, so a
//! rejected value never becomes active.
use pwm_timebase::{Counter, Timebase};
use serde::Deserialize;

use crate::hardware::PwmTimer;
use crate::settings::Settings;
use crate::state::SharedState;

/// Reasons a command was not applied.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize)]
pub enum ProtocolError {
    /// The payload could not be parsed.
    Malformed,

    /// The name is not part of the command vocabulary.
    Unhandled,

    /// The value is not acceptable for the named item.
    Rejected,
}

#[derive(Deserialize)]
struct Event<'a, V> {
    name: &'a str,
    value: V,
}

#[derive(Deserialize)]
struct Envelope<'a, V> {
    #[serde(borrow)]
    display_event: Event<'a, V>,
}

/// Parse an event carrying a value of type `V`, either bare or inside a display envelope.
fn parse_as<'a, V: Deserialize<'a>>(payload: &'a [u8]) -> Option<(&'a str, V)> {
    if let Ok((event, _)) = serde_json_core::from_slice::<Event<'a, V>>(payload) {
        return Some((event.name, event.value));
    }

    serde_json_core::from_slice::<Envelope<'a, V>>(payload)
        .ok()
        .map(|(envelope, _)| (envelope.display_event.name, envelope.display_event.value))
}

/// Parse a command payload into its name and numeric value.
///
/// # Returns
/// The name and value. Booleans are coerced to 0 or 1 and strings are parsed as numbers.
pub fn parse(payload: &[u8]) -> Result<(&str, f32), ProtocolError> {
    if let Some((name, value)) = parse_as::<f32>(payload) {
        return Ok((name, value));
    }

    if let Some((name, value)) = parse_as::<bool>(payload) {
        return Ok((name, if value { 1.0 } else { 0.0 }));
    }

    if let Some((name, text)) = parse_as::<&str>(payload) {
        let value = match text.trim() {
            "true" => 1.0,
            "false" => 0.0,
            number => number.parse::<f32>().map_err(|_| ProtocolError::Malformed)?,
        };
        return Ok((name, value));
    }

    Err(ProtocolError::Malformed)
}

/// A configuration mutation.
type Mutation = fn(&mut Settings, f32) -> Result<(), ProtocolError>;

/// Convert a value into a non-negative integer.
fn whole(value: f32) -> Result<u32, ProtocolError> {
    if value >= 0.0 && value.is_finite() {
        Ok(libm::roundf(value) as u32)
    } else {
        Err(ProtocolError::Rejected)
    }
}

/// Look up the settings mutation of a configuration command.
fn configuration(name: &str) -> Option<Mutation> {
    let mutation: Mutation = match name {
        "wave_t1" => |s, v| {
            *s.ramp_t1 = v;
            Ok(())
        },
        "wave_thold" => |s, v| {
            *s.ramp_hold = v;
            Ok(())
        },
        "wave_t2" => |s, v| {
            *s.ramp_t2 = v;
            Ok(())
        },
        "wave_a1" => |s, v| {
            s.ramp_up.a = v;
            Ok(())
        },
        "wave_b1" => |s, v| {
            s.ramp_up.b = v;
            Ok(())
        },
        "wave_c1" => |s, v| {
            s.ramp_up.c = v;
            Ok(())
        },
        "wave_d1" => |s, v| {
            s.ramp_up.d = v;
            Ok(())
        },
        "wave_a2" => |s, v| {
            s.ramp_down.a = v;
            Ok(())
        },
        "wave_b2" => |s, v| {
            s.ramp_down.b = v;
            Ok(())
        },
        "wave_c2" => |s, v| {
            s.ramp_down.c = v;
            Ok(())
        },
        "wave_d2" => |s, v| {
            s.ramp_down.d = v;
            Ok(())
        },
        "volt_scale" => |s, v| {
            s.voltage_calibration.slope = v;
            Ok(())
        },
        "volt_offset" => |s, v| {
            s.voltage_calibration.offset = v;
            Ok(())
        },
        "curr_scale" => |s, v| {
            s.current_calibration.slope = v;
            Ok(())
        },
        "curr_offset" => |s, v| {
            s.current_calibration.offset = v;
            Ok(())
        },
        "pid_kp" => |s, v| {
            *s.pid_kp = v;
            Ok(())
        },
        "pid_ki" => |s, v| {
            *s.pid_ki = v;
            Ok(())
        },
        "pid_kd" => |s, v| {
            *s.pid_kd = v;
            Ok(())
        },
        "duty_scale" => |s, v| {
            *s.duty_scale = v;
            Ok(())
        },
        "min_duty" => |s, v| {
            *s.min_duty = v;
            Ok(())
        },
        "max_duty" => |s, v| {
            *s.max_duty = v;
            Ok(())
        },
        "pwm_freq" => |s, v| {
            *s.pwm_frequency_hz = v;
            Ok(())
        },
        "dead_time_ns" => |s, v| {
            *s.dead_time_ns = whole(v)?;
            Ok(())
        },
        "curr_limit_max" => |s, v| {
            *s.current_limit_max = v;
            Ok(())
        },
        "over_volt_limit" => |s, v| {
            *s.over_voltage_limit = v;
            Ok(())
        },
        "min_load_res" => |s, v| {
            *s.min_load_resistance = v;
            Ok(())
        },
        "min_duty_pct" => |s, v| {
            *s.min_duty_pct = v;
            Ok(())
        },
        "max_duty_pct" => |s, v| {
            *s.max_duty_pct = v;
            Ok(())
        },
        "warn_volt_threshold" => |s, v| {
            *s.warn_voltage_threshold = v;
            Ok(())
        },
        "warn_blink_ms" => |s, v| {
            *s.warn_blink_interval_ms = whole(v)?;
            Ok(())
        },
        "debounce_us" => |s, v| {
            *s.debounce_delay_us = whole(v)?;
            Ok(())
        },
        "scr_fire_threshold" => |s, v| {
            *s.scr_fire_threshold = v;
            Ok(())
        },
        _ => return None,
    };

    Some(mutation)
}

/// Applies host commands to the controller.
pub struct CommandHandler<'a> {
    state: &'a SharedState,
    settings: Settings,
    pwm_timer: Option<(u32, Counter)>,
}

impl<'a> CommandHandler<'a> {
    /// Construct the handler and load the initial settings into the shared state.
    ///
    /// # Note
    /// Invalid initial settings are replaced by the defaults and reported through the
    /// configuration error flag.
    pub fn new(state: &'a SharedState, settings: Settings) -> Self {
        let settings = match settings.validate() {
            Ok(()) => settings,
            Err(reason) => {
                log::warn!("Initial settings rejected: {}", reason);
                state.config_error.set(true);
                Settings::default()
            }
        };

        state.apply_settings(&settings);
        Self {
            state,
            settings,
            pwm_timer: None,
        }
    }

    /// Check PWM frequency changes against the limits of the power stage timer.
    ///
    /// # Note
    /// Without a timer, frequencies are only checked for plausibility here and an unrealizable
    /// value is reported by the power stage when it fails to reconfigure.
    pub fn with_timer<T: PwmTimer>(mut self, timer: &T) -> Self {
        self.pwm_timer.replace((timer.clock_hz(), timer.counter()));
        self
    }

    /// The active settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Handle a command payload for the host bridge.
    ///
    /// # Returns
    /// 1 if the command was applied, 0 otherwise.
    pub fn process(&mut self, payload: &[u8]) -> u8 {
        match self.handle(payload) {
            Ok(()) => 1,
            Err(_) => 0,
        }
    }

    /// Handle a command payload.
    pub fn handle(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        let result = parse(payload).and_then(|(name, value)| {
            log::debug!("Command {} = {}", name, value);
            self.apply(name, value)
        });

        if let Err(error) = result {
            if error != ProtocolError::Unhandled {
                log::warn!("Command not applied: {:?}", error);
            }
            self.state.protocol_errors.increment();
        }

        result
    }

    /// Apply a named value.
    ///
    /// # Args
    /// * `name` - The command name.
    /// * `value` - The command value. Flags are active for any nonzero value.
    pub fn apply(&mut self, name: &str, value: f32) -> Result<(), ProtocolError> {
        let state = self.state;
        let active = value != 0.0 && !value.is_nan();

        match name {
            "volt_set" => {
                if value.is_nan() {
                    return Err(ProtocolError::Rejected);
                }
                let limit = state.over_voltage_limit.get();
                state.set_voltage.set(value.max(0.0).min(limit));
            }
            "curr_set" => {
                if value.is_nan() {
                    return Err(ProtocolError::Rejected);
                }
                let limit = state.current_limit_max.get();
                state.set_current.set(value.max(0.0).min(limit));
            }
            "int_enable" => state.internal_enable.set(active),
            "lamp_test" => state.lamp_test.set(active),
            "igbt_reset" => {
                if active {
                    state.reset_request.set(true);
                }
            }
            "charger_relay" => state.charger_relay.set(active),
            "dump_relay" => state.dump_relay.set(active),
            "dump_fan" => state.dump_fan.set(active),
            "scr_trig" => state.scr_fire_request.set(active),
            "run_wave" => state.run_request.set(active),
            _ => {
                let mutation = configuration(name).ok_or(ProtocolError::Unhandled)?;
                let mut candidate = self.settings.clone();
                mutation(&mut candidate, value)?;
                self.commit(candidate)?;
            }
        }

        Ok(())
    }

    /// Update a settings item by its path.
    ///
    /// # Args
    /// * `path` - The settings path, e.g. `/ramp_up`.
    /// * `value` - The JSON encoded value.
    pub fn set_setting(&mut self, path: &str, value: &[u8]) -> Result<(), ProtocolError> {
        let mut candidate = self.settings.clone();
        let result = miniconf::json::set(&mut candidate, path, value)
            .map_err(|_| ProtocolError::Malformed)
            .and_then(|_| self.commit(candidate));

        if let Err(error) = result {
            log::warn!("Setting {} not applied: {:?}", path, error);
            self.state.protocol_errors.increment();
        }

        result
    }

    /// Validate and activate new settings.
    fn commit(&mut self, candidate: Settings) -> Result<(), ProtocolError> {
        if let Err(reason) = candidate.validate() {
            log::warn!("Settings rejected: {}", reason);
            self.state.config_error.set(true);
            return Err(ProtocolError::Rejected);
        }

        if let Some((clock_hz, counter)) = self.pwm_timer.as_ref() {
            let frequency = *candidate.pwm_frequency_hz;
            if let Err(error) = Timebase::solve(*clock_hz, frequency, counter) {
                log::warn!("PWM frequency {} Hz rejected: {:?}", frequency, error);
                self.state.config_error.set(true);
                return Err(ProtocolError::Rejected);
            }
        }

        self.state.apply_settings(&candidate);
        self.state.config_error.set(false);
        self.settings = candidate;
        Ok(())
    }
}
