//! Current waveform sequencer
//!
//! # Description
//! A waveform is a ramp-up segment, a hold at the final ramp-up value and a ramp-down segment.
//! Each ramp is a cubic in the normalized segment time `s` in [0, 1]. While the sequencer runs, it
//! owns the current setpoint in the [SharedState]; when it finishes or aborts the setpoint is
//! forced back to zero.
use serde::{Deserialize, Serialize};

use crate::state::SharedState;

/// Segments shorter than this are evaluated at their endpoint.
const SEGMENT_EPSILON: f32 = 1e-6;

/// Selects what starts a waveform.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaveformTrigger {
    /// A `run_wave` command from the host.
    Command,

    /// A rising edge of `output_enabled`.
    EnableEdge,
}

/// The segment the sequencer is currently in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    RampUp,
    Hold,
    RampDown,
}

pub struct Waveform {
    phase: Phase,
    t: f32,
    last_enable: bool,
}

impl Default for Waveform {
    fn default() -> Self {
        Self::new()
    }
}

impl Waveform {
    pub const fn new() -> Self {
        Self {
            phase: Phase::Idle,
            t: 0.0,
            last_enable: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The time elapsed since the waveform was started. Seconds.
    pub fn elapsed(&self) -> f32 {
        self.t
    }

    fn stop(&mut self, state: &SharedState) {
        self.phase = Phase::Idle;
        self.t = 0.0;
        state.set_current.set(0.0);
        state.waveform_running.set(false);
    }

    /// Advance the sequencer by one control tick.
    ///
    /// # Args
    /// * `state` - The shared system state. `output_enabled` must already be current.
    /// * `dt` - The time since the previous tick. Seconds.
    ///
    /// # Returns
    /// The phase the sequencer was in for this tick.
    pub fn update(&mut self, state: &SharedState, dt: f32) -> Phase {
        let enabled = state.output_enabled.get();
        let enable_edge = enabled && !self.last_enable;
        self.last_enable = enabled;

        let triggered = if state.trigger_on_enable_edge.get() {
            // Consume stale commands so they cannot fire later.
            state.run_request.take();
            enable_edge
        } else {
            state.run_request.take()
        };

        if self.phase != Phase::Idle {
            let relay_abort = state.abort_on_charger_relay.get() && state.charger_relay.get();
            if !enabled || relay_abort {
                log::info!("Waveform aborted after {} s", self.t);
                self.stop(state);
                return Phase::Idle;
            }
        } else if triggered {
            if !enabled {
                log::warn!("Waveform start ignored, output disabled");
                return Phase::Idle;
            }

            log::info!("Waveform started");
            self.phase = Phase::RampUp;
            self.t = 0.0;
            state.waveform_running.set(true);
        } else {
            return Phase::Idle;
        }

        let t1 = state.ramp_t1.get();
        let hold_end = t1 + state.ramp_hold.get();
        let t2 = state.ramp_t2.get();
        let end = hold_end + t2;

        let (phase, y) = if self.t < t1 {
            (Phase::RampUp, state.ramp_up.get().evaluate(self.t / t1))
        } else if self.t < hold_end {
            (Phase::Hold, state.ramp_up.get().evaluate(1.0))
        } else if self.t < end || self.phase != Phase::RampDown {
            // The ramp-down is never skipped. A zero-length ramp-down is evaluated once at its
            // endpoint.
            let s = if t2 > SEGMENT_EPSILON {
                ((self.t - hold_end) / t2).min(1.0)
            } else {
                1.0
            };
            (Phase::RampDown, state.ramp_down.get().evaluate(s))
        } else {
            log::info!("Waveform finished");
            self.stop(state);
            return Phase::Idle;
        };

        self.phase = phase;

        // NaN lands on zero.
        let setpoint = y.max(0.0).min(state.current_limit_max.get());
        state.set_current.set(setpoint);

        self.t += dt;
        phase
    }
}
