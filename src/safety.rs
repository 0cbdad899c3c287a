//! Enable, interlock and fault handling of the power stage
//!
//! # Description
//! The safety state machine is the only authority over the interlock flags in the
//! [SharedState]. Every tick it samples the gate driver fault and the external enable inputs,
//! derives `output_enabled` and `over_voltage`, latches gate faults until an explicit reset pulse
//! has completed, runs the warning lamp and finally writes all actuator commands through to their
//! outputs.
use crate::hardware::{DigitalIo, Duration, Instant, SafetySignals};
use crate::state::SharedState;

mod sm {
    use smlang::statemachine;

    impl Copy for States {}
    impl Clone for States {
        fn clone(&self) -> States {
            *self
        }
    }

    impl core::fmt::Debug for States {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            let name = match self {
                States::Normal => "Normal",
                States::FaultLatched => "FaultLatched",
                States::Resetting => "Resetting",
            };
            f.write_str(name)
        }
    }

    impl serde::Serialize for States {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let (idx, var) = match self {
                States::Normal => (0, "Normal"),
                States::FaultLatched => (1, "FaultLatched"),
                States::Resetting => (2, "Resetting"),
            };
            serializer.serialize_unit_variant("State", idx, var)
        }
    }

    statemachine! {
        transitions: {
            *Normal + Fault = FaultLatched,
            Normal + Reset = Resetting,

            FaultLatched + Fault = FaultLatched,
            FaultLatched + Reset = Resetting,

            // The fault input is expected to stay asserted until the reset pulse has finished.
            Resetting + Fault = Resetting,
            Resetting + PulseComplete = Normal,
        }
    }
}

pub use sm::States as SafetyState;

/// A summary of the interlock state after a tick.
#[derive(serde::Serialize, Debug, Copy, Clone)]
pub struct SafetyStatus {
    pub output_enabled: bool,
    pub gate_fault: bool,
    pub fault_lockout: bool,
    pub over_voltage: bool,
    pub state: SafetyState,
}

impl SafetyStatus {
    /// Check whether any hard inhibit of the power stage is active.
    pub fn inhibited(&self) -> bool {
        self.gate_fault || self.fault_lockout || !self.output_enabled || self.over_voltage
    }
}

/// The I/O and timing memory of the safety state machine.
pub struct Interlocks<P> {
    signals: SafetySignals<P>,
    reset_deadline: Option<Instant>,
    enable_pending_since: Option<Instant>,
    last_blink: Option<Instant>,
    output_failed: bool,
}

impl<P> sm::StateMachineContext for Interlocks<P> {}

impl<P: Copy + core::fmt::Debug> Interlocks<P> {
    /// Construct the interlock context.
    ///
    /// # Args
    /// * `signals` - The interlock and actuator signals with their polarities.
    pub fn new(signals: SafetySignals<P>) -> Self {
        Self {
            signals,
            reset_deadline: None,
            enable_pending_since: None,
            last_blink: None,
            output_failed: false,
        }
    }

    /// Sample the external enable input.
    ///
    /// # Note
    /// Loss of enable is accepted immediately. An asserted enable is only accepted once the input
    /// has been stable for the debounce delay.
    fn sample_external_enable<IO>(&mut self, io: &mut IO, state: &SharedState, now: Instant) -> bool
    where
        IO: DigitalIo<Pin = P>,
    {
        // An unreadable enable input is inactive.
        let asserted = self.signals.external_enable.read(io).unwrap_or(false);

        if !asserted {
            self.enable_pending_since = None;
            return false;
        }

        if state.external_enable.get() {
            return true;
        }

        let since = *self.enable_pending_since.get_or_insert(now);
        let delay = Duration::micros(state.debounce_delay_us.get() as u64);
        now.checked_duration_since(since)
            .map(|stable| stable >= delay)
            .unwrap_or(false)
    }

    /// Advance the warning lamp.
    fn update_lamp(&mut self, state: &SharedState, now: Instant) -> bool {
        if state.probe_voltage.get() >= state.warn_voltage_threshold.get() {
            let interval = Duration::millis(state.warn_blink_interval_ms.get() as u64);
            let toggle = match self.last_blink {
                None => true,
                Some(last) => now
                    .checked_duration_since(last)
                    .map(|elapsed| elapsed >= interval)
                    .unwrap_or(false),
            };

            if toggle {
                self.last_blink = Some(now);
                !state.warn_lamp.get()
            } else {
                state.warn_lamp.get()
            }
        } else {
            self.last_blink = None;
            state.lamp_test.get()
        }
    }

    /// Write the actuator commands through to the outputs.
    fn write_outputs<IO>(&mut self, io: &mut IO, state: &SharedState)
    where
        IO: DigitalIo<Pin = P>,
    {
        let outputs = [
            (self.signals.charger_relay, state.charger_relay.get()),
            (self.signals.dump_relay, state.dump_relay.get()),
            (self.signals.dump_fan, state.dump_fan.get()),
            (self.signals.warn_lamp, state.warn_lamp.get()),
            (self.signals.scr_trigger, state.scr_trigger.get()),
            (self.signals.scr_inhibit, state.scr_inhibit.get()),
        ];

        let mut failed = false;
        for (signal, active) in outputs.iter() {
            if let Err(error) = signal.write(io, *active) {
                if !self.output_failed {
                    log::warn!("Failed to drive {:?}: {:?}", signal.pin, error);
                }
                failed = true;
            }
        }

        self.output_failed = failed;
    }
}

pub type SafetyMachine<P> = sm::StateMachine<Interlocks<P>>;

impl<P: Copy + core::fmt::Debug> sm::StateMachine<Interlocks<P>> {
    /// Drive every output to its safe level.
    ///
    /// # Note
    /// The safe level releases all relays and the gate reset, and inhibits the SCR.
    pub fn force_safe<IO>(&mut self, io: &mut IO)
    where
        IO: DigitalIo<Pin = P>,
    {
        let signals = self.context().signals;
        let outputs = [
            (signals.gate_reset, false),
            (signals.charger_relay, false),
            (signals.dump_relay, false),
            (signals.dump_fan, false),
            (signals.warn_lamp, false),
            (signals.scr_trigger, false),
            (signals.scr_inhibit, true),
        ];

        for (signal, active) in outputs.iter() {
            if let Err(error) = signal.write(io, *active) {
                log::error!("Failed to secure {:?}: {:?}", signal.pin, error);
            }
        }
    }

    /// Periodically called to update the interlocks.
    ///
    /// # Args
    /// * `io` - The digital I/O of the board.
    /// * `state` - The shared system state.
    /// * `now` - The current time.
    ///
    /// # Returns
    /// The interlock status after the update.
    pub fn update<IO>(&mut self, io: &mut IO, state: &SharedState, now: Instant) -> SafetyStatus
    where
        IO: DigitalIo<Pin = P>,
    {
        // An unreadable fault input is treated as a fault.
        let gate_fault = self
            .context()
            .signals
            .gate_fault
            .read(io)
            .unwrap_or(true);
        state.gate_fault.set(gate_fault);

        let external_enable = self.context_mut().sample_external_enable(io, state, now);
        state.external_enable.set(external_enable);

        let output_enabled = external_enable && state.internal_enable.get();
        state.output_enabled.set(output_enabled);

        let over_voltage = state.probe_voltage.get() >= state.over_voltage_limit.get();
        state.over_voltage.set(over_voltage);

        // Handle the reset pulse.
        if matches!(self.state(), &sm::States::Resetting) {
            let expired = self
                .context()
                .reset_deadline
                .map(|deadline| now >= deadline)
                .unwrap_or(true);

            if expired {
                let reset = self.context().signals.gate_reset;
                reset.write(io, false).ok();
                self.context_mut().reset_deadline = None;
                self.process_event(sm::Events::PulseComplete).ok();
            }
        } else if state.reset_request.take() {
            let pulse = Duration::micros(state.reset_pulse_us.get() as u64);
            let reset = self.context().signals.gate_reset;
            if let Err(error) = reset.write(io, true) {
                log::warn!("Failed to drive gate reset: {:?}", error);
            }
            self.context_mut().reset_deadline = Some(now + pulse);
            self.process_event(sm::Events::Reset).ok();
        }

        if gate_fault {
            if matches!(self.state(), &sm::States::Normal) {
                log::warn!("Gate fault latched");
            }
            self.process_event(sm::Events::Fault).ok();
        }

        let lockout = !matches!(self.state(), &sm::States::Normal);
        if state.fault_lockout.get() && !lockout {
            log::info!("Fault lockout cleared");
        }
        state.fault_lockout.set(lockout);

        // Any interlock trip releases both relays within this tick.
        if lockout || over_voltage || !output_enabled {
            state.charger_relay.set(false);
            state.dump_relay.set(false);
        }

        let lamp = self.context_mut().update_lamp(state, now);
        state.warn_lamp.set(lamp);

        self.context_mut().write_outputs(io, state);

        SafetyStatus {
            output_enabled,
            gate_fault,
            fault_lockout: lockout,
            over_voltage,
            state: *self.state(),
        }
    }
}
