//! Control tick orchestration
//!
//! # Description
//! The [Controller] owns every peripheral of the control core and runs one control tick at a
//! time. The tick order matters: measurements are published first, the interlocks are evaluated
//! on those measurements, and only then are the waveform setpoint and the power stage duty cycle
//! derived, so the power stage never acts on a stale interlock decision.
use embedded_hal::pwm::SetDutyCycle;

use crate::filter::FilterKind;
use crate::hardware::{
    user_interface::UserButtons, AnalogChannel, AnalogReader, DigitalIo, Instant, Monotonic,
    PwmTimer, SafetySignals,
};
use crate::power_stage::{PowerStage, SecondaryMode};
use crate::safety::{Interlocks, SafetyMachine, SafetyState, SafetyStatus};
use crate::sensor::{NoMonitor, SensorChannel};
use crate::state::SharedState;
use crate::waveform::{Phase, Waveform};

/// The analog probe channels.
pub struct Sensors<M = NoMonitor> {
    pub voltage: SensorChannel<M>,
    pub current: SensorChannel<M>,
    pub temperature: SensorChannel,
}

impl Sensors<NoMonitor> {
    /// Construct the probe channels without monitor outputs.
    ///
    /// # Args
    /// * `filter` - The filter applied to the raw counts of every channel.
    pub fn new(filter: FilterKind) -> Self {
        Self {
            voltage: SensorChannel::new(AnalogChannel::Voltage, filter),
            current: SensorChannel::new(AnalogChannel::Current, filter),
            temperature: SensorChannel::new(AnalogChannel::Temperature, filter),
        }
    }
}

impl<M: SetDutyCycle> Sensors<M> {
    /// Construct the probe channels with analog monitor outputs for voltage and current.
    pub fn with_monitors(filter: FilterKind, voltage: M, current: M) -> Self {
        Self {
            voltage: SensorChannel::with_monitor(AnalogChannel::Voltage, filter, voltage),
            current: SensorChannel::with_monitor(AnalogChannel::Current, filter, current),
            temperature: SensorChannel::new(AnalogChannel::Temperature, filter),
        }
    }

    fn init<R: AnalogReader>(&mut self, reader: &mut R) {
        for channel in enum_iterator::all::<AnalogChannel>() {
            if let Err(error) = reader.configure(channel) {
                log::warn!("Failed to configure {:?} input: {:?}", channel, error);
            }
        }

        self.voltage.reset();
        self.current.reset();
        self.temperature.reset();
    }

    fn update<R: AnalogReader>(&mut self, reader: &mut R, state: &SharedState) {
        self.voltage.update(reader, state);
        self.current.update(reader, state);
        self.temperature.update(reader, state);
    }
}

/// The peripherals handed over by board bring-up.
pub struct Devices<R, IO: DigitalIo, T, C, M = NoMonitor> {
    pub reader: R,
    pub io: IO,
    pub clock: C,
    pub signals: SafetySignals<IO::Pin>,
    pub buttons: Option<UserButtons<IO::Pin>>,
    pub sensors: Sensors<M>,
    pub primary: T,
    pub secondary: Option<(T, SecondaryMode)>,
}

/// The outcome of one control tick.
#[derive(serde::Serialize, Debug, Copy, Clone)]
pub struct TickReport {
    pub safety: SafetyStatus,
    pub phase: Phase,
    pub duty: f32,
}

pub struct Controller<'a, R, IO: DigitalIo, T, C, M = NoMonitor> {
    state: &'a SharedState,
    reader: R,
    io: IO,
    clock: C,
    sensors: Sensors<M>,
    buttons: Option<UserButtons<IO::Pin>>,
    safety: SafetyMachine<IO::Pin>,
    waveform: Waveform,
    power_stage: PowerStage<T>,
    last_tick: Option<Instant>,
}

impl<'a, R, IO, T, C, M> Controller<'a, R, IO, T, C, M>
where
    R: AnalogReader,
    IO: DigitalIo,
    T: PwmTimer,
    C: Monotonic,
    M: SetDutyCycle,
{
    /// Take over the peripherals and bring them into a safe state.
    ///
    /// # Note
    /// The settings must already be loaded into the shared state. A PWM frequency that cannot be
    /// realized leaves the power stage disabled and is reported through the configuration error
    /// flag; the controller still runs its interlocks.
    ///
    /// # Args
    /// * `state` - The shared system state.
    /// * `devices` - The board peripherals.
    pub fn new(state: &'a SharedState, devices: Devices<R, IO, T, C, M>) -> Self {
        let Devices {
            mut reader,
            mut io,
            clock,
            signals,
            buttons,
            mut sensors,
            primary,
            secondary,
        } = devices;

        let mut safety = SafetyMachine::new(Interlocks::new(signals));
        safety.force_safe(&mut io);

        let mut power_stage = PowerStage::new(primary, secondary);
        let frequency = state.pwm_frequency_hz.get();
        match power_stage.configure(frequency) {
            Ok(timebase) => state.pwm_frequency.set(timebase.frequency()),
            Err(error) => {
                log::error!("PWM frequency {} Hz not realizable: {:?}", frequency, error);
                state.config_error.set(true);
            }
        }

        sensors.init(&mut reader);
        state.duty.set(0.0);

        log::info!("Controller started");

        Self {
            state,
            reader,
            io,
            clock,
            sensors,
            buttons,
            safety,
            waveform: Waveform::new(),
            power_stage,
            last_tick: None,
        }
    }

    /// Run one control tick.
    ///
    /// # Returns
    /// The interlock status, the waveform phase and the duty cycle of this tick.
    pub fn tick(&mut self) -> TickReport {
        let now = self.clock.now();
        let dt = self
            .last_tick
            .and_then(|last| now.checked_duration_since(last))
            .map(|elapsed| elapsed.to_micros() as f32 * 1e-6)
            .unwrap_or(0.0);
        self.last_tick = Some(now);

        self.sensors.update(&mut self.reader, self.state);

        if let Some(buttons) = self.buttons.as_mut() {
            buttons.update(&mut self.io, self.state);
        }

        let safety = self.safety.update(&mut self.io, self.state, now);
        let phase = self.waveform.update(self.state, dt);
        let duty = self.power_stage.update(self.state, &safety, now);

        TickReport {
            safety,
            phase,
            duty,
        }
    }

    pub fn state(&self) -> &'a SharedState {
        self.state
    }

    pub fn safety_state(&self) -> SafetyState {
        *self.safety.state()
    }

    pub fn phase(&self) -> Phase {
        self.waveform.phase()
    }

    pub fn power_stage(&self) -> &PowerStage<T> {
        &self.power_stage
    }

    pub fn io(&self) -> &IO {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut IO {
        &mut self.io
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }
}
