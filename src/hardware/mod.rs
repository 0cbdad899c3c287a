//! Hardware capabilities consumed by the controller
//!
//! # Description
//! Board bring-up owns the ADC, GPIO and timer peripherals. The controller only reaches them
//! through the traits defined here, so it always reasons in logical (active/inactive) terms and
//! can be driven by fakes on the host.
use embedded_hal::digital::PinState;
use enum_iterator::Sequence;
use pwm_timebase::{Counter, Timebase};
use serde::{Deserialize, Serialize};

pub mod platform;
pub mod user_interface;

/// Microsecond timestamps of the control clock.
pub type Instant = fugit::TimerInstantU64<1_000_000>;

/// Microsecond durations of the control clock.
pub type Duration = fugit::MicrosDurationU64;

/// Indicates an analog probe input.
#[derive(Sequence, Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalogChannel {
    Voltage = 0,
    Current = 1,
    Temperature = 2,
}

/// Raw sampling of the analog probe inputs.
pub trait AnalogReader {
    type Error: core::fmt::Debug;

    /// Configure the input of a channel. Called once per channel before sampling.
    fn configure(&mut self, channel: AnalogChannel) -> Result<(), Self::Error>;

    /// Take one raw sample.
    ///
    /// # Returns
    /// The raw ADC count of the channel.
    fn read(&mut self, channel: AnalogChannel) -> Result<u16, Self::Error>;
}

/// Electrical access to digital inputs and outputs.
pub trait DigitalIo {
    /// Identifies a pin on the board.
    type Pin: Copy + core::fmt::Debug;
    type Error: core::fmt::Debug;

    fn set_output(&mut self, pin: Self::Pin, level: PinState) -> Result<(), Self::Error>;

    fn read_input(&mut self, pin: Self::Pin) -> Result<PinState, Self::Error>;
}

/// A pin together with its polarity.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Signal<P> {
    pub pin: P,
    pub active_high: bool,
}

impl<P: Copy> Signal<P> {
    pub const fn active_high(pin: P) -> Self {
        Self {
            pin,
            active_high: true,
        }
    }

    pub const fn active_low(pin: P) -> Self {
        Self {
            pin,
            active_high: false,
        }
    }

    /// The electrical level representing a logical state.
    pub fn level(&self, active: bool) -> PinState {
        PinState::from(active == self.active_high)
    }

    /// The logical state represented by an electrical level.
    pub fn is_active(&self, level: PinState) -> bool {
        (level == PinState::High) == self.active_high
    }

    /// Drive the signal to a logical state.
    pub fn write<IO>(&self, io: &mut IO, active: bool) -> Result<(), IO::Error>
    where
        IO: DigitalIo<Pin = P>,
    {
        io.set_output(self.pin, self.level(active))
    }

    /// Read the logical state of the signal.
    pub fn read<IO>(&self, io: &mut IO) -> Result<bool, IO::Error>
    where
        IO: DigitalIo<Pin = P>,
    {
        Ok(self.is_active(io.read_input(self.pin)?))
    }
}

/// The interlock and actuator signals of the power stage.
#[derive(Copy, Clone, Debug)]
pub struct SafetySignals<P> {
    /// Gate driver fault feedback.
    pub gate_fault: Signal<P>,

    /// External enable input.
    pub external_enable: Signal<P>,

    /// Gate driver fault reset output.
    pub gate_reset: Signal<P>,

    pub charger_relay: Signal<P>,
    pub dump_relay: Signal<P>,
    pub dump_fan: Signal<P>,
    pub warn_lamp: Signal<P>,
    pub scr_trigger: Signal<P>,
    pub scr_inhibit: Signal<P>,
}

/// The role of a timer within a synchronized pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum SyncRole {
    /// The timer runs freely.
    Standalone,

    /// The timer emits a trigger on every update event.
    Master,

    /// The timer counter is reset by the master trigger.
    Slave,
}

/// Register-level access to a PWM timer channel.
pub trait PwmTimer {
    /// The timer input clock frequency.
    fn clock_hz(&self) -> u32;

    /// The register limits and counting mode of the timer.
    fn counter(&self) -> Counter {
        Counter::center_aligned_16bit()
    }

    /// Program the prescaler and period registers.
    fn apply(&mut self, timebase: &Timebase);

    /// Program the compare register of the output channel.
    fn set_compare(&mut self, compare: u32);

    /// Configure the trigger routing of the timer.
    fn set_sync(&mut self, role: SyncRole);
}

/// A free-running microsecond clock.
pub trait Monotonic {
    fn now(&mut self) -> Instant;
}
