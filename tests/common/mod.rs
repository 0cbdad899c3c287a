//! Fake board peripherals for exercising the controller on the host.
#![allow(dead_code)]

use embedded_hal::digital::PinState;
use pwm_timebase::Timebase;
use xc_controller::controller::{Controller, Devices, Sensors};
use xc_controller::filter::FilterKind;
use xc_controller::hardware::platform::{SafetyPins, ADC_MAX_COUNT, ADC_REFERENCE_VOLTAGE};
use xc_controller::hardware::user_interface::UserButtons;
use xc_controller::hardware::{
    AnalogChannel, AnalogReader, DigitalIo, Instant, Monotonic, PwmTimer, Signal, SyncRole,
};
use xc_controller::power_stage::SecondaryMode;
use xc_controller::SharedState;

pub const CLOCK_HZ: u32 = 200_000_000;

/// The control tick period used by the tests. Microseconds.
pub const TICK_US: u64 = 1_000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Pin {
    Fault,
    Enable,
    ResetButton,
    LampTestButton,
    Reset,
    Charger,
    Dump,
    Fan,
    Lamp,
    Trigger,
    Inhibit,
}

const PIN_COUNT: usize = 11;

pub struct FakeAdc {
    pub raw: [u16; 3],
    pub failing: bool,
    pub configured: [bool; 3],
}

impl FakeAdc {
    /// Raw counts producing zero on every bipolar probe.
    pub fn new() -> Self {
        Self {
            raw: [2048; 3],
            failing: false,
            configured: [false; 3],
        }
    }

    /// Set the raw count that reads as `value` through a bipolar probe calibration.
    pub fn set(&mut self, channel: AnalogChannel, value: f32, slope: f32) {
        let volts = value / slope + 1.65;
        let raw = volts / ADC_REFERENCE_VOLTAGE * ADC_MAX_COUNT as f32;
        self.raw[channel as usize] = raw.round().clamp(0.0, ADC_MAX_COUNT as f32) as u16;
    }

    pub fn set_voltage(&mut self, volts: f32) {
        self.set(AnalogChannel::Voltage, volts, 200.0);
    }

    pub fn set_current(&mut self, amps: f32) {
        self.set(AnalogChannel::Current, amps, 360.0 / 1.65);
    }
}

impl AnalogReader for FakeAdc {
    type Error = ();

    fn configure(&mut self, channel: AnalogChannel) -> Result<(), ()> {
        self.configured[channel as usize] = true;
        Ok(())
    }

    fn read(&mut self, channel: AnalogChannel) -> Result<u16, ()> {
        if self.failing {
            Err(())
        } else {
            Ok(self.raw[channel as usize])
        }
    }
}

pub struct FakeBoard {
    pub inputs: [PinState; PIN_COUNT],
    pub outputs: [Option<PinState>; PIN_COUNT],
}

impl FakeBoard {
    /// A board with the enable asserted, no gate fault and no buttons pressed.
    pub fn new() -> Self {
        let mut inputs = [PinState::Low; PIN_COUNT];
        inputs[Pin::Fault as usize] = PinState::High;
        inputs[Pin::Enable as usize] = PinState::High;
        Self {
            inputs,
            outputs: [None; PIN_COUNT],
        }
    }

    pub fn set_input(&mut self, pin: Pin, level: PinState) {
        self.inputs[pin as usize] = level;
    }

    pub fn output(&self, pin: Pin) -> Option<PinState> {
        self.outputs[pin as usize]
    }

    pub fn set_gate_fault(&mut self, fault: bool) {
        // The gate driver fault is active-low.
        self.set_input(Pin::Fault, PinState::from(!fault));
    }

    pub fn set_enable(&mut self, enable: bool) {
        self.set_input(Pin::Enable, PinState::from(enable));
    }
}

impl DigitalIo for FakeBoard {
    type Pin = Pin;
    type Error = ();

    fn set_output(&mut self, pin: Pin, level: PinState) -> Result<(), ()> {
        self.outputs[pin as usize] = Some(level);
        Ok(())
    }

    fn read_input(&mut self, pin: Pin) -> Result<PinState, ()> {
        Ok(self.inputs[pin as usize])
    }
}

#[derive(Debug)]
pub struct FakeTimer {
    pub timebase: Option<Timebase>,
    pub compare: u32,
    pub role: Option<SyncRole>,
    pub applied: usize,
}

impl FakeTimer {
    pub fn new() -> Self {
        Self {
            timebase: None,
            compare: 0,
            role: None,
            applied: 0,
        }
    }
}

impl PwmTimer for FakeTimer {
    fn clock_hz(&self) -> u32 {
        CLOCK_HZ
    }

    fn apply(&mut self, timebase: &Timebase) {
        self.timebase = Some(*timebase);
        self.applied += 1;
    }

    fn set_compare(&mut self, compare: u32) {
        self.compare = compare;
    }

    fn set_sync(&mut self, role: SyncRole) {
        self.role = Some(role);
    }
}

pub struct ManualClock {
    pub now_us: u64,
}

impl ManualClock {
    pub fn advance(&mut self, us: u64) {
        self.now_us += us;
    }
}

impl Monotonic for ManualClock {
    fn now(&mut self) -> Instant {
        // Every sample advances by one tick so the controller sees a steady cadence.
        let now = Instant::from_ticks(self.now_us);
        self.now_us += TICK_US;
        now
    }
}

pub type TestController<'a> = Controller<'a, FakeAdc, FakeBoard, FakeTimer, ManualClock>;

pub fn pins() -> SafetyPins<Pin> {
    SafetyPins {
        gate_fault: Pin::Fault,
        external_enable: Pin::Enable,
        gate_reset: Pin::Reset,
        charger_relay: Pin::Charger,
        dump_relay: Pin::Dump,
        dump_fan: Pin::Fan,
        warn_lamp: Pin::Lamp,
        scr_trigger: Pin::Trigger,
        scr_inhibit: Pin::Inhibit,
    }
}

/// Build a controller on fake peripherals.
///
/// # Args
/// * `state` - The shared state. The settings must already be applied.
/// * `secondary` - The follower mode of an optional second timer.
pub fn controller(state: &SharedState, secondary: Option<SecondaryMode>) -> TestController<'_> {
    let buttons = UserButtons::new(
        Signal::active_high(Pin::ResetButton),
        Signal::active_high(Pin::LampTestButton),
    );

    Controller::new(
        state,
        Devices {
            reader: FakeAdc::new(),
            io: FakeBoard::new(),
            clock: ManualClock { now_us: 0 },
            signals: pins().into_signals(),
            buttons: Some(buttons),
            sensors: Sensors::new(FilterKind::Bypass),
            primary: FakeTimer::new(),
            secondary: secondary.map(|mode| (FakeTimer::new(), mode)),
        },
    )
}
