//! Carrier board constants

use super::{SafetySignals, Signal};

/// The largest count of the 12-bit probe ADC.
pub const ADC_MAX_COUNT: u16 = 4095;

/// The ADC reference voltage.
pub const ADC_REFERENCE_VOLTAGE: f32 = 3.3;

/// Convert a (possibly filtered) ADC count into the input voltage.
pub fn adc_to_voltage(count: f32) -> f32 {
    count / ADC_MAX_COUNT as f32 * ADC_REFERENCE_VOLTAGE
}

/// The pins of the carrier board interlock and actuator signals.
#[derive(Copy, Clone, Debug)]
pub struct SafetyPins<P> {
    pub gate_fault: P,
    pub external_enable: P,
    pub gate_reset: P,
    pub charger_relay: P,
    pub dump_relay: P,
    pub dump_fan: P,
    pub warn_lamp: P,
    pub scr_trigger: P,
    pub scr_inhibit: P,
}

impl<P: Copy> SafetyPins<P> {
    /// Attach the carrier board polarities to the pins.
    ///
    /// # Note
    /// The gate driver fault and the two relay drivers are active-low. Everything else is
    /// active-high.
    pub fn into_signals(self) -> SafetySignals<P> {
        SafetySignals {
            gate_fault: Signal::active_low(self.gate_fault),
            external_enable: Signal::active_high(self.external_enable),
            gate_reset: Signal::active_high(self.gate_reset),
            charger_relay: Signal::active_low(self.charger_relay),
            dump_relay: Signal::active_low(self.dump_relay),
            dump_fan: Signal::active_high(self.dump_fan),
            warn_lamp: Signal::active_high(self.warn_lamp),
            scr_trigger: Signal::active_high(self.scr_trigger),
            scr_inhibit: Signal::active_high(self.scr_inhibit),
        }
    }
}
