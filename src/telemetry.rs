//! Telemetry encoding for the host channel
//!
//! # Description
//! The host channel is narrow, so the reported state is packed into two 64-bit polling words that
//! are sent on alternating polls. Bit 63 of each word identifies the packet.
//!
//! Numeric fields are 19-bit two's complement fixed point with a resolution of 0.01. Values beyond
//! the representable range saturate.
//!
//! | Packet | Bits   | Field                  |
//! |--------|--------|------------------------|
//! | 0      | 0..19  | probe voltage          |
//! | 0      | 19..38 | probe current          |
//! | 0      | 38..47 | interlock/status flags |
//! | 1      | 0..19  | voltage setpoint       |
//! | 1      | 19..38 | current setpoint       |
//! | 1      | 38..57 | internal temperature   |
//! | 1      | 57..62 | actuator/status flags  |
use bit_field::BitField;
use heapless::String;

use crate::error::Error;
use crate::state::SharedState;

/// The width of a fixed-point field.
pub const FIELD_BITS: usize = 19;

/// The largest encodable fixed-point count.
pub const FIELD_MAX: i32 = (1 << (FIELD_BITS - 1)) - 1;

/// The smallest encodable fixed-point count.
pub const FIELD_MIN: i32 = -(1 << (FIELD_BITS - 1));

/// Fixed-point counts per unit.
const SCALE: f32 = 100.0;

const PACKET_ID_BIT: usize = 63;

const FIELD_0: core::ops::Range<usize> = 0..19;
const FIELD_1: core::ops::Range<usize> = 19..38;
const FIELD_2: core::ops::Range<usize> = 38..57;

/// Encode a value into a fixed-point field, saturating at the field limits.
pub fn encode_fixed(value: f32) -> u64 {
    let scaled = libm::roundf(value * SCALE);

    // NaN fails both comparisons and encodes as zero.
    let count = if scaled >= FIELD_MAX as f32 {
        FIELD_MAX
    } else if scaled <= FIELD_MIN as f32 {
        FIELD_MIN
    } else {
        scaled as i32
    };

    (count as u32 as u64) & ((1 << FIELD_BITS) - 1)
}

/// Decode a fixed-point field.
pub fn decode_fixed(field: u64) -> f32 {
    // Sign-extend from the field width.
    let shift = 32 - FIELD_BITS;
    let count = ((field as u32) << shift) as i32 >> shift;
    count as f32 / SCALE
}

/// The measurement packet.
#[derive(serde::Serialize, Debug, Copy, Clone, PartialEq)]
pub struct Measurements {
    pub probe_voltage: f32,
    pub probe_current: f32,
    pub external_enable: bool,
    pub internal_enable: bool,
    pub output_enabled: bool,
    pub gate_fault: bool,
    pub fault_lockout: bool,
    pub over_voltage: bool,
    pub waveform_running: bool,
    pub scr_trigger: bool,
    pub warn_lamp: bool,
}

/// The setpoint packet.
#[derive(serde::Serialize, Debug, Copy, Clone, PartialEq)]
pub struct Setpoints {
    pub set_voltage: f32,
    pub set_current: f32,
    pub internal_temperature: f32,
    pub charger_relay: bool,
    pub dump_relay: bool,
    pub dump_fan: bool,
    pub scr_inhibit: bool,
    pub config_error: bool,
}

/// A decoded polling word.
#[derive(serde::Serialize, Debug, Copy, Clone, PartialEq)]
pub enum Frame {
    Measurements(Measurements),
    Setpoints(Setpoints),
}

impl Measurements {
    pub fn capture(state: &SharedState) -> Self {
        Self {
            probe_voltage: state.probe_voltage.get(),
            probe_current: state.probe_current.get(),
            external_enable: state.external_enable.get(),
            internal_enable: state.internal_enable.get(),
            output_enabled: state.output_enabled.get(),
            gate_fault: state.gate_fault.get(),
            fault_lockout: state.fault_lockout.get(),
            over_voltage: state.over_voltage.get(),
            waveform_running: state.waveform_running.get(),
            scr_trigger: state.scr_trigger.get(),
            warn_lamp: state.warn_lamp.get(),
        }
    }

    pub fn encode(&self) -> u64 {
        let mut word = 0u64;
        word.set_bits(FIELD_0, encode_fixed(self.probe_voltage));
        word.set_bits(FIELD_1, encode_fixed(self.probe_current));
        word.set_bit(38, self.external_enable)
            .set_bit(39, self.internal_enable)
            .set_bit(40, self.output_enabled)
            .set_bit(41, self.gate_fault)
            .set_bit(42, self.fault_lockout)
            .set_bit(43, self.over_voltage)
            .set_bit(44, self.waveform_running)
            .set_bit(45, self.scr_trigger)
            .set_bit(46, self.warn_lamp)
            .set_bit(PACKET_ID_BIT, false);
        word
    }

    fn decode(word: u64) -> Self {
        Self {
            probe_voltage: decode_fixed(word.get_bits(FIELD_0)),
            probe_current: decode_fixed(word.get_bits(FIELD_1)),
            external_enable: word.get_bit(38),
            internal_enable: word.get_bit(39),
            output_enabled: word.get_bit(40),
            gate_fault: word.get_bit(41),
            fault_lockout: word.get_bit(42),
            over_voltage: word.get_bit(43),
            waveform_running: word.get_bit(44),
            scr_trigger: word.get_bit(45),
            warn_lamp: word.get_bit(46),
        }
    }
}

impl Setpoints {
    pub fn capture(state: &SharedState) -> Self {
        Self {
            set_voltage: state.set_voltage.get(),
            set_current: state.set_current.get(),
            internal_temperature: state.internal_temperature.get(),
            charger_relay: state.charger_relay.get(),
            dump_relay: state.dump_relay.get(),
            dump_fan: state.dump_fan.get(),
            scr_inhibit: state.scr_inhibit.get(),
            config_error: state.config_error.get(),
        }
    }

    pub fn encode(&self) -> u64 {
        let mut word = 0u64;
        word.set_bits(FIELD_0, encode_fixed(self.set_voltage));
        word.set_bits(FIELD_1, encode_fixed(self.set_current));
        word.set_bits(FIELD_2, encode_fixed(self.internal_temperature));
        word.set_bit(57, self.charger_relay)
            .set_bit(58, self.dump_relay)
            .set_bit(59, self.dump_fan)
            .set_bit(60, self.scr_inhibit)
            .set_bit(61, self.config_error)
            .set_bit(PACKET_ID_BIT, true);
        word
    }

    fn decode(word: u64) -> Self {
        Self {
            set_voltage: decode_fixed(word.get_bits(FIELD_0)),
            set_current: decode_fixed(word.get_bits(FIELD_1)),
            internal_temperature: decode_fixed(word.get_bits(FIELD_2)),
            charger_relay: word.get_bit(57),
            dump_relay: word.get_bit(58),
            dump_fan: word.get_bit(59),
            scr_inhibit: word.get_bit(60),
            config_error: word.get_bit(61),
        }
    }
}

/// Unpack a polling word on the host side.
pub fn decode(word: u64) -> Frame {
    if word.get_bit(PACKET_ID_BIT) {
        Frame::Setpoints(Setpoints::decode(word))
    } else {
        Frame::Measurements(Measurements::decode(word))
    }
}

/// Alternates between the two packets on successive polls.
#[derive(Debug, Default)]
pub struct TelemetryPoller {
    setpoints_next: bool,
}

impl TelemetryPoller {
    pub const fn new() -> Self {
        Self {
            setpoints_next: false,
        }
    }

    /// Produce the next polling word.
    pub fn poll(&mut self, state: &SharedState) -> u64 {
        let word = if self.setpoints_next {
            Setpoints::capture(state).encode()
        } else {
            Measurements::capture(state).encode()
        };

        self.setpoints_next = !self.setpoints_next;
        word
    }
}

/// Serialize the full status as JSON for channels that are not bandwidth limited.
pub fn status_json(state: &SharedState) -> Result<String<1024>, Error> {
    serde_json_core::to_string(&state.snapshot()).map_err(|_| Error::Bounds)
}
