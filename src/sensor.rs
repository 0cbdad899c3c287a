//! Analog probe channels
//!
//! # Description
//! A [SensorChannel] samples one analog probe per control tick, filters the raw counts, converts
//! them into a physical value and publishes it into the [SharedState]. The voltage and current
//! channels may additionally drive an analog monitor output proportional to the measurement.
use embedded_hal::pwm::{ErrorType, SetDutyCycle};

use crate::filter::{Filter, FilterKind};
use crate::hardware::{platform, AnalogChannel, AnalogReader};
use crate::state::SharedState;

/// A placeholder for channels without an analog monitor output.
pub struct NoMonitor;

impl ErrorType for NoMonitor {
    type Error = core::convert::Infallible;
}

impl SetDutyCycle for NoMonitor {
    fn max_duty_cycle(&self) -> u16 {
        u16::MAX
    }

    fn set_duty_cycle(&mut self, _duty: u16) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// One analog probe input.
pub struct SensorChannel<M = NoMonitor> {
    channel: AnalogChannel,
    filter: Filter,
    monitor: Option<M>,
    read_failed: bool,
}

impl SensorChannel<NoMonitor> {
    /// Construct a channel without a monitor output.
    ///
    /// # Args
    /// * `channel` - The probe input to sample.
    /// * `filter` - The filter applied to the raw counts.
    pub fn new(channel: AnalogChannel, filter: FilterKind) -> Self {
        Self {
            channel,
            filter: Filter::new(filter),
            monitor: None,
            read_failed: false,
        }
    }
}

impl<M: SetDutyCycle> SensorChannel<M> {
    /// Construct a channel that drives an analog monitor output.
    ///
    /// # Args
    /// * `channel` - The probe input to sample.
    /// * `filter` - The filter applied to the raw counts.
    /// * `monitor` - The PWM output proportional to the measurement.
    pub fn with_monitor(channel: AnalogChannel, filter: FilterKind, monitor: M) -> Self {
        Self {
            channel,
            filter: Filter::new(filter),
            monitor: Some(monitor),
            read_failed: false,
        }
    }

    pub fn channel(&self) -> AnalogChannel {
        self.channel
    }

    /// Discard any filter history.
    pub fn reset(&mut self) {
        self.filter.reset();
    }

    /// Sample the probe and publish the measurement.
    ///
    /// # Note
    /// A failed read is treated as a raw count of zero so that the control loop never stalls on a
    /// sensor.
    ///
    /// # Returns
    /// The calibrated measurement.
    pub fn update<R: AnalogReader>(&mut self, reader: &mut R, state: &SharedState) -> f32 {
        let raw = match reader.read(self.channel) {
            Ok(raw) => {
                if self.read_failed {
                    log::info!("{:?} input recovered", self.channel);
                    self.read_failed = false;
                }
                raw
            }
            Err(error) => {
                if !self.read_failed {
                    log::warn!("Failed to read {:?} input: {:?}", self.channel, error);
                    self.read_failed = true;
                }
                0
            }
        };

        if let FilterKind::Ema(_) = self.filter.kind() {
            self.filter.configure(FilterKind::Ema(state.filter_alpha.get()));
        }

        let filtered = self.filter.process(raw as f32);
        let volts = platform::adc_to_voltage(filtered);

        match self.channel {
            AnalogChannel::Voltage => {
                let value = state
                    .voltage_calibration
                    .get()
                    .map(volts - state.probe_midpoint.get());
                state.probe_voltage.set(value);

                let monitor = normalize(value, state.voltage_monitor_full_scale.get());
                state.meas_voltage_pwm.set(monitor);
                self.drive_monitor(monitor);
                value
            }

            AnalogChannel::Current => {
                let value = state
                    .current_calibration
                    .get()
                    .map(volts - state.probe_midpoint.get());
                state.probe_current.set(value);

                let monitor = normalize(value, state.current_monitor_full_scale.get());
                state.meas_current_pwm.set(monitor);
                self.drive_monitor(monitor);

                // A single test decides both SCR lines so they always remain complementary.
                let fire = value > state.scr_fire_threshold.get() || state.scr_fire_request.get();
                state.scr_trigger.set(fire);
                state.scr_inhibit.set(!fire);
                value
            }

            AnalogChannel::Temperature => {
                let value = state.temperature_calibration.get().evaluate(volts);
                state.internal_temperature.set(value);
                value
            }
        }
    }

    fn drive_monitor(&mut self, fraction: f32) {
        if let Some(monitor) = self.monitor.as_mut() {
            let duty = fraction * monitor.max_duty_cycle() as f32 + 0.5;
            monitor.set_duty_cycle(duty as u16).ok();
        }
    }
}

/// Scale a measurement into [0, 1] relative to a full-scale value.
fn normalize(value: f32, full_scale: f32) -> f32 {
    if full_scale <= 0.0 {
        return 0.0;
    }

    // NaN falls through both bounds and is reported as zero.
    let fraction = value / full_scale;
    if fraction >= 1.0 {
        1.0
    } else if fraction > 0.0 {
        fraction
    } else {
        0.0
    }
}
