//! Current regulator

use crate::hardware::Instant;

/// Regulator gains.
#[derive(Copy, Clone, Debug, PartialEq, serde::Serialize)]
pub struct Gains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

/// A PID regulator whose time step is measured, not assumed.
#[derive(Debug, Default)]
pub struct Pid {
    integral: f32,
    last_error: f32,
    last_sample: Option<Instant>,
}

impl Pid {
    pub const fn new() -> Self {
        Self {
            integral: 0.0,
            last_error: 0.0,
            last_sample: None,
        }
    }

    /// The integral accumulator.
    pub fn integral(&self) -> f32 {
        self.integral
    }

    /// Discard the accumulated state.
    ///
    /// # Note
    /// The next update after a reset has no time step to work with and contributes neither
    /// integral nor derivative.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = 0.0;
        self.last_sample = None;
    }

    /// Run the control law for one sample.
    ///
    /// # Args
    /// * `gains` - The regulator gains.
    /// * `setpoint` - The requested value.
    /// * `measured` - The measured value.
    /// * `now` - The time of the sample.
    ///
    /// # Returns
    /// The regulator output.
    pub fn update(&mut self, gains: &Gains, setpoint: f32, measured: f32, now: Instant) -> f32 {
        let error = setpoint - measured;

        let dt = self
            .last_sample
            .and_then(|last| now.checked_duration_since(last))
            .map(|elapsed| elapsed.to_micros() as f32 * 1e-6)
            .filter(|dt| *dt > 0.0);

        let derivative = match dt {
            Some(dt) => {
                self.integral += error * dt;
                (error - self.last_error) / dt
            }
            None => 0.0,
        };

        self.last_error = error;
        self.last_sample = Some(now);

        gains.kp * error + gains.ki * self.integral + gains.kd * derivative
    }
}
