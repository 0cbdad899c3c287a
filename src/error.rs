//! Error type definitions for the charger controller

/// An enumeration of possible errors with the controller.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize)]
pub enum Error {
    /// A value or configuration was rejected.
    Invalid,

    /// A value fell outside of its permitted range.
    Bounds,

    /// The requested PWM timing cannot be realized by the timer.
    Infeasible,
}

impl From<pwm_timebase::Error> for Error {
    fn from(error: pwm_timebase::Error) -> Self {
        match error {
            pwm_timebase::Error::InvalidFrequency => Error::Invalid,
            pwm_timebase::Error::FrequencyTooHigh | pwm_timebase::Error::FrequencyTooLow => {
                Error::Infeasible
            }
        }
    }
}
