//! Control core of a pulsed high-voltage capacitor-bank charger
//!
//! # Description
//! The controller regulates the charging current of an IGBT power stage, supervises the gate
//! driver and enable interlocks, sequences cubic current waveforms and reports its state to a
//! host through compact telemetry words. Board bring-up provides the peripherals through the
//! traits in [hardware] and calls [controller::Controller::tick] periodically.
#![cfg_attr(not(test), no_std)]

pub mod command;
pub mod controller;
pub mod error;
pub mod filter;
pub mod hardware;
pub mod linear_transformation;
pub mod logger;
pub mod pid;
pub mod power_stage;
pub mod safety;
pub mod sensor;
pub mod settings;
pub mod state;
pub mod telemetry;
pub mod waveform;

pub use command::{CommandHandler, ProtocolError};
pub use controller::{Controller, Devices, Sensors, TickReport};
pub use error::Error;
pub use settings::Settings;
pub use state::SharedState;
