//! Front panel buttons

use debouncr::{Debouncer, Edge, Repeat4};

use super::{DigitalIo, Signal};
use crate::state::SharedState;

/// Represents an event indicated through the front panel buttons.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ButtonEvent {
    /// The fault reset button was pressed.
    FaultReset,

    /// The lamp test button was pressed.
    LampTestStart,

    /// The lamp test button was released.
    LampTestEnd,
}

/// Represents the fault reset and lamp test buttons on the front panel.
pub struct UserButtons<P> {
    reset: Signal<P>,
    lamp_test: Signal<P>,
    reset_state: Debouncer<u8, Repeat4>,
    lamp_test_state: Debouncer<u8, Repeat4>,
}

impl<P: Copy> UserButtons<P> {
    /// Construct the user buttons.
    ///
    /// # Args
    /// * `reset` - The gate fault reset button.
    /// * `lamp_test` - The warning lamp test button.
    pub fn new(reset: Signal<P>, lamp_test: Signal<P>) -> Self {
        UserButtons {
            reset,
            lamp_test,
            reset_state: debouncr::debounce_4(false),
            lamp_test_state: debouncr::debounce_4(false),
        }
    }

    /// Sample the buttons and forward any debounced press into the shared state.
    ///
    /// # Note
    /// An unreadable button is treated as released.
    ///
    /// # Returns
    /// An option containing any event that is indicated by the button update.
    pub fn update<IO>(&mut self, io: &mut IO, state: &SharedState) -> Option<ButtonEvent>
    where
        IO: DigitalIo<Pin = P>,
    {
        // Prioritize the fault reset.
        let reset_pressed = self.reset.read(io).unwrap_or(false);
        let lamp_test_pressed = self.lamp_test.read(io).unwrap_or(false);

        let reset_edge = self.reset_state.update(reset_pressed);
        let lamp_test_edge = self.lamp_test_state.update(lamp_test_pressed);

        if let Some(Edge::Rising) = reset_edge {
            log::info!("Fault reset requested from front panel");
            state.reset_request.set(true);
            return Some(ButtonEvent::FaultReset);
        }

        match lamp_test_edge {
            Some(Edge::Rising) => {
                state.lamp_test.set(true);
                Some(ButtonEvent::LampTestStart)
            }
            Some(Edge::Falling) => {
                state.lamp_test.set(false);
                Some(ButtonEvent::LampTestEnd)
            }
            None => None,
        }
    }
}
