//! Closed-loop behaviour of the controller on fake peripherals.
mod common;

use common::{controller, Pin};
use embedded_hal::digital::PinState;
use xc_controller::power_stage::SecondaryMode;
use xc_controller::safety::SafetyState;
use xc_controller::waveform::Phase;
use xc_controller::{CommandHandler, Settings, SharedState};

fn state() -> SharedState {
    let state = SharedState::new();
    state.apply_settings(&Settings::default());
    state.debounce_delay_us.set(0);
    state.internal_enable.set(true);
    state
}

/// Configure a state that produces a clearly nonzero duty cycle.
fn regulating(state: &SharedState) {
    state.duty_scale.set(0.01);
    state.set_current.set(50.0);
}

#[test]
fn startup_is_safe() {
    let state = state();
    let c = controller(&state, None);

    let board = c.io();
    assert_eq!(board.output(Pin::Charger), Some(PinState::High));
    assert_eq!(board.output(Pin::Dump), Some(PinState::High));
    assert_eq!(board.output(Pin::Reset), Some(PinState::Low));
    assert_eq!(board.output(Pin::Trigger), Some(PinState::Low));
    assert_eq!(board.output(Pin::Inhibit), Some(PinState::High));

    let timebase = c.power_stage().timebase().unwrap();
    assert_eq!((timebase.prescaler, timebase.period), (0, 4999));
    assert_eq!(c.reader().configured, [true; 3]);
    assert_eq!(c.power_stage().primary().compare, 0);
    assert!((state.pwm_frequency.get() - 20_000.0).abs() < 1.0);
    assert!(!state.config_error.get());
}

#[test]
fn output_enable_is_and_of_enables() {
    let state = state();
    let mut c = controller(&state, None);

    for external in [false, true] {
        for internal in [false, true] {
            c.io_mut().set_enable(external);
            state.internal_enable.set(internal);

            let report = c.tick();
            assert_eq!(report.safety.output_enabled, external && internal);
            assert_eq!(state.output_enabled.get(), external && internal);
            assert_eq!(state.external_enable.get(), external);
        }
    }
}

#[test]
fn interlocks_zero_the_duty() {
    let state = state();
    regulating(&state);
    let mut c = controller(&state, None);
    c.reader_mut().set_voltage(20.0);

    assert!(c.tick().duty > 0.1);
    assert!(c.power_stage().primary().compare > 0);

    // Gate fault.
    c.io_mut().set_gate_fault(true);
    assert_eq!(c.tick().duty, 0.0);
    assert_eq!(state.duty.get(), 0.0);
    assert_eq!(c.power_stage().primary().compare, 0);

    // The lockout persists through the reset pulse.
    c.io_mut().set_gate_fault(false);
    state.reset_request.set(true);
    let report = c.tick();
    assert!(report.safety.fault_lockout);
    assert_eq!(report.duty, 0.0);
    assert!(c.tick().duty > 0.1);

    // Loss of enable.
    state.internal_enable.set(false);
    assert_eq!(c.tick().duty, 0.0);
    state.internal_enable.set(true);
    assert!(c.tick().duty > 0.1);

    // Over-voltage.
    state.charger_relay.set(true);
    c.reader_mut().set_voltage(100.5);
    let report = c.tick();
    assert!(report.safety.over_voltage);
    assert_eq!(report.duty, 0.0);
    assert!(!state.charger_relay.get());
    assert_eq!(c.io().output(Pin::Charger), Some(PinState::High));
}

#[test]
fn relays_drop_on_every_trip() {
    fn close_relays(c: &mut common::TestController<'_>, state: &SharedState) {
        state.charger_relay.set(true);
        state.dump_relay.set(true);
        c.tick();
        assert_eq!(c.io().output(Pin::Charger), Some(PinState::Low));
        assert_eq!(c.io().output(Pin::Dump), Some(PinState::Low));
    }

    fn assert_released(c: &common::TestController<'_>, state: &SharedState) {
        assert!(!state.charger_relay.get());
        assert!(!state.dump_relay.get());
        assert_eq!(c.io().output(Pin::Charger), Some(PinState::High));
        assert_eq!(c.io().output(Pin::Dump), Some(PinState::High));
    }

    let state = state();
    let mut c = controller(&state, None);

    // Gate fault.
    close_relays(&mut c, &state);
    c.io_mut().set_gate_fault(true);
    assert_eq!(c.tick().duty, 0.0);
    assert_released(&c, &state);
    c.io_mut().set_gate_fault(false);
    state.reset_request.set(true);
    c.tick();
    c.tick();
    assert!(!state.fault_lockout.get());

    // Over-voltage.
    close_relays(&mut c, &state);
    c.reader_mut().set_voltage(150.0);
    assert!(c.tick().safety.over_voltage);
    assert_released(&c, &state);
    c.reader_mut().set_voltage(0.0);

    // Loss of the external enable.
    close_relays(&mut c, &state);
    c.io_mut().set_enable(false);
    assert!(!c.tick().safety.output_enabled);
    assert_released(&c, &state);
    c.io_mut().set_enable(true);

    // Loss of the internal enable.
    close_relays(&mut c, &state);
    state.internal_enable.set(false);
    assert!(!c.tick().safety.output_enabled);
    assert_released(&c, &state);
}

#[test]
fn scr_lines_are_complementary() {
    let state = state();
    state.scr_fire_threshold.set(100.0);
    let mut c = controller(&state, None);

    for current in [0.0, 50.0, 150.0, -50.0, 99.0] {
        for request in [false, true] {
            c.reader_mut().set_current(current);
            state.scr_fire_request.set(request);
            c.tick();

            assert_ne!(state.scr_trigger.get(), state.scr_inhibit.get());
            assert_ne!(c.io().output(Pin::Trigger), c.io().output(Pin::Inhibit));
            assert_eq!(state.scr_trigger.get(), request || current > 100.0);
        }
    }
}

#[test]
fn waveform_aborts_on_loss_of_enable() {
    let state = state();
    state.ramp_t1.set(0.01);
    let mut c = controller(&state, None);

    state.run_request.set(true);
    for _ in 0..6 {
        assert_eq!(c.tick().phase, Phase::RampUp);
    }
    assert!(state.set_current.get() > 1.0);
    assert!(state.waveform_running.get());

    c.io_mut().set_enable(false);
    let report = c.tick();
    assert_eq!(report.phase, Phase::Idle);
    assert_eq!(c.phase(), Phase::Idle);
    assert_eq!(state.set_current.get(), 0.0);
    assert_eq!(report.duty, 0.0);
    assert!(!state.waveform_running.get());
}

#[test]
fn integral_does_not_wind_up_while_disabled() {
    let state = state();
    regulating(&state);
    state.internal_enable.set(false);
    let mut c = controller(&state, None);

    for _ in 0..100 {
        assert_eq!(c.tick().duty, 0.0);
        assert_eq!(c.power_stage().pid().integral(), 0.0);
    }

    // Integration resumes with the first measured time step after enabling.
    state.internal_enable.set(true);
    c.tick();
    assert_eq!(c.power_stage().pid().integral(), 0.0);
    c.tick();
    assert!(c.power_stage().pid().integral() > 0.0);
}

#[test]
fn infeasible_pwm_frequency_is_rejected() {
    let state = SharedState::new();
    let handler = CommandHandler::new(&state, Settings::default());
    let mut c = controller(&state, None);
    let mut handler = handler.with_timer(c.power_stage().primary());
    let initial = *c.power_stage().timebase().unwrap();

    assert_eq!(handler.process(br#"{"name":"pwm_freq","value":0.01}"#), 0);
    assert_eq!(*handler.settings().pwm_frequency_hz, 20_000.0);
    assert_eq!(state.pwm_frequency_hz.get(), 20_000.0);
    assert!(state.config_error.get());

    c.tick();
    assert!(state.config_error.get());
    assert_eq!(c.power_stage().timebase(), Some(&initial));
    assert_eq!(c.power_stage().primary().applied, 1);

    // A later accepted setting leaves the stored frequency consistent with the timer.
    assert_eq!(handler.process(br#"{"name":"pid_kp","value":0.5}"#), 1);
    c.tick();
    assert!(!state.config_error.get());
    assert_eq!(*handler.settings().pwm_frequency_hz, 20_000.0);
    assert!((state.pwm_frequency.get() - 20_000.0).abs() < 1.0);

    assert_eq!(handler.process(br#"{"name":"pwm_freq","value":10000}"#), 1);
    c.tick();
    assert!(!state.config_error.get());
    let timebase = c.power_stage().timebase().unwrap();
    assert_eq!((timebase.prescaler, timebase.period), (0, 9999));
    assert!((state.pwm_frequency.get() - 10_000.0).abs() < 1.0);
}

#[test]
fn infeasible_pwm_frequency_keeps_timebase() {
    let state = state();
    let mut c = controller(&state, None);
    let initial = *c.power_stage().timebase().unwrap();

    // Written past the command handler, the power stage refuses the frequency.
    state.pwm_frequency_hz.set(0.01);
    c.tick();
    c.tick();
    assert!(state.config_error.get());
    assert_eq!(c.power_stage().timebase(), Some(&initial));
    assert_eq!(c.power_stage().primary().timebase, Some(initial));
    assert_eq!(c.power_stage().primary().applied, 1);
    assert!((state.pwm_frequency.get() - 20_000.0).abs() < 1.0);
}

#[test]
fn timers_are_synchronized() {
    let state = state();
    regulating(&state);
    state.dead_time_ns.set(1000);
    let mut c = controller(&state, Some(SecondaryMode::Complementary));
    c.reader_mut().set_voltage(20.0);

    let stage = c.power_stage();
    let secondary = stage.secondary().unwrap();
    assert_eq!(stage.primary().role, Some(xc_controller::hardware::SyncRole::Master));
    assert_eq!(secondary.role, Some(xc_controller::hardware::SyncRole::Slave));
    assert_eq!(stage.primary().timebase, secondary.timebase);

    let duty = c.tick().duty;
    assert!(duty > 0.1);

    // The complementary pulse fills the cycle less the dead time of 2% at 20 kHz.
    let primary = c.power_stage().primary().compare as i64;
    let secondary = c.power_stage().secondary().unwrap().compare as i64;
    assert!((primary + secondary + 100 - 5000).abs() <= 2);

    // Both switches are off while inhibited.
    state.internal_enable.set(false);
    c.tick();
    assert_eq!(c.power_stage().primary().compare, 0);
    assert_eq!(c.power_stage().secondary().unwrap().compare, 0);
}

#[test]
fn mirrored_timer_follows_primary() {
    let state = state();
    regulating(&state);
    let mut c = controller(&state, Some(SecondaryMode::Mirrored));
    c.reader_mut().set_voltage(20.0);

    assert!(c.tick().duty > 0.1);
    let stage = c.power_stage();
    assert_eq!(stage.primary().compare, stage.secondary().unwrap().compare);
}

#[test]
fn front_panel_reset_clears_lockout() {
    let state = state();
    let mut c = controller(&state, None);

    c.io_mut().set_gate_fault(true);
    c.tick();
    assert!(matches!(c.safety_state(), SafetyState::FaultLatched));

    c.io_mut().set_gate_fault(false);
    c.io_mut().set_input(Pin::ResetButton, PinState::High);
    for _ in 0..3 {
        c.tick();
        assert!(matches!(c.safety_state(), SafetyState::FaultLatched));
    }

    // The fourth stable sample registers the press and starts the pulse.
    c.tick();
    assert!(matches!(c.safety_state(), SafetyState::Resetting));
    assert_eq!(c.io().output(Pin::Reset), Some(PinState::High));

    c.tick();
    assert!(matches!(c.safety_state(), SafetyState::Normal));
    assert_eq!(c.io().output(Pin::Reset), Some(PinState::Low));
    assert!(!state.fault_lockout.get());
}

#[test]
fn lamp_test_button_drives_lamp() {
    let state = state();
    let mut c = controller(&state, None);

    c.io_mut().set_input(Pin::LampTestButton, PinState::High);
    for _ in 0..4 {
        c.tick();
    }
    assert!(state.lamp_test.get());
    assert_eq!(c.io().output(Pin::Lamp), Some(PinState::High));

    c.io_mut().set_input(Pin::LampTestButton, PinState::Low);
    for _ in 0..4 {
        c.tick();
    }
    assert!(!state.lamp_test.get());
    assert_eq!(c.io().output(Pin::Lamp), Some(PinState::Low));
}

#[test]
fn failed_sensor_reads_keep_ticking() {
    let state = state();
    let mut c = controller(&state, None);
    c.reader_mut().failing = true;

    // A raw count of zero sits far below the probe midpoint.
    c.tick();
    assert!(state.probe_voltage.get() < -300.0);
    assert_eq!(state.duty.get(), 0.0);

    c.reader_mut().failing = false;
    c.tick();
    assert!(state.probe_voltage.get().abs() < 1.0);
}

#[test]
fn setpoint_is_limited_on_use() {
    fn duty(set_current: f32) -> f32 {
        let state = state();
        regulating(&state);
        state.current_limit_max.set(100.0);
        state.set_current.set(set_current);
        let mut c = controller(&state, None);
        c.reader_mut().set_voltage(20.0);
        c.tick();
        c.tick().duty
    }

    assert!(duty(100.0) > 0.0);
    assert_eq!(duty(300.0), duty(100.0));
}
