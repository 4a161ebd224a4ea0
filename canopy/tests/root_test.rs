mod common;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use canopy::error::{HubError, RootError};
use canopy::kinds;
use canopy::{Call, CallType, Clock, Driver, RootBehavior, RootContext, RootState, Value};

use common::{Recorder, START, control, error_kind, manual_hub, scheduled_hub};

#[test]
fn test_calls_processed_in_arrival_order() {
    let (hub, clock) = manual_hub();
    let (behavior, log) = Recorder::new();
    let root = hub.install_root("worker", behavior, Driver::Manual).unwrap();
    let delegate = root.attach_delegate().unwrap();

    for name in ["first", "second", "third"] {
        let call = Call::invoke_quiet(control(&format!("/worker!{name}")), control("/test!out"), START, vec![]);
        assert!(root.submit_packet(call));
    }
    assert!(delegate.update(clock.now()));

    assert_eq!(log.controls(), vec!["first", "second", "third"]);
    drop(delegate);
    hub.shutdown(Duration::from_secs(1)).unwrap();
}

#[test]
fn test_future_call_held_until_time_reached() {
    let (hub, clock) = manual_hub();
    let (behavior, log) = Recorder::new();
    let root = hub.install_root("worker", behavior, Driver::Manual).unwrap();
    let delegate = root.attach_delegate().unwrap();

    let due = START + 50_000_000;
    let later = Call::invoke_quiet(control("/worker!later"), control("/test!out"), due, vec![]);
    let now = Call::invoke_quiet(control("/worker!now"), control("/test!out"), START, vec![]);
    root.submit_packet(later);
    root.submit_packet(now);

    delegate.update(clock.now());
    assert_eq!(log.controls(), vec!["now"]);

    clock.advance(Duration::from_millis(60));
    delegate.update(clock.now());
    assert_eq!(log.controls(), vec!["now", "later"]);
    drop(delegate);
    hub.shutdown(Duration::from_secs(1)).unwrap();
}

#[test]
fn test_local_time_never_decreases() {
    let (hub, clock) = manual_hub();
    let (behavior, log) = Recorder::new();
    let root = hub.install_root("worker", behavior, Driver::Manual).unwrap();
    let delegate = root.attach_delegate().unwrap();

    delegate.update(clock.now());
    let first = log.last_time().unwrap();
    assert_eq!(first, START);

    delegate.update(START - 10_000_000);
    assert_eq!(log.last_time(), Some(first + 1));
    drop(delegate);
    hub.shutdown(Duration::from_secs(1)).unwrap();
}

#[test]
fn test_delegate_time_clamped_to_drift() {
    let (hub, clock) = manual_hub();
    let (behavior, log) = Recorder::new();
    let root = hub.install_root("worker", behavior, Driver::Manual).unwrap();
    let delegate = root.attach_delegate().unwrap();

    delegate.update(clock.now() + 10_000_000_000);
    let drift = hub.config().max_clock_drift.as_nanos() as i64;
    assert_eq!(log.last_time(), Some(START + drift));
    drop(delegate);
    hub.shutdown(Duration::from_secs(1)).unwrap();
}

#[test]
fn test_termination_drains_queued_requests() {
    let (hub, clock) = manual_hub();
    let (target_behavior, target_log) = Recorder::new();
    let target = hub.install_root("target", target_behavior, Driver::Manual).unwrap();
    let (caller_behavior, caller_log) = Recorder::new();
    let caller = hub.install_root("caller", caller_behavior, Driver::Manual).unwrap();
    let delegate = caller.attach_delegate().unwrap();

    hub.dispatch(Call::invoke(control("/target!echo"), control("/caller!back"), START, vec![]));
    target.shutdown();
    assert!(target.await_termination(Duration::from_secs(1)));
    assert_eq!(target.state(), RootState::Terminated);
    assert!(*target_log.terminated.lock().unwrap());
    assert!(target_log.calls().is_empty());
    assert!(hub.controller("target").is_none());

    delegate.update(clock.now());
    let answers = caller_log.calls();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].kind(), CallType::Error);
    assert_eq!(error_kind(&answers[0]).as_deref(), Some(kinds::TERMINATED));
    drop(delegate);
    hub.shutdown(Duration::from_secs(1)).unwrap();
}

#[test]
fn test_processing_failure_answers_with_error() {
    let (hub, clock) = manual_hub();
    let (target_behavior, _) = Recorder::new();
    let target = hub.install_root("target", target_behavior, Driver::Manual).unwrap();
    let (caller_behavior, caller_log) = Recorder::new();
    let caller = hub.install_root("caller", caller_behavior, Driver::Manual).unwrap();
    let target_delegate = target.attach_delegate().unwrap();
    let caller_delegate = caller.attach_delegate().unwrap();

    hub.dispatch(Call::invoke(control("/target!boom"), control("/caller!back"), START, vec![]));
    target_delegate.update(clock.now());
    caller_delegate.update(clock.now());

    let answers = caller_log.calls();
    assert_eq!(answers.len(), 1);
    assert_eq!(error_kind(&answers[0]).as_deref(), Some(kinds::PROCESSING_FAILED));
    assert_eq!(target.state(), RootState::ActiveIdle);
    drop(target_delegate);
    drop(caller_delegate);
    hub.shutdown(Duration::from_secs(1)).unwrap();
}

struct FailingActivation;

impl RootBehavior for FailingActivation {
    fn activate(&mut self, _ctx: &mut RootContext<'_>) -> Result<(), RootError> {
        Err(RootError::ActivationFailed("no device".to_string()))
    }

    fn process_call(&mut self, _ctx: &mut RootContext<'_>, _call: Call) -> Result<(), RootError> {
        Ok(())
    }
}

#[test]
fn test_activation_failure_terminates_root() {
    let (hub, _) = manual_hub();
    let result = hub.install_root("broken", Box::new(FailingActivation), Driver::Manual);
    assert!(matches!(result, Err(HubError::Root(RootError::ActivationFailed(_)))));
    assert!(hub.controller("broken").is_none());
    hub.shutdown(Duration::from_secs(1)).unwrap();
}

#[test]
fn test_duplicate_root_rejected() {
    let (hub, _) = manual_hub();
    let (first, _) = Recorder::new();
    let (second, _) = Recorder::new();
    hub.install_root("twin", first, Driver::Manual).unwrap();
    let result = hub.install_root("twin", second, Driver::Manual);
    assert!(matches!(result, Err(HubError::DuplicateRoot(id)) if id == "twin"));
    hub.shutdown(Duration::from_secs(1)).unwrap();
}

struct Ticking {
    ticks: Arc<Mutex<Vec<i64>>>,
}

impl RootBehavior for Ticking {
    fn activate(&mut self, ctx: &mut RootContext<'_>) -> Result<(), RootError> {
        let ticks = self.ticks.clone();
        ctx.add_clock_listener(move |now| ticks.lock().unwrap().push(now));
        Ok(())
    }

    fn process_call(&mut self, _ctx: &mut RootContext<'_>, _call: Call) -> Result<(), RootError> {
        Ok(())
    }
}

#[test]
fn test_clock_listeners_only_notified_while_running() {
    let (hub, clock) = manual_hub();
    let ticks = Arc::new(Mutex::new(Vec::new()));
    let root = hub
        .install_root("synth", Box::new(Ticking { ticks: ticks.clone() }), Driver::Manual)
        .unwrap();
    let delegate = root.attach_delegate().unwrap();

    delegate.update(clock.now());
    assert!(ticks.lock().unwrap().is_empty());

    root.set_running();
    delegate.update(clock.advance(Duration::from_millis(1)));
    assert_eq!(root.state(), RootState::ActiveRunning);
    assert_eq!(*ticks.lock().unwrap(), vec![START + 1_000_000]);

    root.set_idle();
    delegate.update(clock.advance(Duration::from_millis(1)));
    assert_eq!(ticks.lock().unwrap().len(), 1);
    drop(delegate);
    hub.shutdown(Duration::from_secs(1)).unwrap();
}

#[test]
fn test_stalled_delegate_hands_back_to_scheduler() {
    canopy::logging::init_test();
    let clock = Arc::new(canopy::ManualClock::new(START));
    let config = canopy::HubConfig {
        scheduler_threads: 1,
        tick: Duration::from_millis(2),
        delegate_grace: Duration::from_millis(200),
        ..canopy::HubConfig::default()
    };
    let hub = canopy::Hub::builder(config).clock(clock.clone()).build().unwrap();
    let (behavior, log) = Recorder::new();
    let root = hub.install_root("audio", behavior, hub.default_driver()).unwrap();

    let delegate = root.attach_delegate().unwrap();
    delegate.update(clock.now());
    let driven = log.updates();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(log.updates(), driven);

    clock.advance(Duration::from_millis(300));
    let mut forced = false;
    for _ in 0..200 {
        if log.updates() > driven {
            forced = true;
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    assert!(forced, "scheduler never forced a cycle of the stalled root");
    drop(delegate);
    hub.shutdown(Duration::from_secs(2)).unwrap();
}

#[test]
fn test_scheduled_roots_exchange_calls() {
    let hub = scheduled_hub();
    let (echo, _) = Recorder::new();
    hub.install_root("echo", echo, hub.default_driver()).unwrap();
    let (caller_behavior, caller_log) = Recorder::new();
    let caller = hub.install_root("caller", caller_behavior, Driver::Manual).unwrap();
    let delegate = caller.attach_delegate().unwrap();

    let call = Call::invoke(control("/echo!echo"), control("/caller!back"), hub.now(), vec![Value::Int(7)]);
    let id = call.id();
    hub.dispatch(call);
    assert!(common::pump_until(&hub, &delegate, Duration::from_secs(2), || !caller_log.calls().is_empty()));

    let reply = &caller_log.calls()[0];
    assert_eq!(reply.kind(), CallType::Return);
    assert_eq!(reply.match_id(), id);
    assert_eq!(reply.args(), &[Value::Int(7)]);
    drop(delegate);
    hub.shutdown(Duration::from_secs(2)).unwrap();
}
