#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use canopy::{
    Call, ComponentAddress, ControlAddress, Delegate, DriverKind, Hub, HubConfig, ManualClock, RootBehavior,
    RootContext, Time, Value,
};
use canopy::error::RootError;

/// Start of the manual clock in tests.
pub const START: Time = 1_000_000_000;

pub fn control(address: &str) -> ControlAddress {
    address.parse::<ControlAddress>().unwrap()
}

pub fn component(address: &str) -> ComponentAddress {
    address.parse::<ComponentAddress>().unwrap()
}

/// Hub on a manual clock whose roots only run when a delegate drives them.
pub fn manual_hub() -> (Arc<Hub>, Arc<ManualClock>) {
    canopy::logging::init_test();
    let clock = Arc::new(ManualClock::new(START));
    let config = HubConfig {
        scheduler_threads: 1,
        default_driver: DriverKind::Manual,
        ..HubConfig::default()
    };
    let hub = Hub::builder(config).clock(clock.clone()).build().unwrap();
    (hub, clock)
}

/// Hub on the system clock with scheduled roots.
pub fn scheduled_hub() -> Arc<Hub> {
    canopy::logging::init_test();
    let config = HubConfig {
        scheduler_threads: 2,
        tick: Duration::from_millis(2),
        ..HubConfig::default()
    };
    Hub::new(config).unwrap()
}

/// Everything a [`Recorder`] observed.
#[derive(Default)]
pub struct Log {
    pub calls: Mutex<Vec<Call>>,
    pub update_times: Mutex<Vec<Time>>,
    pub terminated: Mutex<bool>,
}

impl Log {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn controls(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|call| call.to().control_id().to_string())
            .collect()
    }

    pub fn updates(&self) -> usize {
        self.update_times.lock().unwrap().len()
    }

    pub fn last_time(&self) -> Option<Time> {
        self.update_times.lock().unwrap().last().copied()
    }
}

/// Records every call; answers `echo` with its arguments and fails `boom`.
pub struct Recorder {
    pub log: Arc<Log>,
}

impl Recorder {
    pub fn new() -> (Box<dyn RootBehavior>, Arc<Log>) {
        let log = Arc::new(Log::default());
        (Box::new(Recorder { log: log.clone() }), log)
    }
}

impl RootBehavior for Recorder {
    fn process_call(&mut self, ctx: &mut RootContext<'_>, call: Call) -> Result<(), RootError> {
        self.log.calls.lock().unwrap().push(call.clone());
        match call.to().control_id() {
            "echo" if call.is_request() => ctx.reply(&call, call.args().to_vec()),
            "boom" => return Err(RootError::ProcessingFailed("boom".to_string())),
            _ => {}
        }
        Ok(())
    }

    fn update(&mut self, ctx: &mut RootContext<'_>) {
        self.log.update_times.lock().unwrap().push(ctx.time());
    }

    fn terminate(&mut self, _ctx: &mut RootContext<'_>) {
        *self.log.terminated.lock().unwrap() = true;
    }
}

/// Drives `delegate` with hub time until `done` holds or `timeout` elapses.
pub fn pump_until(hub: &Hub, delegate: &Delegate, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        delegate.update(hub.now());
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// The error kind carried by an error answer.
pub fn error_kind(call: &Call) -> Option<String> {
    call.args().first().and_then(Value::error_kind).map(str::to_string)
}
