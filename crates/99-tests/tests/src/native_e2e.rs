#![cfg(all(test, not(target_arch = "wasm32")))]

use futures::future::{self, FutureExt};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use runtime_native::{FnLoader, ReadyLoader, SimulationWorker, WorkerStatus};
use sim_host::{HostCapabilities, HostConfig, LoadError, RunState};
use sim_protocol::{Command, Configuration, EncodingMode, ErrorKind, Event};
use solver_reference::ReferenceModule;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(10);
const QUIET: Duration = Duration::from_millis(150);
const DT: f64 = 0.03;

fn native_config() -> HostConfig {
    HostConfig::default()
        .with_capabilities(HostCapabilities::native())
        .with_deferral_poll(Duration::from_millis(10))
}

fn spawn(module: ReferenceModule) -> SimulationWorker {
    let _ = env_logger::builder().is_test(true).try_init();
    SimulationWorker::spawn(ReadyLoader::new(module), native_config()).expect("spawn worker")
}

fn make(n: usize, encoding: EncodingMode) -> Command {
    Command::Make {
        configuration: Configuration::with_vortons(n),
        encoding,
    }
}

fn next(worker: &SimulationWorker) -> Event {
    worker.next_event(WAIT).expect("event within timeout")
}

/// Skips events until a snapshot taken after at least one step.
fn next_step(worker: &SimulationWorker) -> (u64, f64) {
    loop {
        if let Event::Simulation {
            iteration, time, ..
        } = next(worker)
        {
            if iteration > 0 {
                return (iteration, time);
            }
        }
    }
}

fn drain(worker: &SimulationWorker) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = worker.next_event(QUIET) {
        events.push(event);
    }
    events
}

fn wait_until(worker: &SimulationWorker, what: &str, done: impl Fn(&WorkerStatus) -> bool) {
    let deadline = Instant::now() + WAIT;
    while !done(&worker.status()) {
        assert!(Instant::now() < deadline, "worker never reached {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

fn wait_for_state(worker: &SimulationWorker, state: RunState) {
    wait_until(worker, state.as_str(), |status| status.state == state);
}

#[test]
fn scenario_a_make_reports_initial_snapshot() {
    let worker = spawn(ReferenceModule::new());
    worker.post(make(100, EncodingMode::Transferable)).unwrap();

    match next(&worker) {
        Event::Initialized { iteration, time } => {
            assert_eq!(iteration, 0);
            assert_eq!(time, 0.0);
        }
        other => panic!("expected initialized, got {other:?}"),
    }
    match next(&worker) {
        Event::Simulation { payload, .. } => {
            assert_eq!(payload.encoding(), EncodingMode::Transferable);
            assert!(payload.byte_len() > 0);
            let solution = payload.decode().expect("decode");
            assert!(!solution.is_empty());
            assert_eq!(solution.iteration, 0);
        }
        other => panic!("expected simulation, got {other:?}"),
    }
    assert!(drain(&worker).is_empty());
    assert_eq!(worker.status().state, RunState::Ready);
}

#[test]
fn scenario_b_ticks_advance_by_dt_until_stopped() {
    let worker = spawn(ReferenceModule::new());
    worker.post(make(64, EncodingMode::Json)).unwrap();
    wait_for_state(&worker, RunState::Ready);
    worker.post(Command::Start { dt: DT }).unwrap();

    let ticks: Vec<(u64, f64)> = (0..3).map(|_| next_step(&worker)).collect();
    worker.post(Command::Stop).unwrap();

    assert_eq!(
        ticks.iter().map(|(iteration, _)| *iteration).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    for (iteration, time) in &ticks {
        assert!((time - *iteration as f64 * DT).abs() < 1e-9, "t={time} at {iteration}");
    }

    wait_for_state(&worker, RunState::Ready);
    let _in_flight = drain(&worker);
    // Nothing steps after the stop was handled.
    assert!(worker.next_event(QUIET).is_none());
}

#[test]
fn scenario_c_start_before_load_waits_for_initialized() {
    let loader = ReadyLoader::new(ReferenceModule::new()).with_delay(Duration::from_millis(100));
    let worker = SimulationWorker::spawn(loader, native_config()).expect("spawn worker");

    worker.post(make(32, EncodingMode::Json)).unwrap();
    worker.post(Command::Start { dt: DT }).unwrap();
    wait_until(&worker, "a deferred start", |status| {
        status.state == RunState::Loading && status.deferred == 1
    });

    assert!(matches!(next(&worker), Event::Initialized { iteration: 0, .. }));
    assert!(matches!(next(&worker), Event::Simulation { iteration: 0, .. }));
    assert_eq!(next_step(&worker).0, 1);
    worker.post(Command::Stop).unwrap();
}

#[test]
fn scenario_d_get_without_make_is_a_precondition_error() {
    let worker = spawn(ReferenceModule::new());
    worker.post(Command::Get).unwrap();

    match next(&worker) {
        Event::Error { kind, message } => {
            assert_eq!(kind, ErrorKind::Precondition);
            assert_eq!(message, "simulation does not exist yet");
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert!(drain(&worker).is_empty());
    assert_eq!(worker.status().state, RunState::Uninitialized);
}

#[test]
fn deferred_commands_keep_arrival_order() {
    let loader = ReadyLoader::new(ReferenceModule::new()).with_delay(Duration::from_millis(80));
    let worker = SimulationWorker::spawn(loader, native_config()).expect("spawn worker");

    worker.post(make(16, EncodingMode::Json)).unwrap();
    worker.post(Command::Get).unwrap();
    worker
        .post(Command::Update {
            configuration: Configuration::with_vortons(24),
        })
        .unwrap();
    worker.post(Command::Get).unwrap();

    let mut names = Vec::new();
    while names.len() < 6 {
        names.push(next(&worker).name());
    }
    assert_eq!(
        names,
        vec![
            "initialized",
            "simulation",
            // get
            "simulation",
            // update
            "initialized",
            "simulation",
            // get
            "simulation",
        ]
    );
    assert!(drain(&worker).is_empty());
}

#[test]
fn update_while_stepping_applies_on_next_tick() {
    let worker = spawn(ReferenceModule::new());
    worker.post(make(32, EncodingMode::Json)).unwrap();
    worker.post(Command::Start { dt: DT }).unwrap();
    let (first, _) = next_step(&worker);
    assert!(first >= 1);

    worker
        .post(Command::Update {
            configuration: Configuration::with_vortons(48),
        })
        .unwrap();
    // Snapshots from the old instance may still be in flight.
    loop {
        if let Event::Initialized { iteration, .. } = next(&worker) {
            assert_eq!(iteration, 0);
            break;
        }
    }
    match next(&worker) {
        Event::Simulation {
            iteration, time, ..
        } => {
            assert_eq!(iteration, 1);
            assert!((time - DT).abs() < 1e-12);
        }
        other => panic!("expected the first tick of the new instance, got {other:?}"),
    }
    assert_eq!(worker.status().state, RunState::Stepping);
    worker.post(Command::Stop).unwrap();
    wait_for_state(&worker, RunState::Ready);
}

#[test]
fn stop_without_a_run_is_reported_each_time() {
    let worker = spawn(ReferenceModule::new());
    worker.post(make(16, EncodingMode::Json)).unwrap();
    worker.post(Command::Stop).unwrap();
    let errors: Vec<_> = drain(&worker)
        .into_iter()
        .filter_map(|event| event.error_kind())
        .collect();
    assert_eq!(errors, vec![ErrorKind::Precondition]);

    worker.post(Command::Start { dt: DT }).unwrap();
    next_step(&worker);
    worker.post(Command::Stop).unwrap();
    worker.post(Command::Stop).unwrap();
    let errors: Vec<_> = drain(&worker)
        .into_iter()
        .filter_map(|event| event.error_kind())
        .collect();
    assert_eq!(errors, vec![ErrorKind::Precondition]);
    assert_eq!(worker.status().state, RunState::Ready);
}

#[test]
fn at_most_one_instance_is_alive() {
    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(Mutex::new(0usize));
    let done = Arc::new(AtomicBool::new(false));
    let sampler = {
        let (live, peak, done) = (Arc::clone(&live), Arc::clone(&peak), Arc::clone(&done));
        thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                let now = live.load(Ordering::SeqCst);
                let mut peak = peak.lock();
                *peak = (*peak).max(now);
            }
        })
    };

    let worker = spawn(ReferenceModule::with_instance_counter(Arc::clone(&live)));
    for round in 0..4 {
        worker.post(make(24 + round, EncodingMode::Json)).unwrap();
        worker.post(Command::Start { dt: DT }).unwrap();
        next_step(&worker);
        worker
            .post(Command::Update {
                configuration: Configuration::with_vortons(40),
            })
            .unwrap();
        worker.post(Command::Get).unwrap();
    }
    worker.post(Command::Stop).unwrap();
    wait_for_state(&worker, RunState::Ready);
    drain(&worker);
    worker.shutdown().expect("shutdown");

    done.store(true, Ordering::SeqCst);
    sampler.join().unwrap();
    assert_eq!(*peak.lock(), 1);
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[test]
fn shared_encoding_depends_on_capability() {
    let worker = SimulationWorker::spawn(
        ReadyLoader::new(ReferenceModule::new()),
        HostConfig::default().with_deferral_poll(Duration::from_millis(10)),
    )
    .expect("spawn worker");
    worker.post(make(16, EncodingMode::SharedTransferable)).unwrap();
    assert_eq!(next(&worker).error_kind(), Some(ErrorKind::UnsupportedEncoding));
    assert_eq!(worker.status().state, RunState::Uninitialized);

    let worker = spawn(ReferenceModule::new());
    worker.post(make(16, EncodingMode::SharedTransferable)).unwrap();
    assert!(matches!(next(&worker), Event::Initialized { .. }));
    match next(&worker) {
        Event::Simulation { payload, .. } => {
            let solution = payload.decode().expect("frame still current");
            assert!(!solution.is_empty());
        }
        other => panic!("expected simulation, got {other:?}"),
    }
}

#[test]
fn json_commands_drive_the_worker() {
    let worker = spawn(ReferenceModule::new());
    let text = make(16, EncodingMode::Json).to_json().expect("encode");
    worker.post_json(text).unwrap();
    assert!(matches!(next(&worker), Event::Initialized { .. }));
    assert!(matches!(next(&worker), Event::Simulation { .. }));

    worker.post_json(r#"{"make": {"configuration": {}, "colour": 1}}"#).unwrap();
    assert_eq!(next(&worker).error_kind(), Some(ErrorKind::UnsupportedCommand));
    assert_eq!(worker.status().state, RunState::Ready);
}

#[test]
fn make_after_failed_load_retries() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let loader = FnLoader::new(move || {
        let result = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(LoadError::Failed("network error".into()))
        } else {
            Ok(ReferenceModule::new())
        };
        future::ready(result).boxed()
    });
    let worker = SimulationWorker::spawn(loader, native_config()).expect("spawn worker");

    worker.post(make(16, EncodingMode::Json)).unwrap();
    assert_eq!(next(&worker).error_kind(), Some(ErrorKind::LoadFailed));
    wait_for_state(&worker, RunState::Uninitialized);

    worker.post(make(16, EncodingMode::Json)).unwrap();
    assert!(matches!(next(&worker), Event::Initialized { .. }));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(worker.status().stats.loads_requested, 2);
}
