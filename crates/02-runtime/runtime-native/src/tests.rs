use std::time::Duration;

use futures::future::{self, FutureExt};
use pretty_assertions::assert_eq;
use sim_host::{HostCapabilities, HostConfig, LoadError, RunState};
use sim_protocol::{Command, Configuration, EncodingMode, ErrorKind, Event};
use solver_reference::ReferenceModule;

use super::*;

const WAIT: Duration = Duration::from_secs(5);

fn config() -> HostConfig {
    HostConfig::default()
        .with_capabilities(HostCapabilities::native())
        .with_deferral_poll(Duration::from_millis(10))
}

fn make(n: usize) -> Command {
    Command::Make {
        configuration: Configuration::with_vortons(n),
        encoding: EncodingMode::Json,
    }
}

fn next(worker: &SimulationWorker) -> Event {
    worker.next_event(WAIT).expect("event within timeout")
}

fn wait_for_state(worker: &SimulationWorker, state: RunState) {
    let deadline = Instant::now() + WAIT;
    while worker.status().state != state {
        assert!(Instant::now() < deadline, "worker never reached {state}");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn make_start_stop_round_trip() {
    let _ = env_logger::builder().is_test(true).try_init();
    let worker = SimulationWorker::spawn(ReadyLoader::new(ReferenceModule::new()), config())
        .expect("spawn");

    worker.post(make(64)).unwrap();
    assert!(matches!(next(&worker), Event::Initialized { iteration: 0, .. }));
    assert!(matches!(next(&worker), Event::Simulation { iteration: 0, .. }));
    wait_for_state(&worker, RunState::Ready);

    worker.post(Command::Start { dt: 0.03 }).unwrap();
    let mut last = 0;
    for _ in 0..3 {
        match next(&worker) {
            Event::Simulation { iteration, .. } => {
                assert!(iteration > last);
                last = iteration;
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    worker.post(Command::Stop).unwrap();
    wait_for_state(&worker, RunState::Ready);
    let status = worker.status();
    assert_eq!(status.stats.instances_created, 1);
    assert_eq!(status.stats.loads_requested, 1);
    worker.shutdown().expect("shutdown");
}

#[test]
fn commands_wait_for_a_slow_load() {
    let loader = ReadyLoader::new(ReferenceModule::new()).with_delay(Duration::from_millis(150));
    let worker = SimulationWorker::spawn(loader, config()).expect("spawn");

    worker.post(make(32)).unwrap();
    worker.post(Command::Get).unwrap();
    wait_for_state(&worker, RunState::Loading);

    assert!(matches!(next(&worker), Event::Initialized { .. }));
    assert!(matches!(next(&worker), Event::Simulation { iteration: 0, .. }));
    // The deferred get.
    assert!(matches!(next(&worker), Event::Simulation { iteration: 0, .. }));
    wait_for_state(&worker, RunState::Ready);
    assert_eq!(worker.status().stats.deferred, 1);
}

#[test]
fn load_failure_is_reported() {
    let loader = FnLoader::new(|| {
        future::ready(Err::<ReferenceModule, _>(LoadError::Failed("404".into()))).boxed()
    });
    let worker = SimulationWorker::spawn(loader, config()).expect("spawn");

    worker.post(make(16)).unwrap();
    match next(&worker) {
        Event::Error { kind, message } => {
            assert_eq!(kind, ErrorKind::LoadFailed);
            assert!(message.contains("404"), "{message}");
        }
        other => panic!("unexpected {other:?}"),
    }
    wait_for_state(&worker, RunState::Uninitialized);
}

#[test]
fn slow_load_times_out() {
    let loader = ReadyLoader::new(ReferenceModule::new()).with_delay(Duration::from_millis(500));
    let worker = SimulationWorker::spawn(
        loader,
        config().with_load_timeout(Duration::from_millis(50)),
    )
    .expect("spawn");

    worker.post(make(16)).unwrap();
    worker.post(Command::Start { dt: 0.03 }).unwrap();
    assert_eq!(
        next(&worker).error_kind(),
        Some(ErrorKind::LoadFailed),
        "timeout surfaces as a load failure"
    );
    // The deferred start has no instance to run.
    assert_eq!(next(&worker).error_kind(), Some(ErrorKind::Precondition));
    wait_for_state(&worker, RunState::Uninitialized);
    // The late completion is ignored.
    assert!(worker.next_event(Duration::from_millis(600)).is_none());
    assert_eq!(worker.status().state, RunState::Uninitialized);
}

#[test]
fn malformed_json_comes_back_as_an_event() {
    let worker = SimulationWorker::spawn(ReadyLoader::new(ReferenceModule::new()), config())
        .expect("spawn");
    worker.post_json("{\"type\": \"warp\"}").unwrap();
    assert_eq!(
        next(&worker).error_kind(),
        Some(ErrorKind::UnsupportedCommand)
    );
}

#[test]
fn drop_joins_the_worker_thread() {
    let worker = SimulationWorker::spawn(ReadyLoader::new(ReferenceModule::new()), config())
        .expect("spawn");
    worker.post(make(16)).unwrap();
    worker.post(Command::Start { dt: 0.03 }).unwrap();
    let _ = next(&worker);
    drop(worker);
}
