//! Native runtime for the simulation worker.
//!
//! [`SimulationWorker`] runs a [`SimulationHost`] on its own thread, the way a
//! web worker runs it in the browser. The owning thread posts commands and
//! receives events over channels; module loads run on short-lived loader
//! threads and report back through a completion channel, so the worker keeps
//! answering commands while a load is outstanding.

mod loader;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use sim_host::{
    ComputeModule, EventSink, HostConfig, HostStats, LoadError, LoadRequest, RunState,
    SimulationHost,
};
use sim_protocol::{Command, Event};
use thiserror::Error;

pub use loader::{FnLoader, ModuleLoader, ReadyLoader};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker thread is gone")]
    Disconnected,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("worker thread panicked")]
    Panicked,
}

/// Snapshot of the worker's host, refreshed after every loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerStatus {
    pub state: RunState,
    pub stats: HostStats,
    pub pending_load: Option<u64>,
    pub deferred: usize,
}

impl WorkerStatus {
    fn of<M: ComputeModule, S: EventSink>(host: &SimulationHost<M, S>) -> Self {
        Self {
            state: host.state(),
            stats: host.stats(),
            pending_load: host.pending_load(),
            deferred: host.deferred_len(),
        }
    }
}

enum Input {
    Command(Command),
    Json(String),
    Shutdown,
}

struct LoadDone<M> {
    generation: u64,
    result: Result<M, LoadError>,
}

/// Forwards host events to the owning thread.
struct ChannelSink {
    tx: Sender<Event>,
}

impl EventSink for ChannelSink {
    fn emit(&mut self, event: Event) {
        if self.tx.send(event).is_err() {
            trace!("event dropped: receiver closed");
        }
    }
}

/// Handle to a simulation running on a background thread.
pub struct SimulationWorker {
    inbox: Sender<Input>,
    events: Receiver<Event>,
    status: Arc<Mutex<WorkerStatus>>,
    thread: Option<JoinHandle<()>>,
}

impl SimulationWorker {
    /// Starts the worker thread. The module is not loaded until the first `Make`.
    pub fn spawn<L: ModuleLoader>(loader: L, config: HostConfig) -> Result<Self, WorkerError> {
        let (inbox, inbox_rx) = unbounded();
        let (event_tx, events) = unbounded();
        let status = Arc::new(Mutex::new(WorkerStatus::default()));
        let shared = Arc::clone(&status);
        let thread = thread::Builder::new()
            .name("simulation-worker".into())
            .spawn(move || {
                let host = SimulationHost::new(config, ChannelSink { tx: event_tx });
                WorkerLoop {
                    host,
                    loader,
                    inbox: inbox_rx,
                    status: shared,
                    deadline: None,
                }
                .run();
            })?;
        Ok(Self {
            inbox,
            events,
            status,
            thread: Some(thread),
        })
    }

    pub fn post(&self, command: Command) -> Result<(), WorkerError> {
        self.send(Input::Command(command))
    }

    /// Posts a JSON-encoded command; decoding errors come back as events.
    pub fn post_json(&self, text: impl Into<String>) -> Result<(), WorkerError> {
        self.send(Input::Json(text.into()))
    }

    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    /// Waits up to `timeout` for the next event.
    pub fn next_event(&self, timeout: Duration) -> Option<Event> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn status(&self) -> WorkerStatus {
        *self.status.lock()
    }

    /// Stops the worker thread and waits for it to exit.
    pub fn shutdown(mut self) -> Result<(), WorkerError> {
        self.join()
    }

    fn send(&self, input: Input) -> Result<(), WorkerError> {
        self.inbox.send(input).map_err(|_| WorkerError::Disconnected)
    }

    fn join(&mut self) -> Result<(), WorkerError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        // The thread may already have exited on its own.
        let _ = self.inbox.send(Input::Shutdown);
        thread.join().map_err(|_| WorkerError::Panicked)
    }
}

impl Drop for SimulationWorker {
    fn drop(&mut self) {
        if let Err(err) = self.join() {
            warn!("simulation worker: {err}");
        }
    }
}

struct LoadDeadline {
    generation: u64,
    at: Instant,
    timeout: Duration,
}

struct WorkerLoop<L: ModuleLoader> {
    host: SimulationHost<L::Module, ChannelSink>,
    loader: L,
    inbox: Receiver<Input>,
    status: Arc<Mutex<WorkerStatus>>,
    deadline: Option<LoadDeadline>,
}

impl<L: ModuleLoader> WorkerLoop<L> {
    fn run(mut self) {
        let (done_tx, done_rx) = unbounded::<LoadDone<L::Module>>();
        info!("simulation worker started");
        loop {
            let keep_going = if self.host.is_stepping() {
                self.step_iteration(&done_rx)
            } else {
                self.idle_iteration(&done_rx)
            };
            if !keep_going {
                break;
            }
            self.check_deadline();
            if let Some(request) = self.host.take_load_request() {
                self.start_load(request, &done_tx);
            }
            *self.status.lock() = WorkerStatus::of(&self.host);
        }
        *self.status.lock() = WorkerStatus::of(&self.host);
        info!(
            "simulation worker stopped after {} ticks",
            self.host.stats().ticks
        );
    }

    /// Handles everything already queued, then advances the simulation once.
    fn step_iteration(&mut self, done_rx: &Receiver<LoadDone<L::Module>>) -> bool {
        loop {
            match self.inbox.try_recv() {
                Ok(input) => {
                    if !self.dispatch(input) {
                        return false;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
        while let Ok(done) = done_rx.try_recv() {
            self.host.complete_load(done.generation, done.result);
        }
        self.host.tick();
        thread::yield_now();
        true
    }

    /// Blocks until input arrives, a load finishes or the poll interval passes.
    fn idle_iteration(&mut self, done_rx: &Receiver<LoadDone<L::Module>>) -> bool {
        let mut wait = self.host.config().deferral_poll;
        if let Some(deadline) = &self.deadline {
            wait = wait.min(deadline.at.saturating_duration_since(Instant::now()));
        }
        let inbox = self.inbox.clone();
        select! {
            recv(inbox) -> input => match input {
                Ok(input) => self.dispatch(input),
                Err(_) => false,
            },
            recv(done_rx) -> done => {
                if let Ok(done) = done {
                    self.host.complete_load(done.generation, done.result);
                }
                true
            },
            default(wait) => true,
        }
    }

    fn dispatch(&mut self, input: Input) -> bool {
        let outcome = match input {
            Input::Command(command) => self.host.handle(command),
            Input::Json(text) => self.host.handle_json(&text),
            Input::Shutdown => return false,
        };
        if let Err(err) = outcome {
            self.host.report(err);
        }
        true
    }

    fn check_deadline(&mut self) {
        let Some(deadline) = self.deadline.take() else {
            return;
        };
        if self.host.pending_load() != Some(deadline.generation) {
            return;
        }
        if Instant::now() < deadline.at {
            self.deadline = Some(deadline);
            return;
        }
        warn!(
            "module load #{} timed out after {:?}",
            deadline.generation, deadline.timeout
        );
        self.host
            .complete_load(deadline.generation, Err(LoadError::TimedOut(deadline.timeout)));
    }

    fn start_load(&mut self, request: LoadRequest, done_tx: &Sender<LoadDone<L::Module>>) {
        let generation = request.generation;
        debug!("starting module load #{generation}");
        let future = self.loader.load();
        let done = done_tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("module-load-{generation}"))
            .spawn(move || {
                let result = futures::executor::block_on(future);
                // The worker may have shut down in the meantime.
                let _ = done.send(LoadDone { generation, result });
            });
        match spawned {
            Ok(_) => {
                self.deadline = self.host.config().load_timeout.map(|timeout| LoadDeadline {
                    generation,
                    at: Instant::now() + timeout,
                    timeout,
                });
            }
            Err(err) => {
                self.host
                    .complete_load(generation, Err(LoadError::Failed(err.to_string())));
            }
        }
    }
}

#[cfg(test)]
mod tests;
