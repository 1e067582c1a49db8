//! The simulation host state machine.
//!
//! [`SimulationHost`] owns at most one solver instance and processes commands
//! and ticks on a single sequential timeline. It never blocks: module loading
//! is requested through [`SimulationHost::take_load_request`] and finished by
//! the runtime calling [`SimulationHost::complete_load`]. Commands that arrive
//! in between are deferred in arrival order.

use log::{debug, info, trace, warn};
use sim_protocol::{Command, Configuration, EncodingMode, Event, SharedSolutionReader};

use crate::config::HostConfig;
use crate::encoder::SolutionEncoder;
use crate::error::{HostError, HostResult};
use crate::module::{ComputeModule, LoadError, SolverInstance};
use crate::queue::PendingQueue;
use crate::sink::EventSink;
use crate::state::RunState;

/// What [`SimulationHost::handle`] did with an accepted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Applied,
    /// Queued until the module load completes.
    Deferred,
    /// A `Stop` that removed a deferred `Start`.
    Cancelled,
}

/// A module load the runtime must perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadRequest {
    pub generation: u64,
}

/// Counters kept by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostStats {
    pub commands: u64,
    pub deferred: u64,
    pub cancelled: u64,
    pub ticks: u64,
    pub errors: u64,
    pub instances_created: u64,
    pub loads_requested: u64,
}

struct Active<I> {
    instance: I,
    encoder: SolutionEncoder,
    configuration: Configuration,
}

struct Run {
    dt: f64,
    started_ms: f64,
    ticks: u64,
}

struct AwaitingLoad {
    configuration: Configuration,
    encoder: SolutionEncoder,
}

pub struct SimulationHost<M: ComputeModule, S: EventSink> {
    config: HostConfig,
    sink: S,
    state: RunState,
    module: Option<M>,
    active: Option<Active<M::Instance>>,
    awaiting: Option<AwaitingLoad>,
    pending: PendingQueue,
    generation: u64,
    in_flight: Option<u64>,
    requested: Option<LoadRequest>,
    staged: Option<Configuration>,
    run: Option<Run>,
    stats: HostStats,
}

impl<M: ComputeModule, S: EventSink> SimulationHost<M, S> {
    /// Creates a host that loads its module on the first `Make`.
    pub fn new(config: HostConfig, sink: S) -> Self {
        Self {
            config,
            sink,
            state: RunState::Uninitialized,
            module: None,
            active: None,
            awaiting: None,
            pending: PendingQueue::default(),
            generation: 0,
            in_flight: None,
            requested: None,
            staged: None,
            run: None,
            stats: HostStats::default(),
        }
    }

    /// Creates a host whose module is already loaded; `Make` completes synchronously.
    pub fn with_module(config: HostConfig, sink: S, module: M) -> Self {
        let mut host = Self::new(config, sink);
        host.module = Some(module);
        host
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_stepping(&self) -> bool {
        self.state == RunState::Stepping
    }

    pub fn stats(&self) -> HostStats {
        self.stats
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn module_loaded(&self) -> bool {
        self.module.is_some()
    }

    /// Generation of the load currently in flight.
    pub fn pending_load(&self) -> Option<u64> {
        self.in_flight
    }

    /// Number of commands waiting on the module load.
    pub fn deferred_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_staged_update(&self) -> bool {
        self.staged.is_some()
    }

    pub fn configuration(&self) -> Option<&Configuration> {
        self.active.as_ref().map(|active| &active.configuration)
    }

    pub fn encoding(&self) -> Option<EncodingMode> {
        self.active.as_ref().map(|active| active.encoder.mode())
    }

    /// Read-only handle on the shared solution region of the current instance.
    pub fn shared_reader(&self) -> Option<SharedSolutionReader> {
        self.active
            .as_ref()
            .and_then(|active| active.encoder.shared_reader())
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Takes the load the runtime should start, if any. Each request is returned once.
    pub fn take_load_request(&mut self) -> Option<LoadRequest> {
        self.requested.take()
    }

    /// Applies or defers one command.
    ///
    /// An `Err` means the command was rejected; runtimes surface it with
    /// [`SimulationHost::report`].
    pub fn handle(&mut self, command: Command) -> HostResult<Disposition> {
        self.stats.commands += 1;
        debug!("command `{}` in state {}", command.name(), self.state);
        if self.state == RunState::Loading {
            return self.defer(command);
        }
        self.apply(command).map(|()| Disposition::Applied)
    }

    /// Decodes a JSON command and handles it.
    pub fn handle_json(&mut self, text: &str) -> HostResult<Disposition> {
        let command = Command::from_json(text)?;
        self.handle(command)
    }

    /// Finishes the load tagged `generation`, then drains deferred commands in order.
    ///
    /// Completions for any other generation are ignored.
    pub fn complete_load(&mut self, generation: u64, result: Result<M, LoadError>) {
        if self.in_flight != Some(generation) {
            warn!("ignoring completion of stale module load #{generation}");
            return;
        }
        self.in_flight = None;
        self.requested = None;
        let awaiting = self.awaiting.take();
        match result {
            Ok(module) => {
                info!("compute module `{}` loaded (load #{generation})", module.name());
                self.module = Some(module);
                match awaiting {
                    Some(AwaitingLoad {
                        configuration,
                        encoder,
                    }) => {
                        if let Err(err) = self.instantiate(configuration, encoder) {
                            self.report(err);
                        }
                    }
                    None => self.set_state(RunState::Uninitialized),
                }
            }
            Err(err) => {
                self.set_state(RunState::Uninitialized);
                self.report(HostError::Load(err));
            }
        }
        self.drain_pending();
    }

    /// Runs one tick when stepping. Returns whether the host is still stepping.
    pub fn tick(&mut self) -> bool {
        if self.state != RunState::Stepping {
            return false;
        }
        if let Some(configuration) = self.staged.take() {
            if let Err(err) = self.reinitialize(configuration) {
                self.report(err);
                return false;
            }
        }
        match self.step_once() {
            Ok(()) => true,
            Err(err) => {
                self.halt("solver error");
                self.report(err);
                false
            }
        }
    }

    /// Emits `err` as an [`Event::Error`].
    pub fn report(&mut self, err: HostError) {
        self.stats.errors += 1;
        warn!("{} error: {err}", err.kind());
        self.sink.emit(err.to_event());
    }

    fn defer(&mut self, command: Command) -> HostResult<Disposition> {
        match &command {
            Command::Make {
                configuration,
                encoding,
            } => {
                configuration.validate()?;
                SolutionEncoder::check(*encoding, &self.config.capabilities)?;
            }
            Command::Update { configuration } => configuration.validate()?,
            Command::Start { dt } => {
                validate_dt(*dt)?;
                if self.pending.projects_running() {
                    return Err(HostError::AlreadyStepping);
                }
            }
            Command::Stop => {
                return match self.pending.cancel_start() {
                    Some(dt) => {
                        self.stats.cancelled += 1;
                        debug!("cancelled deferred start (dt={dt})");
                        Ok(Disposition::Cancelled)
                    }
                    None => Err(HostError::NotRunning),
                };
            }
            Command::Get => {}
        }
        self.pending.push(command);
        self.stats.deferred += 1;
        Ok(Disposition::Deferred)
    }

    fn apply(&mut self, command: Command) -> HostResult<()> {
        match command {
            Command::Make {
                configuration,
                encoding,
            } => self.make(configuration, encoding),
            Command::Update { configuration } => self.update(configuration),
            Command::Start { dt } => self.start(dt),
            Command::Stop => self.stop(),
            Command::Get => self.get(),
        }
    }

    fn make(&mut self, configuration: Configuration, encoding: EncodingMode) -> HostResult<()> {
        configuration.validate()?;
        let encoder = SolutionEncoder::for_mode(encoding, &self.config.capabilities)?;
        self.teardown();
        self.set_state(RunState::Loading);
        if self.module.is_some() {
            return self.instantiate(configuration, encoder);
        }
        self.awaiting = Some(AwaitingLoad {
            configuration,
            encoder,
        });
        self.request_load();
        Ok(())
    }

    fn update(&mut self, configuration: Configuration) -> HostResult<()> {
        match self.state {
            RunState::Uninitialized | RunState::Loading => Err(HostError::NoInstance),
            RunState::Ready => {
                configuration.validate()?;
                self.reinitialize(configuration)?;
                self.emit_snapshot()
            }
            RunState::Stepping => {
                configuration.validate()?;
                if self.staged.replace(configuration).is_some() {
                    debug!("staged update superseded before the next tick");
                }
                Ok(())
            }
        }
    }

    fn start(&mut self, dt: f64) -> HostResult<()> {
        validate_dt(dt)?;
        match self.state {
            RunState::Uninitialized | RunState::Loading => Err(HostError::NoInstance),
            RunState::Stepping => Err(HostError::AlreadyStepping),
            RunState::Ready => {
                self.run = Some(Run {
                    dt,
                    started_ms: (self.config.clock)(),
                    ticks: 0,
                });
                self.set_state(RunState::Stepping);
                info!("stepping started (dt={dt})");
                Ok(())
            }
        }
    }

    fn stop(&mut self) -> HostResult<()> {
        if self.state != RunState::Stepping {
            return Err(HostError::NotRunning);
        }
        self.halt("stopped");
        // An update staged after the last tick would otherwise be lost.
        if let Some(configuration) = self.staged.take() {
            self.reinitialize(configuration)?;
            self.emit_snapshot()?;
        }
        Ok(())
    }

    fn get(&mut self) -> HostResult<()> {
        if !self.state.has_instance() {
            return Err(HostError::NoInstance);
        }
        self.emit_snapshot()
    }

    fn instantiate(&mut self, configuration: Configuration, encoder: SolutionEncoder) -> HostResult<()> {
        let Some(module) = self.module.as_ref() else {
            self.set_state(RunState::Uninitialized);
            return Err(HostError::NoInstance);
        };
        let instance = match module.create_instance(&configuration) {
            Ok(instance) => instance,
            Err(err) => {
                self.set_state(RunState::Uninitialized);
                return Err(err.into());
            }
        };
        self.stats.instances_created += 1;
        self.active = Some(Active {
            instance,
            encoder,
            configuration,
        });
        self.set_state(RunState::Ready);
        self.emit_initialized();
        self.emit_snapshot()
    }

    /// Replaces the instance in place, keeping the encoder and run state.
    fn reinitialize(&mut self, configuration: Configuration) -> HostResult<()> {
        let Some(Active {
            instance, encoder, ..
        }) = self.active.take()
        else {
            return Err(HostError::NoInstance);
        };
        drop(instance);
        let Some(module) = self.module.as_ref() else {
            self.teardown();
            self.set_state(RunState::Uninitialized);
            return Err(HostError::NoInstance);
        };
        match module.create_instance(&configuration) {
            Ok(instance) => {
                self.stats.instances_created += 1;
                self.active = Some(Active {
                    instance,
                    encoder,
                    configuration,
                });
                self.emit_initialized();
                Ok(())
            }
            Err(err) => {
                self.teardown();
                self.set_state(RunState::Uninitialized);
                Err(err.into())
            }
        }
    }

    fn step_once(&mut self) -> HostResult<()> {
        let dt = self
            .run
            .as_ref()
            .map(|run| run.dt)
            .ok_or(HostError::NotRunning)?;
        let active = self.active.as_mut().ok_or(HostError::NoInstance)?;
        active.instance.step(dt)?;
        if let Some(run) = self.run.as_mut() {
            run.ticks += 1;
        }
        self.stats.ticks += 1;
        self.emit_snapshot()
    }

    fn emit_initialized(&mut self) {
        if let Some(active) = &self.active {
            let (iteration, time) = (active.instance.iteration(), active.instance.time());
            info!(
                "simulation initialized: {} vortons, {} encoding",
                active.configuration.n_vortons,
                active.encoder.mode()
            );
            self.sink.emit(Event::Initialized { iteration, time });
        }
    }

    fn emit_snapshot(&mut self) -> HostResult<()> {
        let active = self.active.as_mut().ok_or(HostError::NoInstance)?;
        let solution = active.instance.solution();
        let payload = active.encoder.encode(&solution)?;
        let (iteration, time) = (active.instance.iteration(), active.instance.time());
        trace!("Iteration {iteration}: {time:.2}s ({} bytes)", payload.byte_len());
        self.sink.emit(Event::Simulation {
            iteration,
            time,
            payload,
        });
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(run) = self.run.take() {
            self.log_run(&run, "replaced");
        }
        self.staged = None;
        if self.active.take().is_some() {
            debug!("dropped previous simulation instance");
        }
    }

    fn halt(&mut self, reason: &str) {
        if let Some(run) = self.run.take() {
            self.log_run(&run, reason);
        }
        if self.state == RunState::Stepping {
            self.set_state(RunState::Ready);
        }
    }

    fn log_run(&self, run: &Run, reason: &str) {
        let elapsed = (self.config.clock)() - run.started_ms;
        info!(
            "analysis runtime: {elapsed:.0}ms over {} ticks ({reason})",
            run.ticks
        );
    }

    fn request_load(&mut self) {
        self.generation += 1;
        self.in_flight = Some(self.generation);
        self.requested = Some(LoadRequest {
            generation: self.generation,
        });
        self.stats.loads_requested += 1;
        debug!("requesting compute module load #{}", self.generation);
    }

    fn drain_pending(&mut self) {
        while self.state != RunState::Loading {
            let Some(command) = self.pending.pop_front() else {
                break;
            };
            trace!("draining deferred `{}`", command.name());
            if let Err(err) = self.apply(command) {
                self.report(err);
            }
        }
    }

    fn set_state(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        if self.state != next {
            trace!("state {} -> {}", self.state, next);
        }
        self.state = next;
    }
}

fn validate_dt(dt: f64) -> HostResult<()> {
    if dt.is_finite() && dt > 0.0 {
        Ok(())
    } else {
        Err(HostError::InvalidTimeStep(dt))
    }
}
