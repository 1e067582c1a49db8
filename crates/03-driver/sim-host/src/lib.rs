#![allow(missing_docs)]
//! Runtime-agnostic core of the background simulation worker.
//!
//! [`SimulationHost`] is a synchronous state machine: runtimes feed it
//! commands, module load completions and ticks, and collect the events it
//! emits through an [`EventSink`]. See `runtime-native` for a threaded driver
//! and `sim-worker-wasm` for the web worker entry point.

mod config;
mod encoder;
mod error;
mod host;
pub mod module;
mod queue;
mod sink;
mod state;


pub use config::{monotonic_ms, ClockFn, HostCapabilities, HostConfig, DEFAULT_DEFERRAL_POLL};
pub use encoder::SolutionEncoder;
pub use error::{HostError, HostResult};
pub use host::{Disposition, HostStats, LoadRequest, SimulationHost};
pub use module::{ComputeModule, LoadError, ModuleError, SolverInstance};
pub use sink::EventSink;
pub use state::RunState;
