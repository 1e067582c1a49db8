//! Boundary to the numerical solver.
//!
//! A [`ComputeModule`] is loaded once, out of band, and then creates
//! [`SolverInstance`]s on demand. The host never looks inside either.

use std::time::Duration;

use sim_protocol::{Configuration, Solution};
use thiserror::Error;

/// A loaded solver library.
pub trait ComputeModule {
    /// Live simulation object created by this module.
    type Instance: SolverInstance;

    /// Name used in logs.
    fn name(&self) -> &str {
        "compute-module"
    }

    /// Creates a fresh instance at iteration 0, time 0.
    fn create_instance(&self, configuration: &Configuration) -> Result<Self::Instance, ModuleError>;
}

/// Mutable simulation state owned by the host.
pub trait SolverInstance {
    /// Advances the simulation by `dt`.
    fn step(&mut self, dt: f64) -> Result<(), ModuleError>;

    /// Number of completed steps.
    fn iteration(&self) -> u64;

    /// Simulated time.
    fn time(&self) -> f64;

    /// Fresh, independently owned snapshot of the particles.
    fn solution(&self) -> Solution;
}

/// Failures reported by a compute module.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModuleError {
    /// The module refused the configuration.
    #[error("solver rejected configuration: {0}")]
    InvalidConfiguration(String),

    /// The solver failed while running.
    #[error("solver failure: {0}")]
    Solver(String),
}

impl ModuleError {
    /// Builds a [`ModuleError::Solver`] from any message.
    pub fn solver(msg: impl Into<String>) -> Self {
        ModuleError::Solver(msg.into())
    }
}

/// Failures while loading a compute module.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    /// The module cannot run in this environment.
    #[error("compute module is unavailable: {0}")]
    Unavailable(String),

    /// Fetching or instantiating the module failed.
    #[error("compute module failed to load: {0}")]
    Failed(String),

    /// The load did not finish in time.
    #[error("compute module did not load within {0:?}")]
    TimedOut(Duration),
}
