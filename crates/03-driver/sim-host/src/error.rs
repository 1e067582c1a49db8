use sim_protocol::{EncodingMode, ErrorKind, Event, ProtocolError};
use thiserror::Error;

use crate::module::{LoadError, ModuleError};

pub type HostResult<T> = Result<T, HostError>;

/// Why a command could not be applied. Every variant leaves the host in a
/// well-defined [`crate::RunState`].
#[derive(Debug, Error)]
pub enum HostError {
    #[error("simulation does not exist yet")]
    NoInstance,

    #[error("simulation is already stepping")]
    AlreadyStepping,

    #[error("no simulation running")]
    NotRunning,

    #[error("time step must be positive and finite, got {0}")]
    InvalidTimeStep(f64),

    #[error("encoding `{0}` needs shared memory, which this host does not provide")]
    UnsupportedEncoding(EncodingMode),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl HostError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HostError::NoInstance
            | HostError::AlreadyStepping
            | HostError::NotRunning
            | HostError::InvalidTimeStep(_) => ErrorKind::Precondition,
            HostError::UnsupportedEncoding(_) => ErrorKind::UnsupportedEncoding,
            HostError::Load(_) => ErrorKind::LoadFailed,
            HostError::Module(ModuleError::InvalidConfiguration(_)) => {
                ErrorKind::InvalidConfiguration
            }
            HostError::Module(ModuleError::Solver(_)) => ErrorKind::Solver,
            HostError::Protocol(err) => err.kind(),
        }
    }

    /// Caller-facing form of the error.
    pub fn to_event(&self) -> Event {
        Event::error(self.kind(), self.to_string())
    }
}
