//! Outbound events.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::payload::SolutionPayload;

/// Caller-facing classification of a failed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The command is valid but the host is in the wrong state for it.
    Precondition,
    /// The message is not a known command.
    UnsupportedCommand,
    /// The configuration was rejected.
    InvalidConfiguration,
    /// The compute module could not be loaded.
    LoadFailed,
    /// The requested encoding needs a capability the host lacks.
    UnsupportedEncoding,
    /// The solver failed while creating or stepping an instance.
    Solver,
    /// A solution could not be encoded or decoded.
    Encoding,
}

impl ErrorKind {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Precondition => "precondition",
            ErrorKind::UnsupportedCommand => "unsupported_command",
            ErrorKind::InvalidConfiguration => "invalid_configuration",
            ErrorKind::LoadFailed => "load_failed",
            ErrorKind::UnsupportedEncoding => "unsupported_encoding",
            ErrorKind::Solver => "solver",
            ErrorKind::Encoding => "encoding",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages emitted by the simulation worker, in emission order.
#[derive(Debug, Clone)]
pub enum Event {
    /// The module is loaded and an instance was (re)created.
    Initialized {
        /// Iteration of the fresh instance.
        iteration: u64,
        /// Simulated time of the fresh instance.
        time: f64,
    },
    /// A solution snapshot.
    Simulation {
        /// Iteration the snapshot was taken at.
        iteration: u64,
        /// Simulated time the snapshot was taken at.
        time: f64,
        /// Encoded snapshot.
        payload: SolutionPayload,
    },
    /// A command failed or the worker hit an error.
    Error {
        /// Classification.
        kind: ErrorKind,
        /// Human-readable detail.
        message: String,
    },
}

impl Event {
    /// Builds an [`Event::Error`].
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Event::Error {
            kind,
            message: message.into(),
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Initialized { .. } => "initialized",
            Event::Simulation { .. } => "simulation",
            Event::Error { .. } => "error",
        }
    }

    /// Iteration carried by the event, if any.
    pub fn iteration(&self) -> Option<u64> {
        match self {
            Event::Initialized { iteration, .. } | Event::Simulation { iteration, .. } => {
                Some(*iteration)
            }
            Event::Error { .. } => None,
        }
    }

    /// Error classification, if this is an error event.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Event::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
