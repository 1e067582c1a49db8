//! Protocol-level failures and their mapping onto reported error kinds.

use thiserror::Error;

use crate::event::ErrorKind;

/// Result alias for protocol-level operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Failures raised while decoding commands, validating configurations or
/// encoding solutions.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The inbound message is not one of the known commands.
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    /// The configuration is structurally valid but describes an impossible setup.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A solution buffer could not be produced or read back.
    #[error("codec error: {0}")]
    Codec(String),

    /// A shared frame was replaced before the caller read it.
    #[error("shared frame {expected} was superseded by frame {found}")]
    StaleFrame {
        /// Sequence carried by the event.
        expected: u64,
        /// Sequence currently visible in the shared region.
        found: u64,
    },
}

impl ProtocolError {
    /// Builds a [`ProtocolError::Codec`] from any message.
    pub fn codec(msg: impl Into<String>) -> Self {
        ProtocolError::Codec(msg.into())
    }

    /// Builds a [`ProtocolError::InvalidConfiguration`] from any message.
    pub fn invalid(msg: impl Into<String>) -> Self {
        ProtocolError::InvalidConfiguration(msg.into())
    }

    /// Caller-facing classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::UnsupportedCommand(_) => ErrorKind::UnsupportedCommand,
            ProtocolError::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            ProtocolError::Codec(_) | ProtocolError::StaleFrame { .. } => ErrorKind::Encoding,
        }
    }
}
