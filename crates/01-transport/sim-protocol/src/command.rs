//! Inbound commands.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::configuration::Configuration;
use crate::error::{ProtocolError, ProtocolResult};

/// How solutions for an instance are delivered to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingMode {
    /// JSON text of the full solution.
    #[default]
    Json,
    /// Owned binary buffer handed over to the caller.
    Transferable,
    /// Binary frame published into a region both sides can read.
    SharedTransferable,
}

impl EncodingMode {
    /// Every encoding mode, in declaration order.
    pub const ALL: [EncodingMode; 3] = [
        EncodingMode::Json,
        EncodingMode::Transferable,
        EncodingMode::SharedTransferable,
    ];

    /// Stable lowercase name used on the wire and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            EncodingMode::Json => "json",
            EncodingMode::Transferable => "transferable",
            EncodingMode::SharedTransferable => "shared_transferable",
        }
    }
}

impl fmt::Display for EncodingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncodingMode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        EncodingMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .ok_or_else(|| ProtocolError::UnsupportedCommand(format!("unknown encoding `{s}`")))
    }
}

/// Closed set of requests a caller can send to the simulation worker.
///
/// Wire form is externally tagged: `{"make": {"configuration": {...}, "encoding": "json"}}`,
/// `{"update": {"configuration": {...}}}`, `{"start": {"dt": 0.03}}`, `"stop"`, `"get"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Command {
    /// Create (or replace) the simulation instance.
    Make {
        /// Setup of the new instance.
        configuration: Configuration,
        /// Delivery format for every solution of the new instance.
        #[serde(default)]
        encoding: EncodingMode,
    },
    /// Re-initialize the current instance from a new configuration.
    Update {
        /// Replacement setup.
        configuration: Configuration,
    },
    /// Begin continuous stepping.
    Start {
        /// Time step, strictly positive.
        dt: f64,
    },
    /// Halt stepping, or cancel a start still waiting on the module load.
    Stop,
    /// Emit the current solution without stepping.
    Get,
}

impl Command {
    /// Decodes a command from its JSON wire form.
    ///
    /// Any decode failure is reported as [`ProtocolError::UnsupportedCommand`].
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        serde_json::from_str(text).map_err(|err| ProtocolError::UnsupportedCommand(err.to_string()))
    }

    /// Encodes the command to its JSON wire form.
    pub fn to_json(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(|err| ProtocolError::codec(err.to_string()))
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Make { .. } => "make",
            Command::Update { .. } => "update",
            Command::Start { .. } => "start",
            Command::Stop => "stop",
            Command::Get => "get",
        }
    }
}
