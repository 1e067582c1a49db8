//! Solution snapshots and their encoded payloads.

use serde::{Deserialize, Serialize};

use crate::command::EncodingMode;
use crate::error::{ProtocolError, ProtocolResult};
use crate::schema;
use crate::shared::SharedSolutionReader;

/// Particle state at one point of a run.
///
/// `positions` is a flat `[x0, y0, z0, x1, ...]` array; `intensities` holds one
/// vorticity magnitude per particle.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Solution {
    /// Iteration the snapshot was taken at.
    pub iteration: u64,
    /// Simulated time.
    pub time: f64,
    /// Flat xyz positions.
    pub positions: Vec<f64>,
    /// Per-particle vorticity magnitude.
    pub intensities: Vec<f64>,
}

impl Solution {
    /// Number of particles in the snapshot.
    pub fn len(&self) -> usize {
        self.intensities.len()
    }

    /// Whether the snapshot holds no particles.
    pub fn is_empty(&self) -> bool {
        self.intensities.is_empty()
    }

    /// Encodes the snapshot as JSON text.
    pub fn to_json(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(|err| ProtocolError::codec(err.to_string()))
    }

    /// Decodes a snapshot from JSON text.
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        serde_json::from_str(text).map_err(|err| ProtocolError::codec(err.to_string()))
    }
}

/// Encoded solution carried by [`crate::Event::Simulation`].
#[derive(Debug, Clone)]
pub enum SolutionPayload {
    /// JSON text.
    Json(String),
    /// Owned binary buffer, see [`crate::schema`].
    Transferable(Vec<u8>),
    /// Frame published into a shared region.
    Shared {
        /// Read-only handle on the region.
        reader: SharedSolutionReader,
        /// Sequence of the frame this event refers to.
        sequence: u64,
    },
}

impl SolutionPayload {
    /// Encoding the payload was produced with.
    pub fn encoding(&self) -> EncodingMode {
        match self {
            SolutionPayload::Json(_) => EncodingMode::Json,
            SolutionPayload::Transferable(_) => EncodingMode::Transferable,
            SolutionPayload::Shared { .. } => EncodingMode::SharedTransferable,
        }
    }

    /// Size of the encoded snapshot in bytes.
    ///
    /// A superseded shared frame is gone, so it reports zero.
    pub fn byte_len(&self) -> usize {
        match self {
            SolutionPayload::Json(text) => text.len(),
            SolutionPayload::Transferable(bytes) => bytes.len(),
            SolutionPayload::Shared { reader, sequence } => {
                let frame = reader.current();
                if frame.sequence() == *sequence {
                    frame.bytes().len()
                } else {
                    0
                }
            }
        }
    }

    /// Decodes the payload back into a [`Solution`].
    ///
    /// Shared payloads fail with [`ProtocolError::StaleFrame`] once the host has
    /// published a newer frame.
    pub fn decode(&self) -> ProtocolResult<Solution> {
        match self {
            SolutionPayload::Json(text) => Solution::from_json(text),
            SolutionPayload::Transferable(bytes) => schema::decode_solution(bytes),
            SolutionPayload::Shared { reader, sequence } => {
                let frame = reader.current();
                if frame.sequence() != *sequence {
                    return Err(ProtocolError::StaleFrame {
                        expected: *sequence,
                        found: frame.sequence(),
                    });
                }
                schema::decode_solution(frame.bytes())
            }
        }
    }
}
