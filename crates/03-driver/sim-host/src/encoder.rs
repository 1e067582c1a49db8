//! Turns solver snapshots into caller payloads.

use sim_protocol::{
    schema, shared_solution_channel, EncodingMode, SharedSolutionReader, SharedSolutionWriter,
    Solution, SolutionPayload,
};

use crate::config::HostCapabilities;
use crate::error::{HostError, HostResult};

/// Encoder bound to one instance; the mode never changes after creation.
#[derive(Debug)]
pub struct SolutionEncoder {
    mode: EncodingMode,
    shared: Option<SharedSolutionWriter>,
}

impl SolutionEncoder {
    /// Fails with [`HostError::UnsupportedEncoding`] when `mode` needs a
    /// capability the host lacks.
    pub fn for_mode(mode: EncodingMode, capabilities: &HostCapabilities) -> HostResult<Self> {
        Self::check(mode, capabilities)?;
        let shared = match mode {
            EncodingMode::SharedTransferable => Some(shared_solution_channel().0),
            EncodingMode::Json | EncodingMode::Transferable => None,
        };
        Ok(Self { mode, shared })
    }

    /// Checks `mode` against `capabilities` without allocating anything.
    pub fn check(mode: EncodingMode, capabilities: &HostCapabilities) -> HostResult<()> {
        if mode == EncodingMode::SharedTransferable && !capabilities.shared_memory {
            return Err(HostError::UnsupportedEncoding(mode));
        }
        Ok(())
    }

    pub fn mode(&self) -> EncodingMode {
        self.mode
    }

    /// Read-only handle on the shared region, for shared encodings.
    pub fn shared_reader(&self) -> Option<SharedSolutionReader> {
        self.shared.as_ref().map(SharedSolutionWriter::reader)
    }

    pub fn encode(&mut self, solution: &Solution) -> HostResult<SolutionPayload> {
        let payload = match (self.mode, self.shared.as_mut()) {
            (EncodingMode::Json, _) => SolutionPayload::Json(solution.to_json()?),
            (EncodingMode::Transferable, _) => {
                SolutionPayload::Transferable(schema::encode_solution(solution)?)
            }
            (EncodingMode::SharedTransferable, Some(writer)) => {
                let sequence = writer.publish(schema::encode_solution(solution)?);
                SolutionPayload::Shared {
                    reader: writer.reader(),
                    sequence,
                }
            }
            (EncodingMode::SharedTransferable, None) => {
                return Err(HostError::UnsupportedEncoding(self.mode));
            }
        };
        Ok(payload)
    }
}
