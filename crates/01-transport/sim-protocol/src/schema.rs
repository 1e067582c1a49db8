//! Binary solution schema frozen for rkyv serialization.
//!
//! `rkyv` expands `Archive` derives into generated archived structs that inherit `#[allow(missing_docs)]`.
#![allow(missing_docs)]
//!
//! Every binary buffer starts with a four byte header (`tag`, `version`, two
//! reserved bytes) followed by the archived [`SolutionV1`]. Any
//! backward-incompatible change must bump the schema version.

use rkyv::{
    api::high::{access, to_bytes, HighSerializer, HighValidator},
    bytecheck::CheckBytes,
    rancor::Error,
    ser::allocator::ArenaHandle,
    util::AlignedVec,
    Archive, Serialize,
};

use crate::error::{ProtocolError, ProtocolResult};
use crate::payload::Solution;

/// Schema version for binary solutions.
pub const SCHEMA_VERSION_V1: u8 = 1;

/// Header tag identifying a solution buffer.
pub const TAG_SOLUTION: u8 = 0x51;

/// Length of the header preceding the archive.
pub const HEADER_LEN: usize = 4;

/// Archived solution snapshot.
#[derive(Debug, Clone, PartialEq, Archive, Serialize)]
#[rkyv(
    attr(allow(missing_docs), doc = "Archived representation of `SolutionV1`."),
    bytecheck()
)]
pub struct SolutionV1 {
    /// Iteration the snapshot was taken at.
    pub iteration: u64,
    /// Simulated time.
    pub time: f64,
    /// Flat xyz particle positions.
    pub positions: Vec<f64>,
    /// Per-particle vorticity magnitude.
    pub intensities: Vec<f64>,
}

impl From<&Solution> for SolutionV1 {
    fn from(solution: &Solution) -> Self {
        Self {
            iteration: solution.iteration,
            time: solution.time,
            positions: solution.positions.clone(),
            intensities: solution.intensities.clone(),
        }
    }
}

/// Encodes a solution into a self-describing binary buffer.
pub fn encode_solution(solution: &Solution) -> ProtocolResult<Vec<u8>> {
    let archive = serialize(&SolutionV1::from(solution))?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + archive.len());
    bytes.extend_from_slice(&[TAG_SOLUTION, SCHEMA_VERSION_V1, 0, 0]);
    bytes.extend_from_slice(&archive);
    Ok(bytes)
}

/// Validates and decodes a buffer produced by [`encode_solution`].
pub fn decode_solution(bytes: &[u8]) -> ProtocolResult<Solution> {
    let body = ensure_header(bytes)?;
    // Transferred buffers carry no alignment guarantee.
    let mut aligned: AlignedVec = AlignedVec::with_capacity(body.len());
    aligned.extend_from_slice(body);
    let archived = archived_root::<SolutionV1>(&aligned)?;
    Ok(Solution {
        iteration: archived.iteration.to_native(),
        time: archived.time.to_native(),
        positions: archived.positions.iter().map(|v| v.to_native()).collect(),
        intensities: archived.intensities.iter().map(|v| v.to_native()).collect(),
    })
}

fn serialize<T>(value: &T) -> ProtocolResult<Vec<u8>>
where
    T: Archive,
    T: for<'a> Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, Error>>,
{
    to_bytes::<Error>(value)
        .map(|aligned| aligned.into_vec())
        .map_err(|err| ProtocolError::codec(format!("serialize failure: {err}")))
}

fn ensure_header(bytes: &[u8]) -> ProtocolResult<&[u8]> {
    if bytes.len() < HEADER_LEN {
        return Err(ProtocolError::codec(format!(
            "solution buffer too short: {} bytes",
            bytes.len()
        )));
    }
    if bytes[0] != TAG_SOLUTION {
        return Err(ProtocolError::codec(format!(
            "unexpected solution tag {} (expected {})",
            bytes[0], TAG_SOLUTION
        )));
    }
    if bytes[1] != SCHEMA_VERSION_V1 {
        return Err(ProtocolError::codec(format!(
            "schema version mismatch: {} vs {}",
            bytes[1], SCHEMA_VERSION_V1
        )));
    }
    Ok(&bytes[HEADER_LEN..])
}

fn archived_root<T>(payload: &[u8]) -> ProtocolResult<&rkyv::Archived<T>>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, Error>>,
{
    access::<T::Archived, Error>(payload)
        .map_err(|err| ProtocolError::codec(format!("validation failure: {err}")))
}
