#![deny(missing_docs)]
//! Message contract between a foreground caller and the background simulation worker.
//!
//! Callers send [`Command`]s and receive [`Event`]s. Solutions travel inside
//! [`SolutionPayload`] using one of three [`EncodingMode`]s: JSON text, an owned
//! rkyv archive, or a frame published into a [`shared`] region.

pub mod command;
pub mod configuration;
pub mod error;
pub mod event;
pub mod payload;
pub mod schema;
pub mod shared;

pub use command::{Command, EncodingMode};
pub use configuration::{Configuration, Domain, InitialConditions, VortexRing, MAX_VORTONS};
pub use error::{ProtocolError, ProtocolResult};
pub use event::{ErrorKind, Event};
pub use payload::{Solution, SolutionPayload};
pub use shared::{shared_solution_channel, SharedFrame, SharedSolutionReader, SharedSolutionWriter};
