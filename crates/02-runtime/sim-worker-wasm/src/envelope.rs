//! Shape of the messages the worker posts to its owner.
//!
//! Every event becomes a small JSON header plus an optional solution body. The
//! body is attached next to the header as a `solution` field: a string for
//! JSON payloads, a transferred `Uint8Array` for owned archives, or a view of
//! the worker's `SharedArrayBuffer` for shared frames.

use std::sync::Arc;

use serde::Serialize;
use sim_protocol::{
    EncodingMode, ErrorKind, Event, ProtocolError, ProtocolResult, SharedFrame, SolutionPayload,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope<'a> {
    Initialized {
        iteration: u64,
        time: f64,
    },
    Simulation {
        iteration: u64,
        time: f64,
        encoding: EncodingMode,
        #[serde(skip_serializing_if = "Option::is_none")]
        sequence: Option<u64>,
        byte_len: usize,
    },
    Error {
        kind: ErrorKind,
        message: &'a str,
    },
}

impl Envelope<'_> {
    pub fn to_json(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(|err| ProtocolError::codec(err.to_string()))
    }
}

#[derive(Debug)]
pub enum Body<'a> {
    Empty,
    Text(&'a str),
    Owned(&'a [u8]),
    Shared(Arc<SharedFrame>),
}

#[derive(Debug)]
pub struct Outbound<'a> {
    pub envelope: Envelope<'a>,
    pub body: Body<'a>,
}

/// Splits an event into its header and body.
///
/// A shared payload whose frame was already replaced goes out without a body;
/// the header still names the sequence it referred to.
pub fn outbound(event: &Event) -> Outbound<'_> {
    match event {
        Event::Initialized { iteration, time } => Outbound {
            envelope: Envelope::Initialized {
                iteration: *iteration,
                time: *time,
            },
            body: Body::Empty,
        },
        Event::Error { kind, message } => Outbound {
            envelope: Envelope::Error {
                kind: *kind,
                message,
            },
            body: Body::Empty,
        },
        Event::Simulation {
            iteration,
            time,
            payload,
        } => {
            let (sequence, body) = match payload {
                SolutionPayload::Json(text) => (None, Body::Text(text)),
                SolutionPayload::Transferable(bytes) => (None, Body::Owned(bytes)),
                SolutionPayload::Shared { reader, sequence } => {
                    let frame = reader.current();
                    if frame.sequence() == *sequence {
                        (Some(*sequence), Body::Shared(frame))
                    } else {
                        (Some(*sequence), Body::Empty)
                    }
                }
            };
            let byte_len = match &body {
                Body::Empty => 0,
                Body::Text(text) => text.len(),
                Body::Owned(bytes) => bytes.len(),
                Body::Shared(frame) => frame.bytes().len(),
            };
            Outbound {
                envelope: Envelope::Simulation {
                    iteration: *iteration,
                    time: *time,
                    encoding: payload.encoding(),
                    sequence,
                    byte_len,
                },
                body,
            }
        }
    }
}
