//! Single-writer region for publishing solution frames.
//!
//! The host keeps the [`SharedSolutionWriter`]; callers get cloneable
//! [`SharedSolutionReader`]s. Publishing swaps in a whole new frame, so a frame
//! a reader already holds is never mutated.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

/// One published frame.
#[derive(Debug, Default)]
pub struct SharedFrame {
    sequence: u64,
    bytes: Box<[u8]>,
}

impl SharedFrame {
    /// Publication sequence, starting at 1. Zero means nothing was published yet.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Encoded solution bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Creates a connected writer/reader pair over an empty region.
pub fn shared_solution_channel() -> (SharedSolutionWriter, SharedSolutionReader) {
    let slot = Arc::new(ArcSwap::from_pointee(SharedFrame::default()));
    let reader = SharedSolutionReader {
        slot: Arc::clone(&slot),
    };
    (
        SharedSolutionWriter {
            slot,
            next_sequence: 1,
        },
        reader,
    )
}

/// Write side of a shared region. Not cloneable.
pub struct SharedSolutionWriter {
    slot: Arc<ArcSwap<SharedFrame>>,
    next_sequence: u64,
}

impl SharedSolutionWriter {
    /// Publishes a new frame and returns its sequence.
    pub fn publish(&mut self, bytes: Vec<u8>) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.slot.store(Arc::new(SharedFrame {
            sequence,
            bytes: bytes.into_boxed_slice(),
        }));
        sequence
    }

    /// Hands out a read-only handle on the region.
    pub fn reader(&self) -> SharedSolutionReader {
        SharedSolutionReader {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl fmt::Debug for SharedSolutionWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSolutionWriter")
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}

/// Read-only handle on a shared region.
#[derive(Clone)]
pub struct SharedSolutionReader {
    slot: Arc<ArcSwap<SharedFrame>>,
}

impl SharedSolutionReader {
    /// Most recently published frame.
    pub fn current(&self) -> Arc<SharedFrame> {
        self.slot.load_full()
    }

    /// Sequence of the most recently published frame.
    pub fn sequence(&self) -> u64 {
        self.slot.load().sequence
    }
}

impl fmt::Debug for SharedSolutionReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSolutionReader")
            .field("sequence", &self.sequence())
            .finish()
    }
}
