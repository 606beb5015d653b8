//! Prepare-write reassembly for long attribute values.
//!
//! A peer that needs to write more than one MTU sends a series of
//! offset-addressed prepare writes, then an execute write that either commits
//! or cancels the whole value. A [`PrepareWriteBuffer`] for the command
//! channel accumulates the fragments:
//!
//! ```text
//! Idle --fragment--> Accumulating --commit--> payload, Idle
//!                                  --cancel--> Idle
//! ```
//!
//! Every fragment is bounds-checked against the fixed capacity before it
//! touches the buffer, so a rejected fragment never changes the stored value.

use std::fmt;
use zeroize::Zeroizing;

/// ATT status codes returned to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Ok,
    RequestNotSupported,
    InvalidOffset,
    InvalidAttrLen,
    InsufficientResources,
}

impl GattStatus {
    /// Wire value of the status.
    pub const fn code(self) -> u8 {
        match self {
            GattStatus::Ok => 0x00,
            GattStatus::RequestNotSupported => 0x06,
            GattStatus::InvalidOffset => 0x07,
            GattStatus::InvalidAttrLen => 0x0D,
            GattStatus::InsufficientResources => 0x11,
        }
    }
}

/// Why a fragment was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyError {
    /// Fragment starts past the end of the buffer.
    InvalidOffset { offset: usize, capacity: usize },
    /// Fragment would run past the end of the buffer.
    InvalidLength { end: usize, capacity: usize },
    /// The buffer could not be allocated.
    NoResources { requested: usize },
}

impl ReassemblyError {
    /// Status to acknowledge the fragment with.
    pub fn status(&self) -> GattStatus {
        match self {
            Self::InvalidOffset { .. } => GattStatus::InvalidOffset,
            Self::InvalidLength { .. } => GattStatus::InvalidAttrLen,
            Self::NoResources { .. } => GattStatus::InsufficientResources,
        }
    }
}

impl fmt::Display for ReassemblyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidOffset { offset, capacity } => {
                write!(f, "invalid offset {} (capacity {})", offset, capacity)
            }
            Self::InvalidLength { end, capacity } => {
                write!(f, "write ends at {} (capacity {})", end, capacity)
            }
            Self::NoResources { requested } => {
                write!(f, "cannot allocate {} byte write buffer", requested)
            }
        }
    }
}

impl std::error::Error for ReassemblyError {}

/// Accumulates prepare writes for one characteristic.
///
/// The backing storage is allocated on the first fragment and released on
/// commit or cancel. Released bytes are zeroed since payloads carry secrets.
#[derive(Debug)]
pub struct PrepareWriteBuffer {
    capacity: usize,
    buf: Option<Zeroizing<Vec<u8>>>,
}

impl PrepareWriteBuffer {
    /// Create an idle buffer that accepts values up to `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buf: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current logical length.
    pub fn len(&self) -> usize {
        self.buf.as_ref().map_or(0, |b| b.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True between the first fragment and commit/cancel.
    pub fn is_accumulating(&self) -> bool {
        self.buf.is_some()
    }

    /// Store a fragment at `offset`.
    ///
    /// The logical length becomes `max(len, offset + bytes.len())`; a gap
    /// between the current end and `offset` reads as zeros.
    pub fn fragment(&mut self, offset: usize, bytes: &[u8]) -> Result<(), ReassemblyError> {
        if offset > self.capacity {
            return Err(ReassemblyError::InvalidOffset {
                offset,
                capacity: self.capacity,
            });
        }
        let end = offset
            .checked_add(bytes.len())
            .filter(|&end| end <= self.capacity)
            .ok_or(ReassemblyError::InvalidLength {
                end: offset.saturating_add(bytes.len()),
                capacity: self.capacity,
            })?;

        if self.buf.is_none() {
            let mut storage = Vec::new();
            storage
                .try_reserve_exact(self.capacity)
                .map_err(|_| ReassemblyError::NoResources {
                    requested: self.capacity,
                })?;
            self.buf = Some(Zeroizing::new(storage));
        }

        if let Some(buf) = self.buf.as_mut() {
            if buf.len() < end {
                buf.resize(end, 0);
            }
            buf[offset..end].copy_from_slice(bytes);
        }
        Ok(())
    }

    /// Finish the cycle and hand out the assembled value.
    ///
    /// Returns `None` when nothing was written.
    pub fn commit(&mut self) -> Option<Zeroizing<Vec<u8>>> {
        self.buf.take().filter(|b| !b.is_empty())
    }

    /// Discard the accumulated value.
    pub fn cancel(&mut self) {
        self.buf = None;
    }
}
