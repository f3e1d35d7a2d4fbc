//! Wire frame definition and payload packing.
//!
//! Every frame on the wire is a fixed [`MessageHeader`] followed by an opaque
//! payload:
//!
//! ```text
//! +-------------+---------------+---------------------------+
//! | id (u32)    | size (u32)    | payload (size - 8 bytes)  |
//! +-------------+---------------+---------------------------+
//! ```
//!
//! Both header fields are written in platform-native byte order. `size` is the
//! total frame length, header included, and is the only length the receiver
//! trusts when sizing the payload read.
//!
//! Payload packing is a stack: values pushed in the order `a, b, c` must be
//! popped as `c, b, a`. Only [`Pod`] values can be packed, which rules out
//! anything holding references or padding at compile time.

use crate::error::{NetError, Result};
use crate::session::Session;
use bytemuck::{Pod, Zeroable};
use std::fmt;
use std::sync::{Arc, Weak};

/// Application-defined message type tag.
pub type MessageId = u32;

/// Fixed-width frame header.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MessageHeader {
    /// Message type tag.
    pub id: MessageId,
    /// Total frame length in bytes, header included.
    pub size: u32,
}

impl MessageHeader {
    /// Width of the header on the wire.
    pub const SIZE: usize = std::mem::size_of::<MessageHeader>();

    /// Largest frame the `size` field can describe.
    pub const MAX_FRAME_SIZE: usize = u32::MAX as usize;

    /// Header bytes exactly as they go on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Parses a header from its wire bytes.
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        bytemuck::pod_read_unaligned(bytes)
    }

    /// Payload length implied by `size`, or `None` if `size` is too small to
    /// even hold the header.
    pub fn payload_len(&self) -> Option<usize> {
        (self.size as usize).checked_sub(Self::SIZE)
    }
}

impl fmt::Display for MessageHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[id = {} | size = {}]", self.id, self.size)
    }
}

/// A single frame: header plus payload.
///
/// The header's `size` is recomputed after every payload mutation and cannot be
/// set by hand.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    header: MessageHeader,
    payload: Vec<u8>,
}

impl Message {
    /// Creates an empty message with the given id.
    pub fn new(id: MessageId) -> Self {
        Self {
            header: MessageHeader {
                id,
                size: MessageHeader::SIZE as u32,
            },
            payload: Vec::new(),
        }
    }

    /// Builds a message from an id and a raw payload.
    pub fn from_parts(id: MessageId, payload: Vec<u8>) -> Self {
        let mut message = Self {
            header: MessageHeader { id, size: 0 },
            payload,
        };
        message.refresh_size();
        message
    }

    pub fn id(&self) -> MessageId {
        self.header.id
    }

    pub fn set_id(&mut self, id: MessageId) {
        self.header.id = id;
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Total frame length, header included.
    pub fn size(&self) -> usize {
        MessageHeader::SIZE + self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Appends the fixed-width representation of `value` to the payload.
    pub fn push<T: Pod>(&mut self, value: &T) -> &mut Self {
        self.payload.extend_from_slice(bytemuck::bytes_of(value));
        self.refresh_size();
        self
    }

    /// Removes the most recently pushed `T` from the end of the payload.
    ///
    /// The message is left untouched when fewer than `size_of::<T>()` bytes
    /// remain.
    pub fn pop<T: Pod>(&mut self) -> Result<T> {
        let width = std::mem::size_of::<T>();
        let offset = self.split_point(width)?;
        let value = bytemuck::pod_read_unaligned(&self.payload[offset..]);
        self.payload.truncate(offset);
        self.refresh_size();
        Ok(value)
    }

    /// Appends raw bytes to the payload.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.payload.extend_from_slice(bytes);
        self.refresh_size();
        self
    }

    /// Removes the last `len` bytes of the payload and returns them.
    pub fn pop_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let offset = self.split_point(len)?;
        let tail = self.payload.split_off(offset);
        self.refresh_size();
        Ok(tail)
    }

    fn split_point(&self, width: usize) -> Result<usize> {
        self.payload
            .len()
            .checked_sub(width)
            .ok_or(NetError::PayloadUnderflow {
                requested: width,
                available: self.payload.len(),
            })
    }

    /// Frames past `MAX_FRAME_SIZE` saturate; no service will send them.
    fn refresh_size(&mut self) {
        let size = self.size();
        debug_assert!(
            size <= MessageHeader::MAX_FRAME_SIZE,
            "frame of {size} bytes overflows the header"
        );
        self.header.size = u32::try_from(size).unwrap_or(u32::MAX);
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} payload={}B", self.header, self.payload.len())
    }
}

/// An inbound message tagged with the session it arrived on.
///
/// The owner is a weak back-reference: it never keeps the session alive.
/// Client-side sessions leave it empty since a client has only one peer.
#[derive(Debug)]
pub struct OwnedMessage {
    pub(crate) owner: Option<Weak<Session>>,
    pub message: Message,
}

impl OwnedMessage {
    pub fn new(owner: Option<Weak<Session>>, message: Message) -> Self {
        Self { owner, message }
    }

    /// The originating session, if it was stamped and is still alive.
    pub fn owner(&self) -> Option<Arc<Session>> {
        self.owner.as_ref().and_then(Weak::upgrade)
    }
}
