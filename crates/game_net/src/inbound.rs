//! Shared receive buffer fed by every session's read loop.

use crate::message::OwnedMessage;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// FIFO of fully read messages waiting for the next tick.
///
/// Sessions push from their read completions; only the tick drains. The lock
/// is held for the push or the swap and never while the batch is dispatched.
#[derive(Debug, Default)]
pub struct InboundQueue {
    messages: Mutex<VecDeque<OwnedMessage>>,
}

impl InboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: OwnedMessage) {
        self.messages.lock().push_back(message);
    }

    /// Takes up to `max` messages from the front, in arrival order.
    ///
    /// `max == 0` takes everything by swapping the whole buffer out.
    pub fn drain(&self, max: usize) -> VecDeque<OwnedMessage> {
        let mut messages = self.messages.lock();
        if max == 0 || max >= messages.len() {
            return std::mem::take(&mut *messages);
        }
        let rest = messages.split_off(max);
        std::mem::replace(&mut *messages, rest)
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}
