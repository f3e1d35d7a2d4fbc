//! Message ids spoken between the demo server and client.

use game_net::MessageId;

/// Application-level message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum GameMessage {
    /// Server -> client: the session was registered.
    Accept = 500,
    /// Server -> client: the session was refused.
    Deny,
    /// Round trip; the server echoes it unchanged.
    Ping,
    /// Client -> server: opaque bytes for the server log.
    Send,
    /// Fanned out to every other session, sender id pushed on top.
    Broadcast,
}

impl GameMessage {
    pub const fn id(self) -> MessageId {
        self as MessageId
    }

    pub fn from_id(id: MessageId) -> Option<Self> {
        match id {
            500 => Some(GameMessage::Accept),
            501 => Some(GameMessage::Deny),
            502 => Some(GameMessage::Ping),
            503 => Some(GameMessage::Send),
            504 => Some(GameMessage::Broadcast),
            _ => None,
        }
    }
}

impl From<GameMessage> for MessageId {
    fn from(message: GameMessage) -> Self {
        message.id()
    }
}
