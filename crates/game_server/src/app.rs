//! Demo game server behaviour on top of `game_net`.

use crate::protocol::GameMessage;
use game_net::{Message, Service, ServiceHandler, Session};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Welcomes sessions, echoes pings and relays broadcasts.
#[derive(Debug, Default)]
pub struct GameServerHandler {
    messages_handled: AtomicU64,
}

impl GameServerHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages dispatched so far.
    pub fn messages_handled(&self) -> u64 {
        self.messages_handled.load(Ordering::Relaxed)
    }

    fn relay_broadcast(&self, service: &Service, sender: &Arc<Session>, mut message: Message) {
        message.push(&sender.id());
        if let Err(e) = service.broadcast(message, Some(sender)) {
            warn!("Broadcast from session {} dropped: {}", sender.id(), e);
        }
    }
}

impl ServiceHandler for GameServerHandler {
    fn on_session_connected(&self, _service: &Service, session: &Arc<Session>) -> bool {
        debug!("Admitting {}", session.endpoint());
        true
    }

    fn on_session_registered(&self, service: &Service, session: &Arc<Session>) {
        info!("👋 Session {} joined from {}", session.id(), session.endpoint());
        if let Err(e) = service.send_to(session, Message::new(GameMessage::Accept.id())) {
            warn!("Could not welcome session {}: {}", session.id(), e);
        }
    }

    fn on_session_unregistered(&self, _service: &Service, session: &Arc<Session>) {
        info!("Session {} left", session.id());
    }

    fn on_message_received(
        &self,
        service: &Service,
        session: Option<&Arc<Session>>,
        message: Message,
    ) {
        self.messages_handled.fetch_add(1, Ordering::Relaxed);
        let Some(session) = session else {
            debug!("Dropping {} from a released session", message);
            return;
        };

        match GameMessage::from_id(message.id()) {
            Some(GameMessage::Ping) => {
                debug!("[{}] Ping", session.id());
                if let Err(e) = service.send_to(session, message) {
                    debug!("[{}] Ping echo failed: {}", session.id(), e);
                }
            }
            Some(GameMessage::Send) => {
                info!(
                    "[{}] Sent {} byte(s): {}",
                    session.id(),
                    message.payload().len(),
                    String::from_utf8_lossy(message.payload())
                );
            }
            Some(GameMessage::Broadcast) => self.relay_broadcast(service, session, message),
            _ => warn!("[{}] Unexpected message {}", session.id(), message),
        }
    }

    fn on_tick_rate_measured(&self, service: &Service, rate: u64) {
        debug!(
            "📊 {} ticks/s | {} session(s) | {} pending",
            rate,
            service.session_count(),
            service.pending_messages()
        );
    }
}
