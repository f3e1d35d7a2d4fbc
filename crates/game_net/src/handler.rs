//! The callback surface an application implements to drive a service.

use crate::message::Message;
use crate::service::Service;
use crate::session::Session;
use std::sync::Arc;

/// Application hooks invoked by a [`Service`].
///
/// Lifecycle hooks (`on_session_registered`, `on_session_unregistered`) run
/// inside the registry's serialization lane, so they never overlap each other
/// or a broadcast sweep. `on_message_received` and `on_tick_continue` run on
/// whichever thread is ticking. None of them may block: sending and
/// broadcasting from inside a hook only enqueue work.
pub trait ServiceHandler: Send + Sync + 'static {
    /// Admission gate for a freshly accepted or connected session. Returning
    /// `false` drops the connection before it becomes visible.
    fn on_session_connected(&self, _service: &Service, _session: &Arc<Session>) -> bool {
        true
    }

    /// The session is in the registry and its read loop is about to start.
    fn on_session_registered(&self, _service: &Service, _session: &Arc<Session>) {}

    /// The session left the registry. Called exactly once per registered
    /// session.
    fn on_session_unregistered(&self, _service: &Service, _session: &Arc<Session>) {}

    /// One drained inbound message. `session` is `None` if the sender has
    /// already been released.
    fn on_message_received(
        &self,
        service: &Service,
        session: Option<&Arc<Session>>,
        message: Message,
    );

    /// Asked after every tick; returning `false` stops automatic ticking.
    fn on_tick_continue(&self, _service: &Service) -> bool {
        true
    }

    /// Ticks completed during the last second.
    fn on_tick_rate_measured(&self, _service: &Service, _rate: u64) {}
}
