//! Session registry.
//!
//! All membership changes and broadcast sweeps are commands processed by a
//! single task, so they are serialized with respect to each other without a
//! lock around the set. Lifecycle callbacks run inside that task as well.

use crate::message::Message;
use crate::service::{Service, WeakService};
use crate::session::{Session, SessionId, SessionState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// First identifier handed out by a registry.
pub const FIRST_SESSION_ID: SessionId = 10000;

pub(crate) enum RegistryCommand {
    /// Make the session visible and arm its read loop.
    Register(Arc<Session>),
    /// Remove the session once its socket is released, closing it first if
    /// needed.
    Unregister(Arc<Session>),
    Broadcast {
        message: Message,
        exclude: Option<SessionId>,
    },
    Lookup(SessionId, oneshot::Sender<Option<Arc<Session>>>),
    Snapshot(oneshot::Sender<Vec<Arc<Session>>>),
    /// Close and remove every session; replies once the last one is gone.
    CloseAll(oneshot::Sender<()>),
}

/// Handle to the registry task, plus the pieces of registry state that are
/// safe to read from any thread.
#[derive(Debug)]
pub(crate) struct SessionRegistry {
    commands: mpsc::UnboundedSender<RegistryCommand>,
    next_id: AtomicU32,
    registered: Arc<AtomicUsize>,
}

impl SessionRegistry {
    pub fn new() -> (Self, RegistryInbox) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let registered = Arc::new(AtomicUsize::new(0));
        let registry = Self {
            commands,
            next_id: AtomicU32::new(FIRST_SESSION_ID),
            registered: registered.clone(),
        };
        (
            registry,
            RegistryInbox {
                receiver,
                registered,
            },
        )
    }

    /// Allocates the next identifier. Identifiers are never reused.
    pub fn next_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.registered.load(Ordering::Acquire)
    }

    /// Queues a command. Returns false once the registry task is gone.
    pub fn submit(&self, command: RegistryCommand) -> bool {
        self.commands.send(command).is_ok()
    }
}

/// Receiving half, moved into the registry task.
pub(crate) struct RegistryInbox {
    receiver: mpsc::UnboundedReceiver<RegistryCommand>,
    registered: Arc<AtomicUsize>,
}

impl RegistryInbox {
    /// Runs until the owning service is gone.
    ///
    /// A session leaves the map only once it is `Closed`, so the unregister
    /// callback always follows the socket release. Sessions still closing are
    /// removed when their close hook submits `Unregister`.
    pub async fn run(mut self, service: WeakService, max_connections: usize) {
        let mut sessions: HashMap<SessionId, Arc<Session>> = HashMap::new();
        let mut drained: Vec<oneshot::Sender<()>> = Vec::new();
        let mut draining = false;

        while let Some(command) = self.receiver.recv().await {
            let Some(service) = service.upgrade() else {
                break;
            };
            match command {
                RegistryCommand::Register(session) => {
                    if draining {
                        debug!("Registry draining, dropping session {}", session.id());
                        session.close();
                        continue;
                    }
                    if sessions.len() >= max_connections {
                        warn!(
                            "Connection limit ({}) reached, dropping session {}",
                            max_connections,
                            session.id()
                        );
                        session.close();
                        continue;
                    }
                    if !session.mark_registered() {
                        debug!("Session {} closed before registration", session.id());
                        continue;
                    }
                    sessions.insert(session.id(), session.clone());
                    self.registered.store(sessions.len(), Ordering::Release);
                    info!(
                        "Session {} registered: {}",
                        session.id(),
                        session.endpoint()
                    );
                    service.handler().on_session_registered(&service, &session);
                    session.start_reading();
                }
                RegistryCommand::Unregister(session) => {
                    self.evict(&mut sessions, &service, &session);
                }
                RegistryCommand::Broadcast { message, exclude } => {
                    let mut dead = Vec::new();
                    for (id, session) in &sessions {
                        if Some(*id) == exclude {
                            continue;
                        }
                        if session.send(message.clone()).is_err() {
                            dead.push(session.clone());
                        }
                    }
                    for session in dead {
                        self.evict(&mut sessions, &service, &session);
                    }
                }
                RegistryCommand::Lookup(id, reply) => {
                    let _ = reply.send(sessions.get(&id).cloned());
                }
                RegistryCommand::Snapshot(reply) => {
                    let _ = reply.send(sessions.values().cloned().collect());
                }
                RegistryCommand::CloseAll(reply) => {
                    draining = true;
                    drained.push(reply);
                    let all: Vec<Arc<Session>> = sessions.values().cloned().collect();
                    for session in all {
                        self.evict(&mut sessions, &service, &session);
                    }
                }
            }

            if sessions.is_empty() {
                for reply in drained.drain(..) {
                    let _ = reply.send(());
                }
            }
        }

        debug!("Session registry stopped");
    }

    /// Closes `session` and removes it if its socket is already released.
    fn evict(
        &self,
        sessions: &mut HashMap<SessionId, Arc<Session>>,
        service: &Service,
        session: &Arc<Session>,
    ) {
        session.close();
        if session.state() != SessionState::Closed {
            return;
        }
        let Some(session) = sessions.remove(&session.id()) else {
            return;
        };
        self.registered.store(sessions.len(), Ordering::Release);
        info!("Session {} unregistered", session.id());
        service.handler().on_session_unregistered(service, &session);
    }
}
