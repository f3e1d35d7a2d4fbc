//! The service core shared by servers and clients.
//!
//! A [`Service`] owns the worker pool, the session registry, the inbound
//! queue and the tick machinery. [`Server`](crate::Server) and
//! [`Client`](crate::Client) are thin front-ends that feed it connected
//! sockets.

use crate::config::{ServiceConfig, TickMode};
use crate::error::{NetError, Result};
use crate::handler::ServiceHandler;
use crate::inbound::InboundQueue;
use crate::message::{Message, MessageHeader};
use crate::pool::WorkerPool;
use crate::registry::{RegistryCommand, SessionRegistry};
use crate::session::{Owner, Session, SessionContext, SessionId};
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::Cell;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, trace, warn};

/// Cheap, cloneable handle to a running service.
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: ServiceConfig,
    pool: WorkerPool,
    registry: SessionRegistry,
    inbound: Arc<InboundQueue>,
    handler: Arc<dyn ServiceHandler>,
    /// The client's one peer, used when a message carries no back-reference.
    peer: Mutex<Option<Arc<Session>>>,
    /// Held for the whole drain-and-dispatch of a tick. The flag is set while
    /// a tick runs so a handler ticking its own service is turned away.
    tick_lane: ReentrantMutex<Cell<bool>>,
    ticks: AtomicU64,
    tick_rate: AtomicU64,
    shutdown: watch::Sender<bool>,
    stopped: AtomicBool,
}

/// Non-owning handle held by the service's own background tasks.
#[derive(Clone)]
pub(crate) struct WeakService(Weak<ServiceInner>);

impl WeakService {
    pub fn upgrade(&self) -> Option<Service> {
        self.0.upgrade().map(|inner| Service { inner })
    }
}

impl Service {
    /// Builds the pool and starts the registry, tick loop and tick-rate
    /// sampler. No sockets are involved yet.
    pub(crate) fn new(mut config: ServiceConfig, handler: Arc<dyn ServiceHandler>) -> Result<Self> {
        // A header cannot describe anything larger.
        config.max_frame_size = config.max_frame_size.min(MessageHeader::MAX_FRAME_SIZE);
        let pool = WorkerPool::new(config.worker_threads, config.shutdown_timeout)?;
        let (registry, inbox) = SessionRegistry::new();
        let (shutdown, _) = watch::channel(false);

        let service = Service {
            inner: Arc::new(ServiceInner {
                config,
                pool,
                registry,
                inbound: Arc::new(InboundQueue::new()),
                handler,
                peer: Mutex::new(None),
                tick_lane: ReentrantMutex::new(Cell::new(false)),
                ticks: AtomicU64::new(0),
                tick_rate: AtomicU64::new(0),
                shutdown,
                stopped: AtomicBool::new(false),
            }),
        };

        let config = &service.inner.config;
        service.spawn(inbox.run(service.downgrade(), config.max_connections));
        if let TickMode::Auto { interval } = config.tick_mode {
            service.spawn(run_ticks(service.downgrade(), interval, service.shutdown_signal()));
        }
        if config.measure_tick_rate {
            service.spawn(sample_tick_rate(service.downgrade(), service.shutdown_signal()));
        }

        debug!(
            "Service started: {} worker(s), tick mode {:?}",
            service.inner.pool.workers(),
            config.tick_mode
        );
        Ok(service)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// Queues `message` on `session`. A session found closed is evicted from
    /// the registry and the message is discarded.
    pub fn send_to(&self, session: &Arc<Session>, message: Message) -> Result<()> {
        if !session.is_connected() {
            self.evict(session);
            return Err(NetError::SessionClosed(session.id()));
        }
        session.send(message)
    }

    /// Queues a copy of `message` on every registered session except
    /// `exclude`. Dead sessions met during the sweep are evicted.
    pub fn broadcast(&self, message: Message, exclude: Option<&Arc<Session>>) -> Result<()> {
        if message.size() > self.inner.config.max_frame_size {
            return Err(NetError::FrameTooLarge {
                size: message.size(),
                max: self.inner.config.max_frame_size,
            });
        }
        let command = RegistryCommand::Broadcast {
            message,
            exclude: exclude.map(|session| session.id()),
        };
        if self.inner.registry.submit(command) {
            Ok(())
        } else {
            Err(NetError::Stopped)
        }
    }

    /// Closes `session`; it unregisters once its socket is released.
    pub fn disconnect(&self, session: &Arc<Session>) {
        session.close();
    }

    /// Drains one batch of inbound messages and dispatches each to the
    /// handler, in arrival order.
    ///
    /// Returns what `on_tick_continue` answered, or false once stopped. Ticks
    /// never overlap: a caller arriving mid-tick waits for it to finish. A
    /// handler calling `tick` on its own service gets `false` back at once.
    pub fn tick(&self) -> bool {
        if self.is_stopped() {
            return false;
        }
        let lane = self.inner.tick_lane.lock();
        self.tick_in_lane(&lane)
    }

    /// Ticks unless another tick holds the lane. Used by the auto tick loop,
    /// which must not park a worker.
    fn try_tick(&self) -> Option<bool> {
        if self.is_stopped() {
            return Some(false);
        }
        let lane = self.inner.tick_lane.try_lock()?;
        Some(self.tick_in_lane(&lane))
    }

    fn tick_in_lane(&self, ticking: &Cell<bool>) -> bool {
        if ticking.replace(true) {
            warn!("tick() called from inside a tick of the same service");
            return false;
        }
        let _ticking = TickGuard(ticking);

        let batch = self
            .inner
            .inbound
            .drain(self.inner.config.max_messages_per_tick);
        for owned in batch {
            let session = owned.owner().or_else(|| self.peer());
            self.inner
                .handler
                .on_message_received(self, session.as_ref(), owned.message);
        }

        self.inner.ticks.fetch_add(1, Ordering::Relaxed);
        self.inner.handler.on_tick_continue(self)
    }

    /// Ticks completed in the last full second of sampling.
    pub fn tick_rate(&self) -> u64 {
        self.inner.tick_rate.load(Ordering::Relaxed)
    }

    /// Messages waiting for the next tick.
    pub fn pending_messages(&self) -> usize {
        self.inner.inbound.len()
    }

    pub fn session_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Snapshot of the registered sessions.
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        let (reply, response) = oneshot::channel();
        if !self.inner.registry.submit(RegistryCommand::Snapshot(reply)) {
            return Vec::new();
        }
        response.await.unwrap_or_default()
    }

    pub async fn session(&self, id: SessionId) -> Option<Arc<Session>> {
        let (reply, response) = oneshot::channel();
        if !self.inner.registry.submit(RegistryCommand::Lookup(id, reply)) {
            return None;
        }
        response.await.ok().flatten()
    }

    /// Runs `future` on the worker pool, blocking the calling thread.
    ///
    /// Must not be called from inside a handler or any other pool task.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.inner.pool.block_on(future)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Stops accepting, closes every session and joins the workers.
    ///
    /// Safe to call more than once, from any thread, handlers included. Waits
    /// up to `shutdown_timeout` for every registered session to be closed and
    /// reported as unregistered before the workers go away.
    ///
    /// Lifecycle callbacks run in the registry task, so a `stop` issued from
    /// one of them cannot be served and only returns after the timeout.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Stopping service");
        self.inner.shutdown.send_replace(true);

        let (reply, done) = oneshot::channel();
        if self.inner.registry.submit(RegistryCommand::CloseAll(reply)) {
            self.wait_for_close_all(done);
        }

        self.inner.peer.lock().take();
        self.inner.pool.shutdown();
        info!("Service stopped");
    }

    pub(crate) fn handler(&self) -> &dyn ServiceHandler {
        self.inner.handler.as_ref()
    }

    pub(crate) fn handle(&self) -> &Handle {
        self.inner.pool.handle()
    }

    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.pool.spawn(future);
    }

    pub(crate) fn downgrade(&self) -> WeakService {
        WeakService(Arc::downgrade(&self.inner))
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    pub(crate) fn set_peer(&self, session: Arc<Session>) {
        *self.inner.peer.lock() = Some(session);
    }

    fn peer(&self) -> Option<Arc<Session>> {
        self.inner.peer.lock().clone()
    }

    /// Wraps a freshly connected socket in a session bound to this service.
    pub(crate) fn create_session(&self, stream: TcpStream, owner: Owner) -> Result<Arc<Session>> {
        let service = self.downgrade();
        let context = SessionContext {
            handle: self.handle().clone(),
            inbound: self.inner.inbound.clone(),
            max_frame_size: self.inner.config.max_frame_size,
            nodelay: self.inner.config.nodelay,
            on_close: Arc::new(move |session: Arc<Session>| {
                if let Some(service) = service.upgrade() {
                    service
                        .inner
                        .registry
                        .submit(RegistryCommand::Unregister(session));
                }
            }),
        };
        Session::new(self.inner.registry.next_id(), stream, owner, context)
    }

    /// Runs the admission gate and hands an accepted session to the
    /// registry. A refused session is closed and never becomes visible.
    pub(crate) fn admit(&self, session: Arc<Session>) -> bool {
        info!("Session {} created: {}", session.id(), session.endpoint());

        if self.session_count() >= self.inner.config.max_connections {
            warn!(
                "Connection limit ({}) reached, rejecting {}",
                self.inner.config.max_connections,
                session.endpoint()
            );
            session.close();
            return false;
        }
        if !self.inner.handler.on_session_connected(self, &session) {
            info!("Session {} denied by handler", session.id());
            session.close();
            return false;
        }
        self.inner
            .registry
            .submit(RegistryCommand::Register(session))
    }

    fn wait_for_close_all(&self, done: oneshot::Receiver<()>) {
        let timeout = self.inner.config.shutdown_timeout;
        let pool = &self.inner.pool;
        let wait = move || pool.block_on(async { tokio::time::timeout(timeout, done).await });

        let finished = match Handle::try_current() {
            Err(_) => wait().is_ok(),
            Ok(current) => {
                // A runtime thread cannot block on the pool itself; park a
                // helper thread instead, and on a multi-thread runtime hand
                // this worker's queue to another thread while waiting.
                let on_helper = || {
                    std::thread::scope(|scope| {
                        scope
                            .spawn(wait)
                            .join()
                            .map(|waited| waited.is_ok())
                            .unwrap_or(false)
                    })
                };
                if current.runtime_flavor() == RuntimeFlavor::MultiThread {
                    tokio::task::block_in_place(on_helper)
                } else {
                    on_helper()
                }
            }
        };
        if !finished {
            warn!("Timed out closing sessions after {:?}", timeout);
        }
    }

    fn evict(&self, session: &Arc<Session>) {
        self.inner
            .registry
            .submit(RegistryCommand::Unregister(session.clone()));
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("pool", &self.inner.pool)
            .field("sessions", &self.session_count())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Clears the in-tick flag even if a handler panics.
struct TickGuard<'a>(&'a Cell<bool>);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

async fn run_ticks(service: WeakService, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = (!interval.is_zero()).then(|| tokio::time::interval(interval));

    loop {
        match ticker.as_mut() {
            Some(ticker) => {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.wait_for(|stopped| *stopped) => break,
                }
            }
            None => {
                if *shutdown.borrow() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        }

        let Some(service) = service.upgrade() else {
            break;
        };
        match service.try_tick() {
            Some(true) => {}
            Some(false) => {
                info!("Tick loop finished");
                break;
            }
            None => trace!("Tick lane busy, skipping cycle"),
        }
    }
}

async fn sample_tick_rate(service: WeakService, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    // The first tick of an interval completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.wait_for(|stopped| *stopped) => break,
        }
        let Some(service) = service.upgrade() else {
            break;
        };
        let rate = service.inner.ticks.swap(0, Ordering::Relaxed);
        service.inner.tick_rate.store(rate, Ordering::Relaxed);
        debug!("Tick rate: {}/s", rate);
        service.handler().on_tick_rate_measured(&service, rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::OwnedMessage;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        received: AtomicUsize,
        without_session: AtomicUsize,
        keep_ticking: AtomicBool,
        /// Tick the service again from inside dispatch.
        reenter: AtomicBool,
        nested_ticks: Mutex<Vec<bool>>,
    }

    impl ServiceHandler for Arc<Counting> {
        fn on_message_received(
            &self,
            service: &Service,
            session: Option<&Arc<Session>>,
            _message: Message,
        ) {
            if self.reenter.load(Ordering::SeqCst) {
                self.nested_ticks.lock().push(service.tick());
            }
            self.received.fetch_add(1, Ordering::SeqCst);
            if session.is_none() {
                self.without_session.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_tick_continue(&self, _service: &Service) -> bool {
            self.keep_ticking.load(Ordering::SeqCst)
        }
    }

    fn counting_service(config: ServiceConfig) -> (Service, Arc<Counting>) {
        let counting = Arc::new(Counting::default());
        counting.keep_ticking.store(true, Ordering::SeqCst);
        let service = Service::new(config, Arc::new(counting.clone())).unwrap();
        (service, counting)
    }

    fn manual_service(max_per_tick: usize) -> (Service, Arc<Counting>) {
        counting_service(ServiceConfig {
            worker_threads: 1,
            max_messages_per_tick: max_per_tick,
            tick_mode: TickMode::Manual,
            measure_tick_rate: false,
            ..ServiceConfig::default()
        })
    }

    fn auto_service() -> (Service, Arc<Counting>) {
        counting_service(ServiceConfig {
            worker_threads: 1,
            tick_mode: TickMode::Auto {
                interval: Duration::from_millis(1),
            },
            measure_tick_rate: false,
            ..ServiceConfig::default()
        })
    }

    fn wait_for(counter: &AtomicUsize, expected: usize) {
        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) == expected {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("expected {expected}, got {}", counter.load(Ordering::SeqCst));
    }

    fn enqueue(service: &Service, count: u32) {
        for id in 0..count {
            service
                .inner
                .inbound
                .push(OwnedMessage::new(None, Message::new(id)));
        }
    }

    #[test]
    fn test_tick_dispatches_at_most_max_per_tick() {
        let (service, counting) = manual_service(3);
        enqueue(&service, 7);

        assert!(service.tick());
        assert_eq!(counting.received.load(Ordering::SeqCst), 3);
        assert_eq!(service.pending_messages(), 4);

        service.tick();
        service.tick();
        assert_eq!(counting.received.load(Ordering::SeqCst), 7);
        assert_eq!(service.pending_messages(), 0);
        service.stop();
    }

    #[test]
    fn test_unbounded_tick_drains_everything() {
        let (service, counting) = manual_service(0);
        enqueue(&service, 50);

        service.tick();
        assert_eq!(counting.received.load(Ordering::SeqCst), 50);
        assert_eq!(counting.without_session.load(Ordering::SeqCst), 50);
        service.stop();
    }

    #[test]
    fn test_tick_reports_handler_decision() {
        let (service, counting) = manual_service(0);
        assert!(service.tick());
        counting.keep_ticking.store(false, Ordering::SeqCst);
        assert!(!service.tick());
        service.stop();
    }

    #[test]
    fn test_tick_from_inside_a_tick_is_turned_away() {
        let (service, counting) = manual_service(0);
        counting.reenter.store(true, Ordering::SeqCst);
        enqueue(&service, 2);

        assert!(service.tick());
        assert_eq!(*counting.nested_ticks.lock(), vec![false, false]);
        assert_eq!(counting.received.load(Ordering::SeqCst), 2);

        counting.reenter.store(false, Ordering::SeqCst);
        enqueue(&service, 1);
        assert!(service.tick());
        assert_eq!(counting.received.load(Ordering::SeqCst), 3);
        service.stop();
    }

    #[test]
    fn test_auto_tick_keeps_running_with_reentrant_handler() {
        let (service, counting) = auto_service();
        counting.reenter.store(true, Ordering::SeqCst);

        enqueue(&service, 3);
        wait_for(&counting.received, 3);
        enqueue(&service, 2);
        wait_for(&counting.received, 5);
        assert!(counting.nested_ticks.lock().iter().all(|nested| !nested));
        service.stop();
    }

    #[test]
    fn test_auto_tick_skips_while_lane_is_held() {
        let (service, counting) = auto_service();
        let lane = service.inner.tick_lane.lock();
        enqueue(&service, 1);

        // With a single worker, a parked auto tick would starve this task.
        let spawned = service.handle().spawn(async {});
        let ran = service.block_on(async {
            tokio::time::timeout(Duration::from_secs(2), spawned).await
        });
        assert!(matches!(ran, Ok(Ok(()))));
        assert_eq!(counting.received.load(Ordering::SeqCst), 0);

        drop(lane);
        wait_for(&counting.received, 1);
        service.stop();
    }

    #[test]
    fn test_max_frame_size_is_capped_to_header_range() {
        let (service, _) = counting_service(ServiceConfig {
            worker_threads: 1,
            tick_mode: TickMode::Manual,
            measure_tick_rate: false,
            max_frame_size: usize::MAX,
            ..ServiceConfig::default()
        });
        assert_eq!(service.config().max_frame_size, MessageHeader::MAX_FRAME_SIZE);
        service.stop();
    }

    #[test]
    fn test_stop_is_idempotent_and_ends_ticking() {
        let (service, _) = manual_service(0);
        service.stop();
        service.stop();
        assert!(service.is_stopped());
        assert!(!service.tick());
        assert_eq!(service.session_count(), 0);
    }

    #[test]
    fn test_oversized_broadcast_is_refused() {
        let (service, _) = manual_service(0);
        let mut message = Message::new(1);
        message.push_bytes(&vec![0u8; service.config().max_frame_size]);

        assert!(matches!(
            service.broadcast(message, None),
            Err(NetError::FrameTooLarge { .. })
        ));
        service.stop();
    }

    #[test]
    fn test_sessions_empty_before_any_connection() {
        let (service, _) = manual_service(0);
        assert!(service.block_on(service.sessions()).is_empty());
        assert!(service.block_on(service.session(10000)).is_none());
        service.stop();
    }
}
