//! Per-connection read and write state machines.
//!
//! A [`Session`] is created around an already connected socket and does no I/O
//! until it is armed. From then on two independent loops run on the worker
//! pool:
//!
//! * the **read loop** reads one header, then exactly the payload the header
//!   announces, hands the finished message to the shared inbound queue, and
//!   starts over;
//! * the **write loop** is spawned on demand by [`Session::send`] when no
//!   write is in flight, writes queued messages one at a time (header, then
//!   payload) and goes idle once the queue is empty.
//!
//! Any I/O error on either loop closes the session. Every spawned loop holds
//! a strong `Arc<Session>`, so the session outlives the registry entry until
//! its last in-flight completion has finished.

use crate::error::{NetError, Result};
use crate::inbound::InboundQueue;
use crate::message::{Message, MessageHeader, OwnedMessage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Registry-assigned session identifier. Unique per service, never reused.
pub type SessionId = u32;

/// Which side of the connection created the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Owner {
    /// Accepted by a server; inbound messages carry a back-reference.
    Server,
    /// Connected by a client; the single peer is implied.
    Client,
}

/// Lifecycle of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    Created = 0,
    Registered = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Created,
            1 => SessionState::Registered,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Invoked once, after the socket has been released.
pub(crate) type CloseHook = Arc<dyn Fn(Arc<Session>) + Send + Sync>;

/// What a session borrows from the service that created it.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub handle: Handle,
    pub inbound: Arc<InboundQueue>,
    pub max_frame_size: usize,
    pub nodelay: bool,
    pub on_close: CloseHook,
}

#[derive(Default)]
struct Outbound {
    queue: VecDeque<Message>,
    writing: bool,
    /// Set by `close`; nothing is queued afterwards.
    closed: bool,
}

/// One peer connection and its I/O state machines.
pub struct Session {
    id: SessionId,
    endpoint: SocketAddr,
    owner: Owner,
    state: AtomicU8,
    handle: Handle,
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    outbound: Mutex<Outbound>,
    inbound: Arc<InboundQueue>,
    max_frame_size: usize,
    close_signal: watch::Sender<bool>,
    on_close: CloseHook,
}

impl Session {
    /// Wraps a connected stream. The session is not reading or writing yet.
    pub(crate) fn new(
        id: SessionId,
        stream: TcpStream,
        owner: Owner,
        context: SessionContext,
    ) -> Result<Arc<Self>> {
        let endpoint = stream.peer_addr()?;
        if context.nodelay {
            stream.set_nodelay(true)?;
        }
        let (reader, writer) = stream.into_split();
        let (close_signal, _) = watch::channel(false);

        Ok(Arc::new(Self {
            id,
            endpoint,
            owner,
            state: AtomicU8::new(SessionState::Created as u8),
            handle: context.handle,
            reader: Mutex::new(Some(reader)),
            writer: tokio::sync::Mutex::new(Some(writer)),
            outbound: Mutex::new(Outbound::default()),
            inbound: context.inbound,
            max_frame_size: context.max_frame_size,
            close_signal,
            on_close: context.on_close,
        }))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Remote address captured when the connection was made.
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True until the session starts closing.
    pub fn is_connected(&self) -> bool {
        self.state() < SessionState::Closing
    }

    /// Whether a write is currently in flight.
    pub fn is_writing(&self) -> bool {
        self.outbound.lock().writing
    }

    /// Messages queued behind the in-flight write.
    pub fn pending_sends(&self) -> usize {
        self.outbound.lock().queue.len()
    }

    /// Queues `message` for transmission.
    ///
    /// Messages go out in the order `send` was called. If no write is in
    /// flight a write loop is started; otherwise the running loop picks the
    /// message up once everything ahead of it has been written.
    pub fn send(self: &Arc<Self>, message: Message) -> Result<()> {
        if message.size() > self.max_frame_size {
            return Err(NetError::FrameTooLarge {
                size: message.size(),
                max: self.max_frame_size,
            });
        }
        let start_writer = {
            let mut outbound = self.outbound.lock();
            if outbound.closed || !self.is_connected() {
                return Err(NetError::SessionClosed(self.id));
            }
            outbound.queue.push_back(message);
            !std::mem::replace(&mut outbound.writing, true)
        };
        if start_writer {
            let session = Arc::clone(self);
            self.handle.spawn(session.write_loop());
        }
        Ok(())
    }

    /// Arms the read loop. Only the first call has an effect.
    pub fn start_reading(self: &Arc<Self>) {
        let Some(reader) = self.reader.lock().take() else {
            return;
        };
        let session = Arc::clone(self);
        self.handle.spawn(session.read_loop(reader));
    }

    /// Starts closing the session. Calls after the first are no-ops.
    ///
    /// Both loops are told to stop, the socket is released, and then the close
    /// hook runs exactly once.
    pub fn close(self: &Arc<Self>) {
        if !self.begin_closing() {
            return;
        }
        debug!("[{}] Closing session {}", self.id, self.endpoint);

        {
            let mut outbound = self.outbound.lock();
            outbound.closed = true;
            outbound.queue.clear();
        }
        self.close_signal.send_replace(true);

        let session = Arc::clone(self);
        self.handle.spawn(async move {
            if let Some(mut writer) = session.writer.lock().await.take() {
                let _ = writer.shutdown().await;
            }
            session.reader.lock().take();
            session
                .state
                .store(SessionState::Closed as u8, Ordering::Release);
            (session.on_close)(Arc::clone(&session));
        });
    }

    /// Created -> Registered. Fails if the session already started closing.
    pub(crate) fn mark_registered(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Created as u8,
                SessionState::Registered as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn begin_closing(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= SessionState::Closing as u8 {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                SessionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn back_reference(self: &Arc<Self>) -> Option<Weak<Session>> {
        match self.owner {
            Owner::Server => Some(Arc::downgrade(self)),
            Owner::Client => None,
        }
    }

    async fn read_loop(self: Arc<Self>, mut reader: OwnedReadHalf) {
        let mut closed = self.close_signal.subscribe();

        loop {
            let result = tokio::select! {
                result = self.read_message(&mut reader) => result,
                _ = closed.wait_for(|closed| *closed) => return,
            };

            match result {
                Ok(message) => {
                    trace!("[{}] Received {}", self.id, message);
                    self.inbound
                        .push(OwnedMessage::new(self.back_reference(), message));
                }
                Err(e) => {
                    debug!("[{}] Read failed: {}", self.id, e);
                    break;
                }
            }
        }

        drop(reader);
        self.close();
    }

    async fn read_message(&self, reader: &mut OwnedReadHalf) -> Result<Message> {
        let mut raw = [0u8; MessageHeader::SIZE];
        reader.read_exact(&mut raw).await?;
        let header = MessageHeader::from_bytes(&raw);

        let payload_len = header
            .payload_len()
            .filter(|_| header.size as usize <= self.max_frame_size)
            .ok_or(NetError::InvalidFrame { size: header.size })?;

        let mut payload = vec![0u8; payload_len];
        if payload_len > 0 {
            reader.read_exact(&mut payload).await?;
        }
        Ok(Message::from_parts(header.id, payload))
    }

    async fn write_loop(self: Arc<Self>) {
        let mut closed = self.close_signal.subscribe();
        let mut writer = self.writer.lock().await;

        loop {
            let next = {
                let mut outbound = self.outbound.lock();
                match outbound.queue.pop_front() {
                    Some(message) => message,
                    None => {
                        outbound.writing = false;
                        return;
                    }
                }
            };
            let Some(stream) = writer.as_mut() else {
                self.outbound.lock().writing = false;
                return;
            };

            let result = tokio::select! {
                biased;
                _ = closed.wait_for(|closed| *closed) => {
                    self.outbound.lock().writing = false;
                    return;
                }
                result = Self::write_message(stream, &next) => result,
            };

            if let Err(e) = result {
                debug!("[{}] Write failed: {}", self.id, e);
                self.outbound.lock().writing = false;
                drop(writer);
                self.close();
                return;
            }
            trace!("[{}] Sent {}", self.id, next);
        }
    }

    async fn write_message(stream: &mut OwnedWriteHalf, message: &Message) -> std::io::Result<()> {
        stream.write_all(message.header().as_bytes()).await?;
        if !message.is_empty() {
            stream.write_all(message.payload()).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("owner", &self.owner)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::net::TcpListener;

    struct Harness {
        session: Arc<Session>,
        peer: TcpStream,
        inbound: Arc<InboundQueue>,
        closes: Arc<AtomicUsize>,
    }

    async fn harness(owner: Owner, max_frame_size: usize) -> Harness {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (peer, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (stream, _) = accepted.unwrap();

        let inbound = Arc::new(InboundQueue::new());
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = closes.clone();
        let context = SessionContext {
            handle: Handle::current(),
            inbound: inbound.clone(),
            max_frame_size,
            nodelay: true,
            on_close: Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        };

        Harness {
            session: Session::new(10000, stream, owner, context).unwrap(),
            peer: peer.unwrap(),
            inbound,
            closes,
        }
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    async fn read_frame(peer: &mut TcpStream) -> Message {
        let mut raw = [0u8; MessageHeader::SIZE];
        peer.read_exact(&mut raw).await.unwrap();
        let header = MessageHeader::from_bytes(&raw);
        let mut payload = vec![0u8; header.payload_len().unwrap()];
        peer.read_exact(&mut payload).await.unwrap();
        Message::from_parts(header.id, payload)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sends_arrive_in_call_order() {
        let mut h = harness(Owner::Server, 1 << 20).await;

        for i in 0..200u32 {
            let mut message = Message::new(i);
            // Odd messages carry no payload to exercise the header-only path.
            if i % 2 == 0 {
                message.push(&(i as u64 * 3));
            }
            h.session.send(message).unwrap();
        }

        for i in 0..200u32 {
            let mut frame = read_frame(&mut h.peer).await;
            assert_eq!(frame.id(), i);
            if i % 2 == 0 {
                assert_eq!(frame.pop::<u64>().unwrap(), i as u64 * 3);
            } else {
                assert!(frame.is_empty());
            }
        }

        eventually(|| !h.session.is_writing()).await;
        assert_eq!(h.session.pending_sends(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_senders_never_interleave_frames() {
        let mut h = harness(Owner::Server, 1 << 20).await;

        let senders: Vec<_> = (0..4u32)
            .map(|sender| {
                let session = h.session.clone();
                tokio::spawn(async move {
                    for seq in 0..50u32 {
                        let mut message = Message::new(sender);
                        message.push_bytes(&[sender as u8; 64]).push(&seq);
                        session.send(message).unwrap();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for sender in senders {
            sender.await.unwrap();
        }

        let mut next_seq = [0u32; 4];
        for _ in 0..200 {
            let mut frame = read_frame(&mut h.peer).await;
            let sender = frame.id() as usize;
            assert_eq!(frame.pop::<u32>().unwrap(), next_seq[sender]);
            assert_eq!(frame.payload(), &[sender as u8; 64][..]);
            next_seq[sender] += 1;
        }
        assert_eq!(next_seq, [50; 4]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_read_loop_queues_whole_messages() {
        let mut h = harness(Owner::Server, 1 << 20).await;
        h.session.start_reading();
        h.session.start_reading();

        let mut first = Message::new(7);
        first.push(&1.5f32);
        let second = Message::new(8);
        for message in [&first, &second] {
            h.peer.write_all(message.header().as_bytes()).await.unwrap();
            h.peer.write_all(message.payload()).await.unwrap();
        }

        eventually(|| h.inbound.len() == 2).await;
        let batch = h.inbound.drain(0);
        assert_eq!(batch[0].message, first);
        assert_eq!(batch[1].message, second);
        assert_eq!(batch[0].owner().unwrap().id(), 10000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_client_sessions_leave_owner_empty() {
        let mut h = harness(Owner::Client, 1 << 20).await;
        h.session.start_reading();

        let message = Message::new(1);
        h.peer.write_all(message.header().as_bytes()).await.unwrap();

        eventually(|| h.inbound.len() == 1).await;
        assert!(h.inbound.drain(0)[0].owner().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_truncated_frame_is_never_delivered() {
        let mut h = harness(Owner::Server, 1 << 20).await;
        h.session.start_reading();

        let header = MessageHeader { id: 3, size: 64 };
        h.peer.write_all(header.as_bytes()).await.unwrap();
        h.peer.write_all(&[0u8; 10]).await.unwrap();
        drop(h.peer);

        eventually(|| h.closes.load(Ordering::SeqCst) == 1).await;
        assert!(h.inbound.is_empty());
        assert_eq!(h.session.state(), SessionState::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_undersized_and_oversized_headers_close_the_session() {
        for size in [3u32, 4096] {
            let mut h = harness(Owner::Server, 1024).await;
            h.session.start_reading();

            let header = MessageHeader { id: 1, size };
            h.peer.write_all(header.as_bytes()).await.unwrap();

            eventually(|| h.closes.load(Ordering::SeqCst) == 1).await;
            assert!(h.inbound.is_empty());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_close_is_idempotent() {
        let h = harness(Owner::Server, 1 << 20).await;
        h.session.start_reading();

        let closers: Vec<_> = (0..8)
            .map(|_| {
                let session = h.session.clone();
                tokio::spawn(async move { session.close() })
            })
            .collect();
        for closer in closers {
            closer.await.unwrap();
        }
        h.session.close();

        eventually(|| h.session.state() == SessionState::Closed).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_peer_sees_eof_after_close() {
        let mut h = harness(Owner::Server, 1 << 20).await;
        h.session.close();

        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(2), h.peer.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_send_racing_close_strands_nothing() {
        for _ in 0..20 {
            let h = harness(Owner::Server, 1 << 20).await;
            let session = h.session.clone();
            let sender = tokio::spawn(async move {
                for id in 0..500u32 {
                    if session.send(Message::new(id)).is_err() {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
            });

            tokio::task::yield_now().await;
            h.session.close();
            sender.await.unwrap();

            assert_eq!(h.session.pending_sends(), 0);
            assert!(h.session.send(Message::new(1)).is_err());
            eventually(|| !h.session.is_writing()).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_send_rejections() {
        let h = harness(Owner::Server, 64).await;

        let mut big = Message::new(1);
        big.push_bytes(&[0u8; 128]);
        assert!(matches!(
            h.session.send(big),
            Err(NetError::FrameTooLarge { size: 136, max: 64 })
        ));

        h.session.close();
        assert!(!h.session.is_connected());
        assert!(matches!(
            h.session.send(Message::new(1)),
            Err(NetError::SessionClosed(10000))
        ));
        assert!(!h.session.mark_registered());
    }
}
