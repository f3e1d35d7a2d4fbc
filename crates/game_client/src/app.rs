//! Ping client behaviour and the manual tick loop that drives it.

use anyhow::{bail, Result};
use game_net::{Client, Message, Service, ServiceHandler, Session};
use game_server::GameMessage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Microseconds since the Unix epoch.
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_micros() as u64)
        .unwrap_or_default()
}

/// A ping stamped with the current time.
pub fn ping_message() -> Message {
    let mut message = Message::new(GameMessage::Ping.id());
    message.push(&now_micros());
    message
}

/// What the client has observed so far.
#[derive(Debug, Default)]
pub struct PingStats {
    accepted: AtomicBool,
    denied: AtomicBool,
    broadcasts: AtomicU64,
    round_trips: Mutex<Vec<Duration>>,
}

impl PingStats {
    pub fn is_accepted(&self) -> bool {
        self.accepted.load(Ordering::Acquire)
    }

    pub fn is_denied(&self) -> bool {
        self.denied.load(Ordering::Acquire)
    }

    pub fn answered(&self) -> usize {
        self.round_trips.lock().len()
    }

    pub fn broadcasts(&self) -> u64 {
        self.broadcasts.load(Ordering::Relaxed)
    }

    pub fn round_trips(&self) -> Vec<Duration> {
        self.round_trips.lock().clone()
    }

    pub fn average_round_trip(&self) -> Option<Duration> {
        let round_trips = self.round_trips.lock();
        let count = u32::try_from(round_trips.len()).ok().filter(|n| *n > 0)?;
        Some(round_trips.iter().sum::<Duration>() / count)
    }
}

/// Records server replies into shared [`PingStats`].
#[derive(Debug, Clone)]
pub struct PingClientHandler {
    stats: Arc<PingStats>,
}

impl PingClientHandler {
    pub fn new(stats: Arc<PingStats>) -> Self {
        Self { stats }
    }
}

impl ServiceHandler for PingClientHandler {
    fn on_session_unregistered(&self, _service: &Service, session: &Arc<Session>) {
        info!("Disconnected from {}", session.endpoint());
    }

    fn on_message_received(
        &self,
        _service: &Service,
        _session: Option<&Arc<Session>>,
        mut message: Message,
    ) {
        match GameMessage::from_id(message.id()) {
            Some(GameMessage::Accept) => {
                info!("✅ Server accepted the connection");
                self.stats.accepted.store(true, Ordering::Release);
            }
            Some(GameMessage::Deny) => {
                warn!("Server denied the connection");
                self.stats.denied.store(true, Ordering::Release);
            }
            Some(GameMessage::Ping) => match message.pop::<u64>() {
                Ok(sent) => {
                    let round_trip = Duration::from_micros(now_micros().saturating_sub(sent));
                    info!("🏓 Ping: {:.3}ms", round_trip.as_secs_f64() * 1000.0);
                    self.stats.round_trips.lock().push(round_trip);
                }
                Err(e) => warn!("Malformed ping echo: {}", e),
            },
            Some(GameMessage::Broadcast) => {
                self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
                match message.pop::<u32>() {
                    Ok(sender) => info!("📢 Broadcast from session {}", sender),
                    Err(e) => warn!("Malformed broadcast: {}", e),
                }
            }
            _ => debug!("Ignoring {}", message),
        }
    }
}

/// Pumps `client` until `pings` echoes are back, sending one ping every
/// `interval` once the server has accepted the session.
///
/// Returns the number of answered pings. Fails if the server denies the
/// session, the connection drops early, or nothing completes in time.
pub fn run_pings(
    client: &Client,
    stats: &PingStats,
    pings: usize,
    interval: Duration,
) -> Result<usize> {
    let deadline = Instant::now() + interval * pings as u32 + Duration::from_secs(5);
    let mut sent = 0;
    let mut next_ping = Instant::now();

    while stats.answered() < pings {
        client.tick();

        if stats.is_denied() {
            bail!("server denied the session");
        }
        if !client.is_connected() {
            bail!("connection closed after {} of {} pings", stats.answered(), pings);
        }
        if Instant::now() >= deadline {
            bail!("timed out after {} of {} pings", stats.answered(), pings);
        }

        if stats.is_accepted() && sent < pings && Instant::now() >= next_ping {
            client.send(ping_message())?;
            sent += 1;
            next_ping = Instant::now() + interval;
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    Ok(stats.answered())
}
