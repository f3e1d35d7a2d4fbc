//! Connecting front-end: resolves a host and opens a single session to it.

use crate::config::ClientConfig;
use crate::error::{NetError, Result};
use crate::handler::ServiceHandler;
use crate::message::Message;
use crate::service::Service;
use crate::session::{Owner, Session};
use std::sync::Arc;
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, info};

/// A client connected to one server. Dropping it stops the service.
#[derive(Debug)]
pub struct Client {
    service: Service,
    session: Arc<Session>,
}

impl Client {
    /// Resolves `config.host`, connects to the first endpoint that accepts,
    /// and registers the resulting session.
    ///
    /// Blocks the calling thread until connected; must not be called from
    /// inside an async context.
    pub fn connect<H: ServiceHandler>(config: ClientConfig, handler: H) -> Result<Self> {
        let service = Service::new(config.service.clone(), Arc::new(handler))?;

        match Self::open_session(&service, &config.target()) {
            Ok(session) => {
                info!("🔌 Connected to {} as session {}", session.endpoint(), session.id());
                Ok(Self { service, session })
            }
            Err(e) => {
                service.stop();
                Err(e)
            }
        }
    }

    fn open_session(service: &Service, target: &str) -> Result<Arc<Session>> {
        let stream = service.block_on(connect_stream(target))?;
        let session = service.create_session(stream, Owner::Client)?;
        service.set_peer(session.clone());

        if service.admit(session.clone()) {
            Ok(session)
        } else {
            Err(NetError::Rejected)
        }
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    /// The session to the server.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn send(&self, message: Message) -> Result<()> {
        self.service.send_to(&self.session, message)
    }

    /// Dispatches one batch of received messages; see [`Service::tick`].
    pub fn tick(&self) -> bool {
        self.service.tick()
    }

    pub fn stop(&self) {
        self.service.stop();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.service.stop();
    }
}

/// Tries every resolved endpoint in order until one accepts.
async fn connect_stream(target: &str) -> Result<TcpStream> {
    let endpoints = lookup_host(target)
        .await
        .map_err(|source| NetError::Resolve {
            target: target.to_string(),
            source,
        })?;

    for endpoint in endpoints {
        match TcpStream::connect(endpoint).await {
            Ok(stream) => return Ok(stream),
            Err(e) => debug!("Connect to {} failed: {}", endpoint, e),
        }
    }
    Err(NetError::Connect {
        target: target.to_string(),
    })
}
