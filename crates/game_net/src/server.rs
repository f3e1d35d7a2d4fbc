//! Listening front-end: binds a socket and feeds accepted connections to the
//! service.

use crate::config::ServerConfig;
use crate::error::{NetError, Result};
use crate::handler::ServiceHandler;
use crate::service::{Service, WeakService};
use crate::session::Owner;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A running server. Dropping it stops the service.
#[derive(Debug)]
pub struct Server {
    service: Service,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds `config.bind_address`, starts the worker pool and begins
    /// accepting connections.
    pub fn start<H: ServiceHandler>(config: ServerConfig, handler: H) -> Result<Self> {
        let service = Service::new(config.service.clone(), Arc::new(handler))?;

        let listener = {
            // Registering the socket with the reactor needs the pool's context.
            let _guard = service.handle().enter();
            match bind_listener(&config) {
                Ok(listener) => listener,
                Err(e) => {
                    service.stop();
                    return Err(e);
                }
            }
        };
        let local_addr = listener.local_addr()?;

        service.spawn(accept_loop(
            service.downgrade(),
            listener,
            service.shutdown_signal(),
        ));
        info!("🚀 Server listening on {}", local_addr);

        Ok(Self {
            service,
            local_addr,
        })
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    /// The bound address; differs from the configured one when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(&self) {
        self.service.stop();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.service.stop();
    }
}

fn bind_listener(config: &ServerConfig) -> Result<TcpListener> {
    let addr = config.bind_address;
    let bind_error = |source| NetError::Bind { addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_error)?;
    socket.set_reuse_address(true).map_err(bind_error)?;
    socket.bind(&addr.into()).map_err(bind_error)?;
    socket
        .listen(config.service.listen_backlog)
        .map_err(bind_error)?;

    let std_listener: StdTcpListener = socket.into();
    std_listener.set_nonblocking(true).map_err(bind_error)?;
    TcpListener::from_std(std_listener).map_err(bind_error)
}

async fn accept_loop(
    service: WeakService,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.wait_for(|stopped| *stopped) => break,
        };
        let Some(service) = service.upgrade() else {
            break;
        };

        match accepted {
            Ok((stream, addr)) => {
                debug!("New connection from {}", addr);
                match service.create_session(stream, Owner::Server) {
                    Ok(session) => {
                        service.admit(session);
                    }
                    Err(e) => warn!("Failed to set up session for {}: {}", addr, e),
                }
            }
            // One failed accept never stops the listener.
            Err(e) => warn!("Failed to accept connection: {}", e),
        }
    }
    info!("Accept loop stopped");
}
