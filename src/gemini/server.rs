//! Accept loop.
//!
//! # Responsibilities
//! - Accept TCP connections until shutdown is signalled
//! - Spawn one task per connection: TLS handshake, then the handler
//! - On shutdown, stop accepting and wait for in-flight tasks
//!
//! # Design Decisions
//! - The loop never awaits a handshake or a handler
//! - Connections whose handshake fails still get an access log entry

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;

use crate::gemini::handler::{handle_connection, Peer, ServerState};
use crate::net::tls::{acceptor, peer_certificates};
use crate::net::{ConnectionGuard, ConnectionTracker, Listener};
use crate::observability::LogEntry;

/// Pause after a failed accept, so persistent errors do not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Server {
    listener: Listener,
    acceptor: TlsAcceptor,
    state: Arc<ServerState>,
    tracker: ConnectionTracker,
}

impl Server {
    pub fn new(
        listener: Listener,
        tls_config: Arc<rustls::ServerConfig>,
        state: Arc<ServerState>,
    ) -> Self {
        Self {
            listener,
            acceptor: acceptor(tls_config),
            state,
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` fires, then drain in-flight connections.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.spawn_connection(stream, addr),
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        tracing::info!(
            in_flight = self.tracker.active_count(),
            "Waiting for handlers to finish"
        );
        self.tracker.wait_idle().await;
        tracing::info!("All connections closed");
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let guard = self.tracker.track();
        let span = tracing::debug_span!("connection", id = %guard.id(), peer = %addr);
        let acceptor = self.acceptor.clone();
        let state = Arc::clone(&self.state);

        tokio::spawn(serve_connection(stream, addr, acceptor, state, guard).instrument(span));
    }
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    acceptor: TlsAcceptor,
    state: Arc<ServerState>,
    _guard: ConnectionGuard,
) {
    match acceptor.accept(stream).await {
        Ok(tls) => {
            let certificates = peer_certificates(tls.get_ref().1);
            let entry = handle_connection(tls, Peer { addr, certificates }, &state).await;
            tracing::debug!(status = entry.status, "Connection finished");
        }
        Err(e) => {
            tracing::debug!(error = %e, "TLS handshake failed");
            state.access_log.record(LogEntry::new(addr.ip())).await;
        }
    }
}
