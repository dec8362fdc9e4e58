//! TCP listener.
//!
//! # Responsibilities
//! - Bind to the configured address and port
//! - Accept incoming TCP connections
//!
//! Connections are not capped; each accepted stream gets its own task.

use std::net::{IpAddr, SocketAddr};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};

use crate::config::schema::SiteConfig;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid bind address {0:?}")]
    Address(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),
}

pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Bind to `bind_address:port` from the site configuration.
    pub async fn bind(site: &SiteConfig) -> Result<Self, ListenerError> {
        let ip: IpAddr = site
            .bind_address
            .parse()
            .map_err(|_| ListenerError::Address(site.bind_address.clone()))?;
        let addr = SocketAddr::new(ip, site.port);

        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind { addr, source })?;

        tracing::info!(address = %addr, "Listener bound");
        Ok(Self { inner })
    }

    /// Wrap an already bound listener.
    pub fn from_tcp(inner: TcpListener) -> Self {
        Self { inner }
    }

    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ListenerError> {
        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        tracing::debug!(peer_addr = %addr, "Connection accepted");
        Ok((stream, addr))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
