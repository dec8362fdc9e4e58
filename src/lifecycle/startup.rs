//! Startup orchestration.
//!
//! # Responsibilities
//! - Open the access log and check TLS material before binding
//! - Bind the listener, then confine the process exactly once
//! - Start background tasks (rate limiter decay) and the accept loop
//! - Drain connections and the access log on shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal, nothing is accepted before
//!   every check has passed
//! - Subsystems initialize in order, not concurrently
//! - Confinement happens after everything needing privileges is open

use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::gemini::{Server, ServerState};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals;
use crate::net::tls::{build_server_config, TlsError};
use crate::net::{Listener, ListenerError};
use crate::observability::{metrics, AccessLog};
use crate::security::{platform_confinement, Confinement, ConfinementError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to open access log: {0}")]
    AccessLog(#[source] std::io::Error),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("failed to open document root: {0}")]
    DocRoot(#[source] std::io::Error),

    #[error("failed to apply {name} confinement: {source}")]
    Confinement {
        name: &'static str,
        #[source]
        source: ConfinementError,
    },

    #[error("invalid metrics address {0:?}")]
    MetricsAddress(String),
}

/// Everything opened before the process is confined.
pub struct Launch {
    pub config: Arc<ServerConfig>,
    pub tls: Arc<rustls::ServerConfig>,
    pub listener: Listener,
    pub access_log: AccessLog,
    pub access_log_writer: Option<JoinHandle<()>>,
}

/// Start the server from a validated configuration and run until a
/// termination signal arrives. Logging must already be initialized.
pub async fn run(config: ServerConfig) -> Result<(), StartupError> {
    let config = Arc::new(config);

    if let Some(address) = &config.logging.metrics_address {
        let addr: SocketAddr = address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(address.clone()))?;
        metrics::init_metrics(addr);
    }

    let (access_log, access_log_writer) =
        AccessLog::open(&config.logging.access_log_destination())
            .await
            .map_err(StartupError::AccessLog)?;

    let tls = build_server_config(&config.tls, &config.server.hostname)?;

    // Best effort: holding no directory open keeps mount points free.
    if let Err(e) = std::env::set_current_dir("/") {
        tracing::warn!(error = %e, "Could not change working directory to /");
    }

    let listener = Listener::bind(&config.server).await?;

    let shutdown = Arc::new(Shutdown::new());
    signals::spawn_signal_handler(Arc::clone(&shutdown));

    let confinement = platform_confinement(&config);
    let launch = Launch {
        config,
        tls,
        listener,
        access_log,
        access_log_writer,
    };
    serve(launch, confinement.as_ref(), shutdown).await
}

/// Confine the process, then serve until `shutdown` is triggered.
pub async fn serve(
    launch: Launch,
    confinement: &dyn Confinement,
    shutdown: Arc<Shutdown>,
) -> Result<(), StartupError> {
    let Launch {
        config,
        tls,
        listener,
        access_log,
        access_log_writer,
    } = launch;

    let state = Arc::new(ServerState::new(Arc::clone(&config), access_log).map_err(StartupError::DocRoot)?);

    confinement
        .apply()
        .map_err(|source| StartupError::Confinement {
            name: confinement.name(),
            source,
        })?;
    tracing::info!(confinement = confinement.name(), "Process confined");

    let decay = config.rate_limit.enabled.then(|| {
        tokio::spawn(Arc::clone(&state.limiter).run_decay(shutdown.subscribe()))
    });

    let server = Server::new(listener, tls, Arc::clone(&state));
    if let Ok(addr) = server.local_addr() {
        tracing::info!(
            address = %addr,
            hostname = %config.server.hostname,
            doc_root = %config.server.doc_root.display(),
            "Serving"
        );
    }
    server.run(shutdown.subscribe()).await;

    if let Some(decay) = decay {
        let _ = decay.await;
    }

    // The writer exits once the last AccessLog handle is gone.
    drop(state);
    if let Some(writer) = access_log_writer {
        let _ = writer.await;
    }

    tracing::info!("Exiting");
    Ok(())
}
