//! Shared utilities for end-to-end tests: a document tree with TLS
//! material, a running server on an ephemeral port, and a TLS client.

#![allow(dead_code)]

use rcgen::{generate_simple_self_signed, CertifiedKey};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;

use gemini_server::config::schema::LogDestination;
use gemini_server::lifecycle::{serve, Launch, Shutdown, StartupError};
use gemini_server::net::tls::build_server_config;
use gemini_server::net::Listener;
use gemini_server::observability::AccessLog;
use gemini_server::security::cert_zone::fingerprint;
use gemini_server::security::confinement::Unconfined;
use gemini_server::ServerConfig;

pub const HOSTNAME: &str = "localhost";

pub fn chmod(path: &Path, mode: u32) {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
}

/// A document root plus configuration, not yet serving.
pub struct Site {
    dir: tempfile::TempDir,
    pub root: PathBuf,
    pub config: ServerConfig,
}

impl Site {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let base = std::fs::canonicalize(dir.path()).unwrap();
        let root = base.join("docs");
        std::fs::create_dir(&root).unwrap();
        chmod(&root, 0o755);

        let CertifiedKey { cert, signing_key } =
            generate_simple_self_signed(vec![HOSTNAME.to_string()]).unwrap();
        let cert_path = base.join("cert.pem");
        let key_path = base.join("key.pem");
        std::fs::write(&cert_path, cert.pem()).unwrap();
        std::fs::write(&key_path, signing_key.serialize_pem()).unwrap();
        chmod(&key_path, 0o600);

        let mut config = ServerConfig::default();
        config.server.hostname = HOSTNAME.to_string();
        config.server.bind_address = "127.0.0.1".to_string();
        config.server.doc_root = root.clone();
        config.tls.cert_path = cert_path;
        config.tls.key_path = key_path;
        config.logging.access_log = base.join("access.log").display().to_string();

        Self { dir, root, config }
    }

    pub fn file(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root.join(rel);
        let parent = path.parent().unwrap();
        std::fs::create_dir_all(parent).unwrap();
        chmod(parent, 0o755);
        std::fs::write(&path, content).unwrap();
        chmod(&path, 0o644);
        path
    }

    pub fn outside(&self) -> PathBuf {
        self.root.parent().unwrap().to_path_buf()
    }

    pub async fn start(mut self) -> TestServer {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        self.config.server.port = addr.port();

        let config = Arc::new(self.config);
        let tls = build_server_config(&config.tls, HOSTNAME).unwrap();
        let access_log_path = PathBuf::from(&config.logging.access_log);
        let (access_log, access_log_writer) =
            AccessLog::open(&LogDestination::File(access_log_path.clone()))
                .await
                .unwrap();

        let launch = Launch {
            config,
            tls,
            listener: Listener::from_tcp(tcp),
            access_log,
            access_log_writer,
        };
        let shutdown = Arc::new(Shutdown::new());
        let task = tokio::spawn(serve(launch, &Unconfined, Arc::clone(&shutdown)));

        TestServer {
            addr,
            access_log: access_log_path,
            shutdown,
            task,
            _dir: self.dir,
        }
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub access_log: PathBuf,
    shutdown: Arc<Shutdown>,
    task: JoinHandle<Result<(), StartupError>>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    /// `gemini://localhost:<port><path>`
    pub fn url(&self, path: &str) -> String {
        format!("gemini://{HOSTNAME}:{}{path}", self.addr.port())
    }

    pub async fn get(&self, path: &str) -> String {
        request(self.addr, &self.url(path), None).await
    }

    /// Trigger shutdown and wait for the server to drain.
    pub async fn stop(&self) -> Vec<String> {
        self.shutdown.trigger();
        self.wait().await;
        std::fs::read_to_string(&self.access_log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    async fn wait(&self) {
        while !self.task.is_finished() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

/// A self-signed client certificate.
pub struct ClientIdentity {
    pub cert: CertificateDer<'static>,
    pub key: PrivateKeyDer<'static>,
    pub fingerprint: String,
}

impl ClientIdentity {
    pub fn generate(name: &str) -> Self {
        let CertifiedKey { cert, signing_key } =
            generate_simple_self_signed(vec![name.to_string()]).unwrap();
        let der = cert.der().clone();
        Self {
            fingerprint: fingerprint(der.as_ref()),
            cert: der,
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(signing_key.serialize_der())),
        }
    }
}

/// Gemini clients trust on first use; tests trust everything.
#[derive(Debug)]
struct TrustAnyServer(rustls::crypto::WebPkiSupportedAlgorithms);

impl ServerCertVerifier for TrustAnyServer {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.supported_schemes()
    }
}

/// Send one request line and return the whole response as text.
pub async fn request(addr: SocketAddr, url: &str, identity: Option<&ClientIdentity>) -> String {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = Arc::new(TrustAnyServer(provider.signature_verification_algorithms));
    let builder = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .dangerous()
        .with_custom_certificate_verifier(verifier);
    let config = match identity {
        Some(id) => builder
            .with_client_auth_cert(vec![id.cert.clone()], id.key.clone_key())
            .unwrap(),
        None => builder.with_no_client_auth(),
    };

    let tcp = TcpStream::connect(addr).await.unwrap();
    let mut tls = TlsConnector::from(Arc::new(config))
        .connect(ServerName::try_from(HOSTNAME).unwrap(), tcp)
        .await
        .unwrap();

    tls.write_all(format!("{url}\r\n").as_bytes()).await.unwrap();
    tls.flush().await.unwrap();

    let mut response = Vec::new();
    tls.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}
