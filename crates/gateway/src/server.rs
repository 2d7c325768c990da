//! QUIC endpoint bootstrap and the gateway accept loop.

use std::net::SocketAddr;
use std::sync::Arc;

use gwpool::Pool;
use proto::{GatewayError, GatewayId, Uplink};
use quinn::{Endpoint, ServerConfig};
use tracing::{error, info, warn};

use crate::session::run_session;

/// Async callback invoked for every uplink frame forwarded out of the pool.
pub type UplinkHandler = Arc<
    dyn Fn(
            GatewayId,
            Uplink,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        + Send
        + Sync,
>;

/// QUIC server that accepts gateway connections and runs one session per
/// connection, registering each gateway's link with the pool
pub struct GatewayServer {
    endpoint: Endpoint,
    pool: Arc<Pool>,
    handler: UplinkHandler,
}

impl GatewayServer {
    /// Create a new server with an auto-generated self-signed certificate
    pub fn new_self_signed(
        addr: SocketAddr,
        pool: Arc<Pool>,
        handler: UplinkHandler,
    ) -> Result<Self, GatewayError> {
        ensure_crypto_provider();
        let (cert, key) = generate_self_signed_cert()?;
        let server_config = make_server_config(cert, key)?;
        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| GatewayError::Endpoint(e.to_string()))?;

        info!("gateway server listening on {addr}");
        Ok(Self {
            endpoint,
            pool,
            handler,
        })
    }

    /// Create a server with provided PEM cert and key
    pub fn new_with_certs(
        addr: SocketAddr,
        cert_pem: &[u8],
        key_pem: &[u8],
        pool: Arc<Pool>,
        handler: UplinkHandler,
    ) -> Result<Self, GatewayError> {
        ensure_crypto_provider();
        let cert: Vec<rustls::pki_types::CertificateDer<'static>> =
            rustls_pemfile::certs(&mut std::io::BufReader::new(cert_pem))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e: std::io::Error| GatewayError::Tls(e.to_string()))?;
        let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(key_pem))
            .map_err(|e: std::io::Error| GatewayError::Tls(e.to_string()))?
            .ok_or_else(|| GatewayError::Tls("No private key found".into()))?;

        let server_config = make_server_config(cert, key)?;
        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| GatewayError::Endpoint(e.to_string()))?;

        info!("gateway server listening on {addr} (custom cert)");
        Ok(Self {
            endpoint,
            pool,
            handler,
        })
    }

    /// Accept loop: accept incoming gateway connections and spawn sessions
    pub async fn run(self) {
        info!("gateway accept loop started");
        loop {
            match self.endpoint.accept().await {
                Some(incoming) => {
                    let pool = Arc::clone(&self.pool);
                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        match incoming.await {
                            Ok(conn) => {
                                let remote = conn.remote_address();
                                info!("new gateway connection from {remote}");
                                if let Err(e) = run_session(conn, pool, handler).await {
                                    warn!("session error from {remote}: {e}");
                                }
                            }
                            Err(e) => {
                                error!("failed to accept connection: {e}");
                            }
                        }
                    });
                }
                None => {
                    info!("gateway endpoint closed");
                    break;
                }
            }
        }
    }

    /// Local address the server is bound to
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.endpoint.local_addr()
    }
}

fn ensure_crypto_provider() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Generates a localhost self-signed certificate and private key pair.
fn generate_self_signed_cert() -> Result<
    (
        Vec<rustls::pki_types::CertificateDer<'static>>,
        rustls::pki_types::PrivateKeyDer<'static>,
    ),
    GatewayError,
> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| GatewayError::Tls(e.to_string()))?;

    let cert_der = rustls::pki_types::CertificateDer::from(cert.cert.der().to_vec());
    let key_der = rustls::pki_types::PrivateKeyDer::try_from(cert.key_pair.serialize_der())
        .map_err(|e| GatewayError::Tls(e.to_string()))?;

    Ok((vec![cert_der], key_der))
}

/// Builds a QUIC server config from DER certificates and private key.
fn make_server_config(
    certs: Vec<rustls::pki_types::CertificateDer<'static>>,
    key: rustls::pki_types::PrivateKeyDer<'static>,
) -> Result<ServerConfig, GatewayError> {
    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| GatewayError::Tls(e.to_string()))?;

    let server_config = ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
            .map_err(|e| GatewayError::Tls(e.to_string()))?,
    ));

    Ok(server_config)
}
