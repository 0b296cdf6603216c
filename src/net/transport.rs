//! WebTransport server implementation
//!
//! Each WebTransport session opens one bidirectional stream. The read pump
//! feeds decoded packets to the client session as its own messages; the write
//! pump drains the session's outbound queue onto the stream.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::game::constants::net::OUTBOUND_QUEUE;
use crate::hub::client::ClientSession;
use crate::hub::{HubClient, HubServices};
use crate::metrics::Metrics;
use crate::net::framing::{read_packet, write_packet, FramingError};
use crate::net::protocol::Packet;
use crate::net::tls::TlsConfig;

/// WebTransport server
pub struct WebTransportServer {
    config: ServerConfig,
    tls_config: TlsConfig,
    services: HubServices,
}

impl WebTransportServer {
    pub async fn new(config: ServerConfig, services: HubServices) -> anyhow::Result<Self> {
        let tls_config = TlsConfig::load(&config).await?;

        Ok(Self {
            config,
            tls_config,
            services,
        })
    }

    /// Get the certificate hash for client configuration
    pub fn cert_hash(&self) -> &str {
        self.tls_config.cert_hash()
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.config.bind_address, self.config.port)
    }

    /// Accept connections until the endpoint fails
    pub async fn run(self) -> anyhow::Result<()> {
        use wtransport::Endpoint;

        let bind_addr = self.bind_addr();
        let builder = wtransport::ServerConfig::builder();
        // Unspecified address binds dual-stack (IPv4 + IPv6)
        let builder = if bind_addr.ip().is_unspecified() {
            builder.with_bind_default(bind_addr.port())
        } else {
            builder.with_bind_address(bind_addr)
        };
        let server_config = builder.with_identity(self.tls_config.identity).build();

        let server = Endpoint::server(server_config)?;

        info!("WebTransport server listening on {}", bind_addr);

        loop {
            let incoming = server.accept().await;
            let services = self.services.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(incoming, services).await {
                    warn!("Connection error: {}", e);
                }
            });
        }
    }
}

/// Handle a single WebTransport connection
async fn handle_connection(
    incoming: wtransport::endpoint::IncomingSession,
    services: HubServices,
) -> anyhow::Result<()> {
    let session_request = incoming.await?;

    debug!(
        "New connection from: {:?}, path: {}",
        session_request.authority(),
        session_request.path()
    );

    let connection = session_request.accept().await?;
    let (send, recv) = connection.accept_bi().await?;
    debug!("Accepted bidirectional stream");

    let metrics = services.metrics.clone();
    Metrics::incr(&metrics.connections_active);
    let result = serve_client(send, recv, services).await;
    Metrics::decr(&metrics.connections_active);

    result.map_err(Into::into)
}

/// Run one client over a pair of byte streams: register it with the hub,
/// start its pumps and session runner, and tear everything down when the
/// read side ends
pub async fn serve_client<W, R>(send: W, mut recv: R, services: HubServices) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin + Send + 'static,
    R: AsyncRead + Unpin,
{
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let (session, runner) = ClientSession::new(services.clone(), outbound_tx);

    services.hub.register(session.clone());
    tokio::spawn(write_pump(send, outbound_rx, services.metrics.clone()));
    tokio::spawn(runner.run());

    let result = read_pump(&mut recv, &session, &services.metrics).await;

    debug!(client = session.id(), "Read pump finished");
    services.hub.unregister(session.clone());
    session.close("Connection closed");

    result
}

async fn read_pump<R: AsyncRead + Unpin>(
    recv: &mut R,
    session: &ClientSession,
    metrics: &Metrics,
) -> Result<(), FramingError> {
    loop {
        match read_packet(recv).await {
            Ok((packet, size)) => {
                metrics.record_received(size);
                // The claimed sender is ignored: everything on this stream is
                // this client's own
                session.receive(packet.msg);
            }
            Err(FramingError::ConnectionClosed) => return Ok(()),
            Err(FramingError::Decode(e)) => {
                warn!(client = session.id(), "Failed to decode client message: {}", e);
            }
            Err(e) => return Err(e),
        }
    }
}

async fn write_pump<W: AsyncWrite + Unpin>(
    mut send: W,
    mut outbound: mpsc::Receiver<Packet>,
    metrics: Arc<Metrics>,
) {
    while let Some(packet) = outbound.recv().await {
        match write_packet(&mut send, &packet).await {
            Ok(size) => metrics.record_sent(size),
            Err(e) => {
                debug!("Stream write error: {}", e);
                break;
            }
        }
    }

    if let Err(e) = send.shutdown().await {
        debug!("Failed to finish stream: {}", e);
    }
}
