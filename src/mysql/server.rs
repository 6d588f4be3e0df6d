use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opensrv_mysql::{
    plain_run_with_options, secure_run_with_options, AsyncMysqlIntermediary,
    IntermediaryOptions,
};
use rustls::ServerConfig;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::query::Handler;

use super::auth::AcceptAllAuth;
use super::conn::Conn;
use super::shim::GatewayShim;
use super::timeout::TimeoutIo;

/// Bound on the startup credential check.
pub const CREDENTIAL_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on a single client read or write.
pub const CONN_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Default TCP keepalive period for client sockets.
pub const CONN_KEEPALIVE: Duration = Duration::from_secs(30);

const ER_SECURE_TRANSPORT_REQUIRED: u16 = 3159;

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub listen: String,
    pub server_version: String,
    pub credential_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub keepalive: Duration,
    /// When set, clients must upgrade to TLS before authenticating.
    pub tls: Option<Arc<ServerConfig>>,
}

/// MySQL listener in front of the execution bridge.
///
/// `shutdown` stops accepting new clients and lets live connections finish;
/// `close` also tears down every live connection and abandons its in-flight
/// backend call.
pub struct GatewayServer {
    handler: Arc<Handler>,
    auth: Arc<AcceptAllAuth>,
    options: ServerOptions,
    next_conn_id: AtomicU32,
    accepting: CancellationToken,
    connections: CancellationToken,
}

impl GatewayServer {
    pub fn new(handler: Arc<Handler>, auth: AcceptAllAuth, options: ServerOptions) -> Self {
        Self {
            handler,
            auth: Arc::new(auth),
            options,
            next_conn_id: AtomicU32::new(1),
            accepting: CancellationToken::new(),
            connections: CancellationToken::new(),
        }
    }

    pub fn handler(&self) -> &Arc<Handler> {
        &self.handler
    }

    pub async fn listen_and_serve(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.options.listen).await?;
        self.serve(listener).await
    }

    /// Verifies the backend credentials, then accepts clients until
    /// `shutdown` or `close` is called. Nothing is accepted when the check
    /// fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.handler
            .test_credentials(self.options.credential_timeout)
            .await?;

        info!("MySQL gateway listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                _ = self.accepting.cancelled() => {
                    info!("MySQL gateway stopped accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => self.spawn_connection(stream, peer_addr),
                    Err(e) => error!("Failed to accept MySQL connection: {}", e),
                },
            }
        }
    }

    pub fn shutdown(&self) {
        self.accepting.cancel();
    }

    pub fn close(&self) {
        self.accepting.cancel();
        self.connections.cancel();
    }

    fn spawn_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let conn = Conn::new(id, Some(peer_addr), self.connections.child_token());

        let keepalive = TcpKeepalive::new()
            .with_time(self.options.keepalive)
            .with_interval(self.options.keepalive);
        if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
            warn!(conn_id = id, "Failed to set TCP keepalive for {}: {}", peer_addr, e);
        }

        let shim = match GatewayShim::new(
            self.handler.clone(),
            self.auth.clone(),
            conn.clone(),
            self.options.server_version.clone(),
        ) {
            Ok(shim) => shim,
            Err(e) => {
                error!(conn_id = id, "Failed to set up connection from {}: {}", peer_addr, e);
                return;
            }
        };
        debug!(conn_id = id, "Accepted MySQL connection from {}", peer_addr);

        let tls = self.options.tls.clone();
        let read_timeout = self.options.read_timeout;
        let write_timeout = self.options.write_timeout;
        tokio::spawn(async move {
            let (r, w) = stream.into_split();
            let r = TimeoutIo::new(r, read_timeout);
            let w = TimeoutIo::new(w, write_timeout);
            tokio::select! {
                _ = conn.cancel_token().cancelled() => {
                    debug!(conn_id = conn.id(), "connection closed by server");
                }
                result = run_connection(shim, r, w, tls) => {
                    if let Err(e) = result {
                        warn!(conn_id = conn.id(), "MySQL connection error: {}", e);
                    }
                }
            }
        });
    }
}

/// Drives one client through the handshake and its command loop.
///
/// With a TLS configuration the client must send an SSL request; a client
/// that stays in plaintext is refused before authentication.
async fn run_connection<R, W>(
    mut shim: GatewayShim,
    reader: R,
    mut writer: W,
    tls: Option<Arc<ServerConfig>>,
) -> io::Result<()>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    let opts = IntermediaryOptions {
        process_use_statement_on_query: true,
        ..Default::default()
    };
    let (wants_tls, init) =
        AsyncMysqlIntermediary::init_before_ssl(&mut shim, reader, &mut writer, &tls).await?;

    match tls {
        Some(config) if wants_tls => {
            secure_run_with_options(shim, writer, opts, config, init).await
        }
        Some(_) => {
            let seq = init.1.wrapping_add(1);
            write_error(
                &mut writer,
                seq,
                ER_SECURE_TRANSPORT_REQUIRED,
                "Connections using insecure transport are prohibited",
            )
            .await?;
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "client did not request TLS",
            ))
        }
        None if wants_tls => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "client requested TLS, which is not configured",
        )),
        None => plain_run_with_options(shim, writer, opts, init).await,
    }
}

/// Writes a bare ERR packet; used before opensrv owns the connection.
async fn write_error<W>(writer: &mut W, seq: u8, code: u16, message: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut payload = Vec::with_capacity(9 + message.len());
    payload.push(0xff);
    payload.extend_from_slice(&code.to_le_bytes());
    payload.extend_from_slice(b"#HY000");
    payload.extend_from_slice(message.as_bytes());

    let len = (payload.len() as u32).to_le_bytes();
    writer.write_all(&[len[0], len[1], len[2], seq]).await?;
    writer.write_all(&payload).await?;
    writer.flush().await
}
