//! Raw MySQL client helpers shared by the integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mysql_rpc_gateway::be::Backend;
use mysql_rpc_gateway::mysql::{
    AcceptAllAuth, GatewayServer, ServerOptions, CONN_IO_TIMEOUT, CONN_KEEPALIVE,
};
use mysql_rpc_gateway::Handler;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

pub const SERVER_VERSION: &str = "8.0.30-test";

const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
pub const CLIENT_SSL: u32 = 0x0000_0800;
const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;
const UTF8MB4_GENERAL_CI: u8 = 45;

pub const COM_QUIT: u8 = 0x01;
pub const COM_INIT_DB: u8 = 0x02;
pub const COM_QUERY: u8 = 0x03;
pub const COM_STMT_PREPARE: u8 = 0x16;
pub const COM_STMT_EXECUTE: u8 = 0x17;
pub const COM_STMT_CLOSE: u8 = 0x19;

pub const MYSQL_TYPE_LONGLONG: u8 = 0x08;
pub const MYSQL_TYPE_VAR_STRING: u8 = 0xfd;

pub type TestResult<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// A single MySQL packet.
#[derive(Debug, Clone)]
pub struct Packet {
    pub sequence_id: u8,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(sequence_id: u8, payload: Bytes) -> Self {
        Self { sequence_id, payload }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(4 + self.payload.len());
        let len = self.payload.len() as u32;
        buf.put_uint_le(len as u64, 3);
        buf.put_u8(self.sequence_id);
        buf.put_slice(&self.payload);
        buf
    }

    pub fn decode(buf: &mut BytesMut) -> Option<Self> {
        if buf.len() < 4 {
            return None;
        }
        let len = (buf[0] as usize) | ((buf[1] as usize) << 8) | ((buf[2] as usize) << 16);
        let sequence_id = buf[3];
        if buf.len() < 4 + len {
            return None;
        }
        buf.advance(4);
        let payload = buf.split_to(len).freeze();
        Some(Packet { sequence_id, payload })
    }

    pub fn is_ok(&self) -> bool {
        self.payload.first() == Some(&0x00)
    }

    pub fn is_err(&self) -> bool {
        self.payload.first() == Some(&0xff)
    }

    pub fn is_eof(&self) -> bool {
        self.payload.first() == Some(&0xfe) && self.payload.len() < 9
    }
}

pub fn read_lenenc_int(buf: &mut Bytes) -> Option<u64> {
    if !buf.has_remaining() {
        return None;
    }
    match buf.get_u8() {
        v @ 0..=0xfa => Some(v as u64),
        0xfc if buf.remaining() >= 2 => Some(buf.get_u16_le() as u64),
        0xfd if buf.remaining() >= 3 => Some(buf.get_uint_le(3)),
        0xfe if buf.remaining() >= 8 => Some(buf.get_u64_le()),
        _ => None,
    }
}

pub fn read_lenenc_str(buf: &mut Bytes) -> Option<Bytes> {
    let len = read_lenenc_int(buf)? as usize;
    if buf.remaining() < len {
        return None;
    }
    Some(buf.copy_to_bytes(len))
}

pub trait ClientStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ClientStream for T {}

/// A MySQL client connection driven one packet at a time.
pub struct Client {
    stream: Box<dyn ClientStream>,
    buf: BytesMut,
}

impl Client {
    fn new(stream: Box<dyn ClientStream>) -> Self {
        Client {
            stream,
            buf: BytesMut::with_capacity(1024),
        }
    }

    /// Connects and reads the server's initial handshake.
    pub async fn open(addr: SocketAddr) -> TestResult<(Self, Packet)> {
        let mut client = Client::new(Box::new(TcpStream::connect(addr).await?));
        let handshake = client.read_packet().await?;
        Ok((client, handshake))
    }

    /// Answers the handshake in plaintext and returns the server's reply.
    pub async fn login(&mut self, user: &str, db: Option<&str>) -> TestResult<Packet> {
        self.write_packet(1, handshake_response(user, db, 0)).await?;
        self.read_packet().await
    }

    /// Connects and completes the handshake as `user`.
    pub async fn connect(addr: SocketAddr, user: &str, db: Option<&str>) -> TestResult<(Self, Packet)> {
        let (mut client, handshake) = Client::open(addr).await?;
        let reply = client.login(user, db).await?;
        if !reply.is_ok() {
            return Err(format!("handshake rejected: {:?}", reply.payload).into());
        }
        Ok((client, handshake))
    }

    /// Connects, upgrades to TLS trusting `ca` and completes the handshake.
    pub async fn connect_tls(addr: SocketAddr, user: &str, ca: &Path) -> TestResult<(Self, Packet)> {
        let tcp = TcpStream::connect(addr).await?;
        let mut client = Client::new(Box::new(tcp));
        let handshake = client.read_packet().await?;
        client.write_packet(1, ssl_request()).await?;

        let mut roots = RootCertStore::empty();
        let pem = std::fs::read(ca)?;
        for cert in read_certs(&pem)? {
            roots.add(cert)?;
        }
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let server_name = ServerName::try_from("localhost")?;

        // Nothing is buffered yet: the server waits for the TLS handshake.
        let Client { stream, .. } = client;
        let tls = TlsConnector::from(Arc::new(config))
            .connect(server_name, stream)
            .await?;

        let mut client = Client::new(Box::new(tls));
        client
            .write_packet(2, handshake_response(user, None, CLIENT_SSL))
            .await?;
        client.expect_ok().await?;
        Ok((client, handshake))
    }

    async fn expect_ok(&mut self) -> TestResult<()> {
        let reply = self.read_packet().await?;
        if !reply.is_ok() {
            return Err(format!("handshake rejected: {:?}", reply.payload).into());
        }
        Ok(())
    }

    pub async fn read_packet(&mut self) -> TestResult<Packet> {
        match timeout(Duration::from_secs(5), self.read_packet_inner()).await {
            Ok(result) => result,
            Err(_) => Err("read_packet timed out".into()),
        }
    }

    async fn read_packet_inner(&mut self) -> TestResult<Packet> {
        loop {
            if let Some(pkt) = Packet::decode(&mut self.buf) {
                return Ok(pkt);
            }
            let mut tmp = [0u8; 4096];
            let n = self.stream.read(&mut tmp).await?;
            if n == 0 {
                return Err("connection closed".into());
            }
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }

    /// True once the server has closed the connection.
    pub async fn is_closed(&mut self) -> bool {
        let mut tmp = [0u8; 64];
        matches!(
            timeout(Duration::from_secs(5), self.stream.read(&mut tmp)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }

    pub async fn write_packet(&mut self, sequence_id: u8, payload: Bytes) -> TestResult<()> {
        self.stream
            .write_all(&Packet::new(sequence_id, payload).encode())
            .await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn command(&mut self, command: u8, body: &[u8]) -> TestResult<()> {
        let mut payload = BytesMut::with_capacity(1 + body.len());
        payload.put_u8(command);
        payload.put_slice(body);
        self.write_packet(0, payload.freeze()).await
    }

    pub async fn query(&mut self, sql: &str) -> TestResult<Response> {
        self.command(COM_QUERY, sql.as_bytes()).await?;
        self.read_response(false).await
    }

    /// Prepares `sql`, returning the statement id and its parameter and
    /// column counts.
    pub async fn prepare(&mut self, sql: &str) -> TestResult<std::result::Result<(u32, u16, u16), ErrPacket>> {
        self.command(COM_STMT_PREPARE, sql.as_bytes()).await?;
        let first = self.read_packet().await?;
        if first.is_err() {
            return Ok(Err(ErrPacket::parse(&first)));
        }
        let mut payload = first.payload.clone();
        payload.advance(1);
        let statement_id = payload.get_u32_le();
        let columns = payload.get_u16_le();
        let params = payload.get_u16_le();

        for _ in 0..params {
            self.read_packet().await?;
        }
        if params > 0 {
            assert!(self.read_packet().await?.is_eof());
        }
        for _ in 0..columns {
            self.read_packet().await?;
        }
        if columns > 0 {
            assert!(self.read_packet().await?.is_eof());
        }
        Ok(Ok((statement_id, params, columns)))
    }

    /// Executes a prepared statement that takes no parameters.
    pub async fn execute(&mut self, statement_id: u32) -> TestResult<Response> {
        let mut body = BytesMut::new();
        body.put_u32_le(statement_id);
        body.put_u8(0); // CURSOR_TYPE_NO_CURSOR
        body.put_u32_le(1);
        self.command(COM_STMT_EXECUTE, &body).await?;
        self.read_response(true).await
    }

    /// Reads an OK, ERR or result set response.
    pub async fn read_response(&mut self, binary: bool) -> TestResult<Response> {
        let first = self.read_packet().await?;
        if first.is_ok() {
            return Ok(Response::Ok(OkPacket::parse(&first)));
        }
        if first.is_err() {
            return Ok(Response::Err(ErrPacket::parse(&first)));
        }

        let mut payload = first.payload.clone();
        let count = read_lenenc_int(&mut payload).ok_or("bad column count")? as usize;
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            columns.push(ColumnDef::parse(&self.read_packet().await?)?);
        }
        let eof = self.read_packet().await?;
        assert!(eof.is_eof(), "expected EOF after column definitions");

        let mut rows = Vec::new();
        loop {
            let pkt = self.read_packet().await?;
            if pkt.is_eof() {
                break;
            }
            if pkt.is_err() {
                return Ok(Response::PartialRows(columns, rows, ErrPacket::parse(&pkt)));
            }
            let row = if binary {
                parse_binary_row(&pkt, count)?
            } else {
                parse_text_row(&pkt, count)?
            };
            rows.push(row);
        }
        Ok(Response::Rows(columns, rows))
    }
}

pub type Row = Vec<Option<Vec<u8>>>;

#[derive(Debug)]
pub enum Response {
    Ok(OkPacket),
    Err(ErrPacket),
    Rows(Vec<ColumnDef>, Vec<Row>),
    /// Rows were streamed, then the result was terminated by an error.
    PartialRows(Vec<ColumnDef>, Vec<Row>, ErrPacket),
}

#[derive(Debug)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
}

impl OkPacket {
    fn parse(pkt: &Packet) -> Self {
        let mut payload = pkt.payload.clone();
        payload.advance(1);
        let affected_rows = read_lenenc_int(&mut payload).unwrap_or(0);
        let last_insert_id = read_lenenc_int(&mut payload).unwrap_or(0);
        let status_flags = payload.get_u16_le();
        let warnings = payload.get_u16_le();
        OkPacket {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
        }
    }
}

#[derive(Debug)]
pub struct ErrPacket {
    pub code: u16,
    pub state: String,
    pub message: String,
}

impl ErrPacket {
    pub fn parse(pkt: &Packet) -> Self {
        let mut payload = pkt.payload.clone();
        payload.advance(1);
        let code = payload.get_u16_le();
        let mut state = String::new();
        if payload.first() == Some(&b'#') {
            payload.advance(1);
            state = String::from_utf8_lossy(&payload.split_to(5)).into_owned();
        }
        ErrPacket {
            code,
            state,
            message: String::from_utf8_lossy(&payload).into_owned(),
        }
    }
}

#[derive(Debug)]
pub struct ColumnDef {
    pub table: String,
    pub name: String,
    pub column_type: u8,
    pub flags: u16,
}

impl ColumnDef {
    fn parse(pkt: &Packet) -> TestResult<Self> {
        let mut payload = pkt.payload.clone();
        let mut field = || -> TestResult<String> {
            let bytes = read_lenenc_str(&mut payload).ok_or("truncated column definition")?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        };
        let _catalog = field()?;
        let _schema = field()?;
        let table = field()?;
        let _org_table = field()?;
        let name = field()?;
        let _org_name = field()?;

        read_lenenc_int(&mut payload);
        payload.advance(2); // character set
        payload.advance(4); // column length
        let column_type = payload.get_u8();
        let flags = payload.get_u16_le();
        Ok(ColumnDef {
            table,
            name,
            column_type,
            flags,
        })
    }
}

fn parse_text_row(pkt: &Packet, columns: usize) -> TestResult<Row> {
    let mut payload = pkt.payload.clone();
    let mut row = Vec::with_capacity(columns);
    for _ in 0..columns {
        if payload.first() == Some(&0xfb) {
            payload.advance(1);
            row.push(None);
        } else {
            let value = read_lenenc_str(&mut payload).ok_or("truncated row")?;
            row.push(Some(value.to_vec()));
        }
    }
    Ok(row)
}

fn parse_binary_row(pkt: &Packet, columns: usize) -> TestResult<Row> {
    let mut payload = pkt.payload.clone();
    assert_eq!(payload.get_u8(), 0x00, "binary row header");
    let bitmap_len = (columns + 7 + 2) / 8;
    let bitmap = payload.split_to(bitmap_len);
    let mut row = Vec::with_capacity(columns);
    for i in 0..columns {
        let bit = i + 2;
        if bitmap[bit / 8] & (1 << (bit % 8)) != 0 {
            row.push(None);
        } else {
            let value = read_lenenc_str(&mut payload).ok_or("truncated row")?;
            row.push(Some(value.to_vec()));
        }
    }
    Ok(row)
}

/// Handshake response that asks for `mysql_native_password` with a dummy
/// scramble, so no auth switch is needed.
fn handshake_response(user: &str, db: Option<&str>, extra_flags: u32) -> Bytes {
    let mut buf = BytesMut::new();

    let mut flags =
        CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION | CLIENT_PLUGIN_AUTH | extra_flags;
    if db.is_some() {
        flags |= CLIENT_CONNECT_WITH_DB;
    }

    buf.put_u32_le(flags);
    buf.put_u32_le(1024 * 1024 * 16);
    buf.put_u8(UTF8MB4_GENERAL_CI);
    buf.put_bytes(0, 23);

    buf.put_slice(user.as_bytes());
    buf.put_u8(0);

    buf.put_u8(20);
    buf.put_bytes(0x2a, 20);

    if let Some(db) = db {
        buf.put_slice(db.as_bytes());
        buf.put_u8(0);
    }

    buf.put_slice(b"mysql_native_password");
    buf.put_u8(0);

    buf.freeze()
}

/// The short form of the handshake response that asks to switch to TLS.
fn ssl_request() -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u32_le(CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION | CLIENT_PLUGIN_AUTH | CLIENT_SSL);
    buf.put_u32_le(1024 * 1024 * 16);
    buf.put_u8(UTF8MB4_GENERAL_CI);
    buf.put_bytes(0, 23);
    buf.freeze()
}

fn read_certs(pem: &[u8]) -> TestResult<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::BufReader::new(pem);
    Ok(rustls_pemfile::certs(&mut reader).collect::<std::result::Result<Vec<_>, _>>()?)
}

/// A file under `tests/data`.
pub fn test_data(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data").join(name)
}

pub struct TestGateway {
    pub addr: SocketAddr,
    pub server: Arc<GatewayServer>,
    pub handle: JoinHandle<mysql_rpc_gateway::Result<()>>,
}

/// Serves a gateway over `backend` on an ephemeral port.
pub async fn start_gateway(backend: Arc<dyn Backend>) -> TestResult<TestGateway> {
    start_gateway_with(backend, |_| {}).await
}

/// Like `start_gateway`, with the listener options adjusted by `configure`.
pub async fn start_gateway_with<F>(backend: Arc<dyn Backend>, configure: F) -> TestResult<TestGateway>
where
    F: FnOnce(&mut ServerOptions),
{
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let handler = Arc::new(Handler::new(backend));
    let mut options = ServerOptions {
        listen: addr.to_string(),
        server_version: SERVER_VERSION.to_string(),
        credential_timeout: Duration::from_secs(2),
        read_timeout: CONN_IO_TIMEOUT,
        write_timeout: CONN_IO_TIMEOUT,
        keepalive: CONN_KEEPALIVE,
        tls: None,
    };
    configure(&mut options);
    let server = Arc::new(GatewayServer::new(handler, AcceptAllAuth::default(), options));

    let handle = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(listener).await })
    };

    Ok(TestGateway { addr, server, handle })
}

/// Lower two bytes of the capability flags in the initial handshake.
pub fn lower_capabilities(handshake: &Packet) -> TestResult<u16> {
    let version_end = handshake.payload[1..]
        .iter()
        .position(|b| *b == 0)
        .ok_or("unterminated version")?;
    // version NUL, connection id, first scramble part, filler
    let start = 1 + version_end + 1 + 4 + 8 + 1;
    let caps = handshake
        .payload
        .get(start..start + 2)
        .ok_or("truncated handshake")?;
    Ok(u16::from_le_bytes([caps[0], caps[1]]))
}

/// Connection id announced in the initial handshake packet.
pub fn connection_id(handshake: &Packet) -> TestResult<u32> {
    let version_end = handshake.payload[1..]
        .iter()
        .position(|b| *b == 0)
        .ok_or("unterminated version")?;
    let start = 1 + version_end + 1;
    let id = handshake
        .payload
        .get(start..start + 4)
        .ok_or("truncated handshake")?;
    Ok(u32::from_le_bytes([id[0], id[1], id[2], id[3]]))
}

pub fn text(value: &str) -> Option<Vec<u8>> {
    Some(value.as_bytes().to_vec())
}
