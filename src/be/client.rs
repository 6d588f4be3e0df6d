use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tonic::codec::CompressionEncoding;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::interceptor::InterceptedService;
use tonic::service::Interceptor;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Response, Status};
use tracing::{debug, info};

use crate::error::{GatewayError, Result};

use super::pb::psdb::v1alpha1::database_client::DatabaseClient;
use super::{
    Backend, CreateSessionRequest, CreateSessionResponse, ExecuteRequest, ExecuteResponse,
    ExecuteStream, PrepareRequest, PrepareResponse,
};

/// Large analytical pages can exceed tonic's 4MB default.
const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

/// Compression applied to requests and accepted on responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Identity,
    Gzip,
}

impl FromStr for Compression {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "identity" | "none" => Ok(Compression::Identity),
            "gzip" => Ok(Compression::Gzip),
            other => Err(GatewayError::Config(format!(
                "unsupported compression '{}' (expected identity or gzip)",
                other
            ))),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::Identity => f.write_str("identity"),
            Compression::Gzip => f.write_str("gzip"),
        }
    }
}

/// How to reach and authenticate against the upstream `Database` service.
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// Host name or full URL. A bare host is reached over TLS.
    pub upstream: String,
    pub username: String,
    pub password: String,
    pub compression: Compression,
    pub connect_timeout: Duration,
}

/// Adds HTTP basic authorization to every call.
#[derive(Clone)]
pub struct BasicAuth {
    header: Option<MetadataValue<Ascii>>,
}

impl BasicAuth {
    pub fn new(username: &str, password: &str) -> Result<Self> {
        if username.is_empty() && password.is_empty() {
            return Ok(Self { header: None });
        }
        let token = STANDARD.encode(format!("{}:{}", username, password));
        let header = format!("Basic {}", token)
            .parse::<MetadataValue<Ascii>>()
            .map_err(|e| GatewayError::Config(format!("invalid credentials: {}", e)))?;
        Ok(Self {
            header: Some(header),
        })
    }
}

impl Interceptor for BasicAuth {
    fn call(&mut self, mut request: tonic::Request<()>) -> std::result::Result<tonic::Request<()>, Status> {
        if let Some(header) = &self.header {
            request.metadata_mut().insert("authorization", header.clone());
        }
        Ok(request)
    }
}

/// `Backend` over a tonic channel.
///
/// The channel connects lazily: the first call (the startup credential check)
/// is what surfaces an unreachable upstream. The generated client is cheap to
/// clone and every call works on its own clone, so one instance is shared by
/// all connections.
#[derive(Clone)]
pub struct RpcBackend {
    client: DatabaseClient<InterceptedService<Channel, BasicAuth>>,
    addr: String,
}

impl RpcBackend {
    pub fn connect_lazy(options: &BackendOptions) -> Result<Self> {
        let addr = upstream_url(&options.upstream);
        info!("Using upstream database service at {}", addr);

        let mut endpoint = Endpoint::from_shared(addr.clone())?
            .connect_timeout(options.connect_timeout)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .http2_keep_alive_interval(Duration::from_secs(30))
            .keep_alive_while_idle(true);
        if addr.starts_with("https://") {
            endpoint = endpoint.tls_config(ClientTlsConfig::new())?;
        }
        let channel = endpoint.connect_lazy();

        let auth = BasicAuth::new(&options.username, &options.password)?;
        let mut client = DatabaseClient::with_interceptor(channel, auth)
            .max_decoding_message_size(MAX_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_MESSAGE_SIZE);
        if options.compression == Compression::Gzip {
            client = client
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Gzip);
        }
        debug!(compression = %options.compression, "backend client configured");

        Ok(Self { client, addr })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Backend for RpcBackend {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> std::result::Result<CreateSessionResponse, Status> {
        let mut client = self.client.clone();
        client.create_session(request).await.map(Response::into_inner)
    }

    async fn execute(&self, request: ExecuteRequest) -> std::result::Result<ExecuteResponse, Status> {
        let mut client = self.client.clone();
        client.execute(request).await.map(Response::into_inner)
    }

    async fn prepare(&self, request: PrepareRequest) -> std::result::Result<PrepareResponse, Status> {
        let mut client = self.client.clone();
        client.prepare(request).await.map(Response::into_inner)
    }

    async fn stream_execute(
        &self,
        request: ExecuteRequest,
    ) -> std::result::Result<ExecuteStream, Status> {
        let mut client = self.client.clone();
        let stream = client.stream_execute(request).await?.into_inner();
        Ok(stream.boxed())
    }
}

/// A bare host name is reached over TLS on the default port.
fn upstream_url(upstream: &str) -> String {
    if upstream.contains("://") {
        upstream.to_string()
    } else {
        format!("https://{}", upstream)
    }
}
