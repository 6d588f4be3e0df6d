//! Gateway configuration: JSON file, then `GATEWAY_*` environment overrides.
//! Command-line flags are applied on top by the binary.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::be::{BackendOptions, Compression};
use crate::error::{GatewayError, Result};
use crate::mysql::tls::load_server_config;
use crate::mysql::{
    AuthMethod, ServerOptions, CONN_IO_TIMEOUT, CONN_KEEPALIVE, CREDENTIAL_CHECK_TIMEOUT,
};

pub const DEFAULT_CONFIG_FILE: &str = "gateway.json";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the MySQL listener binds to.
    pub listen: String,
    /// Host name or URL of the `Database` service.
    pub upstream: String,
    pub username: String,
    pub password: String,
    /// `gzip` or `identity`.
    pub compression: String,
    /// Auth plugin advertised in the handshake.
    pub auth_method: String,
    pub server_version: String,
    pub log_level: String,
    /// PEM certificate chain; with `tls_key`, clients must use TLS.
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    /// Bound on a single client read or write, in seconds.
    pub conn_timeout_secs: u64,
    pub keepalive_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3306".to_string(),
            upstream: "aws.connect.psdb.cloud".to_string(),
            username: String::new(),
            password: String::new(),
            compression: "gzip".to_string(),
            auth_method: "mysql_native_password".to_string(),
            server_version: "8.0.30-gateway".to_string(),
            log_level: "info".to_string(),
            tls_cert: None,
            tls_key: None,
            conn_timeout_secs: CONN_IO_TIMEOUT.as_secs(),
            keepalive_secs: CONN_KEEPALIVE.as_secs(),
        }
    }
}

impl Config {
    /// Reads `path` if it exists (defaults otherwise) and applies environment
    /// overrides. The result is not validated.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = match fs::read_to_string(path) {
            Ok(content) => Self::from_json(&content)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Config file {:?} not found, using defaults", path);
                Config::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| GatewayError::Config(format!("invalid config file: {}", e)))
    }

    /// Overrides fields from `GATEWAY_*` variables looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fields: [(&str, &mut String); 6] = [
            ("GATEWAY_LISTEN", &mut self.listen),
            ("GATEWAY_UPSTREAM", &mut self.upstream),
            ("GATEWAY_USERNAME", &mut self.username),
            ("GATEWAY_PASSWORD", &mut self.password),
            ("GATEWAY_COMPRESSION", &mut self.compression),
            ("GATEWAY_AUTH_METHOD", &mut self.auth_method),
        ];
        for (key, field) in fields {
            if let Some(value) = lookup(key) {
                *field = value;
            }
        }
        if let Some(path) = lookup("GATEWAY_TLS_CERT") {
            self.tls_cert = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("GATEWAY_TLS_KEY") {
            self.tls_key = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen.is_empty() {
            return Err(GatewayError::Config("listen address cannot be empty".to_string()));
        }
        if self.upstream.is_empty() {
            return Err(GatewayError::Config("upstream cannot be empty".to_string()));
        }
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(GatewayError::Config(
                "tls_cert and tls_key must be set together".to_string(),
            ));
        }
        if self.conn_timeout_secs == 0 || self.keepalive_secs == 0 {
            return Err(GatewayError::Config(
                "connection timeout and keepalive must be positive".to_string(),
            ));
        }
        self.compression()?;
        self.auth_method()?;
        Ok(())
    }

    pub fn compression(&self) -> Result<Compression> {
        self.compression.parse()
    }

    pub fn auth_method(&self) -> Result<AuthMethod> {
        self.auth_method.parse()
    }

    pub fn backend_options(&self) -> Result<BackendOptions> {
        Ok(BackendOptions {
            upstream: self.upstream.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            compression: self.compression()?,
            connect_timeout: CONNECT_TIMEOUT,
        })
    }

    /// Listener options; reads the TLS certificate and key when configured.
    pub fn server_options(&self) -> Result<ServerOptions> {
        let tls = match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some(load_server_config(cert, key)?),
            _ => None,
        };
        let io_timeout = Duration::from_secs(self.conn_timeout_secs);
        Ok(ServerOptions {
            listen: self.listen.clone(),
            server_version: self.server_version.clone(),
            credential_timeout: CREDENTIAL_CHECK_TIMEOUT,
            read_timeout: io_timeout,
            write_timeout: io_timeout,
            keepalive: Duration::from_secs(self.keepalive_secs),
            tls,
        })
    }
}
