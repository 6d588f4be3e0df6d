//! Accept-all authentication policy.
//!
//! The gateway never verifies client credentials itself: every user name is
//! accepted and every session runs as the same identity. Credentials are
//! enforced by the backend (checked once at startup with the configured
//! username and password) and by whatever network controls sit in front of
//! the listener. Only deploy it where that trust boundary holds.

use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

pub const SALT_LEN: usize = 20;

/// The identity every authenticated connection runs as.
pub const GATEWAY_USER: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    MysqlNativePassword,
    CachingSha2Password,
}

impl AuthMethod {
    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::MysqlNativePassword => "mysql_native_password",
            AuthMethod::CachingSha2Password => "caching_sha2_password",
        }
    }
}

impl FromStr for AuthMethod {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mysql_native_password" => Ok(AuthMethod::MysqlNativePassword),
            "caching_sha2_password" => Ok(AuthMethod::CachingSha2Password),
            other => Err(GatewayError::Config(format!(
                "unsupported auth method '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Who a connection is acting as once the handshake completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct AcceptAllAuth {
    default_method: AuthMethod,
}

impl AcceptAllAuth {
    pub fn new(default_method: AuthMethod) -> Self {
        Self { default_method }
    }

    pub fn auth_methods(&self) -> &'static [AuthMethod] {
        &[AuthMethod::MysqlNativePassword, AuthMethod::CachingSha2Password]
    }

    pub fn default_method(&self) -> AuthMethod {
        self.default_method
    }

    pub fn handle_user(&self, _user: &[u8]) -> bool {
        true
    }

    /// A fresh challenge for the handshake.
    pub fn plugin_data(&self) -> Result<[u8; SALT_LEN]> {
        new_salt()
    }

    pub fn handle_plugin_data(
        &self,
        _user: &[u8],
        _server_data: &[u8],
        _client_data: &[u8],
    ) -> CallerIdentity {
        CallerIdentity {
            username: GATEWAY_USER.to_string(),
        }
    }
}

impl Default for AcceptAllAuth {
    fn default() -> Self {
        Self::new(AuthMethod::MysqlNativePassword)
    }
}

/// 20 random bytes that are safe to embed in the handshake packet: the high
/// bit is cleared and NUL or `$` are bumped to the next value.
pub fn new_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .map_err(|e| GatewayError::Random(e.to_string()))?;
    for b in salt.iter_mut() {
        *b &= 0x7f;
        if *b == b'\0' || *b == b'$' {
            *b += 1;
        }
    }
    Ok(salt)
}
