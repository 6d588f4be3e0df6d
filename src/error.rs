use std::fmt;

use thiserror::Error;

use crate::sqltypes::vtrpc::{Code, RpcError};

/// MySQL error numbers produced by the gateway.
pub mod errno {
    pub const ER_ACCESS_DENIED_ERROR: u16 = 1045;
    pub const ER_UNKNOWN_ERROR: u16 = 1105;
    pub const ER_TOO_MANY_USER_CONNECTIONS: u16 = 1203;
    pub const ER_NOT_SUPPORTED_YET: u16 = 1235;
    pub const ER_QUERY_INTERRUPTED: u16 = 1317;
    pub const ER_INTERNAL_ERROR: u16 = 1815;
}

/// SQLSTATE values paired with the error numbers above.
pub mod sqlstate {
    pub const UNKNOWN: &str = "HY000";
    pub const ACCESS_DENIED: &str = "28000";
    pub const CLIENT_ERROR: &str = "42000";
    pub const QUERY_INTERRUPTED: &str = "70100";
}

/// A MySQL-level error: what a client sees in an ERR packet.
///
/// Every failure the execution bridge reports (transport failures, errors
/// returned by the backend inside a response, unsupported commands) goes
/// through one of the constructors here so the wire encoding is uniform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlError {
    pub num: u16,
    pub state: String,
    pub message: String,
}

impl SqlError {
    pub fn new(num: u16, state: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            num,
            state: state.into(),
            message: message.into(),
        }
    }

    /// Builds the error from a structured error payload returned by the backend.
    ///
    /// When the message already carries `(errno N) (sqlstate S)` those values
    /// win; otherwise the error number is derived from the RPC code.
    pub fn from_rpc_error(err: &RpcError) -> Self {
        if let Some((num, state)) = extract_errno(&err.message) {
            return Self::new(num, state, err.message.clone());
        }
        let (num, state) = errno_for_code(err.code());
        Self::new(num, state, err.message.clone())
    }

    /// Builds the error from a failed RPC (the call never produced a response).
    pub fn from_status(status: &tonic::Status) -> Self {
        let message = format!(
            "rpc error: code = {:?} desc = {}",
            status.code(),
            status.message()
        );
        if let Some((num, state)) = extract_errno(status.message()) {
            return Self::new(num, state, message);
        }
        let (num, state) = errno_for_code(code_from_status(status.code()));
        Self::new(num, state, message)
    }

    /// The fixed error for commands the gateway does not serve.
    pub fn not_implemented() -> Self {
        Self::new(errno::ER_UNKNOWN_ERROR, sqlstate::UNKNOWN, "not implemented")
    }

    /// Generic conversion for anything that is not already a SQL error.
    pub fn from_error(err: &GatewayError) -> Self {
        match err {
            GatewayError::Sql(e) => e.clone(),
            other => Self::new(errno::ER_UNKNOWN_ERROR, sqlstate::UNKNOWN, other.to_string()),
        }
    }
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if extract_errno(&self.message).is_some() {
            return f.write_str(&self.message);
        }
        write!(
            f,
            "{} (errno {}) (sqlstate {})",
            self.message, self.num, self.state
        )
    }
}

impl std::error::Error for SqlError {}

/// Finds `(errno N) (sqlstate XXXXX)` inside a backend message.
fn extract_errno(message: &str) -> Option<(u16, String)> {
    let start = message.find("(errno ")?;
    let rest = &message[start + "(errno ".len()..];
    let end = rest.find(')')?;
    let num: u16 = rest[..end].trim().parse().ok()?;

    let rest = rest[end + 1..].trim_start().strip_prefix("(sqlstate ")?;
    let state = rest.get(..5)?;
    if !state.chars().all(|c| c.is_ascii_alphanumeric()) || !rest[5..].starts_with(')') {
        return None;
    }
    Some((num, state.to_string()))
}

fn errno_for_code(code: Code) -> (u16, &'static str) {
    match code {
        Code::Canceled | Code::DeadlineExceeded | Code::Aborted => {
            (errno::ER_QUERY_INTERRUPTED, sqlstate::QUERY_INTERRUPTED)
        }
        Code::Unauthenticated => (errno::ER_ACCESS_DENIED_ERROR, sqlstate::ACCESS_DENIED),
        Code::ResourceExhausted => (errno::ER_TOO_MANY_USER_CONNECTIONS, sqlstate::CLIENT_ERROR),
        Code::Unimplemented => (errno::ER_NOT_SUPPORTED_YET, sqlstate::CLIENT_ERROR),
        Code::Internal => (errno::ER_INTERNAL_ERROR, sqlstate::UNKNOWN),
        _ => (errno::ER_UNKNOWN_ERROR, sqlstate::UNKNOWN),
    }
}

fn code_from_status(code: tonic::Code) -> Code {
    match code {
        tonic::Code::Ok => Code::Ok,
        tonic::Code::Cancelled => Code::Canceled,
        tonic::Code::Unknown => Code::Unknown,
        tonic::Code::InvalidArgument => Code::InvalidArgument,
        tonic::Code::DeadlineExceeded => Code::DeadlineExceeded,
        tonic::Code::NotFound => Code::NotFound,
        tonic::Code::AlreadyExists => Code::AlreadyExists,
        tonic::Code::PermissionDenied => Code::PermissionDenied,
        tonic::Code::ResourceExhausted => Code::ResourceExhausted,
        tonic::Code::FailedPrecondition => Code::FailedPrecondition,
        tonic::Code::Aborted => Code::Aborted,
        tonic::Code::OutOfRange => Code::OutOfRange,
        tonic::Code::Unimplemented => Code::Unimplemented,
        tonic::Code::Internal => Code::Internal,
        tonic::Code::Unavailable => Code::Unavailable,
        tonic::Code::DataLoss => Code::DataLoss,
        tonic::Code::Unauthenticated => Code::Unauthenticated,
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Sql(#[from] SqlError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Startup error: {0}")]
    Startup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Random source failure: {0}")]
    Random(String),

    #[error("Unknown connection: {0}")]
    UnknownConnection(u32),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
