pub mod auth;
pub mod conn;
pub mod params;
pub mod protocol;
mod server;
mod shim;
mod timeout;
pub mod tls;

pub use auth::{AcceptAllAuth, AuthMethod, CallerIdentity};
pub use conn::{Conn, ConnectionId};
pub use server::{
    GatewayServer, ServerOptions, CONN_IO_TIMEOUT, CONN_KEEPALIVE, CREDENTIAL_CHECK_TIMEOUT,
};
pub use shim::GatewayShim;
