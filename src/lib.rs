//! MySQL wire protocol gateway in front of the psdb `Database` RPC service.
//!
//! Clients speak MySQL to the front door (`mysql`), which hands every command
//! to the execution bridge (`query`). The bridge tracks one backend session
//! per connection and runs queries through a `be::Backend`, converting
//! results between the two schemas with `cast`.

pub mod be;
pub mod cast;
pub mod config;
pub mod error;
pub mod mysql;
pub mod query;
pub mod sqltypes;

pub use config::Config;
pub use error::{GatewayError, Result, SqlError};
pub use mysql::{GatewayServer, ServerOptions};
pub use query::{Handler, ResultSink};
