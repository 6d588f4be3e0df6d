mod handler;
mod registry;
mod stream;

pub use handler::Handler;
pub use registry::{ClientData, ConnectionRegistry};

use async_trait::async_trait;

use crate::error::Result;
use crate::sqltypes::query::{Field, QueryResult};

/// Receives the results of one request.
///
/// Buffered execution calls `send` once; streaming execution calls it once per
/// result page. `fields` describe the columns of every page and are the same
/// slice for the whole request; `result.fields` is always empty. An error
/// returned by the sink aborts the request and is handed back to the caller
/// unchanged.
#[async_trait]
pub trait ResultSink: Send {
    async fn send(&mut self, fields: &[Field], result: QueryResult) -> Result<()>;
}

/// Collects every page with its fields; used where the whole result is
/// wanted in memory.
#[async_trait]
impl ResultSink for Vec<QueryResult> {
    async fn send(&mut self, fields: &[Field], result: QueryResult) -> Result<()> {
        self.push(QueryResult {
            fields: fields.to_vec(),
            ..result
        });
        Ok(())
    }
}
