use futures::StreamExt;
use tonic::Status;
use tracing::{debug, warn};

use crate::be::{Backend, ExecuteRequest};
use crate::cast::{cast_query_result, cast_rpc_error};
use crate::error::{Result, SqlError};
use crate::mysql::conn::Conn;
use crate::sqltypes::query::Field;

use super::handler::bind_session;
use super::registry::ClientData;
use super::ResultSink;

/// Drains a `StreamExecute` call into `sink`, one page at a time.
///
/// Every message is taken apart as it arrives: the session is bound first,
/// an error payload ends the stream, and a result page is delivered along
/// with the fields captured from the first page (the backend sends them only
/// once). The captured fields are lent to the sink, never copied. Each
/// message is dropped before the next one is received, so at most one page
/// is held in memory.
pub(super) async fn stream_execute<S>(
    backend: &dyn Backend,
    conn: &Conn,
    data: &ClientData,
    request: ExecuteRequest,
    sink: &mut S,
) -> Result<()>
where
    S: ResultSink + ?Sized,
{
    let mut stream = conn
        .cancellable(backend.stream_execute(request))
        .await
        .map_err(|status| SqlError::from_status(&status))?;

    let mut fields: Option<Vec<Field>> = None;
    let mut pages = 0usize;
    let mut rows = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = conn.cancel_token().cancelled() => {
                Some(Err(Status::cancelled("connection closed")))
            }
            item = stream.next() => item,
        };

        let mut message = match next {
            None => break,
            Some(Ok(message)) => message,
            Some(Err(status)) => {
                warn!(conn_id = conn.id(), pages, "stream failed: {}", status.message());
                return Err(SqlError::from_status(&status).into());
            }
        };

        bind_session(conn, data, message.session.take());

        if let Some(err) = message.error.take() {
            return Err(SqlError::from_rpc_error(&cast_rpc_error(err)).into());
        }

        if let Some(result) = message.result.take() {
            let mut page = cast_query_result(result);
            let page_fields = std::mem::take(&mut page.fields);
            let fields = fields.get_or_insert(page_fields);
            pages += 1;
            rows += page.row_count();
            sink.send(fields, page).await?;
        }
    }

    debug!(conn_id = conn.id(), pages, rows, "stream finished");
    Ok(())
}
