use std::collections::HashMap;
use std::io;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use opensrv_mysql::{
    AsyncMysqlShim, Column, ColumnFlags, ColumnType, ErrorKind, InitWriter, OkResponse,
    ParamParser, QueryResultWriter, RowWriter, StatementMetaWriter, StatusFlags,
};
use tokio::io::AsyncWrite;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result, SqlError};
use crate::query::{Handler, ResultSink};
use crate::sqltypes::query::{BindVariable, Field, QueryResult};
use crate::sqltypes::{BindVars, PrepareData};

use super::auth::{AcceptAllAuth, SALT_LEN};
use super::conn::Conn;
use super::params;
use super::protocol::{map_column, map_sql_error};

/// opensrv shim that forwards every client command to the execution bridge.
///
/// One instance is created per connection. It owns the connection's protocol
/// state and its prepared statement table; everything the backend knows about
/// the connection lives in the handler's registry.
pub struct GatewayShim {
    handler: Arc<Handler>,
    auth: Arc<AcceptAllAuth>,
    conn: Conn,
    salt: [u8; SALT_LEN],
    server_version: String,
    statements: HashMap<u32, PrepareData>,
    next_statement_id: u32,
}

impl GatewayShim {
    /// Registers the connection with the handler. The handshake challenge is
    /// drawn here because opensrv asks for it through an infallible call.
    pub fn new(
        handler: Arc<Handler>,
        auth: Arc<AcceptAllAuth>,
        conn: Conn,
        server_version: String,
    ) -> Result<Self> {
        let salt = auth.plugin_data()?;
        handler.new_connection(&conn);
        Ok(Self {
            handler,
            auth,
            conn,
            salt,
            server_version,
            statements: HashMap::new(),
            next_statement_id: 1,
        })
    }

    pub fn conn(&self) -> &Conn {
        &self.conn
    }
}

impl Drop for GatewayShim {
    fn drop(&mut self) {
        self.handler.connection_closed(&self.conn);
    }
}

#[async_trait]
impl<W> AsyncMysqlShim<W> for GatewayShim
where
    W: AsyncWrite + Send + Unpin,
{
    type Error = io::Error;

    fn version(&self) -> String {
        self.server_version.clone()
    }

    fn connect_id(&self) -> u32 {
        self.conn.id()
    }

    fn default_auth_plugin(&self) -> &str {
        self.auth.default_method().name()
    }

    async fn auth_plugin_for_username(&self, _user: &[u8]) -> &str {
        self.auth.default_method().name()
    }

    fn salt(&self) -> [u8; 20] {
        self.salt
    }

    async fn authenticate(
        &self,
        _auth_plugin: &str,
        username: &[u8],
        salt: &[u8],
        auth_data: &[u8],
    ) -> bool {
        if !self.auth.handle_user(username) {
            return false;
        }
        let identity = self.auth.handle_plugin_data(username, salt, auth_data);
        debug!(
            conn_id = self.conn.id(),
            client_user = %String::from_utf8_lossy(username),
            identity = %identity.username,
            "client authenticated"
        );
        true
    }

    async fn on_prepare<'a>(
        &'a mut self,
        query: &'a str,
        info: StatementMetaWriter<'a, W>,
    ) -> io::Result<()> {
        let param_count = params::count_placeholders(query);
        let Ok(param_count) = u16::try_from(param_count) else {
            return info
                .error(ErrorKind::ER_PS_MANY_PARAM, b"too many placeholders")
                .await;
        };
        let bind_vars: BindVars = (0..param_count as usize)
            .map(|i| (params::bind_var_name(i), BindVariable::default()))
            .collect();

        let fields = match self.handler.com_prepare(&self.conn, query, &bind_vars).await {
            Ok(fields) => fields,
            Err(e) => {
                let (kind, msg) = map_sql_error(&SqlError::from_error(&e));
                return info.error(kind, msg.as_bytes()).await;
            }
        };

        let statement_id = self.next_statement_id;
        self.next_statement_id = self.next_statement_id.wrapping_add(1).max(1);
        self.statements.insert(
            statement_id,
            PrepareData {
                statement_id,
                prepare_stmt: query.to_string(),
                param_count,
                bind_vars,
            },
        );
        debug!(conn_id = self.conn.id(), statement_id, param_count, "statement prepared");

        let param_columns: Vec<Column> = (0..param_count)
            .map(|_| Column {
                table: String::new(),
                column: "?".to_string(),
                coltype: ColumnType::MYSQL_TYPE_VAR_STRING,
                colflags: ColumnFlags::empty(),
            })
            .collect();
        let columns: Vec<Column> = fields.iter().map(|f| map_column(f, true)).collect();
        info.reply(statement_id, &param_columns, &columns).await
    }

    async fn on_execute<'a>(
        &'a mut self,
        id: u32,
        params: ParamParser<'a>,
        results: QueryResultWriter<'a, W>,
    ) -> io::Result<()> {
        let Some(prepare) = self.statements.get_mut(&id) else {
            let msg = format!("unknown prepared statement {}", id);
            return results
                .error(ErrorKind::ER_UNKNOWN_STMT_HANDLER, msg.as_bytes())
                .await;
        };
        prepare.bind_vars = params::bind_vars(params);
        let prepare = prepare.clone();

        let columns = OnceLock::new();
        let mut sink = WireResultSink::new(results, &columns, true, &self.conn, &self.handler);
        let outcome = self
            .handler
            .com_stmt_execute(&self.conn, &prepare, &mut sink)
            .await;
        sink.complete(outcome).await
    }

    async fn on_close<'a>(&'a mut self, stmt: u32)
    where
        W: 'async_trait,
    {
        if self.statements.remove(&stmt).is_some() {
            debug!(conn_id = self.conn.id(), statement_id = stmt, "statement closed");
        }
    }

    async fn on_query<'a>(
        &'a mut self,
        query: &'a str,
        results: QueryResultWriter<'a, W>,
    ) -> io::Result<()> {
        let columns = OnceLock::new();
        let mut sink = WireResultSink::new(results, &columns, false, &self.conn, &self.handler);
        let outcome = self.handler.com_query(&self.conn, query, &mut sink).await;
        sink.complete(outcome).await
    }

    async fn on_init<'a>(&'a mut self, database: &'a str, w: InitWriter<'a, W>) -> io::Result<()> {
        let query = format!("use `{}`", database.replace('`', "``"));
        let mut results: Vec<QueryResult> = Vec::new();
        match self.handler.com_query(&self.conn, &query, &mut results).await {
            Ok(()) => w.ok().await,
            Err(e) => {
                let (kind, msg) = map_sql_error(&SqlError::from_error(&e));
                w.error(kind, msg.as_bytes()).await
            }
        }
    }
}

enum SinkState<'w, W: AsyncWrite + Send + Unpin> {
    Pending(QueryResultWriter<'w, W>),
    Rows(RowWriter<'w, W>),
    Done,
}

/// Writes handler results to the client as they arrive.
///
/// The first result decides the response shape: one without fields or rows
/// is an OK packet, anything else starts a result set that later pages
/// append rows to.
struct WireResultSink<'w, W: AsyncWrite + Send + Unpin> {
    state: SinkState<'w, W>,
    columns: &'w OnceLock<Vec<Column>>,
    binary: bool,
    conn: &'w Conn,
    handler: &'w Handler,
}

impl<'w, W: AsyncWrite + Send + Unpin> WireResultSink<'w, W> {
    fn new(
        results: QueryResultWriter<'w, W>,
        columns: &'w OnceLock<Vec<Column>>,
        binary: bool,
        conn: &'w Conn,
        handler: &'w Handler,
    ) -> Self {
        Self {
            state: SinkState::Pending(results),
            columns,
            binary,
            conn,
            handler,
        }
    }

    async fn complete(self, outcome: Result<()>) -> io::Result<()> {
        match outcome {
            Ok(()) => self.finish().await,
            Err(e) => self.fail(e).await,
        }
    }

    fn ok_response(&self, result: &QueryResult) -> OkResponse {
        OkResponse {
            affected_rows: result.rows_affected,
            last_insert_id: result.insert_id,
            status_flags: StatusFlags::from_bits_truncate(self.conn.status_flags()),
            warnings: self.handler.warning_count(self.conn),
            info: result.info.clone(),
            ..Default::default()
        }
    }

    async fn finish(self) -> io::Result<()> {
        let ok = self.ok_response(&QueryResult::default());
        match self.state {
            SinkState::Pending(writer) => writer.completed(ok).await,
            SinkState::Rows(rows) => rows.finish().await,
            SinkState::Done => Ok(()),
        }
    }

    /// Reports a failed request. Client connection failures are returned as
    /// they are so opensrv tears the connection down.
    async fn fail(self, err: GatewayError) -> io::Result<()> {
        let err = match err {
            GatewayError::Io(e) => return Err(e),
            other => SqlError::from_error(&other),
        };
        warn!(conn_id = self.conn.id(), "query failed: {}", err);
        let (kind, msg) = map_sql_error(&err);
        match self.state {
            SinkState::Pending(writer) => writer.error(kind, msg.as_bytes()).await,
            SinkState::Rows(rows) => rows.finish_error(kind, &msg.as_bytes()).await,
            SinkState::Done => Ok(()),
        }
    }
}

async fn write_rows<W>(rows: &mut RowWriter<'_, W>, result: &QueryResult) -> io::Result<()>
where
    W: AsyncWrite + Send + Unpin,
{
    for row in &result.rows {
        rows.write_row(row.values()).await?;
    }
    Ok(())
}

#[async_trait]
impl<'w, W> ResultSink for WireResultSink<'w, W>
where
    W: AsyncWrite + Send + Unpin,
{
    async fn send(&mut self, fields: &[Field], result: QueryResult) -> Result<()> {
        match std::mem::replace(&mut self.state, SinkState::Done) {
            SinkState::Pending(writer) => {
                // Neither fields nor rows: answered with an OK packet.
                if fields.is_empty() && result.rows.is_empty() {
                    let ok = self.ok_response(&result);
                    writer.completed(ok).await?;
                    return Ok(());
                }
                let binary = self.binary;
                let columns = self
                    .columns
                    .get_or_init(|| fields.iter().map(|f| map_column(f, binary)).collect());
                let mut rows = writer.start(columns).await?;
                write_rows(&mut rows, &result).await?;
                self.state = SinkState::Rows(rows);
            }
            SinkState::Rows(mut rows) => {
                write_rows(&mut rows, &result).await?;
                self.state = SinkState::Rows(rows);
            }
            SinkState::Done => {
                return Err(GatewayError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "result already sent",
                )));
            }
        }
        Ok(())
    }
}
