use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::be::pb::vitess::query::v16 as rpc;
use crate::be::{Backend, CreateSessionRequest, ExecuteRequest, PrepareRequest, Session};
use crate::cast::{cast_bind_vars, cast_fields, cast_query_result, cast_rpc_error};
use crate::error::{GatewayError, Result, SqlError};
use crate::mysql::conn::Conn;
use crate::mysql::protocol::{SERVER_STATUS_AUTOCOMMIT, SERVER_STATUS_IN_TRANS};
use crate::sqltypes::query::Field;
use crate::sqltypes::{BindVars, PrepareData};

use super::registry::{ClientData, ConnectionRegistry};
use super::{stream, ResultSink};

/// Bridges protocol-level operations onto the backend `Database` service.
///
/// One handler serves every connection. Per-connection state lives in the
/// registry; the backend client is shared and called concurrently.
pub struct Handler {
    backend: Arc<dyn Backend>,
    registry: ConnectionRegistry,
}

impl Handler {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            registry: ConnectionRegistry::new(),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Creates a session once to prove the configured credentials work.
    ///
    /// Clients are never authenticated locally, so this is the only check
    /// that the gateway can actually reach and use the backend.
    pub async fn test_credentials(&self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.backend.create_session(CreateSessionRequest {})).await
        {
            Ok(Ok(resp)) => {
                info!(
                    branch = %resp.branch,
                    user = resp.user.as_ref().map(|u| u.username.as_str()).unwrap_or(""),
                    "backend credentials verified"
                );
                Ok(())
            }
            Ok(Err(status)) => Err(GatewayError::Startup(format!(
                "credential check failed: {}",
                SqlError::from_status(&status)
            ))),
            Err(_) => Err(GatewayError::Startup(format!(
                "credential check timed out after {:?}",
                timeout
            ))),
        }
    }

    pub fn new_connection(&self, conn: &Conn) {
        self.registry.on_connect(conn.id(), conn.remote_addr());
        debug!(conn_id = conn.id(), addr = ?conn.remote_addr(), "connection opened");
    }

    pub fn connection_closed(&self, conn: &Conn) {
        conn.close();
        if let Some(duration) = self.registry.on_disconnect(conn.id()) {
            debug!(
                conn_id = conn.id(),
                addr = ?conn.remote_addr(),
                duration_ms = duration.as_millis() as u64,
                "connection closed"
            );
        }
    }

    pub async fn com_query<S>(&self, conn: &Conn, query: &str, sink: &mut S) -> Result<()>
    where
        S: ResultSink + ?Sized,
    {
        let data = self.client_data(conn)?;
        self.execute(conn, &data, query, HashMap::new(), sink).await
    }

    /// Prepares `query` on the backend and returns the result fields it will
    /// produce.
    pub async fn com_prepare(
        &self,
        conn: &Conn,
        query: &str,
        bind_vars: &BindVars,
    ) -> Result<Vec<Field>> {
        let data = self.client_data(conn)?;
        let request = PrepareRequest {
            session: data.session(),
            query: query.to_string(),
            bind_variables: cast_bind_vars(bind_vars.clone()),
        };

        let resp = conn
            .cancellable(self.backend.prepare(request))
            .await
            .map_err(|status| SqlError::from_status(&status))?;

        bind_session(conn, &data, resp.session);
        if let Some(err) = resp.error {
            return Err(SqlError::from_rpc_error(&cast_rpc_error(err)).into());
        }
        Ok(cast_fields(resp.fields))
    }

    pub async fn com_stmt_execute<S>(
        &self,
        conn: &Conn,
        prepare: &PrepareData,
        sink: &mut S,
    ) -> Result<()>
    where
        S: ResultSink + ?Sized,
    {
        let data = self.client_data(conn)?;
        let bind_vars = cast_bind_vars(prepare.bind_vars.clone());
        self.execute(conn, &data, &prepare.prepare_stmt, bind_vars, sink)
            .await
    }

    pub fn warning_count(&self, conn: &Conn) -> u16 {
        self.registry
            .get(conn.id())
            .map(|data| data.warning_count().min(u16::MAX as usize) as u16)
            .unwrap_or(0)
    }

    pub fn com_register_replica(
        &self,
        conn: &Conn,
        replica_host: &str,
        replica_port: u16,
        replica_user: &str,
        _replica_password: &str,
    ) -> Result<()> {
        debug!(
            conn_id = conn.id(),
            replica_host,
            replica_port,
            replica_user,
            "rejecting replica registration"
        );
        Err(SqlError::not_implemented().into())
    }

    pub fn com_binlog_dump(&self, conn: &Conn, log_file: &str, binlog_pos: u32) -> Result<()> {
        debug!(conn_id = conn.id(), log_file, binlog_pos, "rejecting binlog dump");
        Err(SqlError::not_implemented().into())
    }

    pub fn com_binlog_dump_gtid(
        &self,
        conn: &Conn,
        log_file: &str,
        log_pos: u64,
        gtid_set: &str,
    ) -> Result<()> {
        debug!(
            conn_id = conn.id(),
            log_file,
            log_pos,
            gtid_set,
            "rejecting binlog dump"
        );
        Err(SqlError::not_implemented().into())
    }

    fn client_data(&self, conn: &Conn) -> Result<Arc<ClientData>> {
        self.registry
            .get(conn.id())
            .ok_or(GatewayError::UnknownConnection(conn.id()))
    }

    /// Runs a query on the path the current session's workload selects.
    async fn execute<S>(
        &self,
        conn: &Conn,
        data: &ClientData,
        query: &str,
        bind_variables: HashMap<String, rpc::BindVariable>,
        sink: &mut S,
    ) -> Result<()>
    where
        S: ResultSink + ?Sized,
    {
        let session = data.session();
        let olap = session.as_ref().map(Session::is_olap).unwrap_or(false);
        let request = ExecuteRequest {
            session,
            query: query.to_string(),
            bind_variables,
        };

        if olap {
            return stream::stream_execute(self.backend.as_ref(), conn, data, request, sink).await;
        }

        let resp = conn
            .cancellable(self.backend.execute(request))
            .await
            .map_err(|status| {
                warn!(conn_id = conn.id(), "execute failed: {}", status.message());
                SqlError::from_status(&status)
            })?;

        bind_session(conn, data, resp.session);
        if let Some(err) = resp.error {
            return Err(SqlError::from_rpc_error(&cast_rpc_error(err)).into());
        }
        let mut result = resp.result.map(cast_query_result).unwrap_or_default();
        let fields = std::mem::take(&mut result.fields);
        sink.send(&fields, result).await
    }
}

/// Adopts a session returned by the backend.
///
/// Responses without a session (or without the embedded vitess session) leave
/// both the stored session and the status flags untouched.
pub(super) fn bind_session(conn: &Conn, data: &ClientData, session: Option<Session>) {
    let Some(session) = session else {
        return;
    };
    let Some(vitess_session) = session.vitess_session.as_ref() else {
        return;
    };
    conn.set_status_flag(SERVER_STATUS_IN_TRANS, vitess_session.in_transaction);
    conn.set_status_flag(SERVER_STATUS_AUTOCOMMIT, vitess_session.autocommit);
    data.set_session(session);
}
