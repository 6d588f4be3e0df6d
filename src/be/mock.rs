//! Mock backend for testing
//!
//! Scripts the responses of the `Database` service and records every call so
//! tests can drive the execution bridge without a real upstream.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tonic::Status;

use super::pb::vitess::query::v16 as rpcquery;
use super::pb::vitess::query::v16::execute_options::Workload;
use super::pb::vitess::vtgate::v16 as vtgate;
use super::pb::vitess::vtrpc::v16 as rpcvtrpc;
use super::{
    Backend, CreateSessionRequest, CreateSessionResponse, ExecuteRequest, ExecuteResponse,
    ExecuteStream, PrepareRequest, PrepareResponse, Session,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    CreateSession,
    Execute,
    Prepare,
    StreamExecute,
}

/// One request as the backend received it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub kind: CallKind,
    pub query: String,
    pub session: Option<Session>,
    pub bind_variables: HashMap<String, rpcquery::BindVariable>,
}

type StreamScript = Result<Vec<Result<ExecuteResponse, Status>>, Status>;

#[derive(Default)]
struct MockState {
    sessions: VecDeque<Result<CreateSessionResponse, Status>>,
    executes: VecDeque<Result<ExecuteResponse, Status>>,
    prepares: VecDeque<Result<PrepareResponse, Status>>,
    streams: VecDeque<StreamScript>,
    calls: Vec<RecordedCall>,
}

/// Mock backend that answers from queued responses.
///
/// When a queue is empty the call succeeds with an empty response.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
    delay: Option<Duration>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            delay: Some(delay),
        }
    }

    pub fn push_create_session(&self, response: Result<CreateSessionResponse, Status>) {
        self.state.lock().sessions.push_back(response);
    }

    pub fn push_execute(&self, response: Result<ExecuteResponse, Status>) {
        self.state.lock().executes.push_back(response);
    }

    pub fn push_prepare(&self, response: Result<PrepareResponse, Status>) {
        self.state.lock().prepares.push_back(response);
    }

    /// Queues one `StreamExecute` call: either the call itself fails, or the
    /// stream yields the given items in order.
    pub fn push_stream(&self, script: StreamScript) {
        self.state.lock().streams.push_back(script);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    fn record(
        &self,
        kind: CallKind,
        query: &str,
        session: &Option<Session>,
        bind_variables: &HashMap<String, rpcquery::BindVariable>,
    ) {
        self.state.lock().calls.push(RecordedCall {
            kind,
            query: query.to_string(),
            session: session.clone(),
            bind_variables: bind_variables.clone(),
        });
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn create_session(
        &self,
        _request: CreateSessionRequest,
    ) -> Result<CreateSessionResponse, Status> {
        self.record(CallKind::CreateSession, "", &None, &HashMap::new());
        self.pause().await;
        let next = self.state.lock().sessions.pop_front();
        next.unwrap_or_else(|| Ok(CreateSessionResponse::default()))
    }

    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, Status> {
        self.record(
            CallKind::Execute,
            &request.query,
            &request.session,
            &request.bind_variables,
        );
        self.pause().await;
        let next = self.state.lock().executes.pop_front();
        next.unwrap_or_else(|| Ok(ExecuteResponse::default()))
    }

    async fn prepare(&self, request: PrepareRequest) -> Result<PrepareResponse, Status> {
        self.record(
            CallKind::Prepare,
            &request.query,
            &request.session,
            &request.bind_variables,
        );
        self.pause().await;
        let next = self.state.lock().prepares.pop_front();
        next.unwrap_or_else(|| Ok(PrepareResponse::default()))
    }

    async fn stream_execute(&self, request: ExecuteRequest) -> Result<ExecuteStream, Status> {
        self.record(
            CallKind::StreamExecute,
            &request.query,
            &request.session,
            &request.bind_variables,
        );
        self.pause().await;
        let next = self.state.lock().streams.pop_front();
        let items = next.unwrap_or_else(|| Ok(Vec::new()))?;
        Ok(futures::stream::iter(items).boxed())
    }
}

/// A backend session with the given transaction state and workload.
pub fn session(signature: &str, in_transaction: bool, autocommit: bool, olap: bool) -> Session {
    let workload = if olap { Workload::Olap } else { Workload::Oltp };
    Session {
        signature: signature.as_bytes().to_vec(),
        vitess_session: Some(vtgate::Session {
            in_transaction,
            autocommit,
            options: Some(rpcquery::ExecuteOptions {
                workload: workload as i32,
                ..Default::default()
            }),
            ..Default::default()
        }),
    }
}

/// Adds `count` warnings to a session.
pub fn with_warnings(mut session: Session, count: usize) -> Session {
    if let Some(vs) = session.vitess_session.as_mut() {
        vs.warnings = (0..count)
            .map(|i| rpcquery::QueryWarning {
                code: 1265,
                message: format!("warning {}", i),
            })
            .collect();
    }
    session
}

pub fn field(name: &str, ty: rpcquery::Type) -> rpcquery::Field {
    rpcquery::Field {
        name: name.to_string(),
        r#type: ty as i32,
        ..Default::default()
    }
}

pub fn row(values: &[Option<&[u8]>]) -> rpcquery::Row {
    let mut row = rpcquery::Row::default();
    for value in values {
        match value {
            Some(bytes) => {
                row.lengths.push(bytes.len() as i64);
                row.values.extend_from_slice(bytes);
            }
            None => row.lengths.push(-1),
        }
    }
    row
}

pub fn result(fields: Vec<rpcquery::Field>, rows: Vec<rpcquery::Row>) -> rpcquery::QueryResult {
    rpcquery::QueryResult {
        fields,
        rows,
        ..Default::default()
    }
}

pub fn rpc_error(code: rpcvtrpc::Code, message: &str) -> rpcvtrpc::RpcError {
    rpcvtrpc::RpcError {
        message: message.to_string(),
        code: code as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_queues_answer_with_defaults() {
        let backend = MockBackend::new();
        let resp = backend.execute(ExecuteRequest::default()).await.unwrap();
        assert!(resp.result.is_none());
        assert!(resp.session.is_none());

        let mut stream = backend.stream_execute(ExecuteRequest::default()).await.unwrap();
        assert!(stream.next().await.is_none());
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn records_requests_in_order() {
        let backend = MockBackend::new();
        backend.push_execute(Err(Status::unavailable("down")));

        let request = ExecuteRequest {
            session: Some(session("s1", false, true, false)),
            query: "select 1".to_string(),
            bind_variables: HashMap::new(),
        };
        assert!(backend.execute(request).await.is_err());
        backend
            .prepare(PrepareRequest {
                query: "select ?".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let calls = backend.calls();
        assert_eq!(calls[0].kind, CallKind::Execute);
        assert_eq!(calls[0].query, "select 1");
        assert_eq!(calls[0].session.as_ref().unwrap().signature, b"s1");
        assert_eq!(calls[1].kind, CallKind::Prepare);
    }

    #[test]
    fn session_helpers() {
        let s = with_warnings(session("s", true, false, true), 3);
        assert!(s.is_olap());
        assert_eq!(s.warning_count(), 3);
        assert!(!session("s", false, true, false).is_olap());
        assert!(!Session::default().is_olap());
    }
}
