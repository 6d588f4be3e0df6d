//! The backend side of the gateway: the generated RPC-facing schema and the
//! `Backend` seam the execution bridge calls through.

mod client;
pub mod mock;

pub use client::{BackendOptions, Compression, RpcBackend};
pub use mock::MockBackend;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tonic::Status;

// Include generated protobuf code
#[allow(unused, clippy::all)]
pub mod pb {
    pub mod psdb {
        pub mod v1alpha1 {
            tonic::include_proto!("psdb.v1alpha1");
        }
    }

    pub mod vitess {
        pub mod query {
            pub mod v16 {
                tonic::include_proto!("vitess.query.v16");
            }
        }

        pub mod vtrpc {
            pub mod v16 {
                tonic::include_proto!("vitess.vtrpc.v16");
            }
        }

        pub mod vtgate {
            pub mod v16 {
                tonic::include_proto!("vitess.vtgate.v16");
            }
        }
    }
}

pub use pb::psdb::v1alpha1::{
    CreateSessionRequest, CreateSessionResponse, ExecuteRequest, ExecuteResponse, PrepareRequest,
    PrepareResponse, Session,
};

/// Server-streaming response of `StreamExecute`.
pub type ExecuteStream = BoxStream<'static, Result<ExecuteResponse, Status>>;

/// The four calls the execution bridge makes against the backend.
///
/// Implementations must be safe to call concurrently from every connection
/// task; a failed call is reported as a transport `Status`, while errors the
/// backend reports about the query itself travel inside the response.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CreateSessionResponse, Status>;

    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, Status>;

    async fn prepare(&self, request: PrepareRequest) -> Result<PrepareResponse, Status>;

    async fn stream_execute(&self, request: ExecuteRequest) -> Result<ExecuteStream, Status>;
}

impl Session {
    /// The embedded vitess session is what carries transaction state.
    pub fn is_olap(&self) -> bool {
        use pb::vitess::query::v16::execute_options::Workload;

        self.vitess_session
            .as_ref()
            .and_then(|vs| vs.options.as_ref())
            .map(|options| options.workload() == Workload::Olap)
            .unwrap_or(false)
    }

    pub fn warning_count(&self) -> usize {
        self.vitess_session
            .as_ref()
            .map(|vs| vs.warnings.len())
            .unwrap_or(0)
    }
}
