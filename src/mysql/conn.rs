use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tonic::Status;

use super::protocol::{SERVER_STATUS_AUTOCOMMIT, SERVER_STATUS_IN_TRANS};

pub type ConnectionId = u32;

/// Protocol-level state of one client connection.
///
/// Clones share the status flags and the cancellation token, so the result
/// writer sees flag changes made while the request is running.
#[derive(Clone, Debug)]
pub struct Conn {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    status_flags: Arc<AtomicU16>,
    cancel: CancellationToken,
}

impl Conn {
    pub fn new(id: ConnectionId, remote_addr: Option<SocketAddr>, cancel: CancellationToken) -> Self {
        Self {
            id,
            remote_addr,
            status_flags: Arc::new(AtomicU16::new(SERVER_STATUS_AUTOCOMMIT)),
            cancel,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn status_flags(&self) -> u16 {
        self.status_flags.load(Ordering::Acquire)
    }

    pub fn set_status_flag(&self, flag: u16, on: bool) {
        if on {
            self.status_flags.fetch_or(flag, Ordering::AcqRel);
        } else {
            self.status_flags.fetch_and(!flag, Ordering::AcqRel);
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.status_flags() & SERVER_STATUS_IN_TRANS != 0
    }

    pub fn autocommit(&self) -> bool {
        self.status_flags() & SERVER_STATUS_AUTOCOMMIT != 0
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Marks the connection closed; any RPC it is waiting on is abandoned.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs a backend call unless the connection goes away first.
    pub async fn cancellable<T, F>(&self, call: F) -> Result<T, Status>
    where
        F: Future<Output = Result<T, Status>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Status::cancelled("connection closed")),
            result = call => result,
        }
    }
}
