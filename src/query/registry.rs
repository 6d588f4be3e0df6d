use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::be::Session;
use crate::mysql::conn::ConnectionId;

/// What the gateway remembers about one live client connection.
#[derive(Debug)]
pub struct ClientData {
    start: Instant,
    remote_addr: Option<SocketAddr>,
    session: Mutex<Option<Session>>,
}

impl ClientData {
    fn new(remote_addr: Option<SocketAddr>) -> Self {
        Self {
            start: Instant::now(),
            remote_addr,
            session: Mutex::new(None),
        }
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// The most recent session returned by the backend, if any.
    pub fn session(&self) -> Option<Session> {
        self.session.lock().clone()
    }

    pub fn set_session(&self, session: Session) {
        *self.session.lock() = Some(session);
    }

    pub fn is_olap(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .map(Session::is_olap)
            .unwrap_or(false)
    }

    pub fn warning_count(&self) -> usize {
        self.session
            .lock()
            .as_ref()
            .map(Session::warning_count)
            .unwrap_or(0)
    }
}

/// Live connections keyed by connection id.
///
/// A single read/write lock guards the map: lookups from many connections run
/// together, connect and disconnect are exclusive. A record is only ever
/// mutated by its own connection's request path.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    clients: RwLock<HashMap<ConnectionId, Arc<ClientData>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(&self, id: ConnectionId, remote_addr: Option<SocketAddr>) -> Arc<ClientData> {
        let data = Arc::new(ClientData::new(remote_addr));
        self.clients.write().insert(id, data.clone());
        data
    }

    /// Removes the record and returns how long the connection lived.
    pub fn on_disconnect(&self, id: ConnectionId) -> Option<Duration> {
        let data = self.clients.write().remove(&id)?;
        Some(data.start.elapsed())
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<ClientData>> {
        self.clients.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}
