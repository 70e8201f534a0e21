//! A single memcached server as seen by the client.

use crate::error::Result;
use crate::pool::SocketPool;
use crate::protocol::{Command, Protocol, Reply};
use crate::types::Endpoint;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Liveness of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Alive,
    /// Skipped by the locator until the dead timeout elapses.
    Dead { since: Instant },
}

/// One server: an endpoint, its socket pool, and its liveness state.
pub struct Node {
    endpoint: Endpoint,
    pool: SocketPool,
    protocol: Arc<dyn Protocol>,
    state: RwLock<NodeState>,
}

impl Node {
    pub fn new(endpoint: Endpoint, pool: SocketPool, protocol: Arc<dyn Protocol>) -> Self {
        Self {
            endpoint,
            pool,
            protocol,
            state: RwLock::new(NodeState::Alive),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> NodeState {
        *self.state.read()
    }

    pub fn is_alive(&self) -> bool {
        matches!(*self.state.read(), NodeState::Alive)
    }

    /// Declare the node Dead. Also restarts the dead timer on a failed
    /// probe.
    pub fn mark_dead(&self) {
        *self.state.write() = NodeState::Dead {
            since: Instant::now(),
        };
    }

    pub fn mark_alive(&self) {
        *self.state.write() = NodeState::Alive;
    }

    /// Whether the node has been Dead for at least `dead_timeout` and
    /// should be probed.
    pub fn due_for_probe(&self, dead_timeout: Duration) -> bool {
        match *self.state.read() {
            NodeState::Alive => false,
            NodeState::Dead { since } => since.elapsed() >= dead_timeout,
        }
    }

    /// Execute one command end-to-end: acquire a socket, write the
    /// request, read the response, release.
    pub async fn execute(&self, command: &Command) -> Result<Reply> {
        let mut socket = self.pool.acquire().await?;
        trace!(endpoint = %self.endpoint, "executing command");
        self.protocol.execute(&mut socket, command).await
    }

    /// Close the node's socket pool.
    pub fn dispose(&self) {
        self.pool.dispose();
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}
