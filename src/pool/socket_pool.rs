//! Bounded per-node socket pool.

use crate::auth::AuthProvider;
use crate::config::SocketPoolConfig;
use crate::error::{Error, Result};
use crate::pool::socket::PooledSocket;
use crate::protocol::Protocol;
use crate::types::Endpoint;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

struct PoolInner {
    endpoint: Endpoint,
    config: SocketPoolConfig,
    protocol: Arc<dyn Protocol>,
    auth: Option<Arc<dyn AuthProvider>>,
    idle: Mutex<Vec<PooledSocket>>,
    slots: Arc<Semaphore>,
    disposed: AtomicBool,
}

/// A bounded pool of sockets to one node.
///
/// At most `max_pool_size` sockets exist at once; an acquisition at the
/// cap waits up to `queue_timeout` before failing with `PoolExhausted`.
/// Fresh binary sockets run the SASL handshake before first use.
#[derive(Clone)]
pub struct SocketPool {
    inner: Arc<PoolInner>,
}

impl SocketPool {
    pub fn new(
        endpoint: Endpoint,
        config: SocketPoolConfig,
        protocol: Arc<dyn Protocol>,
        auth: Option<Arc<dyn AuthProvider>>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_pool_size));
        Self {
            inner: Arc::new(PoolInner {
                endpoint,
                config,
                protocol,
                auth,
                idle: Mutex::new(Vec::new()),
                slots,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Connect `min_pool_size` sockets up front. Connection failures are
    /// logged and left for the failure policy to observe on first use.
    pub async fn warm_up(&self) {
        for _ in 0..self.inner.config.min_pool_size {
            match self.connect_one().await {
                Ok(socket) => self.inner.idle.lock().push(socket),
                Err(e) => {
                    warn!(endpoint = %self.inner.endpoint, error = %e, "pre-warm connect failed");
                    break;
                }
            }
        }
    }

    /// Number of idle sockets currently held.
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Take a ready socket, or build one if the pool is under its cap.
    pub async fn acquire(&self) -> Result<SocketGuard> {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(Error::Shutdown);
        }

        let permit = match timeout(
            self.inner.config.queue_timeout,
            self.inner.slots.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            // Semaphore closed by dispose().
            Ok(Err(_)) => return Err(Error::Shutdown),
            Err(_) => {
                return Err(Error::PoolExhausted {
                    endpoint: self.inner.endpoint.to_string(),
                })
            }
        };

        // The lock guard must not live across the connect await below.
        let idle = self.inner.idle.lock().pop();
        let socket = match idle {
            Some(socket) => socket,
            None => self.connect_one().await?,
        };

        Ok(SocketGuard {
            socket: Some(socket),
            _permit: permit,
            inner: self.inner.clone(),
        })
    }

    async fn connect_one(&self) -> Result<PooledSocket> {
        let mut socket = PooledSocket::connect(
            &self.inner.endpoint,
            self.inner.config.connection_timeout,
            self.inner.config.receive_timeout,
        )
        .await?;
        if let Some(auth) = &self.inner.auth {
            self.inner
                .protocol
                .authenticate(&mut socket, auth.as_ref())
                .await?;
            debug!(endpoint = %self.inner.endpoint, "socket authenticated");
        }
        Ok(socket)
    }

    /// Close the pool. Idle sockets are dropped; waiting and future
    /// acquisitions fail.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.slots.close();
        let drained = {
            let mut idle = self.inner.idle.lock();
            idle.drain(..).count()
        };
        debug!(endpoint = %self.inner.endpoint, drained, "socket pool disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for SocketPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketPool")
            .field("endpoint", &self.inner.endpoint)
            .field("idle", &self.idle_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Exclusive use of one pooled socket; returns it on drop.
pub struct SocketGuard {
    socket: Option<PooledSocket>,
    _permit: OwnedSemaphorePermit,
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for SocketGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketGuard")
            .field("socket", &self.socket)
            .field("endpoint", &self.inner.endpoint)
            .finish()
    }
}

impl Deref for SocketGuard {
    type Target = PooledSocket;

    fn deref(&self) -> &PooledSocket {
        self.socket.as_ref().expect("socket taken")
    }
}

impl DerefMut for SocketGuard {
    fn deref_mut(&mut self) -> &mut PooledSocket {
        self.socket.as_mut().expect("socket taken")
    }
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        let socket = match self.socket.take() {
            Some(socket) => socket,
            None => return,
        };
        if socket.is_broken() || self.inner.disposed.load(Ordering::Acquire) {
            debug!(endpoint = %self.inner.endpoint, "discarding socket on release");
            return;
        }
        let mut idle = self.inner.idle.lock();
        // Surplus above the warm minimum is closed rather than kept.
        if idle.len() < self.inner.config.min_pool_size {
            idle.push(socket);
        }
    }
}
