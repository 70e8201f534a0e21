//! The server pool: node set, locator, failure handling, reconnection.

use crate::auth;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::pool::failure::{make_policy, FailurePolicy};
use crate::pool::SocketPool;
use crate::protocol::{make_protocol, Command, Protocol, Reply};
use crate::topology::events::{EventSink, NodeEvent, NodeEventListener, SubscriptionId};
use crate::topology::locator::{default_locator, NodeLocator};
use crate::topology::node::Node;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Owns the nodes, the locator, the failure policy, and the background
/// reconnect loop that probes Dead nodes.
pub struct ServerPool {
    nodes: Vec<Arc<Node>>,
    locator: Arc<dyn NodeLocator>,
    protocol: Arc<dyn Protocol>,
    failure: Arc<dyn FailurePolicy>,
    events: Arc<EventSink>,
    reconnect_tx: mpsc::Sender<()>,
    disposed: AtomicBool,
}

impl ServerPool {
    /// Build the pool: one socket pool and node per endpoint, a locator
    /// over the set, and the reconnect task.
    pub async fn new(config: &ClientConfig) -> Result<Arc<Self>> {
        if let Err(e) = config.validate() {
            return Err(Error::Config(e));
        }

        let protocol = make_protocol(config.protocol);
        let auth = match &config.authentication {
            Some(auth_config) => Some(auth::make_provider(auth_config)?),
            None => None,
        };

        let mut nodes = Vec::with_capacity(config.servers.len());
        for endpoint in &config.servers {
            let pool = SocketPool::new(
                endpoint.clone(),
                config.socket_pool.clone(),
                protocol.clone(),
                auth.clone(),
            );
            pool.warm_up().await;
            nodes.push(Arc::new(Node::new(endpoint.clone(), pool, protocol.clone())));
        }

        let locator = match &config.locator {
            Some(factory) => factory.build(nodes.clone()),
            None => default_locator(nodes.clone()),
        };

        let failure = make_policy(&config.socket_pool.failure_policy);
        let events = Arc::new(EventSink::new());

        let (reconnect_tx, reconnect_rx) = mpsc::channel(1);
        tokio::spawn(reconnect_loop(
            nodes.clone(),
            failure.clone(),
            events.clone(),
            config.socket_pool.dead_timeout,
            reconnect_rx,
        ));

        info!(
            servers = nodes.len(),
            protocol = ?config.protocol,
            "server pool started"
        );

        Ok(Arc::new(Self {
            nodes,
            locator,
            protocol,
            failure,
            events,
            reconnect_tx,
            disposed: AtomicBool::new(false),
        }))
    }

    /// The node owning a wire key, per the locator.
    pub fn locate(&self, wire_key: &str) -> Option<Arc<Node>> {
        self.locator.locate(wire_key)
    }

    /// All currently Alive nodes.
    pub fn working_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.iter().filter(|n| n.is_alive()).cloned().collect()
    }

    /// Every configured endpoint, regardless of liveness.
    pub fn endpoints(&self) -> Vec<crate::types::Endpoint> {
        self.nodes.iter().map(|n| n.endpoint().clone()).collect()
    }

    /// The dialect this pool speaks.
    pub fn protocol(&self) -> &Arc<dyn Protocol> {
        &self.protocol
    }

    /// Execute a command on a node, with failure-policy bookkeeping.
    ///
    /// A transport failure (including pool exhaustion) counts against
    /// the node; reaching the policy threshold marks it Dead and emits
    /// [`NodeEvent::NodeFailed`]. The failing request still returns its
    /// own error.
    pub async fn execute(&self, node: &Arc<Node>, command: &Command) -> Result<Reply> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Shutdown);
        }
        match node.execute(command).await {
            Ok(reply) => {
                self.failure.record_success(node.endpoint());
                Ok(reply)
            }
            Err(e) => {
                if counts_against_node(&e) {
                    let tripped = self.failure.record_failure(node.endpoint());
                    if tripped && node.is_alive() {
                        node.mark_dead();
                        warn!(endpoint = %node.endpoint(), "failure threshold reached");
                        self.events.emit(NodeEvent::NodeFailed {
                            endpoint: node.endpoint().clone(),
                        });
                    }
                }
                Err(e)
            }
        }
    }

    /// Register a listener for node events.
    pub fn subscribe(&self, listener: Arc<dyn NodeEventListener>) -> SubscriptionId {
        self.events.subscribe(listener)
    }

    /// Remove a previously registered listener.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.events.unsubscribe(id)
    }

    /// Stop the reconnect loop and close every socket pool. In-flight
    /// operations observe transport errors.
    pub fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.reconnect_tx.try_send(());
        for node in &self.nodes {
            node.dispose();
        }
        info!("server pool shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Drop for ServerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Whether an error should be charged to the node's failure window.
fn counts_against_node(error: &Error) -> bool {
    matches!(
        error,
        Error::Transport(_) | Error::PoolExhausted { .. } | Error::Auth(_)
    )
}

/// Probe Dead nodes every `dead_timeout`; a successful `Version` round
/// trip flips the node back to Alive.
async fn reconnect_loop(
    nodes: Vec<Arc<Node>>,
    failure: Arc<dyn FailurePolicy>,
    events: Arc<EventSink>,
    dead_timeout: Duration,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(dead_timeout);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("reconnect loop stopping");
                return;
            }
            _ = ticker.tick() => {
                for node in &nodes {
                    if !node.due_for_probe(dead_timeout) {
                        continue;
                    }
                    match node.execute(&Command::Version).await {
                        Ok(reply) if reply.is_success() => {
                            node.mark_alive();
                            failure.record_success(node.endpoint());
                            info!(endpoint = %node.endpoint(), "dead node probe succeeded");
                            events.emit(NodeEvent::NodeRecovered {
                                endpoint: node.endpoint().clone(),
                            });
                        }
                        Ok(_) | Err(_) => {
                            // Restart the dead timer and try again next round.
                            node.mark_dead();
                            debug!(endpoint = %node.endpoint(), "dead node probe failed");
                        }
                    }
                }
            }
        }
    }
}
