//! Failure detection and dead-node recovery, end to end.

use crate::client::Client;
use crate::config::{ClientConfig, FailurePolicyConfig, SocketPoolConfig};
use crate::error::Error;
use crate::expiration::Expiration;
use crate::testing::mock_server::MockServer;
use crate::topology::events::{NodeEvent, NodeEventListener};
use crate::types::{CacheItem, StoreMode};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

struct Recorder(Mutex<Vec<NodeEvent>>);

impl NodeEventListener for Recorder {
    fn on_event(&self, event: NodeEvent) {
        self.0.lock().push(event);
    }
}

impl Recorder {
    fn failed(&self) -> usize {
        self.0
            .lock()
            .iter()
            .filter(|e| matches!(e, NodeEvent::NodeFailed { .. }))
            .count()
    }

    fn recovered(&self) -> usize {
        self.0
            .lock()
            .iter()
            .filter(|e| matches!(e, NodeEvent::NodeRecovered { .. }))
            .count()
    }
}

fn failover_config(server: &MockServer) -> ClientConfig {
    ClientConfig::new(vec![server.endpoint()]).with_socket_pool(
        SocketPoolConfig::default()
            .with_pool_size(0, 4)
            .with_connection_timeout(Duration::from_millis(500))
            .with_receive_timeout(Duration::from_millis(500))
            .with_queue_timeout(Duration::from_millis(200))
            .with_dead_timeout(Duration::from_millis(300))
            .with_failure_policy(FailurePolicyConfig::Throttling {
                failure_threshold: 2,
                reset_after: Duration::from_secs(10),
            }),
    )
}

#[tokio::test]
async fn node_trips_dead_and_recovers_after_probe() {
    crate::testing::init_tracing();
    let mut server = MockServer::start(crate::protocol::ProtocolKind::Binary).await;
    let client = Client::connect(failover_config(&server)).await.unwrap();
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    client.subscribe(recorder.clone());

    assert!(client
        .store_raw(StoreMode::Set, "k", CacheItem::raw(&b"v"[..]), Expiration::Never)
        .await
        .unwrap());

    server.stop();

    // Operations now fail; the second failure reaches the threshold.
    let mut tripped = false;
    for _ in 0..4 {
        if matches!(client.get_raw("k").await, Err(Error::NoNode)) {
            tripped = true;
            break;
        }
    }
    assert!(tripped, "node never tripped dead");
    assert_eq!(recorder.failed(), 1);

    // While dead, the locator offers nothing.
    assert!(matches!(
        client.get_raw("k").await.unwrap_err(),
        Error::NoNode
    ));

    server.restart().await;

    // The reconnect loop probes every dead_timeout and flips the node
    // back once the server answers.
    let mut recovered = false;
    for _ in 0..50 {
        if recorder.recovered() > 0 {
            recovered = true;
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }
    assert!(recovered, "node never recovered");

    // The store survived the outage in the mock, and routing works.
    let hit = client.get_raw("k").await.unwrap().unwrap();
    assert_eq!(&hit.value.data[..], b"v");
}

#[tokio::test]
async fn surviving_node_keeps_serving() {
    let server_a = MockServer::start(crate::protocol::ProtocolKind::Binary).await;
    let server_b = MockServer::start(crate::protocol::ProtocolKind::Binary).await;
    let config = ClientConfig::new(vec![server_a.endpoint(), server_b.endpoint()])
        .with_socket_pool(
            SocketPoolConfig::default()
                .with_pool_size(0, 4)
                .with_connection_timeout(Duration::from_millis(500))
                .with_receive_timeout(Duration::from_millis(500))
                .with_queue_timeout(Duration::from_millis(200))
                .with_dead_timeout(Duration::from_secs(600))
                .with_failure_policy(FailurePolicyConfig::Throttling {
                    failure_threshold: 1,
                    reset_after: Duration::from_secs(10),
                }),
        );
    let client = Client::connect(config).await.unwrap();

    let keys: Vec<String> = (0..16).map(|i| format!("spread-{i}")).collect();
    for key in &keys {
        client
            .store_raw(StoreMode::Set, key, CacheItem::raw(&b"v"[..]), Expiration::Never)
            .await
            .unwrap();
    }
    assert!(server_a.key_count() > 0 && server_b.key_count() > 0);

    server_b.stop();

    // Drive every key once; keys owned by the dead node fail at most
    // until the trip, after which they reroute to the survivor.
    for key in &keys {
        let _ = client.get_raw(key).await;
    }
    for key in &keys {
        match client.get_raw(key).await {
            // Rerouted keys miss on the survivor; both outcomes prove
            // the ring skipped the dead node.
            Ok(_) => {}
            Err(e) => panic!("operation after trip failed: {e}"),
        }
    }
}
