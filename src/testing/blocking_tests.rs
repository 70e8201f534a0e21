//! Blocking façade over the same pipeline.

use crate::blocking::BlockingClient;
use crate::config::{ClientConfig, SocketPoolConfig};
use crate::expiration::Expiration;
use crate::protocol::ProtocolKind;
use crate::testing::mock_server::MockServer;
use crate::types::{CacheItem, StoreMode};
use std::time::Duration;

fn blocking_setup() -> (tokio::runtime::Runtime, MockServer, BlockingClient) {
    // The mock lives on its own runtime; the client owns another.
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = runtime.block_on(MockServer::start(ProtocolKind::Binary));
    let config = ClientConfig::new(vec![server.endpoint()]).with_socket_pool(
        SocketPoolConfig::default()
            .with_pool_size(1, 4)
            .with_connection_timeout(Duration::from_secs(1))
            .with_receive_timeout(Duration::from_secs(2)),
    );
    let client = BlockingClient::connect(config).unwrap();
    (runtime, server, client)
}

#[test]
fn blocking_round_trip() {
    let (_runtime, _server, client) = blocking_setup();

    assert!(client.set("greeting", &"hello".to_string(), Expiration::Never).unwrap());
    assert_eq!(
        client.get::<String>("greeting").unwrap().as_deref(),
        Some("hello")
    );
    assert!(client.delete("greeting").unwrap());
    assert_eq!(client.get::<String>("greeting").unwrap(), None);

    client.shutdown();
}

#[test]
fn blocking_counters_and_raw_access() {
    let (_runtime, _server, client) = blocking_setup();

    assert_eq!(
        client.increment("hits", 1, 1, Expiration::Never).unwrap(),
        Some(1)
    );
    assert_eq!(
        client.increment("hits", 1, 1, Expiration::Never).unwrap(),
        Some(2)
    );

    assert!(client
        .store_raw(
            StoreMode::Set,
            "raw",
            CacheItem::raw(&b"bytes"[..]),
            Duration::from_secs(60),
        )
        .unwrap());
    let hit = client.get_raw("raw").unwrap().unwrap();
    assert_eq!(&hit.value.data[..], b"bytes");

    let versions = client.version().unwrap();
    assert_eq!(versions.len(), 1);
}

#[test]
fn blocking_multi_get() {
    let (_runtime, _server, client) = blocking_setup();

    for i in 0..4u32 {
        client
            .set(&format!("m-{i}"), &i, Expiration::Never)
            .unwrap();
    }
    let hits: std::collections::HashMap<String, u32> =
        client.get_many(["m-0", "m-3", "m-9"]).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits["m-3"], 3);
}
