//! End-to-end tests for the text dialect against the mock server.

use crate::client::Client;
use crate::config::{ClientConfig, SocketPoolConfig};
use crate::expiration::Expiration;
use crate::protocol::ProtocolKind;
use crate::testing::mock_server::MockServer;
use crate::types::{CacheItem, StoreMode};
use std::time::Duration;

async fn text_client() -> (MockServer, Client) {
    let server = MockServer::start(ProtocolKind::Text).await;
    let config = ClientConfig::new(vec![server.endpoint()])
        .with_protocol(ProtocolKind::Text)
        .with_socket_pool(
            SocketPoolConfig::default()
                .with_pool_size(1, 4)
                .with_connection_timeout(Duration::from_secs(1))
                .with_receive_timeout(Duration::from_secs(2)),
        );
    let client = Client::connect(config).await.unwrap();
    (server, client)
}

#[tokio::test]
async fn set_get_round_trip() {
    let (_server, client) = text_client().await;

    assert!(client
        .store_raw(
            StoreMode::Set,
            "color",
            CacheItem::new(32, &b"red"[..]),
            Duration::from_secs(60),
        )
        .await
        .unwrap());

    let hit = client.get_raw("color").await.unwrap().unwrap();
    assert_eq!(&hit.value.data[..], b"red");
    assert_eq!(hit.value.flags, 32);
    assert!(hit.cas > 0);
}

#[tokio::test]
async fn cas_verb_round_trip() {
    let (_server, client) = text_client().await;

    client
        .store_raw(StoreMode::Set, "k", CacheItem::raw(&b"a"[..]), Expiration::Never)
        .await
        .unwrap();
    let hit = client.get_raw("k").await.unwrap().unwrap();

    // Conditional store with the read token succeeds.
    let result = client
        .cas_raw(
            StoreMode::Set,
            "k",
            CacheItem::raw(&b"b"[..]),
            hit.cas,
            Expiration::Never,
        )
        .await
        .unwrap();
    assert!(result.ok);

    // The stale token is now refused.
    let stale = client
        .cas_raw(
            StoreMode::Set,
            "k",
            CacheItem::raw(&b"c"[..]),
            hit.cas,
            Expiration::Never,
        )
        .await
        .unwrap();
    assert!(!stale.ok);
    assert_eq!(stale.status, 0x02);

    let current = client.get_raw("k").await.unwrap().unwrap();
    assert_eq!(&current.value.data[..], b"b");
}

#[tokio::test]
async fn add_is_refused_on_existing_key() {
    let (_server, client) = text_client().await;

    assert!(client
        .store_raw(StoreMode::Add, "k", CacheItem::raw(&b"v"[..]), Expiration::Never)
        .await
        .unwrap());
    // The ASCII dialect reports NOT_STORED for a conflicting add.
    assert!(!client
        .store_raw(StoreMode::Add, "k", CacheItem::raw(&b"v"[..]), Expiration::Never)
        .await
        .unwrap());
}

#[tokio::test]
async fn multi_get_over_one_line() {
    let (_server, client) = text_client().await;

    for (key, value) in [("a", "1"), ("b", "2"), ("c", "3")] {
        client
            .store_raw(
                StoreMode::Set,
                key,
                CacheItem::raw(value.as_bytes().to_vec()),
                Expiration::Never,
            )
            .await
            .unwrap();
    }
    let hits = client.get_many_raw(["a", "b", "c", "d"]).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(&hits["b"].value.data[..], b"2");
    assert!(hits["b"].cas > 0);
}

#[tokio::test]
async fn text_mutation_does_not_create_keys() {
    let (_server, client) = text_client().await;

    // The ASCII dialect has no initial value; an absent key is a miss.
    assert_eq!(
        client
            .increment("n", 7, 3, Expiration::Never)
            .await
            .unwrap(),
        None
    );

    client
        .store_raw(StoreMode::Set, "n", CacheItem::raw(&b"5"[..]), Expiration::Never)
        .await
        .unwrap();
    assert_eq!(
        client
            .increment("n", 7, 3, Expiration::Never)
            .await
            .unwrap(),
        Some(8)
    );
    assert_eq!(
        client
            .decrement("n", 7, 10, Expiration::Never)
            .await
            .unwrap(),
        Some(0)
    );
}

#[tokio::test]
async fn exists_emulation_via_empty_append() {
    let (server, client) = text_client().await;

    assert!(!client.exists("x").await.unwrap());
    assert!(client.get_raw("x").await.unwrap().is_none());

    client
        .store_raw(StoreMode::Set, "x", CacheItem::raw(&b"v"[..]), Expiration::Never)
        .await
        .unwrap();
    assert!(client.exists("x").await.unwrap());
    assert_eq!(server.value_of("x").unwrap(), bytes::Bytes::from_static(b"v"));
}

#[tokio::test]
async fn delete_flush_stats_version() {
    let (server, client) = text_client().await;

    client
        .store_raw(StoreMode::Set, "k", CacheItem::raw(&b"v"[..]), Expiration::Never)
        .await
        .unwrap();
    assert!(client.delete("k").await.unwrap());
    assert!(!client.delete("k").await.unwrap());

    client
        .store_raw(StoreMode::Set, "k2", CacheItem::raw(&b"v"[..]), Expiration::Never)
        .await
        .unwrap();
    client.flush_all().await.unwrap();
    assert_eq!(server.key_count(), 0);

    let stats = client.stats(None).await.unwrap();
    let node_stats = stats.get(&server.endpoint().to_string()).unwrap();
    assert_eq!(node_stats.get("version").unwrap(), "1.6.0-mock");

    let versions = client.version().await.unwrap();
    assert_eq!(
        versions.get(&server.endpoint().to_string()).unwrap(),
        "1.6.0-mock"
    );
}
