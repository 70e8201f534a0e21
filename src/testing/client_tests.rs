//! End-to-end tests for the binary dialect against the mock server.

use crate::client::Client;
use crate::config::{AuthConfig, ClientConfig, SocketPoolConfig};
use crate::error::Error;
use crate::expiration::Expiration;
use crate::testing::mock_server::MockServer;
use crate::types::{CacheItem, Endpoint, StoreMode};
use bytes::Bytes;
use std::time::Duration;

fn test_config(servers: Vec<Endpoint>) -> ClientConfig {
    ClientConfig::new(servers).with_socket_pool(
        SocketPoolConfig::default()
            .with_pool_size(1, 4)
            .with_connection_timeout(Duration::from_secs(1))
            .with_receive_timeout(Duration::from_secs(2))
            .with_queue_timeout(Duration::from_millis(500)),
    )
}

async fn single_node() -> (MockServer, Client) {
    let server = MockServer::start(crate::protocol::ProtocolKind::Binary).await;
    let client = Client::connect(test_config(vec![server.endpoint()]))
        .await
        .unwrap();
    (server, client)
}

#[tokio::test]
async fn set_get_round_trip() {
    let (_server, client) = single_node().await;

    let stored = client
        .store_raw(
            StoreMode::Set,
            "hello",
            CacheItem::raw(&b"world"[..]),
            Duration::from_secs(60),
        )
        .await
        .unwrap();
    assert!(stored);

    let hit = client.get_raw("hello").await.unwrap().unwrap();
    assert_eq!(&hit.value.data[..], b"world");
    assert!(hit.cas > 0);

    // Reads do not move the CAS.
    let again = client.get_raw("hello").await.unwrap().unwrap();
    assert_eq!(again.cas, hit.cas);

    client.shutdown();
}

#[tokio::test]
async fn typed_values_round_trip() {
    let (_server, client) = single_node().await;

    assert!(client
        .set("answer", &42u64, Expiration::Never)
        .await
        .unwrap());
    assert_eq!(client.get::<u64>("answer").await.unwrap(), Some(42));

    assert!(client
        .set("name", &"ada".to_string(), Duration::from_secs(30))
        .await
        .unwrap());
    assert_eq!(
        client.get::<String>("name").await.unwrap().as_deref(),
        Some("ada")
    );

    assert_eq!(client.get::<u64>("missing").await.unwrap(), None);
}

#[tokio::test]
async fn add_fails_on_existing_key() {
    let (_server, client) = single_node().await;

    assert!(client
        .store_raw(
            StoreMode::Add,
            "k",
            CacheItem::raw(&b"v"[..]),
            Duration::from_secs(60),
        )
        .await
        .unwrap());

    // Second add is refused with KeyExists.
    let result = client
        .cas_raw(
            StoreMode::Add,
            "k",
            CacheItem::raw(&b"v"[..]),
            0,
            Duration::from_secs(60),
        )
        .await
        .unwrap();
    assert!(!result.ok);
    assert_eq!(result.status, 0x02);
}

#[tokio::test]
async fn replace_requires_existing_key() {
    let (_server, client) = single_node().await;

    assert!(!client
        .store_raw(
            StoreMode::Replace,
            "absent",
            CacheItem::raw(&b"v"[..]),
            Expiration::Never,
        )
        .await
        .unwrap());

    assert!(client
        .store_raw(StoreMode::Set, "k", CacheItem::raw(&b"a"[..]), Expiration::Never)
        .await
        .unwrap());
    assert!(client
        .store_raw(
            StoreMode::Replace,
            "k",
            CacheItem::raw(&b"b"[..]),
            Expiration::Never,
        )
        .await
        .unwrap());
    let hit = client.get_raw("k").await.unwrap().unwrap();
    assert_eq!(&hit.value.data[..], b"b");
}

#[tokio::test]
async fn cas_tokens_increase_across_stores() {
    let (_server, client) = single_node().await;

    let mut last = 0;
    for value in [&b"a"[..], &b"b"[..], &b"c"[..]] {
        let result = client
            .cas_raw(StoreMode::Set, "k", CacheItem::raw(value), 0, Expiration::Never)
            .await
            .unwrap();
        assert!(result.ok);
        assert!(result.cas > last, "{} not above {last}", result.cas);
        last = result.cas;
    }
}

#[tokio::test]
async fn increment_uses_default_then_delta() {
    let (_server, client) = single_node().await;

    // An absent counter is created at the default, not default + delta.
    assert_eq!(
        client
            .increment("n", 7, 3, Expiration::Never)
            .await
            .unwrap(),
        Some(7)
    );
    assert_eq!(
        client
            .increment("n", 7, 3, Expiration::Never)
            .await
            .unwrap(),
        Some(10)
    );
    assert_eq!(
        client
            .decrement("n", 7, 4, Expiration::Never)
            .await
            .unwrap(),
        Some(6)
    );
}

#[tokio::test]
async fn increment_refuses_non_numeric_values() {
    let (_server, client) = single_node().await;

    client
        .store_raw(StoreMode::Set, "word", CacheItem::raw(&b"abc"[..]), Expiration::Never)
        .await
        .unwrap();
    assert_eq!(
        client
            .increment("word", 0, 1, Expiration::Never)
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn cas_mismatch_reports_current_token() {
    let (_server, client) = single_node().await;

    let first = client
        .cas_raw(StoreMode::Set, "k", CacheItem::raw(&b"a"[..]), 0, Expiration::Never)
        .await
        .unwrap();
    let second = client
        .cas_raw(StoreMode::Set, "k", CacheItem::raw(&b"b"[..]), 0, Expiration::Never)
        .await
        .unwrap();
    assert!(second.cas > first.cas);

    // A store conditioned on the stale token is refused and reports the
    // server's current token.
    let stale = client
        .cas_raw(
            StoreMode::Set,
            "k",
            CacheItem::raw(&b"c"[..]),
            first.cas,
            Expiration::Never,
        )
        .await
        .unwrap();
    assert!(!stale.ok);
    assert_eq!(stale.status, 0x02);
    assert_eq!(stale.cas, second.cas);

    let hit = client.get_raw("k").await.unwrap().unwrap();
    assert_eq!(&hit.value.data[..], b"b");

    // The freshly read token wins.
    let fresh = client
        .cas_raw(
            StoreMode::Set,
            "k",
            CacheItem::raw(&b"c"[..]),
            hit.cas,
            Expiration::Never,
        )
        .await
        .unwrap();
    assert!(fresh.ok);
}

#[tokio::test]
async fn multi_get_merges_hits_across_nodes() {
    let server_a = MockServer::start(crate::protocol::ProtocolKind::Binary).await;
    let server_b = MockServer::start(crate::protocol::ProtocolKind::Binary).await;
    let client = Client::connect(test_config(vec![server_a.endpoint(), server_b.endpoint()]))
        .await
        .unwrap();

    let keys: Vec<String> = (0..16).map(|i| format!("multi-{i}")).collect();
    for key in &keys {
        let value = format!("value-of-{key}");
        assert!(client
            .store_raw(
                StoreMode::Set,
                key,
                CacheItem::raw(value.into_bytes()),
                Expiration::Never,
            )
            .await
            .unwrap());
    }

    // The ring spreads this many keys over both nodes.
    assert!(server_a.key_count() > 0);
    assert!(server_b.key_count() > 0);
    assert_eq!(server_a.key_count() + server_b.key_count(), keys.len());

    let mut requested: Vec<String> = keys.clone();
    requested.push("multi-absent".to_string());
    let hits = client.get_many_raw(&requested).await.unwrap();

    assert_eq!(hits.len(), keys.len());
    for key in &keys {
        let hit = hits.get(key).unwrap();
        assert_eq!(hit.value.data, format!("value-of-{key}"));
        assert!(hit.cas > 0);
    }
    assert!(!hits.contains_key("multi-absent"));
}

#[tokio::test]
async fn typed_multi_get_decodes_hits() {
    let (_server, client) = single_node().await;

    for i in 0..4u64 {
        client
            .set(&format!("typed-{i}"), &(i * 10), Expiration::Never)
            .await
            .unwrap();
    }
    let hits: std::collections::HashMap<String, u64> = client
        .get_many(["typed-0", "typed-2", "typed-9"])
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits["typed-0"], 0);
    assert_eq!(hits["typed-2"], 20);
}

#[tokio::test]
async fn exists_probes_without_mutating() {
    let (server, client) = single_node().await;

    // Absent key: false, and still absent afterwards.
    assert!(!client.exists("x").await.unwrap());
    assert!(client.get_raw("x").await.unwrap().is_none());

    client
        .store_raw(StoreMode::Set, "x", CacheItem::raw(&b"v"[..]), Expiration::Never)
        .await
        .unwrap();
    assert!(client.exists("x").await.unwrap());

    // The probe left the value bit-identical.
    assert_eq!(server.value_of("x").unwrap(), Bytes::from_static(b"v"));
    let hit = client.get_raw("x").await.unwrap().unwrap();
    assert_eq!(&hit.value.data[..], b"v");
}

#[tokio::test]
async fn append_and_prepend_concatenate() {
    let (_server, client) = single_node().await;

    // Concats need an existing key.
    assert!(!client.append("c", &b"!"[..]).await.unwrap());

    client
        .store_raw(StoreMode::Set, "c", CacheItem::raw(&b"mid"[..]), Expiration::Never)
        .await
        .unwrap();
    assert!(client.append("c", &b"-end"[..]).await.unwrap());
    assert!(client.prepend("c", &b"start-"[..]).await.unwrap());

    let hit = client.get_raw("c").await.unwrap().unwrap();
    assert_eq!(&hit.value.data[..], b"start-mid-end");
}

#[tokio::test]
async fn delete_reports_prior_existence() {
    let (_server, client) = single_node().await;

    assert!(!client.delete("gone").await.unwrap());
    client
        .store_raw(StoreMode::Set, "gone", CacheItem::raw(&b"v"[..]), Expiration::Never)
        .await
        .unwrap();
    assert!(client.delete("gone").await.unwrap());
    assert!(client.get_raw("gone").await.unwrap().is_none());
}

#[tokio::test]
async fn flush_clears_every_node() {
    let server_a = MockServer::start(crate::protocol::ProtocolKind::Binary).await;
    let server_b = MockServer::start(crate::protocol::ProtocolKind::Binary).await;
    let client = Client::connect(test_config(vec![server_a.endpoint(), server_b.endpoint()]))
        .await
        .unwrap();

    for i in 0..8 {
        client
            .store_raw(
                StoreMode::Set,
                &format!("f-{i}"),
                CacheItem::raw(&b"v"[..]),
                Expiration::Never,
            )
            .await
            .unwrap();
    }
    client.flush_all().await.unwrap();
    assert_eq!(server_a.key_count(), 0);
    assert_eq!(server_b.key_count(), 0);
}

#[tokio::test]
async fn stats_are_keyed_by_endpoint() {
    let server_a = MockServer::start(crate::protocol::ProtocolKind::Binary).await;
    let server_b = MockServer::start(crate::protocol::ProtocolKind::Binary).await;
    let client = Client::connect(test_config(vec![server_a.endpoint(), server_b.endpoint()]))
        .await
        .unwrap();

    let stats = client.stats(None).await.unwrap();
    assert_eq!(stats.len(), 2);
    for endpoint in [server_a.endpoint(), server_b.endpoint()] {
        let node_stats = stats.get(&endpoint.to_string()).unwrap();
        assert_eq!(node_stats.get("version").unwrap(), "1.6.0-mock");
        assert!(node_stats.contains_key("curr_items"));
    }
}

#[tokio::test]
async fn version_fans_out() {
    let (server, client) = single_node().await;
    let versions = client.version().await.unwrap();
    assert_eq!(
        versions.get(&server.endpoint().to_string()).unwrap(),
        "1.6.0-mock"
    );
}

#[tokio::test]
async fn raw_transcoder_passes_bytes_through_the_generic_boundary() {
    let server = MockServer::start(crate::protocol::ProtocolKind::Binary).await;
    let client = Client::with_transcoder(
        test_config(vec![server.endpoint()]),
        crate::transcoder::RawTranscoder,
    )
    .await
    .unwrap();

    assert!(client
        .set("plain", &"payload".to_string(), Expiration::Never)
        .await
        .unwrap());
    // The wire carries the exact bytes, no serialization envelope.
    assert_eq!(server.value_of("plain").unwrap(), Bytes::from_static(b"payload"));
    assert_eq!(
        client.get::<String>("plain").await.unwrap().as_deref(),
        Some("payload")
    );
    assert_eq!(
        client.get::<Vec<u8>>("plain").await.unwrap().unwrap(),
        b"payload"
    );
}

#[tokio::test]
async fn malformed_keys_are_rejected_up_front() {
    let (_server, client) = single_node().await;
    let err = client.get_raw("has space").await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn sasl_handshake_authenticates_fresh_sockets() {
    let server = MockServer::start_with_auth("user", "secret").await;
    let config = test_config(vec![server.endpoint()])
        .with_authentication(AuthConfig::plain("user", "secret"));
    let client = Client::connect(config).await.unwrap();

    assert!(client
        .store_raw(StoreMode::Set, "k", CacheItem::raw(&b"v"[..]), Expiration::Never)
        .await
        .unwrap());
    let hit = client.get_raw("k").await.unwrap().unwrap();
    assert_eq!(&hit.value.data[..], b"v");
}

#[tokio::test]
async fn bad_credentials_fail_the_operation() {
    let server = MockServer::start_with_auth("user", "secret").await;
    let config = test_config(vec![server.endpoint()])
        .with_authentication(AuthConfig::plain("user", "wrong"));
    let client = Client::connect(config).await.unwrap();

    let err = client.get_raw("k").await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
}
