//! Byte-cache adaptor tests.

use crate::adaptor::{CacheAdaptor, CacheEntryOptions};
use crate::client::Client;
use crate::config::{ClientConfig, SocketPoolConfig};
use crate::testing::mock_server::MockServer;
use bytes::Bytes;
use std::time::Duration;

async fn adaptor() -> (MockServer, CacheAdaptor<crate::transcoder::BincodeTranscoder>) {
    let server = MockServer::start(crate::protocol::ProtocolKind::Binary).await;
    let config = ClientConfig::new(vec![server.endpoint()]).with_socket_pool(
        SocketPoolConfig::default()
            .with_pool_size(1, 4)
            .with_connection_timeout(Duration::from_secs(1))
            .with_receive_timeout(Duration::from_secs(2)),
    );
    let client = Client::connect(config).await.unwrap();
    (server, CacheAdaptor::new(client))
}

#[tokio::test]
async fn bytes_round_trip() {
    let (_server, cache) = adaptor().await;

    cache
        .set("session", &b"payload"[..], &CacheEntryOptions::new())
        .await
        .unwrap();
    assert_eq!(
        cache.get("session").await.unwrap().unwrap(),
        Bytes::from_static(b"payload")
    );
    assert!(cache.get("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn sliding_entries_record_their_window() {
    let (server, cache) = adaptor().await;

    let options = CacheEntryOptions::new().with_sliding_expiration(Duration::from_secs(300));
    cache.set("s", &b"v"[..], &options).await.unwrap();

    // The window seconds live under the derived key.
    assert_eq!(
        server
            .value_of("s-DistributedCacheEntryOptions")
            .unwrap(),
        Bytes::from_static(b"300")
    );
}

#[tokio::test]
async fn plain_entries_record_nothing() {
    let (server, cache) = adaptor().await;

    cache.set("p", &b"v"[..], &CacheEntryOptions::new()).await.unwrap();
    assert!(server.value_of("p-DistributedCacheEntryOptions").is_none());

    // Refresh without a recorded window is a no-op.
    cache.refresh("p").await.unwrap();
    assert_eq!(cache.get("p").await.unwrap().unwrap(), Bytes::from_static(b"v"));
}

#[tokio::test]
async fn refresh_restores_value_under_recorded_window() {
    let (server, cache) = adaptor().await;

    let options = CacheEntryOptions::new().with_sliding_expiration(Duration::from_secs(120));
    cache.set("r", &b"keep-me"[..], &options).await.unwrap();

    cache.refresh("r").await.unwrap();

    assert_eq!(
        cache.get("r").await.unwrap().unwrap(),
        Bytes::from_static(b"keep-me")
    );
    assert_eq!(
        server.value_of("r-DistributedCacheEntryOptions").unwrap(),
        Bytes::from_static(b"120")
    );
}

#[tokio::test]
async fn remove_clears_entry_and_options() {
    let (server, cache) = adaptor().await;

    let options = CacheEntryOptions::new().with_sliding_expiration(Duration::from_secs(60));
    cache.set("gone", &b"v"[..], &options).await.unwrap();
    assert_eq!(server.key_count(), 2);

    cache.remove("gone").await.unwrap();
    assert_eq!(server.key_count(), 0);
    assert!(cache.get("gone").await.unwrap().is_none());
}
