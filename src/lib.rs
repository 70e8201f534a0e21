//! Memcached client with consistent-hash routing and pooled sockets.
//!
//! This crate speaks the memcached protocol (binary and text dialects)
//! to a set of cache servers and exposes single-key and multi-key
//! operations with optimistic concurrency (CAS).
//!
//! - **Routing**: a Ketama consistent-hash ring maps each key to one
//!   node among those currently alive.
//! - **Pooling**: every node owns a bounded socket pool with warm
//!   minimums, acquisition timeouts, and SASL on fresh sockets.
//! - **Failure handling**: a throttling policy trips a node Dead after
//!   repeated failures; a background task probes Dead nodes and flips
//!   them back once they answer.
//! - **Fan-out**: multi-get, flush, and stats run one command per
//!   owning node concurrently and merge under a bounded deadline.
//!
//! # Example
//!
//! ```rust,no_run
//! use panna::{Client, ClientConfig, Endpoint};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new(vec![
//!         Endpoint::new("cache-a.internal", 11211),
//!         Endpoint::new("cache-b.internal", 11211),
//!     ]);
//!     let client = Client::connect(config).await?;
//!
//!     client.set("greeting", &"hello".to_string(), Duration::from_secs(60)).await?;
//!     if let Some(greeting) = client.get::<String>("greeting").await? {
//!         println!("{greeting}");
//!     }
//!
//!     client.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! Every async operation has a blocking twin on
//! [`BlockingClient`](blocking::BlockingClient), backed by the same
//! pipeline.

pub mod adaptor;
pub mod auth;
pub mod blocking;
pub mod client;
pub mod config;
pub mod error;
pub mod expiration;
pub mod keys;
pub mod pool;
pub mod protocol;
pub mod testing;
pub mod topology;
pub mod transcoder;
pub mod types;

// Re-export main types for convenience
pub use blocking::BlockingClient;
pub use client::Client;
pub use config::{AuthConfig, ClientConfig, FailurePolicyConfig, SocketPoolConfig};
pub use error::{Error, Result, TransportError};
pub use expiration::Expiration;
pub use protocol::{ProtocolKind, StatusCode};
pub use topology::{NodeEvent, NodeEventListener, SubscriptionId};
pub use transcoder::{BincodeTranscoder, RawTranscoder, Transcoder};
pub use types::{CacheItem, CasResult, CasValue, Endpoint, StoreMode};
