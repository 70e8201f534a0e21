//! The async client façade.
//!
//! Thin composition over the server pool: transform the key, locate the
//! owning node, build the command, execute, and map the reply to a
//! typed result. Multi-key operations fan out one command per owning
//! node and merge under a bounded deadline.

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::expiration::Expiration;
use crate::keys::{DefaultKeyTransformer, KeyTransformer};
use crate::protocol::{Command, Reply, ReplyBody, StatusCode};
use crate::topology::events::{NodeEventListener, SubscriptionId};
use crate::topology::node::Node;
use crate::topology::server_pool::ServerPool;
use crate::transcoder::{BincodeTranscoder, Transcoder};
use crate::types::{CacheItem, CasResult, CasValue, ConcatMode, Endpoint, MutationMode, StoreMode};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Upper bound on a multi-node fan-out (multi-get, flush, stats).
/// Nodes that have not answered by then contribute nothing.
const FANOUT_DEADLINE: Duration = Duration::from_secs(13);

/// Asynchronous memcached client.
///
/// Generic over the [`Transcoder`] used for typed values; byte-oriented
/// `_raw` twins bypass the transcoder entirely.
pub struct Client<Tc = BincodeTranscoder> {
    pool: Arc<ServerPool>,
    transformer: Arc<dyn KeyTransformer>,
    transcoder: Arc<Tc>,
}

impl<Tc> Clone for Client<Tc> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            transformer: self.transformer.clone(),
            transcoder: self.transcoder.clone(),
        }
    }
}

impl Client<BincodeTranscoder> {
    /// Connect with the default bincode transcoder.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        Self::with_transcoder(config, BincodeTranscoder).await
    }
}

impl<Tc: Transcoder> Client<Tc> {
    /// Connect with a custom transcoder.
    pub async fn with_transcoder(config: ClientConfig, transcoder: Tc) -> Result<Self> {
        let transformer = config
            .key_transformer
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultKeyTransformer));
        let pool = ServerPool::new(&config).await?;
        Ok(Self {
            pool,
            transformer,
            transcoder: Arc::new(transcoder),
        })
    }

    /// The bound on multi-node fan-outs.
    pub fn fanout_deadline() -> Duration {
        FANOUT_DEADLINE
    }

    /// Every configured endpoint.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.pool.endpoints()
    }

    /// Register a listener for node liveness events.
    pub fn subscribe(&self, listener: Arc<dyn NodeEventListener>) -> SubscriptionId {
        self.pool.subscribe(listener)
    }

    /// Remove a node event listener.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.pool.unsubscribe(id)
    }

    /// Close every socket pool and stop background work. In-flight
    /// operations observe transport errors.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    fn wire_key(&self, key: &str) -> Result<String> {
        self.transformer.transform(key)
    }

    async fn run(&self, wire_key: &str, command: Command) -> Result<Reply> {
        let node = self.pool.locate(wire_key).ok_or(Error::NoNode)?;
        self.pool.execute(&node, &command).await
    }

    // ---- reads -----------------------------------------------------

    /// Fetch and decode a value.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key).await? {
            Some(hit) => Ok(Some(self.transcoder.decode(&hit.value)?)),
            None => Ok(None),
        }
    }

    /// Fetch and decode a value together with its CAS token.
    pub async fn get_with_cas<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<CasValue<T>>> {
        match self.get_raw(key).await? {
            Some(hit) => {
                let cas = hit.cas;
                Ok(Some(CasValue::new(self.transcoder.decode(&hit.value)?, cas)))
            }
            None => Ok(None),
        }
    }

    /// Fetch the raw frame and CAS without touching the transcoder.
    pub async fn get_raw(&self, key: &str) -> Result<Option<CasValue<CacheItem>>> {
        let wire = self.wire_key(key)?;
        let reply = self.run(&wire, Command::Get { key: wire.clone() }).await?;
        if !reply.is_success() {
            debug!(key, status = reply.status.as_u16(), "get miss");
            return Ok(None);
        }
        match reply.body {
            ReplyBody::Value(item) => Ok(Some(CasValue::new(item, reply.cas))),
            _ => Ok(None),
        }
    }

    // ---- multi-key reads -------------------------------------------

    /// Fetch and decode many keys at once. Misses, keys owned by no
    /// Alive node, and nodes that fail or outlast the fan-out deadline
    /// simply contribute no entries.
    pub async fn get_many<I, S, T>(&self, keys: I) -> Result<HashMap<String, T>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        T: DeserializeOwned,
    {
        let raw = self.get_many_raw(keys).await?;
        let mut out = HashMap::with_capacity(raw.len());
        for (key, hit) in raw {
            match self.transcoder.decode(&hit.value) {
                Ok(value) => {
                    out.insert(key, value);
                }
                Err(e) => warn!(key = %key, error = %e, "dropping undecodable hit"),
            }
        }
        Ok(out)
    }

    /// Typed multi-get keeping each hit's CAS token.
    pub async fn get_many_with_cas<I, S, T>(&self, keys: I) -> Result<HashMap<String, CasValue<T>>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        T: DeserializeOwned,
    {
        let raw = self.get_many_raw(keys).await?;
        let mut out = HashMap::with_capacity(raw.len());
        for (key, hit) in raw {
            let cas = hit.cas;
            match self.transcoder.decode(&hit.value) {
                Ok(value) => {
                    out.insert(key, CasValue::new(value, cas));
                }
                Err(e) => warn!(key = %key, error = %e, "dropping undecodable hit"),
            }
        }
        Ok(out)
    }

    /// Raw multi-get: bucket wire keys by owning node, run one
    /// multi-get per node concurrently, merge hits keyed by the
    /// original keys.
    pub async fn get_many_raw<I, S>(&self, keys: I) -> Result<HashMap<String, CasValue<CacheItem>>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        // Two originals colliding on one wire key keep the later one,
        // consistent with a single-valued mapping.
        let mut wire_to_original = HashMap::new();
        for key in keys {
            let key = key.as_ref();
            wire_to_original.insert(self.wire_key(key)?, key.to_string());
        }

        let mut by_node: HashMap<Endpoint, (Arc<Node>, Vec<String>)> = HashMap::new();
        for wire in wire_to_original.keys() {
            match self.pool.locate(wire) {
                Some(node) => {
                    by_node
                        .entry(node.endpoint().clone())
                        .or_insert_with(|| (node.clone(), Vec::new()))
                        .1
                        .push(wire.clone());
                }
                None => debug!(key = %wire, "no node owns key, dropping"),
            }
        }

        let translate = Arc::new(wire_to_original);
        let merged = Arc::new(Mutex::new(HashMap::new()));
        let mut tasks = JoinSet::new();
        for (_, (node, node_keys)) in by_node {
            let pool = self.pool.clone();
            let merged = merged.clone();
            let translate = translate.clone();
            tasks.spawn(async move {
                match pool
                    .execute(&node, &Command::GetMany { keys: node_keys })
                    .await
                {
                    Ok(reply) => {
                        let values = reply.body.into_values();
                        let mut merged = merged.lock();
                        for (wire, hit) in values {
                            if let Some(original) = translate.get(&wire) {
                                merged.insert(original.clone(), hit);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(endpoint = %node.endpoint(), error = %e, "multi-get node failed")
                    }
                }
            });
        }
        drain_with_deadline(tasks).await;

        let result = std::mem::take(&mut *merged.lock());
        Ok(result)
    }

    // ---- stores ----------------------------------------------------

    /// Store unconditionally.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        expiration: impl Into<Expiration>,
    ) -> Result<bool> {
        self.store(StoreMode::Set, key, value, expiration).await
    }

    /// Store only if absent.
    pub async fn add<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        expiration: impl Into<Expiration>,
    ) -> Result<bool> {
        self.store(StoreMode::Add, key, value, expiration).await
    }

    /// Store only if present.
    pub async fn replace<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        expiration: impl Into<Expiration>,
    ) -> Result<bool> {
        self.store(StoreMode::Replace, key, value, expiration).await
    }

    /// Store a typed value under the given mode.
    pub async fn store<T: Serialize>(
        &self,
        mode: StoreMode,
        key: &str,
        value: &T,
        expiration: impl Into<Expiration>,
    ) -> Result<bool> {
        let item = self.transcoder.encode(value)?;
        Ok(self.store_item(mode, key, item, expiration.into(), 0).await?.ok)
    }

    /// Conditional store: applied only when `cas` matches the server's
    /// current token. A mismatch reports `KeyExists` and carries the
    /// server's current CAS.
    pub async fn cas<T: Serialize>(
        &self,
        mode: StoreMode,
        key: &str,
        value: &T,
        cas: u64,
        expiration: impl Into<Expiration>,
    ) -> Result<CasResult> {
        let item = self.transcoder.encode(value)?;
        self.store_item(mode, key, item, expiration.into(), cas).await
    }

    /// Store a pre-encoded frame.
    pub async fn store_raw(
        &self,
        mode: StoreMode,
        key: &str,
        item: CacheItem,
        expiration: impl Into<Expiration>,
    ) -> Result<bool> {
        Ok(self.store_item(mode, key, item, expiration.into(), 0).await?.ok)
    }

    /// Conditional store of a pre-encoded frame.
    pub async fn cas_raw(
        &self,
        mode: StoreMode,
        key: &str,
        item: CacheItem,
        cas: u64,
        expiration: impl Into<Expiration>,
    ) -> Result<CasResult> {
        self.store_item(mode, key, item, expiration.into(), cas).await
    }

    async fn store_item(
        &self,
        mode: StoreMode,
        key: &str,
        item: CacheItem,
        expiration: Expiration,
        cas: u64,
    ) -> Result<CasResult> {
        let wire = self.wire_key(key)?;
        let expires = expiration.wire()?;
        let command = if mode.is_concat() {
            let concat = match mode {
                StoreMode::Append => ConcatMode::Append,
                _ => ConcatMode::Prepend,
            };
            Command::Concat {
                mode: concat,
                key: wire.clone(),
                data: item.data,
                cas,
            }
        } else {
            Command::Store {
                mode,
                key: wire.clone(),
                item,
                expires,
                cas,
            }
        };
        let reply = self.run(&wire, command).await?;
        Ok(CasResult {
            ok: reply.is_success(),
            status: reply.status.as_u16(),
            cas: reply.cas,
        })
    }

    // ---- mutations -------------------------------------------------

    /// Increment a counter. An absent key is created holding
    /// `default_value` (binary dialect); the new counter value is
    /// returned, or None when the server refused.
    pub async fn increment(
        &self,
        key: &str,
        default_value: u64,
        delta: u64,
        expiration: impl Into<Expiration>,
    ) -> Result<Option<u64>> {
        self.mutate(MutationMode::increment(default_value, delta), key, expiration.into(), 0)
            .await
    }

    /// Decrement a counter. Memcached clamps at zero.
    pub async fn decrement(
        &self,
        key: &str,
        default_value: u64,
        delta: u64,
        expiration: impl Into<Expiration>,
    ) -> Result<Option<u64>> {
        self.mutate(MutationMode::decrement(default_value, delta), key, expiration.into(), 0)
            .await
    }

    /// Run a counter mutation with full control, including a CAS token.
    pub async fn mutate(
        &self,
        mode: MutationMode,
        key: &str,
        expiration: Expiration,
        cas: u64,
    ) -> Result<Option<u64>> {
        let wire = self.wire_key(key)?;
        let expires = expiration.wire()?;
        let reply = self
            .run(
                &wire,
                Command::Mutate {
                    mode,
                    key: wire.clone(),
                    expires,
                    cas,
                },
            )
            .await?;
        match reply.body {
            ReplyBody::Counter(value) if reply.is_success() => Ok(Some(value)),
            _ => {
                debug!(key, status = reply.status.as_u16(), "mutation refused");
                Ok(None)
            }
        }
    }

    // ---- concatenation ---------------------------------------------

    /// Append bytes to an existing value.
    pub async fn append(&self, key: &str, data: impl Into<Bytes>) -> Result<bool> {
        Ok(self.concat(ConcatMode::Append, key, data.into(), 0).await?.ok)
    }

    /// Prepend bytes to an existing value.
    pub async fn prepend(&self, key: &str, data: impl Into<Bytes>) -> Result<bool> {
        Ok(self.concat(ConcatMode::Prepend, key, data.into(), 0).await?.ok)
    }

    /// Append with a CAS token (binary dialect honors it).
    pub async fn append_cas(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        cas: u64,
    ) -> Result<CasResult> {
        self.concat(ConcatMode::Append, key, data.into(), cas).await
    }

    /// Prepend with a CAS token (binary dialect honors it).
    pub async fn prepend_cas(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        cas: u64,
    ) -> Result<CasResult> {
        self.concat(ConcatMode::Prepend, key, data.into(), cas).await
    }

    async fn concat(
        &self,
        mode: ConcatMode,
        key: &str,
        data: Bytes,
        cas: u64,
    ) -> Result<CasResult> {
        let wire = self.wire_key(key)?;
        let reply = self
            .run(
                &wire,
                Command::Concat {
                    mode,
                    key: wire.clone(),
                    data,
                    cas,
                },
            )
            .await?;
        Ok(CasResult {
            ok: reply.is_success(),
            status: reply.status.as_u16(),
            cas: reply.cas,
        })
    }

    // ---- removal / existence ---------------------------------------

    /// Delete a key. Returns whether the key existed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.delete_cas(key, 0).await
    }

    /// Delete only when the CAS token matches (binary dialect).
    pub async fn delete_cas(&self, key: &str, cas: u64) -> Result<bool> {
        let wire = self.wire_key(key)?;
        let reply = self.run(&wire, Command::Delete { key: wire.clone(), cas }).await?;
        Ok(reply.is_success())
    }

    /// Whether the key currently holds a value.
    ///
    /// There is no existence opcode; this appends zero bytes, which
    /// succeeds only against a present key and leaves the value
    /// untouched. A miss-shaped refusal also clears the possibly-stale
    /// key.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let wire = self.wire_key(key)?;
        let reply = self
            .run(
                &wire,
                Command::Concat {
                    mode: ConcatMode::Append,
                    key: wire.clone(),
                    data: Bytes::new(),
                    cas: 0,
                },
            )
            .await?;
        if reply.is_success() {
            return Ok(true);
        }
        // Only the statuses that prove absence warrant cleanup; any
        // other refusal may come from a present key.
        if matches!(
            reply.status,
            StatusCode::ItemNotStored | StatusCode::KeyNotFound
        ) {
            let _ = self
                .run(&wire, Command::Delete { key: wire.clone(), cas: 0 })
                .await;
        }
        Ok(false)
    }

    // ---- cluster-wide operations -----------------------------------

    /// Flush every Alive node. Per-node failures are logged, not
    /// surfaced.
    pub async fn flush_all(&self) -> Result<()> {
        let mut tasks = JoinSet::new();
        for node in self.pool.working_nodes() {
            let pool = self.pool.clone();
            tasks.spawn(async move {
                if let Err(e) = pool.execute(&node, &Command::FlushAll).await {
                    warn!(endpoint = %node.endpoint(), error = %e, "flush failed");
                }
            });
        }
        drain_with_deadline(tasks).await;
        Ok(())
    }

    /// Collect stats from every Alive node, keyed by endpoint.
    pub async fn stats(
        &self,
        scope: Option<&str>,
    ) -> Result<HashMap<String, HashMap<String, String>>> {
        let scope = scope.map(str::to_string);
        let merged = Arc::new(Mutex::new(HashMap::new()));
        let mut tasks = JoinSet::new();
        for node in self.pool.working_nodes() {
            let pool = self.pool.clone();
            let merged = merged.clone();
            let scope = scope.clone();
            tasks.spawn(async move {
                match pool.execute(&node, &Command::Stats { scope }).await {
                    Ok(reply) => {
                        if let ReplyBody::Stats(stats) = reply.body {
                            merged.lock().insert(node.endpoint().to_string(), stats);
                        }
                    }
                    Err(e) => warn!(endpoint = %node.endpoint(), error = %e, "stats failed"),
                }
            });
        }
        drain_with_deadline(tasks).await;

        let result = std::mem::take(&mut *merged.lock());
        Ok(result)
    }

    /// Collect each Alive node's server version, keyed by endpoint.
    pub async fn version(&self) -> Result<HashMap<String, String>> {
        let merged = Arc::new(Mutex::new(HashMap::new()));
        let mut tasks = JoinSet::new();
        for node in self.pool.working_nodes() {
            let pool = self.pool.clone();
            let merged = merged.clone();
            tasks.spawn(async move {
                match pool.execute(&node, &Command::Version).await {
                    Ok(reply) => {
                        if let ReplyBody::Text(version) = reply.body {
                            merged.lock().insert(node.endpoint().to_string(), version);
                        }
                    }
                    Err(e) => warn!(endpoint = %node.endpoint(), error = %e, "version failed"),
                }
            });
        }
        drain_with_deadline(tasks).await;

        let result = std::mem::take(&mut *merged.lock());
        Ok(result)
    }
}

/// Await every fan-out task, abandoning stragglers at the deadline.
async fn drain_with_deadline(mut tasks: JoinSet<()>) {
    let drained = timeout(FANOUT_DEADLINE, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("fan-out deadline reached, abandoning unfinished nodes");
        tasks.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fanout_deadline_is_thirteen_seconds() {
        assert_eq!(
            Client::<BincodeTranscoder>::fanout_deadline(),
            Duration::from_secs(13)
        );
    }
}
