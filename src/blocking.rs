//! Blocking twins of the async client.
//!
//! One operation pipeline, two façades: every method here delegates to
//! the async [`Client`] on a small owned runtime. Background work (the
//! reconnect loop) keeps running between calls because the runtime has
//! its own worker thread.

use crate::client::Client;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::expiration::Expiration;
use crate::topology::events::{NodeEventListener, SubscriptionId};
use crate::transcoder::{BincodeTranscoder, Transcoder};
use crate::types::{CacheItem, CasResult, CasValue, StoreMode};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Blocking memcached client.
pub struct BlockingClient<Tc = BincodeTranscoder> {
    inner: Client<Tc>,
    runtime: Arc<Runtime>,
}

impl BlockingClient<BincodeTranscoder> {
    /// Connect with the default bincode transcoder.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        Self::with_transcoder(config, BincodeTranscoder)
    }
}

impl<Tc: Transcoder> BlockingClient<Tc> {
    /// Connect with a custom transcoder.
    pub fn with_transcoder(config: ClientConfig, transcoder: Tc) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .map_err(|e| Error::Config(format!("failed to start runtime: {e}")))?;
        let inner = runtime.block_on(Client::with_transcoder(config, transcoder))?;
        Ok(Self {
            inner,
            runtime: Arc::new(runtime),
        })
    }

    /// The async client sharing this pipeline.
    pub fn async_client(&self) -> &Client<Tc> {
        &self.inner
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.runtime.block_on(self.inner.get(key))
    }

    pub fn get_with_cas<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CasValue<T>>> {
        self.runtime.block_on(self.inner.get_with_cas(key))
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<CasValue<CacheItem>>> {
        self.runtime.block_on(self.inner.get_raw(key))
    }

    pub fn get_many<I, S, T>(&self, keys: I) -> Result<HashMap<String, T>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        T: DeserializeOwned,
    {
        self.runtime.block_on(self.inner.get_many(keys))
    }

    pub fn get_many_raw<I, S>(&self, keys: I) -> Result<HashMap<String, CasValue<CacheItem>>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.runtime.block_on(self.inner.get_many_raw(keys))
    }

    pub fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        expiration: impl Into<Expiration>,
    ) -> Result<bool> {
        self.runtime.block_on(self.inner.set(key, value, expiration))
    }

    pub fn add<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        expiration: impl Into<Expiration>,
    ) -> Result<bool> {
        self.runtime.block_on(self.inner.add(key, value, expiration))
    }

    pub fn replace<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        expiration: impl Into<Expiration>,
    ) -> Result<bool> {
        self.runtime
            .block_on(self.inner.replace(key, value, expiration))
    }

    pub fn store<T: Serialize>(
        &self,
        mode: StoreMode,
        key: &str,
        value: &T,
        expiration: impl Into<Expiration>,
    ) -> Result<bool> {
        self.runtime
            .block_on(self.inner.store(mode, key, value, expiration))
    }

    pub fn cas<T: Serialize>(
        &self,
        mode: StoreMode,
        key: &str,
        value: &T,
        cas: u64,
        expiration: impl Into<Expiration>,
    ) -> Result<CasResult> {
        self.runtime
            .block_on(self.inner.cas(mode, key, value, cas, expiration))
    }

    pub fn store_raw(
        &self,
        mode: StoreMode,
        key: &str,
        item: CacheItem,
        expiration: impl Into<Expiration>,
    ) -> Result<bool> {
        self.runtime
            .block_on(self.inner.store_raw(mode, key, item, expiration))
    }

    pub fn increment(
        &self,
        key: &str,
        default_value: u64,
        delta: u64,
        expiration: impl Into<Expiration>,
    ) -> Result<Option<u64>> {
        self.runtime
            .block_on(self.inner.increment(key, default_value, delta, expiration))
    }

    pub fn decrement(
        &self,
        key: &str,
        default_value: u64,
        delta: u64,
        expiration: impl Into<Expiration>,
    ) -> Result<Option<u64>> {
        self.runtime
            .block_on(self.inner.decrement(key, default_value, delta, expiration))
    }

    pub fn append(&self, key: &str, data: impl Into<Bytes>) -> Result<bool> {
        self.runtime.block_on(self.inner.append(key, data))
    }

    pub fn prepend(&self, key: &str, data: impl Into<Bytes>) -> Result<bool> {
        self.runtime.block_on(self.inner.prepend(key, data))
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        self.runtime.block_on(self.inner.delete(key))
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        self.runtime.block_on(self.inner.exists(key))
    }

    pub fn flush_all(&self) -> Result<()> {
        self.runtime.block_on(self.inner.flush_all())
    }

    pub fn stats(&self, scope: Option<&str>) -> Result<HashMap<String, HashMap<String, String>>> {
        self.runtime.block_on(self.inner.stats(scope))
    }

    pub fn version(&self) -> Result<HashMap<String, String>> {
        self.runtime.block_on(self.inner.version())
    }

    pub fn subscribe(&self, listener: Arc<dyn NodeEventListener>) -> SubscriptionId {
        self.inner.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.unsubscribe(id)
    }

    /// Close the client. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}
