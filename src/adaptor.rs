//! Byte-oriented distributed-cache adaptor.
//!
//! A thin view for callers that deal in raw byte entries with per-entry
//! expiration options. Entries stored with a sliding window also record
//! the window seconds under a derived key so `refresh` can re-store the
//! value with the same window.

use crate::client::Client;
use crate::error::Result;
use crate::expiration::Expiration;
use crate::transcoder::Transcoder;
use crate::types::{CacheItem, StoreMode};
use bytes::Bytes;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Suffix of the derived key holding an entry's sliding window.
const OPTIONS_KEY_SUFFIX: &str = "-DistributedCacheEntryOptions";

/// Per-entry expiration options.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheEntryOptions {
    absolute: Option<SystemTime>,
    sliding: Option<Duration>,
}

impl CacheEntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire at an absolute instant.
    pub fn with_absolute_expiration(mut self, at: SystemTime) -> Self {
        self.absolute = Some(at);
        self
    }

    /// Expire this long after the last `set` or `refresh`.
    pub fn with_sliding_expiration(mut self, window: Duration) -> Self {
        self.sliding = Some(window);
        self
    }

    fn expiration(&self) -> Expiration {
        match (self.sliding, self.absolute) {
            (Some(window), _) => Expiration::ValidFor(window),
            (None, Some(at)) => Expiration::At(at),
            (None, None) => Expiration::Never,
        }
    }
}

fn options_key(key: &str) -> String {
    format!("{key}{OPTIONS_KEY_SUFFIX}")
}

/// Byte-entry view over a [`Client`].
pub struct CacheAdaptor<Tc> {
    client: Client<Tc>,
}

impl<Tc: Transcoder> CacheAdaptor<Tc> {
    pub fn new(client: Client<Tc>) -> Self {
        Self { client }
    }

    /// Store raw bytes. A sliding window is recorded (as whole seconds)
    /// under the derived options key so `refresh` can renew it.
    pub async fn set(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        options: &CacheEntryOptions,
    ) -> Result<()> {
        self.client
            .store_raw(
                StoreMode::Set,
                key,
                CacheItem::raw(value),
                options.expiration(),
            )
            .await?;
        if let Some(window) = options.sliding {
            let seconds = window.as_secs().to_string();
            self.client
                .store_raw(
                    StoreMode::Set,
                    &options_key(key),
                    CacheItem::raw(seconds.into_bytes()),
                    options.expiration(),
                )
                .await?;
        }
        Ok(())
    }

    /// Fetch the raw bytes of an entry.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.client.get_raw(key).await?.map(|hit| hit.value.data))
    }

    /// Remove an entry and its recorded options.
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.client.delete(key).await?;
        self.client.delete(&options_key(key)).await?;
        Ok(())
    }

    /// Re-store an entry under its recorded sliding window, pushing the
    /// expiration out from now. Entries without a recorded window (no
    /// sliding expiration configured) are left untouched.
    pub async fn refresh(&self, key: &str) -> Result<()> {
        let window = match self.window_of(key).await? {
            Some(window) => window,
            None => {
                debug!(key, "no sliding window recorded, refresh skipped");
                return Ok(());
            }
        };
        let hit = match self.client.get_raw(key).await? {
            Some(hit) => hit,
            None => return Ok(()),
        };
        let expiration = Expiration::ValidFor(window);
        self.client
            .store_raw(StoreMode::Set, key, hit.value, expiration)
            .await?;
        self.client
            .store_raw(
                StoreMode::Set,
                &options_key(key),
                CacheItem::raw(window.as_secs().to_string().into_bytes()),
                expiration,
            )
            .await?;
        Ok(())
    }

    async fn window_of(&self, key: &str) -> Result<Option<Duration>> {
        let hit = match self.client.get_raw(&options_key(key)).await? {
            Some(hit) => hit,
            None => return Ok(None),
        };
        let seconds = std::str::from_utf8(&hit.value.data)
            .ok()
            .and_then(|s| s.parse::<u64>().ok());
        Ok(seconds.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_pick_sliding_over_absolute() {
        let options = CacheEntryOptions::new()
            .with_sliding_expiration(Duration::from_secs(300))
            .with_absolute_expiration(SystemTime::now());
        assert!(matches!(options.expiration(), Expiration::ValidFor(_)));

        let options = CacheEntryOptions::new().with_absolute_expiration(SystemTime::now());
        assert!(matches!(options.expiration(), Expiration::At(_)));

        assert!(matches!(
            CacheEntryOptions::new().expiration(),
            Expiration::Never
        ));
    }

    #[test]
    fn derived_key_carries_the_suffix() {
        assert_eq!(
            options_key("session:9"),
            "session:9-DistributedCacheEntryOptions"
        );
    }
}
