//! Core types used throughout the client.

use crate::error::{Error, Result, TransportError};
use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// A cached payload: opaque bytes plus transcoder-defined type flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem {
    /// Type flags written by the transcoder and stored verbatim by the server.
    pub flags: u32,
    /// The raw payload.
    pub data: Bytes,
}

impl CacheItem {
    /// Create an item from raw bytes with no type flags.
    pub fn raw(data: impl Into<Bytes>) -> Self {
        Self {
            flags: 0,
            data: data.into(),
        }
    }

    /// Create an item with explicit flags.
    pub fn new(flags: u32, data: impl Into<Bytes>) -> Self {
        Self {
            flags,
            data: data.into(),
        }
    }
}

/// How a store operation behaves when the key is present or absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Store unconditionally.
    Set,
    /// Store only if the key is absent.
    Add,
    /// Store only if the key is present.
    Replace,
    /// Concatenate after an existing value.
    Append,
    /// Concatenate before an existing value.
    Prepend,
}

impl StoreMode {
    /// Whether this mode is a concatenation rather than a plain store.
    pub fn is_concat(self) -> bool {
        matches!(self, StoreMode::Append | StoreMode::Prepend)
    }
}

/// Direction of a counter mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationDir {
    Increment,
    Decrement,
}

/// A counter mutation: direction, delta, and the value created when the
/// key is absent (binary dialect only).
#[derive(Debug, Clone, Copy)]
pub struct MutationMode {
    pub dir: MutationDir,
    pub delta: u64,
    pub default_value: u64,
}

impl MutationMode {
    pub fn increment(default_value: u64, delta: u64) -> Self {
        Self {
            dir: MutationDir::Increment,
            delta,
            default_value,
        }
    }

    pub fn decrement(default_value: u64, delta: u64) -> Self {
        Self {
            dir: MutationDir::Decrement,
            delta,
            default_value,
        }
    }
}

/// Which end a concatenation attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatMode {
    Append,
    Prepend,
}

/// A value paired with the CAS token it was read or stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasValue<T> {
    pub value: T,
    pub cas: u64,
}

impl<T> CasValue<T> {
    pub fn new(value: T, cas: u64) -> Self {
        Self { value, cas }
    }

    /// Map the inner value, keeping the CAS token.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CasValue<U> {
        CasValue {
            value: f(self.value),
            cas: self.cas,
        }
    }
}

/// Outcome of a conditional (CAS) store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CasResult {
    /// Whether the store was applied.
    pub ok: bool,
    /// The server status code, verbatim.
    pub status: u16,
    /// The CAS of the stored value on success; the server's current CAS
    /// on a version mismatch; 0 otherwise.
    pub cas: u64,
}

impl CasResult {
    pub fn stored(cas: u64) -> Self {
        Self {
            ok: true,
            status: 0,
            cas,
        }
    }

    pub fn rejected(status: u16, cas: u64) -> Self {
        Self {
            ok: false,
            status,
            cas,
        }
    }
}

/// A server address as host and port, resolved lazily at connect time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolve to a socket address. DNS names resolve to their first
    /// address; numeric addresses parse directly.
    pub async fn resolve(&self) -> Result<SocketAddr> {
        let authority = self.to_string();
        let mut addrs = tokio::net::lookup_host(&authority)
            .await
            .map_err(|e| TransportError::InvalidAddress(format!("{authority}: {e}")))?;
        addrs
            .next()
            .ok_or_else(|| TransportError::InvalidAddress(authority.clone()).into())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidArgument(format!("missing port in address {s:?}")))?;
        if host.is_empty() {
            return Err(Error::InvalidArgument(format!("missing host in address {s:?}")));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("bad port in address {s:?}")))?;
        Ok(Self::new(host, port))
    }
}
