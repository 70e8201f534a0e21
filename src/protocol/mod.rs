//! Wire protocol: command sum type, replies, and the two dialects.

pub mod binary;
pub mod text;

use crate::auth::AuthProvider;
use crate::error::Result;
use crate::pool::socket::PooledSocket;
use crate::types::{CacheItem, CasValue, ConcatMode, MutationMode, StoreMode};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

/// Which wire dialect a pool speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolKind {
    #[default]
    Binary,
    Text,
}

/// Server status codes as carried in the binary response header.
///
/// The text dialect maps its reply lines onto the same values so the
/// façade sees one vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    NoError,
    KeyNotFound,
    KeyExists,
    ValueTooLarge,
    InvalidArguments,
    ItemNotStored,
    NonNumeric,
    AuthError,
    AuthContinue,
    UnknownCommand,
    /// Any status not listed above, surfaced verbatim.
    Other(u16),
}

impl StatusCode {
    pub fn from_u16(raw: u16) -> Self {
        match raw {
            0x00 => StatusCode::NoError,
            0x01 => StatusCode::KeyNotFound,
            0x02 => StatusCode::KeyExists,
            0x03 => StatusCode::ValueTooLarge,
            0x04 => StatusCode::InvalidArguments,
            0x05 => StatusCode::ItemNotStored,
            0x06 => StatusCode::NonNumeric,
            0x20 => StatusCode::AuthError,
            0x21 => StatusCode::AuthContinue,
            0x81 => StatusCode::UnknownCommand,
            other => StatusCode::Other(other),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            StatusCode::NoError => 0x00,
            StatusCode::KeyNotFound => 0x01,
            StatusCode::KeyExists => 0x02,
            StatusCode::ValueTooLarge => 0x03,
            StatusCode::InvalidArguments => 0x04,
            StatusCode::ItemNotStored => 0x05,
            StatusCode::NonNumeric => 0x06,
            StatusCode::AuthError => 0x20,
            StatusCode::AuthContinue => 0x21,
            StatusCode::UnknownCommand => 0x81,
            StatusCode::Other(raw) => raw,
        }
    }

    pub fn is_success(self) -> bool {
        self == StatusCode::NoError
    }
}

/// One request to one server, already carrying wire keys.
///
/// This is a closed sum over the operations both dialects understand;
/// each dialect dispatches on the tag.
#[derive(Debug, Clone)]
pub enum Command {
    /// Set/Add/Replace. Concatenating modes are expressed as `Concat`.
    Store {
        mode: StoreMode,
        key: String,
        item: CacheItem,
        expires: u32,
        cas: u64,
    },
    Get {
        key: String,
    },
    GetMany {
        keys: Vec<String>,
    },
    Mutate {
        mode: MutationMode,
        key: String,
        expires: u32,
        cas: u64,
    },
    Concat {
        mode: ConcatMode,
        key: String,
        data: Bytes,
        cas: u64,
    },
    Delete {
        key: String,
        cas: u64,
    },
    FlushAll,
    Stats {
        scope: Option<String>,
    },
    Version,
    SaslList,
    SaslAuth {
        mechanism: String,
        data: Bytes,
    },
    SaslStep {
        mechanism: String,
        data: Bytes,
    },
}

/// A decoded server response.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub cas: u64,
    pub body: ReplyBody,
    /// Server-provided error text, if any.
    pub message: String,
}

impl Reply {
    pub fn ok(cas: u64, body: ReplyBody) -> Self {
        Self {
            status: StatusCode::NoError,
            cas,
            body,
            message: String::new(),
        }
    }

    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            cas: 0,
            body: ReplyBody::None,
            message: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Typed payload of a reply.
#[derive(Debug, Clone)]
pub enum ReplyBody {
    None,
    /// A single cached value (its CAS travels in the reply header).
    Value(CacheItem),
    /// A counter value after a mutation.
    Counter(u64),
    /// Multi-get hits keyed by wire key.
    Values(HashMap<String, CasValue<CacheItem>>),
    /// Stats key/value pairs from one server.
    Stats(HashMap<String, String>),
    /// Version string or SASL mechanism list.
    Text(String),
    /// Raw SASL challenge bytes.
    Data(Bytes),
}

impl ReplyBody {
    /// Multi-get hits, or an empty map for any other body.
    pub fn into_values(self) -> HashMap<String, CasValue<CacheItem>> {
        match self {
            ReplyBody::Values(values) => values,
            _ => HashMap::new(),
        }
    }
}

/// A wire dialect: executes one command on one socket.
#[async_trait]
pub trait Protocol: Send + Sync {
    /// Encode the command, write it, and read the full response.
    ///
    /// Framing violations and I/O failures return a transport error and
    /// leave the socket marked broken.
    async fn execute(&self, socket: &mut PooledSocket, command: &Command) -> Result<Reply>;

    /// Run the authentication handshake on a fresh socket.
    async fn authenticate(&self, socket: &mut PooledSocket, provider: &dyn AuthProvider)
        -> Result<()>;
}

/// Build the dialect implementation for a configured kind.
pub fn make_protocol(kind: ProtocolKind) -> Arc<dyn Protocol> {
    match kind {
        ProtocolKind::Binary => Arc::new(binary::BinaryProtocol::new()),
        ProtocolKind::Text => Arc::new(text::TextProtocol::new()),
    }
}
