//! Text (ASCII) memcached dialect.
//!
//! Line-oriented: one command line, optional data block, one or more
//! reply lines. `gets` is used for reads so every hit carries a CAS.

use crate::auth::AuthProvider;
use crate::error::{Error, Result, TransportError};
use crate::pool::socket::PooledSocket;
use crate::protocol::{Command, Protocol, Reply, ReplyBody, StatusCode};
use crate::types::{CacheItem, CasValue, ConcatMode, MutationDir, StoreMode};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

/// Status used for `SERVER_ERROR` lines; surfaced verbatim like any
/// unlisted binary status.
const SERVER_ERROR_STATUS: u16 = 0x84;

/// Map a storage reply line to a status code.
fn store_status(line: &str) -> StatusCode {
    match line {
        "STORED" => StatusCode::NoError,
        "NOT_STORED" => StatusCode::ItemNotStored,
        "EXISTS" => StatusCode::KeyExists,
        "NOT_FOUND" => StatusCode::KeyNotFound,
        _ => general_status(line),
    }
}

/// Map error lines every command can produce.
fn general_status(line: &str) -> StatusCode {
    if line == "ERROR" {
        StatusCode::UnknownCommand
    } else if line.starts_with("CLIENT_ERROR") {
        StatusCode::InvalidArguments
    } else if line.starts_with("SERVER_ERROR") {
        StatusCode::Other(SERVER_ERROR_STATUS)
    } else {
        StatusCode::Other(SERVER_ERROR_STATUS)
    }
}

fn error_message(line: &str) -> String {
    line.strip_prefix("CLIENT_ERROR ")
        .or_else(|| line.strip_prefix("SERVER_ERROR "))
        .unwrap_or(line)
        .to_string()
}

/// Parsed `VALUE <key> <flags> <bytes> [<cas>]` header.
#[derive(Debug, PartialEq, Eq)]
struct ValueHeader {
    key: String,
    flags: u32,
    len: usize,
    cas: u64,
}

fn parse_value_header(line: &str) -> Option<ValueHeader> {
    let mut parts = line.split_ascii_whitespace();
    if parts.next()? != "VALUE" {
        return None;
    }
    let key = parts.next()?.to_string();
    let flags = parts.next()?.parse().ok()?;
    let len = parts.next()?.parse().ok()?;
    let cas = match parts.next() {
        Some(token) => token.parse().ok()?,
        None => 0,
    };
    Some(ValueHeader {
        key,
        flags,
        len,
        cas,
    })
}

/// The text dialect.
#[derive(Debug, Default)]
pub struct TextProtocol;

impl TextProtocol {
    pub fn new() -> Self {
        Self
    }

    fn encode(&self, buf: &mut BytesMut, command: &Command) {
        match command {
            Command::Store {
                mode,
                key,
                item,
                expires,
                cas,
            } => {
                let verb = match (mode, *cas) {
                    (StoreMode::Set, cas) if cas != 0 => "cas",
                    (StoreMode::Set, _) => "set",
                    (StoreMode::Add, _) => "add",
                    (StoreMode::Replace, _) => "replace",
                    (StoreMode::Append, _) => "append",
                    (StoreMode::Prepend, _) => "prepend",
                };
                let line = if verb == "cas" {
                    format!(
                        "cas {} {} {} {} {}\r\n",
                        key,
                        item.flags,
                        expires,
                        item.data.len(),
                        cas
                    )
                } else {
                    format!(
                        "{} {} {} {} {}\r\n",
                        verb,
                        key,
                        item.flags,
                        expires,
                        item.data.len()
                    )
                };
                buf.put_slice(line.as_bytes());
                buf.put_slice(&item.data);
                buf.put_slice(b"\r\n");
            }
            Command::Get { key } => {
                buf.put_slice(format!("gets {key}\r\n").as_bytes());
            }
            Command::GetMany { keys } => {
                buf.put_slice(b"gets");
                for key in keys {
                    buf.put_u8(b' ');
                    buf.put_slice(key.as_bytes());
                }
                buf.put_slice(b"\r\n");
            }
            Command::Mutate { mode, key, .. } => {
                let verb = match mode.dir {
                    MutationDir::Increment => "incr",
                    MutationDir::Decrement => "decr",
                };
                buf.put_slice(format!("{} {} {}\r\n", verb, key, mode.delta).as_bytes());
            }
            Command::Concat {
                mode, key, data, ..
            } => {
                // The ASCII concat commands take no cas token.
                let verb = match mode {
                    ConcatMode::Append => "append",
                    ConcatMode::Prepend => "prepend",
                };
                buf.put_slice(format!("{} {} 0 0 {}\r\n", verb, key, data.len()).as_bytes());
                buf.put_slice(data);
                buf.put_slice(b"\r\n");
            }
            Command::Delete { key, .. } => {
                buf.put_slice(format!("delete {key}\r\n").as_bytes());
            }
            Command::FlushAll => {
                buf.put_slice(b"flush_all\r\n");
            }
            Command::Stats { scope } => match scope {
                Some(scope) => buf.put_slice(format!("stats {scope}\r\n").as_bytes()),
                None => buf.put_slice(b"stats\r\n"),
            },
            Command::Version => {
                buf.put_slice(b"version\r\n");
            }
            Command::SaslList | Command::SaslAuth { .. } | Command::SaslStep { .. } => {
                // Unreachable: config validation rejects SASL over text.
            }
        }
    }

    /// Read `len` data bytes plus the trailing CRLF.
    async fn read_data(&self, socket: &mut PooledSocket, len: usize) -> Result<Bytes> {
        let mut data = vec![0u8; len + 2];
        socket.read_exact(&mut data).await?;
        if &data[len..] != b"\r\n" {
            socket.mark_broken();
            return Err(TransportError::Framing("data block not CRLF-terminated".to_string()).into());
        }
        data.truncate(len);
        Ok(Bytes::from(data))
    }

    /// Read VALUE blocks until END.
    async fn read_values(
        &self,
        socket: &mut PooledSocket,
    ) -> Result<HashMap<String, CasValue<CacheItem>>> {
        let mut values = HashMap::new();
        loop {
            let line = socket.read_line().await?;
            if line == "END" {
                return Ok(values);
            }
            let header = match parse_value_header(&line) {
                Some(header) => header,
                None => {
                    socket.mark_broken();
                    return Err(
                        TransportError::Framing(format!("unexpected reply line {line:?}")).into(),
                    );
                }
            };
            let data = self.read_data(socket, header.len).await?;
            values.insert(
                header.key,
                CasValue::new(CacheItem::new(header.flags, data), header.cas),
            );
        }
    }
}

#[async_trait]
impl Protocol for TextProtocol {
    async fn execute(&self, socket: &mut PooledSocket, command: &Command) -> Result<Reply> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf, command);
        socket.write_all(&buf).await?;
        socket.flush().await?;

        match command {
            Command::Store { .. } | Command::Concat { .. } => {
                let line = socket.read_line().await?;
                let status = store_status(&line);
                Ok(Reply {
                    status,
                    cas: 0,
                    body: ReplyBody::None,
                    message: if status.is_success() {
                        String::new()
                    } else {
                        error_message(&line)
                    },
                })
            }
            Command::Get { key } => {
                let mut values = self.read_values(socket).await?;
                match values.remove(key.as_str()) {
                    Some(hit) => Ok(Reply {
                        status: StatusCode::NoError,
                        cas: hit.cas,
                        body: ReplyBody::Value(hit.value),
                        message: String::new(),
                    }),
                    None => Ok(Reply::status(StatusCode::KeyNotFound)),
                }
            }
            Command::GetMany { .. } => {
                let values = self.read_values(socket).await?;
                Ok(Reply::ok(0, ReplyBody::Values(values)))
            }
            Command::Mutate { .. } => {
                let line = socket.read_line().await?;
                if line == "NOT_FOUND" {
                    return Ok(Reply::status(StatusCode::KeyNotFound));
                }
                if let Ok(value) = line.parse::<u64>() {
                    return Ok(Reply::ok(0, ReplyBody::Counter(value)));
                }
                if line.starts_with("CLIENT_ERROR") {
                    return Ok(Reply {
                        status: StatusCode::NonNumeric,
                        cas: 0,
                        body: ReplyBody::None,
                        message: error_message(&line),
                    });
                }
                Ok(Reply {
                    status: general_status(&line),
                    cas: 0,
                    body: ReplyBody::None,
                    message: error_message(&line),
                })
            }
            Command::Delete { .. } => {
                let line = socket.read_line().await?;
                let status = match line.as_str() {
                    "DELETED" => StatusCode::NoError,
                    "NOT_FOUND" => StatusCode::KeyNotFound,
                    other => general_status(other),
                };
                Ok(Reply {
                    status,
                    cas: 0,
                    body: ReplyBody::None,
                    message: if status.is_success() {
                        String::new()
                    } else {
                        error_message(&line)
                    },
                })
            }
            Command::FlushAll => {
                let line = socket.read_line().await?;
                let status = if line == "OK" {
                    StatusCode::NoError
                } else {
                    general_status(&line)
                };
                Ok(Reply {
                    status,
                    cas: 0,
                    body: ReplyBody::None,
                    message: String::new(),
                })
            }
            Command::Stats { .. } => {
                let mut stats = HashMap::new();
                loop {
                    let line = socket.read_line().await?;
                    if line == "END" {
                        return Ok(Reply::ok(0, ReplyBody::Stats(stats)));
                    }
                    match line.strip_prefix("STAT ") {
                        Some(rest) => {
                            let (name, value) = rest.split_once(' ').unwrap_or((rest, ""));
                            stats.insert(name.to_string(), value.to_string());
                        }
                        None => {
                            return Ok(Reply {
                                status: general_status(&line),
                                cas: 0,
                                body: ReplyBody::None,
                                message: error_message(&line),
                            });
                        }
                    }
                }
            }
            Command::Version => {
                let line = socket.read_line().await?;
                match line.strip_prefix("VERSION ") {
                    Some(version) => Ok(Reply::ok(0, ReplyBody::Text(version.to_string()))),
                    None => Ok(Reply {
                        status: general_status(&line),
                        cas: 0,
                        body: ReplyBody::None,
                        message: error_message(&line),
                    }),
                }
            }
            Command::SaslList | Command::SaslAuth { .. } | Command::SaslStep { .. } => {
                Err(Error::Auth("SASL requires the binary protocol".to_string()))
            }
        }
    }

    async fn authenticate(
        &self,
        _socket: &mut PooledSocket,
        _provider: &dyn AuthProvider,
    ) -> Result<()> {
        Err(Error::Auth("SASL requires the binary protocol".to_string()))
    }
}
