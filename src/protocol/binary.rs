//! Binary memcached dialect.
//!
//! Requests and responses share a fixed 24-byte header followed by
//! `extras || key || value`. Multi-get is pipelined with quiet
//! get-with-key frames terminated by a NoOp.

use crate::auth::AuthProvider;
use crate::error::{Error, Result, TransportError};
use crate::pool::socket::PooledSocket;
use crate::protocol::{Command, Protocol, Reply, ReplyBody, StatusCode};
use crate::types::{CacheItem, CasValue, ConcatMode, MutationDir, StoreMode};
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use tracing::trace;

pub(crate) const MAGIC_REQUEST: u8 = 0x80;
pub(crate) const MAGIC_RESPONSE: u8 = 0x81;

const HEADER_LEN: usize = 24;

/// Bound on the SASL challenge/response loop. A server that keeps
/// answering AuthContinue past this is misbehaving.
const MAX_SASL_STEPS: usize = 16;

#[allow(dead_code)]
pub(crate) mod opcode {
    pub const GET: u8 = 0x00;
    pub const SET: u8 = 0x01;
    pub const ADD: u8 = 0x02;
    pub const REPLACE: u8 = 0x03;
    pub const DELETE: u8 = 0x04;
    pub const INCREMENT: u8 = 0x05;
    pub const DECREMENT: u8 = 0x06;
    pub const FLUSH: u8 = 0x08;
    pub const NOOP: u8 = 0x0a;
    pub const VERSION: u8 = 0x0b;
    pub const GET_Q: u8 = 0x09;
    pub const GET_K: u8 = 0x0c;
    pub const GET_KQ: u8 = 0x0d;
    pub const APPEND: u8 = 0x0e;
    pub const PREPEND: u8 = 0x0f;
    pub const STAT: u8 = 0x10;
    pub const SASL_LIST: u8 = 0x20;
    pub const SASL_AUTH: u8 = 0x21;
    pub const SASL_STEP: u8 = 0x22;
}

/// Append one request frame to `buf`.
pub(crate) fn put_request(
    buf: &mut BytesMut,
    op: u8,
    key: &[u8],
    extras: &[u8],
    value: &[u8],
    opaque: u32,
    cas: u64,
) {
    let body_len = extras.len() + key.len() + value.len();
    buf.reserve(HEADER_LEN + body_len);
    buf.put_u8(MAGIC_REQUEST);
    buf.put_u8(op);
    buf.put_u16(key.len() as u16);
    buf.put_u8(extras.len() as u8);
    buf.put_u8(0); // data type
    buf.put_u16(0); // vbucket
    buf.put_u32(body_len as u32);
    buf.put_u32(opaque);
    buf.put_u64(cas);
    buf.put_slice(extras);
    buf.put_slice(key);
    buf.put_slice(value);
}

/// Parsed response header fields.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResponseHeader {
    pub opcode: u8,
    pub key_len: usize,
    pub extras_len: usize,
    pub status: u16,
    pub body_len: usize,
    #[allow(dead_code)]
    pub opaque: u32,
    pub cas: u64,
}

/// Parse a response header, checking the magic byte.
pub(crate) fn parse_header(raw: &[u8; HEADER_LEN]) -> Result<ResponseHeader> {
    let mut buf = &raw[..];
    let magic = buf.get_u8();
    if magic != MAGIC_RESPONSE {
        return Err(TransportError::Framing(format!("bad magic byte 0x{magic:02x}")).into());
    }
    let opcode = buf.get_u8();
    let key_len = buf.get_u16() as usize;
    let extras_len = buf.get_u8() as usize;
    let _data_type = buf.get_u8();
    let status = buf.get_u16();
    let body_len = buf.get_u32() as usize;
    let opaque = buf.get_u32();
    let cas = buf.get_u64();
    if extras_len + key_len > body_len {
        return Err(TransportError::Framing(format!(
            "body length {body_len} shorter than extras {extras_len} + key {key_len}"
        ))
        .into());
    }
    Ok(ResponseHeader {
        opcode,
        key_len,
        extras_len,
        status,
        body_len,
        opaque,
        cas,
    })
}

/// One fully-read response frame.
#[derive(Debug)]
pub(crate) struct Frame {
    pub header: ResponseHeader,
    pub extras: Bytes,
    pub key: Bytes,
    pub value: Bytes,
}

impl Frame {
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.header.status)
    }

    /// The error text servers place in the value on failure statuses.
    pub fn message(&self) -> String {
        if self.status().is_success() {
            String::new()
        } else {
            String::from_utf8_lossy(&self.value).into_owned()
        }
    }
}

async fn read_frame(socket: &mut PooledSocket) -> Result<Frame> {
    let mut raw = [0u8; HEADER_LEN];
    socket.read_exact(&mut raw).await?;
    let header = match parse_header(&raw) {
        Ok(header) => header,
        Err(e) => {
            socket.mark_broken();
            return Err(e);
        }
    };
    let mut body = vec![0u8; header.body_len];
    socket.read_exact(&mut body).await?;
    let mut body = Bytes::from(body);
    let extras = body.split_to(header.extras_len);
    let key = body.split_to(header.key_len);
    Ok(Frame {
        header,
        extras,
        key,
        value: body,
    })
}

/// The binary dialect.
#[derive(Debug, Default)]
pub struct BinaryProtocol;

impl BinaryProtocol {
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
                let op = match mode {
                    StoreMode::Set => opcode::SET,
                    StoreMode::Add => opcode::ADD,
                    StoreMode::Replace => opcode::REPLACE,
                    // Concatenating modes are routed to Command::Concat
                    // by the façade; encode them defensively anyway.
                    StoreMode::Append => opcode::APPEND,
                    StoreMode::Prepend => opcode::PREPEND,
                };
                if mode.is_concat() {
                    put_request(buf, op, key.as_bytes(), &[], &item.data, 0, *cas);
                } else {
                    let mut extras = [0u8; 8];
                    extras[..4].copy_from_slice(&item.flags.to_be_bytes());
                    extras[4..].copy_from_slice(&expires.to_be_bytes());
                    put_request(buf, op, key.as_bytes(), &extras, &item.data, 0, *cas);
                }
            }
            Command::Get { key } => {
                put_request(buf, opcode::GET, key.as_bytes(), &[], &[], 0, 0);
            }
            Command::GetMany { keys } => {
                for (i, key) in keys.iter().enumerate() {
                    put_request(buf, opcode::GET_KQ, key.as_bytes(), &[], &[], i as u32, 0);
                }
                put_request(buf, opcode::NOOP, &[], &[], &[], u32::MAX, 0);
            }
            Command::Mutate {
                mode,
                key,
                expires,
                cas,
            } => {
                let op = match mode.dir {
                    MutationDir::Increment => opcode::INCREMENT,
                    MutationDir::Decrement => opcode::DECREMENT,
                };
                let mut extras = [0u8; 20];
                extras[..8].copy_from_slice(&mode.delta.to_be_bytes());
                extras[8..16].copy_from_slice(&mode.default_value.to_be_bytes());
                extras[16..].copy_from_slice(&expires.to_be_bytes());
                put_request(buf, op, key.as_bytes(), &extras, &[], 0, *cas);
            }
            Command::Concat {
                mode,
                key,
                data,
                cas,
            } => {
                let op = match mode {
                    ConcatMode::Append => opcode::APPEND,
                    ConcatMode::Prepend => opcode::PREPEND,
                };
                put_request(buf, op, key.as_bytes(), &[], data, 0, *cas);
            }
            Command::Delete { key, cas } => {
                put_request(buf, opcode::DELETE, key.as_bytes(), &[], &[], 0, *cas);
            }
            Command::FlushAll => {
                put_request(buf, opcode::FLUSH, &[], &[], &[], 0, 0);
            }
            Command::Stats { scope } => {
                let key = scope.as_deref().unwrap_or("");
                put_request(buf, opcode::STAT, key.as_bytes(), &[], &[], 0, 0);
            }
            Command::Version => {
                put_request(buf, opcode::VERSION, &[], &[], &[], 0, 0);
            }
            Command::SaslList => {
                put_request(buf, opcode::SASL_LIST, &[], &[], &[], 0, 0);
            }
            Command::SaslAuth { mechanism, data } => {
                put_request(buf, opcode::SASL_AUTH, mechanism.as_bytes(), &[], data, 0, 0);
            }
            Command::SaslStep { mechanism, data } => {
                put_request(buf, opcode::SASL_STEP, mechanism.as_bytes(), &[], data, 0, 0);
            }
        }
    }

    async fn read_single(&self, socket: &mut PooledSocket, command: &Command) -> Result<Reply> {
        let frame = read_frame(socket).await?;
        let status = frame.status();
        let message = frame.message();
        let body = if status.is_success() {
            match command {
                Command::Get { .. } => {
                    if frame.extras.len() < 4 {
                        socket.mark_broken();
                        return Err(TransportError::Framing(
                            "get response missing flags extras".to_string(),
                        )
                        .into());
                    }
                    let flags = u32::from_be_bytes(frame.extras[..4].try_into().unwrap());
                    ReplyBody::Value(CacheItem::new(flags, frame.value.clone()))
                }
                Command::Mutate { .. } => {
                    if frame.value.len() != 8 {
                        socket.mark_broken();
                        return Err(TransportError::Framing(format!(
                            "counter response has {} value bytes",
                            frame.value.len()
                        ))
                        .into());
                    }
                    ReplyBody::Counter(u64::from_be_bytes(frame.value[..].try_into().unwrap()))
                }
                Command::Version | Command::SaslList => {
                    ReplyBody::Text(String::from_utf8_lossy(&frame.value).into_owned())
                }
                Command::SaslAuth { .. } | Command::SaslStep { .. } => {
                    ReplyBody::Data(frame.value.clone())
                }
                _ => ReplyBody::None,
            }
        } else if matches!(command, Command::SaslAuth { .. } | Command::SaslStep { .. })
            && status == StatusCode::AuthContinue
        {
            // The continue status carries the next challenge.
            ReplyBody::Data(frame.value.clone())
        } else {
            ReplyBody::None
        };

        Ok(Reply {
            status,
            cas: frame.header.cas,
            body,
            message,
        })
    }

    /// Collect quiet get-with-key hits until the NoOp terminator.
    async fn read_multi_get(&self, socket: &mut PooledSocket) -> Result<Reply> {
        let mut values = HashMap::new();
        loop {
            let frame = read_frame(socket).await?;
            if frame.header.opcode == opcode::NOOP {
                break;
            }
            if frame.header.opcode != opcode::GET_KQ && frame.header.opcode != opcode::GET_K {
                socket.mark_broken();
                return Err(TransportError::Framing(format!(
                    "unexpected opcode 0x{:02x} in multi-get stream",
                    frame.header.opcode
                ))
                .into());
            }
            if !frame.status().is_success() {
                // Quiet gets only answer for hits; any error here is
                // server-side noise. Skip the frame.
                trace!(status = frame.header.status, "non-success frame in multi-get");
                continue;
            }
            if frame.extras.len() < 4 {
                socket.mark_broken();
                return Err(TransportError::Framing(
                    "multi-get hit missing flags extras".to_string(),
                )
                .into());
            }
            let flags = u32::from_be_bytes(frame.extras[..4].try_into().unwrap());
            let key = String::from_utf8_lossy(&frame.key).into_owned();
            values.insert(
                key,
                CasValue::new(CacheItem::new(flags, frame.value.clone()), frame.header.cas),
            );
        }
        Ok(Reply::ok(0, ReplyBody::Values(values)))
    }

    /// Collect stat frames until the empty-key terminator.
    async fn read_stats(&self, socket: &mut PooledSocket) -> Result<Reply> {
        let mut stats = HashMap::new();
        loop {
            let frame = read_frame(socket).await?;
            if !frame.status().is_success() {
                return Ok(Reply {
                    status: frame.status(),
                    cas: 0,
                    body: ReplyBody::None,
                    message: frame.message(),
                });
            }
            if frame.key.is_empty() {
                break;
            }
            stats.insert(
                String::from_utf8_lossy(&frame.key).into_owned(),
                String::from_utf8_lossy(&frame.value).into_owned(),
            );
        }
        Ok(Reply::ok(0, ReplyBody::Stats(stats)))
    }
}

#[async_trait]
impl Protocol for BinaryProtocol {
    async fn execute(&self, socket: &mut PooledSocket, command: &Command) -> Result<Reply> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf, command);
        socket.write_all(&buf).await?;
        socket.flush().await?;

        match command {
            Command::GetMany { .. } => self.read_multi_get(socket).await,
            Command::Stats { .. } => self.read_stats(socket).await,
            _ => self.read_single(socket, command).await,
        }
    }

    async fn authenticate(
        &self,
        socket: &mut PooledSocket,
        provider: &dyn AuthProvider,
    ) -> Result<()> {
        let list = self.execute(socket, &Command::SaslList).await?;
        let mechanism = provider.mechanism().to_string();
        if let ReplyBody::Text(mechanisms) = &list.body {
            let offered = mechanisms
                .split_whitespace()
                .any(|m| m.eq_ignore_ascii_case(&mechanism));
            if !offered && !mechanisms.is_empty() {
                return Err(Error::Auth(format!(
                    "server offers [{mechanisms}], client wants {mechanism}"
                )));
            }
        }

        let mut reply = self
            .execute(
                socket,
                &Command::SaslAuth {
                    mechanism: mechanism.clone(),
                    data: Bytes::from(provider.initial()),
                },
            )
            .await?;

        for _ in 0..MAX_SASL_STEPS {
            match reply.status {
                StatusCode::NoError => return Ok(()),
                StatusCode::AuthContinue => {
                    let challenge = match &reply.body {
                        ReplyBody::Data(data) => data.clone(),
                        _ => Bytes::new(),
                    };
                    reply = self
                        .execute(
                            socket,
                            &Command::SaslStep {
                                mechanism: mechanism.clone(),
                                data: Bytes::from(provider.step(&challenge)),
                            },
                        )
                        .await?;
                }
                status => {
                    socket.mark_broken();
                    return Err(Error::Auth(format!(
                        "server returned status 0x{:02x}: {}",
                        status.as_u16(),
                        reply.message
                    )));
                }
            }
        }
        socket.mark_broken();
        Err(Error::Auth("challenge loop did not converge".to_string()))
    }
}
