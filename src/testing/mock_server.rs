//! In-process memcached server for tests.
//!
//! Speaks both wire dialects against a shared in-memory store: CAS
//! tokens from a global counter, ASCII counters for incr/decr, quiet
//! get-with-key semantics, and SASL PLAIN. Expirations are accepted and
//! ignored; tests assert protocol behavior, not eviction.

use crate::protocol::binary::{opcode, MAGIC_REQUEST, MAGIC_RESPONSE};
use crate::protocol::ProtocolKind;
use crate::types::{Endpoint, StoreMode};
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};

#[derive(Debug, Clone)]
struct Entry {
    flags: u32,
    data: Bytes,
    cas: u64,
}

#[derive(Debug)]
enum StoreOutcome {
    Stored { cas: u64 },
    NotStored,
    Exists { cas: u64 },
    NotFound,
}

#[derive(Debug)]
enum MutateOutcome {
    Value { value: u64, cas: u64 },
    NotFound,
    NonNumeric,
}

#[derive(Default)]
struct Store {
    entries: Mutex<HashMap<String, Entry>>,
    cas_counter: AtomicU64,
}

impl Store {
    fn next_cas(&self) -> u64 {
        self.cas_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn get(&self, key: &str) -> Option<Entry> {
        self.entries.lock().get(key).cloned()
    }

    fn store(
        &self,
        mode: StoreMode,
        key: &str,
        flags: u32,
        data: Bytes,
        cas_req: u64,
    ) -> StoreOutcome {
        let mut entries = self.entries.lock();
        let current = entries.get(key);
        match mode {
            StoreMode::Set => {
                if cas_req != 0 {
                    match current {
                        None => return StoreOutcome::NotFound,
                        Some(entry) if entry.cas != cas_req => {
                            return StoreOutcome::Exists { cas: entry.cas }
                        }
                        Some(_) => {}
                    }
                }
            }
            StoreMode::Add => {
                if let Some(entry) = current {
                    return StoreOutcome::Exists { cas: entry.cas };
                }
            }
            StoreMode::Replace => {
                if current.is_none() {
                    return StoreOutcome::NotFound;
                }
            }
            StoreMode::Append | StoreMode::Prepend => unreachable!("concat has its own path"),
        }
        let cas = self.next_cas();
        entries.insert(key.to_string(), Entry { flags, data, cas });
        StoreOutcome::Stored { cas }
    }

    fn concat(&self, append: bool, key: &str, data: &[u8], cas_req: u64) -> StoreOutcome {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            None => StoreOutcome::NotStored,
            Some(entry) if cas_req != 0 && entry.cas != cas_req => {
                StoreOutcome::Exists { cas: entry.cas }
            }
            Some(entry) => {
                let mut merged = BytesMut::with_capacity(entry.data.len() + data.len());
                if append {
                    merged.put_slice(&entry.data);
                    merged.put_slice(data);
                } else {
                    merged.put_slice(data);
                    merged.put_slice(&entry.data);
                }
                entry.data = merged.freeze();
                entry.cas = self.cas_counter.fetch_add(1, Ordering::Relaxed) + 1;
                StoreOutcome::Stored { cas: entry.cas }
            }
        }
    }

    fn delete(&self, key: &str, cas_req: u64) -> StoreOutcome {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            None => StoreOutcome::NotFound,
            Some(entry) if cas_req != 0 && entry.cas != cas_req => {
                StoreOutcome::Exists { cas: entry.cas }
            }
            Some(_) => {
                entries.remove(key);
                StoreOutcome::Stored { cas: 0 }
            }
        }
    }

    fn mutate(&self, incr: bool, key: &str, delta: u64, initial: u64, create: bool) -> MutateOutcome {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            None => {
                if !create {
                    return MutateOutcome::NotFound;
                }
                let cas = self.cas_counter.fetch_add(1, Ordering::Relaxed) + 1;
                entries.insert(
                    key.to_string(),
                    Entry {
                        flags: 0,
                        data: Bytes::from(initial.to_string()),
                        cas,
                    },
                );
                MutateOutcome::Value {
                    value: initial,
                    cas,
                }
            }
            Some(entry) => {
                let current: u64 = match std::str::from_utf8(&entry.data)
                    .ok()
                    .and_then(|s| s.parse().ok())
                {
                    Some(value) => value,
                    None => return MutateOutcome::NonNumeric,
                };
                let value = if incr {
                    current.wrapping_add(delta)
                } else {
                    current.saturating_sub(delta)
                };
                entry.data = Bytes::from(value.to_string());
                entry.cas = self.cas_counter.fetch_add(1, Ordering::Relaxed) + 1;
                MutateOutcome::Value {
                    value,
                    cas: entry.cas,
                }
            }
        }
    }

    fn flush(&self) {
        self.entries.lock().clear();
    }

    fn stats(&self) -> Vec<(String, String)> {
        vec![
            ("version".to_string(), "1.6.0-mock".to_string()),
            (
                "curr_items".to_string(),
                self.entries.lock().len().to_string(),
            ),
        ]
    }
}

/// A mock memcached server bound to a loopback port.
pub struct MockServer {
    endpoint: Endpoint,
    kind: ProtocolKind,
    store: Arc<Store>,
    auth: Option<(String, String)>,
    accept_task: JoinHandle<()>,
}

impl MockServer {
    /// Start on an ephemeral port.
    pub async fn start(kind: ProtocolKind) -> Self {
        Self::start_inner(kind, 0, None).await
    }

    /// Start requiring SASL PLAIN credentials (binary dialect).
    pub async fn start_with_auth(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self::start_inner(
            ProtocolKind::Binary,
            0,
            Some((user.into(), password.into())),
        )
        .await
    }

    async fn start_inner(kind: ProtocolKind, port: u16, auth: Option<(String, String)>) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("bind mock server");
        let endpoint = Endpoint::new("127.0.0.1", listener.local_addr().unwrap().port());
        let store = Arc::new(Store::default());
        let accept_task = tokio::spawn(accept_loop(listener, kind, store.clone(), auth.clone()));
        Self {
            endpoint,
            kind,
            store,
            auth,
            accept_task,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    /// Stop accepting and drop every open connection. The store is kept
    /// so a later [`restart`](Self::restart) simulates recovery.
    pub fn stop(&self) {
        self.accept_task.abort();
    }

    /// Rebind the same port after [`stop`](Self::stop).
    pub async fn restart(&mut self) {
        self.stop();
        // The OS may need a moment to release the port.
        let listener = loop {
            match TcpListener::bind(("127.0.0.1", self.endpoint.port)).await {
                Ok(listener) => break listener,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(20)).await,
            }
        };
        self.accept_task = tokio::spawn(accept_loop(
            listener,
            self.kind,
            self.store.clone(),
            self.auth.clone(),
        ));
    }

    pub fn key_count(&self) -> usize {
        self.store.entries.lock().len()
    }

    pub fn value_of(&self, key: &str) -> Option<Bytes> {
        self.store.get(key).map(|entry| entry.data)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    kind: ProtocolKind,
    store: Arc<Store>,
    auth: Option<(String, String)>,
) {
    let mut connections = JoinSet::new();
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let store = store.clone();
                let auth = auth.clone();
                connections.spawn(async move {
                    let _ = match kind {
                        ProtocolKind::Binary => serve_binary(stream, store, auth).await,
                        ProtocolKind::Text => serve_text(stream, store).await,
                    };
                });
            }
            Err(_) => return,
        }
    }
}

// ---- binary dialect ------------------------------------------------

async fn write_frame(
    stream: &mut BufStream<TcpStream>,
    op: u8,
    status: u16,
    opaque: u32,
    cas: u64,
    extras: &[u8],
    key: &[u8],
    value: &[u8],
) -> io::Result<()> {
    let mut buf = BytesMut::with_capacity(24 + extras.len() + key.len() + value.len());
    buf.put_u8(MAGIC_RESPONSE);
    buf.put_u8(op);
    buf.put_u16(key.len() as u16);
    buf.put_u8(extras.len() as u8);
    buf.put_u8(0);
    buf.put_u16(status);
    buf.put_u32((extras.len() + key.len() + value.len()) as u32);
    buf.put_u32(opaque);
    buf.put_u64(cas);
    buf.put_slice(extras);
    buf.put_slice(key);
    buf.put_slice(value);
    stream.write_all(&buf).await
}

fn store_status(outcome: &StoreOutcome) -> (u16, u64) {
    match outcome {
        StoreOutcome::Stored { cas } => (0x00, *cas),
        StoreOutcome::NotStored => (0x05, 0),
        StoreOutcome::Exists { cas } => (0x02, *cas),
        StoreOutcome::NotFound => (0x01, 0),
    }
}

async fn serve_binary(
    stream: TcpStream,
    store: Arc<Store>,
    auth: Option<(String, String)>,
) -> io::Result<()> {
    let mut stream = BufStream::new(stream);
    let mut authenticated = auth.is_none();
    loop {
        let mut header = [0u8; 24];
        if stream.read_exact(&mut header).await.is_err() {
            return Ok(());
        }
        if header[0] != MAGIC_REQUEST {
            return Ok(());
        }
        let op = header[1];
        let key_len = u16::from_be_bytes([header[2], header[3]]) as usize;
        let extras_len = header[4] as usize;
        let body_len = u32::from_be_bytes(header[8..12].try_into().unwrap()) as usize;
        let opaque = u32::from_be_bytes(header[12..16].try_into().unwrap());
        let cas_req = u64::from_be_bytes(header[16..24].try_into().unwrap());

        let mut body = vec![0u8; body_len];
        stream.read_exact(&mut body).await?;
        let mut body = Bytes::from(body);
        let extras = body.split_to(extras_len);
        let key_bytes = body.split_to(key_len);
        let key = String::from_utf8_lossy(&key_bytes).into_owned();
        let value = body;

        if !authenticated
            && !matches!(op, opcode::SASL_LIST | opcode::SASL_AUTH | opcode::SASL_STEP)
        {
            write_frame(&mut stream, op, 0x20, opaque, 0, &[], &[], b"Auth required").await?;
            stream.flush().await?;
            continue;
        }

        match op {
            opcode::GET => match store.get(&key) {
                Some(entry) => {
                    let flags = entry.flags.to_be_bytes();
                    write_frame(
                        &mut stream,
                        op,
                        0x00,
                        opaque,
                        entry.cas,
                        &flags,
                        &[],
                        &entry.data,
                    )
                    .await?;
                }
                None => {
                    write_frame(&mut stream, op, 0x01, opaque, 0, &[], &[], b"Not found").await?;
                }
            },
            opcode::GET_KQ => {
                // Quiet: answer hits only.
                if let Some(entry) = store.get(&key) {
                    let flags = entry.flags.to_be_bytes();
                    write_frame(
                        &mut stream,
                        op,
                        0x00,
                        opaque,
                        entry.cas,
                        &flags,
                        &key_bytes,
                        &entry.data,
                    )
                    .await?;
                }
            }
            opcode::NOOP => {
                write_frame(&mut stream, op, 0x00, opaque, 0, &[], &[], &[]).await?;
            }
            opcode::SET | opcode::ADD | opcode::REPLACE => {
                if extras.len() < 8 {
                    write_frame(&mut stream, op, 0x04, opaque, 0, &[], &[], b"Bad extras").await?;
                } else {
                    let flags = u32::from_be_bytes(extras[..4].try_into().unwrap());
                    let mode = match op {
                        opcode::SET => StoreMode::Set,
                        opcode::ADD => StoreMode::Add,
                        _ => StoreMode::Replace,
                    };
                    let outcome = store.store(mode, &key, flags, value, cas_req);
                    let (status, cas) = store_status(&outcome);
                    write_frame(&mut stream, op, status, opaque, cas, &[], &[], &[]).await?;
                }
            }
            opcode::APPEND | opcode::PREPEND => {
                let outcome = store.concat(op == opcode::APPEND, &key, &value, cas_req);
                let (status, cas) = store_status(&outcome);
                write_frame(&mut stream, op, status, opaque, cas, &[], &[], &[]).await?;
            }
            opcode::DELETE => {
                let outcome = store.delete(&key, cas_req);
                let (status, cas) = store_status(&outcome);
                write_frame(&mut stream, op, status, opaque, cas, &[], &[], &[]).await?;
            }
            opcode::INCREMENT | opcode::DECREMENT => {
                if extras.len() < 20 {
                    write_frame(&mut stream, op, 0x04, opaque, 0, &[], &[], b"Bad extras").await?;
                } else {
                    let delta = u64::from_be_bytes(extras[..8].try_into().unwrap());
                    let initial = u64::from_be_bytes(extras[8..16].try_into().unwrap());
                    let expires = u32::from_be_bytes(extras[16..20].try_into().unwrap());
                    let outcome = store.mutate(
                        op == opcode::INCREMENT,
                        &key,
                        delta,
                        initial,
                        expires != u32::MAX,
                    );
                    match outcome {
                        MutateOutcome::Value { value, cas } => {
                            write_frame(
                                &mut stream,
                                op,
                                0x00,
                                opaque,
                                cas,
                                &[],
                                &[],
                                &value.to_be_bytes(),
                            )
                            .await?;
                        }
                        MutateOutcome::NotFound => {
                            write_frame(&mut stream, op, 0x01, opaque, 0, &[], &[], b"Not found")
                                .await?;
                        }
                        MutateOutcome::NonNumeric => {
                            write_frame(
                                &mut stream,
                                op,
                                0x06,
                                opaque,
                                0,
                                &[],
                                &[],
                                b"Non-numeric value",
                            )
                            .await?;
                        }
                    }
                }
            }
            opcode::FLUSH => {
                store.flush();
                write_frame(&mut stream, op, 0x00, opaque, 0, &[], &[], &[]).await?;
            }
            opcode::STAT => {
                for (name, value) in store.stats() {
                    write_frame(
                        &mut stream,
                        op,
                        0x00,
                        opaque,
                        0,
                        &[],
                        name.as_bytes(),
                        value.as_bytes(),
                    )
                    .await?;
                }
                write_frame(&mut stream, op, 0x00, opaque, 0, &[], &[], &[]).await?;
            }
            opcode::VERSION => {
                write_frame(&mut stream, op, 0x00, opaque, 0, &[], &[], b"1.6.0-mock").await?;
            }
            opcode::SASL_LIST => {
                write_frame(&mut stream, op, 0x00, opaque, 0, &[], &[], b"PLAIN").await?;
            }
            opcode::SASL_AUTH | opcode::SASL_STEP => {
                let ok = match &auth {
                    None => true,
                    Some((user, password)) => {
                        let mut parts = value.split(|&b| b == 0);
                        let _zone = parts.next();
                        let got_user = parts.next().unwrap_or(b"");
                        let got_password = parts.next().unwrap_or(b"");
                        key == "PLAIN"
                            && got_user == user.as_bytes()
                            && got_password == password.as_bytes()
                    }
                };
                if ok {
                    authenticated = true;
                    write_frame(&mut stream, op, 0x00, opaque, 0, &[], &[], b"Authenticated")
                        .await?;
                } else {
                    write_frame(&mut stream, op, 0x20, opaque, 0, &[], &[], b"Auth failure")
                        .await?;
                }
            }
            _ => {
                write_frame(&mut stream, op, 0x81, opaque, 0, &[], &[], b"Unknown command")
                    .await?;
            }
        }
        stream.flush().await?;
    }
}

// ---- text dialect --------------------------------------------------

async fn read_text_line(stream: &mut BufStream<TcpStream>) -> io::Result<Option<String>> {
    let mut line = Vec::new();
    if stream.read_until(b'\n', &mut line).await? == 0 {
        return Ok(None);
    }
    while line.last() == Some(&b'\n') || line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

async fn read_text_data(stream: &mut BufStream<TcpStream>, len: usize) -> io::Result<Bytes> {
    let mut data = vec![0u8; len + 2];
    stream.read_exact(&mut data).await?;
    data.truncate(len);
    Ok(Bytes::from(data))
}

async fn serve_text(stream: TcpStream, store: Arc<Store>) -> io::Result<()> {
    let mut stream = BufStream::new(stream);
    loop {
        let line = match read_text_line(&mut stream).await? {
            Some(line) => line,
            None => return Ok(()),
        };
        let tokens: Vec<&str> = line.split_ascii_whitespace().collect();
        let reply = match tokens.as_slice() {
            [verb @ ("set" | "add" | "replace" | "cas"), key, flags, _exptime, bytes, rest @ ..] => {
                let flags: u32 = flags.parse().unwrap_or(0);
                let len: usize = bytes.parse().unwrap_or(0);
                let cas_req: u64 = rest.first().and_then(|t| t.parse().ok()).unwrap_or(0);
                let data = read_text_data(&mut stream, len).await?;
                let mode = match *verb {
                    "add" => StoreMode::Add,
                    "replace" => StoreMode::Replace,
                    _ => StoreMode::Set,
                };
                let outcome = store.store(mode, key, flags, data, cas_req);
                match (*verb, outcome) {
                    (_, StoreOutcome::Stored { .. }) => "STORED\r\n".to_string(),
                    ("cas", StoreOutcome::Exists { .. }) => "EXISTS\r\n".to_string(),
                    ("cas", StoreOutcome::NotFound) => "NOT_FOUND\r\n".to_string(),
                    _ => "NOT_STORED\r\n".to_string(),
                }
            }
            [verb @ ("append" | "prepend"), key, _flags, _exptime, bytes, ..] => {
                let len: usize = bytes.parse().unwrap_or(0);
                let data = read_text_data(&mut stream, len).await?;
                match store.concat(*verb == "append", key, &data, 0) {
                    StoreOutcome::Stored { .. } => "STORED\r\n".to_string(),
                    _ => "NOT_STORED\r\n".to_string(),
                }
            }
            ["get" | "gets", keys @ ..] => {
                let mut out = BytesMut::new();
                for key in keys {
                    if let Some(entry) = store.get(key) {
                        out.put_slice(
                            format!(
                                "VALUE {} {} {} {}\r\n",
                                key,
                                entry.flags,
                                entry.data.len(),
                                entry.cas
                            )
                            .as_bytes(),
                        );
                        out.put_slice(&entry.data);
                        out.put_slice(b"\r\n");
                    }
                }
                out.put_slice(b"END\r\n");
                stream.write_all(&out).await?;
                stream.flush().await?;
                continue;
            }
            [verb @ ("incr" | "decr"), key, delta] => {
                let delta: u64 = delta.parse().unwrap_or(0);
                match store.mutate(*verb == "incr", key, delta, 0, false) {
                    MutateOutcome::Value { value, .. } => format!("{value}\r\n"),
                    MutateOutcome::NotFound => "NOT_FOUND\r\n".to_string(),
                    MutateOutcome::NonNumeric => {
                        "CLIENT_ERROR cannot increment or decrement non-numeric value\r\n"
                            .to_string()
                    }
                }
            }
            ["delete", key] => match store.delete(key, 0) {
                StoreOutcome::Stored { .. } => "DELETED\r\n".to_string(),
                _ => "NOT_FOUND\r\n".to_string(),
            },
            ["flush_all"] => {
                store.flush();
                "OK\r\n".to_string()
            }
            ["stats", ..] => {
                let mut out = String::new();
                for (name, value) in store.stats() {
                    out.push_str(&format!("STAT {name} {value}\r\n"));
                }
                out.push_str("END\r\n");
                out
            }
            ["version"] => "VERSION 1.6.0-mock\r\n".to_string(),
            _ => "ERROR\r\n".to_string(),
        };
        stream.write_all(reply.as_bytes()).await?;
        stream.flush().await?;
    }
}
