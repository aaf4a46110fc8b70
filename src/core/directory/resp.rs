// src/core/directory/resp.rs

//! An owner directory backed by a RESP-speaking shared KV.
//!
//! A deliberately small client: array-of-bulk-string requests, the handful of
//! reply shapes GET/SET/DEL produce, one pooled connection with
//! reconnect-on-demand, and timeouts on connect and read.

use super::{OwnerDirectory, OwnerRecord, assignment_key, owner_key};
use crate::core::FoghornError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
pub struct RespDirectory {
    addr: String,
    timeout: Duration,
    conn: Mutex<Option<BufReader<TcpStream>>>,
}

/// The subset of RESP replies the directory operations produce.
#[derive(Debug, PartialEq)]
enum Reply {
    Simple(String),
    Bulk(Option<String>),
    Integer(i64),
    Error(String),
}

impl RespDirectory {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            conn: Mutex::new(None),
        }
    }

    /// Runs one command against the shared KV, dialing if needed. Any IO error
    /// drops the connection so the next call re-dials.
    async fn command(&self, parts: &[&str]) -> Result<Reply, FoghornError> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
                .await
                .map_err(|_| {
                    FoghornError::Unavailable(format!("directory {} connect timeout", self.addr))
                })?
                .map_err(|e| {
                    FoghornError::Unavailable(format!("directory {} unreachable: {e}", self.addr))
                })?;
            *guard = Some(BufReader::new(stream));
            debug!("Connected to shared directory at {}", self.addr);
        }

        let stream = guard.as_mut().expect("connection just established");
        let result = self.exchange(stream, parts).await;
        if result.is_err() {
            *guard = None;
        }
        result
    }

    async fn exchange(
        &self,
        stream: &mut BufReader<TcpStream>,
        parts: &[&str],
    ) -> Result<Reply, FoghornError> {
        let mut request = format!("*{}\r\n", parts.len());
        for part in parts {
            request.push_str(&format!("${}\r\n{}\r\n", part.len(), part));
        }
        stream.get_mut().write_all(request.as_bytes()).await?;

        tokio::time::timeout(self.timeout, read_reply(stream))
            .await
            .map_err(|_| FoghornError::Unavailable("directory read timeout".to_string()))?
    }

    async fn expect_write_ok(&self, parts: &[&str]) -> Result<(), FoghornError> {
        match self.command(parts).await? {
            Reply::Simple(_) | Reply::Integer(_) | Reply::Bulk(_) => Ok(()),
            Reply::Error(e) => Err(FoghornError::Unavailable(format!("directory error: {e}"))),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, FoghornError> {
        match self.command(&["GET", key]).await? {
            Reply::Bulk(value) => Ok(value),
            Reply::Simple(value) => Ok(Some(value)),
            Reply::Integer(n) => Ok(Some(n.to_string())),
            Reply::Error(e) => Err(FoghornError::Unavailable(format!("directory error: {e}"))),
        }
    }
}

#[async_trait]
impl OwnerDirectory for RespDirectory {
    async fn claim(
        &self,
        cluster_id: &str,
        node_id: &str,
        record: &OwnerRecord,
    ) -> Result<(), FoghornError> {
        let key = owner_key(cluster_id, node_id);
        let value = record.encode();
        self.expect_write_ok(&["SET", &key, &value]).await
    }

    async fn release_if_owner(
        &self,
        cluster_id: &str,
        node_id: &str,
        instance_id: &str,
    ) -> Result<bool, FoghornError> {
        let key = owner_key(cluster_id, node_id);
        // Read-compare-delete. Only the instance named in the record issues
        // the delete, and a concurrent re-claim overwrites rather than racing
        // the removal, so the window between GET and DEL is benign.
        let Some(current) = self.get(&key).await? else {
            return Ok(false);
        };
        let owned = OwnerRecord::parse(&current).is_some_and(|r| r.instance_id == instance_id);
        if !owned {
            return Ok(false);
        }
        self.expect_write_ok(&["DEL", &key]).await?;
        Ok(true)
    }

    async fn lookup(
        &self,
        cluster_id: &str,
        node_id: &str,
    ) -> Result<Option<OwnerRecord>, FoghornError> {
        let key = owner_key(cluster_id, node_id);
        Ok(self.get(&key).await?.and_then(|v| OwnerRecord::parse(&v)))
    }

    async fn assigned_clusters(&self, instance_id: &str) -> Result<Vec<String>, FoghornError> {
        let key = assignment_key(instance_id);
        Ok(self
            .get(&key)
            .await?
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Reads a single RESP reply. Arrays are not needed by the directory ops and
/// are rejected as protocol errors.
async fn read_reply(stream: &mut BufReader<TcpStream>) -> Result<Reply, FoghornError> {
    let line = read_line(stream).await?;
    let (kind, rest) = line.split_at(1);
    match kind {
        "+" => Ok(Reply::Simple(rest.to_string())),
        "-" => Ok(Reply::Error(rest.to_string())),
        ":" => Ok(Reply::Integer(rest.parse().map_err(|_| {
            FoghornError::Protocol(format!("bad integer reply: {rest}"))
        })?)),
        "$" => {
            let len: i64 = rest
                .parse()
                .map_err(|_| FoghornError::Protocol(format!("bad bulk length: {rest}")))?;
            if len < 0 {
                return Ok(Reply::Bulk(None));
            }
            let mut body = vec![0u8; len as usize + 2];
            stream.read_exact(&mut body).await?;
            body.truncate(len as usize);
            Ok(Reply::Bulk(Some(String::from_utf8_lossy(&body).to_string())))
        }
        "_" => Ok(Reply::Bulk(None)),
        other => Err(FoghornError::Protocol(format!(
            "unexpected reply type '{other}'"
        ))),
    }
}

async fn read_line(stream: &mut BufReader<TcpStream>) -> Result<String, FoghornError> {
    let mut line = Vec::new();
    loop {
        let byte = stream.read_u8().await?;
        if byte == b'\r' {
            let lf = stream.read_u8().await?;
            if lf != b'\n' {
                return Err(FoghornError::Protocol("malformed line ending".to_string()));
            }
            break;
        }
        line.push(byte);
        if line.len() > 4096 {
            return Err(FoghornError::Protocol("reply line too long".to_string()));
        }
    }
    String::from_utf8(line).map_err(|_| FoghornError::Protocol("non-UTF8 reply".to_string()))
}
