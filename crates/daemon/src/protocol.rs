// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control socket protocol.
//!
//! Every message is a JSON document preceded by its length as a 4-byte
//! big-endian integer. A connection carries one request and one response.

use std::path::Path;
use std::time::Duration;

use ork_core::{AgentToken, CreatePoolOptions, Job, Pool, PoolId, RunId, RunnerMeta};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;

pub const PROTOCOL_VERSION: &str = "1";

/// Bound on reading or writing a single message
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    Ping,
    Hello {
        version: String,
    },
    Status,
    /// Create a job for the current phase of a run held by the remote
    EnqueueRun {
        run: RunId,
    },
    /// Request cancellation of a run and propagate it to its job
    CancelRun {
        run: RunId,
        #[serde(default)]
        force: bool,
    },
    ListJobs,
    ListRunners,
    CreatePool {
        options: CreatePoolOptions,
    },
    CreateAgentToken {
        pool_id: PoolId,
        description: String,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Pong,
    Hello {
        version: String,
    },
    Ok,
    Status {
        uptime_secs: u64,
        jobs_active: usize,
        runners_active: usize,
    },
    /// The job affected by a request, if any
    Job {
        job: Option<Job>,
    },
    Jobs {
        jobs: Vec<Job>,
    },
    Runners {
        runners: Vec<RunnerMeta>,
    },
    Pool {
        pool: Pool,
    },
    /// A new agent token. `bearer` is shown once and never stored.
    AgentToken {
        token: AgentToken,
        bearer: String,
    },
    ShuttingDown,
    Error {
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message of {size} bytes exceeds limit of {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("timed out")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,
}

/// Serialize a message body, without the length prefix
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(message)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    writer.write_all(&(data.len() as u32).to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    }
    let size = u32::from_be_bytes(prefix) as usize;
    if size > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }
    let mut data = vec![0u8; size];
    reader.read_exact(&mut data).await?;
    Ok(data)
}

async fn read_with_timeout<T, R>(reader: &mut R, timeout: Duration) -> Result<T, ProtocolError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let data = tokio::time::timeout(timeout, read_message(reader))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    decode(&data)
}

async fn write_with_timeout<T, W>(
    writer: &mut W,
    message: &T,
    timeout: Duration,
) -> Result<(), ProtocolError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let data = encode(message)?;
    tokio::time::timeout(timeout, write_message(writer, &data))
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

pub async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut R,
    timeout: Duration,
) -> Result<Request, ProtocolError> {
    read_with_timeout(reader, timeout).await
}

pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Response,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    write_with_timeout(writer, response, timeout).await
}

/// Send one request to the daemon at `socket` and wait for its response
pub async fn call(
    socket: &Path,
    request: &Request,
    timeout: Duration,
) -> Result<Response, ProtocolError> {
    let stream = tokio::time::timeout(timeout, UnixStream::connect(socket))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    let (mut reader, mut writer) = stream.into_split();
    write_with_timeout(&mut writer, request, timeout).await?;
    read_with_timeout(&mut reader, timeout).await
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
