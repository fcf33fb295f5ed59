// Copyright resp3-client contributors - SPDX-Identifier: Apache-2.0
//! The crate's error taxonomy (spec.md §7), kept in distinct families per
//! origin so callers (and tests) can assert against the exact kind rather
//! than a flattened error string — the same posture `glide-core::errors`
//! takes in mapping a `RedisError` to a `RequestErrorType`.

use crate::resp3::ParserError;
use std::io;
use std::time::Duration;

pub type RespResult<T> = Result<T, RespError>;

/// Resolve/transport/TLS timeout kinds (spec.md §5, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum TransportTimeout {
    Resolve,
    Connect,
    SslHandshake,
    Hello,
    HealthCheck,
    Read,
    Write,
    Idle,
}

/// RESP3-level errors: attributed to the originating request's adapter;
/// the connection is not torn down (spec.md §7 "Protocol-level").
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("server returned a simple error: {0}")]
    Resp3SimpleError(String),
    #[error("server returned a blob error: {0}")]
    Resp3BlobError(String),
    #[error("server returned a null reply where a value was expected")]
    Resp3Null,
    #[error("response size is incompatible with the expected type")]
    IncompatibleSize,
    #[error("expected a non-empty field")]
    EmptyField,
    #[error("expected a RESP3 simple type")]
    ExpectsResp3SimpleType,
    #[error("expected a RESP3 aggregate type")]
    ExpectsResp3Aggregate,
    #[error("nested aggregates are not supported by this adapter")]
    NestedAggregateNotSupported,
    #[error("received a response while none was expected")]
    UnexpectedReadResponse,
}

/// Connection lifecycle failures: fatal to the current connection, drive it
/// to `draining` (spec.md §7 "Connection lifecycle").
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    #[error("no connection is currently established")]
    NotConnected,
    #[error("the connection was lost")]
    ConnectionLost,
    #[error("no PONG was received within the health check deadline")]
    PongTimeout,
    #[error("HELLO handshake failed: {0}")]
    HelloFailed(String),
    #[error("a push-typed frame arrived while synchronously awaiting a response")]
    SyncReceivedPushType,
    #[error("the connection was lost after a partial response had already started arriving")]
    Unresponded,
}

/// Caller-local failures, surfaced directly to the call that triggered them
/// (spec.md §7 "Caller").
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallerError {
    #[error("the operation was cancelled before it completed")]
    ExecCancelled,
    #[error("the operation was cancelled after its bytes were already sent")]
    CancelledAfterSent,
    #[error("the request was retried too many times")]
    RequestRetriedTooManyTimes,
    #[error("a node's reported nesting depth is incompatible with this adapter")]
    IncompatibleNodeDepth,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RespError {
    #[error("{kind} timed out after {duration:?}")]
    Transport {
        kind: TransportTimeout,
        duration: Duration,
    },
    #[error("I/O error: {0}")]
    Io(String),
    #[error("RESP3 parse error: {0}")]
    Parse(#[from] ParserError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("caller error: {0}")]
    Caller(#[from] CallerError),
}

impl From<io::Error> for RespError {
    fn from(err: io::Error) -> Self {
        RespError::Io(err.to_string())
    }
}

impl RespError {
    /// Parser errors and explicit terminal cancellations are never locally
    /// recoverable — they surface all the way to `async_run` (spec.md §7
    /// "Propagation policy").
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            RespError::Parse(_) | RespError::Connection(_) | RespError::Transport { .. } | RespError::Io(_)
        )
    }
}
