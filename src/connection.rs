// Copyright resp3-client contributors - SPDX-Identifier: Apache-2.0
//! The public connection handle (spec.md §6 "External interfaces"):
//! `async_run`, `async_exec`, `async_receive`, `cancel`, plus a live usage
//! snapshot. Mirrors the shape of `glide-core`'s `ReconnectingConnection`
//! handle — a small `Clone`-able wrapper around shared state plus a
//! detached background task — but the background task here is the whole
//! read/write/health-check runner, not just a reconnect watchdog.

use crate::adapter::Value;
use crate::config::Config;
use crate::errors::{CallerError, RespError, RespResult};
use crate::multiplexer::ExecId;
use crate::request::Request;
use crate::runner::{Command, Runner};
use crate::usage::Usage;
use futures_intrusive::sync::ManualResetEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

/// A live, reconnecting connection to a single RESP3-speaking server.
///
/// `Clone` is cheap — it shares the same background runner task and
/// channels. Dropping every clone marks the connection for shutdown (the
/// `async_run` task ends once the command channel closes).
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    cmd_tx: mpsc::UnboundedSender<Command>,
    push_rx: AsyncMutex<mpsc::UnboundedReceiver<Value>>,
    connected: Arc<ManualResetEvent>,
    dropped: Arc<AtomicBool>,
    usage: Arc<Mutex<Usage>>,
    _runner: JoinHandle<()>,
}

impl Connection {
    /// Starts the background connection runner and returns a handle to it.
    /// The runner begins in `resolve` immediately; callers that can't wait
    /// should check [`Connection::is_connected`] before calling
    /// [`Connection::async_exec`] with `cancel_if_not_connected` set.
    pub fn async_run(config: Config) -> Connection {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(ManualResetEvent::new(false));
        let dropped = Arc::new(AtomicBool::new(false));
        let usage = Arc::new(Mutex::new(Usage::default()));

        let runner = Runner::spawn(
            config,
            cmd_rx,
            push_tx,
            connected.clone(),
            dropped.clone(),
            usage.clone(),
        );

        Connection {
            inner: Arc::new(Inner {
                cmd_tx,
                push_rx: AsyncMutex::new(push_rx),
                connected,
                dropped,
                usage,
                _runner: runner,
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.is_set()
    }

    /// Waits until a connection is currently established.
    pub async fn wait_until_connected(&self) {
        self.inner.connected.wait().await;
    }

    /// Submits a request and returns both its cancellation handle and a
    /// future that resolves to its result. Most callers want
    /// [`Connection::async_exec`] instead; this is for callers that need
    /// to race the result against an external cancellation signal.
    pub async fn submit(&self, request: Request) -> RespResult<(ExecId, oneshot::Receiver<RespResult<Vec<Value>>>)> {
        if self.inner.dropped.load(Ordering::Relaxed) {
            return Err(RespError::Caller(CallerError::ExecCancelled));
        }
        if request.config().cancel_if_not_connected && !self.inner.connected.is_set() {
            return Err(RespError::Connection(crate::errors::ConnectionError::NotConnected));
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        let (id_tx, id_rx) = oneshot::channel();
        self.inner
            .cmd_tx
            .send(Command::Exec {
                request,
                reply: reply_tx,
                id_reply: id_tx,
            })
            .map_err(|_| RespError::Connection(crate::errors::ConnectionError::NotConnected))?;
        let id = id_rx.await.map_err(|_| RespError::Connection(crate::errors::ConnectionError::NotConnected))?;
        Ok((id, reply_rx))
    }

    /// Submits a request and awaits its result.
    pub async fn async_exec(&self, request: Request) -> RespResult<Vec<Value>> {
        let (_id, rx) = self.submit(request).await?;
        rx.await.map_err(|_| RespError::Connection(crate::errors::ConnectionError::ConnectionLost))?
    }

    /// Cancels a previously submitted request by the handle returned from
    /// [`Connection::submit`]. A no-op if it already completed.
    pub fn cancel(&self, id: ExecId) {
        let _ = self.inner.cmd_tx.send(Command::Cancel(id));
    }

    /// Awaits the next out-of-band push message (e.g. a pub/sub
    /// publication or an invalidation notice). Returns `None` once the
    /// connection has shut down for good.
    pub async fn async_receive(&self) -> Option<Value> {
        self.inner.push_rx.lock().await.recv().await
    }

    pub fn usage(&self) -> Usage {
        *self.inner.usage.lock().unwrap()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestConfig;

    #[tokio::test]
    async fn cancel_if_not_connected_fails_immediately_when_disconnected() {
        let config = Config::new("127.0.0.1", 1);
        let conn = Connection::async_run(config);
        assert!(!conn.is_connected());

        let mut request = Request::new(RequestConfig {
            cancel_if_not_connected: true,
            ..RequestConfig::default()
        });
        request.add_command("PING", std::iter::empty::<&[u8]>());

        let err = conn.submit(request).await.unwrap_err();
        assert!(matches!(
            err,
            RespError::Connection(crate::errors::ConnectionError::NotConnected)
        ));
    }
}
