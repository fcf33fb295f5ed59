// Copyright resp3-client contributors - SPDX-Identifier: Apache-2.0
//! The connection runner (spec.md §4.6, §4.7): a single cooperatively
//! scheduled task per connection, cycling through
//! `resolve -> connect -> handshake -> ready <-> draining -> reconnect_wait`.
//!
//! Grounded on `glide-core`'s `reconnecting_connection.rs` for the overall
//! shape (a `ManualResetEvent` gating callers until connected, an
//! `AtomicBool` drop flag stopping the reconnect loop) but reworked from a
//! "spawn a detached reconnect task per attempt" design into one
//! `tokio::select!`-driven task that also owns the read/write loop itself,
//! per this crate's single-task-per-connection concurrency model.

mod handshake;
pub mod transport;

use crate::adapter::Value;
use crate::config::Config;
use crate::errors::{ConnectionError, RespError, RespResult, TransportTimeout};
use crate::multiplexer::{ExecId, Multiplexer};
use crate::request::{Request, RequestConfig};
use crate::retry::ReconnectBackoff;
use crate::usage::Usage;
use bytes::{Bytes, BytesMut};
use futures_intrusive::sync::ManualResetEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// One request submitted over the command channel from a [`crate::connection::Connection`]
/// handle to the runner task.
pub(crate) enum Command {
    Exec {
        request: Request,
        reply: oneshot::Sender<RespResult<Vec<Value>>>,
        id_reply: oneshot::Sender<ExecId>,
    },
    Cancel(ExecId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Resolving,
    Connecting,
    Handshaking,
    Ready,
    Draining,
    ReconnectWait,
}

pub(crate) struct Runner {
    config: Config,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    push_tx: mpsc::UnboundedSender<Value>,
    connected: Arc<ManualResetEvent>,
    dropped: Arc<AtomicBool>,
    usage: Arc<Mutex<Usage>>,
}

impl Runner {
    pub(crate) fn spawn(
        config: Config,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
        push_tx: mpsc::UnboundedSender<Value>,
        connected: Arc<ManualResetEvent>,
        dropped: Arc<AtomicBool>,
        usage: Arc<Mutex<Usage>>,
    ) -> tokio::task::JoinHandle<()> {
        let runner = Runner {
            config,
            cmd_rx,
            push_tx,
            connected,
            dropped,
            usage,
        };
        tokio::spawn(runner.run())
    }

    async fn run(mut self) {
        let backoff = ReconnectBackoff::new(self.config.reconnect_base_interval, self.config.reconnect_max_interval);
        let mut waits = backoff.iter();
        loop {
            if self.dropped.load(Ordering::Relaxed) {
                return;
            }
            match self.run_connection().await {
                Ok(()) => {
                    // Ready-loop exited because the command channel closed:
                    // every `Connection` handle was dropped.
                    return;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "resp3 connection lost, reconnecting");
                }
            }
            if self.dropped.load(Ordering::Relaxed) {
                return;
            }
            // `reconnect_base_interval == 0` means "never reconnect"
            // (spec.md §6 `reconnect_wait_interval, 0 disables reconnect`).
            if self.config.reconnect_base_interval.is_zero() {
                return;
            }
            self.connected.reset();
            let wait = waits.next().unwrap_or(self.config.reconnect_max_interval);
            tracing::debug!(?wait, "reconnect_wait");
            tokio::time::sleep(wait).await;
        }
    }

    async fn run_connection(&mut self) -> RespResult<()> {
        tracing::debug!(state = ?ConnState::Resolving, "connection state");
        tracing::debug!(state = ?ConnState::Connecting, addr = %self.config.address, "connection state");
        let mut stream = transport::connect(&self.config).await?;

        tracing::debug!(state = ?ConnState::Handshaking, "connection state");
        handshake::perform(&mut stream, &self.config).await?;

        tracing::debug!(state = ?ConnState::Ready, "connection state");
        self.connected.set();
        let result = self.ready_loop(stream).await;
        tracing::debug!(state = ?ConnState::Draining, "connection state");
        result
    }

    async fn ready_loop(&mut self, stream: Box<dyn transport::Transport>) -> RespResult<()> {
        let (mut read_half, mut write_half) = tokio::io::split(stream);
        let push_tx = self.push_tx.clone();
        let mut mux = Multiplexer::new(
            self.config.max_nested_depth,
            Box::new(move |value| {
                let _ = push_tx.send(value);
            }),
        );

        let mut read_buf = BytesMut::with_capacity(64 * 1024);
        let mut carry = Bytes::new();
        let mut health_timer = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.health_check_interval,
            self.config.health_check_interval,
        );
        health_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut awaiting_pong: Option<(ExecId, Instant)> = None;

        loop {
            let next_write = if mux.nothing_to_write() {
                None
            } else {
                mux.next_write_chunk()
            };

            let read_timeout = if mux.has_response_pending() {
                self.config.read_timeout
            } else {
                self.config.idle_timeout
            };

            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Exec { request, reply, id_reply }) => {
                            let id = mux.submit_with(request, reply);
                            let _ = id_reply.send(id);
                        }
                        Some(Command::Cancel(id)) => mux.cancel(id),
                        None => return Ok(()),
                    }
                }

                _ = health_timer.tick(), if awaiting_pong.is_none() => {
                    let (tx, _rx) = oneshot::channel();
                    let mut request = Request::new(RequestConfig { retry: false, ..RequestConfig::default() });
                    request.add_command("PING", [self.config.health_check_id.as_bytes()]);
                    let id = mux.submit_with(request, tx);
                    awaiting_pong = Some((id, Instant::now() + self.config.health_check_timeout));
                }

                _ = pong_deadline(awaiting_pong) => {
                    return Err(RespError::Connection(ConnectionError::PongTimeout));
                }

                result = tokio::time::timeout(read_timeout, read_once(&mut read_half, &mut read_buf)) => {
                    let kind = if mux.has_response_pending() { TransportTimeout::Read } else { TransportTimeout::Idle };
                    let n = result
                        .map_err(|_| RespError::Transport { kind, duration: read_timeout })??;
                    if n == 0 {
                        return Err(RespError::Connection(ConnectionError::ConnectionLost));
                    }
                    let mut frame = BytesMut::with_capacity(carry.len() + n);
                    frame.extend_from_slice(&carry);
                    frame.extend_from_slice(&read_buf[..n]);
                    let frame = frame.freeze();
                    if frame.len() > self.config.max_read_size {
                        return Err(RespError::Io("response exceeded max_read_size".to_string()));
                    }
                    let consumed = mux.on_read_bytes(&frame)?;
                    carry = frame.slice(consumed..);
                    if awaiting_pong.is_some() && !mux.has_response_pending() {
                        awaiting_pong = None;
                    }
                }

                result = tokio::time::timeout(self.config.write_timeout, write_once(&mut write_half, &next_write)), if next_write.is_some() => {
                    let n = result
                        .map_err(|_| RespError::Transport { kind: TransportTimeout::Write, duration: self.config.write_timeout })??;
                    if let Some((id, _)) = next_write {
                        mux.on_written(id, n);
                    }
                }
            }

            *self.usage.lock().unwrap() = mux.usage;
        }
    }
}

/// Resolves once `awaiting_pong`'s deadline elapses; stays pending forever
/// if no PING is currently outstanding, so the `select!` branch above is a
/// no-op until there's actually a deadline to watch.
async fn pong_deadline(awaiting_pong: Option<(ExecId, Instant)>) {
    match awaiting_pong {
        Some((_, deadline)) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

type BoxedTransport = Box<dyn transport::Transport>;

async fn read_once(
    read_half: &mut tokio::io::ReadHalf<BoxedTransport>,
    buf: &mut BytesMut,
) -> RespResult<usize> {
    buf.resize(64 * 1024, 0);
    let n = read_half.read(buf).await?;
    Ok(n)
}

async fn write_once(
    write_half: &mut tokio::io::WriteHalf<BoxedTransport>,
    next: &Option<(ExecId, Bytes)>,
) -> RespResult<usize> {
    match next {
        Some((_, chunk)) => Ok(write_half.write(chunk).await?),
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestConfig;
    use tokio::io::duplex;

    fn test_runner(cmd_rx: mpsc::UnboundedReceiver<Command>, push_tx: mpsc::UnboundedSender<Value>) -> Runner {
        Runner {
            config: Config::default(),
            cmd_rx,
            push_tx,
            connected: Arc::new(ManualResetEvent::new(false)),
            dropped: Arc::new(AtomicBool::new(false)),
            usage: Arc::new(Mutex::new(Usage::default())),
        }
    }

    #[tokio::test]
    async fn ready_loop_round_trips_a_ping_and_reports_a_push() {
        let (client_side, mut server_side) = duplex(4096);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (push_tx, mut push_rx) = mpsc::unbounded_channel();
        let mut runner = test_runner(cmd_rx, push_tx);

        let server = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let n = server_side.read(&mut buf).await.unwrap();
            assert!(buf[..n].starts_with(b"*1\r\n$4\r\nPING\r\n"));
            server_side.write_all(b"+PONG\r\n").await.unwrap();
            server_side.write_all(b">1\r\n+hello\r\n").await.unwrap();
        });

        let stream: Box<dyn transport::Transport> = Box::new(client_side);
        let ready = tokio::spawn(async move { runner.ready_loop(stream).await });

        let (reply_tx, reply_rx) = oneshot::channel();
        let (id_tx, _id_rx) = oneshot::channel();
        let mut request = Request::new(RequestConfig::default());
        request.add_command("PING", std::iter::empty::<&[u8]>());
        cmd_tx
            .send(Command::Exec {
                request,
                reply: reply_tx,
                id_reply: id_tx,
            })
            .unwrap();

        let values = reply_rx.await.unwrap().unwrap();
        assert_eq!(values, vec![Value::SimpleString(Bytes::from_static(b"PONG"))]);

        let push = push_rx.recv().await.unwrap();
        assert_eq!(push, Value::Push(vec![Value::SimpleString(Bytes::from_static(b"hello"))]));

        server.await.unwrap();
        drop(cmd_tx);
        let _ = ready.await;
    }

    #[tokio::test]
    async fn ready_loop_fails_with_pong_timeout_when_no_pong_arrives() {
        let (client_side, server_side) = duplex(4096);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (push_tx, _push_rx) = mpsc::unbounded_channel();
        let mut runner = test_runner(cmd_rx, push_tx);
        runner.config.health_check_interval = std::time::Duration::from_millis(10);
        runner.config.health_check_timeout = std::time::Duration::from_millis(20);

        let stream: Box<dyn transport::Transport> = Box::new(client_side);
        let err = runner.ready_loop(stream).await.unwrap_err();
        assert!(matches!(err, RespError::Connection(ConnectionError::PongTimeout)));

        drop(server_side);
        drop(cmd_tx);
    }
}
