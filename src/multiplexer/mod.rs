// Copyright resp3-client contributors - SPDX-Identifier: Apache-2.0
//! The multiplexer (spec.md §4.3): owns the pending-request queue, hands
//! out write-ready byte chunks, and routes parsed nodes back to the request
//! that's waiting on them — or, for push frames, off to a side channel.
//!
//! Grounded on the correlation queue in `redis-rs`'s `aio.rs` pipeline sink
//! (a `VecDeque` of in-flight senders matched one-for-one against parsed
//! responses) combined with `glide-core`'s `reconnecting_connection.rs`
//! notion of connection-scoped cancellation.

mod entry;

use crate::adapter::Value;
use crate::errors::{ConnectionError, RespError, RespResult};
use crate::request::Request;
use crate::resp3::{Parser, ParserEvent};
use bytes::Bytes;
use std::collections::VecDeque;
use tokio::sync::oneshot;

pub use entry::{ExecEntry, ExecStatus};

/// Opaque handle to a submitted request, needed only to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoutingTarget {
    /// Between responses: the next node's type decides how this one routes.
    Undetermined,
    Push,
    Response,
}

/// Owns the FIFO request queue, the incremental parser, and routes its
/// output. Single-threaded by design (spec.md §5): driven entirely from
/// inside the connection runner's `tokio::select!` loop, never shared
/// across tasks.
pub struct Multiplexer {
    queue: VecDeque<(ExecId, ExecEntry)>,
    next_id: u64,
    parser: Parser,
    routing: RoutingTarget,
    push_adapter: Option<Box<dyn crate::adapter::ResponseAdapter>>,
    push_sink: Box<dyn FnMut(Value) + Send>,
    pub usage: crate::usage::Usage,
    /// Bytes seen so far for the response or push currently being
    /// assembled. A single top-level frame's node stream can span several
    /// separate `on_read_bytes` calls, so this has to outlive any one of
    /// them; it resets to 0 once `EndOfResponse` flushes it into `usage`.
    response_bytes_acc: usize,
}

impl Multiplexer {
    pub fn new(max_nested_depth: usize, push_sink: Box<dyn FnMut(Value) + Send>) -> Multiplexer {
        Multiplexer {
            queue: VecDeque::new(),
            next_id: 0,
            parser: Parser::new(max_nested_depth),
            routing: RoutingTarget::Undetermined,
            push_adapter: None,
            push_sink,
            usage: crate::usage::Usage::default(),
            response_bytes_acc: 0,
        }
    }

    /// Drops all in-flight state on reconnect. Every still-pending entry is
    /// disposed of per spec.md §4.4's Exec-FSM priority order: an already
    /// soft-cancelled entry resolves as cancelled; `cancel_on_connection_lost`
    /// fails immediately with `connection_lost` if no response byte has
    /// arrived yet; `cancel_if_unresponded` fails with `unresponded` if some
    /// response bytes already arrived; only then does `retry` get a chance
    /// to requeue the entry for resubmission (spec.md §4.6 "reconnect").
    pub fn reset(&mut self) -> Vec<Request> {
        self.parser.reset();
        self.routing = RoutingTarget::Undetermined;
        self.push_adapter = None;
        self.response_bytes_acc = 0;
        let mut to_retry = Vec::new();
        while let Some((_, mut entry)) = self.queue.pop_front() {
            if entry.status() == ExecStatus::Cancelled {
                entry.resolve_cancelled(entry.offset > 0);
            } else if entry.config.cancel_on_connection_lost && !entry.response_started() {
                entry.resolve_error(RespError::Connection(ConnectionError::ConnectionLost));
            } else if entry.config.cancel_if_unresponded && entry.response_started() {
                entry.resolve_error(RespError::Connection(ConnectionError::Unresponded));
            } else if entry.config.retry {
                to_retry.push(entry.unwritten_request());
            } else {
                entry.resolve_cancelled(entry.offset > 0);
            }
        }
        to_retry
    }

    pub fn submit(&mut self, request: Request) -> (ExecId, oneshot::Receiver<RespResult<Vec<Value>>>) {
        let (tx, rx) = oneshot::channel();
        let id = self.submit_with(request, tx);
        (id, rx)
    }

    /// Like [`submit`](Self::submit), but delivers the result on a
    /// caller-supplied channel instead of allocating a fresh one — lets the
    /// runner hand a caller's own reply sender straight to the multiplexer
    /// with no bridging task in between.
    pub fn submit_with(&mut self, request: Request, result_tx: oneshot::Sender<RespResult<Vec<Value>>>) -> ExecId {
        let (payload, commands, expected_responses, config) = request.into_parts();
        let id = ExecId(self.next_id);
        self.next_id += 1;
        let entry = ExecEntry::new(payload, config, commands.len(), expected_responses, result_tx);
        self.queue.push_back((id, entry));
        id
    }

    pub fn nothing_to_write(&self) -> bool {
        !self.queue.iter().any(|(_, e)| e.has_unwritten())
    }

    /// Returns the next unsent payload tail. Callers should write it in one
    /// go when possible; `on_written` advances past however much actually
    /// made it to the socket.
    pub fn next_write_chunk(&mut self) -> Option<(ExecId, Bytes)> {
        for (id, entry) in self.queue.iter_mut() {
            if entry.has_unwritten() {
                entry.status = ExecStatus::Writing;
                return Some((*id, Bytes::copy_from_slice(entry.unwritten())));
            }
        }
        None
    }

    pub fn on_written(&mut self, id: ExecId, n: usize) {
        self.usage.bytes_sent += n as u64;
        if let Some((_, entry)) = self.queue.iter_mut().find(|(eid, _)| *eid == id) {
            entry.offset += n;
            if entry.offset >= entry.payload.len() {
                entry.status = ExecStatus::AwaitingResponse;
                self.usage.commands_sent += entry.commands_total as u64;
            }
        }
        self.reap_completed();
    }

    pub fn has_response_pending(&self) -> bool {
        self.queue
            .iter()
            .any(|(_, e)| e.status() == ExecStatus::AwaitingResponse)
    }

    /// Feeds newly-read bytes to the parser and routes whatever nodes come
    /// out. Returns the number of leading bytes consumed, exactly like
    /// `Parser::feed` (spec.md §4.1 resumable-decode contract threads
    /// straight through the multiplexer).
    pub fn on_read_bytes(&mut self, buf: &Bytes) -> RespResult<usize> {
        let Multiplexer {
            parser,
            queue,
            routing,
            push_adapter,
            push_sink,
            usage,
            response_bytes_acc,
            ..
        } = self;
        let mut router = Router {
            queue,
            routing,
            push_adapter,
            push_sink,
            usage,
            bytes_acc: response_bytes_acc,
        };
        let consumed = parser.feed(buf, &mut |event| router.handle(event))?;
        self.reap_completed();
        Ok(consumed)
    }

    /// Cancels a submitted request. If not a single byte of its payload has
    /// reached the writer, it is removed outright; otherwise it is
    /// soft-cancelled (stays in the queue so response framing stays
    /// aligned, but resolves to an error and discards parsed values).
    pub fn cancel(&mut self, id: ExecId) {
        let Some(index) = self.queue.iter().position(|(eid, _)| *eid == id) else {
            return;
        };
        if self.queue[index].1.offset == 0 && self.queue[index].1.status() == ExecStatus::Pending {
            let (_, mut entry) = self.queue.remove(index).unwrap();
            entry.resolve_cancelled(false);
        } else {
            self.queue[index].1.status = ExecStatus::Cancelled;
        }
    }

    /// Cancels every queued entry whose config demands it, used when the
    /// connection drops (spec.md §4.6). Returns the entries the caller
    /// should re-submit from scratch (their `retry` flag was set).
    pub fn on_connection_lost(&mut self) -> Vec<Request> {
        self.reset()
    }

    fn reap_completed(&mut self) {
        while let Some((_, entry)) = self.queue.front() {
            if !entry.is_complete() {
                break;
            }
            let (_, mut entry) = self.queue.pop_front().unwrap();
            if entry.status() == ExecStatus::Cancelled {
                entry.resolve_cancelled(true);
            } else {
                entry.resolve_ok();
            }
        }
    }
}

struct Router<'a> {
    queue: &'a mut VecDeque<(ExecId, ExecEntry)>,
    routing: &'a mut RoutingTarget,
    push_adapter: &'a mut Option<Box<dyn crate::adapter::ResponseAdapter>>,
    push_sink: &'a mut Box<dyn FnMut(Value) + Send>,
    usage: &'a mut crate::usage::Usage,
    /// Accumulates `node.value.len()` across every node belonging to the
    /// response or push currently being assembled, flushed into `usage` at
    /// `EndOfResponse` (spec.md §6 `response_bytes_received`/`push_bytes_received`).
    bytes_acc: &'a mut usize,
}

impl Router<'_> {
    fn handle(&mut self, event: ParserEvent) {
        match event {
            ParserEvent::Node(node) => {
                if *self.routing == RoutingTarget::Undetermined {
                    *self.routing = if node.data_type.is_push() {
                        RoutingTarget::Push
                    } else {
                        RoutingTarget::Response
                    };
                }
                *self.bytes_acc += node.value.len();
                match self.routing {
                    RoutingTarget::Push => {
                        let adapter = self
                            .push_adapter
                            .get_or_insert_with(|| Box::new(crate::adapter::NodeCollector::new()));
                        // A malformed push frame (adapter rejects a node) is
                        // not fatal to the connection; it just drops the push.
                        let _ = adapter.on_node(node);
                    }
                    RoutingTarget::Response => {
                        if let Some((_, entry)) = self.queue.front_mut() {
                            let adapter = entry.adapter_or_new();
                            let _ = adapter.on_node(node);
                        }
                    }
                    RoutingTarget::Undetermined => unreachable!(),
                }
            }
            ParserEvent::EndOfResponse => {
                let bytes = std::mem::take(self.bytes_acc) as u64;
                match std::mem::replace(self.routing, RoutingTarget::Undetermined) {
                    RoutingTarget::Push => {
                        if let Some(adapter) = self.push_adapter.take() {
                            if let Ok(value) = adapter.finish() {
                                self.usage.record_push(bytes);
                                (self.push_sink)(value);
                            }
                        }
                    }
                    RoutingTarget::Response => {
                        if let Some((_, entry)) = self.queue.front_mut() {
                            if entry.complete_one_response().is_ok() {
                                self.usage.record_response(bytes);
                            }
                        }
                    }
                    RoutingTarget::Undetermined => {}
                }
            }
        }
    }
}

impl ExecEntry {
    /// Rebuilds a fresh [`Request`]-shaped payload for retry after a
    /// connection loss. Only the unsent remainder would be wrong to resend
    /// (a partially-written command must restart from its first byte), so
    /// this always restarts from the beginning of the original payload.
    fn unwritten_request(&self) -> Request {
        // Retried requests are re-submitted as raw pre-encoded payloads;
        // the multiplexer only needs the bytes and bookkeeping back, not
        // the original builder's command list.
        Request::from_raw(self.payload.clone(), self.config, self.expected_responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CallerError;
    use crate::request::RequestConfig;

    fn new_mux() -> (Multiplexer, std::sync::Arc<std::sync::Mutex<Vec<Value>>>) {
        let pushes = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink_pushes = pushes.clone();
        let mux = Multiplexer::new(8, Box::new(move |v| sink_pushes.lock().unwrap().push(v)));
        (mux, pushes)
    }

    #[test]
    fn round_trips_a_single_command() {
        let (mut mux, _pushes) = new_mux();
        let mut req = Request::new(RequestConfig::default());
        req.add_command("PING", std::iter::empty::<&[u8]>());
        let (id, rx) = mux.submit(req);

        let (chunk_id, chunk) = mux.next_write_chunk().expect("a chunk should be ready");
        assert_eq!(chunk_id, id);
        mux.on_written(chunk_id, chunk.len());
        assert!(mux.nothing_to_write());

        let consumed = mux.on_read_bytes(&Bytes::from_static(b"+PONG\r\n")).unwrap();
        assert_eq!(consumed, 7);

        let result = rx.try_recv().expect("result should be ready");
        let values = result.unwrap();
        assert_eq!(values, vec![Value::SimpleString(Bytes::from_static(b"PONG"))]);
    }

    #[test]
    fn push_frames_bypass_the_queue() {
        let (mut mux, pushes) = new_mux();
        let mut req = Request::new(RequestConfig::default());
        req.add_command("GET", ["k"].map(str::as_bytes));
        let (id, rx) = mux.submit(req);
        let (_, chunk) = mux.next_write_chunk().unwrap();
        mux.on_written(id, chunk.len());

        mux.on_read_bytes(&Bytes::from_static(b">2\r\n+message\r\n+hi\r\n")).unwrap();
        assert_eq!(pushes.lock().unwrap().len(), 1);
        assert!(rx.try_recv().is_err());

        mux.on_read_bytes(&Bytes::from_static(b"$-1\r\n")).unwrap();
        let values = rx.try_recv().unwrap().unwrap();
        assert_eq!(values, vec![Value::Null]);
    }

    #[test]
    fn cancel_before_any_byte_written_resolves_immediately() {
        let (mut mux, _pushes) = new_mux();
        let mut req = Request::new(RequestConfig::default());
        req.add_command("PING", std::iter::empty::<&[u8]>());
        let (id, rx) = mux.submit(req);
        mux.cancel(id);
        let err = rx.try_recv().unwrap().unwrap_err();
        assert!(matches!(err, RespError::Caller(CallerError::ExecCancelled)));
    }

    #[test]
    fn reset_fails_cancel_on_connection_lost_entries_with_no_response_started() {
        let (mut mux, _pushes) = new_mux();
        let mut req = Request::new(RequestConfig {
            cancel_on_connection_lost: true,
            retry: true,
            ..RequestConfig::default()
        });
        req.add_command("PING", std::iter::empty::<&[u8]>());
        let (_id, rx) = mux.submit(req);
        let (id, chunk) = mux.next_write_chunk().unwrap();
        mux.on_written(id, chunk.len());

        let to_retry = mux.reset();
        assert!(to_retry.is_empty());
        let err = rx.try_recv().unwrap().unwrap_err();
        assert!(matches!(
            err,
            RespError::Connection(ConnectionError::ConnectionLost)
        ));
    }

    #[test]
    fn reset_fails_cancel_if_unresponded_entries_once_a_response_started() {
        let (mut mux, _pushes) = new_mux();
        let mut req = Request::new(RequestConfig {
            cancel_if_unresponded: true,
            retry: true,
            ..RequestConfig::default()
        });
        req.add_command("PING", std::iter::empty::<&[u8]>());
        let (_id, rx) = mux.submit(req);
        let (id, chunk) = mux.next_write_chunk().unwrap();
        mux.on_written(id, chunk.len());
        // One child of a two-element array has arrived, but not the
        // second, so the response has started without completing.
        mux.on_read_bytes(&Bytes::from_static(b"*2\r\n:1\r\n")).unwrap();

        let to_retry = mux.reset();
        assert!(to_retry.is_empty());
        let err = rx.try_recv().unwrap().unwrap_err();
        assert!(matches!(
            err,
            RespError::Connection(ConnectionError::Unresponded)
        ));
    }

    #[test]
    fn reset_requeues_retry_entries_that_have_no_cancel_flags_set() {
        let (mut mux, _pushes) = new_mux();
        let mut req = Request::new(RequestConfig::default());
        req.add_command("PING", std::iter::empty::<&[u8]>());
        let (id, _rx) = mux.submit(req);
        let (_, chunk) = mux.next_write_chunk().unwrap();
        mux.on_written(id, chunk.len());

        let to_retry = mux.reset();
        assert_eq!(to_retry.len(), 1);
    }
}
