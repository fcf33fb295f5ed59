// Copyright resp3-client contributors - SPDX-Identifier: Apache-2.0
//! Request assembly (spec.md §4.2): an append-only buffer of serialized
//! RESP3 command frames plus the bookkeeping the multiplexer needs to route
//! responses.

use bytes::{BufMut, Bytes, BytesMut};

/// Commands whose server reply is a confirmation push per channel argument,
/// rather than an ordinary top-level response (spec.md §4.3 "Push-response
/// accounting").
const SUBSCRIPTION_COMMANDS: [&str; 3] = ["SUBSCRIBE", "UNSUBSCRIBE", "PSUBSCRIBE"];

/// How a command's reply should be routed once it arrives on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// One ordinary top-level response.
    Response,
    /// `count` push frames, none of which count against the request's
    /// `expected_responses`.
    Subscription { channel_count: usize },
}

#[derive(Debug, Clone)]
pub struct CommandMeta {
    pub name: String,
    pub kind: ResponseKind,
}

/// Per-request behavior flags (spec.md §3 "Request").
#[derive(Debug, Clone, Copy)]
pub struct RequestConfig {
    /// Fail the request immediately if the connection is lost before any
    /// byte of its response has arrived.
    pub cancel_on_connection_lost: bool,
    /// Fail the request immediately rather than parking it if no connection
    /// is currently established.
    pub cancel_if_not_connected: bool,
    /// Fail the request if the connection is lost after some, but not all,
    /// of its response bytes have arrived.
    pub cancel_if_unresponded: bool,
    /// Re-send the request (from its first byte) on the next successful
    /// connection if it didn't complete on this one.
    pub retry: bool,
}

impl Default for RequestConfig {
    fn default() -> Self {
        RequestConfig {
            cancel_on_connection_lost: false,
            cancel_if_not_connected: false,
            cancel_if_unresponded: false,
            retry: true,
        }
    }
}

/// An owned, appendable buffer of fully-serialized RESP3 commands.
///
/// Mutation (`add_command`) is only valid before the request is handed to
/// the multiplexer; `into_parts` consumes the builder and is the only way
/// to get at its payload, which enforces that read-only-afterwards
/// invariant at the type level (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct Request {
    payload: BytesMut,
    commands: Vec<CommandMeta>,
    expected_responses: usize,
    config: RequestConfig,
}

impl Request {
    pub fn new(config: RequestConfig) -> Request {
        Request {
            payload: BytesMut::new(),
            commands: Vec::new(),
            expected_responses: 0,
            config,
        }
    }

    /// Appends one command, encoded as `*N\r\n` followed by `N` bulk
    /// strings. `name` is also sent as the command's first argument.
    pub fn add_command<A: AsRef<[u8]>>(&mut self, name: &str, args: impl IntoIterator<Item = A>) -> &mut Self {
        let args: Vec<A> = args.into_iter().collect();
        write_array_header(&mut self.payload, 1 + args.len());
        write_bulk_string(&mut self.payload, name.as_bytes());
        for arg in &args {
            write_bulk_string(&mut self.payload, arg.as_ref());
        }

        let upper = name.to_ascii_uppercase();
        let kind = if SUBSCRIPTION_COMMANDS.contains(&upper.as_str()) {
            ResponseKind::Subscription {
                channel_count: args.len(),
            }
        } else {
            self.expected_responses += 1;
            ResponseKind::Response
        };
        self.commands.push(CommandMeta { name: upper, kind });
        self
    }

    pub fn expected_responses(&self) -> usize {
        self.expected_responses
    }

    pub fn commands(&self) -> &[CommandMeta] {
        &self.commands
    }

    pub fn config(&self) -> RequestConfig {
        self.config
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Rebuilds a request from an already-encoded payload, used to
    /// re-submit a command pipeline after a reconnect without re-running
    /// the caller's original `add_command` calls.
    pub(crate) fn from_raw(payload: Bytes, config: RequestConfig, expected_responses: usize) -> Request {
        Request {
            payload: BytesMut::from(&payload[..]),
            commands: Vec::new(),
            expected_responses,
            config,
        }
    }

    /// Consumes the builder, returning its immutable wire payload alongside
    /// the routing metadata the multiplexer needs.
    pub(crate) fn into_parts(self) -> (Bytes, Vec<CommandMeta>, usize, RequestConfig) {
        (
            self.payload.freeze(),
            self.commands,
            self.expected_responses,
            self.config,
        )
    }
}

fn write_array_header(buf: &mut BytesMut, count: usize) {
    buf.put_u8(b'*');
    buf.put_slice(count.to_string().as_bytes());
    buf.put_slice(b"\r\n");
}

fn write_bulk_string(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u8(b'$');
    buf.put_slice(bytes.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(bytes);
    buf.put_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_command_round_trip_bytes() {
        let mut req = Request::new(RequestConfig::default());
        req.add_command("PING", std::iter::empty::<&[u8]>());
        let (payload, commands, expected, _config) = req.into_parts();
        assert_eq!(&payload[..], b"*1\r\n$4\r\nPING\r\n");
        assert_eq!(expected, 1);
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].name, "PING");
        assert!(matches!(commands[0].kind, ResponseKind::Response));
    }

    #[test]
    fn pipelined_commands_accumulate() {
        let mut req = Request::new(RequestConfig::default());
        req.add_command("SET", ["a", "1"].map(str::as_bytes));
        req.add_command("GET", ["a"].map(str::as_bytes));
        let (payload, _commands, expected, _config) = req.into_parts();
        assert_eq!(
            &payload[..],
            b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n*2\r\n$3\r\nGET\r\n$1\r\na\r\n"
        );
        assert_eq!(expected, 2);
    }

    #[test]
    fn subscribe_produces_zero_expected_responses_but_records_channel_count() {
        let mut req = Request::new(RequestConfig::default());
        req.add_command("SUBSCRIBE", ["x", "y"].map(str::as_bytes));
        let (_payload, commands, expected, _config) = req.into_parts();
        assert_eq!(expected, 0);
        assert_eq!(
            commands[0].kind,
            ResponseKind::Subscription { channel_count: 2 }
        );
    }
}
