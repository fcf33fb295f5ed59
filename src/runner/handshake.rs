// Copyright resp3-client contributors - SPDX-Identifier: Apache-2.0
//! The HELLO handshake (spec.md §4.6 "handshake"): issued once per
//! connection, before the ready loop starts handing out the connection to
//! callers. Grounded on `glide-core::client::mod`'s connection setup
//! sequence (HELLO, then optional SELECT/CLIENT SETNAME), re-expressed
//! directly over our own parser instead of delegating to the `redis` crate.

use crate::adapter::{NodeCollector, ResponseAdapter, Value};
use crate::config::Config;
use crate::errors::{ConnectionError, RespError, RespResult, TransportTimeout};
use crate::request::{Request, RequestConfig};
use crate::resp3::{Parser, ParserEvent};
use crate::runner::transport::Transport;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

/// Writes `payload` fully, then reads until exactly one top-level response
/// has been parsed, returning its assembled value. Used only for the
/// handshake and the health-check PING, both of which happen before (or
/// between) the multiplexer's own ready-loop framing takes over.
pub(crate) async fn send_and_await(
    stream: &mut Box<dyn Transport>,
    parser: &mut Parser,
    payload: Bytes,
    read_deadline: std::time::Duration,
    timeout_kind: TransportTimeout,
) -> RespResult<Value> {
    let mut written = 0;
    while written < payload.len() {
        written += stream.write(&payload[written..]).await?;
    }
    stream.flush().await?;

    let mut collector: Box<dyn ResponseAdapter> = Box::new(NodeCollector::new());
    let mut buf = BytesMut::with_capacity(4096);
    let mut carry = Bytes::new();
    loop {
        let mut chunk = [0u8; 4096];
        let n = timeout(read_deadline, stream.read(&mut chunk))
            .await
            .map_err(|_| RespError::Transport {
                kind: timeout_kind,
                duration: read_deadline,
            })??;
        if n == 0 {
            return Err(RespError::Connection(ConnectionError::ConnectionLost));
        }
        buf.clear();
        buf.extend_from_slice(&carry);
        buf.extend_from_slice(&chunk[..n]);
        let frame = buf.split().freeze();

        let mut done = false;
        let mut last_err = None;
        let consumed = parser.feed(&frame, &mut |event| match event {
            ParserEvent::Node(node) => {
                if let Err(err) = collector.on_node(node) {
                    last_err = Some(err);
                }
            }
            ParserEvent::EndOfResponse => done = true,
        })?;
        if let Some(err) = last_err {
            return Err(err);
        }
        carry = frame.slice(consumed..);
        if done {
            return collector.finish();
        }
    }
}

/// Builds and runs the RESP3 handshake: `HELLO 3` (with inline `AUTH` if
/// credentials were configured), then `SELECT` and `CLIENT SETNAME` as
/// needed. Returns the leftover unconsumed bytes the ready-loop's own
/// parser feed should be seeded with (always empty here in practice, but
/// kept explicit since nothing guarantees the server won't pipeline its
/// first push right after the handshake reply).
pub(crate) async fn perform(stream: &mut Box<dyn Transport>, config: &Config) -> RespResult<()> {
    let mut parser = Parser::new(config.max_nested_depth);

    let mut hello_args: Vec<Vec<u8>> = vec![b"3".to_vec()];
    if let Some(auth) = &config.authentication {
        if auth.password.is_some() || auth.username.is_some() {
            hello_args.push(b"AUTH".to_vec());
            hello_args.push(auth.username.clone().unwrap_or_else(|| "default".to_string()).into_bytes());
            hello_args.push(auth.password.clone().unwrap_or_default().into_bytes());
        }
    }
    let hello = encode_command("HELLO", &hello_args);
    let reply = send_and_await(stream, &mut parser, hello, config.hello_timeout, TransportTimeout::Hello).await?;
    if reply.is_error() {
        return Err(RespError::Connection(ConnectionError::HelloFailed(format!("{reply:?}"))));
    }

    if config.database_index != 0 {
        let select = encode_command("SELECT", &[config.database_index.to_string().into_bytes()]);
        let reply = send_and_await(stream, &mut parser, select, config.hello_timeout, TransportTimeout::Hello).await?;
        if reply.is_error() {
            return Err(RespError::Connection(ConnectionError::HelloFailed(format!("{reply:?}"))));
        }
    }

    if let Some(name) = &config.client_name {
        let setname = encode_command("CLIENT", &[b"SETNAME".to_vec(), name.clone().into_bytes()]);
        let reply = send_and_await(stream, &mut parser, setname, config.hello_timeout, TransportTimeout::Hello).await?;
        if reply.is_error() {
            return Err(RespError::Connection(ConnectionError::HelloFailed(format!("{reply:?}"))));
        }
    }

    Ok(())
}

fn encode_command(name: &str, args: &[Vec<u8>]) -> Bytes {
    let mut request = Request::new(RequestConfig::default());
    request.add_command(name, args.iter().map(|a| a.as_slice()));
    let (payload, _commands, _expected, _config) = request.into_parts();
    payload
}
