// Copyright resp3-client contributors - SPDX-Identifier: Apache-2.0
//! Multiplexed RESP3 client core.
//!
//! This crate implements three tightly-coupled pieces of a Redis/Valkey
//! client: an incremental [`resp3`] parser, a [`multiplexer`] that
//! pipelines requests over one connection, and a [`connection`] runner
//! that drives the socket lifecycle (resolve, connect, handshake, health
//! checks, reconnect with backoff). It does not implement cluster
//! topology, sharding, sentinel election, or any particular command set —
//! those are layered on top by a caller.

pub mod adapter;
pub mod config;
pub mod connection;
pub mod errors;
pub mod multiplexer;
pub mod request;
pub mod resp3;
pub mod retry;
pub(crate) mod runner;
pub mod usage;

pub use adapter::Value;
pub use config::Config;
pub use connection::Connection;
pub use errors::{RespError, RespResult};
pub use multiplexer::ExecId;
pub use request::{Request, RequestConfig};
