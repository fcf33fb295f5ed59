// Copyright resp3-client contributors - SPDX-Identifier: Apache-2.0
//! Per-connection usage counters (spec.md §6), grounded directly on
//! Boost.Redis's `usage` struct — this crate's closest upstream relative
//! for this exact data shape, since `glide-core` has no equivalent.

/// Snapshot of one connection's lifetime traffic counters. Counted the way
/// the source notes: `commands_sent`/`bytes_sent` are incremented just
/// before the bytes reach the socket, so on a write error they may not
/// exactly reflect what the server actually received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub commands_sent: u64,
    pub bytes_sent: u64,
    pub responses_received: u64,
    pub pushes_received: u64,
    pub response_bytes_received: u64,
    pub push_bytes_received: u64,
}

impl Usage {
    pub fn record_write(&mut self, commands: u64, bytes: u64) {
        self.commands_sent += commands;
        self.bytes_sent += bytes;
    }

    pub fn record_response(&mut self, bytes: u64) {
        self.responses_received += 1;
        self.response_bytes_received += bytes;
    }

    pub fn record_push(&mut self, bytes: u64) {
        self.pushes_received += 1;
        self.push_bytes_received += bytes;
    }
}
