// Copyright resp3-client contributors - SPDX-Identifier: Apache-2.0
use crate::adapter::{NodeCollector, ResponseAdapter, Value};
use crate::errors::{CallerError, RespError, RespResult};
use crate::request::RequestConfig;
use bytes::Bytes;
use tokio::sync::oneshot;

/// Where a submitted request currently stands in the pipeline (spec.md §3
/// "Exec entry").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// No byte of the payload has reached the writer yet.
    Pending,
    /// Some, but not all, of the payload has been handed to `on_written`.
    Writing,
    /// The full payload has been written; waiting on `expected_responses`
    /// more top-level responses.
    AwaitingResponse,
    /// Soft-cancelled: still occupies its queue slot (so response framing
    /// stays aligned) but its result will resolve to an error and any
    /// parsed values are discarded.
    Cancelled,
}

/// One submitted request as tracked by the multiplexer: its unsent payload
/// tail, how many more top-level responses it is owed, and the channel its
/// eventual result is delivered on (spec.md §3, §4.3).
pub struct ExecEntry {
    pub(super) payload: Bytes,
    pub(super) offset: usize,
    pub(super) config: RequestConfig,
    pub(super) commands_total: usize,
    pub(super) expected_responses: usize,
    pub(super) responses_received: usize,
    pub(super) responses: Vec<Value>,
    pub(super) current_adapter: Option<Box<dyn ResponseAdapter>>,
    pub(super) result_tx: Option<oneshot::Sender<RespResult<Vec<Value>>>>,
    pub(super) status: ExecStatus,
}

impl ExecEntry {
    pub(super) fn new(
        payload: Bytes,
        config: RequestConfig,
        commands_total: usize,
        expected_responses: usize,
        result_tx: oneshot::Sender<RespResult<Vec<Value>>>,
    ) -> ExecEntry {
        let status = if payload.is_empty() {
            ExecStatus::AwaitingResponse
        } else {
            ExecStatus::Pending
        };
        ExecEntry {
            payload,
            offset: 0,
            config,
            commands_total,
            expected_responses,
            responses_received: 0,
            responses: Vec::new(),
            current_adapter: None,
            result_tx: Some(result_tx),
            status,
        }
    }

    pub fn status(&self) -> ExecStatus {
        self.status
    }

    pub(super) fn unwritten(&self) -> &[u8] {
        &self.payload[self.offset..]
    }

    pub(super) fn has_unwritten(&self) -> bool {
        self.offset < self.payload.len()
    }

    pub(super) fn is_complete(&self) -> bool {
        self.status != ExecStatus::Pending
            && self.status != ExecStatus::Writing
            && self.responses_received >= self.expected_responses
    }

    /// Whether a response to this entry has already started arriving: some
    /// prior top-level response was fully parsed, or the current one is
    /// mid-assembly. Used to decide between `connection_lost` and
    /// `unresponded` on disconnect (spec.md §4.4).
    pub(super) fn response_started(&self) -> bool {
        self.responses_received > 0 || self.current_adapter.is_some()
    }

    pub(super) fn adapter_or_new(&mut self) -> &mut Box<dyn ResponseAdapter> {
        self.current_adapter
            .get_or_insert_with(|| Box::new(NodeCollector::new()))
    }

    /// Finalizes the adapter for the response currently being assembled and
    /// records its value (or records the cancellation-poisoned placeholder
    /// if this entry was soft-cancelled mid-flight).
    pub(super) fn complete_one_response(&mut self) -> RespResult<()> {
        let adapter = self
            .current_adapter
            .take()
            .unwrap_or_else(|| Box::new(NodeCollector::new()));
        let value = adapter.finish()?;
        self.responses_received += 1;
        if self.status != ExecStatus::Cancelled {
            self.responses.push(value);
        }
        Ok(())
    }

    /// Resolves this entry's result channel. Safe to call at most once;
    /// subsequent calls are no-ops since `result_tx` is taken.
    pub(super) fn resolve(&mut self, result: RespResult<Vec<Value>>) {
        if let Some(tx) = self.result_tx.take() {
            let _ = tx.send(result);
        }
    }

    pub(super) fn resolve_ok(&mut self) {
        let responses = std::mem::take(&mut self.responses);
        self.resolve(Ok(responses));
    }

    pub(super) fn resolve_cancelled(&mut self, after_sent: bool) {
        let err = if after_sent {
            CallerError::CancelledAfterSent
        } else {
            CallerError::ExecCancelled
        };
        self.resolve(Err(RespError::Caller(err)));
    }

    pub(super) fn resolve_error(&mut self, err: RespError) {
        self.resolve(Err(err));
    }
}
