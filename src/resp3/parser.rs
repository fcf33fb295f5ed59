// Copyright resp3-client contributors - SPDX-Identifier: Apache-2.0
use super::{DataType, Node};
use bytes::Bytes;

/// Parser failures. All are terminal for the current stream; on any of
/// these the caller must tear down the connection (spec.md §4.1, §7).
#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq)]
pub enum ParserError {
    #[error("unrecognized RESP3 type prefix")]
    InvalidType,
    #[error("expected an ASCII integer payload")]
    NotANumber,
    #[error("boolean payload was neither `t` nor `f`")]
    UnexpectedBoolValue,
    #[error("nesting depth exceeds the configured maximum")]
    ExceedsMaxNestedDepth,
    #[error("length-prefixed payload framing did not match its declared size")]
    UnexpectedReadSize,
}

/// One event the parser hands to its sink while draining a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserEvent {
    Node(Node),
    /// The aggregate-frame stack just emptied: one top-level RESP3 response
    /// has been fully parsed.
    EndOfResponse,
}

struct Frame {
    /// Remaining (undelivered) children. Meaningless for streamed frames.
    remaining: usize,
    is_streamed: bool,
}

/// Incremental, resumable RESP3 decoder.
///
/// A single `Parser` is meant to live for the duration of one connection
/// (or be reset on reconnect, per spec.md §3 "Lifecycles"); its only
/// persistent state across `feed` calls is the pending-aggregate stack,
/// which is exactly what makes it resumable across chunk boundaries
/// (spec.md §8 invariant 1).
pub struct Parser {
    stack: Vec<Frame>,
    max_nested_depth: usize,
}

enum Count {
    Streamed,
    Fixed(i64),
}

fn find_crlf(buf: &[u8], start: usize) -> Option<usize> {
    let mut i = start;
    while i + 1 < buf.len() {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn parse_count(token: &[u8]) -> Result<Count, ParserError> {
    if token == b"?" {
        return Ok(Count::Streamed);
    }
    parse_ascii_i64(token).map(Count::Fixed)
}

fn parse_ascii_i64(token: &[u8]) -> Result<i64, ParserError> {
    let text = std::str::from_utf8(token).map_err(|_| ParserError::NotANumber)?;
    text.parse::<i64>().map_err(|_| ParserError::NotANumber)
}

impl Parser {
    pub fn new(max_nested_depth: usize) -> Parser {
        Parser {
            stack: Vec::new(),
            max_nested_depth,
        }
    }

    /// Resets all resumption state. Called by the runner on every
    /// (re)connect (spec.md §3 "Lifecycles").
    pub fn reset(&mut self) {
        self.stack.clear();
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Feeds `buf` to the parser, invoking `sink` once per node (pre-order)
    /// plus once per completed top-level response. Returns the number of
    /// leading bytes of `buf` that were consumed; the caller must re-present
    /// `buf[consumed..]` together with any newly-read bytes on the next
    /// call (spec.md §4.1 "Contract").
    pub fn feed(
        &mut self,
        buf: &Bytes,
        sink: &mut dyn FnMut(ParserEvent),
    ) -> Result<usize, ParserError> {
        let mut pos = 0usize;
        loop {
            match self.parse_one(buf, pos, sink)? {
                Some(next_pos) => pos = next_pos,
                None => return Ok(pos),
            }
        }
    }

    /// Attempts to parse exactly one node starting at `pos`. Returns
    /// `Ok(Some(new_pos))` on success, `Ok(None)` if the buffer doesn't yet
    /// hold a complete node (and `pos` should be retried unchanged next
    /// call), or `Err` on a malformed stream.
    fn parse_one(
        &mut self,
        buf: &Bytes,
        pos: usize,
        sink: &mut dyn FnMut(ParserEvent),
    ) -> Result<Option<usize>, ParserError> {
        if pos >= buf.len() {
            return Ok(None);
        }
        let depth = self.stack.len();
        if depth > self.max_nested_depth {
            return Err(ParserError::ExceedsMaxNestedDepth);
        }
        let data_type = DataType::from_prefix(buf[pos]);
        if matches!(data_type, DataType::Invalid) {
            return Err(ParserError::InvalidType);
        }

        if data_type.is_aggregate() || data_type == DataType::BlobString {
            self.parse_aggregate_or_blob_header(buf, pos, depth, data_type, sink)
        } else if data_type.is_inline() {
            self.parse_inline_leaf(buf, pos, depth, data_type, sink)
        } else {
            self.parse_length_prefixed_leaf(buf, pos, depth, data_type, sink)
        }
    }

    fn parse_aggregate_or_blob_header(
        &mut self,
        buf: &Bytes,
        pos: usize,
        depth: usize,
        data_type: DataType,
        sink: &mut dyn FnMut(ParserEvent),
    ) -> Result<Option<usize>, ParserError> {
        let Some(crlf) = find_crlf(buf, pos + 1) else {
            return Ok(None);
        };
        let count = parse_count(&buf[pos + 1..crlf])?;
        let next_pos = crlf + 2;

        match (data_type, count) {
            (DataType::BlobString, Count::Fixed(-1)) => {
                // Legacy `$-1\r\n` null.
                sink(ParserEvent::Node(Node::leaf(DataType::Null, depth, Bytes::new())));
                self.complete_child(sink);
                Ok(Some(next_pos))
            }
            (DataType::BlobString, Count::Fixed(len)) if len >= 0 => {
                self.parse_length_prefixed_payload(buf, next_pos, depth, DataType::BlobString, len as usize, sink)
            }
            (DataType::BlobString, Count::Fixed(_)) => Err(ParserError::NotANumber),
            (_, Count::Streamed) => {
                sink(ParserEvent::Node(Node::aggregate(data_type, depth, -1)));
                self.stack.push(Frame {
                    remaining: 0,
                    is_streamed: true,
                });
                Ok(Some(next_pos))
            }
            (_, Count::Fixed(count)) => {
                if count < 0 {
                    return Err(ParserError::NotANumber);
                }
                let child_count = if data_type.is_pair_aggregate() {
                    (count as usize) * 2
                } else {
                    count as usize
                };
                sink(ParserEvent::Node(Node::aggregate(data_type, depth, count)));
                if child_count == 0 {
                    self.complete_child(sink);
                } else {
                    self.stack.push(Frame {
                        remaining: child_count,
                        is_streamed: false,
                    });
                }
                Ok(Some(next_pos))
            }
        }
    }

    fn parse_inline_leaf(
        &mut self,
        buf: &Bytes,
        pos: usize,
        depth: usize,
        data_type: DataType,
        sink: &mut dyn FnMut(ParserEvent),
    ) -> Result<Option<usize>, ParserError> {
        let Some(crlf) = find_crlf(buf, pos + 1) else {
            return Ok(None);
        };
        let payload = &buf[pos + 1..crlf];
        match data_type {
            // `big_number` payloads may exceed i64 range, so both are
            // validated the same lenient way (optional sign, all digits)
            // rather than requiring they fit an i64.
            DataType::Number | DataType::BigNumber => validate_integer_text(payload)?,
            DataType::Double => {
                std::str::from_utf8(payload)
                    .ok()
                    .and_then(|s| s.parse::<f64>().ok())
                    .ok_or(ParserError::NotANumber)?;
            }
            DataType::Boolean => {
                if payload != b"t" && payload != b"f" {
                    return Err(ParserError::UnexpectedBoolValue);
                }
            }
            DataType::SimpleString | DataType::SimpleError | DataType::Null => {}
            _ => unreachable!("not an inline leaf type"),
        }
        let value = buf.slice(pos + 1..crlf);
        sink(ParserEvent::Node(Node::leaf(data_type, depth, value)));
        self.complete_child(sink);
        Ok(Some(crlf + 2))
    }

    fn parse_length_prefixed_leaf(
        &mut self,
        buf: &Bytes,
        pos: usize,
        depth: usize,
        data_type: DataType,
        sink: &mut dyn FnMut(ParserEvent),
    ) -> Result<Option<usize>, ParserError> {
        let Some(crlf) = find_crlf(buf, pos + 1) else {
            return Ok(None);
        };
        let len = parse_ascii_i64(&buf[pos + 1..crlf])?;
        if len < 0 {
            return Err(ParserError::NotANumber);
        }
        let in_streamed_context = self.stack.last().is_some_and(|f| f.is_streamed);
        if data_type == DataType::StreamedStringPart && len == 0 && in_streamed_context {
            // Terminator: consumed silently, never handed to the sink.
            self.stack.pop();
            self.complete_child(sink);
            return Ok(Some(crlf + 2));
        }
        self.parse_length_prefixed_payload(buf, crlf + 2, depth, data_type, len as usize, sink)
    }

    fn parse_length_prefixed_payload(
        &mut self,
        buf: &Bytes,
        payload_start: usize,
        depth: usize,
        data_type: DataType,
        len: usize,
        sink: &mut dyn FnMut(ParserEvent),
    ) -> Result<Option<usize>, ParserError> {
        let payload_end = payload_start + len;
        if payload_end + 2 > buf.len() {
            return Ok(None);
        }
        if buf[payload_end] != b'\r' || buf[payload_end + 1] != b'\n' {
            return Err(ParserError::UnexpectedReadSize);
        }
        let value = buf.slice(payload_start..payload_end);
        let in_streamed_context = self.stack.last().is_some_and(|f| f.is_streamed);
        sink(ParserEvent::Node(Node::leaf(data_type, depth, value)));
        if !(data_type == DataType::StreamedStringPart && in_streamed_context) {
            self.complete_child(sink);
        }
        Ok(Some(payload_end + 2))
    }

    /// Called after a node that completes one child slot of its parent (or
    /// completes a whole top-level response if there is no parent).
    /// Cascades through any ancestor aggregates that become complete as a
    /// result, per spec.md §4.1 "pop any aggregate frames whose
    /// remaining_children reaches 0".
    fn complete_child(&mut self, sink: &mut dyn FnMut(ParserEvent)) {
        loop {
            match self.stack.last_mut() {
                None => {
                    sink(ParserEvent::EndOfResponse);
                    return;
                }
                Some(frame) => {
                    if frame.is_streamed {
                        return;
                    }
                    frame.remaining -= 1;
                    if frame.remaining == 0 {
                        self.stack.pop();
                        continue;
                    }
                    return;
                }
            }
        }
    }
}

fn validate_integer_text(payload: &[u8]) -> Result<(), ParserError> {
    let mut iter = payload.iter();
    match iter.clone().next() {
        Some(b'-') => {
            iter.next();
        }
        _ => {}
    }
    let rest: &[u8] = iter.as_slice();
    if rest.is_empty() || !rest.iter().all(u8::is_ascii_digit) {
        return Err(ParserError::NotANumber);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(wire: &[u8], max_depth: usize) -> Vec<ParserEvent> {
        let mut parser = Parser::new(max_depth);
        let mut events = Vec::new();
        let buf = Bytes::copy_from_slice(wire);
        let consumed = parser.feed(&buf, &mut |e| events.push(e)).unwrap();
        assert_eq!(consumed, wire.len(), "a well-formed frame must be fully consumed");
        events
    }

    #[test]
    fn simple_string_is_one_leaf_plus_end_of_response() {
        let events = nodes(b"+OK\r\n", 8);
        assert_eq!(
            events,
            vec![
                ParserEvent::Node(Node::leaf(DataType::SimpleString, 0, Bytes::from_static(b"OK"))),
                ParserEvent::EndOfResponse,
            ]
        );
    }

    #[test]
    fn legacy_null_blob_string_becomes_a_null_leaf() {
        let events = nodes(b"$-1\r\n", 8);
        assert_eq!(
            events,
            vec![
                ParserEvent::Node(Node::leaf(DataType::Null, 0, Bytes::new())),
                ParserEvent::EndOfResponse,
            ]
        );
    }

    #[test]
    fn nested_array_emits_pre_order_with_correct_depths() {
        let events = nodes(b"*1\r\n*2\r\n:1\r\n:2\r\n", 8);
        let depths: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                ParserEvent::Node(n) => Some(n.depth),
                ParserEvent::EndOfResponse => None,
            })
            .collect();
        assert_eq!(depths, vec![0, 1, 2, 2]);
    }

    #[test]
    fn map_child_count_is_doubled_pair_count() {
        let events = nodes(b"%2\r\n+a\r\n:1\r\n+b\r\n:2\r\n", 8);
        let ParserEvent::Node(map_node) = &events[0] else {
            panic!("expected a node");
        };
        assert_eq!(map_node.child_count(), Some(4));
    }

    #[test]
    fn streamed_aggregate_ends_on_zero_length_terminator() {
        let events = nodes(b"*?\r\n:1\r\n:2\r\n;0\r\n", 8);
        assert_eq!(events.last(), Some(&ParserEvent::EndOfResponse));
        let ParserEvent::Node(head) = &events[0] else {
            panic!("expected a node");
        };
        assert!(head.is_streamed());
    }

    #[test]
    fn streamed_blob_string_parts_concatenate_until_empty_part() {
        let events = nodes(b"$?\r\n;3\r\nfoo\r\n;0\r\n", 8);
        let parts: Vec<&Bytes> = events
            .iter()
            .filter_map(|e| match e {
                ParserEvent::Node(n) if n.data_type == DataType::StreamedStringPart => Some(&n.value),
                _ => None,
            })
            .collect();
        assert_eq!(parts, vec![&Bytes::from_static(b"foo")]);
        assert_eq!(events.last(), Some(&ParserEvent::EndOfResponse));
    }

    #[test]
    fn exceeding_max_nested_depth_is_an_error() {
        let mut parser = Parser::new(1);
        let buf = Bytes::from_static(b"*1\r\n*1\r\n:1\r\n");
        let err = parser.feed(&buf, &mut |_| {}).unwrap_err();
        assert_eq!(err, ParserError::ExceedsMaxNestedDepth);
    }

    #[test]
    fn invalid_prefix_byte_is_rejected() {
        let mut parser = Parser::new(8);
        let buf = Bytes::from_static(b"@nope\r\n");
        let err = parser.feed(&buf, &mut |_| {}).unwrap_err();
        assert_eq!(err, ParserError::InvalidType);
    }

    #[test]
    fn boolean_requires_t_or_f() {
        let mut parser = Parser::new(8);
        let buf = Bytes::from_static(b"#x\r\n");
        let err = parser.feed(&buf, &mut |_| {}).unwrap_err();
        assert_eq!(err, ParserError::UnexpectedBoolValue);
    }

    #[test]
    fn incomplete_frame_consumes_nothing_and_is_resumable() {
        let mut parser = Parser::new(8);
        let mut events = Vec::new();
        let partial = Bytes::from_static(b"*2\r\n$3\r\nfoo");
        let consumed = parser.feed(&partial, &mut |e| events.push(e)).unwrap();
        assert_eq!(consumed, 0);
        assert!(events.is_empty());

        // Depth is already at 1 (inside the array) even though nothing was
        // delivered yet — resumption state is the aggregate stack alone.
        assert_eq!(parser.depth(), 1);

        let mut full = partial[..consumed].to_vec();
        full.extend_from_slice(&partial[consumed..]);
        full.extend_from_slice(b"\r\n:9\r\n");
        let full = Bytes::from(full);
        let consumed2 = parser.feed(&full, &mut |e| events.push(e)).unwrap();
        assert_eq!(consumed2, full.len());
        assert_eq!(events.len(), 3); // "foo" leaf, number leaf, end of response
        assert_eq!(parser.depth(), 0);
    }

    #[test]
    fn split_across_many_single_byte_chunks_reassembles_correctly() {
        let whole = b"*2\r\n$3\r\nfoo\r\n:9\r\n";
        let mut parser = Parser::new(8);
        let mut pending = BytesMutLike::new();
        let mut events = Vec::new();
        for &byte in whole {
            pending.push(byte);
            let buf = Bytes::copy_from_slice(&pending.0);
            let consumed = parser.feed(&buf, &mut |e| events.push(e)).unwrap();
            pending.0.drain(0..consumed);
        }
        assert_eq!(pending.0.len(), 0);
        assert_eq!(events.len(), 3);
        assert_eq!(parser.depth(), 0);
    }

    /// Minimal growable byte buffer so the byte-at-a-time test above doesn't
    /// need a `bytes::BytesMut` dependency wired through just for a `Vec`-like push.
    struct BytesMutLike(Vec<u8>);
    impl BytesMutLike {
        fn new() -> Self {
            BytesMutLike(Vec::new())
        }
        fn push(&mut self, byte: u8) {
            self.0.push(byte);
        }
    }

    #[test]
    fn reset_clears_resumption_state() {
        let mut parser = Parser::new(8);
        let partial = Bytes::from_static(b"*2\r\n:1\r\n");
        parser.feed(&partial, &mut |_| {}).unwrap();
        assert_eq!(parser.depth(), 1);
        parser.reset();
        assert_eq!(parser.depth(), 0);
    }
}
