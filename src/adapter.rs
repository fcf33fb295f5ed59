// Copyright resp3-client contributors - SPDX-Identifier: Apache-2.0
//! Response adapters (spec.md §9 "Design notes"): the multiplexer hands raw
//! [`Node`] events to whatever sink the caller registered for a request;
//! this module provides the default one, which assembles the node stream
//! back into an owned tree, the way `glide-core`'s `value_conversion`
//! module turns a `redis::Value` into richer caller-facing shapes, except
//! here the starting point is our own node stream rather than a
//! pre-assembled `redis::Value`.

use crate::errors::{ProtocolError, RespError, RespResult};
use crate::resp3::{DataType, Node};
use bytes::{Bytes, BytesMut};

/// An owned RESP3 value tree, reassembled from a node stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    SimpleString(Bytes),
    BlobString(Bytes),
    VerbatimString { format: Bytes, text: Bytes },
    SimpleError(Bytes),
    BlobError(Bytes),
    Number(i64),
    Double(f64),
    Boolean(bool),
    BigNumber(Bytes),
    Null,
    Array(Vec<Value>),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Attribute { attributes: Vec<(Value, Value)>, value: Box<Value> },
    Push(Vec<Value>),
}

impl Value {
    pub fn is_error(&self) -> bool {
        matches!(self, Value::SimpleError(_) | Value::BlobError(_))
    }
}

/// Receives the node events that make up exactly one top-level response (or
/// one push frame) and hands back an assembled [`Value`].
///
/// Implementations that only care about a subset of shapes (e.g. "just give
/// me the bulk string") can reject anything else via
/// [`ProtocolError::NestedAggregateNotSupported`] or
/// [`ProtocolError::ExpectsResp3SimpleType`] instead of paying for full tree
/// assembly; `NodeCollector` below is the general-purpose default.
pub trait ResponseAdapter: Send {
    fn on_node(&mut self, node: Node) -> RespResult<()>;

    /// Called once the node stream for this response is complete. Returns
    /// the assembled value.
    fn finish(self: Box<Self>) -> RespResult<Value>;
}

/// Pending partially-built aggregate: the values collected so far plus how
/// many more direct children (doubled for map/attribute pairs) are still
/// expected, or `None` if streamed and awaiting its terminator.
///
/// A streamed blob string (`node.data_type == BlobString` with a negative
/// `aggregate_size`) is represented the same way even though `BlobString`
/// isn't itself an aggregate type: its header pushes a `Pending` here too,
/// and its `StreamedStringPart` children accumulate as ordinary children
/// which `assemble` concatenates back into one `Value::BlobString` instead
/// of wrapping them in an array. `depth` records the header's own depth so
/// a streamed (open-ended) entry can be closed once a sibling or ancestor
/// node arrives, since unlike fixed-size aggregates it never reaches
/// `remaining == 0` on its own (spec.md §8 scenario 5).
struct Pending {
    data_type: DataType,
    remaining: Option<usize>,
    children: Vec<Value>,
    depth: usize,
}

/// Default [`ResponseAdapter`]: reassembles the full node stream into a
/// [`Value`] tree regardless of shape, mirroring the generic conversion
/// path `glide-core::client::value_conversion` falls back to when no
/// command-specific expected type narrows the output.
#[derive(Default)]
pub struct NodeCollector {
    stack: Vec<Pending>,
    root: Option<Value>,
}

impl NodeCollector {
    pub fn new() -> NodeCollector {
        NodeCollector::default()
    }

    fn push_value(&mut self, value: Value) {
        match self.stack.last_mut() {
            Some(pending) => {
                pending.children.push(value);
                if let Some(remaining) = pending.remaining.as_mut() {
                    *remaining -= 1;
                    if *remaining == 0 {
                        self.pop_complete();
                    }
                }
            }
            None => self.root = Some(value),
        }
    }

    fn pop_complete(&mut self) {
        let Pending {
            data_type,
            children,
            ..
        } = self.stack.pop().expect("pop_complete called with empty stack");
        let value = assemble(data_type, children);
        self.push_value(value);
    }

    /// Closes any streamed (open-ended) entries sitting at or above
    /// `incoming_depth`. A fixed-size aggregate closes itself the moment its
    /// last child arrives (`push_value` above), but a streamed aggregate or
    /// streamed blob string has no declared child count, so the only signal
    /// that it's done is the arrival of a node that is no longer one of its
    /// children — i.e. one at its own depth or shallower.
    fn close_streamed_ancestors(&mut self, incoming_depth: usize) {
        while let Some(top) = self.stack.last() {
            if top.remaining.is_none() && top.depth >= incoming_depth {
                self.pop_complete();
            } else {
                break;
            }
        }
    }
}

fn assemble(data_type: DataType, children: Vec<Value>) -> Value {
    match data_type {
        DataType::Array => Value::Array(children),
        DataType::Set => Value::Set(children),
        DataType::Push => Value::Push(children),
        DataType::Map => Value::Map(into_pairs(children)),
        DataType::BlobString => Value::BlobString(concat_blob_parts(children)),
        DataType::Attribute => {
            // An attribute's own pairs precede the value it decorates; the
            // collector treats the decorated value as the aggregate's last
            // child, appended by the caller before popping. Here we've only
            // collected the leading pairs (`finish_attribute` is handled by
            // the multiplexer layering a value after this node completes),
            // so an attribute with no trailing value collapses to an empty
            // map-shaped value; real attribute decoration is assembled by
            // whichever caller pairs this node with the next sibling.
            Value::Attribute {
                attributes: into_pairs(children),
                value: Box::new(Value::Null),
            }
        }
        _ => unreachable!("assemble called with a non-aggregate data type"),
    }
}

fn into_pairs(flat: Vec<Value>) -> Vec<(Value, Value)> {
    let mut pairs = Vec::with_capacity(flat.len() / 2);
    let mut iter = flat.into_iter();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        pairs.push((k, v));
    }
    pairs
}

impl ResponseAdapter for NodeCollector {
    fn on_node(&mut self, node: Node) -> RespResult<()> {
        self.close_streamed_ancestors(node.depth);

        let is_streamed_header = node.data_type == DataType::BlobString && node.is_streamed();
        if node.data_type.is_aggregate() || is_streamed_header {
            let remaining = node.child_count();
            if remaining == Some(0) {
                self.push_value(assemble(node.data_type, Vec::new()));
            } else {
                self.stack.push(Pending {
                    data_type: node.data_type,
                    remaining,
                    children: Vec::new(),
                    depth: node.depth,
                });
            }
            return Ok(());
        }

        let value = match node.data_type {
            DataType::SimpleString => Value::SimpleString(node.value),
            DataType::BlobString | DataType::StreamedStringPart => Value::BlobString(node.value),
            DataType::VerbatimString => split_verbatim(node.value)?,
            DataType::SimpleError => Value::SimpleError(node.value),
            DataType::BlobError => Value::BlobError(node.value),
            DataType::Number => Value::Number(parse_i64(&node.value)?),
            DataType::Double => Value::Double(parse_f64(&node.value)?),
            DataType::Boolean => Value::Boolean(node.value.first() == Some(&b't')),
            DataType::BigNumber => Value::BigNumber(node.value),
            DataType::Null => Value::Null,
            _ => unreachable!("non-leaf, non-aggregate data type"),
        };
        self.push_value(value);
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> RespResult<Value> {
        self.close_streamed_ancestors(0);
        if !self.stack.is_empty() {
            return Err(RespError::Protocol(ProtocolError::IncompatibleSize));
        }
        self.root.ok_or(RespError::Protocol(ProtocolError::EmptyField))
    }
}

fn concat_blob_parts(children: Vec<Value>) -> Bytes {
    let mut buf = BytesMut::new();
    for child in children {
        if let Value::BlobString(chunk) = child {
            buf.extend_from_slice(&chunk);
        }
    }
    buf.freeze()
}

fn split_verbatim(raw: Bytes) -> RespResult<Value> {
    if raw.len() < 4 || raw[3] != b':' {
        return Err(RespError::Protocol(ProtocolError::IncompatibleSize));
    }
    Ok(Value::VerbatimString {
        format: raw.slice(0..3),
        text: raw.slice(4..),
    })
}

fn parse_i64(raw: &Bytes) -> RespResult<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(RespError::Protocol(ProtocolError::IncompatibleSize))
}

fn parse_f64(raw: &Bytes) -> RespResult<f64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(RespError::Protocol(ProtocolError::IncompatibleSize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp3::{Parser, ParserEvent};

    fn collect(wire: &[u8]) -> Value {
        let mut parser = Parser::new(8);
        let mut collector = Box::new(NodeCollector::new());
        let buf = Bytes::copy_from_slice(wire);
        parser
            .feed(&buf, &mut |event| {
                if let ParserEvent::Node(node) = event {
                    collector.on_node(node).unwrap();
                }
            })
            .unwrap();
        collector.finish().unwrap()
    }

    #[test]
    fn assembles_flat_array() {
        let value = collect(b"*2\r\n:1\r\n:2\r\n");
        assert_eq!(value, Value::Array(vec![Value::Number(1), Value::Number(2)]));
    }

    #[test]
    fn assembles_map_as_pairs() {
        let value = collect(b"%1\r\n+k\r\n:9\r\n");
        assert_eq!(
            value,
            Value::Map(vec![(Value::SimpleString(Bytes::from_static(b"k")), Value::Number(9))])
        );
    }

    #[test]
    fn assembles_nested_array() {
        let value = collect(b"*1\r\n*2\r\n:1\r\n:2\r\n");
        assert_eq!(
            value,
            Value::Array(vec![Value::Array(vec![Value::Number(1), Value::Number(2)])])
        );
    }

    #[test]
    fn streamed_blob_string_parts_concatenate() {
        let value = collect(b"$?\r\n;4\r\nHell\r\n;1\r\no\r\n;0\r\n");
        assert_eq!(value, Value::BlobString(Bytes::from_static(b"Hello")));
    }

    #[test]
    fn streamed_array_of_streamed_strings_closes_on_depth() {
        let value = collect(b"*2\r\n$?\r\n;2\r\nHi\r\n;0\r\n$?\r\n;2\r\nOk\r\n;0\r\n");
        assert_eq!(
            value,
            Value::Array(vec![
                Value::BlobString(Bytes::from_static(b"Hi")),
                Value::BlobString(Bytes::from_static(b"Ok")),
            ])
        );
    }
}
