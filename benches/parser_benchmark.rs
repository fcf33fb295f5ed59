// Copyright resp3-client contributors - SPDX-Identifier: Apache-2.0
use std::hint::black_box;

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use resp3_client::resp3::{Parser, ParserEvent};

fn benchmark(c: &mut Criterion, test_group: &str, mut benchmark_fn: impl FnMut(&Bytes), test_name: &str, test_data: Bytes) {
    let mut group = c.benchmark_group(test_group);
    group.sample_size(5000);
    group.bench_function(test_name, move |b| {
        b.iter(|| benchmark_fn(black_box(&test_data)));
    });
}

fn simple_string_reply() -> Bytes {
    Bytes::from_static(b"+OK\r\n")
}

fn short_array_reply() -> Bytes {
    Bytes::from_static(b"*3\r\n$3\r\nfoo\r\n$3\r\nbar\r\n:7\r\n")
}

fn flat_map_reply() -> Bytes {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"%32\r\n");
    for i in 0..32 {
        buf.extend_from_slice(format!("$5\r\nkey{i:02}\r\n").as_bytes());
        buf.extend_from_slice(format!(":{i}\r\n").as_bytes());
    }
    Bytes::from(buf)
}

fn nested_array_reply() -> Bytes {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"*64\r\n");
    for _ in 0..64 {
        buf.extend_from_slice(b"*2\r\n$3\r\nfoo\r\n:1\r\n");
    }
    Bytes::from(buf)
}

fn bulk_string_reply() -> Bytes {
    let payload = vec![b'x'; 4096];
    let mut buf = Vec::new();
    buf.extend_from_slice(format!("${}\r\n", payload.len()).as_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(b"\r\n");
    Bytes::from(buf)
}

fn drain(parser: &mut Parser, buf: &Bytes) {
    parser
        .feed(buf, &mut |event| {
            black_box(matches!(event, ParserEvent::EndOfResponse));
        })
        .unwrap();
    parser.reset();
}

macro_rules! run_bench {
    ($c:ident, $name:expr, $data:expr) => {
        benchmark(
            $c,
            "resp3_parser",
            |data: &Bytes| {
                let mut parser = Parser::new(16);
                drain(&mut parser, data);
            },
            $name,
            $data,
        );
    };
}

fn parser_bench(c: &mut Criterion) {
    run_bench!(c, "simple_string", simple_string_reply());
    run_bench!(c, "short_array", short_array_reply());
    run_bench!(c, "flat_map", flat_map_reply());
    run_bench!(c, "nested_array", nested_array_reply());
    run_bench!(c, "bulk_string", bulk_string_reply());
}

criterion_group!(resp3_parser, parser_bench);
criterion_main!(resp3_parser);
