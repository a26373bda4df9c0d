// ABOUTME: Benchmark suite for the request parser's FSM and the response
// ABOUTME: serializer, measuring per-byte parse cost across request shapes

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use embedded_http::http::fsm::ParserFsm;
use embedded_http::http::stream::ReadStream;
use embedded_http::http::{status_text, ResponseBuilder, TokenKind};
use std::time::Duration;

fn make_stream(input: &[u8]) -> ReadStream {
    let mut stream = ReadStream::new(input.len(), input.len());
    stream.writable_mut()[..input.len()].copy_from_slice(input);
    stream.commit_written(input.len());
    stream
}

fn drain(fsm: &mut ParserFsm, stream: &mut ReadStream) {
    loop {
        let tok = fsm.next_token(stream);
        match tok.kind {
            TokenKind::None | TokenKind::ReqEnd | TokenKind::Error => break,
            _ => {}
        }
    }
}

fn bench_simple_get(c: &mut Criterion) {
    let request = b"GET /status HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n";

    let mut group = c.benchmark_group("parse_simple_get");
    group.measurement_time(Duration::from_secs(10));
    group.bench_function("headers_only", |b| {
        b.iter(|| {
            let mut fsm = ParserFsm::new(127, 8192);
            let mut stream = make_stream(black_box(request));
            drain(&mut fsm, &mut stream);
        })
    });
    group.finish();
}

fn bench_post_with_body(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_post_body");
    group.measurement_time(Duration::from_secs(10));

    for &size in &[16usize, 256, 4096] {
        let body = "a".repeat(size);
        let request = format!(
            "POST /echo HTTP/1.1\r\nHost: example.com\r\ncontent-length: {size}\r\n\r\n{body}"
        );
        let bytes = request.into_bytes();

        group.bench_with_input(BenchmarkId::new("content_length", size), &bytes, |b, bytes| {
            b.iter(|| {
                let mut fsm = ParserFsm::new(127, 8192);
                let mut stream = make_stream(black_box(bytes));
                drain(&mut fsm, &mut stream);
            })
        });
    }

    group.finish();
}

fn bench_chunked_body(c: &mut Criterion) {
    let request = b"POST /upload HTTP/1.1\r\nHost: example.com\r\ntransfer-encoding: chunked\r\n\r\n\
                     5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";

    let mut group = c.benchmark_group("parse_chunked_body");
    group.measurement_time(Duration::from_secs(10));
    group.bench_function("three_chunks", |b| {
        b.iter(|| {
            let mut fsm = ParserFsm::new(127, 8192);
            let mut stream = make_stream(black_box(request));
            loop {
                let tok = fsm.next_token(&mut stream);
                match tok.kind {
                    TokenKind::None | TokenKind::ReqEnd => break,
                    _ => {}
                }
            }
        })
    });
    group.finish();
}

fn bench_header_count_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_header_count");
    group.measurement_time(Duration::from_secs(10));

    for &count in &[4usize, 32, 120] {
        let mut request = String::from("GET / HTTP/1.1\r\n");
        for i in 0..count {
            request.push_str(&format!("x-header-{i}: value-{i}\r\n"));
        }
        request.push_str("\r\n");
        let bytes = request.into_bytes();

        group.bench_with_input(BenchmarkId::new("headers", count), &bytes, |b, bytes| {
            b.iter(|| {
                let mut fsm = ParserFsm::new(127, 8192);
                let mut stream = make_stream(black_box(bytes));
                drain(&mut fsm, &mut stream);
            })
        });
    }

    group.finish();
}

fn bench_response_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_serialize");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("status_text_lookup", |b| {
        b.iter(|| status_text(black_box(404)))
    });

    group.bench_function("headers_and_body", |b| {
        b.iter(|| {
            let mut resp = ResponseBuilder::new();
            resp.set_status(black_box(200)).unwrap();
            resp.set_header("content-type", "text/plain");
            resp.set_body(b"hello world");
            resp.serialize_headers(true)
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_simple_get,
    bench_post_with_body,
    bench_chunked_body,
    bench_header_count_scaling,
    bench_response_serialization,
);
criterion_main!(benches);
