use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use tutorchat::core::accumulator::ResponseAccumulator;
use tutorchat::core::stream_decoder::{DecodeEvent, StreamDecoder};

fn make_body(events: usize) -> Vec<u8> {
    let mut body = String::new();
    for i in 0..events {
        if i % 4 == 0 {
            body.push_str(r#"data: {"choices":[{"delta":{"reasoning_content":"considering the next step "}}]}"#);
        } else {
            body.push_str(r#"data: {"choices":[{"delta":{"content":"the derivative of x squared is 2x "}}]}"#);
        }
        body.push_str("\n\n");
    }
    body.push_str("data: [DONE]\n\n");
    body.into_bytes()
}

fn decode_in_chunks(body: &[u8], chunk_size: usize) -> usize {
    let mut decoder = StreamDecoder::new();
    let mut accumulator = ResponseAccumulator::new();
    for chunk in body.chunks(chunk_size) {
        for event in decoder.push(chunk) {
            if let DecodeEvent::Delta(delta) = event {
                accumulator.apply(&delta);
            }
        }
    }
    decoder.finish();
    accumulator.answer().len() + accumulator.thinking().len()
}

fn bench_stream_decoder(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_decoder");
    for &events in &[200usize, 2000usize] {
        let body = make_body(events);
        group.throughput(Throughput::Bytes(body.len() as u64));
        // Network reads rarely line up with event boundaries.
        for &chunk_size in &[17usize, 1024usize] {
            group.bench_with_input(
                BenchmarkId::new(format!("chunk_{chunk_size}"), events),
                &body,
                |b, body| b.iter(|| decode_in_chunks(black_box(body), chunk_size)),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_stream_decoder);
criterion_main!(benches);
