use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tokio::time::Instant;

use chatstream_rs::stream::sse::{data_sse_frame, named_sse_frame, LineOutcome, SseEventParser};
use chatstream_rs::stream::{ByteDecoder, EventDispatcher, LineReassembler, TokenCoalescer};

fn named_body(tokens: usize) -> Vec<u8> {
    let mut body = String::new();
    for idx in 0..tokens {
        body.push_str(&named_sse_frame("token", &format!(" w\u{f6}rd{idx}")));
    }
    body.push_str(&named_sse_frame("done", r#"{"conversation_id": 1}"#));
    body.into_bytes()
}

fn legacy_body(tokens: usize) -> Vec<u8> {
    let mut body = String::new();
    for idx in 0..tokens {
        body.push_str(&data_sse_frame(&format!(
            r#"{{"event":"token","data":" wörd{idx}"}}"#
        )));
    }
    body.push_str(&data_sse_frame(r#"{"event":"done","data":{}}"#));
    body.into_bytes()
}

/// Run the synchronous pipeline stages over `body` split into `chunk_size` pieces.
fn run_pipeline(body: &[u8], chunk_size: usize) -> usize {
    let mut decoder = ByteDecoder::new();
    let mut lines = LineReassembler::new();
    let mut parser = SseEventParser::new();
    let mut dispatcher = EventDispatcher::new();
    let mut coalescer = TokenCoalescer::default();
    let now = Instant::now();
    let mut text = String::new();
    let mut delivered = 0;

    for chunk in body.chunks(chunk_size) {
        text.clear();
        decoder.decode_into(chunk, &mut text).expect("valid utf-8");
        lines.push(&text);
        while let Some(line) = lines.next_line() {
            if let LineOutcome::Event(event) = parser.process_line(line) {
                if let Some(chatstream_rs::protocol::StreamAction::Token(token)) =
                    dispatcher.dispatch(event)
                {
                    coalescer.append(&token, now);
                }
            }
        }
    }
    if let Some(flushed) = coalescer.flush() {
        delivered += flushed.len();
    }
    delivered
}

fn bench_pipeline(c: &mut Criterion) {
    let named = named_body(2_000);
    let legacy = legacy_body(2_000);

    let mut group = c.benchmark_group("sse_pipeline");
    group.throughput(Throughput::Bytes(named.len() as u64));
    group.bench_function("named_2k_tokens_chunk_64", |b| {
        b.iter(|| black_box(run_pipeline(black_box(&named), 64)));
    });
    group.bench_function("named_2k_tokens_chunk_7", |b| {
        b.iter(|| black_box(run_pipeline(black_box(&named), 7)));
    });
    group.throughput(Throughput::Bytes(legacy.len() as u64));
    group.bench_function("legacy_2k_tokens_chunk_64", |b| {
        b.iter(|| black_box(run_pipeline(black_box(&legacy), 64)));
    });
    group.finish();
}

fn bench_decoder(c: &mut Criterion) {
    let body = named_body(2_000);
    c.bench_function("byte_decoder_chunk_3", |b| {
        b.iter(|| {
            let mut decoder = ByteDecoder::new();
            let mut out = String::with_capacity(body.len());
            for chunk in body.chunks(3) {
                decoder.decode_into(black_box(chunk), &mut out).expect("valid utf-8");
            }
            black_box(out.len())
        });
    });
}

criterion_group!(benches, bench_pipeline, bench_decoder);
criterion_main!(benches);
