use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use binix_urlrequest::network::recording::RecordingEngine;
use binix_urlrequest::network::{
    ByteBuffer, CallbackResult, DirectExecutor, UrlRequestException, UrlResponseInfo,
    map_error_code,
};
use binix_urlrequest::{UrlRequest, UrlRequestCallback, UrlRequestContext};

const CHUNK: usize = 4 * 1024;

/// Reads the body to the end without inspecting it
struct DrainCallback;

impl UrlRequestCallback for DrainCallback {
    fn on_redirect_received(&self, request: &UrlRequest, _: &Arc<UrlResponseInfo>, _: &str) -> CallbackResult {
        request.follow_redirect()?;
        Ok(())
    }

    fn on_response_started(&self, request: &UrlRequest, _: &Arc<UrlResponseInfo>) -> CallbackResult {
        request.read(ByteBuffer::allocate_direct(CHUNK))?;
        Ok(())
    }

    fn on_read_completed(&self, request: &UrlRequest, _: &Arc<UrlResponseInfo>, mut buffer: ByteBuffer) -> CallbackResult {
        black_box(buffer.filled());
        buffer.clear();
        request.read(buffer)?;
        Ok(())
    }

    fn on_succeeded(&self, _: &UrlRequest, _: &Arc<UrlResponseInfo>) -> CallbackResult {
        Ok(())
    }

    fn on_failed(&self, _: &UrlRequest, _: Option<&Arc<UrlResponseInfo>>, _: &UrlRequestException) -> CallbackResult {
        Ok(())
    }

    fn on_canceled(&self, _: &UrlRequest, _: Option<&Arc<UrlResponseInfo>>) -> CallbackResult {
        Ok(())
    }
}

/// Full lifecycle: start, one redirect, 64 KiB body, success
fn benchmark_request_lifecycle(c: &mut Criterion) {
    let engine = RecordingEngine::new();
    let context = UrlRequestContext::new(engine.clone());
    let body = vec![0x5a_u8; CHUNK];

    c.bench_function("request_lifecycle", |b| {
        b.iter(|| {
            let request = context
                .new_url_request_builder(
                    "https://bench.test/",
                    Arc::new(DrainCallback),
                    Arc::new(DirectExecutor),
                )
                .build()
                .unwrap();
            request.start().unwrap();
            let handle = engine.last_handle().unwrap();
            engine.redirect(handle, "https://bench.test/final", 302, 0);
            engine.respond(handle, 200, Vec::new());
            for _ in 0..16 {
                engine.complete_read(handle, &body);
            }
            engine.succeed(handle);
            engine.clear_history();
            black_box(request.is_done())
        })
    });
}

fn benchmark_error_mapping(c: &mut Criterion) {
    let mut group = c.benchmark_group("errors");

    group.bench_function("map_error_code", |b| {
        b.iter(|| {
            for code in -2..14 {
                black_box(map_error_code(black_box(code)));
            }
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_request_lifecycle, benchmark_error_mapping);
criterion_main!(benches);
