//! binix-urlrequest - fetch one URL through the request stack
//!
//! Usage: `binix-urlrequest [--head] <url>`

use std::env;
use std::io::Write;
use std::sync::{Arc, mpsc};

use binix_urlrequest::network::{
    ByteBuffer, CallbackResult, ContextConfig, ReqwestEngine, ThreadExecutor, UrlRequestException,
    UrlResponseInfo,
};
use binix_urlrequest::{NAME, UrlRequest, UrlRequestCallback, UrlRequestContext, VERSION};

const READ_BUFFER_SIZE: usize = 32 * 1024;

/// Streams the body to stdout and signals the main thread when done
struct StdoutCallback {
    done: mpsc::Sender<Result<(), String>>,
}

impl UrlRequestCallback for StdoutCallback {
    fn on_redirect_received(
        &self,
        request: &UrlRequest,
        info: &Arc<UrlResponseInfo>,
        new_location: &str,
    ) -> CallbackResult {
        log::info!("{} redirect to {}", info.http_status_code(), new_location);
        request.follow_redirect()?;
        Ok(())
    }

    fn on_response_started(&self, request: &UrlRequest, info: &Arc<UrlResponseInfo>) -> CallbackResult {
        log::info!("{}", info);
        request.read(ByteBuffer::allocate_direct(READ_BUFFER_SIZE))?;
        Ok(())
    }

    fn on_read_completed(
        &self,
        request: &UrlRequest,
        _info: &Arc<UrlResponseInfo>,
        mut buffer: ByteBuffer,
    ) -> CallbackResult {
        std::io::stdout().write_all(buffer.filled())?;
        buffer.clear();
        request.read(buffer)?;
        Ok(())
    }

    fn on_succeeded(&self, _request: &UrlRequest, info: &Arc<UrlResponseInfo>) -> CallbackResult {
        log::info!("received {} bytes", info.received_bytes_count());
        let _ = self.done.send(Ok(()));
        Ok(())
    }

    fn on_failed(
        &self,
        _request: &UrlRequest,
        _info: Option<&Arc<UrlResponseInfo>>,
        error: &UrlRequestException,
    ) -> CallbackResult {
        let _ = self.done.send(Err(error.to_string()));
        Ok(())
    }

    fn on_canceled(&self, _request: &UrlRequest, _info: Option<&Arc<UrlResponseInfo>>) -> CallbackResult {
        let _ = self.done.send(Err("canceled".into()));
        Ok(())
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let (head, url) = match args.as_slice() {
        [_, flag, url] if flag == "--head" => (true, url.clone()),
        [_, url] => (false, url.clone()),
        _ => {
            eprintln!("{} v{}\nusage: {} [--head] <url>", NAME, VERSION, NAME);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(&url, head) {
        eprintln!("{}: {}", NAME, e);
        std::process::exit(1);
    }
}

fn run(url: &str, head: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = ContextConfig::default();
    let context = UrlRequestContext::builder(ReqwestEngine::new(config.clone()))
        .config(config)
        .build();
    let executor = ThreadExecutor::new("binix-callbacks")?;
    let (done, finished) = mpsc::channel();

    let mut builder = context.new_url_request_builder(
        url,
        Arc::new(StdoutCallback { done }),
        executor.clone(),
    );
    if head {
        builder = builder.http_method("HEAD");
    }
    builder.build()?.start()?;

    let outcome = finished.recv()?;
    executor.shutdown();
    outcome.map_err(Into::into)
}
