//! Callbacks that run once a response body has been handed to the connection.
//!
//! Axum middleware only sees the response before it is written. To run code
//! afterwards the body is wrapped in a stream whose guard calls the hooks when
//! the server drops it, which happens after the last frame went out (or the
//! client went away).

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use futures::Stream;
use tracing::debug;

type Hook = Arc<dyn Fn(&str) + Send + Sync>;

/// Registered callbacks, each receiving the path of the finished request.
#[derive(Clone, Default)]
pub struct AfterResponse {
    hooks: Vec<Hook>,
}

impl AfterResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    fn flush(&self, path: &str) {
        debug!(path, "response finished");
        for hook in &self.hooks {
            hook(path);
        }
    }
}

/// Middleware for `axum::middleware::from_fn_with_state`.
pub async fn run_after_response(
    State(hooks): State<AfterResponse>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let response = next.run(request).await;

    let (parts, body) = response.into_parts();
    let body = Body::from_stream(GuardedStream {
        inner: body.into_data_stream(),
        _guard: FlushGuard { hooks, path },
    });
    Response::from_parts(parts, body)
}

struct FlushGuard {
    hooks: AfterResponse,
    path: String,
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        self.hooks.flush(&self.path);
    }
}

struct GuardedStream<S> {
    inner: S,
    _guard: FlushGuard,
}

impl<S: Stream + Unpin> Stream for GuardedStream<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
