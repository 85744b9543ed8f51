#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_core::Stream;
use polyllm::error::TransportError;
use polyllm::http::{HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport};
use serde_json::Value;

/// 记录请求并返回预设响应的 Transport
pub struct MockTransport {
    status: u16,
    body: Vec<u8>,
    events: Vec<String>,
    requests: Mutex<Vec<HttpRequest>>,
    /// Body chunks handed out so far.
    pub pulled: Arc<AtomicUsize>,
    /// Set once the streaming body has been dropped.
    pub body_dropped: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn json(status: u16, body: Value) -> Arc<Self> {
        Arc::new(Self::new(status, body.to_string().into_bytes(), Vec::new()))
    }

    /// Each entry becomes one SSE event, delivered as its own body chunk.
    pub fn sse<I, S>(events: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let events = events
            .into_iter()
            .map(|data| format!("data: {}\n\n", data.into()))
            .collect();
        Arc::new(Self::new(200, Vec::new(), events))
    }

    fn new(status: u16, body: Vec<u8>, events: Vec<String>) -> Self {
        Self {
            status,
            body,
            events,
            requests: Mutex::new(Vec::new()),
            pulled: Arc::new(AtomicUsize::new(0)),
            body_dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn last_request(&self) -> HttpRequest {
        self.requests().pop().expect("at least one request")
    }

    pub fn last_body(&self) -> Value {
        serde_json::from_slice(&self.last_request().body).expect("json request body")
    }

    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }

    pub fn body_dropped(&self) -> bool {
        self.body_dropped.load(Ordering::SeqCst)
    }

    fn record(&self, request: HttpRequest) {
        self.requests.lock().expect("requests lock").push(request);
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.record(request);
        Ok(HttpResponse {
            status: self.status,
            headers: HashMap::from([("content-type".to_string(), "application/json".to_string())]),
            body: self.body.clone(),
        })
    }

    async fn send_stream(
        &self,
        request: HttpRequest,
    ) -> Result<HttpStreamResponse, TransportError> {
        self.record(request);
        let body = TrackedBody {
            chunks: self
                .events
                .iter()
                .map(|event| event.clone().into_bytes())
                .collect(),
            pulled: self.pulled.clone(),
            dropped: self.body_dropped.clone(),
        };
        Ok(HttpStreamResponse {
            status: self.status,
            headers: HashMap::new(),
            body: Box::pin(body),
        })
    }
}

struct TrackedBody {
    chunks: VecDeque<Vec<u8>>,
    pulled: Arc<AtomicUsize>,
    dropped: Arc<AtomicBool>,
}

impl Stream for TrackedBody {
    type Item = Result<Vec<u8>, TransportError>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let chunk = this.chunks.pop_front();
        if chunk.is_some() {
            this.pulled.fetch_add(1, Ordering::SeqCst);
        }
        Poll::Ready(chunk.map(Ok))
    }
}

impl Drop for TrackedBody {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}
