use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_core::stream::FusedStream;
use futures_util::StreamExt;
use tracing::trace;

use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::types::CompletionResponseChunk;

/// Boxed sequence of canonical chunks produced by a provider adapter.
pub type ChunkStream =
    Pin<Box<dyn Stream<Item = Result<CompletionResponseChunk, LLMError>> + Send>>;

/// Lazy, forward-only sequence of [`CompletionResponseChunk`] values.
///
/// Nothing is read from the vendor until the next chunk is polled. The sequence is
/// single-pass: once it has ended (end marker, connection close or an error) every
/// further poll returns `None`. Dropping it closes the vendor stream.
pub struct StreamCompletionResponse {
    inner: Option<ChunkStream>,
    provider: &'static str,
}

impl StreamCompletionResponse {
    pub(crate) fn new<S>(provider: &'static str, stream: S) -> Self
    where
        S: Stream<Item = Result<CompletionResponseChunk, LLMError>> + Send + 'static,
    {
        Self {
            inner: Some(Box::pin(stream)),
            provider,
        }
    }

    /// Name of the provider producing the chunks.
    pub fn provider(&self) -> &'static str {
        self.provider
    }

    /// Drains the remaining chunks and concatenates the text deltas of choice `0`.
    ///
    /// # Errors
    ///
    /// Returns the first error yielded by the stream.
    pub async fn collect_text(mut self) -> Result<String, LLMError> {
        let mut text = String::new();
        while let Some(chunk) = self.next().await {
            let chunk = chunk?;
            for choice in chunk.choices.iter().filter(|choice| choice.index == 0) {
                if let Some(content) = &choice.delta.content {
                    text.push_str(content);
                }
            }
        }
        Ok(text)
    }
}

impl Stream for StreamCompletionResponse {
    type Item = Result<CompletionResponseChunk, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(item)) => {
                if let Ok(chunk) = &item {
                    trace!(
                        provider = this.provider,
                        choices = chunk.choices.len(),
                        has_usage = chunk.usage.is_some(),
                        "normalized stream chunk"
                    );
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                // 释放底层连接
                this.inner = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl FusedStream for StreamCompletionResponse {
    fn is_terminated(&self) -> bool {
        self.inner.is_none()
    }
}

impl fmt::Debug for StreamCompletionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCompletionResponse")
            .field("provider", &self.provider)
            .field("terminated", &self.inner.is_none())
            .finish()
    }
}

/// Standardized SSE event yielded by [`StreamDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Raw `data:` payload emitted by the provider.
    Data(String),
    /// Terminal marker reported via `[DONE]`.
    Done,
}

/// Normalizes provider SSE feeds into [`StreamEvent`] values.
pub struct StreamDecoder {
    body: HttpBodyStream,
    buffer: Vec<u8>,
    data_lines: Vec<Vec<u8>>,
    pending: VecDeque<Result<StreamEvent, LLMError>>,
    provider: &'static str,
    stream_closed: bool,
    done_received: bool,
}

impl StreamDecoder {
    /// Wraps a raw HTTP body stream and prepares it for SSE decoding.
    pub fn new(body: HttpBodyStream, provider: &'static str) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            data_lines: Vec::new(),
            pending: VecDeque::new(),
            provider,
            stream_closed: false,
            done_received: false,
        }
    }

    fn handle_line(&mut self, line: Vec<u8>) {
        if let Some(rest) = line.strip_prefix(b"data:") {
            let data = rest.strip_prefix(b" ").unwrap_or(rest);
            self.data_lines.push(data.to_vec());
        }
    }

    fn flush_event(&mut self) -> Result<(), LLMError> {
        if self.data_lines.is_empty() {
            return Ok(());
        }

        let joined = self.data_lines.drain(..).collect::<Vec<_>>().join(&b'\n');
        if joined.is_empty() {
            return Ok(());
        }

        let data = String::from_utf8(joined).map_err(|err| {
            LLMError::normalization(self.provider, format!("invalid UTF-8 in stream chunk: {err}"))
        })?;

        if data.trim() == "[DONE]" {
            if !self.done_received {
                self.done_received = true;
                self.pending.push_back(Ok(StreamEvent::Done));
            }
        } else {
            self.pending.push_back(Ok(StreamEvent::Data(data)));
        }

        Ok(())
    }

    fn drain_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
        buffer.iter().position(|b| *b == b'\n').map(|pos| {
            let mut line: Vec<u8> = buffer.drain(..=pos).collect();
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            line
        })
    }
}

impl Stream for StreamDecoder {
    type Item = Result<StreamEvent, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(event) = this.pending.pop_front() {
            return Poll::Ready(Some(event));
        }

        if this.done_received {
            return Poll::Ready(None);
        }

        loop {
            if this.stream_closed {
                if !this.buffer.is_empty() {
                    let line = this.buffer.drain(..).collect::<Vec<u8>>();
                    this.handle_line(line);
                }
                if let Err(err) = this.flush_event() {
                    return Poll::Ready(Some(Err(err)));
                }
                return Poll::Ready(this.pending.pop_front());
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                    while let Some(line) = Self::drain_line(&mut this.buffer) {
                        if line.is_empty() {
                            if let Err(err) = this.flush_event() {
                                return Poll::Ready(Some(Err(err)));
                            }
                        } else {
                            this.handle_line(line);
                        }
                    }
                    if let Some(event) = this.pending.pop_front() {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    return Poll::Ready(Some(Err(LLMError::transport(this.provider, err))));
                }
                Poll::Ready(None) => {
                    this.stream_closed = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Outcome of mapping one SSE payload.
#[derive(Debug)]
pub(crate) enum ChunkStep {
    /// The payload produced one canonical chunk.
    Emit(CompletionResponseChunk),
    /// Keep-alive or payload-less marker.
    Skip,
    /// The payload is the protocol's final event.
    Finish,
}

/// Per-provider conversion of SSE `data:` payloads into canonical chunks.
///
/// Implementations may keep state across events (message id, tool-call indexes).
pub(crate) trait ChunkMapper: Send + Unpin + 'static {
    fn map_event(&mut self, data: &str) -> Result<ChunkStep, LLMError>;
}

/// Drives a [`StreamDecoder`] through a [`ChunkMapper`].
///
/// The decoder, and with it the HTTP body, is dropped as soon as the stream ends.
pub(crate) struct SseChunkStream<M> {
    decoder: Option<StreamDecoder>,
    mapper: M,
}

impl<M: ChunkMapper> SseChunkStream<M> {
    pub(crate) fn new(body: HttpBodyStream, provider: &'static str, mapper: M) -> Self {
        Self {
            decoder: Some(StreamDecoder::new(body, provider)),
            mapper,
        }
    }
}

impl<M: ChunkMapper> Stream for SseChunkStream<M> {
    type Item = Result<CompletionResponseChunk, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let Some(decoder) = this.decoder.as_mut() else {
                return Poll::Ready(None);
            };
            let step = match Pin::new(decoder).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) | Poll::Ready(Some(Ok(StreamEvent::Done))) => {
                    Ok(ChunkStep::Finish)
                }
                Poll::Ready(Some(Ok(StreamEvent::Data(data)))) => this.mapper.map_event(&data),
                Poll::Ready(Some(Err(err))) => Err(err),
            };
            match step {
                Ok(ChunkStep::Emit(chunk)) => return Poll::Ready(Some(Ok(chunk))),
                Ok(ChunkStep::Skip) => continue,
                Ok(ChunkStep::Finish) => {
                    this.decoder = None;
                    return Poll::Ready(None);
                }
                Err(err) => {
                    this.decoder = None;
                    return Poll::Ready(Some(Err(err)));
                }
            }
        }
    }
}

/// Reads a whole (error) body into a string.
pub(crate) async fn collect_stream_text(
    mut body: HttpBodyStream,
    provider: &'static str,
) -> Result<String, LLMError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk.map_err(|err| LLMError::transport(provider, err))?);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
