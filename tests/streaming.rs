mod common;

use common::MockTransport;
use futures_util::StreamExt;
use futures_util::stream::FusedStream;
use polyllm::{
    ChatCompletionMessageParam, CompletionRequest, CompletionResponseChunk, ConfigOptions,
    FinishReason, LLM, LLMError, ProviderKind,
};
use serde_json::json;

fn request(model: &str) -> CompletionRequest {
    CompletionRequest::new(model, vec![ChatCompletionMessageParam::user("count to two")])
        .with_stream(true)
}

fn openai_chunk(content: Option<&str>, finish_reason: Option<&str>) -> String {
    json!({
        "id": "chatcmpl-s",
        "object": "chat.completion.chunk",
        "created": 1_700_000_100,
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "delta": {"content": content},
            "finish_reason": finish_reason
        }]
    })
    .to_string()
}

async fn drain(
    stream: &mut polyllm::StreamCompletionResponse,
) -> Vec<Result<CompletionResponseChunk, LLMError>> {
    let mut items = Vec::new();
    while let Some(item) = stream.next().await {
        items.push(item);
    }
    items
}

#[tokio::test]
async fn openai_stream_yields_one_chunk_per_vendor_chunk_lazily() {
    let transport = MockTransport::sse([
        openai_chunk(Some("one"), None),
        openai_chunk(Some(" two"), None),
        openai_chunk(None, Some("stop")),
        "[DONE]".to_string(),
    ]);
    let llm = LLM::with_transport(ConfigOptions::new(ProviderKind::OpenAi, "k"), transport.clone())
        .expect("client");

    let mut stream = llm
        .create_streaming_completion(request("gpt-4o-mini"))
        .await
        .expect("stream");
    assert_eq!(transport.pulled(), 0, "nothing is read before the first poll");
    assert_eq!(transport.last_body()["stream"], true);

    let first = stream.next().await.expect("first").expect("chunk");
    assert_eq!(transport.pulled(), 1);
    assert_eq!(first.object, "chat.completion.chunk");
    assert_eq!(first.choices[0].delta.content.as_deref(), Some("one"));
    assert_eq!(first.choices[0].finish_reason, FinishReason::Unknown);

    let rest: Vec<_> = drain(&mut stream)
        .await
        .into_iter()
        .map(|item| item.expect("chunk"))
        .collect();
    assert_eq!(rest.len(), 2);
    assert_eq!(rest[0].choices[0].delta.content.as_deref(), Some(" two"));
    assert_eq!(rest[1].choices[0].finish_reason, FinishReason::Stop);

    assert!(stream.is_terminated());
    assert!(stream.next().await.is_none(), "an exhausted stream stays empty");
    assert!(transport.body_dropped());
}

#[tokio::test]
async fn dropping_a_partial_stream_releases_the_body() {
    let transport = MockTransport::sse([
        openai_chunk(Some("a"), None),
        openai_chunk(Some("b"), None),
        openai_chunk(Some("c"), Some("stop")),
        "[DONE]".to_string(),
    ]);
    let llm = LLM::with_transport(ConfigOptions::new(ProviderKind::OpenAi, "k"), transport.clone())
        .expect("client");

    let mut stream = llm
        .create_streaming_completion(request("gpt-4o-mini"))
        .await
        .expect("stream");
    stream.next().await.expect("first").expect("chunk");
    assert!(!transport.body_dropped());

    drop(stream);
    assert!(transport.body_dropped());
    assert_eq!(transport.pulled(), 1);
}

#[tokio::test]
async fn anthropic_stream_skips_markers_and_ends_on_message_stop() {
    let transport = MockTransport::sse([
        json!({"type": "message_start", "message": {"id": "msg_s", "model": "claude-3-5-haiku-latest", "content": [], "usage": {"input_tokens": 8, "output_tokens": 1}}}).to_string(),
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}).to_string(),
        json!({"type": "ping"}).to_string(),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "One"}}).to_string(),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": ", two"}}).to_string(),
        json!({"type": "content_block_stop", "index": 0}).to_string(),
        json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 4}}).to_string(),
        json!({"type": "message_stop"}).to_string(),
    ]);
    let llm = LLM::with_transport(ConfigOptions::new(ProviderKind::Anthropic, "k"), transport.clone())
        .expect("client");

    let mut stream = llm
        .create_streaming_completion(request("claude-3-5-haiku-latest"))
        .await
        .expect("stream");
    assert_eq!(transport.last_request().header("accept"), Some("text/event-stream"));

    let chunks: Vec<_> = drain(&mut stream)
        .await
        .into_iter()
        .map(|item| item.expect("chunk"))
        .collect();
    assert_eq!(chunks.len(), 4);
    assert!(chunks.iter().all(|chunk| chunk.id.as_deref() == Some("msg_s")));
    assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some("assistant"));
    let text: String = chunks
        .iter()
        .filter_map(|chunk| chunk.choices.first()?.delta.content.clone())
        .collect();
    assert_eq!(text, "One, two");

    let last = &chunks[3];
    assert_eq!(last.choices[0].finish_reason, FinishReason::Stop);
    let usage = last.usage.as_ref().expect("usage");
    assert_eq!((usage.prompt_tokens, usage.completion_tokens), (8, 4));
}

#[tokio::test]
async fn anthropic_error_event_ends_the_stream_with_an_error() {
    let transport = MockTransport::sse([
        json!({"type": "message_start", "message": {"id": "msg_e", "model": "claude-3-5-haiku-latest", "content": []}}).to_string(),
        json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}).to_string(),
        json!({"type": "message_stop"}).to_string(),
    ]);
    let llm = LLM::with_transport(ConfigOptions::new(ProviderKind::Anthropic, "k"), transport)
        .expect("client");

    let mut stream = llm
        .create_streaming_completion(request("claude-3-5-haiku-latest"))
        .await
        .expect("stream");
    let items = drain(&mut stream).await;
    assert_eq!(items.len(), 2);
    assert!(items[0].is_ok());
    assert!(matches!(
        items[1],
        Err(LLMError::Provider {
            provider: "anthropic",
            ..
        })
    ));
}

#[tokio::test]
async fn gemini_stream_maps_every_payload_and_missing_finish_reason() {
    let transport = MockTransport::sse([
        json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Uno"}]}}]}).to_string(),
        json!({"candidates": [{"content": {"role": "model", "parts": [{"text": ", dos"}]}, "finishReason": "STOP"}],
               "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2, "totalTokenCount": 5}}).to_string(),
    ]);
    let llm = LLM::with_transport(ConfigOptions::new(ProviderKind::Gemini, "k"), transport.clone())
        .expect("client");

    let stream = llm
        .create_streaming_completion(request("gemini-2.0-flash"))
        .await
        .expect("stream");
    assert!(
        transport
            .last_request()
            .url
            .ends_with("/v1beta/models/gemini-2.0-flash:streamGenerateContent?alt=sse")
    );

    let chunks: Vec<_> = stream.map(|item| item.expect("chunk")).collect().await;
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|chunk| chunk.id.is_none()));
    assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some("assistant"));
    assert_eq!(chunks[0].choices[0].finish_reason, FinishReason::Unknown);
    assert!(chunks[1].choices[0].delta.role.is_none());
    assert_eq!(chunks[1].choices[0].finish_reason, FinishReason::Stop);
    assert_eq!(chunks[1].usage.as_ref().map(|usage| usage.total_tokens), Some(5));
}

#[tokio::test]
async fn collect_text_concatenates_deltas() {
    let transport = MockTransport::sse([
        openai_chunk(Some("Hello"), None),
        openai_chunk(Some(", world"), Some("stop")),
        "[DONE]".to_string(),
    ]);
    let llm = LLM::with_transport(ConfigOptions::new(ProviderKind::OpenRouter, "k"), transport)
        .expect("client");

    let text = llm
        .create_streaming_completion(request("openai/gpt-4o-mini"))
        .await
        .expect("stream")
        .collect_text()
        .await
        .expect("text");
    assert_eq!(text, "Hello, world");
}

#[tokio::test]
async fn malformed_stream_payload_is_a_normalization_error() {
    let transport = MockTransport::sse(["{not json".to_string()]);
    let llm = LLM::with_transport(ConfigOptions::new(ProviderKind::OpenAi, "k"), transport)
        .expect("client");

    let mut stream = llm
        .create_streaming_completion(request("gpt-4o-mini"))
        .await
        .expect("stream");
    assert!(matches!(
        stream.next().await,
        Some(Err(LLMError::Normalization { provider: "openai", .. }))
    ));
    assert!(stream.next().await.is_none());
}
