//! Streaming web adapter: session filtering, simulated delta streaming,
//! subscriber cleanup, and error propagation.

mod common;

use common::*;
use sam::context::RequestContext;
use sam::event_bus::names;
use sam::provider::ProviderError;
use sam::web_session::{run_with_events, StreamConfig};
use std::time::Duration;

fn fast_stream_config() -> StreamConfig {
    StreamConfig {
        chunk_size: 5,
        chunk_delay: Duration::from_millis(1),
        queue_capacity: 64,
    }
}

#[tokio::test]
async fn test_stream_yields_deltas_then_message() {
    let provider = MockProvider::new(vec![text_response("hello streaming world")]);
    let h = harness(provider).await;

    let mut stream = run_with_events(
        h.agent.clone(),
        "hi",
        "s1",
        RequestContext::new("alice"),
        fast_stream_config(),
    )
    .await;

    let mut events = Vec::new();
    while let Some(event) = stream.next_event().await {
        events.push(event);
    }
    let reply = stream.finish().await.unwrap();
    assert_eq!(reply, "hello streaming world");

    let deltas: Vec<String> = events
        .iter()
        .filter(|e| e.event == names::AGENT_DELTA)
        .map(|e| e.payload["content"].as_str().unwrap_or_default().to_string())
        .collect();
    assert!(deltas.len() > 1);
    assert_eq!(deltas.concat(), "hello streaming world");

    // Exactly one terminal message, published by the adapter (the run
    // itself was told not to publish it).
    let messages: Vec<_> = events
        .iter()
        .filter(|e| e.event == names::AGENT_MESSAGE)
        .collect();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].payload["content"], "hello streaming world");
    assert!(messages[0].payload["usage"]["turns"].is_u64());
}

#[tokio::test]
async fn test_stream_filters_other_sessions() {
    let provider = MockProvider::new(vec![text_response("mine")]);
    let h = harness(provider).await;

    // Noise from another session while our stream is live.
    let bus = h.bus.clone();
    let noise = tokio::spawn(async move {
        for _ in 0..10 {
            bus.publish(
                names::AGENT_DELTA,
                serde_json::json!({"session_id": "other", "content": "noise"}),
            )
            .await;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    });

    let mut stream = run_with_events(
        h.agent.clone(),
        "hi",
        "s1",
        RequestContext::new("alice"),
        fast_stream_config(),
    )
    .await;

    let mut saw_other = false;
    while let Some(event) = stream.next_event().await {
        if event.payload["session_id"] == "other" {
            saw_other = true;
        }
    }
    stream.finish().await.unwrap();
    noise.await.unwrap();
    assert!(!saw_other);
}

#[tokio::test]
async fn test_handlers_unsubscribed_after_success() {
    let provider = MockProvider::new(vec![text_response("done")]);
    let h = harness(provider).await;

    let mut stream = run_with_events(
        h.agent.clone(),
        "hi",
        "s1",
        RequestContext::new("alice"),
        fast_stream_config(),
    )
    .await;
    while stream.next_event().await.is_some() {}
    stream.finish().await.unwrap();

    for event in names::ALL {
        assert_eq!(h.bus.subscriber_count(event).await, 0, "leak on {}", event);
    }
}

#[tokio::test]
async fn test_run_error_surfaces_after_cleanup() {
    let provider = MockProvider::new(vec![Err(ProviderError::Api("exploded".into()))]);
    let h = harness(provider).await;

    let mut stream = run_with_events(
        h.agent.clone(),
        "hi",
        "s1",
        RequestContext::new("alice"),
        fast_stream_config(),
    )
    .await;

    // The failing run still produces status events, then the queue closes.
    let mut saw_finish = false;
    while let Some(event) = stream.next_event().await {
        if event.event == names::AGENT_STATUS && event.payload["state"] == "finish" {
            saw_finish = true;
        }
    }
    assert!(saw_finish);

    let err = stream.finish().await.unwrap_err();
    assert!(err.to_string().contains("exploded"));

    for event in names::ALL {
        assert_eq!(h.bus.subscriber_count(event).await, 0, "leak on {}", event);
    }
}

#[tokio::test]
async fn test_empty_reply_skips_deltas_but_sends_message() {
    let provider = MockProvider::new(vec![text_response("")]);
    let h = harness(provider).await;

    let mut stream = run_with_events(
        h.agent.clone(),
        "hi",
        "s1",
        RequestContext::new("alice"),
        fast_stream_config(),
    )
    .await;

    let mut deltas = 0;
    let mut messages = 0;
    while let Some(event) = stream.next_event().await {
        match event.event.as_str() {
            names::AGENT_DELTA => deltas += 1,
            names::AGENT_MESSAGE => messages += 1,
            _ => {}
        }
    }
    stream.finish().await.unwrap();

    assert_eq!(deltas, 0);
    assert_eq!(messages, 1);
}
