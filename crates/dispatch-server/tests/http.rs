//! End-to-end tests over a real listener.

use std::sync::Arc;

use serde_json::{json, Value};

use dispatch_core::{LlmProvider, TokenUsage};
use dispatch_engine::ChatPipeline;
use dispatch_llm::{MockProvider, MockResponse};
use dispatch_server::{start, ServerConfig, ServerHandle};
use dispatch_settings::DispatchSettings;
use dispatch_store::MemoryUsageLedger;

struct TestServer {
    handle: ServerHandle,
    provider: Option<Arc<MockProvider>>,
    client: reqwest::Client,
}

impl TestServer {
    async fn spawn(settings: DispatchSettings, responses: Option<Vec<MockResponse>>) -> Self {
        let provider = responses.map(|r| Arc::new(MockProvider::new(r)));
        let pipeline = ChatPipeline::new(
            &settings,
            provider.clone().map(|p| p as Arc<dyn LlmProvider>),
            Arc::new(MemoryUsageLedger::new()),
        );
        let handle = start(ServerConfig::default(), pipeline).await.unwrap();
        Self {
            handle,
            provider,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.handle.port)
    }

    async fn chat(&self, body: Value) -> reqwest::Response {
        self.client
            .post(self.url("/api/chat"))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    fn calls(&self) -> usize {
        self.provider.as_ref().map_or(0, |p| p.call_count())
    }
}

fn answer(text: &str) -> MockResponse {
    MockResponse::stream_text(text, TokenUsage::new(120, 40))
}

async fn ndjson(response: reqwest::Response) -> Vec<Value> {
    let body = response.text().await.unwrap();
    body.lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn chat_streams_ndjson_events() {
    let server = TestServer::spawn(
        DispatchSettings::default(),
        Some(vec![MockResponse::stream_chunks(
            &["Grid load is ", "normal today."],
            TokenUsage::new(120, 40),
        )]),
    )
    .await;

    let response = server
        .chat(json!({"message": "What is the grid load?", "current_page": "/grid", "session_id": "a"}))
        .await;

    assert_eq!(response.status(), 200);
    let headers = response.headers().clone();
    assert_eq!(headers["content-type"], "application/x-ndjson");
    assert_eq!(headers["x-ratelimit-remaining"], "19");
    let tier = headers["x-chat-tier"].to_str().unwrap().to_string();

    let events = ndjson(response).await;
    assert_eq!(events[0]["type"], "meta");
    assert_eq!(events[0]["tier"], tier.as_str());
    assert_eq!(events[0]["cached"], false);

    let text: String = events
        .iter()
        .filter(|e| e["type"] == "text")
        .map(|e| e["text"].as_str().unwrap())
        .collect();
    assert_eq!(text, "Grid load is normal today.");

    let done = events.last().unwrap();
    assert_eq!(done["type"], "done");
    assert_eq!(done["remaining"], 19);
    assert_eq!(done["usage"]["output_tokens"], 40);

    server.handle.shutdown().await;
}

#[tokio::test]
async fn repeated_question_replays_from_cache() {
    let server = TestServer::spawn(
        DispatchSettings::default(),
        Some(vec![answer(
            "Three agencies reported.\n\n<!--suggestions:[\"Which agency is late?\"]-->",
        )]),
    )
    .await;
    let question = json!({"message": "How many agencies reported?", "current_page": "/reports", "session_id": "a"});

    let first = ndjson(server.chat(question.clone()).await).await;
    assert_eq!(first.last().unwrap()["type"], "done");

    let second = ndjson(server.chat(question).await).await;
    assert_eq!(second[0]["cached"], true);
    let done = second.last().unwrap();
    assert_eq!(done["cached"], true);
    assert_eq!(done["usage"]["input_tokens"], 0);
    assert_eq!(done["suggestions"][0], "Which agency is late?");
    assert_eq!(server.calls(), 1);

    server.handle.shutdown().await;
}

#[tokio::test]
async fn exhausted_session_gets_429() {
    let mut settings = DispatchSettings::default();
    settings.rate_limit.max_requests = 2;
    let server = TestServer::spawn(settings, Some(vec![answer("one"), answer("two")])).await;

    for message in ["first question", "second question"] {
        let response = server.chat(json!({"message": message, "session_id": "busy"})).await;
        assert_eq!(response.status(), 200);
        response.text().await.unwrap();
    }

    let rejected = server
        .chat(json!({"message": "third question", "session_id": "busy"}))
        .await;
    assert_eq!(rejected.status(), 429);
    assert_eq!(rejected.headers()["x-ratelimit-remaining"], "0");
    let retry_after: u64 = rejected.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0);
    let body: Value = rejected.json().await.unwrap();
    assert_eq!(body["error"], "rate limit exceeded");
    assert_eq!(body["remaining"], 0);
    assert_eq!(server.calls(), 2);

    server.handle.shutdown().await;
}

#[tokio::test]
async fn missing_provider_is_503() {
    let server = TestServer::spawn(DispatchSettings::default(), None).await;

    let response = server.chat(json!({"message": "hello there"})).await;
    assert_eq!(response.status(), 503);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());

    let health = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(health.status(), 503);
    let body: Value = health.json().await.unwrap();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["provider_configured"], false);

    server.handle.shutdown().await;
}

#[tokio::test]
async fn empty_message_is_400() {
    let server = TestServer::spawn(DispatchSettings::default(), Some(vec![])).await;

    let response = server.chat(json!({"message": "   "})).await;
    assert_eq!(response.status(), 400);
    assert_eq!(server.calls(), 0);

    server.handle.shutdown().await;
}

#[tokio::test]
async fn health_reports_pipeline_state() {
    let server = TestServer::spawn(DispatchSettings::default(), Some(vec![answer("fine")])).await;
    ndjson(server.chat(json!({"message": "Is the feed healthy?", "session_id": "h"})).await).await;

    let response = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["provider_configured"], true);
    assert_eq!(body["cache_size"], 1);
    assert_eq!(body["tracked_sessions"], 1);
    assert_eq!(body["metrics"]["requests"], 1);
    assert_eq!(body["metrics"]["completed"], 1);

    server.handle.shutdown().await;
}

#[tokio::test]
async fn usage_summarizes_the_ledger() {
    let server = TestServer::spawn(DispatchSettings::default(), Some(vec![answer("fine")])).await;
    let question = json!({"message": "Is the feed healthy?", "session_id": "u"});
    ndjson(server.chat(question.clone()).await).await;
    ndjson(server.chat(question).await).await;

    let response = server
        .client
        .get(server.url("/api/usage?hours=5000"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["hours"], 2160);
    assert_eq!(body["summary"]["total_answers"], 2);
    assert_eq!(body["summary"]["cached_answers"], 1);
    assert_eq!(body["summary"]["output_tokens"], 40);
    assert!(body["budget"]["spend_usd"].as_f64().unwrap() > 0.0);
    assert!(body["budget"]["tier_cap"].is_null());

    server.handle.shutdown().await;
}
