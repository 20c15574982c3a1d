use async_trait::async_trait;
use bytes::Bytes;
use llm_relay::canonical::{Choice, FinishReason, Message, RateLimitInfo, Role, Usage};
use llm_relay::config::ModelRoute;
use llm_relay::gateway::{INTERACTION_HEADER, TENANT_HEADER};
use llm_relay::stream::spawn_bounded;
use llm_relay::{
    build_router, ApiError, ApiFormat, AppState, CanonicalEvent, CanonicalRequest,
    CanonicalResponse, CodecRegistry, Gateway, GatewayError, MemoryStore, ModelInfo, ModelRouter,
    Provider, ProviderRegistry, ProviderStream, Result,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::assert_ok;

const RAW_OPENAI_BODY: &str = r#"{"id":"chatcmpl-upstream","object":"chat.completion","created":1,"model":"gpt-up","choices":[{"index":0,"message":{"role":"assistant","content":"verbatim"},"finish_reason":"stop"}],"system_fingerprint":"fp_kept"}"#;

#[derive(Clone)]
enum Reply {
    Text(&'static str),
    Raw(&'static str),
    Error(ApiError),
    Events(Vec<CanonicalEvent>),
    Hang,
    /// What an HTTP upstream reports when its client deadline fires
    Deadline,
}

/// In-process upstream that answers every call the same way.
struct ScriptedProvider {
    name: String,
    format: ApiFormat,
    reply: Reply,
    seen: Mutex<Vec<CanonicalRequest>>,
}

impl ScriptedProvider {
    fn new(name: &str, format: ApiFormat, reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            format,
            reply,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<CanonicalRequest> {
        self.seen.lock().unwrap().clone()
    }

    fn response(&self, text: &str) -> CanonicalResponse {
        CanonicalResponse {
            id: "upstream-1".to_string(),
            model: "upstream-model".to_string(),
            provider_model: None,
            choices: vec![Choice {
                index: 0,
                message: Message::text(Role::Assistant, text),
                finish_reason: Some(FinishReason::Stop),
            }],
            usage: Some(Usage::new(7, 3)),
            rate_limit: Some(RateLimitInfo {
                remaining_requests: Some("99".to_string()),
                ..Default::default()
            }),
            source_api: self.format,
            raw_response: None,
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> ApiFormat {
        self.format
    }

    async fn complete(&self, request: &CanonicalRequest) -> Result<CanonicalResponse> {
        self.seen.lock().unwrap().push(request.clone());
        match self.reply {
            Reply::Text(text) => Ok(self.response(text)),
            Reply::Raw(raw) => {
                let mut response = self.response("verbatim");
                response.raw_response = Some(Bytes::from_static(raw.as_bytes()));
                Ok(response)
            }
            Reply::Error(ref error) => Err(GatewayError::Upstream(error.clone())),
            Reply::Events(_) => Err(GatewayError::provider("streaming only")),
            Reply::Hang => std::future::pending().await,
            Reply::Deadline => Err(GatewayError::Cancelled),
        }
    }

    async fn stream(&self, request: &CanonicalRequest) -> Result<ProviderStream> {
        self.seen.lock().unwrap().push(request.clone());
        match self.reply {
            Reply::Events(ref events) => Ok(ProviderStream {
                events: spawn_bounded(futures::stream::iter(events.clone())),
                rate_limit: None,
            }),
            Reply::Error(ref error) => Err(GatewayError::Upstream(error.clone())),
            Reply::Deadline => Err(GatewayError::Cancelled),
            _ => Err(GatewayError::provider("not a streaming script")),
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            id: format!("{}-listed", self.name),
            owned_by: self.name.clone(),
        }])
    }
}

fn gateway(providers: Vec<Arc<ScriptedProvider>>, routes: &[(&str, &str, &str)]) -> Gateway {
    let mut registry = ProviderRegistry::new();
    let default = providers[0].name.clone();
    for provider in providers {
        registry.register(provider);
    }
    let routes: HashMap<String, ModelRoute> = routes
        .iter()
        .map(|(alias, provider, model)| {
            (
                alias.to_string(),
                ModelRoute {
                    provider: provider.to_string(),
                    model: Some(model.to_string()),
                },
            )
        })
        .collect();

    Gateway::new(
        CodecRegistry::with_defaults(),
        registry,
        ModelRouter::new(routes, default),
        Arc::new(MemoryStore::new()),
    )
}

async fn serve(gateway: Gateway) -> String {
    let app = build_router(Arc::new(AppState::new(gateway)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Records are written after the reply; poll until `ready` holds.
async fn wait_for(client: &reqwest::Client, url: &str, ready: impl Fn(&Value) -> bool) -> Value {
    for _ in 0..100 {
        let resp = assert_ok!(client.get(url).send().await);
        if resp.status().is_success() {
            let body: Value = assert_ok!(resp.json().await);
            if ready(&body) {
                return body;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{url} never became ready");
}

fn interaction_id(resp: &reqwest::Response) -> String {
    resp.headers()[INTERACTION_HEADER]
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_openai_client_through_anthropic_upstream() {
    let claude = ScriptedProvider::new("claude", ApiFormat::Anthropic, Reply::Text("Hi there"));
    let base = serve(gateway(
        vec![claude.clone()],
        &[("sonnet", "claude", "claude-sonnet-upstream")],
    ))
    .await;

    let resp = assert_ok!(
        reqwest::Client::new()
            .post(format!("{base}/v1/chat/completions"))
            .json(&json!({
                "model": "sonnet",
                "messages": [
                    {"role": "system", "content": "Be brief"},
                    {"role": "user", "content": "hello"}
                ]
            }))
            .send()
            .await
    );
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-ratelimit-remaining-requests"], "99");

    let body: Value = assert_ok!(resp.json().await);
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "sonnet");
    assert_eq!(body["choices"][0]["message"]["content"], "Hi there");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["prompt_tokens"], 7);

    let seen = claude.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].model, "claude-sonnet-upstream");
    assert_eq!(seen[0].source_api, ApiFormat::OpenAi);
    assert_eq!(seen[0].messages[0].role, Role::System);
}

#[tokio::test]
async fn test_anthropic_client_through_openai_upstream() {
    let openai = ScriptedProvider::new("openai", ApiFormat::OpenAi, Reply::Text("Bonjour"));
    let base = serve(gateway(vec![openai.clone()], &[])).await;

    let resp = assert_ok!(
        reqwest::Client::new()
            .post(format!("{base}/v1/messages"))
            .json(&json!({
                "model": "gpt-4o",
                "max_tokens": 64,
                "system": "Answer in French",
                "messages": [{"role": "user", "content": "hello"}]
            }))
            .send()
            .await
    );
    assert_eq!(resp.status(), 200);

    let body: Value = assert_ok!(resp.json().await);
    assert_eq!(body["type"], "message");
    assert_eq!(body["model"], "gpt-4o");
    assert_eq!(body["content"][0]["type"], "text");
    assert_eq!(body["content"][0]["text"], "Bonjour");
    assert_eq!(body["stop_reason"], "end_turn");
    assert_eq!(body["usage"]["input_tokens"], 7);

    let seen = openai.seen();
    assert_eq!(seen[0].system_prompt.as_deref(), Some("Answer in French"));
    assert_eq!(seen[0].max_tokens, Some(64));
}

#[tokio::test]
async fn test_same_format_passes_bytes_through() {
    let openai = ScriptedProvider::new("openai", ApiFormat::OpenAi, Reply::Raw(RAW_OPENAI_BODY));
    let base = serve(gateway(vec![openai], &[])).await;

    let resp = assert_ok!(
        reqwest::Client::new()
            .post(format!("{base}/v1/chat/completions"))
            .json(&json!({
                "model": "gpt-4o",
                "messages": [{"role": "user", "content": "hello"}]
            }))
            .send()
            .await
    );
    assert_eq!(resp.status(), 200);
    let bytes = assert_ok!(resp.bytes().await);
    assert_eq!(bytes.as_ref(), RAW_OPENAI_BODY.as_bytes());
}

#[tokio::test]
async fn test_raw_request_kept_only_when_model_unchanged() {
    let openai = ScriptedProvider::new("openai", ApiFormat::OpenAi, Reply::Text("ok"));
    let base = serve(gateway(vec![openai.clone()], &[("fast", "openai", "gpt-up")])).await;
    let client = reqwest::Client::new();

    for model in ["gpt-4o", "fast"] {
        let resp = assert_ok!(
            client
                .post(format!("{base}/v1/chat/completions"))
                .json(&json!({
                    "model": model,
                    "messages": [{"role": "user", "content": "hello"}]
                }))
                .send()
                .await
        );
        assert_eq!(resp.status(), 200);
    }

    let seen = openai.seen();
    let raw: Value = serde_json::from_slice(seen[0].raw_request.as_ref().unwrap()).unwrap();
    assert_eq!(raw["model"], "gpt-4o");
    assert_eq!(seen[1].model, "gpt-up");
    assert!(seen[1].raw_request.is_none());
}

#[tokio::test]
async fn test_openai_stream_ends_with_one_done() {
    let events = vec![
        CanonicalEvent::content("Hel"),
        CanonicalEvent::content("lo"),
        CanonicalEvent::finish(FinishReason::Stop),
        CanonicalEvent::usage(Usage::new(4, 2)),
    ];
    let claude = ScriptedProvider::new("claude", ApiFormat::Anthropic, Reply::Events(events));
    let base = serve(gateway(vec![claude], &[])).await;
    let client = reqwest::Client::new();

    let resp = assert_ok!(
        client
            .post(format!("{base}/v1/chat/completions"))
            .json(&json!({
                "model": "claude-sonnet",
                "stream": true,
                "messages": [{"role": "user", "content": "hello"}]
            }))
            .send()
            .await
    );
    assert_eq!(resp.status(), 200);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    let id = interaction_id(&resp);

    let text = assert_ok!(resp.text().await);
    assert_eq!(text.matches("[DONE]").count(), 1);
    assert!(text.trim_end().ends_with("[DONE]"));
    assert!(text.contains("Hel"));
    assert!(text.contains("chat.completion.chunk"));

    let record = wait_for(&client, &format!("{base}/v1/interactions/{id}"), |v| {
        v["events"].as_array().is_some_and(|e| e.len() == 2)
    })
    .await;
    assert_eq!(record["interaction"]["status"], "completed");
    assert_eq!(record["interaction"]["stream"], true);
    assert_eq!(
        record["interaction"]["response"]["choices"][0]["message"]["content"],
        "Hello"
    );
}

#[tokio::test]
async fn test_anthropic_stream_has_single_message_stop() {
    let events = vec![
        CanonicalEvent::content("Hi"),
        CanonicalEvent::finish(FinishReason::Stop),
    ];
    let openai = ScriptedProvider::new("openai", ApiFormat::OpenAi, Reply::Events(events));
    let base = serve(gateway(vec![openai], &[])).await;

    let resp = assert_ok!(
        reqwest::Client::new()
            .post(format!("{base}/v1/messages"))
            .json(&json!({
                "model": "gpt-4o",
                "max_tokens": 32,
                "stream": true,
                "messages": [{"role": "user", "content": "hello"}]
            }))
            .send()
            .await
    );
    assert_eq!(resp.status(), 200);

    let text = assert_ok!(resp.text().await);
    assert_eq!(text.matches("message_stop").count(), 2, "event line and payload type");
    assert!(text.contains("message_start"));
    assert!(!text.contains("[DONE]"));
}

#[tokio::test]
async fn test_upstream_error_rendered_for_client() {
    let error = ApiError::from_anthropic(
        Some(429),
        br#"{"type":"error","error":{"type":"rate_limit_error","message":"Number of requests has exceeded your rate limit"}}"#,
    );
    let claude = ScriptedProvider::new("claude", ApiFormat::Anthropic, Reply::Error(error));
    let base = serve(gateway(vec![claude], &[])).await;
    let client = reqwest::Client::new();

    let resp = assert_ok!(
        client
            .post(format!("{base}/v1/chat/completions"))
            .json(&json!({
                "model": "claude-sonnet",
                "messages": [{"role": "user", "content": "hello"}]
            }))
            .send()
            .await
    );
    assert_eq!(resp.status(), 429);
    let id = interaction_id(&resp);

    let body: Value = assert_ok!(resp.json().await);
    assert_eq!(body["error"]["type"], "rate_limit_error");
    assert!(body.get("type").is_none(), "not Anthropic's envelope");

    let record = wait_for(&client, &format!("{base}/v1/interactions/{id}"), |v| {
        v["events"].as_array().is_some_and(|e| e.len() == 2)
    })
    .await;
    assert_eq!(record["interaction"]["status"], "failed");
    assert_eq!(record["events"][1]["kind"], "failed");
}

#[tokio::test]
async fn test_malformed_request_rejected_before_upstream() {
    let openai = ScriptedProvider::new("openai", ApiFormat::OpenAi, Reply::Text("unused"));
    let base = serve(gateway(vec![openai.clone()], &[])).await;

    let resp = assert_ok!(
        reqwest::Client::new()
            .post(format!("{base}/v1/messages"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
    );
    assert_eq!(resp.status(), 400);
    let body: Value = assert_ok!(resp.json().await);
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert!(openai.seen().is_empty());
}

#[tokio::test]
async fn test_upstream_timeout_is_cancellation() {
    let slow = ScriptedProvider::new("slow", ApiFormat::OpenAi, Reply::Hang);
    let gateway = gateway(vec![slow], &[])
        .with_timeouts(Duration::from_millis(100), Duration::from_secs(1));
    let base = serve(gateway).await;
    let client = reqwest::Client::new();

    let resp = assert_ok!(
        client
            .post(format!("{base}/v1/chat/completions"))
            .json(&json!({
                "model": "gpt-4o",
                "messages": [{"role": "user", "content": "hello"}]
            }))
            .send()
            .await
    );
    assert_eq!(resp.status(), 500);
    let id = interaction_id(&resp);
    let body: Value = assert_ok!(resp.json().await);
    assert_eq!(body["error"]["type"], "server_error");
    assert_eq!(body["error"]["message"], "Request cancelled");
    assert!(body["error"]["code"].is_null());

    let record = wait_for(&client, &format!("{base}/v1/interactions/{id}"), |v| {
        v["events"].as_array().is_some_and(|e| e.len() == 2)
    })
    .await;
    assert_eq!(record["interaction"]["status"], "cancelled");
}

#[tokio::test]
async fn test_upstream_client_deadline_is_cancellation() {
    let upstream = ScriptedProvider::new("slow", ApiFormat::Anthropic, Reply::Deadline);
    let base = serve(gateway(vec![upstream], &[])).await;
    let client = reqwest::Client::new();

    for stream in [false, true] {
        let resp = assert_ok!(
            client
                .post(format!("{base}/v1/messages"))
                .json(&json!({
                    "model": "claude-sonnet",
                    "max_tokens": 64,
                    "stream": stream,
                    "messages": [{"role": "user", "content": "hello"}]
                }))
                .send()
                .await
        );
        assert_eq!(resp.status(), 500);
        let id = interaction_id(&resp);
        let body: Value = assert_ok!(resp.json().await);
        assert_eq!(body["error"]["type"], "api_error");
        assert_eq!(body["error"]["message"], "Request cancelled");

        let record = wait_for(&client, &format!("{base}/v1/interactions/{id}"), |v| {
            v["events"].as_array().is_some_and(|e| e.len() == 2)
        })
        .await;
        assert_eq!(record["interaction"]["status"], "cancelled");
    }
}

#[tokio::test]
async fn test_responses_thread_replays_history() {
    let openai = ScriptedProvider::new(
        "openai",
        ApiFormat::OpenAi,
        Reply::Text("Nice to meet you, Ada"),
    );
    let base = serve(gateway(vec![openai.clone()], &[])).await;
    let client = reqwest::Client::new();

    let first: Value = assert_ok!(
        assert_ok!(
            client
                .post(format!("{base}/v1/responses"))
                .json(&json!({"model": "gpt-4o", "input": "My name is Ada"}))
                .send()
                .await
        )
        .json()
        .await
    );
    assert_eq!(first["object"], "response");
    assert_eq!(first["status"], "completed");
    assert_eq!(first["output"][0]["type"], "message");
    assert_eq!(first["output"][0]["content"][0]["text"], "Nice to meet you, Ada");
    let first_id = first["id"].as_str().unwrap().to_string();
    assert!(first_id.starts_with("resp_"));

    let stored = wait_for(&client, &format!("{base}/v1/responses/{first_id}"), |_| true).await;
    assert_eq!(stored["id"], first_id.as_str());

    let second = assert_ok!(
        client
            .post(format!("{base}/v1/responses"))
            .json(&json!({
                "model": "gpt-4o",
                "input": "What is my name?",
                "previous_response_id": first_id,
            }))
            .send()
            .await
    );
    assert_eq!(second.status(), 200);
    let second: Value = assert_ok!(second.json().await);
    assert_eq!(second["previous_response_id"], first_id.as_str());

    let seen = openai.seen();
    assert_eq!(seen.len(), 2);
    let replayed: Vec<(Role, String)> = seen[1]
        .messages
        .iter()
        .map(|m| (m.role, m.content.as_text()))
        .collect();
    assert_eq!(
        replayed,
        vec![
            (Role::User, "My name is Ada".to_string()),
            (Role::Assistant, "Nice to meet you, Ada".to_string()),
            (Role::User, "What is my name?".to_string()),
        ]
    );
}

/// Post one Responses turn and wait until it can serve as a parent.
async fn respond_turn(
    client: &reqwest::Client,
    base: &str,
    input: &str,
    previous: Option<&str>,
) -> String {
    let mut body = json!({"model": "gpt-4o", "input": input});
    if let Some(previous) = previous {
        body["previous_response_id"] = json!(previous);
    }
    let reply: Value = assert_ok!(
        assert_ok!(
            client
                .post(format!("{base}/v1/responses"))
                .json(&body)
                .send()
                .await
        )
        .json()
        .await
    );
    let id = reply["id"].as_str().unwrap().to_string();
    wait_for(client, &format!("{base}/v1/responses/{id}"), |_| true).await;
    id
}

#[tokio::test]
async fn test_responses_branch_replays_only_its_ancestors() {
    let openai = ScriptedProvider::new("openai", ApiFormat::OpenAi, Reply::Text("ok"));
    let base = serve(gateway(vec![openai.clone()], &[])).await;
    let client = reqwest::Client::new();

    let root = respond_turn(&client, &base, "turn1", None).await;
    let second = respond_turn(&client, &base, "turn2", Some(&root)).await;
    respond_turn(&client, &base, "branch", Some(&root)).await;
    respond_turn(&client, &base, "turn3", Some(&second)).await;

    let seen = openai.seen();
    assert_eq!(seen.len(), 4);
    let texts = |request: &CanonicalRequest| -> Vec<String> {
        request.messages.iter().map(|m| m.content.as_text()).collect()
    };
    assert_eq!(texts(&seen[2]), vec!["turn1", "ok", "branch"]);
    assert_eq!(
        texts(&seen[3]),
        vec!["turn1", "ok", "turn2", "ok", "turn3"]
    );
}

#[tokio::test]
async fn test_responses_unknown_parent_is_404() {
    let openai = ScriptedProvider::new("openai", ApiFormat::OpenAi, Reply::Text("unused"));
    let base = serve(gateway(vec![openai.clone()], &[])).await;

    let resp = assert_ok!(
        reqwest::Client::new()
            .post(format!("{base}/v1/responses"))
            .json(&json!({
                "model": "gpt-4o",
                "input": "hello",
                "previous_response_id": "resp_missing",
            }))
            .send()
            .await
    );
    assert_eq!(resp.status(), 404);
    let body: Value = assert_ok!(resp.json().await);
    assert_eq!(body["error"]["param"], "previous_response_id");
    assert!(openai.seen().is_empty());
}

#[tokio::test]
async fn test_responses_store_false_skips_record() {
    let openai = ScriptedProvider::new("openai", ApiFormat::OpenAi, Reply::Text("ok"));
    let base = serve(gateway(vec![openai], &[])).await;
    let client = reqwest::Client::new();

    let resp = assert_ok!(
        client
            .post(format!("{base}/v1/responses"))
            .json(&json!({"model": "gpt-4o", "input": "hello", "store": false}))
            .send()
            .await
    );
    let id = interaction_id(&resp);
    let body: Value = assert_ok!(resp.json().await);
    let response_id = body["id"].as_str().unwrap().to_string();

    wait_for(&client, &format!("{base}/v1/interactions/{id}"), |v| {
        v["events"].as_array().is_some_and(|e| e.len() == 2)
    })
    .await;
    let lookup = assert_ok!(
        client
            .get(format!("{base}/v1/responses/{response_id}"))
            .send()
            .await
    );
    assert_eq!(lookup.status(), 404);
}

#[tokio::test]
async fn test_interactions_are_tenant_scoped() {
    let openai = ScriptedProvider::new("openai", ApiFormat::OpenAi, Reply::Text("ok"));
    let base = serve(gateway(vec![openai], &[])).await;
    let client = reqwest::Client::new();

    let resp = assert_ok!(
        client
            .post(format!("{base}/v1/chat/completions"))
            .header(TENANT_HEADER, "acme")
            .json(&json!({
                "model": "gpt-4o",
                "messages": [{"role": "user", "content": "hello"}]
            }))
            .send()
            .await
    );
    let id = interaction_id(&resp);

    for _ in 0..100 {
        let own = assert_ok!(
            client
                .get(format!("{base}/v1/interactions/{id}"))
                .header(TENANT_HEADER, "acme")
                .send()
                .await
        );
        if own.status() == 200 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let other = assert_ok!(
        client
            .get(format!("{base}/v1/interactions/{id}"))
            .header(TENANT_HEADER, "globex")
            .send()
            .await
    );
    assert_eq!(other.status(), 404);
}

#[tokio::test]
async fn test_count_tokens_estimates_without_native_endpoint() {
    let openai = ScriptedProvider::new("openai", ApiFormat::OpenAi, Reply::Text("unused"));
    let base = serve(gateway(vec![openai], &[])).await;

    let resp = assert_ok!(
        reqwest::Client::new()
            .post(format!("{base}/v1/messages/count_tokens"))
            .json(&json!({
                "model": "gpt-4o",
                "messages": [{"role": "user", "content": "hello world!"}]
            }))
            .send()
            .await
    );
    assert_eq!(resp.status(), 200);
    let body: Value = assert_ok!(resp.json().await);
    assert_eq!(body["input_tokens"], 3);
}

#[tokio::test]
async fn test_models_merge_routes_and_providers() {
    let openai = ScriptedProvider::new("openai", ApiFormat::OpenAi, Reply::Text("unused"));
    let claude = ScriptedProvider::new("claude", ApiFormat::Anthropic, Reply::Text("unused"));
    let base = serve(gateway(vec![openai, claude], &[("fast", "openai", "gpt-4o-mini")])).await;

    let body: Value = assert_ok!(
        assert_ok!(reqwest::Client::new().get(format!("{base}/v1/models")).send().await)
            .json()
            .await
    );
    assert_eq!(body["object"], "list");
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids[0], "fast");
    assert!(ids.contains(&"openai-listed"));
    assert!(ids.contains(&"claude-listed"));
}

#[tokio::test]
async fn test_health() {
    let openai = ScriptedProvider::new("openai", ApiFormat::OpenAi, Reply::Text("unused"));
    let base = serve(gateway(vec![openai], &[])).await;

    let body: Value = assert_ok!(
        assert_ok!(reqwest::Client::new().get(format!("{base}/health")).send().await)
            .json()
            .await
    );
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}
