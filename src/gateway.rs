//! Request flow shared by every frontdoor: decode, route, call upstream,
//! encode for the client, record the interaction.
//!
//! Upstream calls run on their own task so a client disconnect is observed
//! (the upstream call is dropped) while the interaction record is still
//! written. Records are written under their own short timeout.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use serde_json::json;
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use crate::canonical::{
    ApiFormat, CanonicalRequest, CanonicalResponse, Content, ContentPart, RateLimitInfo,
};
use crate::codec::{ClientCodec, CodecRegistry, StreamContext};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::provider::{ModelInfo, Provider, ProviderRegistry};
use crate::ratelimit;
use crate::responses::{response_object, ResponseObject, ThreadOptions};
use crate::routing::ModelRouter;
use crate::store::{
    new_id, Interaction, InteractionEvent, InteractionStatus, Store, StoredResponse,
    DEFAULT_TENANT,
};
use crate::stream::{StreamStatus, StreamTranslator};
use crate::taxonomy::ApiError;

pub const TENANT_HEADER: &str = "x-tenant-id";
/// Set on every routed reply; look the record up at `/v1/interactions/{id}`.
pub const INTERACTION_HEADER: &str = "x-interaction-id";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Gateway {
    codecs: CodecRegistry,
    providers: ProviderRegistry,
    router: ModelRouter,
    store: Arc<dyn Store>,
    request_timeout: Duration,
    persist_timeout: Duration,
}

/// How a non-streaming upstream call ended.
#[derive(Debug, Clone)]
enum CallOutcome {
    Completed {
        response: CanonicalResponse,
        /// Responses API body, rendered once so the stored copy matches
        rendered: Option<ResponseObject>,
    },
    Failed(ApiError),
    /// Client went away or the request deadline passed
    Cancelled,
}

/// Responses API threading state for one request.
#[derive(Debug, Clone)]
struct Thread {
    options: ThreadOptions,
    /// Conversation of the parent response
    conversation_id: Option<String>,
    /// Input of this turn, without replayed history
    new_messages: Vec<crate::canonical::Message>,
}

impl Gateway {
    pub fn new(
        codecs: CodecRegistry,
        providers: ProviderRegistry,
        router: ModelRouter,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            codecs,
            providers,
            router,
            store,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            persist_timeout: DEFAULT_PERSIST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeouts(mut self, request: Duration, persist: Duration) -> Self {
        self.request_timeout = request;
        self.persist_timeout = persist;
        self
    }

    /// Build codecs, providers and routes from config.
    pub fn from_config(config: &GatewayConfig, store: Arc<dyn Store>) -> Result<Self> {
        config.validate()?;
        let codecs = CodecRegistry::with_defaults();
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        let providers = ProviderRegistry::from_config(config, &codecs, client)?;
        let router = ModelRouter::from_config(config);

        Ok(Self::new(codecs, providers, router, store)
            .with_timeouts(config.request_timeout(), config.persist_timeout()))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Serve one completion request arriving in `format`.
    pub async fn handle(&self, format: ApiFormat, headers: &HeaderMap, body: Bytes) -> Response {
        let Some(codec) = self.codecs.client(format) else {
            let error = ApiError::server(format!("no codec registered for {format}"));
            let (status, body) = error.encode_for(format);
            return (status, Json(body)).into_response();
        };
        let tenant = tenant_id(headers);

        let mut request = match codec.decode_request(&body) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(format = %format, error = %e, "Rejected request");
                return error_response(codec.as_ref(), &e.to_api_error());
            }
        };
        request.user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let thread = if format == ApiFormat::Responses {
            match self.open_thread(&tenant, &body, &mut request).await {
                Ok(thread) => Some(thread),
                Err(error) => return error_response(codec.as_ref(), &error),
            }
        } else {
            None
        };

        let route = self.router.resolve(&request.model);
        let Some(provider) = self.providers.get(&route.provider) else {
            let error =
                ApiError::server(format!("provider '{}' is not configured", route.provider));
            return error_response(codec.as_ref(), &error);
        };
        let client_model = std::mem::replace(&mut request.model, route.upstream_model.clone());
        if request.model != client_model {
            // the client's bytes name the alias, not the upstream model
            request.raw_request = None;
        }

        tracing::info!(
            format = %format,
            model = %client_model,
            provider = %route.provider,
            upstream_model = %route.upstream_model,
            stream = request.stream,
            messages = request.messages.len(),
            "Request"
        );

        let mut interaction = Interaction::start(tenant, provider.name(), request.clone());
        interaction.model = client_model.clone();
        let recorder = Recorder {
            store: self.store.clone(),
            interaction,
            thread,
            timeout: self.persist_timeout,
        };

        let interaction_id = recorder.interaction.id.clone();
        let mut response = if request.stream {
            self.stream(codec, provider, request, client_model, recorder)
                .await
        } else {
            self.complete(codec, provider, request, client_model, recorder)
                .await
        };
        if let Ok(value) = HeaderValue::from_str(&interaction_id) {
            response.headers_mut().insert(INTERACTION_HEADER, value);
        }
        response
    }

    /// Walk the parent chain and prepend its turns, oldest first. Only the
    /// ancestors of the parent are replayed, so sibling branches stay apart.
    async fn open_thread(
        &self,
        tenant: &str,
        body: &[u8],
        request: &mut CanonicalRequest,
    ) -> std::result::Result<Thread, ApiError> {
        let options = ThreadOptions::from_body(body);
        let new_messages = request.messages.clone();
        let mut conversation_id = None;
        let mut turns = Vec::new();
        let mut visited = HashSet::new();
        let mut next = options.previous_response_id.clone();

        while let Some(id) = next {
            if !visited.insert(id.clone()) {
                return Err(ApiError::invalid_request(format!(
                    "Response '{id}' appears twice in its own thread"
                ))
                .with_param("previous_response_id"));
            }
            let stored = self
                .store
                .get_response(tenant, &id)
                .await
                .map_err(|e| e.to_api_error())?
                .ok_or_else(|| {
                    ApiError::not_found(format!("Previous response '{id}' not found"))
                        .with_param("previous_response_id")
                })?;
            conversation_id.get_or_insert(stored.conversation_id);
            next = stored.previous_response_id;
            turns.push(stored.messages);
        }

        if !turns.is_empty() {
            let mut messages: Vec<_> = turns.into_iter().rev().flatten().collect();
            messages.append(&mut request.messages);
            request.messages = messages;
            request.raw_request = None;
        }

        Ok(Thread {
            options,
            conversation_id,
            new_messages,
        })
    }

    async fn complete(
        &self,
        codec: Arc<dyn ClientCodec>,
        provider: Arc<dyn Provider>,
        request: CanonicalRequest,
        client_model: String,
        recorder: Recorder,
    ) -> Response {
        let format = codec.format();
        let timeout = self.request_timeout;
        let previous_response_id = recorder
            .thread
            .as_ref()
            .and_then(|t| t.options.previous_response_id.clone());
        let render = recorder.thread.is_some();
        let upstream = provider.clone();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut tx = tx;
            let result = tokio::select! {
                biased;
                () = tx.closed() => None,
                result = tokio::time::timeout(timeout, upstream.complete(&request)) => Some(result),
            };

            let outcome = match result {
                None => {
                    tracing::debug!("Client disconnected before upstream replied");
                    CallOutcome::Cancelled
                }
                Some(Err(_)) => {
                    tracing::warn!(provider = %upstream.name(), ?timeout, "Upstream request timed out");
                    CallOutcome::Cancelled
                }
                Some(Ok(Err(GatewayError::Cancelled))) => CallOutcome::Cancelled,
                Some(Ok(Err(e))) => CallOutcome::Failed(e.to_api_error()),
                Some(Ok(Ok(mut response))) => {
                    response.provider_model.get_or_insert_with(|| request.model.clone());
                    response.model = client_model;
                    if format == ApiFormat::Responses {
                        response.id = new_id("resp");
                    }
                    let rendered =
                        render.then(|| response_object(&response, previous_response_id.as_deref()));
                    CallOutcome::Completed { response, rendered }
                }
            };

            if tx.send(outcome.clone()).is_err() {
                tracing::debug!("Client went away before the response was written");
            }
            recorder.finish_call(outcome).await;
        });

        let Ok(outcome) = rx.await else {
            return error_response(
                codec.as_ref(),
                &ApiError::server("upstream task ended without a result"),
            );
        };

        match outcome {
            CallOutcome::Completed { response, rendered } => {
                self.respond(codec.as_ref(), provider.format(), &response, rendered)
            }
            CallOutcome::Failed(error) => {
                tracing::warn!(provider = %provider.name(), error = %error, "Upstream call failed");
                error_response(codec.as_ref(), &error)
            }
            CallOutcome::Cancelled => cancelled_response(codec.as_ref()),
        }
    }

    /// Encode a complete response, forwarding upstream bytes untouched when
    /// the client and the vendor speak the same format.
    fn respond(
        &self,
        codec: &dyn ClientCodec,
        provider_format: ApiFormat,
        response: &CanonicalResponse,
        rendered: Option<ResponseObject>,
    ) -> Response {
        let passthrough = response
            .raw_response
            .clone()
            .filter(|_| codec.format() == provider_format);

        let body: Result<Vec<u8>> = match (passthrough, rendered) {
            (Some(raw), _) => {
                tracing::debug!(format = %provider_format, "Pass-through response");
                Ok(raw.to_vec())
            }
            (None, Some(object)) => serde_json::to_vec(&object).map_err(Into::into),
            (None, None) => codec.encode_response(response),
        };

        match body {
            Ok(body) => {
                let mut http = (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
                    Body::from(body),
                )
                    .into_response();
                relay_rate_limit(response.rate_limit.as_ref(), http.headers_mut());
                http
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode response");
                error_response(codec, &e.to_api_error())
            }
        }
    }

    async fn stream(
        &self,
        codec: Arc<dyn ClientCodec>,
        provider: Arc<dyn Provider>,
        request: CanonicalRequest,
        client_model: String,
        recorder: Recorder,
    ) -> Response {
        let format = codec.format();
        let started = Instant::now();

        let upstream =
            match tokio::time::timeout(self.request_timeout, provider.stream(&request)).await {
                Ok(Ok(upstream)) => upstream,
                Ok(Err(GatewayError::Cancelled)) | Err(_) => {
                    tracing::warn!(provider = %provider.name(), "Upstream stream did not open in time");
                    tokio::spawn(recorder.finish(InteractionStatus::Cancelled, None, None, None));
                    return cancelled_response(codec.as_ref());
                }
                Ok(Err(e)) => {
                    let error = e.to_api_error();
                    tracing::warn!(provider = %provider.name(), error = %error, "Upstream stream failed to open");
                    tokio::spawn(recorder.finish(
                        InteractionStatus::Failed,
                        None,
                        Some(error.clone()),
                        None,
                    ));
                    return error_response(codec.as_ref(), &error);
                }
            };

        let remaining = self.request_timeout.saturating_sub(started.elapsed());
        let context = StreamContext::new(stream_id(format), client_model);
        let translator =
            StreamTranslator::new(codec.stream_encoder(context.clone()), context, format);
        let events = upstream.events;
        let rate_limit = upstream.rate_limit;
        let upstream_model = request.model;
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let outcome = translator.run(events, tx, remaining).await;
            let mut response = outcome.response;
            response.provider_model.get_or_insert(upstream_model);

            tracing::info!(
                id = %response.id,
                status = outcome.status.as_str(),
                "Stream finished"
            );
            let (status, error) = match outcome.status {
                StreamStatus::Completed => (InteractionStatus::Completed, None),
                StreamStatus::Failed(error) => (InteractionStatus::Failed, Some(error)),
                StreamStatus::Cancelled => (InteractionStatus::Cancelled, None),
            };
            recorder.finish(status, Some(response), error, None).await;
        });

        let frames =
            ReceiverStream::new(rx).map(|frame| Ok::<_, Infallible>(frame.into_axum_event()));
        let mut http = Sse::new(frames)
            .keep_alive(KeepAlive::default())
            .into_response();
        relay_rate_limit(rate_limit.as_ref(), http.headers_mut());
        http
    }

    /// `POST /v1/messages/count_tokens`: the vendor's own count when it has
    /// one, else an estimate.
    pub async fn count_tokens(&self, headers: &HeaderMap, body: Bytes) -> Response {
        let Some(codec) = self.codecs.client(ApiFormat::Anthropic) else {
            let (status, body) =
                ApiError::server("no Anthropic codec registered").encode_for(ApiFormat::Anthropic);
            return (status, Json(body)).into_response();
        };

        let mut request = match codec.decode_request(&body) {
            Ok(request) => request,
            Err(e) => return error_response(codec.as_ref(), &e.to_api_error()),
        };

        let route = self.router.resolve(&request.model);
        if let Some(provider) = self.providers.get(&route.provider) {
            request.model = route.upstream_model;
            let counted =
                tokio::time::timeout(self.request_timeout, provider.count_tokens(&request)).await;
            match counted {
                Ok(Ok(Some(raw))) => {
                    return (
                        StatusCode::OK,
                        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
                        Body::from(raw),
                    )
                        .into_response();
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(provider = %provider.name(), error = %e, "Native token count failed, estimating");
                }
                Err(_) => tracing::warn!(provider = %provider.name(), "Native token count timed out, estimating"),
            }
        }

        tracing::debug!(tenant = %tenant_id(headers), "Estimating token count");
        Json(json!({ "input_tokens": estimate_tokens(&request) })).into_response()
    }

    /// Route aliases plus every provider's models. Providers that fail to
    /// list are skipped.
    pub async fn list_models(&self) -> Vec<ModelInfo> {
        let mut models: Vec<ModelInfo> = self
            .router
            .aliases()
            .into_iter()
            .map(|(id, provider)| ModelInfo {
                id: id.to_string(),
                owned_by: provider.to_string(),
            })
            .collect();

        let timeout = self.request_timeout;
        let listings = futures::future::join_all(self.providers.iter().map(|provider| async move {
            let listed = tokio::time::timeout(timeout, provider.list_models()).await;
            (provider.name().to_string(), listed)
        }))
        .await;

        for (name, listed) in listings {
            match listed {
                Ok(Ok(listed)) => {
                    for model in listed {
                        if models.iter().all(|m| m.id != model.id) {
                            models.push(model);
                        }
                    }
                }
                Ok(Err(e)) => tracing::warn!(provider = %name, error = %e, "Failed to list models"),
                Err(_) => tracing::warn!(provider = %name, "Listing models timed out"),
            }
        }
        models
    }
}

/// Writes the interaction record once the call has ended.
struct Recorder {
    store: Arc<dyn Store>,
    interaction: Interaction,
    thread: Option<Thread>,
    timeout: Duration,
}

impl Recorder {
    async fn finish_call(self, outcome: CallOutcome) {
        match outcome {
            CallOutcome::Completed { response, rendered } => {
                self.finish(InteractionStatus::Completed, Some(response), None, rendered)
                    .await;
            }
            CallOutcome::Failed(error) => {
                self.finish(InteractionStatus::Failed, None, Some(error), None)
                    .await;
            }
            CallOutcome::Cancelled => {
                self.finish(InteractionStatus::Cancelled, None, None, None)
                    .await;
            }
        }
    }

    async fn finish(
        self,
        status: InteractionStatus,
        response: Option<CanonicalResponse>,
        error: Option<ApiError>,
        rendered: Option<ResponseObject>,
    ) {
        let id = self.interaction.id.clone();
        let timeout = self.timeout;
        match tokio::time::timeout(timeout, self.write(status, response, error, rendered)).await {
            Ok(Ok(())) => tracing::debug!(interaction = %id, status = status.as_str(), "Recorded interaction"),
            Ok(Err(e)) => tracing::warn!(interaction = %id, error = %e, "Failed to record interaction"),
            Err(_) => tracing::warn!(interaction = %id, ?timeout, "Recording interaction timed out"),
        }
    }

    async fn write(
        self,
        status: InteractionStatus,
        response: Option<CanonicalResponse>,
        error: Option<ApiError>,
        rendered: Option<ResponseObject>,
    ) -> Result<()> {
        let Self {
            store,
            mut interaction,
            thread,
            ..
        } = self;

        store
            .append_event(InteractionEvent {
                interaction_id: interaction.id.clone(),
                kind: "started".to_string(),
                at: interaction.created_at,
                detail: Some(json!({
                    "provider": interaction.provider,
                    "model": interaction.model,
                    "stream": interaction.stream,
                })),
            })
            .await?;

        let detail = match (&error, &response) {
            (Some(error), _) => json!({ "error": error }),
            (None, Some(response)) => json!({
                "usage": response.usage,
                "finish_reason": response.finish_reason(),
            }),
            (None, None) => serde_json::Value::Null,
        };

        interaction.status = status;
        interaction.provider_model = response.as_ref().and_then(|r| r.provider_model.clone());
        interaction.response = response.clone();
        interaction.error = error;
        interaction.completed_at = Some(Utc::now());
        let tenant = interaction.tenant_id.clone();
        let interaction_id = interaction.id.clone();
        store.save_interaction(interaction).await?;
        store
            .append_event(
                InteractionEvent::new(interaction_id, status.as_str()).with_detail(detail),
            )
            .await?;

        match (thread, response) {
            (Some(thread), Some(response))
                if status == InteractionStatus::Completed && thread.options.store =>
            {
                save_thread(store.as_ref(), &tenant, thread, &response, rendered).await
            }
            _ => Ok(()),
        }
    }
}

/// Append this turn to its conversation and store it as a thread node.
async fn save_thread(
    store: &dyn Store,
    tenant: &str,
    thread: Thread,
    response: &CanonicalResponse,
    rendered: Option<ResponseObject>,
) -> Result<()> {
    let conversation_id = match thread.conversation_id {
        Some(id) => id,
        None => store.create_conversation(tenant).await?.id,
    };

    let mut messages = thread.new_messages;
    if let Some(message) = response.first_message() {
        messages.push(message.clone());
    }
    store
        .append_messages(tenant, &conversation_id, messages.clone())
        .await?;

    let body = rendered.unwrap_or_else(|| {
        response_object(response, thread.options.previous_response_id.as_deref())
    });
    store
        .save_response(StoredResponse {
            id: body.id.clone(),
            tenant_id: tenant.to_string(),
            conversation_id,
            previous_response_id: thread.options.previous_response_id,
            messages,
            status: body.status.clone(),
            body,
            created_at: Utc::now(),
        })
        .await
}

pub fn tenant_id(headers: &HeaderMap) -> String {
    headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_TENANT)
        .to_string()
}

fn stream_id(format: ApiFormat) -> String {
    let id = uuid::Uuid::new_v4().simple();
    match format {
        ApiFormat::OpenAi => format!("chatcmpl-{id}"),
        ApiFormat::Anthropic => format!("msg_{id}"),
        ApiFormat::Responses => format!("resp_{id}"),
    }
}

pub fn error_response(codec: &dyn ClientCodec, error: &ApiError) -> Response {
    let (status, body) = codec.encode_error(error);
    (status, Json(body)).into_response()
}

/// Deadlines and disconnects end the same way.
fn cancelled_response(codec: &dyn ClientCodec) -> Response {
    error_response(codec, &GatewayError::Cancelled.to_api_error())
}

fn relay_rate_limit(info: Option<&RateLimitInfo>, headers: &mut HeaderMap) {
    if let Some(info) = info {
        ratelimit::apply(info, headers);
    }
}

/// Roughly four characters per token over everything the model reads.
pub fn estimate_tokens(request: &CanonicalRequest) -> u64 {
    let mut chars = request.system_prompt.as_deref().map_or(0, str::len);

    for message in &request.messages {
        chars += match message.content {
            Content::Text(ref text) => text.len(),
            Content::Parts(ref parts) => parts.iter().map(part_chars).sum(),
        };
        for call in &message.tool_calls {
            chars += call.function.name.len() + call.function.arguments.len();
        }
    }
    for tool in &request.tools {
        chars += tool.function.name.len();
        chars += tool.function.description.as_deref().map_or(0, str::len);
        chars += tool.function.parameters.to_string().len();
    }

    (chars as u64).div_ceil(4)
}

fn part_chars(part: &ContentPart) -> usize {
    match part {
        ContentPart::Text { text } => text.len(),
        ContentPart::ToolUse {
            name, arguments, ..
        } => name.len() + arguments.len(),
        ContentPart::ToolResult { content, .. } => content.len(),
        ContentPart::Image { .. } | ContentPart::ImageUrl { .. } => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{Message, Role};

    #[test]
    fn test_estimate_rounds_up() {
        let mut request = CanonicalRequest::new("m", ApiFormat::Anthropic);
        request.messages.push(Message::text(Role::User, "hello"));
        assert_eq!(estimate_tokens(&request), 2);

        request.system_prompt = Some("abc".into());
        assert_eq!(estimate_tokens(&request), 2);
    }

    #[test]
    fn test_estimate_empty_request() {
        assert_eq!(estimate_tokens(&CanonicalRequest::new("m", ApiFormat::OpenAi)), 0);
    }

    #[test]
    fn test_tenant_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(tenant_id(&headers), DEFAULT_TENANT);

        headers.insert(TENANT_HEADER, HeaderValue::from_static(" acme "));
        assert_eq!(tenant_id(&headers), "acme");
    }

    #[test]
    fn test_stream_ids_follow_format() {
        assert!(stream_id(ApiFormat::OpenAi).starts_with("chatcmpl-"));
        assert!(stream_id(ApiFormat::Anthropic).starts_with("msg_"));
        assert!(stream_id(ApiFormat::Responses).starts_with("resp_"));
    }
}
