use crate::canonical::ApiFormat;
use crate::gateway::{tenant_id, Gateway};
use crate::taxonomy::ApiError;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub gateway: Gateway,
}

impl AppState {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/messages", post(handle_messages))
        .route("/v1/messages/count_tokens", post(handle_count_tokens))
        .route("/v1/responses", post(handle_responses))
        .route("/v1/responses/:id", get(handle_get_response))
        .route("/v1/interactions/:id", get(handle_get_interaction))
        .route("/v1/models", get(handle_models))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.gateway.handle(ApiFormat::OpenAi, &headers, body).await
}

async fn handle_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.gateway.handle(ApiFormat::Anthropic, &headers, body).await
}

async fn handle_responses(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.gateway.handle(ApiFormat::Responses, &headers, body).await
}

async fn handle_count_tokens(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.gateway.count_tokens(&headers, body).await
}

async fn handle_get_response(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let tenant = tenant_id(&headers);
    match state.gateway.store().get_response(&tenant, &id).await {
        Ok(Some(stored)) => Json(stored.body).into_response(),
        Ok(None) => error_json(
            ApiFormat::Responses,
            &ApiError::not_found(format!("Response '{id}' not found")),
        ),
        Err(e) => {
            tracing::error!(id = %id, error = %e, "Failed to load response");
            error_json(ApiFormat::Responses, &e.to_api_error())
        }
    }
}

async fn handle_get_interaction(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let tenant = tenant_id(&headers);
    let store = state.gateway.store();

    let interaction = match store.get_interaction(&tenant, &id).await {
        Ok(Some(interaction)) => interaction,
        Ok(None) => {
            return error_json(
                ApiFormat::OpenAi,
                &ApiError::not_found(format!("Interaction '{id}' not found")),
            )
        }
        Err(e) => {
            tracing::error!(id = %id, error = %e, "Failed to load interaction");
            return error_json(ApiFormat::OpenAi, &e.to_api_error());
        }
    };

    match store.list_events(&id).await {
        Ok(events) => Json(json!({
            "interaction": interaction,
            "events": events,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(id = %id, error = %e, "Failed to load interaction events");
            error_json(ApiFormat::OpenAi, &e.to_api_error())
        }
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let models: Vec<serde_json::Value> = state
        .gateway
        .list_models()
        .await
        .into_iter()
        .map(|model| {
            json!({
                "id": model.id,
                "object": "model",
                "owned_by": model.owned_by,
            })
        })
        .collect();

    Json(json!({ "data": models, "object": "list" }))
}

fn error_json(format: ApiFormat, error: &ApiError) -> Response {
    let (status, body) = error.encode_for(format);
    (status, Json(body)).into_response()
}
