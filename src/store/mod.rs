//! Persistence contract for conversations, interactions and Responses
//! records. Every record is keyed by a gateway-generated id and scoped to a
//! tenant; lookups from another tenant see nothing.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::{ApiFormat, CanonicalRequest, CanonicalResponse, Message};
use crate::error::Result;
use crate::responses::ResponseObject;
use crate::taxonomy::ApiError;

pub use memory::MemoryStore;

/// Tenant used when the client sends no `x-tenant-id`.
pub const DEFAULT_TENANT: &str = "default";

/// New gateway id with a type prefix, e.g. `int_3f2a...`.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub tenant_id: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl InteractionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One client call through the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub tenant_id: String,
    pub source_api: ApiFormat,
    pub provider: String,
    /// Model the client asked for
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_model: Option<String>,
    pub stream: bool,
    pub status: InteractionStatus,
    pub request: CanonicalRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<CanonicalResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Interaction {
    pub fn start(
        tenant_id: impl Into<String>,
        provider: impl Into<String>,
        request: CanonicalRequest,
    ) -> Self {
        Self {
            id: new_id("int"),
            tenant_id: tenant_id.into(),
            source_api: request.source_api,
            provider: provider.into(),
            model: request.model.clone(),
            provider_model: None,
            stream: request.stream,
            status: InteractionStatus::InProgress,
            request,
            response: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub interaction_id: String,
    /// `started`, `completed`, `failed` or `cancelled`
    pub kind: String,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl InteractionEvent {
    pub fn new(interaction_id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            interaction_id: interaction_id.into(),
            kind: kind.into(),
            at: Utc::now(),
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// A Responses API result, retrievable by id and usable as a thread parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub id: String,
    pub tenant_id: String,
    pub conversation_id: String,
    /// Parent turn; history is rebuilt by walking these links
    #[serde(default)]
    pub previous_response_id: Option<String>,
    /// This turn's input followed by the assistant reply
    #[serde(default)]
    pub messages: Vec<Message>,
    pub status: String,
    pub body: ResponseObject,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_conversation(&self, tenant_id: &str) -> Result<Conversation>;

    async fn get_conversation(&self, tenant_id: &str, id: &str) -> Result<Option<Conversation>>;

    /// Append to an existing conversation; a store error if it is missing.
    async fn append_messages(
        &self,
        tenant_id: &str,
        id: &str,
        messages: Vec<Message>,
    ) -> Result<()>;

    /// Insert or replace.
    async fn save_interaction(&self, interaction: Interaction) -> Result<()>;

    async fn get_interaction(&self, tenant_id: &str, id: &str) -> Result<Option<Interaction>>;

    async fn append_event(&self, event: InteractionEvent) -> Result<()>;

    async fn list_events(&self, interaction_id: &str) -> Result<Vec<InteractionEvent>>;

    /// Insert or replace.
    async fn save_response(&self, response: StoredResponse) -> Result<()>;

    async fn get_response(&self, tenant_id: &str, id: &str) -> Result<Option<StoredResponse>>;
}
