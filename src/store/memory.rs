//! In-process store backed by concurrent maps. Nothing survives a restart.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{Conversation, Interaction, InteractionEvent, Store, StoredResponse};
use crate::canonical::Message;
use crate::error::{GatewayError, Result};

#[derive(Debug, Default)]
pub struct MemoryStore {
    conversations: DashMap<String, Conversation>,
    interactions: DashMap<String, Interaction>,
    events: DashMap<String, Vec<InteractionEvent>>,
    responses: DashMap<String, StoredResponse>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_conversation(&self, tenant_id: &str) -> Result<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: super::new_id("conv"),
            tenant_id: tenant_id.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, tenant_id: &str, id: &str) -> Result<Option<Conversation>> {
        Ok(self
            .conversations
            .get(id)
            .filter(|c| c.tenant_id == tenant_id)
            .map(|c| c.clone()))
    }

    async fn append_messages(
        &self,
        tenant_id: &str,
        id: &str,
        messages: Vec<Message>,
    ) -> Result<()> {
        let mut conversation = self
            .conversations
            .get_mut(id)
            .filter(|c| c.tenant_id == tenant_id)
            .ok_or_else(|| GatewayError::store(format!("conversation '{id}' not found")))?;
        conversation.messages.extend(messages);
        conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn save_interaction(&self, interaction: Interaction) -> Result<()> {
        self.interactions.insert(interaction.id.clone(), interaction);
        Ok(())
    }

    async fn get_interaction(&self, tenant_id: &str, id: &str) -> Result<Option<Interaction>> {
        Ok(self
            .interactions
            .get(id)
            .filter(|i| i.tenant_id == tenant_id)
            .map(|i| i.clone()))
    }

    async fn append_event(&self, event: InteractionEvent) -> Result<()> {
        self.events
            .entry(event.interaction_id.clone())
            .or_default()
            .push(event);
        Ok(())
    }

    async fn list_events(&self, interaction_id: &str) -> Result<Vec<InteractionEvent>> {
        Ok(self
            .events
            .get(interaction_id)
            .map(|events| events.clone())
            .unwrap_or_default())
    }

    async fn save_response(&self, response: StoredResponse) -> Result<()> {
        self.responses.insert(response.id.clone(), response);
        Ok(())
    }

    async fn get_response(&self, tenant_id: &str, id: &str) -> Result<Option<StoredResponse>> {
        Ok(self
            .responses
            .get(id)
            .filter(|r| r.tenant_id == tenant_id)
            .map(|r| r.clone()))
    }
}
