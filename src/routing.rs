//! Client model name -> (provider, upstream model).

use std::collections::HashMap;

use crate::config::{GatewayConfig, ModelRoute};

/// Where a request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub provider: String,
    /// Model name sent upstream
    pub upstream_model: String,
}

#[derive(Debug, Clone)]
pub struct ModelRouter {
    routes: HashMap<String, ModelRoute>,
    default_provider: String,
}

impl ModelRouter {
    pub fn new(routes: HashMap<String, ModelRoute>, default_provider: impl Into<String>) -> Self {
        Self {
            routes,
            default_provider: default_provider.into(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.models.clone(), config.default_provider.clone())
    }

    /// Unrouted models go to the default provider unchanged.
    pub fn resolve(&self, model: &str) -> RouteTarget {
        match self.routes.get(model) {
            Some(route) => RouteTarget {
                provider: route.provider.clone(),
                upstream_model: route.model.clone().unwrap_or_else(|| model.to_string()),
            },
            None => RouteTarget {
                provider: self.default_provider.clone(),
                upstream_model: model.to_string(),
            },
        }
    }

    /// Routed client model names with their provider, sorted by name.
    pub fn aliases(&self) -> Vec<(&str, &str)> {
        let mut aliases: Vec<(&str, &str)> = self
            .routes
            .iter()
            .map(|(name, route)| (name.as_str(), route.provider.as_str()))
            .collect();
        aliases.sort_unstable();
        aliases
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }
}
