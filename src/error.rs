//! Error types for the gateway.

use thiserror::Error;

use crate::taxonomy::{ApiError, ErrorKind};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Malformed or unsupported client input; never retried
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Canonical data could not be serialized for the wire
    #[error("Encode error: {message}")]
    Encode { message: String },

    #[error("Provider error: {message}")]
    Provider { message: String },

    /// Vendor returned an error, already classified
    #[error("Upstream error: {0}")]
    Upstream(ApiError),

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Request cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl GatewayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode {
            message: msg.into(),
        }
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider {
            message: msg.into(),
        }
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store {
            message: msg.into(),
        }
    }

    /// Project onto the error taxonomy so the error can be rendered in any
    /// client format.
    #[must_use]
    pub fn to_api_error(&self) -> ApiError {
        match self {
            Self::Decode { message } => ApiError::invalid_request(message.clone()),
            Self::Upstream(err) => err.clone(),
            Self::Provider { message } => ApiError::new(ErrorKind::Server, message.clone()),
            other => ApiError::server(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_maps_to_invalid_request() {
        let err = GatewayError::decode("messages must not be empty").to_api_error();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
        assert_eq!(err.status().as_u16(), 400);
    }

    #[test]
    fn test_encode_maps_to_server() {
        let err = GatewayError::encode("bad tool arguments").to_api_error();
        assert_eq!(err.kind, ErrorKind::Server);
        assert_eq!(err.status().as_u16(), 500);
    }

    #[test]
    fn test_cancelled_has_no_special_code() {
        let err = GatewayError::Cancelled.to_api_error();
        assert_eq!(err.kind, ErrorKind::Server);
        assert_eq!(err.code, None);
        assert_eq!(err.message, "Request cancelled");
    }
}
