//! Cross-vendor error taxonomy.
//!
//! Vendor error bodies are classified into a closed set of [`ErrorKind`]s and
//! re-encoded in whichever format the *client* speaks. Every function here is
//! total: unrecognized input resolves to [`ErrorKind::Server`] instead of
//! failing, so rendering an error can never break the response path.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::canonical::ApiFormat;

/// Closed set of error categories shared by all vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    ContextLength,
    MaxTokens,
    Authentication,
    Permission,
    NotFound,
    RateLimit,
    Overloaded,
    Server,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::ContextLength => "context_length",
            Self::MaxTokens => "max_tokens",
            Self::Authentication => "authentication",
            Self::Permission => "permission",
            Self::NotFound => "not_found",
            Self::RateLimit => "rate_limit",
            Self::Overloaded => "overloaded",
            Self::Server => "server",
        }
    }

    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::InvalidRequest | Self::ContextLength | Self::MaxTokens => StatusCode::BAD_REQUEST,
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::Permission => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            Self::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            Self::Server => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// OpenAI `error.type` string
    #[must_use]
    pub fn openai_type(self) -> &'static str {
        match self {
            Self::InvalidRequest | Self::ContextLength | Self::MaxTokens | Self::NotFound => {
                "invalid_request_error"
            }
            Self::Authentication => "authentication_error",
            Self::Permission => "permission_error",
            Self::RateLimit => "rate_limit_error",
            Self::Overloaded | Self::Server => "server_error",
        }
    }

    /// Anthropic `error.type` string
    #[must_use]
    pub fn anthropic_type(self) -> &'static str {
        match self {
            Self::InvalidRequest | Self::ContextLength | Self::MaxTokens => "invalid_request_error",
            Self::Authentication => "authentication_error",
            Self::Permission => "permission_error",
            Self::NotFound => "not_found_error",
            Self::RateLimit => "rate_limit_error",
            Self::Overloaded => "overloaded_error",
            Self::Server => "api_error",
        }
    }

    /// Machine-readable code implied by the kind, if any.
    fn default_code(self) -> Option<&'static str> {
        match self {
            Self::ContextLength => Some("context_length_exceeded"),
            Self::MaxTokens => Some("max_tokens"),
            Self::RateLimit => Some("rate_limit_exceeded"),
            Self::Authentication => Some("invalid_api_key"),
            Self::NotFound => Some("model_not_found"),
            Self::InvalidRequest | Self::Permission | Self::Overloaded | Self::Server => None,
        }
    }
}

/// A classified error. Built once per failed call and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    /// Vendor that produced the error; `None` when raised by the gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_api: Option<ApiFormat>,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
            param: None,
            source_api: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Server, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: ApiFormat) -> Self {
        self.source_api = Some(source);
        self
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    /// Classify a vendor error body in the given wire format.
    #[must_use]
    pub fn from_vendor(format: ApiFormat, status: Option<u16>, body: &[u8]) -> Self {
        match format {
            ApiFormat::Anthropic => Self::from_anthropic(status, body),
            ApiFormat::OpenAi | ApiFormat::Responses => Self::from_openai(status, body),
        }
    }

    /// Classify an OpenAI-style `{"error": {...}}` body.
    #[must_use]
    pub fn from_openai(status: Option<u16>, body: &[u8]) -> Self {
        let parsed: Option<Value> = serde_json::from_slice(body).ok();
        let error = parsed.as_ref().map(|v| v.get("error").unwrap_or(v));

        let (coarse, code, message, param) = match error {
            Some(Value::String(message)) => (None, None, message.clone(), None),
            Some(obj) => (
                str_field(obj, "type"),
                // some OpenAI-compatible vendors send numeric codes
                obj.get("code").and_then(|c| match c {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                }),
                str_field(obj, "message").unwrap_or_else(|| fallback_message(status, body)),
                str_field(obj, "param"),
            ),
            None => (None, None, fallback_message(status, body), None),
        };

        let mut error = classify(code.as_deref(), &message, coarse.as_deref(), status);
        error.param = param;
        error.source_api = Some(ApiFormat::OpenAi);
        error
    }

    /// Classify an Anthropic-style `{"type":"error","error":{...}}` body.
    #[must_use]
    pub fn from_anthropic(status: Option<u16>, body: &[u8]) -> Self {
        let parsed: Option<Value> = serde_json::from_slice(body).ok();
        let error = parsed.as_ref().map(|v| v.get("error").unwrap_or(v));

        let (coarse, message) = match error {
            Some(Value::String(message)) => (None, message.clone()),
            Some(obj) => (
                str_field(obj, "type"),
                str_field(obj, "message").unwrap_or_else(|| fallback_message(status, body)),
            ),
            None => (None, fallback_message(status, body)),
        };

        let mut error = classify(None, &message, coarse.as_deref(), status);
        error.source_api = Some(ApiFormat::Anthropic);
        error
    }

    /// Render in the client's wire format, returning the HTTP status to use.
    #[must_use]
    pub fn encode_for(&self, format: ApiFormat) -> (StatusCode, Value) {
        let body = match format {
            ApiFormat::Anthropic => self.to_anthropic_body(),
            ApiFormat::OpenAi | ApiFormat::Responses => self.to_openai_body(),
        };
        (self.status(), body)
    }

    #[must_use]
    pub fn to_openai_body(&self) -> Value {
        let code = self
            .code
            .clone()
            .or_else(|| self.kind.default_code().map(String::from));
        json!({
            "error": {
                "message": self.message_for(ApiFormat::OpenAi),
                "type": self.kind.openai_type(),
                "param": self.param,
                "code": code,
            }
        })
    }

    #[must_use]
    pub fn to_anthropic_body(&self) -> Value {
        json!({
            "type": "error",
            "error": {
                "type": self.kind.anthropic_type(),
                "message": self.message_for(ApiFormat::Anthropic),
            }
        })
    }

    /// Human-readable message, rephrased when crossing vendor families.
    fn message_for(&self, target: ApiFormat) -> String {
        let crossing = self
            .source_api
            .is_some_and(|source| family(source) != family(target));
        if crossing {
            if let Some(phrase) = vendor_phrase(self.kind, family(target)) {
                return phrase.to_string();
            }
        }
        self.message.clone()
    }
}

/// Classify from the most to the least specific signal: machine code, then
/// message text, then the vendor's coarse type, then HTTP status.
#[must_use]
pub fn classify(
    code: Option<&str>,
    message: &str,
    coarse_type: Option<&str>,
    status: Option<u16>,
) -> ApiError {
    let build = |kind: ErrorKind, code: Option<String>| ApiError {
        kind,
        code: code.or_else(|| kind.default_code().map(String::from)),
        message: message.to_string(),
        param: None,
        source_api: None,
    };

    let code_kind = code.and_then(|c| match c {
        "context_length_exceeded" => Some(ErrorKind::ContextLength),
        "rate_limit_exceeded" => Some(ErrorKind::RateLimit),
        "invalid_api_key" => Some(ErrorKind::Authentication),
        "model_not_found" => Some(ErrorKind::NotFound),
        _ => None,
    });
    if let Some(kind) = code_kind {
        return build(kind, code.map(String::from));
    }

    // unknown vendor codes are kept as-is
    let code = code.map(String::from);

    if let Some(kind) = kind_from_message(message) {
        return build(kind, code);
    }

    if let Some(kind) = coarse_type.and_then(kind_from_type) {
        // OpenAI has no overloaded type; the status is all that survives
        let kind = match (kind, status) {
            (ErrorKind::Server, Some(503 | 529)) => ErrorKind::Overloaded,
            (kind, _) => kind,
        };
        return ApiError {
            kind,
            code,
            message: message.to_string(),
            param: None,
            source_api: None,
        };
    }

    let kind = status.and_then(kind_from_status).unwrap_or(ErrorKind::Server);
    ApiError {
        kind,
        code,
        message: message.to_string(),
        param: None,
        source_api: None,
    }
}

fn kind_from_message(message: &str) -> Option<ErrorKind> {
    let lower = message.to_lowercase();
    let has = |needle: &str| lower.contains(needle);

    if has("context length") || has("context window") {
        return Some(ErrorKind::ContextLength);
    }
    if (has("max_tokens") || has("maximum tokens"))
        && (has("truncated") || has("could not finish") || has("output limit"))
    {
        return Some(ErrorKind::MaxTokens);
    }
    if has("rate limit") {
        return Some(ErrorKind::RateLimit);
    }
    if has("api key") || has("authentication") || has("unauthorized") {
        return Some(ErrorKind::Authentication);
    }
    if has("model not found") || has("does not exist") {
        return Some(ErrorKind::NotFound);
    }
    None
}

fn kind_from_type(error_type: &str) -> Option<ErrorKind> {
    match error_type {
        "invalid_request_error" => Some(ErrorKind::InvalidRequest),
        "authentication_error" => Some(ErrorKind::Authentication),
        "permission_error" => Some(ErrorKind::Permission),
        "not_found_error" => Some(ErrorKind::NotFound),
        "rate_limit_error" | "requests" | "tokens" | "insufficient_quota" => {
            Some(ErrorKind::RateLimit)
        }
        "overloaded_error" => Some(ErrorKind::Overloaded),
        "api_error" | "server_error" | "internal_error" => Some(ErrorKind::Server),
        _ => None,
    }
}

fn kind_from_status(status: u16) -> Option<ErrorKind> {
    match status {
        400 | 413 | 422 => Some(ErrorKind::InvalidRequest),
        401 => Some(ErrorKind::Authentication),
        403 => Some(ErrorKind::Permission),
        404 => Some(ErrorKind::NotFound),
        429 => Some(ErrorKind::RateLimit),
        503 | 529 => Some(ErrorKind::Overloaded),
        _ => None,
    }
}

/// Responses speaks the OpenAI error dialect.
fn family(format: ApiFormat) -> ApiFormat {
    match format {
        ApiFormat::Responses => ApiFormat::OpenAi,
        other => other,
    }
}

fn vendor_phrase(kind: ErrorKind, target: ApiFormat) -> Option<&'static str> {
    match (target, kind) {
        (ApiFormat::Anthropic, ErrorKind::ContextLength) => Some(
            "This request would exceed the model's maximum context length. Please reduce the length of the prompt.",
        ),
        (ApiFormat::Anthropic, ErrorKind::MaxTokens) => {
            Some("The response was truncated because it reached the maximum tokens output limit.")
        }
        (ApiFormat::Anthropic, ErrorKind::RateLimit) => {
            Some("Number of requests has exceeded your rate limit. Please try again later.")
        }
        (ApiFormat::Anthropic, ErrorKind::Authentication) => Some("Invalid API key."),
        (ApiFormat::Anthropic, ErrorKind::NotFound) => {
            Some("model not found: the requested model does not exist.")
        }
        (ApiFormat::Anthropic, ErrorKind::Overloaded) => Some("Overloaded"),
        (_, ErrorKind::ContextLength) => Some(
            "This model's maximum context length was exceeded. Please reduce the length of the messages.",
        ),
        (_, ErrorKind::MaxTokens) => {
            Some("Could not finish the message because max_tokens was reached.")
        }
        (_, ErrorKind::RateLimit) => Some("Rate limit reached. Please slow down."),
        (_, ErrorKind::Authentication) => Some("Incorrect API key provided."),
        (_, ErrorKind::NotFound) => {
            Some("The model does not exist or you do not have access to it.")
        }
        (_, ErrorKind::Overloaded) => {
            Some("The server is currently overloaded with other requests. Please retry after a short wait.")
        }
        _ => None,
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(String::from)
}

fn fallback_message(status: Option<u16>, body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        status.map_or_else(
            || "upstream request failed".to_string(),
            |s| format!("upstream returned status {s}"),
        )
    } else {
        text.chars().take(500).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_code_takes_precedence() {
        let body = br#"{"error":{"type":"invalid_request_error","code":"context_length_exceeded","message":"too long"}}"#;
        let err = ApiError::from_openai(Some(400), body);
        assert_eq!(err.kind, ErrorKind::ContextLength);
        assert_eq!(err.code.as_deref(), Some("context_length_exceeded"));
        assert_eq!(err.source_api, Some(ApiFormat::OpenAi));
    }

    #[test]
    fn test_context_length_renders_as_anthropic() {
        let body = br#"{"error":{"type":"invalid_request_error","code":"context_length_exceeded","message":"..."}}"#;
        let err = ApiError::from_openai(Some(400), body);

        let (status, rendered) = err.encode_for(ApiFormat::Anthropic);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(rendered["type"], "error");
        assert_eq!(rendered["error"]["type"], "invalid_request_error");
        assert!(rendered["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("This request would exceed"));
    }

    #[test]
    fn test_context_length_survives_round_trip() {
        let body = br#"{"error":{"type":"invalid_request_error","code":"context_length_exceeded","message":"..."}}"#;
        let original = ApiError::from_openai(Some(400), body);

        let (status, anthropic) = original.encode_for(ApiFormat::Anthropic);
        let bytes = serde_json::to_vec(&anthropic).unwrap();
        let back = ApiError::from_anthropic(Some(status.as_u16()), &bytes);

        assert_eq!(back.kind, ErrorKind::ContextLength);
        assert_eq!(back.code.as_deref(), Some("context_length_exceeded"));
    }

    #[test]
    fn test_truncation_is_distinguished_from_exceeded() {
        let err = classify(
            None,
            "Output was truncated: max_tokens reached",
            Some("invalid_request_error"),
            Some(400),
        );
        assert_eq!(err.kind, ErrorKind::MaxTokens);

        let err = classify(
            None,
            "max_tokens: 100000 > 8192, which is the maximum allowed",
            Some("invalid_request_error"),
            Some(400),
        );
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_anthropic_rate_limit_rephrased_for_openai() {
        let body = br#"{"type":"error","error":{"type":"rate_limit_error","message":"Number of request tokens has exceeded your per-minute rate limit"}}"#;
        let err = ApiError::from_anthropic(Some(429), body);
        assert_eq!(err.kind, ErrorKind::RateLimit);

        let (status, rendered) = err.encode_for(ApiFormat::OpenAi);
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(rendered["error"]["message"], "Rate limit reached. Please slow down.");
        assert_eq!(rendered["error"]["code"], "rate_limit_exceeded");
    }

    #[test]
    fn test_same_family_keeps_message() {
        let body = br#"{"error":{"type":"rate_limit_error","message":"slow down please"}}"#;
        let err = ApiError::from_openai(Some(429), body);
        let (_, rendered) = err.encode_for(ApiFormat::Responses);
        assert_eq!(rendered["error"]["message"], "slow down please");
    }

    #[test]
    fn test_garbage_never_fails() {
        let err = ApiError::from_anthropic(None, b"<html>bad gateway</html>");
        assert_eq!(err.kind, ErrorKind::Server);
        assert_eq!(err.message, "<html>bad gateway</html>");

        let err = ApiError::from_openai(Some(503), b"");
        assert_eq!(err.kind, ErrorKind::Overloaded);
        assert_eq!(err.message, "upstream returned status 503");
    }

    #[test]
    fn test_coarse_type_fallback() {
        let body = br#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let err = ApiError::from_anthropic(Some(529), body);
        assert_eq!(err.kind, ErrorKind::Overloaded);
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_overloaded_survives_openai_round_trip() {
        let body = br#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let original = ApiError::from_anthropic(Some(529), body);

        let (status, openai) = original.encode_for(ApiFormat::OpenAi);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(openai["error"]["type"], "server_error");

        let bytes = serde_json::to_vec(&openai).unwrap();
        let back = ApiError::from_openai(Some(status.as_u16()), &bytes);
        assert_eq!(back.kind, ErrorKind::Overloaded);

        let (_, anthropic) = back.encode_for(ApiFormat::Anthropic);
        assert_eq!(anthropic["error"]["type"], "overloaded_error");
    }

    #[test]
    fn test_server_error_type_without_overload_status() {
        let body = br#"{"error":{"type":"server_error","message":"boom"}}"#;
        let err = ApiError::from_openai(Some(500), body);
        assert_eq!(err.kind, ErrorKind::Server);
    }

    #[test]
    fn test_status_table() {
        assert_eq!(ErrorKind::InvalidRequest.status().as_u16(), 400);
        assert_eq!(ErrorKind::ContextLength.status().as_u16(), 400);
        assert_eq!(ErrorKind::MaxTokens.status().as_u16(), 400);
        assert_eq!(ErrorKind::Authentication.status().as_u16(), 401);
        assert_eq!(ErrorKind::Permission.status().as_u16(), 403);
        assert_eq!(ErrorKind::NotFound.status().as_u16(), 404);
        assert_eq!(ErrorKind::RateLimit.status().as_u16(), 429);
        assert_eq!(ErrorKind::Overloaded.status().as_u16(), 503);
        assert_eq!(ErrorKind::Server.status().as_u16(), 500);
    }
}
