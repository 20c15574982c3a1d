//! String-or-array JSON fields.
//!
//! Vendor formats accept `"content": "hi"` as well as
//! `"content": [{"type":"text","text":"hi"}]`. Decoding attempts the scalar
//! form first, then the array form, and reports which element failed rather
//! than serde's generic untagged-enum error.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum TextOrParts<T> {
    Text(String),
    Parts(Vec<T>),
}

impl<T> TextOrParts<T> {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn from_parts(parts: Vec<T>) -> Self {
        Self::Parts(parts)
    }
}

impl<T: Serialize> Serialize for TextOrParts<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text(text) => serializer.serialize_str(text),
            Self::Parts(parts) => parts.serialize(serializer),
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for TextOrParts<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(text) => Ok(Self::Text(text)),
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    serde_json::from_value(item)
                        .map_err(|e| serde::de::Error::custom(format!("item {i}: {e}")))
                })
                .collect::<Result<Vec<T>, D::Error>>()
                .map(Self::Parts),
            other => Err(serde::de::Error::custom(format!(
                "expected a string or an array, got {}",
                type_name(&other)
            ))),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(tag = "type", rename_all = "snake_case")]
    enum Part {
        Text { text: String },
    }

    #[test]
    fn test_scalar_then_array() {
        let text: TextOrParts<Part> = serde_json::from_str("\"hi\"").unwrap();
        assert_eq!(text, TextOrParts::Text("hi".into()));

        let parts: TextOrParts<Part> =
            serde_json::from_str(r#"[{"type":"text","text":"a"}]"#).unwrap();
        assert_eq!(parts, TextOrParts::Parts(vec![Part::Text { text: "a".into() }]));
    }

    #[test]
    fn test_bad_element_names_position() {
        let err = serde_json::from_str::<TextOrParts<Part>>(
            r#"[{"type":"text","text":"a"},{"type":"document"}]"#,
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("item 1"), "{msg}");
        assert!(msg.contains("document"), "{msg}");
    }

    #[test]
    fn test_rejects_other_shapes() {
        let err = serde_json::from_str::<TextOrParts<Part>>("{}").unwrap_err();
        assert!(err.to_string().contains("an object"));
    }
}
