//! Content types exchanged between agents, models, and tools.
//!
//! A [`Content`] is an ordered sequence of [`Part`]s with a [`Role`].
//! Parts cover text (optionally flagged as model "thought"), inline binary
//! data, function calls, and function responses.

use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON object, used for function-call arguments and responses.
pub type JsonMap = Map<String, Value>;

/// The producer of a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Content supplied by (or on behalf of) the user.
    #[default]
    User,
    /// Content produced by the model.
    Model,
}

/// Inline binary data with a MIME type.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    /// The IANA MIME type of the payload.
    pub mime_type: String,
    /// The raw bytes, base64-encoded on the wire.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Blob {
    /// Create a new blob.
    #[must_use]
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }
}

impl std::fmt::Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob")
            .field("mime_type", &self.mime_type)
            .field("len", &self.data.len())
            .finish()
    }
}

pub(crate) mod base64_bytes {
    use super::BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// A structured request from the model to invoke a named tool.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Correlation id; generated by the framework when the model omits it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name of the tool to invoke.
    pub name: String,
    /// Arguments map.
    #[serde(default)]
    pub args: JsonMap,
}

/// The result of a tool invocation, correlated to its call by id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FunctionResponse {
    /// Id of the originating function call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name of the tool that produced the response.
    pub name: String,
    /// Response map delivered by the tool.
    #[serde(default)]
    pub response: JsonMap,
}

/// One unit of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Part {
    /// A text fragment. `thought` marks planning text the model produced
    /// for itself; thought parts are stripped before the next model call.
    Text {
        /// The text payload.
        text: String,
        /// Whether this text is planning metadata rather than output.
        #[serde(default)]
        thought: bool,
    },
    /// Inline binary data.
    InlineData(Blob),
    /// A function call emitted by the model.
    FunctionCall(FunctionCall),
    /// A function response produced by a tool.
    FunctionResponse(FunctionResponse),
}

impl Part {
    /// Create a plain text part.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            thought: false,
        }
    }

    /// Create a text part flagged as thought.
    #[must_use]
    pub fn thought(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            thought: true,
        }
    }

    /// Create an inline-data part.
    #[must_use]
    pub fn inline_data(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self::InlineData(Blob::new(mime_type, data))
    }

    /// Create a function-call part.
    #[must_use]
    pub fn function_call(name: impl Into<String>, args: JsonMap) -> Self {
        Self::FunctionCall(FunctionCall {
            id: None,
            name: name.into(),
            args,
        })
    }

    /// Create a function-response part.
    #[must_use]
    pub fn function_response(
        id: Option<String>,
        name: impl Into<String>,
        response: JsonMap,
    ) -> Self {
        Self::FunctionResponse(FunctionResponse {
            id,
            name: name.into(),
            response,
        })
    }

    /// The text payload, if this is a text part.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Whether this part is a thought.
    #[must_use]
    pub const fn is_thought(&self) -> bool {
        matches!(self, Self::Text { thought: true, .. })
    }

    /// The function call, if this is a function-call part.
    #[must_use]
    pub const fn as_function_call(&self) -> Option<&FunctionCall> {
        match self {
            Self::FunctionCall(call) => Some(call),
            _ => None,
        }
    }

    /// The function response, if this is a function-response part.
    #[must_use]
    pub const fn as_function_response(&self) -> Option<&FunctionResponse> {
        match self {
            Self::FunctionResponse(response) => Some(response),
            _ => None,
        }
    }
}

/// An ordered sequence of parts with a role.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Content {
    /// Who produced this content.
    pub role: Role,
    /// The ordered parts.
    pub parts: Vec<Part>,
}

impl Content {
    /// Create content with an explicit role.
    #[must_use]
    pub const fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    /// Create user-role content.
    #[must_use]
    pub const fn user(parts: Vec<Part>) -> Self {
        Self::new(Role::User, parts)
    }

    /// Create model-role content.
    #[must_use]
    pub const fn model(parts: Vec<Part>) -> Self {
        Self::new(Role::Model, parts)
    }

    /// Create user-role content holding a single text part.
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![Part::text(text)])
    }

    /// Create model-role content holding a single text part.
    #[must_use]
    pub fn model_text(text: impl Into<String>) -> Self {
        Self::model(vec![Part::text(text)])
    }

    /// Concatenated text of all non-thought text parts.
    #[must_use]
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter(|p| !p.is_thought())
            .filter_map(Part::as_text)
            .collect()
    }

    /// Whether the content has no parts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_concatenation_skips_thoughts() {
        let content = Content::model(vec![
            Part::thought("planning..."),
            Part::text("hello "),
            Part::text("world"),
        ]);
        assert_eq!(content.text(), "hello world");
    }

    #[test]
    fn test_blob_round_trips_through_base64() {
        let blob = Blob::new("text/csv", b"a,b\n1,2\n".to_vec());
        let json = serde_json::to_string(&blob).expect("serialize");
        assert!(json.contains("text/csv"));
        let back: Blob = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, blob);
    }

    #[test]
    fn test_part_accessors() {
        let call = Part::function_call("lookup", JsonMap::new());
        assert!(call.as_function_call().is_some());
        assert!(call.as_function_response().is_none());
        assert!(call.as_text().is_none());
    }
}
