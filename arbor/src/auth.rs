//! Credential-request plumbing for tools that need end-user authentication.
//!
//! A tool that cannot proceed without credentials calls
//! [`crate::tool::ToolContext::request_credential`]. The flow then emits a
//! synthetic function call named [`REQUEST_CREDENTIAL_TOOL_NAME`] carrying
//! the [`AuthConfig`]; the client completes the exchange out of band and
//! replies with a function response, which the auth preprocessor feeds back
//! into the paused tool call.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::JsonMap;
use crate::error::{AgentError, Result};

/// Reserved name of the synthetic credential-request tool. Not available
/// for user-defined tools.
pub const REQUEST_CREDENTIAL_TOOL_NAME: &str = "adk_request_credential";

/// State-key prefix under which exchanged credentials are stashed. The
/// `temp:` scope keeps them invocation-local and unpersisted.
const AUTH_RESPONSE_STATE_PREFIX: &str = "temp:auth_response:";

/// Describes an authentication exchange a tool is asking the client to
/// perform. The scheme and credential payloads are opaque to the core.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// The authentication scheme descriptor (e.g. an OpenAPI security
    /// scheme), opaque to the framework.
    pub auth_scheme: Value,
    /// The credential the tool already holds, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_auth_credential: Option<Value>,
    /// The credential produced by the client after the exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchanged_auth_credential: Option<Value>,
    /// Stable key identifying this credential in session state. Derived
    /// from the scheme when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_key: Option<String>,
}

impl AuthConfig {
    /// Create a config from a scheme descriptor.
    #[must_use]
    pub fn new(auth_scheme: Value) -> Self {
        Self {
            auth_scheme,
            raw_auth_credential: None,
            exchanged_auth_credential: None,
            credential_key: None,
        }
    }

    /// The state key under which responses for this config are stored.
    #[must_use]
    pub fn response_state_key(&self) -> String {
        let key = self
            .credential_key
            .clone()
            .unwrap_or_else(|| format!("{:x}", fnv1a(self.auth_scheme.to_string().as_bytes())));
        format!("{AUTH_RESPONSE_STATE_PREFIX}{key}")
    }
}

/// Arguments of the synthetic credential-request function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthToolArguments {
    /// Id of the tool call that is waiting for credentials.
    pub function_call_id: String,
    /// The exchange being requested.
    pub auth_config: AuthConfig,
}

impl AuthToolArguments {
    /// Serialize into a function-call arguments map.
    pub fn to_args(&self) -> Result<JsonMap> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(AgentError::internal("auth arguments must be an object")),
        }
    }

    /// Parse from a function-call arguments map.
    pub fn from_args(args: &JsonMap) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(args.clone()))?)
    }
}

/// Parses credential-request responses and stores the exchanged credential
/// in session state under a `temp:`-scoped key.
#[derive(Debug, Clone)]
pub struct AuthHandler {
    config: AuthConfig,
}

impl AuthHandler {
    /// Create a handler for one auth config.
    #[must_use]
    pub const fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Parse the client's function response into the completed config.
    pub fn parse_auth_response(response: &JsonMap) -> Result<AuthConfig> {
        Ok(serde_json::from_value(Value::Object(response.clone()))?)
    }

    /// The (key, value) pair to merge into session state for this
    /// completed exchange.
    pub fn state_entry(&self) -> Result<(String, Value)> {
        let key = self.config.response_state_key();
        let value = serde_json::to_value(&self.config)?;
        Ok((key, value))
    }

    /// Read a previously stored exchange back out of a state map.
    #[must_use]
    pub fn auth_response(&self, state: &JsonMap) -> Option<AuthConfig> {
        let value = state.get(&self.config.response_state_key())?;
        serde_json::from_value(value.clone()).ok()
    }
}

/// FNV-1a, used only to derive stable credential keys from schemes.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auth_arguments_round_trip() {
        let args = AuthToolArguments {
            function_call_id: "call-1".to_string(),
            auth_config: AuthConfig::new(json!({"type": "apiKey"})),
        };
        let map = args.to_args().expect("to_args");
        let back = AuthToolArguments::from_args(&map).expect("from_args");
        assert_eq!(back, args);
    }

    #[test]
    fn test_response_state_key_is_stable() {
        let config = AuthConfig::new(json!({"type": "oauth2"}));
        assert_eq!(config.response_state_key(), config.response_state_key());
        assert!(config.response_state_key().starts_with("temp:auth_response:"));
    }

    #[test]
    fn test_explicit_credential_key_wins() {
        let mut config = AuthConfig::new(json!({"type": "oauth2"}));
        config.credential_key = Some("svc".to_string());
        assert_eq!(config.response_state_key(), "temp:auth_response:svc");
    }
}
