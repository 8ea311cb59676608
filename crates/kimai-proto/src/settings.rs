use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TrackerError;

/// Persisted key for the Kimai base URL.
pub const ENDPOINT_URL_KEY: &str = "myurl";
/// Persisted key for the Kimai API key.
pub const API_KEY_KEY: &str = "myapikey";
/// Persisted key for the optional title override.
pub const DISPLAY_NAME_KEY: &str = "mynameinput";

/// Path of the JSON-RPC endpoint below the configured base URL.
pub const RPC_PATH: &str = "/core/json.php";

/// Per-button settings, stored by the host as
/// `{ "myurl": .., "myapikey": .., "mynameinput": .. }`.
///
/// Keys written by the property inspector that the plugin does not know about
/// are kept in `extra` so that writing the settings back never drops them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "myurl", default)]
    pub endpoint_url: String,
    #[serde(rename = "myapikey", default)]
    pub api_key: String,
    #[serde(
        rename = "mynameinput",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub display_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Borrowed, validated view of the fields every RPC needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials<'a> {
    pub endpoint_url: &'a str,
    pub api_key: &'a str,
}

impl Credentials<'_> {
    pub fn rpc_url(&self) -> String {
        format!("{}{}", self.endpoint_url.trim_end_matches('/'), RPC_PATH)
    }
}

impl Settings {
    pub fn new(endpoint_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// True when nothing at all has been configured for this key yet.
    pub fn is_empty(&self) -> bool {
        self.endpoint_url.is_empty()
            && self.api_key.is_empty()
            && self.display_name.is_none()
            && self.extra.is_empty()
    }

    /// Endpoint and API key, or `MissingConfiguration` if either is blank.
    pub fn credentials(&self) -> Result<Credentials<'_>, TrackerError> {
        let endpoint_url = self.endpoint_url.trim();
        let api_key = self.api_key.trim();
        if endpoint_url.is_empty() || api_key.is_empty() {
            return Err(TrackerError::MissingConfiguration);
        }
        Ok(Credentials {
            endpoint_url,
            api_key,
        })
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Write one property-inspector value into the settings.
    ///
    /// Known keys only accept strings (numbers and booleans are stringified);
    /// anything else lands in `extra` untouched.
    pub fn apply(&mut self, key: &str, value: Value) {
        let as_text = |value: Value| match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        match key {
            ENDPOINT_URL_KEY => self.endpoint_url = as_text(value),
            API_KEY_KEY => self.api_key = as_text(value),
            DISPLAY_NAME_KEY => self.display_name = Some(as_text(value)),
            _ => {
                self.extra.insert(key.to_string(), value);
            }
        }
    }
}
