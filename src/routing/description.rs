//! Declarative service description.
//!
//! The route table is built from this document, not from generated code.
//!
//! ```toml
//! [[services]]
//! name = "queue.Queue"
//!
//! [[services.methods]]
//! name = "GetQueue"
//! input = "queue.GetQueueRequest"
//! output = "queue.GetQueueResponse"
//!
//! [[services.methods.http]]
//! method = "GET"
//! path = "/v1/queue/{id}"
//!
//! [messages."queue.GetQueueRequest"]
//! id = "string"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Root of a service description file.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceDescription {
    pub services: Vec<ServiceConfig>,

    /// Message name → field name → field type.
    pub messages: BTreeMap<String, BTreeMap<String, String>>,
}

/// One backend service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Fully-qualified service name, e.g. `queue.Queue`.
    pub name: String,

    #[serde(default)]
    pub methods: Vec<MethodConfig>,
}

/// One RPC method and its HTTP bindings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MethodConfig {
    pub name: String,

    /// Request message type.
    pub input: String,

    /// Response message type.
    pub output: String,

    /// Backend replies with a stream of messages.
    #[serde(default)]
    pub server_streaming: bool,

    /// HTTP routes mapped to this method.
    #[serde(default)]
    pub http: Vec<HttpRuleConfig>,
}

/// An HTTP verb + path template binding.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpRuleConfig {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE, ...).
    pub method: String,

    /// Path template, e.g. `/v1/widgets/{id}`.
    pub path: String,

    /// `""` for no body, `"*"` for the whole request message,
    /// or the name of the field the body populates.
    #[serde(default)]
    pub body: String,

    /// Optional response field returned instead of the whole message.
    #[serde(default)]
    pub response_body: String,
}

#[derive(Debug, Error)]
pub enum DescriptionError {
    #[error("failed to read service description: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse service description: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ServiceDescription {
    pub fn from_toml_str(content: &str) -> Result<Self, DescriptionError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a description from a TOML file.
    pub fn load(path: &Path) -> Result<Self, DescriptionError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
