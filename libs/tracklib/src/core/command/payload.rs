//! JSON shapes exchanged with the engine's command entry points.

use std::ffi::CString;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{BridgeError, Result};

/// Error kind the engine reports when a session is stopped or destroyed
/// while a command is in flight.
pub const CANCELED_KIND: &str = "Canceled";

/// A named command with its parameters, sent as one flat JSON object:
/// `{"name": "AddAnchor", "anchorId": 3, ...}`.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    name: String,
    params: Map<String, Value>,
}

impl CommandRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Map::new(),
        }
    }

    /// Build a request whose parameters are the fields of `params`, which
    /// must serialize to a JSON object.
    pub fn from_params<P: Serialize>(name: impl Into<String>, params: &P) -> Result<Self> {
        let name = name.into();
        match serde_json::to_value(params)? {
            Value::Object(params) => Ok(Self { name, params }),
            Value::Null => Ok(Self::new(name)),
            other => Err(BridgeError::Payload(format!(
                "parameters of '{}' must be a JSON object, got {}",
                name, other
            ))),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Flat JSON object. A `name` parameter is shadowed by the command name.
    pub fn to_json(&self) -> Value {
        let mut object = Map::with_capacity(self.params.len() + 1);
        object.insert("name".to_owned(), Value::String(self.name.clone()));
        for (key, value) in &self.params {
            if key != "name" {
                object.insert(key.clone(), value.clone());
            }
        }
        Value::Object(object)
    }

    pub(crate) fn to_c_string(&self) -> Result<CString> {
        CString::new(self.to_json().to_string())
            .map_err(|e| BridgeError::Payload(format!("request '{}': {}", self.name, e)))
    }
}

/// Failure reported by the engine for one command, fields taken verbatim
/// from the error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandError {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            code: None,
            command_name: None,
            info: None,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub(crate) fn for_command(mut self, command: &str) -> Self {
        self.command_name.get_or_insert_with(|| command.to_owned());
        self
    }

    /// Payload that could not be interpreted.
    pub(crate) fn malformed(command: &str, detail: impl fmt::Display) -> Self {
        Self::new("MalformedPayload")
            .with_message(detail.to_string())
            .for_command(command)
    }

    /// Failure on the bridge side, not reported by the engine.
    pub(crate) fn internal(command: &str, detail: impl fmt::Display) -> Self {
        Self::new("Internal")
            .with_message(detail.to_string())
            .for_command(command)
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind == CANCELED_KIND
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.command_name {
            Some(name) => write!(f, "Command '{}' failed: {}", name, self.kind)?,
            None => write!(f, "Command failed: {}", self.kind)?,
        }
        if let Some(code) = self.code {
            write!(f, " (code {})", code)?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        if let Some(info) = &self.info {
            write!(f, " [{}]", info)?;
        }
        Ok(())
    }
}

/// Parse an error payload. A literal `null` means "no error".
pub(crate) fn parse_error(payload: &str) -> serde_json::Result<Option<CommandError>> {
    serde_json::from_str(payload)
}

/// Successful result payload, kept raw until the caller picks a type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandResponse(Option<String>);

impl CommandResponse {
    pub fn new(raw: Option<String>) -> Self {
        Self(raw)
    }

    /// Raw JSON, `None` when the engine passed a null result.
    pub fn raw(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Decode into `T`. A null result decodes as JSON `null`, so `()` and
    /// `Option<_>` accept it.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(self.0.as_deref().unwrap_or("null"))?)
    }
}
