//! JSON control frames exchanged with the backend agent

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Frame sent to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// One user turn
    Transcript { text: String },
}

impl OutboundFrame {
    /// Encode as a text frame payload
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Frame received from the backend
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// A new reply begins
    AssistantStart,
    /// Next piece of reply text
    AssistantToken { text: String },
    /// Reply text and audio are complete
    AssistantDone,
    /// Greeting sent by the server once the socket is accepted
    ServerHello,
    /// Server-side failure
    Error {
        #[serde(default)]
        message: String,
    },
    /// Server abandoned the current reply
    Interrupted,
}

/// Decode a text frame
///
/// Returns `Ok(None)` for a JSON object whose `type` is missing or unknown.
///
/// # Errors
///
/// Returns `MalformedFrame` if the text is not JSON, or a known frame type
/// has missing or mistyped fields
pub fn decode_text(text: &str) -> Result<Option<InboundFrame>> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| Error::MalformedFrame(e.to_string()))?;

    let Some(kind) = value.get("type").and_then(serde_json::Value::as_str) else {
        return Ok(None);
    };

    if !matches!(
        kind,
        "assistant_start"
            | "assistant_token"
            | "assistant_done"
            | "server_hello"
            | "error"
            | "interrupted"
    ) {
        tracing::trace!(kind, "ignoring unknown frame type");
        return Ok(None);
    }

    let kind = kind.to_owned();
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| Error::MalformedFrame(format!("{kind}: {e}")))
}
