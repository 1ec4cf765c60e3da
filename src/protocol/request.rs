use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Body of one chat stream request.
///
/// Serialized as snake_case JSON; unset optional fields are omitted so the
/// backend applies its own defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_rag: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl StreamRequest {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_id: None,
            use_rag: None,
            temperature: None,
            max_tokens: None,
        }
    }

    #[must_use]
    pub fn with_conversation_id(mut self, conversation_id: i64) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    #[must_use]
    pub fn with_rag(mut self, use_rag: bool) -> Self {
        self.use_rag = Some(use_rag);
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Reject requests the backend could never accept.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidRequest`] for an empty message, a
    /// non-finite or negative temperature, or a zero token limit.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.message.trim().is_empty() {
            return Err(StreamError::InvalidRequest(
                "message cannot be empty".to_string(),
            ));
        }
        if let Some(temperature) = self.temperature {
            if !temperature.is_finite() || temperature < 0.0 {
                return Err(StreamError::InvalidRequest(format!(
                    "temperature must be a non-negative number, got {temperature}"
                )));
            }
        }
        if self.max_tokens == Some(0) {
            return Err(StreamError::InvalidRequest(
                "max_tokens must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize into the JSON body sent to the backend.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidRequest`] when serialization fails.
    pub fn to_body(&self) -> Result<bytes::Bytes, StreamError> {
        serde_json::to_vec(self)
            .map(bytes::Bytes::from)
            .map_err(|err| StreamError::InvalidRequest(format!("failed to encode request: {err}")))
    }
}
