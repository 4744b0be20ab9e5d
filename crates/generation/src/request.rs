use {
    chrono::{DateTime, Utc},
    serde::Serialize,
    uuid::Uuid,
};

use crate::error::{Error, Result};

/// One prompt submission. Immutable once created.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    id: Uuid,
    prompt: String,
    submitted_at: DateTime<Utc>,
}

impl GenerationRequest {
    /// Validate `prompt` (trimmed, non-empty, at most `max_chars`
    /// characters) and stamp a fresh request id.
    pub fn new(prompt: &str, max_chars: usize) -> Result<Self> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(Error::invalid_request("prompt is empty"));
        }
        let len = prompt.chars().count();
        if len > max_chars {
            return Err(Error::invalid_request(format!(
                "prompt is {len} characters, the limit is {max_chars}"
            )));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            prompt: prompt.to_string(),
            submitted_at: Utc::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }
}
