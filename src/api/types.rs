//! Wire types for the course bot HTTP API

use crate::history::{History, Prompt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Body of `GET /api/bots/{bot}/history/`: prompts keyed by their id as a string
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct HistoryPayload(pub HashMap<String, Prompt>);

impl HistoryPayload {
    /// Re-key by each prompt's own id; the string keys are not trusted.
    pub fn into_history(self) -> History {
        self.0.into_values().collect()
    }
}

/// Body of `POST /api/bots/{bot}/prompts/`
#[derive(Debug, Clone, Serialize)]
pub struct NewPrompt<'a> {
    pub body: &'a str,
}
