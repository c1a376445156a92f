//! Effects produced by state transitions

use crate::history::{BotId, PromptId};
use std::fmt;

/// Address of a rendered element: `prompt{id}` or `response{id}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(String);

impl ElementId {
    pub fn prompt(id: PromptId) -> Self {
        Self(format!("prompt{id}"))
    }

    pub fn response(id: PromptId) -> Self {
        Self(format!("response{id}"))
    }

    #[allow(dead_code)] // Used by tests
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Load the full conversation history
    FetchHistory { bot_id: BotId },

    /// Create the prompt on the server
    CreatePrompt {
        bot_id: BotId,
        body: String,
        csrf_token: String,
    },

    /// Trigger generation and stream the response body back as events
    OpenResponseStream {
        bot_id: BotId,
        prompt_id: PromptId,
        csrf_token: String,
    },

    /// Bring an element into view once it has been rendered
    ScrollIntoView { element_id: ElementId },
}

impl Effect {
    pub fn scroll_to_prompt(id: PromptId) -> Self {
        Effect::ScrollIntoView {
            element_id: ElementId::prompt(id),
        }
    }

    pub fn scroll_to_response(id: PromptId) -> Self {
        Effect::ScrollIntoView {
            element_id: ElementId::response(id),
        }
    }
}
