//! Conversation state types

use crate::history::{BotId, History, Prompt};

/// The bot a conversation instance is mounted for (immutable configuration)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotInfo {
    pub id: BotId,
    pub name: String,
}

impl BotInfo {
    pub fn new(id: BotId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// The single in-flight submission, if any
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Phase {
    /// Ready for a new submission
    #[default]
    Idle,

    /// Create-prompt request outstanding; the placeholder is in history
    CreatingPrompt,

    /// Response stream open for `prompt`, accumulating into `buffer`
    Streaming { prompt: Prompt, buffer: String },
}

/// Conversation state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvState {
    pub bot: BotInfo,
    /// Anti-forgery token sent with every mutating request
    pub csrf_token: String,
    pub history: History,
    /// Contents of the input box
    pub draft: String,
    /// User-visible notice after a recoverable failure
    pub status_text: Option<String>,
    pub phase: Phase,
}

impl ConvState {
    pub fn new(bot: BotInfo, csrf_token: impl Into<String>) -> Self {
        Self {
            bot,
            csrf_token: csrf_token.into(),
            history: History::new(),
            draft: String::new(),
            status_text: None,
            phase: Phase::Idle,
        }
    }

    /// True while a prompt is being created or its response is streaming
    pub fn is_response_loading(&self) -> bool {
        !matches!(self.phase, Phase::Idle)
    }

    pub fn prompt_awaiting_response(&self) -> Option<&Prompt> {
        match &self.phase {
            Phase::Streaming { prompt, .. } => Some(prompt),
            _ => None,
        }
    }

    /// Text received so far for the prompt awaiting a response
    pub fn active_response_buffer(&self) -> &str {
        match &self.phase {
            Phase::Streaming { buffer, .. } => buffer,
            _ => "",
        }
    }
}
