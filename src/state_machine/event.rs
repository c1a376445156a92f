//! Events that can occur in a conversation

use crate::history::{History, Prompt, PromptId};

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // User events
    DraftChanged {
        text: String,
    },
    SubmitDraft,
    RefreshHistory,

    // Backend acknowledgements. Errors carry only a message: they are
    // reported to the user, never inspected.
    HistoryFetched(Result<History, String>),
    PromptCreated(Result<Prompt, String>),

    // Response stream
    ResponseChunk {
        text: String,
    },
    ResponseStreamEnded {
        prompt_id: PromptId,
    },
}

impl Event {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Event::DraftChanged { .. } => "draft_changed",
            Event::SubmitDraft => "submit_draft",
            Event::RefreshHistory => "refresh_history",
            Event::HistoryFetched(_) => "history_fetched",
            Event::PromptCreated(_) => "prompt_created",
            Event::ResponseChunk { .. } => "response_chunk",
            Event::ResponseStreamEnded { .. } => "response_stream_ended",
        }
    }
}
