//! Pure state transition function
//!
//! Given the same state and event, `transition` always produces the same new
//! state and effects. All I/O happens in the runtime.

use super::state::Phase;
use super::{ConvState, Effect, Event};
use crate::history::{Prompt, PromptId, Response};
use thiserror::Error;

pub const HISTORY_FAILED_NOTICE: &str =
    "Could not load the conversation history. Press Ctrl-R to refresh.";
pub const PROMPT_FAILED_NOTICE: &str = "Your message could not be sent. Please resubmit it.";

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConvState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConvState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("A response is still loading, wait for it to finish")]
    ResponseLoading,
    #[error("Cannot send an empty message")]
    EmptyDraft,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
pub fn transition(state: &ConvState, event: Event) -> Result<TransitionResult, TransitionError> {
    match (&state.phase, event) {
        // ============================================================
        // Input
        // ============================================================
        (_, Event::DraftChanged { text }) => {
            let mut next = state.clone();
            next.draft = text;
            Ok(TransitionResult::new(next))
        }

        (Phase::Idle, Event::SubmitDraft) => {
            if state.draft.trim().is_empty() {
                return Err(TransitionError::EmptyDraft);
            }

            let mut next = state.clone();
            let body = std::mem::take(&mut next.draft);
            next.history.insert(Prompt::placeholder(body.clone()));
            next.status_text = None;
            next.phase = Phase::CreatingPrompt;

            Ok(TransitionResult::new(next)
                .with_effect(Effect::CreatePrompt {
                    bot_id: state.bot.id,
                    body,
                    csrf_token: state.csrf_token.clone(),
                })
                .with_effect(Effect::scroll_to_prompt(PromptId::PENDING)))
        }

        (Phase::CreatingPrompt | Phase::Streaming { .. }, Event::SubmitDraft) => {
            Err(TransitionError::ResponseLoading)
        }

        // ============================================================
        // Prompt creation
        // ============================================================
        (Phase::CreatingPrompt, Event::PromptCreated(Ok(prompt))) => {
            let mut next = state.clone();
            next.history.remove(PromptId::PENDING);
            next.history.insert(prompt.clone());
            let prompt_id = prompt.id;
            next.phase = Phase::Streaming {
                prompt,
                buffer: String::new(),
            };

            Ok(TransitionResult::new(next).with_effects([
                Effect::OpenResponseStream {
                    bot_id: state.bot.id,
                    prompt_id,
                    csrf_token: state.csrf_token.clone(),
                },
                Effect::scroll_to_prompt(prompt_id),
            ]))
        }

        // The placeholder stays visible so the user can see what to resubmit
        (Phase::CreatingPrompt, Event::PromptCreated(Err(_))) => {
            let mut next = state.clone();
            next.status_text = Some(PROMPT_FAILED_NOTICE.to_string());
            next.phase = Phase::Idle;
            Ok(TransitionResult::new(next))
        }

        // ============================================================
        // Response streaming
        // ============================================================
        (Phase::Streaming { .. }, Event::ResponseChunk { text }) => {
            let mut next = state.clone();
            if let Phase::Streaming { buffer, .. } = &mut next.phase {
                buffer.push_str(&text);
            }
            Ok(TransitionResult::new(next))
        }

        (Phase::Streaming { prompt, buffer }, Event::ResponseStreamEnded { prompt_id })
            if prompt.id == prompt_id =>
        {
            let mut next = state.clone();
            let response = Response::new(buffer.clone());
            if !next.history.set_response(prompt_id, response.clone()) {
                next.history.insert(Prompt {
                    response: Some(response),
                    ..prompt.clone()
                });
            }
            next.phase = Phase::Idle;

            Ok(TransitionResult::new(next).with_effect(Effect::scroll_to_response(prompt_id)))
        }

        // ============================================================
        // History
        // ============================================================
        // In-flight prompts survive the replacement so the view never drops them
        (phase, Event::HistoryFetched(Ok(history))) => {
            let mut next = state.clone();
            let in_flight = match phase {
                Phase::Idle => None,
                Phase::CreatingPrompt => state.history.pending().cloned(),
                Phase::Streaming { prompt, .. } => state.history.get(prompt.id).cloned(),
            };
            next.history = history;
            if let Some(prompt) = in_flight {
                next.history.insert(prompt);
            }
            let newest = next.history.newest().map(|p| p.id);

            Ok(TransitionResult::new(next).with_effects(newest.map(Effect::scroll_to_prompt)))
        }

        (_, Event::HistoryFetched(Err(_))) => {
            let mut next = state.clone();
            next.status_text = Some(HISTORY_FAILED_NOTICE.to_string());
            Ok(TransitionResult::new(next))
        }

        (Phase::Idle, Event::RefreshHistory) => {
            let mut next = state.clone();
            next.status_text = None;
            Ok(TransitionResult::new(next).with_effect(Effect::FetchHistory {
                bot_id: state.bot.id,
            }))
        }

        (_, Event::RefreshHistory) => Err(TransitionError::ResponseLoading),

        // ============================================================
        // Everything else is out of order
        // ============================================================
        (phase, event) => Err(TransitionError::InvalidTransition(format!(
            "{} while {}",
            event.name(),
            phase_name(phase)
        ))),
    }
}

fn phase_name(phase: &Phase) -> &'static str {
    match phase {
        Phase::Idle => "idle",
        Phase::CreatingPrompt => "creating prompt",
        Phase::Streaming { .. } => "streaming",
    }
}
