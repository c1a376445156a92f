//! Conversation history store
//!
//! An ordered mapping from prompt identity to prompt/response pairs. Display
//! order is derived by sorting on `created_at`, never by insertion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifies the course bot a conversation talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BotId(pub i64);

impl fmt::Display for BotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a prompt. `PromptId::PENDING` marks a prompt the server has
/// not acknowledged yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptId(pub i64);

impl PromptId {
    pub const PENDING: PromptId = PromptId(-1);

    pub fn is_pending(self) -> bool {
        self == Self::PENDING
    }
}

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The generated answer for a prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub body: String,
}

impl Response {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }
}

/// A user-submitted message and, once generated, its answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub id: PromptId,
    pub body: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub response: Option<Response>,
}

impl Prompt {
    /// Optimistic placeholder shown before the server assigns an id.
    /// Its timestamp is the latest representable one so it always sorts last.
    pub fn placeholder(body: impl Into<String>) -> Self {
        Self {
            id: PromptId::PENDING,
            body: body.into(),
            created_at: DateTime::<Utc>::MAX_UTC,
            response: None,
        }
    }
}

/// All prompt/response pairs of one conversation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    prompts: BTreeMap<PromptId, Prompt>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a prompt under its own id, replacing any previous entry
    pub fn insert(&mut self, prompt: Prompt) -> Option<Prompt> {
        self.prompts.insert(prompt.id, prompt)
    }

    pub fn remove(&mut self, id: PromptId) -> Option<Prompt> {
        self.prompts.remove(&id)
    }

    pub fn get(&self, id: PromptId) -> Option<&Prompt> {
        self.prompts.get(&id)
    }

    pub fn contains(&self, id: PromptId) -> bool {
        self.prompts.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    /// Attach a response to a stored prompt. Returns false if the prompt is unknown.
    pub fn set_response(&mut self, id: PromptId, response: Response) -> bool {
        match self.prompts.get_mut(&id) {
            Some(prompt) => {
                prompt.response = Some(response);
                true
            }
            None => false,
        }
    }

    /// The unacknowledged placeholder, if one is present
    pub fn pending(&self) -> Option<&Prompt> {
        self.get(PromptId::PENDING)
    }

    /// Prompts in display order: ascending `created_at`, ties by ascending id.
    pub fn sorted(&self) -> Vec<&Prompt> {
        // BTreeMap iterates by id, and sort_by_key is stable
        let mut prompts: Vec<&Prompt> = self.prompts.values().collect();
        prompts.sort_by_key(|p| p.created_at);
        prompts
    }

    /// The most recent prompt in display order
    pub fn newest(&self) -> Option<&Prompt> {
        self.prompts
            .values()
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
    }

    #[allow(dead_code)] // Used by property tests
    pub fn iter(&self) -> impl Iterator<Item = &Prompt> {
        self.prompts.values()
    }
}

impl FromIterator<Prompt> for History {
    fn from_iter<I: IntoIterator<Item = Prompt>>(iter: I) -> Self {
        let mut history = History::new();
        for prompt in iter {
            history.insert(prompt);
        }
        history
    }
}
