//! Pure projection of conversation state into an element tree
//!
//! Hosts draw the tree however they like; addressable nodes carry the
//! `ElementId` that scroll effects refer to.

use crate::state_machine::{ConvState, ElementId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Header,
    Status,
    Conversation,
    Prompt,
    Response,
    Input,
    Submit { enabled: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewNode {
    pub kind: NodeKind,
    pub id: Option<ElementId>,
    pub text: String,
    pub children: Vec<ViewNode>,
}

impl ViewNode {
    fn leaf(kind: NodeKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            id: None,
            text: text.into(),
            children: Vec::new(),
        }
    }

    fn addressed(kind: NodeKind, id: ElementId, text: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            ..Self::leaf(kind, text)
        }
    }

    /// First direct child of the given kind
    pub fn child(&self, kind: NodeKind) -> Option<&ViewNode> {
        self.children.iter().find(|c| c.kind == kind)
    }

    /// Depth-first search for an addressable node
    #[allow(dead_code)] // Used by tests
    pub fn find(&self, id: &ElementId) -> Option<&ViewNode> {
        if self.id.as_ref() == Some(id) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }
}

/// Project the state into a fresh tree
pub fn view(state: &ConvState) -> ViewNode {
    let mut children = vec![ViewNode::leaf(NodeKind::Header, &state.bot.name)];

    if let Some(status) = &state.status_text {
        children.push(ViewNode::leaf(NodeKind::Status, status));
    }

    children.push(conversation(state));
    children.push(ViewNode::leaf(NodeKind::Input, &state.draft));
    children.push(ViewNode::leaf(
        NodeKind::Submit {
            enabled: !state.is_response_loading(),
        },
        "Send",
    ));

    ViewNode {
        kind: NodeKind::Root,
        id: None,
        text: String::new(),
        children,
    }
}

fn conversation(state: &ConvState) -> ViewNode {
    let awaiting = state.prompt_awaiting_response().map(|p| p.id);
    let buffer = state.active_response_buffer();

    let mut nodes = Vec::with_capacity(state.history.len() * 2);
    for prompt in state.history.sorted() {
        nodes.push(ViewNode::addressed(
            NodeKind::Prompt,
            ElementId::prompt(prompt.id),
            &prompt.body,
        ));

        let response_text = match &prompt.response {
            Some(response) => Some(response.body.as_str()),
            None if awaiting == Some(prompt.id) && !buffer.is_empty() => Some(buffer),
            None => None,
        };
        if let Some(text) = response_text {
            nodes.push(ViewNode::addressed(
                NodeKind::Response,
                ElementId::response(prompt.id),
                text,
            ));
        }
    }

    ViewNode {
        children: nodes,
        ..ViewNode::leaf(NodeKind::Conversation, "")
    }
}
