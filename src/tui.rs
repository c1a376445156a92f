//! Terminal host
//!
//! Draws the view tree with ratatui and turns key presses into events. The
//! line offset of every addressable node from the last frame is kept in a
//! `TerminalViewport`, which is what scroll effects resolve against.

use crate::runtime::{ConversationHandle, Notice, Viewport};
use crate::state_machine::{ConvState, ElementId, Event};
use crate::view::{view, NodeKind, ViewNode};
use crossterm::event::{
    Event as TermEvent, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use futures::StreamExt;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Paragraph};
use ratatui::{Frame, Terminal};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc, watch};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const KEY_HELP: &str = "Enter send · Ctrl-R refresh · PgUp/PgDn scroll · Esc quit";
const PAGE: i32 = 10;

// ============================================================================
// Viewport
// ============================================================================

#[derive(Debug, Default)]
struct ScreenLayout {
    anchors: HashMap<ElementId, usize>,
    total_lines: usize,
    height: usize,
    scroll: usize,
}

impl ScreenLayout {
    fn clamp(&self, line: usize) -> usize {
        line.min(self.total_lines.saturating_sub(self.height))
    }
}

/// Line positions of the conversation as last drawn
#[derive(Debug, Default)]
pub struct TerminalViewport {
    layout: Mutex<ScreenLayout>,
}

impl TerminalViewport {
    pub fn new() -> Self {
        Self::default()
    }

    fn layout(&self) -> MutexGuard<'_, ScreenLayout> {
        self.layout.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a freshly drawn frame; returns the scroll offset to draw with
    fn update(
        &self,
        anchors: HashMap<ElementId, usize>,
        total_lines: usize,
        height: usize,
    ) -> usize {
        let mut layout = self.layout();
        layout.anchors = anchors;
        layout.total_lines = total_lines;
        layout.height = height;
        layout.scroll = layout.clamp(layout.scroll);
        layout.scroll
    }

    pub fn scroll_by(&self, delta: i32) {
        let mut layout = self.layout();
        let step = usize::try_from(delta.unsigned_abs()).unwrap_or(usize::MAX);
        let target = if delta < 0 {
            layout.scroll.saturating_sub(step)
        } else {
            layout.scroll.saturating_add(step)
        };
        layout.scroll = layout.clamp(target);
    }

    #[allow(dead_code)] // Used by tests
    pub fn scroll_offset(&self) -> usize {
        self.layout().scroll
    }
}

impl Viewport for TerminalViewport {
    fn scroll_into_view(&self, element: &ElementId) -> bool {
        let mut layout = self.layout();
        match layout.anchors.get(element).copied() {
            Some(line) => {
                layout.scroll = layout.clamp(line);
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// Layout
// ============================================================================

/// Hard-wrap `text` to `width` display columns, keeping explicit line breaks
fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    for raw in text.split('\n') {
        let mut line = String::new();
        let mut used = 0;
        for c in raw.chars() {
            let w = c.width().unwrap_or(0);
            if used + w > width && !line.is_empty() {
                lines.push(std::mem::take(&mut line));
                used = 0;
            }
            line.push(c);
            used += w;
        }
        lines.push(line);
    }
    lines
}

/// Flatten the conversation node into styled lines and the first line of
/// each addressable node
fn conversation_lines(
    conversation: &ViewNode,
    bot_name: &str,
    width: usize,
) -> (Vec<Line<'static>>, HashMap<ElementId, usize>) {
    let mut lines = Vec::new();
    let mut anchors = HashMap::new();

    for node in &conversation.children {
        let (label, style) = match node.kind {
            NodeKind::Prompt => {
                if !lines.is_empty() {
                    lines.push(Line::default());
                }
                ("You", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
            }
            NodeKind::Response => (
                bot_name,
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            ),
            _ => continue,
        };

        if let Some(id) = &node.id {
            anchors.insert(id.clone(), lines.len());
        }
        lines.push(Line::from(Span::styled(format!("{label}:"), style)));
        lines.extend(wrap(&node.text, width).into_iter().map(Line::from));
    }

    (lines, anchors)
}

fn to_u16(n: usize) -> u16 {
    u16::try_from(n).unwrap_or(u16::MAX)
}

fn render(
    frame: &mut Frame,
    root: &ViewNode,
    draft: &str,
    viewport: &TerminalViewport,
    footer: Option<&str>,
) {
    let header = root.child(NodeKind::Header).map_or("", |n| n.text.as_str());
    let status = root.child(NodeKind::Status);
    let submit_enabled = root
        .children
        .iter()
        .any(|n| n.kind == NodeKind::Submit { enabled: true });

    let mut constraints = vec![
        Constraint::Min(3),
        Constraint::Length(3),
        Constraint::Length(1),
    ];
    if status.is_some() {
        constraints.insert(0, Constraint::Length(1));
    }
    let areas = Layout::vertical(constraints).split(frame.area());
    let (status_area, rest) = match status {
        Some(_) => (Some(areas[0]), &areas[1..]),
        None => (None, &areas[..]),
    };
    let (conversation_area, input_area, footer_area) = (rest[0], rest[1], rest[2]);

    if let (Some(area), Some(node)) = (status_area, status) {
        frame.render_widget(
            Paragraph::new(node.text.as_str()).style(Style::default().fg(Color::Red)),
            area,
        );
    }

    render_conversation(frame, root, header, viewport, conversation_area);

    let input_title = if submit_enabled {
        "Message"
    } else {
        "Message (waiting for response)"
    };
    frame.render_widget(
        Paragraph::new(draft).block(Block::bordered().title(input_title)),
        input_area,
    );
    let cursor_x = input_area
        .x
        .saturating_add(1)
        .saturating_add(to_u16(draft.width()))
        .min(input_area.right().saturating_sub(2));
    frame.set_cursor_position((cursor_x, input_area.y + 1));

    let footer_style = if footer.is_some() {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    frame.render_widget(
        Paragraph::new(footer.unwrap_or(KEY_HELP)).style(footer_style),
        footer_area,
    );
}

fn render_conversation(
    frame: &mut Frame,
    root: &ViewNode,
    bot_name: &str,
    viewport: &TerminalViewport,
    area: Rect,
) {
    let block = Block::bordered().title(bot_name.to_string());
    let inner = block.inner(area);

    let (lines, anchors) = match root.child(NodeKind::Conversation) {
        Some(conversation) => conversation_lines(conversation, bot_name, usize::from(inner.width)),
        None => (Vec::new(), HashMap::new()),
    };
    let scroll = viewport.update(anchors, lines.len(), usize::from(inner.height));

    frame.render_widget(
        Paragraph::new(lines)
            .block(block)
            .scroll((to_u16(scroll), 0)),
        area,
    );
}

// ============================================================================
// Input
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
enum Action {
    Send(Event),
    Scroll(i32),
    Quit,
}

/// Map a key press to what the host should do, given the current draft
fn key_action(key: KeyEvent, draft: &str) -> Option<Action> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Esc => Some(Action::Quit),
        KeyCode::Char('c') if ctrl => Some(Action::Quit),
        KeyCode::Char('r') if ctrl => Some(Action::Send(Event::RefreshHistory)),
        KeyCode::Enter => Some(Action::Send(Event::SubmitDraft)),
        KeyCode::Backspace => {
            let mut text = draft.to_string();
            text.pop()?;
            Some(Action::Send(Event::DraftChanged { text }))
        }
        KeyCode::Char(c) if !ctrl => {
            let mut text = draft.to_string();
            text.push(c);
            Some(Action::Send(Event::DraftChanged { text }))
        }
        KeyCode::Up => Some(Action::Scroll(-1)),
        KeyCode::Down => Some(Action::Scroll(1)),
        KeyCode::PageUp => Some(Action::Scroll(-PAGE)),
        KeyCode::PageDown => Some(Action::Scroll(PAGE)),
        _ => None,
    }
}

/// The draft as typed here. Every edit is sent as a whole draft, so the
/// published draft lags behind while the runtime catches up; it only
/// replaces the local text when it is none of the drafts sent from here.
#[derive(Debug, Default)]
struct DraftBuffer {
    text: String,
    /// Drafts sent but not yet seen in a published state, oldest first
    unconfirmed: VecDeque<String>,
    /// Draft of the last published state
    confirmed: String,
}

impl DraftBuffer {
    fn edit(&mut self, text: &str) {
        self.text = text.to_string();
        self.unconfirmed.push_back(self.text.clone());
    }

    /// An accepted submission takes the draft and leaves it empty
    fn submit(&mut self) {
        if self.text.trim().is_empty() {
            return;
        }
        self.text.clear();
        self.unconfirmed.push_back(String::new());
    }

    fn sync(&mut self, published: &str) {
        if published == self.confirmed {
            return;
        }
        if let Some(pos) = self.unconfirmed.iter().position(|d| d == published) {
            self.unconfirmed.drain(..=pos);
        } else {
            self.text = published.to_string();
            self.unconfirmed.clear();
        }
        self.confirmed = published.to_string();
    }
}

// ============================================================================
// Event loop
// ============================================================================

struct App {
    event_tx: mpsc::Sender<Event>,
    state_rx: watch::Receiver<ConvState>,
    notices: broadcast::Receiver<Notice>,
    viewport: Arc<TerminalViewport>,
    draft: DraftBuffer,
    footer: Option<String>,
    running: bool,
}

impl App {
    fn new(handle: ConversationHandle, viewport: Arc<TerminalViewport>) -> Self {
        Self {
            notices: handle.subscribe(),
            event_tx: handle.event_tx,
            state_rx: handle.state_rx,
            viewport,
            draft: DraftBuffer::default(),
            footer: None,
            running: true,
        }
    }

    async fn run(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> io::Result<()> {
        let mut events = EventStream::new();
        self.draw(terminal)?;

        while self.running {
            tokio::select! {
                maybe_event = events.next() => match maybe_event {
                    Some(Ok(TermEvent::Key(key))) if key.kind == KeyEventKind::Press => {
                        self.handle_key(key).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e),
                    None => break,
                },
                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        tracing::info!("Conversation stopped, leaving terminal");
                        break;
                    }
                }
                notice = self.notices.recv() => match notice {
                    Ok(Notice { message }) => self.footer = Some(message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Notices lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
            self.draw(terminal)?;
        }

        Ok(())
    }

    async fn handle_key(&mut self, key: KeyEvent) {
        self.footer = None;
        match key_action(key, &self.draft.text) {
            Some(Action::Send(event)) => {
                match &event {
                    Event::DraftChanged { text } => self.draft.edit(text),
                    Event::SubmitDraft if !self.state_rx.borrow().is_response_loading() => {
                        self.draft.submit();
                    }
                    _ => {}
                }
                if self.event_tx.send(event).await.is_err() {
                    self.running = false;
                }
            }
            Some(Action::Scroll(delta)) => self.viewport.scroll_by(delta),
            Some(Action::Quit) => self.running = false,
            None => {}
        }
    }

    /// Take in the latest published state and project it
    fn refresh(&mut self) -> ViewNode {
        let state = self.state_rx.borrow_and_update();
        self.draft.sync(&state.draft);
        view(&state)
    }

    fn draw(&mut self, terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> io::Result<()> {
        let root = self.refresh();
        let draft = self.draft.text.as_str();
        let footer = self.footer.as_deref();
        let viewport = &self.viewport;
        terminal.draw(|frame| render(frame, &root, draft, viewport, footer))?;
        Ok(())
    }
}

/// Take over the terminal and run the chat until the user quits
pub async fn run(handle: ConversationHandle, viewport: Arc<TerminalViewport>) -> io::Result<()> {
    let mut app = App::new(handle, viewport);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let result = app.run(&mut terminal).await;

    // Restore the terminal even when the loop failed
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}
