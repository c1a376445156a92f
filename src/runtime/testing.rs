//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::*;
use super::{ConversationRuntime, MountId, Notice, RuntimeSettings};
use crate::api::{ApiError, ByteStream};
use crate::history::{BotId, History, Prompt, PromptId};
use crate::state_machine::{BotInfo, ConvState, ElementId, Event};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use futures::{stream, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Mock Chat API
// ============================================================================

/// A request the runtime made against the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    FetchHistory(BotId),
    CreatePrompt {
        bot_id: BotId,
        body: String,
        csrf_token: String,
    },
    OpenResponseStream {
        bot_id: BotId,
        prompt_id: PromptId,
        csrf_token: String,
    },
}

type StreamResult = Result<Vec<Result<Bytes, ApiError>>, ApiError>;

/// Backend that answers from queues. An empty history queue answers with
/// an empty history; the other queues answer with a network error.
#[derive(Default)]
pub struct MockChatApi {
    histories: Mutex<VecDeque<Result<History, ApiError>>>,
    prompts: Mutex<VecDeque<Result<Prompt, ApiError>>>,
    streams: Mutex<VecDeque<StreamResult>>,
    /// When set, prompt creation waits for a permit
    prompt_gate: Option<Arc<Notify>>,
    /// Record of all requests made
    pub calls: Mutex<Vec<ApiCall>>,
}

impl MockChatApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every prompt creation until the returned gate is notified
    pub fn with_prompt_gate(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.prompt_gate = Some(gate.clone());
        (self, gate)
    }

    /// A server-side prompt created `created_ms` after the epoch
    pub fn prompt(id: i64, body: &str, created_ms: i64) -> Prompt {
        Prompt {
            id: PromptId(id),
            body: body.to_string(),
            created_at: Utc.timestamp_millis_opt(created_ms).unwrap(),
            response: None,
        }
    }

    pub fn queue_history(&self, history: Result<History, ApiError>) {
        self.histories.lock().unwrap().push_back(history);
    }

    pub fn queue_prompt(&self, prompt: Result<Prompt, ApiError>) {
        self.prompts.lock().unwrap().push_back(prompt);
    }

    /// Queue a response body delivered as the given chunks
    pub fn queue_stream(&self, chunks: &[&[u8]]) {
        let chunks = chunks
            .iter()
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        self.streams.lock().unwrap().push_back(Ok(chunks));
    }

    /// Queue a stream that fails mid-body after the given chunks
    pub fn queue_broken_stream(&self, chunks: &[&[u8]], error: ApiError) {
        let mut items: Vec<_> = chunks
            .iter()
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        items.push(Err(error));
        self.streams.lock().unwrap().push_back(Ok(items));
    }

    /// Queue a stream that cannot be opened
    pub fn queue_stream_error(&self, error: ApiError) {
        self.streams.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatApi for MockChatApi {
    async fn fetch_history(&self, bot_id: BotId) -> Result<History, ApiError> {
        self.calls.lock().unwrap().push(ApiCall::FetchHistory(bot_id));
        self.histories
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(History::new()))
    }

    async fn create_prompt(
        &self,
        bot_id: BotId,
        body: &str,
        csrf_token: &str,
    ) -> Result<Prompt, ApiError> {
        self.calls.lock().unwrap().push(ApiCall::CreatePrompt {
            bot_id,
            body: body.to_string(),
            csrf_token: csrf_token.to_string(),
        });
        if let Some(gate) = self.prompt_gate.clone() {
            gate.notified().await;
        }
        self.prompts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::network("No mock prompt queued")))
    }

    async fn open_response_stream(
        &self,
        bot_id: BotId,
        prompt_id: PromptId,
        csrf_token: &str,
    ) -> Result<ByteStream, ApiError> {
        self.calls.lock().unwrap().push(ApiCall::OpenResponseStream {
            bot_id,
            prompt_id,
            csrf_token: csrf_token.to_string(),
        });
        let chunks = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::network("No mock stream queued")))?;
        Ok(stream::iter(chunks).boxed())
    }
}

// ============================================================================
// Mock Viewport
// ============================================================================

/// Viewport where elements appear only once the test renders them
#[derive(Default)]
pub struct MockViewport {
    render_all: bool,
    rendered: Mutex<HashSet<ElementId>>,
    /// Every scroll attempt, successful or not
    pub attempts: Mutex<Vec<ElementId>>,
    pub scrolled: Mutex<Vec<ElementId>>,
}

impl MockViewport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Viewport on which every element is already rendered
    pub fn rendering_everything() -> Self {
        Self {
            render_all: true,
            ..Self::default()
        }
    }

    pub fn render(&self, element: ElementId) {
        self.rendered.lock().unwrap().insert(element);
    }

    pub fn attempts_for(&self, element: &ElementId) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|e| *e == element)
            .count()
    }

    pub fn was_scrolled(&self, element: &ElementId) -> bool {
        self.scrolled.lock().unwrap().contains(element)
    }
}

impl Viewport for MockViewport {
    fn scroll_into_view(&self, element: &ElementId) -> bool {
        self.attempts.lock().unwrap().push(element.clone());
        let visible = self.render_all || self.rendered.lock().unwrap().contains(element);
        if visible {
            self.scrolled.lock().unwrap().push(element.clone());
        }
        visible
    }
}

// ============================================================================
// Test Runtime Builder
// ============================================================================

/// Helper for building test runtimes with minimal boilerplate
pub struct TestRuntime {
    pub api: Arc<MockChatApi>,
    pub viewport: Arc<MockViewport>,
    pub event_tx: mpsc::Sender<Event>,
    pub state_rx: watch::Receiver<ConvState>,
    pub notice_rx: broadcast::Receiver<Notice>,
    pub shutdown: CancellationToken,
    _runtime_handle: tokio::task::JoinHandle<()>,
}

impl TestRuntime {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> TestRuntimeBuilder {
        TestRuntimeBuilder::default()
    }
}

#[derive(Default)]
pub struct TestRuntimeBuilder {
    api: Option<MockChatApi>,
    viewport: Option<MockViewport>,
    settings: RuntimeSettings,
}

impl TestRuntimeBuilder {
    pub fn api(mut self, api: MockChatApi) -> Self {
        self.api = Some(api);
        self
    }

    pub fn viewport(mut self, viewport: MockViewport) -> Self {
        self.viewport = Some(viewport);
        self
    }

    pub fn settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> TestRuntime {
        let api = Arc::new(self.api.unwrap_or_default());
        let viewport = Arc::new(
            self.viewport
                .unwrap_or_else(MockViewport::rendering_everything),
        );

        let state = ConvState::new(BotInfo::new(BotId(1), "Test Bot"), "token");
        let (event_tx, event_rx) = mpsc::channel(32);
        let (state_tx, state_rx) = watch::channel(state.clone());
        let (notice_tx, notice_rx) = broadcast::channel(32);
        let shutdown = CancellationToken::new();

        let runtime = ConversationRuntime::new(
            MountId::new("test-mount"),
            state,
            api.clone(),
            viewport.clone(),
            self.settings,
            event_rx,
            event_tx.clone(),
            state_tx,
            notice_tx,
            shutdown.clone(),
        );

        let handle = tokio::spawn(async move {
            runtime.run().await;
        });

        TestRuntime {
            api,
            viewport,
            event_tx,
            state_rx,
            notice_rx,
            shutdown,
            _runtime_handle: handle,
        }
    }
}

impl TestRuntime {
    pub async fn send(&self, event: Event) {
        self.event_tx
            .send(event)
            .await
            .expect("Failed to send event");
    }

    /// Type `text` into the composer and submit it
    pub async fn submit(&self, text: &str) {
        self.send(Event::DraftChanged {
            text: text.to_string(),
        })
        .await;
        self.send(Event::SubmitDraft).await;
    }

    /// Wait until a published state satisfies `pred`
    pub async fn wait_for_state(
        &mut self,
        pred: impl FnMut(&ConvState) -> bool,
        timeout: Duration,
    ) -> Option<ConvState> {
        match tokio::time::timeout(timeout, self.state_rx.wait_for(pred)).await {
            Ok(Ok(state)) => Some(state.clone()),
            _ => None,
        }
    }

    pub async fn wait_for_notice(&mut self, timeout: Duration) -> Option<Notice> {
        tokio::time::timeout(timeout, self.notice_rx.recv())
            .await
            .ok()?
            .ok()
    }

    /// Poll until the viewport has scrolled to `element`
    pub async fn wait_for_scroll(&self, element: &ElementId, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.viewport.was_scrolled(element) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Response;
    use crate::state_machine::transition::{HISTORY_FAILED_NOTICE, PROMPT_FAILED_NOTICE};
    use crate::state_machine::Phase;

    const WAIT: Duration = Duration::from_secs(2);

    /// Runtime whose initial history holds one earlier exchange, already loaded
    async fn loaded_runtime(api: MockChatApi, viewport: MockViewport) -> TestRuntime {
        let mut earlier = MockChatApi::prompt(1, "earlier", 1_000);
        earlier.response = Some(Response::new("before"));
        api.queue_history(Ok(History::from_iter([earlier])));

        let mut rt = TestRuntime::new()
            .api(api)
            .viewport(viewport)
            .settings(RuntimeSettings {
                scroll_poll_interval: Duration::from_millis(10),
                ..RuntimeSettings::default()
            })
            .build();
        rt.wait_for_state(|s| s.history.contains(PromptId(1)), WAIT)
            .await
            .expect("history never loaded");
        rt
    }

    #[tokio::test]
    async fn test_mount_fetches_history() {
        let rt = loaded_runtime(MockChatApi::new(), MockViewport::rendering_everything()).await;

        assert_eq!(rt.api.recorded_calls(), vec![ApiCall::FetchHistory(BotId(1))]);
        assert!(
            rt.wait_for_scroll(&ElementId::prompt(PromptId(1)), WAIT)
                .await
        );
    }

    #[tokio::test]
    async fn test_full_exchange() {
        let api = MockChatApi::new();
        api.queue_prompt(Ok(MockChatApi::prompt(7, "Hi", 5_000)));
        api.queue_stream(&[b"Hello ", b"World!"]);
        let mut rt = loaded_runtime(api, MockViewport::rendering_everything()).await;

        rt.submit("Hi").await;

        let state = rt
            .wait_for_state(
                |s| {
                    s.history
                        .get(PromptId(7))
                        .is_some_and(|p| p.response.is_some())
                },
                WAIT,
            )
            .await
            .expect("exchange never completed");

        assert!(matches!(state.phase, Phase::Idle));
        assert_eq!(
            state.history.get(PromptId(7)).unwrap().response,
            Some(Response::new("Hello World!"))
        );
        assert!(state.history.pending().is_none());
        assert_eq!(state.history.len(), 2);
        assert_eq!(state.draft, "");

        let calls = rt.api.recorded_calls();
        assert_eq!(
            calls[1..],
            [
                ApiCall::CreatePrompt {
                    bot_id: BotId(1),
                    body: "Hi".to_string(),
                    csrf_token: "token".to_string(),
                },
                ApiCall::OpenResponseStream {
                    bot_id: BotId(1),
                    prompt_id: PromptId(7),
                    csrf_token: "token".to_string(),
                },
            ]
        );

        for element in [
            ElementId::prompt(PromptId::PENDING),
            ElementId::prompt(PromptId(7)),
            ElementId::response(PromptId(7)),
        ] {
            assert!(rt.wait_for_scroll(&element, WAIT).await, "no scroll to {element}");
        }
    }

    #[tokio::test]
    async fn test_prompt_creation_failure_keeps_placeholder() {
        // Nothing queued: creation fails with a network error
        let mut rt = loaded_runtime(MockChatApi::new(), MockViewport::rendering_everything()).await;

        rt.submit("lost message").await;

        let state = rt
            .wait_for_state(|s| s.status_text.is_some(), WAIT)
            .await
            .expect("failure never reported");

        assert_eq!(state.status_text.as_deref(), Some(PROMPT_FAILED_NOTICE));
        assert!(!state.is_response_loading());
        assert_eq!(state.history.pending().unwrap().body, "lost message");
        assert!(!rt
            .api
            .recorded_calls()
            .iter()
            .any(|c| matches!(c, ApiCall::OpenResponseStream { .. })));
    }

    #[tokio::test]
    async fn test_unopenable_stream_finishes_with_empty_response() {
        let api = MockChatApi::new();
        api.queue_prompt(Ok(MockChatApi::prompt(3, "Hi", 5_000)));
        api.queue_stream_error(ApiError::server_error("500"));
        let mut rt = loaded_runtime(api, MockViewport::rendering_everything()).await;

        rt.submit("Hi").await;

        let state = rt
            .wait_for_state(
                |s| matches!(s.phase, Phase::Idle) && s.history.contains(PromptId(3)),
                WAIT,
            )
            .await
            .expect("turn never finished");
        assert_eq!(
            state.history.get(PromptId(3)).unwrap().response,
            Some(Response::new(""))
        );
    }

    #[tokio::test]
    async fn test_broken_stream_keeps_partial_text() {
        let api = MockChatApi::new();
        api.queue_prompt(Ok(MockChatApi::prompt(3, "Hi", 5_000)));
        api.queue_broken_stream(&[b"Hel"], ApiError::network("reset"));
        let mut rt = loaded_runtime(api, MockViewport::rendering_everything()).await;

        rt.submit("Hi").await;

        let state = rt
            .wait_for_state(
                |s| {
                    s.history
                        .get(PromptId(3))
                        .is_some_and(|p| p.response.is_some())
                },
                WAIT,
            )
            .await
            .expect("turn never finished");
        assert_eq!(
            state.history.get(PromptId(3)).unwrap().response,
            Some(Response::new("Hel"))
        );
        assert!(!state.is_response_loading());
    }

    #[tokio::test]
    async fn test_submit_while_loading_is_rejected() {
        let (api, gate) = MockChatApi::new().with_prompt_gate();
        api.queue_prompt(Ok(MockChatApi::prompt(4, "first", 5_000)));
        api.queue_stream(&[b"ok"]);
        let mut rt = loaded_runtime(api, MockViewport::rendering_everything()).await;

        rt.submit("first").await;
        rt.wait_for_state(|s| matches!(s.phase, Phase::CreatingPrompt), WAIT)
            .await
            .expect("never started creating");

        rt.submit("second").await;
        let notice = rt.wait_for_notice(WAIT).await.expect("no rejection notice");
        assert_eq!(notice.message, "A response is still loading, wait for it to finish");

        // The draft still updates while loading
        let state = rt
            .wait_for_state(|s| s.draft == "second", WAIT)
            .await
            .unwrap();
        assert!(state.is_response_loading());

        gate.notify_one();
        let state = rt
            .wait_for_state(
                |s| {
                    s.history
                        .get(PromptId(4))
                        .is_some_and(|p| p.response.is_some())
                },
                WAIT,
            )
            .await
            .expect("first exchange never completed");
        assert_eq!(state.draft, "second");

        let creates = rt
            .api
            .recorded_calls()
            .into_iter()
            .filter(|c| matches!(c, ApiCall::CreatePrompt { .. }))
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn test_scroll_waits_for_element_to_render() {
        let api = MockChatApi::new();
        api.queue_prompt(Ok(MockChatApi::prompt(9, "Hi", 5_000)));
        api.queue_stream(&[b"done"]);
        let mut rt = loaded_runtime(api, MockViewport::new()).await;

        rt.submit("Hi").await;
        rt.wait_for_state(
            |s| {
                s.history
                    .get(PromptId(9))
                    .is_some_and(|p| p.response.is_some())
            },
            WAIT,
        )
        .await
        .expect("exchange never completed");

        let response = ElementId::response(PromptId(9));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rt.viewport.attempts_for(&response) > 1);
        assert!(!rt.viewport.was_scrolled(&response));

        rt.viewport.render(response.clone());
        assert!(rt.wait_for_scroll(&response, WAIT).await);
    }

    #[tokio::test]
    async fn test_scroll_polling_stops_on_shutdown() {
        let rt = loaded_runtime(MockChatApi::new(), MockViewport::new()).await;
        let earliest = ElementId::prompt(PromptId(1));

        tokio::time::sleep(Duration::from_millis(30)).await;
        rt.shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let attempts = rt.viewport.attempts_for(&earliest);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(attempts > 0);
        assert_eq!(rt.viewport.attempts_for(&earliest), attempts);
    }

    #[tokio::test]
    async fn test_newer_scroll_supersedes_older_one() {
        let api = MockChatApi::new();
        api.queue_prompt(Ok(MockChatApi::prompt(7, "Hi", 5_000)));
        api.queue_stream(&[b"done"]);
        let mut rt = loaded_runtime(api, MockViewport::new()).await;

        rt.submit("Hi").await;
        rt.wait_for_state(
            |s| {
                s.history
                    .get(PromptId(7))
                    .is_some_and(|p| p.response.is_some())
            },
            WAIT,
        )
        .await
        .expect("exchange never completed");
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Only the response poller is still running
        let placeholder = ElementId::prompt(PromptId::PENDING);
        let earlier = ElementId::prompt(PromptId(1));
        let placeholder_attempts = rt.viewport.attempts_for(&placeholder);
        let earlier_attempts = rt.viewport.attempts_for(&earlier);
        rt.viewport.render(placeholder.clone());
        rt.viewport.render(earlier.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(placeholder_attempts > 0);
        assert_eq!(rt.viewport.attempts_for(&placeholder), placeholder_attempts);
        assert_eq!(rt.viewport.attempts_for(&earlier), earlier_attempts);
        assert!(!rt.viewport.was_scrolled(&placeholder));
        assert!(!rt.viewport.was_scrolled(&earlier));

        let response = ElementId::response(PromptId(7));
        rt.viewport.render(response.clone());
        assert!(rt.wait_for_scroll(&response, WAIT).await);
    }

    #[tokio::test]
    async fn test_history_failure_and_refresh() {
        let api = MockChatApi::new();
        api.queue_history(Err(ApiError::network("connection refused")));
        let mut rt = TestRuntime::new().api(api).build();

        let state = rt
            .wait_for_state(|s| s.status_text.is_some(), WAIT)
            .await
            .expect("failure never reported");
        assert_eq!(state.status_text.as_deref(), Some(HISTORY_FAILED_NOTICE));
        assert!(state.history.is_empty());

        rt.api
            .queue_history(Ok(History::from_iter([MockChatApi::prompt(2, "hello", 10)])));
        rt.send(Event::RefreshHistory).await;

        let state = rt
            .wait_for_state(|s| s.history.contains(PromptId(2)), WAIT)
            .await
            .expect("refresh never loaded");
        assert_eq!(state.status_text, None);
        assert_eq!(
            rt.api.recorded_calls(),
            vec![ApiCall::FetchHistory(BotId(1)), ApiCall::FetchHistory(BotId(1))]
        );
    }
}
