//! Conversation runtime executor

use super::traits::{ChatApi, Viewport};
use super::{MountId, Notice};

use crate::decoder::{decode_stream, DecodeMode};
use crate::history::{BotId, PromptId};
use crate::state_machine::{transition, ConvState, Effect, ElementId, Event};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Tunables shared by every mounted conversation
#[derive(Debug, Clone, Copy)]
pub struct RuntimeSettings {
    pub decode_mode: DecodeMode,
    /// Delay between attempts to scroll to an element not yet rendered
    pub scroll_poll_interval: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            decode_mode: DecodeMode::default(),
            scroll_poll_interval: Duration::from_millis(100),
        }
    }
}

/// Generic conversation runtime that can work with any backend and viewport
pub struct ConversationRuntime<A, V>
where
    A: ChatApi + 'static,
    V: Viewport + 'static,
{
    mount_id: MountId,
    state: ConvState,
    api: Arc<A>,
    viewport: Arc<V>,
    settings: RuntimeSettings,
    event_rx: mpsc::Receiver<Event>,
    event_tx: mpsc::Sender<Event>,
    state_tx: watch::Sender<ConvState>,
    notice_tx: broadcast::Sender<Notice>,
    /// Cancelled when the conversation is unmounted
    shutdown: CancellationToken,
    /// Cancels the scroll poller started by the previous `ScrollIntoView`
    scroll_cancel: CancellationToken,
}

impl<A, V> ConversationRuntime<A, V>
where
    A: ChatApi + 'static,
    V: Viewport + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mount_id: MountId,
        state: ConvState,
        api: Arc<A>,
        viewport: Arc<V>,
        settings: RuntimeSettings,
        event_rx: mpsc::Receiver<Event>,
        event_tx: mpsc::Sender<Event>,
        state_tx: watch::Sender<ConvState>,
        notice_tx: broadcast::Sender<Notice>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            mount_id,
            state,
            api,
            viewport,
            settings,
            event_rx,
            event_tx,
            state_tx,
            notice_tx,
            scroll_cancel: shutdown.child_token(),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(mount = %self.mount_id, bot_id = %self.state.bot.id, "Starting conversation runtime");

        // Mounting loads the history once
        self.execute_effect(Effect::FetchHistory {
            bot_id: self.state.bot.id,
        });

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                Some(event) = self.event_rx.recv() => self.process_event(event),
                else => break,
            }
        }

        tracing::info!(mount = %self.mount_id, "Conversation runtime stopped");
    }

    fn process_event(&mut self, event: Event) {
        let name = event.name();
        let result = match transition(&self.state, event) {
            Ok(r) => r,
            Err(e) => {
                // Rejections are user-facing (e.g. "a response is still loading")
                tracing::warn!(mount = %self.mount_id, event = name, error = %e, "Event rejected");
                let _ = self.notice_tx.send(Notice {
                    message: e.to_string(),
                });
                return;
            }
        };

        tracing::debug!(
            mount = %self.mount_id,
            event = name,
            effects = result.effects.len(),
            "Transition applied"
        );

        self.state = result.new_state;
        self.state_tx.send_replace(self.state.clone());

        for effect in result.effects {
            self.execute_effect(effect);
        }
    }

    /// Effects run as background tasks and report back through the event channel
    fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::FetchHistory { bot_id } => self.spawn_fetch_history(bot_id),
            Effect::CreatePrompt {
                bot_id,
                body,
                csrf_token,
            } => self.spawn_create_prompt(bot_id, body, csrf_token),
            Effect::OpenResponseStream {
                bot_id,
                prompt_id,
                csrf_token,
            } => self.spawn_response_stream(bot_id, prompt_id, csrf_token),
            Effect::ScrollIntoView { element_id } => self.spawn_scroll(element_id),
        }
    }

    fn spawn_fetch_history(&self, bot_id: BotId) {
        let api = self.api.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let result = api.fetch_history(bot_id).await.map_err(|e| {
                tracing::error!(%bot_id, kind = ?e.kind, error = %e, "History fetch failed");
                e.to_string()
            });
            let _ = event_tx.send(Event::HistoryFetched(result)).await;
        });
    }

    fn spawn_create_prompt(&self, bot_id: BotId, body: String, csrf_token: String) {
        let api = self.api.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let result = api
                .create_prompt(bot_id, &body, &csrf_token)
                .await
                .map_err(|e| {
                    tracing::error!(%bot_id, kind = ?e.kind, error = %e, "Prompt creation failed");
                    e.to_string()
                });
            let _ = event_tx.send(Event::PromptCreated(result)).await;
        });
    }

    fn spawn_response_stream(&self, bot_id: BotId, prompt_id: PromptId, csrf_token: String) {
        let api = self.api.clone();
        let event_tx = self.event_tx.clone();
        let mode = self.settings.decode_mode;

        tokio::spawn(async move {
            match api
                .open_response_stream(bot_id, prompt_id, &csrf_token)
                .await
            {
                Ok(body) => {
                    let mut events = Box::pin(decode_stream(body, mode, prompt_id));
                    while let Some(event) = events.next().await {
                        if event_tx.send(event).await.is_err() {
                            // Runtime is gone
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(%bot_id, %prompt_id, kind = ?e.kind, error = %e, "Response stream failed to open");
                    let _ = event_tx.send(Event::ResponseStreamEnded { prompt_id }).await;
                }
            }
        });
    }

    /// Only the latest scroll target keeps polling
    fn spawn_scroll(&mut self, element_id: ElementId) {
        self.scroll_cancel.cancel();
        self.scroll_cancel = self.shutdown.child_token();

        let viewport = self.viewport.clone();
        let cancel = self.scroll_cancel.clone();
        let interval = self.settings.scroll_poll_interval;

        tokio::spawn(async move {
            let mut attempts: u32 = 0;
            while !viewport.scroll_into_view(&element_id) {
                attempts += 1;
                tokio::select! {
                    () = cancel.cancelled() => {
                        tracing::debug!(element = %element_id, attempts, "Scroll abandoned");
                        return;
                    }
                    () = tokio::time::sleep(interval) => {}
                }
            }
            tracing::trace!(element = %element_id, attempts, "Scrolled into view");
        });
    }
}
