//! One assistant turn, from request to committed response.
//!
//! A [`StreamingSession`] picks the model, opens the stream through the retry
//! coordinator, folds decoded deltas into a [`ResponseAccumulator`] and
//! pushes coalesced updates to a [`UiSink`]. Whatever happens, the assistant
//! placeholder is patched in the store exactly once before the outcome is
//! returned.

mod throttle;


use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::accumulator::{ResponseAccumulator, ResponseSnapshot};
use crate::core::builtin_models::ModelCatalog;
use crate::core::chat_stream::{ByteStream, ChatTransport};
use crate::core::error::{ErrorKind, PermanentKind, StreamError};
use crate::core::message::ChatTurn;
use crate::core::model_policy::{ModelDecision, ModelId};
use crate::core::request::build_request;
use crate::core::retry::{RetryCoordinator, RetryError};
use crate::core::store::{ConversationStore, TurnPatch};
use crate::core::stream_decoder::{decode_stream, DecodeEvent, StreamEnd};

pub use throttle::{FlushPlan, RenderThrottle, DEFAULT_RENDER_INTERVAL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Building,
    Requesting,
    Streaming,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Building => "building",
            SessionState::Requesting => "requesting",
            SessionState::Streaming => "streaming",
            SessionState::Finalizing => "finalizing",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

/// Receives rendering callbacks for one session.
///
/// Updates carry the full accumulated text, not the latest fragment. Within
/// a flush the thinking update always comes before the answer update, and
/// nothing but errors follows `on_complete`.
pub trait UiSink: Send {
    fn on_thinking_update(&mut self, thinking: &str);
    fn on_answer_update(&mut self, answer: &str);
    /// Completed or cancelled; `turn` holds whatever was received.
    fn on_complete(&mut self, turn: &ChatTurn);
    fn on_error(&mut self, kind: ErrorKind, message: &str);

    fn on_state_change(&mut self, _state: SessionState) {}

    fn on_model_switch(&mut self, _decision: &ModelDecision) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    Cancelled,
    Failed(StreamError),
}

#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session_id: u64,
    pub status: TurnStatus,
    /// The assistant turn as committed to the store.
    pub turn: ChatTurn,
    /// The model the turn was actually sent to.
    pub model: ModelId,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub deep_thinking: bool,
    pub render_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            deep_thinking: false,
            render_interval: DEFAULT_RENDER_INTERVAL,
        }
    }
}

/// Long-lived collaborators shared by every session of a conversation.
#[derive(Clone)]
pub struct SessionServices {
    pub catalog: Arc<ModelCatalog>,
    pub transport: Arc<dyn ChatTransport>,
    pub store: Arc<dyn ConversationStore>,
    pub retry: RetryCoordinator,
    pub settings: SessionSettings,
}

/// Everything a session needs to know about the turn it is producing.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub conversation_id: String,
    /// Turns before the current user turn.
    pub history: Vec<ChatTurn>,
    pub user_turn: ChatTurn,
    /// Already stored; patched when the session ends.
    pub assistant_turn: ChatTurn,
    pub selected_model: ModelId,
}

enum Wake {
    Cancelled,
    Flush,
    Event(Option<Result<DecodeEvent, StreamError>>),
}

pub struct StreamingSession {
    id: u64,
    state: SessionState,
    request: TurnRequest,
    model: ModelId,
    cancel_token: CancellationToken,
    services: SessionServices,
    accumulator: ResponseAccumulator,
    throttle: RenderThrottle,
}

impl StreamingSession {
    pub fn new(
        id: u64,
        request: TurnRequest,
        cancel_token: CancellationToken,
        services: SessionServices,
    ) -> Self {
        let model = request.selected_model.clone();
        let throttle = RenderThrottle::new(services.settings.render_interval);
        Self {
            id,
            state: SessionState::Idle,
            request,
            model,
            cancel_token,
            services,
            accumulator: ResponseAccumulator::new(),
            throttle,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn conversation_id(&self) -> &str {
        &self.request.conversation_id
    }

    pub fn assistant_turn_id(&self) -> &str {
        &self.request.assistant_turn.id
    }

    pub fn snapshot(&self) -> ResponseSnapshot {
        self.accumulator.snapshot()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Drive the turn to a terminal state and commit the result.
    pub async fn run(mut self, sink: &mut dyn UiSink) -> SessionOutcome {
        let started = Instant::now();
        let result = self.drive(sink).await;
        let outcome = self.finalize(result, sink).await;
        info!(
            session_id = outcome.session_id,
            model = %outcome.model,
            status = self.state.as_str(),
            thinking_chars = outcome.turn.thinking.chars().count(),
            answer_chars = outcome.turn.content.chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Session finished"
        );
        outcome
    }

    fn transition(&mut self, next: SessionState, sink: &mut dyn UiSink) {
        if self.state == next {
            return;
        }
        debug!(
            session_id = self.id,
            from = self.state.as_str(),
            to = next.as_str(),
            "Session state change"
        );
        self.state = next;
        sink.on_state_change(next);
    }

    async fn drive(&mut self, sink: &mut dyn UiSink) -> Result<(), StreamError> {
        self.transition(SessionState::Building, sink);

        let has_image = self.request.user_turn.first_image().is_some();
        let decision = self
            .services
            .catalog
            .policy()
            .decide(has_image, &self.request.selected_model);
        if decision.switched {
            info!(
                session_id = self.id,
                from = %self.request.selected_model,
                to = %decision.effective_model,
                has_image,
                "Switching model for this turn"
            );
            sink.on_model_switch(&decision);
        }
        self.model = decision.effective_model;

        let route = self
            .services
            .catalog
            .route(&self.model)
            .map_err(|err| StreamError::permanent(PermanentKind::Configuration, err.to_string()))?;
        let request = build_request(
            &route.api_model,
            &self.request.history,
            &self.request.user_turn,
            self.services.settings.deep_thinking,
        )?;

        self.transition(SessionState::Requesting, sink);
        let transport = Arc::clone(&self.services.transport);
        let cancel_token = self.cancel_token.clone();
        let session_id = self.id;
        let opened = self
            .services
            .retry
            .execute(
                &cancel_token,
                |attempt| {
                    let transport = Arc::clone(&transport);
                    let route = route.clone();
                    let request = request.clone();
                    async move {
                        debug!(session_id, attempt, provider = %route.provider_id, "Requesting chat completion");
                        transport.open(&route, &request).await
                    }
                },
                StreamError::is_retryable,
            )
            .await;

        let body = match opened {
            Ok(body) => body,
            Err(RetryError::Cancelled) => return Err(StreamError::Cancelled),
            Err(RetryError::Failed { error, attempts }) => {
                warn!(session_id, attempts, "Chat request failed: {error}");
                return Err(error);
            }
        };

        self.transition(SessionState::Streaming, sink);
        self.stream_body(body, sink).await
    }

    async fn stream_body(
        &mut self,
        body: ByteStream,
        sink: &mut dyn UiSink,
    ) -> Result<(), StreamError> {
        let cancel_token = self.cancel_token.clone();
        let events = decode_stream(body);
        tokio::pin!(events);

        loop {
            let deadline = self.throttle.deadline(self.accumulator.revision());
            let wake = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => Wake::Cancelled,
                _ = wait_until(deadline) => Wake::Flush,
                event = events.next() => Wake::Event(event),
            };

            match wake {
                Wake::Cancelled => return Err(StreamError::Cancelled),
                Wake::Flush => self.flush(sink),
                Wake::Event(Some(Ok(DecodeEvent::Delta(delta)))) => {
                    self.accumulator.apply(&delta);
                    if self
                        .throttle
                        .should_flush(Instant::now(), self.accumulator.revision())
                    {
                        self.flush(sink);
                    }
                }
                Wake::Event(Some(Ok(DecodeEvent::ProviderError(message)))) => {
                    return Err(StreamError::permanent(PermanentKind::Provider, message));
                }
                Wake::Event(Some(Ok(DecodeEvent::Finished { end, skipped }))) => {
                    return self.check_end(end, skipped);
                }
                Wake::Event(Some(Err(err))) => return Err(err),
                Wake::Event(None) => return self.check_end(StreamEnd::EndedWithoutDone, 0),
            }
        }
    }

    fn check_end(&self, end: StreamEnd, skipped: usize) -> Result<(), StreamError> {
        if skipped > 0 {
            debug!(session_id = self.id, skipped, "Skipped unreadable stream events");
        }
        if !self.accumulator.has_output() {
            return Err(if skipped > 0 {
                StreamError::ProtocolCorruption { skipped }
            } else {
                StreamError::EmptyResponse
            });
        }
        if end == StreamEnd::EndedWithoutDone {
            warn!(
                session_id = self.id,
                "Stream ended without [DONE]; keeping the received output"
            );
        }
        Ok(())
    }

    /// Push whatever changed since the last flush, thinking first.
    fn flush(&mut self, sink: &mut dyn UiSink) {
        let thinking = self.accumulator.thinking();
        let answer = self.accumulator.answer();
        let plan = self.throttle.plan(thinking.len(), answer.len());
        if plan.thinking {
            sink.on_thinking_update(thinking);
        }
        if plan.answer {
            sink.on_answer_update(answer);
        }
        self.throttle.mark_flushed(
            Instant::now(),
            self.accumulator.revision(),
            thinking.len(),
            answer.len(),
        );
    }

    async fn finalize(
        &mut self,
        result: Result<(), StreamError>,
        sink: &mut dyn UiSink,
    ) -> SessionOutcome {
        let status = match result {
            Ok(()) => TurnStatus::Completed,
            Err(StreamError::Cancelled) => TurnStatus::Cancelled,
            Err(err) => TurnStatus::Failed(err),
        };
        if status == TurnStatus::Completed {
            self.transition(SessionState::Finalizing, sink);
        }

        self.accumulator.mark_complete();
        if self.throttle.is_dirty(self.accumulator.revision()) {
            self.flush(sink);
        }

        let snapshot = self.accumulator.snapshot();
        let mut turn = self.request.assistant_turn.clone();
        turn.content = snapshot.answer;
        turn.thinking = snapshot.thinking;

        let patch = TurnPatch::final_text(turn.content.clone(), turn.thinking.clone());
        if let Err(err) = self
            .services
            .store
            .patch(&self.request.conversation_id, &turn.id, &patch)
            .await
        {
            warn!(session_id = self.id, "Failed to commit assistant turn: {err}");
            sink.on_error(
                ErrorKind::Storage,
                &format!("The response could not be saved: {err}"),
            );
        }

        match &status {
            TurnStatus::Completed => {
                self.transition(SessionState::Completed, sink);
                sink.on_complete(&turn);
            }
            TurnStatus::Cancelled => {
                self.transition(SessionState::Cancelled, sink);
                sink.on_complete(&turn);
            }
            TurnStatus::Failed(err) => {
                self.transition(SessionState::Failed, sink);
                sink.on_error(err.kind(), &err.user_message());
            }
        }

        SessionOutcome {
            session_id: self.id,
            status,
            turn,
            model: self.model.clone(),
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
