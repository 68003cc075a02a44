use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::api::ChatRequest;
use crate::core::builtin_models::{ModelCatalog, ProviderRoute};
use crate::core::chat_stream::{ByteStream, ChatTransport};
use crate::core::error::{ErrorKind, PermanentKind, StreamError};
use crate::core::message::ChatTurn;
use crate::core::model_policy::ModelDecision;
use crate::core::retry::RetryCoordinator;
use crate::core::session::{SessionServices, SessionSettings, SessionState, UiSink};
use crate::core::store::ConversationStore;

/// One canned reply for [`ScriptedTransport`].
pub enum ScriptedResponse {
    /// Yield these items, then end the body.
    Body(Vec<Result<Vec<u8>, StreamError>>),
    /// Yield these chunks, then never produce anything again.
    Stall(Vec<Vec<u8>>),
    Fail(StreamError),
}

impl ScriptedResponse {
    pub fn sse(lines: &[&str]) -> Self {
        ScriptedResponse::Body(lines.iter().map(|line| Ok(sse_chunk(line))).collect())
    }
}

/// Frame one payload as an SSE `data:` event.
pub fn sse_chunk(payload: &str) -> Vec<u8> {
    format!("data: {payload}\n\n").into_bytes()
}

/// Replays scripted responses in order and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<(ProviderRoute, ChatRequest)>>,
    calls: AtomicU32,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(ProviderRoute, ChatRequest)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn open(
        &self,
        route: &ProviderRoute,
        request: &ChatRequest,
    ) -> Result<ByteStream, StreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((route.clone(), request.clone()));

        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(ScriptedResponse::Body(items)) => Ok(stream::iter(items).boxed()),
            Some(ScriptedResponse::Stall(chunks)) => Ok(stream::iter(chunks.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
            Some(ScriptedResponse::Fail(error)) => Err(error),
            None => Err(StreamError::permanent(
                PermanentKind::BadRequest,
                "no scripted response left",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Thinking(String),
    Answer(String),
    Complete(ChatTurn),
    Error(ErrorKind, String),
    State(SessionState),
    ModelSwitch(ModelDecision),
}

/// Records every callback; optionally cancels a token on the first answer
/// update to simulate a user pressing stop mid-stream.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<SinkEvent>,
    cancel_on_answer: Option<CancellationToken>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancelling_on_answer(token: CancellationToken) -> Self {
        Self {
            events: Vec::new(),
            cancel_on_answer: Some(token),
        }
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.events
            .iter()
            .filter_map(|event| match event {
                SinkEvent::State(state) => Some(*state),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&SinkEvent) -> bool) -> usize {
        self.events.iter().filter(|event| predicate(event)).count()
    }

    /// Events other than state changes.
    pub fn render_events(&self) -> Vec<SinkEvent> {
        self.events
            .iter()
            .filter(|event| !matches!(event, SinkEvent::State(_)))
            .cloned()
            .collect()
    }
}

impl UiSink for RecordingSink {
    fn on_thinking_update(&mut self, thinking: &str) {
        self.events.push(SinkEvent::Thinking(thinking.to_string()));
    }

    fn on_answer_update(&mut self, answer: &str) {
        self.events.push(SinkEvent::Answer(answer.to_string()));
        if let Some(token) = &self.cancel_on_answer {
            token.cancel();
        }
    }

    fn on_complete(&mut self, turn: &ChatTurn) {
        self.events.push(SinkEvent::Complete(turn.clone()));
    }

    fn on_error(&mut self, kind: ErrorKind, message: &str) {
        self.events.push(SinkEvent::Error(kind, message.to_string()));
    }

    fn on_state_change(&mut self, state: SessionState) {
        self.events.push(SinkEvent::State(state));
    }

    fn on_model_switch(&mut self, decision: &ModelDecision) {
        self.events.push(SinkEvent::ModelSwitch(decision.clone()));
    }
}

/// Builtin catalog, no backoff, and a render interval of zero so every delta
/// is flushed.
pub fn test_services(
    transport: Arc<dyn ChatTransport>,
    store: Arc<dyn ConversationStore>,
) -> SessionServices {
    SessionServices {
        catalog: Arc::new(ModelCatalog::builtin().expect("builtin catalog")),
        transport,
        store,
        retry: RetryCoordinator::new(2, |_| Duration::ZERO),
        settings: SessionSettings {
            deep_thinking: false,
            render_interval: Duration::ZERO,
        },
    }
}
