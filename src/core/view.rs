//! The conversation as the user sees it, and the single-flight guard around
//! generation.

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::message::{AttachmentRef, ChatTurn, Conversation};
use crate::core::model_policy::ModelId;
use crate::core::request::compose_user_content;
use crate::core::session::{
    SessionOutcome, SessionServices, StreamingSession, TurnRequest, TurnStatus,
};
use crate::core::store::StoreError;

/// What the user typed and attached.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub text: String,
    pub attachments: Vec<AttachmentRef>,
}

impl Submission {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub enum SubmitError {
    /// No text and no attachments.
    Empty,
    /// A turn is already streaming in this conversation.
    AlreadyGenerating,
    Store(StoreError),
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::Empty => write!(f, "Type a message or attach a file first"),
            SubmitError::AlreadyGenerating => {
                write!(f, "A response is still being generated; stop it first")
            }
            SubmitError::Store(err) => write!(f, "Failed to save the message: {err}"),
        }
    }
}

impl std::error::Error for SubmitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SubmitError::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for SubmitError {
    fn from(err: StoreError) -> Self {
        SubmitError::Store(err)
    }
}

/// Cancels one specific session; stale handles are harmless.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    session_id: u64,
    token: CancellationToken,
}

impl CancelHandle {
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

#[derive(Debug)]
struct ActiveSession {
    handle: CancelHandle,
    assistant_turn_id: String,
}

pub struct ConversationView {
    conversation: Conversation,
    selected_model: ModelId,
    services: SessionServices,
    active: Option<ActiveSession>,
    next_session_id: u64,
}

impl ConversationView {
    pub fn new(conversation: Conversation, selected_model: ModelId, services: SessionServices) -> Self {
        Self {
            conversation,
            selected_model,
            services,
            active: None,
            next_session_id: 0,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn selected_model(&self) -> &ModelId {
        &self.selected_model
    }

    pub fn select_model(&mut self, model: ModelId) {
        self.selected_model = model;
    }

    pub fn is_generating(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_session_id(&self) -> Option<u64> {
        self.active.as_ref().map(|active| active.handle.session_id)
    }

    pub fn cancel_handle(&self) -> Option<CancelHandle> {
        self.active.as_ref().map(|active| active.handle.clone())
    }

    /// Commit the user turn and an empty assistant placeholder, then hand
    /// back the session that will fill the placeholder in.
    pub async fn start_turn(&mut self, submission: Submission) -> Result<StreamingSession, SubmitError> {
        if self.is_generating() {
            return Err(SubmitError::AlreadyGenerating);
        }
        if submission.text.trim().is_empty() && submission.attachments.is_empty() {
            return Err(SubmitError::Empty);
        }

        let content = compose_user_content(&submission.text, &submission.attachments);
        let user_turn = ChatTurn::user(content, submission.attachments);
        let assistant_turn = ChatTurn::assistant_placeholder();

        let history = self.conversation.turns.clone();
        let store = &self.services.store;
        store.append(&self.conversation.id, &user_turn).await?;
        // The user turn is stored now; keep the view in step even if the
        // placeholder cannot be saved.
        self.conversation.upsert_turn(user_turn.clone());
        store.append(&self.conversation.id, &assistant_turn).await?;
        self.conversation.upsert_turn(assistant_turn.clone());

        self.next_session_id += 1;
        let session_id = self.next_session_id;
        let token = CancellationToken::new();
        self.active = Some(ActiveSession {
            handle: CancelHandle {
                session_id,
                token: token.clone(),
            },
            assistant_turn_id: assistant_turn.id.clone(),
        });
        debug!(session_id, conversation = %self.conversation.id, "Starting turn");

        let request = TurnRequest {
            conversation_id: self.conversation.id.clone(),
            history,
            user_turn,
            assistant_turn,
            selected_model: self.selected_model.clone(),
        };
        Ok(StreamingSession::new(
            session_id,
            request,
            token,
            self.services.clone(),
        ))
    }

    /// Request cancellation of `session_id`. Returns false when that session
    /// is not the active one.
    pub fn cancel(&self, session_id: u64) -> bool {
        match &self.active {
            Some(active) if active.handle.session_id == session_id => {
                active.handle.cancel();
                true
            }
            _ => false,
        }
    }

    /// Fold a finished session back into the view and release the guard.
    pub fn finish_turn(&mut self, outcome: SessionOutcome) -> Option<&ChatTurn> {
        let is_active = self.active.as_ref().is_some_and(|active| {
            active.handle.session_id == outcome.session_id
                && active.assistant_turn_id == outcome.turn.id
        });
        if !is_active {
            debug!(session_id = outcome.session_id, "Ignoring outcome of a stale session");
            return None;
        }
        self.active = None;

        if let TurnStatus::Failed(err) = &outcome.status {
            debug!(session_id = outcome.session_id, "Turn failed: {err}");
        }
        // Later turns start from whichever model actually answered.
        self.selected_model = outcome.model;
        let turn_id = outcome.turn.id.clone();
        self.conversation.upsert_turn(outcome.turn);
        self.conversation.turn(&turn_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::SessionState;
    use crate::core::store::{ConversationStore, MemoryStore};
    use crate::utils::test_utils::{
        sse_chunk, test_services, RecordingSink, ScriptedResponse, ScriptedTransport,
    };
    use std::sync::Arc;

    fn view_with(responses: Vec<ScriptedResponse>) -> (ConversationView, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(ScriptedTransport::new(responses));
        let services = test_services(transport, store.clone());
        (
            ConversationView::new(Conversation::new(), ModelId::new("glm-4.6"), services),
            store,
        )
    }

    #[tokio::test]
    async fn empty_submission_is_rejected() {
        let (mut view, store) = view_with(Vec::new());
        assert!(matches!(
            view.start_turn(Submission::text("   ")).await,
            Err(SubmitError::Empty)
        ));
        assert!(!view.is_generating());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_submit_while_generating_is_rejected() {
        let (mut view, _store) = view_with(Vec::new());
        let _session = view.start_turn(Submission::text("first")).await.unwrap();

        assert!(view.is_generating());
        assert!(matches!(
            view.start_turn(Submission::text("second")).await,
            Err(SubmitError::AlreadyGenerating)
        ));
        assert_eq!(view.conversation().turns.len(), 2);
    }

    #[tokio::test]
    async fn user_turn_and_placeholder_are_committed_before_streaming() {
        let (mut view, store) = view_with(Vec::new());
        let session = view.start_turn(Submission::text("What is pi?")).await.unwrap();

        let stored = store.load(session.conversation_id()).await.unwrap().unwrap();
        assert_eq!(stored.turns.len(), 2);
        assert_eq!(stored.turns[0].content, "What is pi?");
        assert!(stored.turns[1].content.is_empty());
        assert_eq!(stored.turns[1].id, session.assistant_turn_id());
        assert_eq!(stored.title, "What is pi?");
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn full_turn_updates_view_and_releases_guard() {
        let (mut view, _store) = view_with(vec![ScriptedResponse::sse(&[
            r#"{"answer":"3.14159"}"#,
            "[DONE]",
        ])]);
        let session = view.start_turn(Submission::text("What is pi?")).await.unwrap();
        let mut sink = RecordingSink::new();

        let outcome = session.run(&mut sink).await;
        let turn = view.finish_turn(outcome).cloned().unwrap();

        assert_eq!(turn.content, "3.14159");
        assert!(!view.is_generating());
        assert_eq!(view.conversation().turns.last().unwrap().content, "3.14159");
    }

    #[tokio::test]
    async fn cancel_targets_only_the_active_session() {
        let (mut view, _store) = view_with(vec![ScriptedResponse::Stall(vec![sse_chunk(
            r#"{"answer":"partial"}"#,
        )])]);
        let session = view.start_turn(Submission::text("Long essay please")).await.unwrap();
        let session_id = session.id();

        assert!(!view.cancel(session_id + 1));
        let mut sink = RecordingSink::new();
        let handle = view.cancel_handle().unwrap();
        let run = tokio::spawn(async move { session.run(&mut sink).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(view.cancel(handle.session_id()));

        let outcome = run.await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Cancelled);
        assert_eq!(outcome.turn.content, "partial");
        assert!(view.finish_turn(outcome).is_some());
        assert!(!view.is_generating());
    }

    #[tokio::test]
    async fn image_turn_leaves_vision_model_selected() {
        let (mut view, _store) = view_with(vec![ScriptedResponse::sse(&[
            r#"{"answer":"A triangle"}"#,
            "[DONE]",
        ])]);
        let submission = Submission {
            text: "What shape?".to_string(),
            attachments: vec![AttachmentRef {
                id: "img".to_string(),
                display_name: "shape.png".to_string(),
                media_kind: crate::core::message::MediaKind::Image,
                size_bytes: 8,
                locator: "data:image/png;base64,iVBORw0KGgo=".to_string(),
            }],
        };
        let session = view.start_turn(submission).await.unwrap();
        let outcome = session.run(&mut RecordingSink::new()).await;
        view.finish_turn(outcome);

        assert_eq!(view.selected_model(), &ModelId::new("doubao-vision"));
        assert!(view.conversation().turns[0]
            .content
            .ends_with("Uploaded files:\n- shape.png (8 B)"));
    }

    /// Accepts user turns and rejects everything else.
    struct UserTurnsOnly(MemoryStore);

    #[async_trait::async_trait]
    impl ConversationStore for UserTurnsOnly {
        async fn append(&self, conversation_id: &str, turn: &ChatTurn) -> Result<(), StoreError> {
            if turn.role.is_user() {
                self.0.append(conversation_id, turn).await
            } else {
                Err(StoreError::InvalidId(conversation_id.to_string()))
            }
        }

        async fn patch(
            &self,
            conversation_id: &str,
            turn_id: &str,
            patch: &crate::core::store::TurnPatch,
        ) -> Result<(), StoreError> {
            self.0.patch(conversation_id, turn_id, patch).await
        }

        async fn load(&self, conversation_id: &str) -> Result<Option<Conversation>, StoreError> {
            self.0.load(conversation_id).await
        }

        async fn list(&self) -> Result<Vec<crate::core::store::ConversationSummary>, StoreError> {
            self.0.list().await
        }
    }

    #[tokio::test]
    async fn failed_placeholder_save_keeps_view_in_step_with_store() {
        let store = Arc::new(UserTurnsOnly(MemoryStore::new()));
        let services = test_services(Arc::new(ScriptedTransport::new(Vec::new())), store.clone());
        let mut view = ConversationView::new(Conversation::new(), ModelId::new("glm-4.6"), services);

        let result = view.start_turn(Submission::text("What is pi?")).await;

        assert!(matches!(result, Err(SubmitError::Store(_))));
        assert!(!view.is_generating());
        let stored = store.load(&view.conversation().id).await.unwrap().unwrap();
        assert_eq!(view.conversation().turns, stored.turns);
        assert_eq!(view.conversation().turns[0].content, "What is pi?");
    }

    #[tokio::test]
    async fn stale_outcome_is_ignored() {
        let (mut view, _store) = view_with(vec![ScriptedResponse::sse(&[
            r#"{"answer":"ok"}"#,
            "[DONE]",
        ])]);
        let session = view.start_turn(Submission::text("hi")).await.unwrap();
        let mut outcome = session.run(&mut RecordingSink::new()).await;
        outcome.session_id += 10;

        assert!(view.finish_turn(outcome).is_none());
        assert!(view.is_generating());
    }
}
