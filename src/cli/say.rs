//! `tutorchat say`: one streamed turn in the terminal

use std::error::Error;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;

use crate::core::builtin_models::ModelCatalog;
use crate::core::chat_stream::HttpTransport;
use crate::core::config::Config;
use crate::core::error::ErrorKind;
use crate::core::message::{new_id, AttachmentRef, ChatTurn, Conversation, MediaKind};
use crate::core::model_policy::ModelDecision;
use crate::core::retry::RetryCoordinator;
use crate::core::session::{SessionServices, TurnStatus, UiSink};
use crate::core::store::{ConversationStore, FileStore, MemoryStore};
use crate::core::view::{ConversationView, Submission};

#[derive(Debug, Default)]
pub struct SayOptions {
    pub prompt: Vec<String>,
    pub images: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
    pub model: Option<String>,
    pub think: bool,
    pub conversation: Option<String>,
    pub no_save: bool,
}

/// Streams thinking to stderr and the answer to stdout as they grow.
pub struct TerminalSink<O: Write + Send, E: Write + Send> {
    out: O,
    err: E,
    thinking_printed: usize,
    answer_printed: usize,
}

impl<O: Write + Send, E: Write + Send> TerminalSink<O, E> {
    pub fn new(out: O, err: E) -> Self {
        Self {
            out,
            err,
            thinking_printed: 0,
            answer_printed: 0,
        }
    }

    pub fn into_inner(self) -> (O, E) {
        (self.out, self.err)
    }

    fn write_answer_tail(&mut self, answer: &str) {
        let tail = answer.get(self.answer_printed..).unwrap_or_default();
        if tail.is_empty() {
            return;
        }
        if self.answer_printed == 0 && self.thinking_printed > 0 {
            let _ = writeln!(self.err);
        }
        let _ = write!(self.out, "{tail}");
        let _ = self.out.flush();
        self.answer_printed = answer.len();
    }
}

impl<O: Write + Send, E: Write + Send> UiSink for TerminalSink<O, E> {
    fn on_thinking_update(&mut self, thinking: &str) {
        let tail = thinking.get(self.thinking_printed..).unwrap_or_default();
        if tail.is_empty() {
            return;
        }
        if self.thinking_printed == 0 {
            let _ = write!(self.err, "💭 ");
        }
        let _ = write!(self.err, "{tail}");
        let _ = self.err.flush();
        self.thinking_printed = thinking.len();
    }

    fn on_answer_update(&mut self, answer: &str) {
        self.write_answer_tail(answer);
    }

    fn on_complete(&mut self, turn: &ChatTurn) {
        self.write_answer_tail(&turn.content);
        let _ = writeln!(self.out);
        let _ = self.out.flush();
    }

    fn on_error(&mut self, kind: ErrorKind, message: &str) {
        if self.answer_printed > 0 || self.thinking_printed > 0 {
            let _ = writeln!(self.err);
        }
        let _ = writeln!(self.err, "❌ {message} ({})", kind.as_str());
    }

    fn on_model_switch(&mut self, decision: &ModelDecision) {
        let _ = writeln!(
            self.err,
            "🔁 Using {} for this turn",
            decision.effective_model
        );
    }
}

fn image_media_type(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Read a local file into an attachment. Images are inlined as data URLs;
/// documents are referenced by path.
pub fn load_attachment(path: &Path, media_kind: MediaKind) -> Result<AttachmentRef, Box<dyn Error>> {
    let display_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let bytes = fs::read(path).map_err(|err| format!("❌ Cannot read {}: {err}", path.display()))?;

    let locator = match media_kind {
        MediaKind::Image => {
            let media_type = image_media_type(path).ok_or_else(|| {
                format!("❌ Unsupported image type: {display_name}. Use JPEG, PNG, GIF or WebP.")
            })?;
            format!(
                "data:{media_type};base64,{}",
                base64::prelude::BASE64_STANDARD.encode(&bytes)
            )
        }
        MediaKind::Document => fs::canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf())
            .display()
            .to_string(),
    };

    Ok(AttachmentRef {
        id: new_id(),
        display_name,
        media_kind,
        size_bytes: bytes.len() as u64,
        locator,
    })
}

pub async fn run_say(options: SayOptions, config: &Config) -> Result<(), Box<dyn Error>> {
    let catalog = Arc::new(ModelCatalog::builtin()?);
    let model = match options.model.as_deref().or(config.default_model.as_deref()) {
        Some(id) => catalog.resolve(id)?,
        None => catalog.default_text_model().clone(),
    };

    let mut attachments = Vec::new();
    for path in &options.images {
        attachments.push(load_attachment(path, MediaKind::Image)?);
    }
    for path in &options.files {
        attachments.push(load_attachment(path, MediaKind::Document)?);
    }

    let store: Arc<dyn ConversationStore> = if options.no_save {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(FileStore::new(config.data_dir()?))
    };
    let conversation = match &options.conversation {
        Some(id) => store
            .load(id)
            .await?
            .ok_or_else(|| format!("❌ No conversation with id {id}"))?,
        None => Conversation::new(),
    };

    let client = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout())
        .build()?;
    let mut settings = config.session_settings();
    settings.deep_thinking |= options.think;
    let services = SessionServices {
        catalog,
        transport: Arc::new(HttpTransport::new(client, config.credentials())),
        store,
        retry: RetryCoordinator::linear(config.max_retries()),
        settings,
    };

    let mut view = ConversationView::new(conversation, model, services);
    let session = view
        .start_turn(Submission {
            text: options.prompt.join(" "),
            attachments,
        })
        .await?;

    let ctrl_c = view.cancel_handle().map(|handle| {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                handle.cancel();
            }
        })
    });

    let mut sink = TerminalSink::new(io::stdout(), io::stderr());
    let outcome = session.run(&mut sink).await;
    if let Some(task) = ctrl_c {
        task.abort();
    }

    let failed = matches!(outcome.status, TurnStatus::Failed(_));
    view.finish_turn(outcome);
    if !options.no_save {
        eprintln!(
            "💾 Saved as {} (continue with --conversation {})",
            view.conversation().title,
            view.conversation().id
        );
    }
    if failed {
        std::process::exit(1);
    }
    Ok(())
}
