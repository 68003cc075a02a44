use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONVERSATION_TITLE: &str = "New conversation";
const TITLE_MAX_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }

    pub fn is_user(self) -> bool {
        self == TurnRole::User
    }

    pub fn is_assistant(self) -> bool {
        self == TurnRole::Assistant
    }
}

impl AsRef<str> for TurnRole {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for TurnRole {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(TurnRole::User),
            "assistant" => Ok(TurnRole::Assistant),
            _ => Err(format!("invalid turn role: {value}")),
        }
    }
}

impl TryFrom<String> for TurnRole {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<TurnRole> for String {
    fn from(value: TurnRole) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Document,
}

/// A file the upload pipeline has already stored. The core only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    pub display_name: String,
    pub media_kind: MediaKind,
    pub size_bytes: u64,
    /// Backend-assigned location: a `data:` URL or an http(s) URL for images.
    pub locator: String,
}

impl AttachmentRef {
    pub fn is_image(&self) -> bool {
        self.media_kind == MediaKind::Image
    }

    /// `name (1.2 KB)` as listed under the user's message.
    pub fn listing_line(&self) -> String {
        format!("- {} ({})", self.display_name, format_file_size(self.size_bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub id: String,
    pub role: TurnRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thinking: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
    pub timestamp: DateTime<Utc>,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>, attachments: Vec<AttachmentRef>) -> Self {
        Self {
            id: new_id(),
            role: TurnRole::User,
            content: content.into(),
            thinking: String::new(),
            attachments,
            timestamp: Utc::now(),
        }
    }

    /// Empty assistant turn that a streaming session fills in.
    pub fn assistant_placeholder() -> Self {
        Self {
            id: new_id(),
            role: TurnRole::Assistant,
            content: String::new(),
            thinking: String::new(),
            attachments: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn first_image(&self) -> Option<&AttachmentRef> {
        self.attachments.iter().find(|a| a.is_image())
    }

    pub fn image_count(&self) -> usize {
        self.attachments.iter().filter(|a| a.is_image()).count()
    }

    pub fn document_count(&self) -> usize {
        self.attachments.len() - self.image_count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub turns: Vec<ChatTurn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::with_id(new_id())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: DEFAULT_CONVERSATION_TITLE.to_string(),
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn turn(&self, turn_id: &str) -> Option<&ChatTurn> {
        self.turns.iter().find(|turn| turn.id == turn_id)
    }

    pub fn turn_mut(&mut self, turn_id: &str) -> Option<&mut ChatTurn> {
        self.turns.iter_mut().find(|turn| turn.id == turn_id)
    }

    /// Append a turn, or replace the one with the same id.
    pub fn upsert_turn(&mut self, turn: ChatTurn) {
        if self.turns.is_empty() && turn.role.is_user() && self.title == DEFAULT_CONVERSATION_TITLE
        {
            self.title = title_from_message(&turn.content);
        }

        match self.turn_mut(&turn.id) {
            Some(existing) => *existing = turn,
            None => self.turns.push(turn),
        }
        self.updated_at = Utc::now();
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

pub fn title_from_message(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return DEFAULT_CONVERSATION_TITLE.to_string();
    }

    let mut title: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        title.push_str("...");
    }
    title
}

pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

/// Time-ordered id: base36 milliseconds followed by a random base36 suffix.
pub fn new_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let mut random = [0_u8; 8];
    if getrandom::fill(&mut random).is_err() {
        let nanos = Utc::now().timestamp_subsec_nanos() as u64;
        random = nanos.to_le_bytes();
    }
    format!(
        "{}{}",
        to_base36(millis),
        to_base36(u64::from_le_bytes(random))
    )
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if value == 0 {
        return "0".to_string();
    }

    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str) -> AttachmentRef {
        AttachmentRef {
            id: new_id(),
            display_name: name.to_string(),
            media_kind: MediaKind::Image,
            size_bytes: 2048,
            locator: "data:image/png;base64,AAAA".to_string(),
        }
    }

    #[test]
    fn invalid_role_strings_are_rejected() {
        assert!(TurnRole::try_from("system").is_err());
        assert_eq!(TurnRole::try_from("assistant"), Ok(TurnRole::Assistant));
    }

    #[test]
    fn roles_serialize_as_plain_strings() {
        let turn = ChatTurn::user("hi", Vec::new());
        let json = serde_json::to_value(&turn).expect("serialize");
        assert_eq!(json["role"], "user");
        assert!(json.get("thinking").is_none());
    }

    #[test]
    fn title_is_truncated_to_thirty_chars() {
        assert_eq!(title_from_message("short question"), "short question");
        let long = "a".repeat(45);
        assert_eq!(title_from_message(&long), format!("{}...", "a".repeat(30)));
        assert_eq!(title_from_message("   "), DEFAULT_CONVERSATION_TITLE);
    }

    #[test]
    fn first_user_turn_sets_title() {
        let mut conversation = Conversation::new();
        conversation.upsert_turn(ChatTurn::user("What is a prime number?", Vec::new()));
        conversation.upsert_turn(ChatTurn::user("And a composite one?", Vec::new()));
        assert_eq!(conversation.title, "What is a prime number?");
        assert_eq!(conversation.turns.len(), 2);
    }

    #[test]
    fn upsert_replaces_turn_with_same_id() {
        let mut conversation = Conversation::new();
        let mut turn = ChatTurn::assistant_placeholder();
        conversation.upsert_turn(turn.clone());
        turn.content = "done".to_string();
        conversation.upsert_turn(turn.clone());
        assert_eq!(conversation.turns.len(), 1);
        assert_eq!(conversation.turns[0].content, "done");
    }

    #[test]
    fn attachment_counts_and_first_image() {
        let doc = AttachmentRef {
            media_kind: MediaKind::Document,
            display_name: "notes.pdf".to_string(),
            ..image("x")
        };
        let turn = ChatTurn::user("", vec![doc, image("first.png"), image("second.png")]);
        assert_eq!(turn.image_count(), 2);
        assert_eq!(turn.document_count(), 1);
        assert_eq!(
            turn.first_image().map(|a| a.display_name.as_str()),
            Some("first.png")
        );
    }

    #[test]
    fn file_sizes_are_human_readable() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(2048), "2.0 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn ids_are_unique() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
