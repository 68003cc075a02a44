use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: MessageContent::Text(content.into()),
        }
    }
}

/// Plain text for ordinary turns, content blocks when an image rides along.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

#[derive(Deserialize, Default, Debug)]
pub struct ChatResponseDelta {
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ChatResponseChoice {
    #[serde(default)]
    pub delta: ChatResponseDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// One `data:` payload. Local proxies send the flat `reasoning`/`answer`
/// shape, GLM and Doubao send OpenAI-style `choices[].delta`.
#[derive(Deserialize, Default, Debug)]
pub struct StreamPayload {
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChatResponseChoice>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl StreamPayload {
    pub fn reasoning_text(&self) -> Option<&str> {
        non_empty(self.reasoning.as_deref()).or_else(|| {
            self.choices
                .first()
                .and_then(|choice| non_empty(choice.delta.reasoning_content.as_deref()))
        })
    }

    pub fn answer_text(&self) -> Option<&str> {
        non_empty(self.answer.as_deref()).or_else(|| {
            self.choices
                .first()
                .and_then(|choice| non_empty(choice.delta.content.as_deref()))
        })
    }

    /// In-band provider error message, if the payload carries one.
    pub fn error_message(&self) -> Option<String> {
        let error = self.error.as_ref()?;
        if error.is_null() {
            return None;
        }
        Some(
            error
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| error.as_str())
                .unwrap_or("An error occurred during streaming")
                .to_string(),
        )
    }
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.is_empty())
}
