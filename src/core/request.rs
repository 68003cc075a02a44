//! Turning a conversation into a chat completion request.

use base64::Engine as _;

use crate::api::{ChatMessage, ChatRequest, ContentPart, ImageUrl, MessageContent};
use crate::core::error::{PermanentKind, StreamError};
use crate::core::message::{AttachmentRef, ChatTurn};

pub const SUPPORTED_IMAGE_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/gif", "image/webp"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl GenerationParams {
    /// Deep thinking gets a longer, more focused answer; image turns get
    /// lower randomness and more room than plain text.
    pub fn for_turn(deep_thinking: bool, has_image: bool) -> Self {
        let (temperature, max_tokens) = if deep_thinking {
            (0.3, 4096)
        } else if has_image {
            (0.2, 3000)
        } else {
            (0.7, 2048)
        };
        Self {
            temperature,
            top_p: 0.95,
            max_tokens,
        }
    }
}

/// Text stored on the user turn: what they typed plus a list of uploads.
pub fn compose_user_content(text: &str, attachments: &[AttachmentRef]) -> String {
    let text = text.trim();
    if attachments.is_empty() {
        return text.to_string();
    }

    let listing = attachments
        .iter()
        .map(AttachmentRef::listing_line)
        .collect::<Vec<_>>()
        .join("\n");
    if text.is_empty() {
        format!("Uploaded the following files:\n{listing}")
    } else {
        format!("{text}\n\nUploaded files:\n{listing}")
    }
}

/// Prompt actually sent for the current turn, with a note about attachments.
pub fn enhance_prompt(turn: &ChatTurn, image_forwarded: bool) -> String {
    let images = turn.image_count();
    let documents = turn.document_count();
    let mut prompt = turn.content.clone();

    if images > 0 {
        prompt.push_str(&format!("\n\nPlease analyze the {}", plural(images, "uploaded image")));
        if documents > 0 {
            prompt.push_str(&format!(" and {}", plural(documents, "document")));
        }
        prompt.push('.');
        if image_forwarded {
            prompt.push_str(" First describe the image in detail, then answer my question.");
        }
    } else if documents > 0 {
        prompt.push_str(&format!(
            "\n\nI uploaded {}. Please tell me how you can help with them.",
            plural(documents, "document")
        ));
    }
    prompt
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("1 {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

/// Check an image locator before it is sent to a vision model.
///
/// Accepts http(s) URLs as-is, and `data:` URLs whose media type is one of
/// [`SUPPORTED_IMAGE_TYPES`] and whose payload is valid base64.
pub fn validate_image_locator(locator: &str) -> Result<String, StreamError> {
    if locator.starts_with("https://") || locator.starts_with("http://") {
        return Ok(locator.to_string());
    }

    let unsupported =
        |detail: String| StreamError::permanent(PermanentKind::UnsupportedMedia, detail);

    let rest = locator
        .strip_prefix("data:")
        .ok_or_else(|| unsupported("expected a data:image/ URL".to_string()))?;
    let (media_type, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| unsupported("image data is not base64 encoded".to_string()))?;

    if !SUPPORTED_IMAGE_TYPES.contains(&media_type) {
        return Err(unsupported(format!(
            "unsupported image type {media_type}; supported types: {}",
            SUPPORTED_IMAGE_TYPES.join(", ")
        )));
    }
    if payload.is_empty() {
        return Err(unsupported("image payload is empty".to_string()));
    }
    base64::prelude::BASE64_STANDARD
        .decode(payload)
        .map_err(|err| unsupported(format!("invalid base64 image data: {err}")))?;

    Ok(locator.to_string())
}

/// Assemble the request for `current`, using `history` as context.
///
/// Only the first image attachment is forwarded; a turn carries at most one
/// image block.
pub fn build_request(
    api_model: &str,
    history: &[ChatTurn],
    current: &ChatTurn,
    deep_thinking: bool,
) -> Result<ChatRequest, StreamError> {
    let image_url = current
        .first_image()
        .map(|image| validate_image_locator(&image.locator))
        .transpose()?;
    if current.image_count() > 1 {
        tracing::debug!(
            dropped = current.image_count() - 1,
            "Only the first image attachment is forwarded"
        );
    }

    let mut messages: Vec<ChatMessage> = history
        .iter()
        .filter(|turn| !turn.content.is_empty())
        .map(|turn| ChatMessage::text(turn.role.as_str(), turn.content.clone()))
        .collect();

    let prompt = enhance_prompt(current, image_url.is_some());
    let content = match &image_url {
        Some(url) => MessageContent::Parts(vec![
            ContentPart::Text { text: prompt },
            ContentPart::ImageUrl {
                image_url: ImageUrl { url: url.clone() },
            },
        ]),
        None => MessageContent::Text(prompt),
    };
    messages.push(ChatMessage {
        role: current.role.as_str().to_string(),
        content,
    });

    let params = GenerationParams::for_turn(deep_thinking, image_url.is_some());
    Ok(ChatRequest {
        model: api_model.to_string(),
        messages,
        temperature: params.temperature,
        top_p: params.top_p,
        max_tokens: params.max_tokens,
        stream: true,
    })
}
