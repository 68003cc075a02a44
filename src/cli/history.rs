//! `tutorchat history [id]`

use std::error::Error;

use crate::core::message::{ChatTurn, Conversation, TurnRole};
use crate::core::store::{ConversationStore, ConversationSummary};

pub async fn show_history(
    store: &dyn ConversationStore,
    conversation_id: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    match conversation_id {
        Some(id) => {
            let conversation = store
                .load(id)
                .await?
                .ok_or_else(|| format!("❌ No conversation with id {id}"))?;
            println!("{}", render_conversation(&conversation));
        }
        None => {
            let summaries = store.list().await?;
            if summaries.is_empty() {
                println!("No saved conversations yet. Start one with 'tutorchat say <question>'.");
            }
            for summary in &summaries {
                println!("{}", summary_line(summary));
            }
        }
    }
    Ok(())
}

fn summary_line(summary: &ConversationSummary) -> String {
    format!(
        "{}  {}  {} ({} turns)",
        summary.id,
        summary.updated_at.format("%Y-%m-%d %H:%M"),
        summary.title,
        summary.turn_count
    )
}

fn render_turn(turn: &ChatTurn) -> String {
    let speaker = match turn.role {
        TurnRole::User => "You",
        TurnRole::Assistant => "Tutor",
    };
    let mut text = String::new();
    if !turn.thinking.is_empty() {
        text.push_str(&format!("  (thinking) {}\n", turn.thinking.trim()));
    }
    let content = if turn.content.is_empty() {
        "(no response)"
    } else {
        turn.content.trim()
    };
    text.push_str(&format!("{speaker}: {content}"));
    text
}

fn render_conversation(conversation: &Conversation) -> String {
    let mut out = format!("📚 {}\n", conversation.title);
    for turn in &conversation.turns {
        out.push('\n');
        out.push_str(&render_turn(turn));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryStore;

    #[test]
    fn renders_thinking_before_answer() {
        let mut conversation = Conversation::with_id("c");
        conversation.upsert_turn(ChatTurn::user("Why is the sky blue?", Vec::new()));
        let mut answer = ChatTurn::assistant_placeholder();
        answer.thinking = "Rayleigh scattering".to_string();
        answer.content = "Shorter wavelengths scatter more.".to_string();
        conversation.upsert_turn(answer);
        conversation.upsert_turn(ChatTurn::assistant_placeholder());

        let text = render_conversation(&conversation);
        assert!(text.starts_with("📚 Why is the sky blue?"));
        let thinking = text.find("(thinking) Rayleigh").unwrap();
        let answer = text.find("Tutor: Shorter").unwrap();
        assert!(thinking < answer);
        assert!(text.contains("Tutor: (no response)"));
    }

    #[tokio::test]
    async fn unknown_conversation_is_an_error() {
        let store = MemoryStore::new();
        assert!(show_history(&store, Some("missing")).await.is_err());
        assert!(show_history(&store, None).await.is_ok());
    }
}
