//! Prompt assembly for summarization requests.

use tracing::{debug, warn};
use uuid::Uuid;

use digest_core::{Error, Note, Result};

/// Instruction used when neither the request nor the workspace configures
/// a system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an AI assistant that helps users summarize their memos.
Your task is to analyze the provided memos and create a concise, well-structured summary.

Guidelines:
1. Identify the main themes and topics across all memos
2. Highlight key insights, decisions, or action items
3. Organize the summary in a clear, readable format using Markdown
4. Keep the summary concise but comprehensive (aim for 200-500 words)
5. Use bullet points or numbered lists where appropriate
6. If there are related memos, group them by topic
7. Maintain a neutral, professional tone

Please provide a summary of the following memos:";

/// An assembled prompt and the notes that made it in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPrompt {
    pub prompt: String,
    /// IDs of the notes included, in prompt order.
    pub used: Vec<Uuid>,
    /// Characters of note content included (labels excluded).
    pub content_chars: usize,
}

/// Concatenate notes under `[Memo N]` labels after the system prompt.
///
/// Notes are taken in order; blank notes are skipped and the first note
/// that would push the content total past `max_chars` ends the prompt. A
/// note is never cut mid-way.
pub fn build_prompt(notes: &[Note], system_prompt: &str, max_chars: usize) -> Result<BuiltPrompt> {
    if notes.is_empty() {
        return Err(Error::InvalidInput(
            "no memos provided for summarization".to_string(),
        ));
    }

    let mut body = String::new();
    let mut used = Vec::new();
    let mut total = 0usize;
    let mut saw_content = false;

    for note in notes {
        let content = note.content.trim();
        if content.is_empty() {
            continue;
        }
        saw_content = true;

        let len = content.chars().count();
        if total + len > max_chars {
            warn!(
                subsystem = "jobs",
                component = "prompt",
                limit = max_chars,
                attempted = total + len,
                notes_used = used.len(),
                notes_available = notes.len(),
                "Memo content exceeds character budget, stopping"
            );
            break;
        }

        total += len;
        used.push(note.id);
        body.push_str(&format!("[Memo {}]\n{}\n\n", used.len(), content));
    }

    if used.is_empty() {
        let message = if saw_content {
            format!(
                "the first memo alone exceeds the {} character budget",
                max_chars
            )
        } else {
            "all memos are empty".to_string()
        };
        return Err(Error::InvalidInput(message));
    }

    let system = if system_prompt.trim().is_empty() {
        DEFAULT_SYSTEM_PROMPT
    } else {
        system_prompt
    };

    debug!(
        subsystem = "jobs",
        component = "prompt",
        notes_used = used.len(),
        content_chars = total,
        "Built summary prompt"
    );

    Ok(BuiltPrompt {
        prompt: format!("{}\n\n{}", system, body),
        used,
        content_chars: total,
    })
}
