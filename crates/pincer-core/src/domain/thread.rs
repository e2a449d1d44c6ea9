use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A conversation owned by a single user. Deleted
/// transactionally along with its messages, events, proposed actions and
/// domain grants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Derived from the first user message, truncated at a word boundary to
    /// at most 80 graphemes. Set exactly once; never overwritten after.
    pub title: Option<String>,
}

/// Role a message was authored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    /// Carries tool-call/tool-result records. Visible to the planner's
    /// history but never surfaced to end-user clients.
    Internal,
}

/// An immutable message in a thread's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub thread_id: String,
    pub role: MessageRole,
    /// At most 64 KiB of UTF-8 text.
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Maximum content length in bytes.
pub const MAX_MESSAGE_CONTENT_BYTES: usize = 64 * 1024;

/// Maximum thread title length in graphemes.
pub const MAX_TITLE_GRAPHEMES: usize = 80;

/// Derive a thread title from the first user message: truncate at a word
/// boundary to at most `MAX_TITLE_GRAPHEMES` graphemes, never mid-word.
pub fn derive_title(user_text: &str) -> String {
    use unicode_segmentation::UnicodeSegmentation;

    let graphemes: Vec<&str> = user_text.graphemes(true).collect();
    if graphemes.len() <= MAX_TITLE_GRAPHEMES {
        return user_text.trim().to_string();
    }

    let mut truncated: String = graphemes[..MAX_TITLE_GRAPHEMES].concat();
    if let Some(last_space) = truncated.rfind(char::is_whitespace) {
        truncated.truncate(last_space);
    }
    format!("{}...", truncated.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_not_truncated() {
        assert_eq!(derive_title("hello world"), "hello world");
    }

    #[test]
    fn long_text_truncates_at_word_boundary() {
        let text = "a ".repeat(60) + "finaltrailingword";
        let title = derive_title(&text);
        assert!(title.ends_with("..."));
        assert!(!title.contains("finaltrailingword"));
    }
}
