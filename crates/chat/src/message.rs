use sidechat_engine::{ImageRef, PromptMessage, Role, SessionId};

/// Placeholder shown while the assistant has produced nothing yet.
pub const THINKING_LABEL: &str = "Thinking...";
/// Placeholder shown while weight files are still downloading.
pub const LOADING_MODEL_LABEL: &str = "Loading model...";
pub const IMAGE_READY_CAPTION: &str = "Download image on the right!";
pub const FAILURE_FALLBACK: &str = "Sorry, something went wrong. Please try again.";

/// Lifecycle status for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    Pending,
    Streaming,
    Done,
    Cancelled,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Timing and throughput line rendered under the message.
    pub metadata: Option<String>,
    pub image: Option<ImageRef>,
    pub status: MessageStatus,
    // Byte length of the reasoning text at the front of `content`.
    pub(crate) reasoning_len: Option<usize>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>, image: Option<ImageRef>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            metadata: None,
            image,
            status: MessageStatus::Done,
            reasoning_len: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            metadata: None,
            image: None,
            status: MessageStatus::Done,
            reasoning_len: None,
        }
    }

    pub fn assistant_placeholder() -> Self {
        Self {
            status: MessageStatus::Pending,
            ..Self::assistant(THINKING_LABEL)
        }
    }

    /// Reasoning text the model produced before its answer, if any.
    pub fn reasoning_prefix(&self) -> Option<&str> {
        self.reasoning_len.and_then(|len| self.content.get(..len))
    }

    /// Content with the reasoning prefix removed.
    pub fn answer(&self) -> &str {
        self.reasoning_len
            .and_then(|len| self.content.get(len..))
            .unwrap_or(&self.content)
    }

    pub fn shows_placeholder(&self) -> bool {
        self.content == THINKING_LABEL || self.content == LOADING_MODEL_LABEL
    }
}

/// Progress of the assistant message that is still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentPhase {
    /// Placeholder or progress label; the next chunk replaces it.
    Awaiting,
    Reasoning,
    Answer,
}

/// The single open slot in a log, bound to the session filling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSlot {
    pub index: usize,
    pub session_id: SessionId,
    pub phase: ContentPhase,
}

/// Ordered chat log with at most one pending assistant message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatLog {
    pub(crate) messages: Vec<ChatMessage>,
    pub(crate) pending: Option<PendingSlot>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a closed log from already finished messages.
    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            pending: None,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn pending(&self) -> Option<PendingSlot> {
        self.pending
    }

    pub fn pending_message(&self) -> Option<&ChatMessage> {
        self.pending
            .and_then(|slot| self.messages.get(slot.index))
    }

    pub fn is_closed(&self) -> bool {
        self.pending.is_none()
    }

    /// Prompt history sent with the next request.
    ///
    /// Failed turns and assistant turns that never received content are skipped.
    pub fn history(&self) -> Vec<PromptMessage> {
        self.messages
            .iter()
            .filter(|message| !matches!(message.status, MessageStatus::Error(_)))
            .filter(|message| !(message.role == Role::Assistant && message.shows_placeholder()))
            .map(|message| PromptMessage {
                role: message.role,
                content: message.content.clone(),
                image: message.image.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_excludes_reasoning_prefix() {
        let mut message = ChatMessage::assistant("let me think...The answer is 4.");
        message.reasoning_len = Some("let me think...".len());

        assert_eq!(message.reasoning_prefix(), Some("let me think..."));
        assert_eq!(message.answer(), "The answer is 4.");
    }

    #[test]
    fn history_skips_unanswered_and_failed_turns() {
        let mut failed = ChatMessage::assistant(FAILURE_FALLBACK);
        failed.status = MessageStatus::Error("model load failed".to_string());
        let mut cancelled = ChatMessage::assistant_placeholder();
        cancelled.status = MessageStatus::Cancelled;

        let log = ChatLog::from_messages(vec![
            ChatMessage::user("one", None),
            failed,
            ChatMessage::user("two", None),
            cancelled,
            ChatMessage::user("three", None),
            ChatMessage::assistant("reply"),
        ]);

        let history = log.history();
        let contents = history
            .iter()
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(contents, vec!["one", "two", "three", "reply"]);
    }
}
