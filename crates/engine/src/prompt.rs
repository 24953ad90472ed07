use super::catalog::IMAGE_GENERATION_COMMAND_PREFIX;
use super::types::{ImageRef, PromptMessage, Role};

pub const MULTIMODAL_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer the user's questions in a concise manner.";
pub const IMAGE_PLACEHOLDER: &str = "<image_placeholder>\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub images: Vec<ImageRef>,
}

impl ConversationTurn {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
        }
    }
}

pub fn plain_conversation(history: &[PromptMessage]) -> Vec<ConversationTurn> {
    history
        .iter()
        .map(|message| ConversationTurn::text(message.role, message.content.clone()))
        .collect()
}

/// Shapes history for a vision-language processor.
///
/// Images are announced inline with a placeholder token, and a lone user turn
/// gets a system prompt so the model answers tersely.
pub fn multimodal_conversation(history: &[PromptMessage]) -> Vec<ConversationTurn> {
    let mut turns = history
        .iter()
        .map(|message| match &message.image {
            Some(image) => ConversationTurn {
                role: message.role,
                content: format!("{IMAGE_PLACEHOLDER}{}", message.content),
                images: vec![image.clone()],
            },
            None => ConversationTurn::text(message.role, message.content.clone()),
        })
        .collect::<Vec<_>>();

    if turns.len() == 1 {
        turns.insert(0, ConversationTurn::text(Role::System, MULTIMODAL_SYSTEM_PROMPT));
    }

    turns
}

/// Returns the image description when `text` is an image-synthesis command.
pub fn image_command(text: &str) -> Option<&str> {
    text.strip_prefix(IMAGE_GENERATION_COMMAND_PREFIX)
        .map(str::trim_start)
}
