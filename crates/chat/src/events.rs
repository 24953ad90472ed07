use sidechat_engine::{Attachment, ImageRef, SessionId};

use crate::progress::ProgressEntry;
use crate::session::GenerationMetrics;

/// Image synthesis output mapped into chat language.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageFrame {
    /// Fraction of image tokens produced, in `0.0..=1.0`.
    Partial(f64),
    Final(ImageRef),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEventKind {
    RequestSubmitted {
        text: String,
        attachment: Option<Attachment>,
    },
    /// A file started or advanced; `pending_files` counts downloads in flight.
    ModelLoadProgress {
        entry: ProgressEntry,
        pending_files: usize,
    },
    /// A file finished without completing the first download set.
    ModelFileDone {
        file_id: String,
        pending_files: usize,
    },
    /// Fired once per session, when the download set first drains.
    ModelReady,
    TextDelta(String),
    ReasoningDelta(String),
    ImageFrame(ImageFrame),
    Completed(GenerationMetrics),
    Interrupted,
    Failed(String),
}

/// One session event, addressed to the session that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatEvent {
    pub session_id: SessionId,
    pub kind: ChatEventKind,
}

impl ChatEvent {
    pub fn new(session_id: SessionId, kind: ChatEventKind) -> Self {
        Self { session_id, kind }
    }

    pub fn request_submitted(
        session_id: SessionId,
        text: impl Into<String>,
        attachment: Option<Attachment>,
    ) -> Self {
        Self::new(
            session_id,
            ChatEventKind::RequestSubmitted {
                text: text.into(),
                attachment,
            },
        )
    }

    /// Terminal events close the pending assistant message.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            ChatEventKind::Completed(_)
                | ChatEventKind::Interrupted
                | ChatEventKind::Failed(_)
                | ChatEventKind::ImageFrame(ImageFrame::Final(_))
        )
    }
}
