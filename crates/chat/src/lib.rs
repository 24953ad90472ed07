//! Chat session control for the side-panel assistant.
//!
//! A [`SessionController`] accepts prompts, drives one [`GenerationSession`] at a
//! time against an [`sidechat_engine::InferenceEngine`], and folds the resulting
//! [`ChatEvent`]s into a [`ChatLog`] through the pure [`reduce`] function.

#![deny(unsafe_code)]

pub mod controller;
pub mod error;
pub mod events;
pub mod message;
pub mod progress;
pub mod reducer;
pub mod session;
pub mod settings;

pub use controller::{
    QuickAction, STREAM_CLOSED_REASON, SessionController, SessionHandle, SubmitRequest,
};
pub use error::{ControllerError, ControllerResult, SessionError, SessionResult};
pub use events::{ChatEvent, ChatEventKind, ImageFrame};
pub use message::{
    ChatLog, ChatMessage, ContentPhase, FAILURE_FALLBACK, IMAGE_READY_CAPTION,
    LOADING_MODEL_LABEL, MessageStatus, PendingSlot, THINKING_LABEL,
};
pub use progress::{FileCompletion, ProgressAggregator, ProgressEntry};
pub use reducer::{latest_image, reduce};
pub use session::{GenerationMetrics, GenerationSession, SessionState};
pub use settings::{
    ChatSettings, SettingsError, SettingsResult, SettingsSource, SettingsStore,
};
