//! Boundary with the in-browser inference library.
//!
//! Model execution, tokenization and sampling live behind [`InferenceEngine`];
//! this crate owns the request/event vocabulary, model configuration and the
//! cooperative interrupt that the token loop observes.

pub mod catalog;
pub mod config;
mod engine;
pub mod error;
pub mod interrupt;
pub mod prompt;
pub mod scripted;
pub mod stopping;
pub mod streamer;
pub mod types;

pub use catalog::{IMAGE_GENERATION_COMMAND_PREFIX, ModelCatalog, models_for_task};
pub use config::{
    DEFAULT_LLM_MODEL_ID, DataType, DeviceType, GenerationConfig, ModelConfig, ModelTask,
    PerComponent,
};
pub use engine::{
    ContentChannel, EngineEvent, EngineEventStream, EngineFailure, EngineStreamHandle,
    EngineWorker, FailureKind, FinalOutput, GenerationMode, GenerationRequest, InferenceEngine,
    StopReason, make_event_stream,
};
pub use error::{EngineError, EngineResult};
pub use interrupt::InterruptFlag;
pub use scripted::{ScriptStep, ScriptedEngine};
pub use stopping::InterruptibleEosCriteria;
pub use streamer::{ImageProgress, ImageProgressStreamer};
pub use types::{
    Attachment, AudioClip, ImageRef, PromptMessage, RasterImage, Role, SessionId,
};
