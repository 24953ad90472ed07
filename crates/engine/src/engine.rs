use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::Stream;
use tokio::sync::mpsc;

use super::config::{GenerationConfig, ModelConfig, ModelTask};
use super::error::EngineResult;
use super::interrupt::InterruptFlag;
use super::prompt::{ConversationTurn, multimodal_conversation, plain_conversation};
use super::types::{Attachment, PromptMessage, RasterImage, SessionId};

/// Which part of the answer a decoded chunk belongs to.
///
/// Reasoning models emit their thinking first, tagged upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentChannel {
    Answer,
    Reasoning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationMode {
    Respond,
    SynthesizeImage { prompt: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub session_id: SessionId,
    pub model: ModelConfig,
    pub generation: GenerationConfig,
    pub history: Vec<PromptMessage>,
    pub attachment: Option<Attachment>,
    pub mode: GenerationMode,
}

impl GenerationRequest {
    pub fn new(session_id: SessionId, model: ModelConfig, history: Vec<PromptMessage>) -> Self {
        Self {
            session_id,
            model,
            generation: GenerationConfig::default(),
            history,
            attachment: None,
            mode: GenerationMode::Respond,
        }
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn with_mode(mut self, mode: GenerationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn task(&self) -> ModelTask {
        self.model.task
    }

    /// Conversation shaped for the pipeline selected by the model task.
    pub fn conversation(&self) -> Vec<ConversationTurn> {
        match self.task() {
            ModelTask::MultimodalLlm => multimodal_conversation(&self.history),
            _ => plain_conversation(&self.history),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfSequence,
    MaxTokens,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalOutput {
    pub text: String,
    pub token_count: u32,
    pub stop_reason: StopReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Weight shard fetch or decode failed before generation started.
    Load,
    /// Compute rejected mid-stream.
    Generation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl EngineFailure {
    pub fn load(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Load,
            message: message.into(),
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Generation,
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Load => write!(f, "model load failed: {}", self.message),
            FailureKind::Generation => write!(f, "generation failed: {}", self.message),
        }
    }
}

/// Callback payloads from the inference library, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    FileInitiate {
        file: String,
        total_bytes: u64,
    },
    FileProgress {
        file: String,
        loaded_bytes: u64,
    },
    FileDone {
        file: String,
    },
    /// One emitted token and the text it decoded to (possibly empty).
    Delta {
        chunk: String,
        channel: ContentChannel,
        at: Instant,
    },
    ImageProgress {
        progress: f64,
    },
    ImageReady(RasterImage),
    Finished {
        output: FinalOutput,
        at: Instant,
    },
    Failed(EngineFailure),
}

impl EngineEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Failed(_))
    }
}

pub type EngineWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub struct EngineEventStream {
    session_id: SessionId,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    interrupt: InterruptFlag,
}

pub struct EngineStreamHandle {
    pub stream: EngineEventStream,
    pub worker: EngineWorker,
}

impl EngineEventStream {
    pub fn new(
        session_id: SessionId,
        events: mpsc::UnboundedReceiver<EngineEvent>,
        interrupt: InterruptFlag,
    ) -> Self {
        Self {
            session_id,
            events,
            interrupt,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub async fn recv(&mut self) -> Option<EngineEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        self.events.try_recv().ok()
    }
}

impl Stream for EngineEventStream {
    type Item = EngineEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for EngineEventStream {
    fn drop(&mut self) {
        // An abandoned worker halts at its next token boundary.
        self.interrupt.interrupt();
    }
}

/// Boundary with the delegated inference library.
pub trait InferenceEngine: Send + Sync {
    fn name(&self) -> &str;
    fn supports(&self, task: ModelTask) -> bool;
    fn start_generation(
        &self,
        request: GenerationRequest,
        interrupt: InterruptFlag,
    ) -> EngineResult<EngineStreamHandle>;
}

pub fn make_event_stream(
    session_id: SessionId,
    interrupt: InterruptFlag,
) -> (mpsc::UnboundedSender<EngineEvent>, EngineEventStream) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    (
        event_tx,
        EngineEventStream::new(session_id, event_rx, interrupt),
    )
}
