use std::sync::Arc;
use std::time::{Duration, Instant};

use snafu::ensure;

use sidechat_engine::{
    ContentChannel, EngineEvent, FinalOutput, GenerationRequest, ImageRef, InterruptFlag,
    SessionId, StopReason,
};

use crate::error::{AlreadyStartedSnafu, SessionResult};
use crate::events::{ChatEvent, ChatEventKind, ImageFrame};
use crate::progress::{FileCompletion, ProgressAggregator, ProgressEntry};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Loading,
    Streaming,
    Completed,
    Interrupted,
    Failed {
        reason: String,
    },
}

impl SessionState {
    /// Loading or streaming; the session still owns the pending message.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Loading | Self::Streaming)
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Completed | Self::Interrupted | Self::Failed { .. } => true,
            Self::Idle | Self::Loading | Self::Streaming => false,
        }
    }
}

/// Token timing for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationMetrics {
    pub token_count: u32,
    /// Milliseconds since the first token.
    pub elapsed_ms: f64,
    /// Zero until the second token arrives.
    pub tokens_per_second: f64,
    /// Milliseconds from session start to the first token.
    pub first_token_latency_ms: Option<f64>,
}

impl GenerationMetrics {
    pub fn from_totals(token_count: u32, elapsed_ms: f64) -> Self {
        Self {
            token_count,
            elapsed_ms,
            tokens_per_second: throughput(token_count, elapsed_ms),
            first_token_latency_ms: None,
        }
    }

    /// Metadata line shown under a completed assistant message.
    pub fn metadata_line(&self) -> String {
        format!(
            "{} tokens in {:.0} ms ({:.1} tokens/sec)",
            self.token_count, self.elapsed_ms, self.tokens_per_second
        )
    }
}

fn throughput(token_count: u32, elapsed_ms: f64) -> f64 {
    if token_count < 2 || elapsed_ms <= 0.0 {
        return 0.0;
    }
    f64::from(token_count) / (elapsed_ms / 1000.0)
}

fn millis(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

/// Lifecycle of one request/response exchange.
///
/// Maps raw engine callbacks into [`ChatEvent`]s and owns the interrupt flag the
/// engine's token loop polls. Once terminal, every further engine event is
/// dropped.
#[derive(Debug)]
pub struct GenerationSession {
    id: SessionId,
    state: SessionState,
    interrupt: InterruptFlag,
    progress: ProgressAggregator,
    text: String,
    metrics: GenerationMetrics,
    started_at: Option<Instant>,
    first_token_at: Option<Instant>,
    output: Option<FinalOutput>,
}

impl GenerationSession {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            state: SessionState::Idle,
            interrupt: InterruptFlag::new(),
            progress: ProgressAggregator::new(),
            text: String::new(),
            metrics: GenerationMetrics::default(),
            started_at: None,
            first_token_at: None,
            output: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn metrics(&self) -> GenerationMetrics {
        self.metrics
    }

    pub fn progress(&self) -> &ProgressAggregator {
        &self.progress
    }

    /// Text accumulated so far, reasoning included.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn final_output(&self) -> Option<&FinalOutput> {
        self.output.as_ref()
    }

    /// Handle to this session's interrupt flag, shared with the engine worker.
    pub fn interrupt_flag(&self) -> InterruptFlag {
        self.interrupt.clone()
    }

    pub fn start(&mut self, request: &GenerationRequest, at: Instant) -> SessionResult<ChatEvent> {
        ensure!(
            self.state == SessionState::Idle,
            AlreadyStartedSnafu {
                stage: "start-session",
                session_id: self.id,
                state: self.state.clone(),
            }
        );

        let text = request
            .history
            .last()
            .map(|message| message.content.clone())
            .unwrap_or_default();
        self.interrupt.reset();
        self.started_at = Some(at);
        self.state = SessionState::Loading;
        tracing::debug!(session_id = %self.id, task = %request.task(), "generation session started");

        Ok(ChatEvent::request_submitted(
            self.id,
            text,
            request.attachment.clone(),
        ))
    }

    /// Folds one engine callback into the session.
    ///
    /// Returns the chat event it maps to, if any. Completions of untracked files
    /// and empty token chunks produce nothing.
    pub fn apply(&mut self, event: EngineEvent) -> Option<ChatEvent> {
        match &self.state {
            SessionState::Loading | SessionState::Streaming => {}
            SessionState::Idle => {
                tracing::warn!(session_id = %self.id, "engine event before session start ignored");
                return None;
            }
            SessionState::Completed | SessionState::Interrupted | SessionState::Failed { .. } => {
                tracing::debug!(session_id = %self.id, state = ?self.state, "late engine event ignored");
                return None;
            }
        }

        let kind = match event {
            EngineEvent::FileInitiate { file, total_bytes } => {
                let entry = self.progress.on_file_start(&file, total_bytes);
                Some(self.load_progress(entry))
            }
            EngineEvent::FileProgress { file, loaded_bytes } => {
                let entry = self.progress.on_file_progress(&file, loaded_bytes);
                Some(self.load_progress(entry))
            }
            EngineEvent::FileDone { file } => match self.progress.on_file_done(&file) {
                FileCompletion::Untracked => None,
                FileCompletion::AllComplete => Some(ChatEventKind::ModelReady),
                FileCompletion::Remaining(pending_files) => Some(ChatEventKind::ModelFileDone {
                    file_id: file,
                    pending_files,
                }),
            },
            EngineEvent::Delta { chunk, channel, at } => {
                self.record_token(at);
                self.state = SessionState::Streaming;
                if chunk.is_empty() {
                    None
                } else {
                    self.text.push_str(&chunk);
                    Some(match channel {
                        ContentChannel::Answer => ChatEventKind::TextDelta(chunk),
                        ContentChannel::Reasoning => ChatEventKind::ReasoningDelta(chunk),
                    })
                }
            }
            EngineEvent::ImageProgress { progress } => {
                self.state = SessionState::Streaming;
                Some(ChatEventKind::ImageFrame(ImageFrame::Partial(progress)))
            }
            EngineEvent::ImageReady(image) => {
                self.state = SessionState::Completed;
                tracing::info!(
                    session_id = %self.id,
                    width = image.width,
                    height = image.height,
                    "image synthesis completed"
                );
                Some(ChatEventKind::ImageFrame(ImageFrame::Final(
                    ImageRef::Raster(Arc::new(image)),
                )))
            }
            EngineEvent::Finished { output, at } => Some(self.finish(output, at)),
            EngineEvent::Failed(failure) => {
                let reason = failure.to_string();
                tracing::warn!(session_id = %self.id, error = %reason, "generation failed");
                self.state = SessionState::Failed {
                    reason: reason.clone(),
                };
                Some(ChatEventKind::Failed(reason))
            }
        };

        kind.map(|kind| ChatEvent::new(self.id, kind))
    }

    /// Requests a cooperative stop.
    ///
    /// The session turns `Interrupted` immediately; the engine halts at its next
    /// token boundary. Returns `None` when there is nothing to cancel.
    pub fn cancel(&mut self) -> Option<ChatEvent> {
        if !self.state.is_active() {
            return None;
        }

        self.interrupt.interrupt();
        self.state = SessionState::Interrupted;
        tracing::info!(
            session_id = %self.id,
            tokens = self.metrics.token_count,
            "generation interrupted"
        );
        Some(ChatEvent::new(self.id, ChatEventKind::Interrupted))
    }

    /// Fails an active session for a reason observed outside the engine stream.
    pub fn fail(&mut self, reason: impl Into<String>) -> Option<ChatEvent> {
        if !self.state.is_active() {
            return None;
        }

        let reason = reason.into();
        tracing::warn!(session_id = %self.id, error = %reason, "generation session failed");
        self.interrupt.interrupt();
        self.state = SessionState::Failed {
            reason: reason.clone(),
        };
        Some(ChatEvent::new(self.id, ChatEventKind::Failed(reason)))
    }

    fn load_progress(&self, entry: ProgressEntry) -> ChatEventKind {
        ChatEventKind::ModelLoadProgress {
            entry,
            pending_files: self.progress.pending_files(),
        }
    }

    fn record_token(&mut self, at: Instant) {
        let first = *self.first_token_at.get_or_insert(at);
        if self.metrics.first_token_latency_ms.is_none() {
            self.metrics.first_token_latency_ms = self
                .started_at
                .map(|started| millis(at.saturating_duration_since(started)));
        }

        self.metrics.token_count += 1;
        self.metrics.elapsed_ms = millis(at.saturating_duration_since(first));
        self.metrics.tokens_per_second =
            throughput(self.metrics.token_count, self.metrics.elapsed_ms);
    }

    fn finish(&mut self, output: FinalOutput, at: Instant) -> ChatEventKind {
        if output.stop_reason == StopReason::Interrupted {
            tracing::info!(session_id = %self.id, "engine stopped on interrupt");
            self.output = Some(output);
            self.state = SessionState::Interrupted;
            return ChatEventKind::Interrupted;
        }

        if let Some(first) = self.first_token_at {
            self.metrics.elapsed_ms = millis(at.saturating_duration_since(first));
            self.metrics.tokens_per_second =
                throughput(self.metrics.token_count, self.metrics.elapsed_ms);
        }
        tracing::info!(
            session_id = %self.id,
            stop_reason = ?output.stop_reason,
            metadata = %self.metrics.metadata_line(),
            "generation completed"
        );
        self.output = Some(output);
        self.state = SessionState::Completed;
        ChatEventKind::Completed(self.metrics)
    }
}
