use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use snafu::{ResultExt, ensure};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use sidechat_engine::{
    Attachment, EngineEventStream, GenerationConfig, GenerationMode, GenerationRequest,
    InferenceEngine, ModelConfig, ModelTask, PromptMessage, Role, SessionId,
    prompt::image_command,
};

use crate::error::{
    ControllerResult, EmptyPromptSnafu, EngineSnafu, SessionBusySnafu, SessionSnafu,
    UnsupportedAttachmentSnafu, UnsupportedTaskSnafu,
};
use crate::events::ChatEvent;
use crate::message::ChatLog;
use crate::progress::ProgressAggregator;
use crate::reducer;
use crate::session::{GenerationSession, SessionState};
use crate::settings::SettingsSource;

/// Failure reason used when the engine stream closes without a terminal event.
pub const STREAM_CLOSED_REASON: &str = "engine stream ended before a terminal event";

/// User input for one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl SubmitRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// Identifies a session started by [`SessionController::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    session_id: SessionId,
}

impl SessionHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}

/// Context-menu actions applied to a text selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuickAction {
    Rewrite,
    Summarize,
}

impl QuickAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Rewrite => "Rewrite",
            Self::Summarize => "Summarize",
        }
    }

    pub fn prompt(&self, selection: &str) -> String {
        format!("{}: {selection}", self.label())
    }
}

struct ActiveSession {
    session: GenerationSession,
    stream: EngineEventStream,
    worker: JoinHandle<()>,
}

/// Owns the chat log and at most one active generation session.
///
/// Engine workers are spawned on the ambient tokio runtime; events are folded
/// into the log as [`SessionController::pump`] drains them.
pub struct SessionController {
    engine: Arc<dyn InferenceEngine>,
    settings: Arc<dyn SettingsSource>,
    log: ChatLog,
    active: Option<ActiveSession>,
    last_session: Option<GenerationSession>,
    draining: Vec<JoinHandle<()>>,
    next_session_id: u64,
    subscribers: Vec<mpsc::UnboundedSender<ChatEvent>>,
}

impl SessionController {
    pub fn new(engine: Arc<dyn InferenceEngine>, settings: Arc<dyn SettingsSource>) -> Self {
        Self {
            engine,
            settings,
            log: ChatLog::new(),
            active: None,
            last_session: None,
            draining: Vec::new(),
            next_session_id: 1,
            subscribers: Vec::new(),
        }
    }

    /// Receives every chat event after it has been applied to the log.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ChatEvent> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.subscribers.push(event_tx);
        event_rx
    }

    pub fn log(&self) -> &ChatLog {
        &self.log
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_session(&self) -> Option<&GenerationSession> {
        self.active.as_ref().map(|active| &active.session)
    }

    /// Most recently finished session.
    pub fn last_session(&self) -> Option<&GenerationSession> {
        self.last_session.as_ref()
    }

    pub fn session(&self, handle: SessionHandle) -> Option<&GenerationSession> {
        self.active_session()
            .into_iter()
            .chain(self.last_session())
            .find(|session| session.id() == handle.session_id)
    }

    /// Download progress of the active session.
    pub fn progress(&self) -> Option<&ProgressAggregator> {
        self.active_session().map(GenerationSession::progress)
    }

    pub fn submit(&mut self, request: SubmitRequest) -> ControllerResult<SessionHandle> {
        self.ensure_idle("submit-request")?;
        let SubmitRequest { text, attachment } = request;
        ensure!(
            !text.trim().is_empty() || attachment.is_some(),
            EmptyPromptSnafu {
                stage: "submit-request",
            }
        );

        let settings = self.settings.snapshot();
        let history = self.log.history();
        self.start_session(
            text,
            attachment,
            settings.model_config.clone(),
            settings.generation_config.clone(),
            history,
        )
    }

    /// Runs a context-menu action over `selection` with a fresh history and the
    /// text-generation model.
    pub fn submit_quick_action(
        &mut self,
        action: QuickAction,
        selection: &str,
    ) -> ControllerResult<SessionHandle> {
        self.ensure_idle("quick-action")?;
        ensure!(
            !selection.trim().is_empty(),
            EmptyPromptSnafu {
                stage: "quick-action",
            }
        );

        let settings = self.settings.snapshot();
        self.start_session(
            action.prompt(selection),
            None,
            settings.model_for_task(ModelTask::TextGeneration),
            settings.generation_config.clone(),
            Vec::new(),
        )
    }

    /// Interrupts the session behind `handle`.
    ///
    /// Returns `false` when that session is no longer active.
    pub fn cancel(&mut self, handle: SessionHandle) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        if active.session.id() != handle.session_id {
            tracing::debug!(
                active = %active.session.id(),
                attempted = %handle.session_id,
                "cancel for inactive session ignored"
            );
            return false;
        }

        let Some(event) = active.session.cancel() else {
            return false;
        };
        self.dispatch(event);
        self.retire_if_terminal();
        true
    }

    /// Clears the log. Rejected while a session is active.
    pub fn new_chat(&mut self) -> ControllerResult<()> {
        self.ensure_idle("new-chat")?;
        self.log = ChatLog::new();
        self.last_session = None;
        tracing::info!("chat log cleared");
        Ok(())
    }

    /// Applies the next engine event of the active session.
    ///
    /// Returns `false` when no session is active.
    pub async fn pump(&mut self) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };

        let event = match active.stream.next().await {
            Some(event) => active.session.apply(event),
            None => active.session.fail(STREAM_CLOSED_REASON),
        };
        if let Some(event) = event {
            self.dispatch(event);
        }
        self.retire_if_terminal();
        true
    }

    /// Pumps until the active session ends and returns its final state.
    pub async fn run_until_idle(&mut self) -> Option<SessionState> {
        while self.pump().await {}
        self.last_session.as_ref().map(|session| session.state().clone())
    }

    /// Waits for engine workers of retired sessions to observe their interrupt.
    pub async fn drain_workers(&mut self) {
        for worker in std::mem::take(&mut self.draining) {
            if let Err(error) = worker.await {
                tracing::warn!(error = %error, "engine worker ended abnormally");
            }
        }
    }

    fn start_session(
        &mut self,
        text: String,
        attachment: Option<Attachment>,
        model: ModelConfig,
        generation: GenerationConfig,
        mut history: Vec<PromptMessage>,
    ) -> ControllerResult<SessionHandle> {
        let task = model.task;
        ensure!(
            is_interactive(task) && self.engine.supports(task),
            UnsupportedTaskSnafu {
                stage: "select-pipeline",
                task,
            }
        );
        if let Some(attachment) = &attachment {
            validate_attachment(task, attachment)?;
        }

        let session_id = SessionId::new(self.next_session_id);
        self.next_session_id += 1;

        let mut message = PromptMessage::new(Role::User, text.clone());
        if let Some(Attachment::Image(image)) = &attachment {
            message = message.with_image(image.clone());
        }
        history.push(message);

        let mode = match image_command(&text) {
            Some(prompt) if task == ModelTask::MultimodalLlm => GenerationMode::SynthesizeImage {
                prompt: prompt.to_string(),
            },
            _ => GenerationMode::Respond,
        };
        let mut request = GenerationRequest::new(session_id, model, history)
            .with_generation(generation)
            .with_mode(mode);
        if let Some(attachment) = attachment {
            request = request.with_attachment(attachment);
        }

        let mut session = GenerationSession::new(session_id);
        let submitted = session
            .start(&request, Instant::now())
            .context(SessionSnafu {
                stage: "start-session",
            })?;
        self.dispatch(submitted);

        match self
            .engine
            .start_generation(request, session.interrupt_flag())
        {
            Ok(handle) => {
                tracing::info!(
                    session_id = %session_id,
                    engine = self.engine.name(),
                    task = %task,
                    "generation started"
                );
                let worker = tokio::spawn(handle.worker);
                self.active = Some(ActiveSession {
                    session,
                    stream: handle.stream,
                    worker,
                });
                Ok(SessionHandle { session_id })
            }
            Err(error) => {
                tracing::warn!(session_id = %session_id, error = %error, "engine refused request");
                if let Some(failed) = session.fail(error.to_string()) {
                    self.dispatch(failed);
                }
                self.last_session = Some(session);
                Err(error).context(EngineSnafu {
                    stage: "start-generation",
                })
            }
        }
    }

    fn ensure_idle(&self, stage: &'static str) -> ControllerResult<()> {
        if let Some(active) = &self.active {
            tracing::warn!(active = %active.session.id(), stage, "request rejected while busy");
            return SessionBusySnafu {
                stage,
                active: active.session.id(),
            }
            .fail();
        }
        Ok(())
    }

    fn dispatch(&mut self, event: ChatEvent) {
        reducer::apply(&mut self.log, &event);
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    fn retire_if_terminal(&mut self) {
        let finished = self
            .active
            .as_ref()
            .is_some_and(|active| active.session.state().is_terminal());
        if !finished {
            return;
        }

        if let Some(ActiveSession {
            session,
            stream,
            worker,
        }) = self.active.take()
        {
            // Dropping the stream raises the interrupt for a worker still running.
            drop(stream);
            if !worker.is_finished() {
                self.draining.push(worker);
            }
            tracing::debug!(session_id = %session.id(), state = ?session.state(), "session retired");
            self.last_session = Some(session);
        }
    }
}

fn is_interactive(task: ModelTask) -> bool {
    match task {
        ModelTask::TextGeneration | ModelTask::MultimodalLlm | ModelTask::SpeechToText => true,
        ModelTask::Reasoning | ModelTask::TextToSpeech => false,
    }
}

fn validate_attachment(task: ModelTask, attachment: &Attachment) -> ControllerResult<()> {
    let accepted = match attachment {
        Attachment::Image(_) => task == ModelTask::MultimodalLlm,
        Attachment::Audio(_) => task == ModelTask::SpeechToText,
    };
    ensure!(
        accepted,
        UnsupportedAttachmentSnafu {
            stage: "validate-attachment",
            task,
            kind: attachment.kind(),
        }
    );
    Ok(())
}
