use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use snafu::ensure;
use tokio::sync::mpsc;

use super::config::ModelTask;
use super::engine::{
    ContentChannel, EngineEvent, EngineFailure, EngineStreamHandle, EngineWorker, FinalOutput,
    GenerationRequest, InferenceEngine, StopReason, make_event_stream,
};
use super::error::{
    AttachmentRejectedSnafu, EmptyHistorySnafu, EngineResult, PipelineUnavailableSnafu,
};
use super::interrupt::InterruptFlag;
use super::stopping::InterruptibleEosCriteria;
use super::streamer::ImageProgressStreamer;
use super::types::{Attachment, RasterImage};

/// One step replayed by [`ScriptedEngine`].
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    /// Emits initiate, `chunks` progress updates and done for one weight file.
    LoadFile {
        file: String,
        total_bytes: u64,
        chunks: u32,
    },
    Token {
        id: u32,
        text: String,
        channel: ContentChannel,
    },
    /// Prompt batch plus `total` image tokens, reported as progress.
    ImageTokens { total: u32 },
    Image(RasterImage),
    Pause(Duration),
    Fail(EngineFailure),
}

impl ScriptStep {
    pub fn load(file: impl Into<String>, total_bytes: u64, chunks: u32) -> Self {
        Self::LoadFile {
            file: file.into(),
            total_bytes,
            chunks,
        }
    }

    pub fn token(text: impl Into<String>) -> Self {
        Self::Token {
            id: 1,
            text: text.into(),
            channel: ContentChannel::Answer,
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::Token {
            id: 1,
            text: text.into(),
            channel: ContentChannel::Reasoning,
        }
    }

    pub fn token_id(id: u32, text: impl Into<String>) -> Self {
        Self::Token {
            id,
            text: text.into(),
            channel: ContentChannel::Answer,
        }
    }
}

/// Deterministic engine that replays a fixed script for every request.
///
/// Used as the inference collaborator in tests and in the QA runner.
pub struct ScriptedEngine {
    steps: Vec<ScriptStep>,
    eos_token_ids: Vec<u32>,
    tasks: Vec<ModelTask>,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            eos_token_ids: Vec::new(),
            tasks: vec![
                ModelTask::TextGeneration,
                ModelTask::MultimodalLlm,
                ModelTask::SpeechToText,
            ],
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_eos_token_ids(mut self, eos_token_ids: Vec<u32>) -> Self {
        self.eos_token_ids = eos_token_ids;
        self
    }

    pub fn with_tasks(mut self, tasks: Vec<ModelTask>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn run_script(
        steps: Vec<ScriptStep>,
        criteria: InterruptibleEosCriteria,
        max_new_tokens: u32,
        event_tx: mpsc::UnboundedSender<EngineEvent>,
    ) {
        let mut sequence = Vec::new();
        let mut text = String::new();

        let stop_reason = 'script: {
            for step in steps {
                match step {
                    ScriptStep::LoadFile {
                        file,
                        total_bytes,
                        chunks,
                    } => {
                        let chunks = chunks.max(1);
                        let mut events = vec![EngineEvent::FileInitiate {
                            file: file.clone(),
                            total_bytes,
                        }];
                        events.extend((1..=chunks).map(|chunk| EngineEvent::FileProgress {
                            file: file.clone(),
                            loaded_bytes: total_bytes * u64::from(chunk) / u64::from(chunks),
                        }));
                        events.push(EngineEvent::FileDone { file });

                        for event in events {
                            if event_tx.send(event).is_err() {
                                return;
                            }
                        }
                    }
                    ScriptStep::Token { id, text: piece, channel } => {
                        if criteria.flag().is_interrupted() {
                            break 'script StopReason::Interrupted;
                        }

                        sequence.push(id);
                        if criteria.should_stop(&sequence) {
                            break 'script if criteria.flag().is_interrupted() {
                                StopReason::Interrupted
                            } else {
                                StopReason::EndOfSequence
                            };
                        }

                        text.push_str(&piece);
                        let delta = EngineEvent::Delta {
                            chunk: piece,
                            channel,
                            at: Instant::now(),
                        };
                        if event_tx.send(delta).is_err() {
                            return;
                        }
                        if sequence.len() >= max_new_tokens as usize {
                            break 'script StopReason::MaxTokens;
                        }
                    }
                    ScriptStep::ImageTokens { total } => {
                        let mut streamer = ImageProgressStreamer::new(total);
                        for _ in 0..=total {
                            if criteria.flag().is_interrupted() {
                                break 'script StopReason::Interrupted;
                            }
                            if let Some(progress) = streamer.put(Instant::now())
                                && event_tx
                                    .send(EngineEvent::ImageProgress {
                                        progress: progress.progress,
                                    })
                                    .is_err()
                            {
                                return;
                            }
                        }
                    }
                    ScriptStep::Image(image) => {
                        if event_tx.send(EngineEvent::ImageReady(image)).is_err() {
                            return;
                        }
                    }
                    ScriptStep::Pause(duration) => tokio::time::sleep(duration).await,
                    ScriptStep::Fail(failure) => {
                        tracing::debug!(failure = %failure, "scripted engine failing");
                        let _ = event_tx.send(EngineEvent::Failed(failure));
                        return;
                    }
                }

                tokio::task::yield_now().await;
            }

            StopReason::EndOfSequence
        };

        tracing::debug!(?stop_reason, tokens = sequence.len(), "scripted engine finished");
        let _ = event_tx.send(EngineEvent::Finished {
            output: FinalOutput {
                text,
                token_count: u32::try_from(sequence.len()).unwrap_or(u32::MAX),
                stop_reason,
            },
            at: Instant::now(),
        });
    }
}

impl InferenceEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn supports(&self, task: ModelTask) -> bool {
        self.tasks.contains(&task)
    }

    fn start_generation(
        &self,
        request: GenerationRequest,
        interrupt: InterruptFlag,
    ) -> EngineResult<EngineStreamHandle> {
        ensure!(
            !request.history.is_empty(),
            EmptyHistorySnafu {
                stage: "scripted-start-generation",
                session_id: request.session_id,
            }
        );
        ensure!(
            self.supports(request.task()),
            PipelineUnavailableSnafu {
                stage: "scripted-start-generation",
                task: request.task(),
            }
        );
        if let Some(attachment @ Attachment::Audio(_)) = &request.attachment {
            ensure!(
                request.task() == ModelTask::SpeechToText,
                AttachmentRejectedSnafu {
                    stage: "scripted-start-generation",
                    task: request.task(),
                    kind: attachment.kind(),
                }
            );
        }

        let session_id = request.session_id;
        let max_new_tokens = request.generation.max_new_tokens;
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        let criteria = InterruptibleEosCriteria::new(interrupt.clone(), self.eos_token_ids.clone());
        let (event_tx, stream) = make_event_stream(session_id, interrupt);
        let worker: EngineWorker = Box::pin(Self::run_script(
            self.steps.clone(),
            criteria,
            max_new_tokens,
            event_tx,
        ));

        Ok(EngineStreamHandle { stream, worker })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::types::{PromptMessage, Role, SessionId};

    fn request(session: u64) -> GenerationRequest {
        GenerationRequest::new(
            SessionId::new(session),
            ModelConfig::default(),
            vec![PromptMessage::new(Role::User, "Hello")],
        )
    }

    async fn collect(handle: EngineStreamHandle) -> Vec<EngineEvent> {
        let EngineStreamHandle { mut stream, worker } = handle;
        worker.await;
        let mut events = Vec::new();
        while let Some(event) = stream.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn replays_load_then_tokens_then_finish() {
        let engine = ScriptedEngine::new(vec![
            ScriptStep::load("model.onnx", 100, 2),
            ScriptStep::token("Hi"),
            ScriptStep::token(" there"),
        ]);

        let events = collect(engine.start_generation(request(1), InterruptFlag::new()).unwrap()).await;

        assert!(matches!(events[0], EngineEvent::FileInitiate { total_bytes: 100, .. }));
        assert!(matches!(events[1], EngineEvent::FileProgress { loaded_bytes: 50, .. }));
        assert!(matches!(events[2], EngineEvent::FileProgress { loaded_bytes: 100, .. }));
        assert!(matches!(events[3], EngineEvent::FileDone { .. }));
        let Some(EngineEvent::Finished { output, .. }) = events.last() else {
            panic!("missing terminal event: {events:?}");
        };
        assert_eq!(output.text, "Hi there");
        assert_eq!(output.token_count, 2);
        assert_eq!(output.stop_reason, StopReason::EndOfSequence);
        assert_eq!(engine.requests().len(), 1);
    }

    #[tokio::test]
    async fn interrupted_flag_halts_before_next_token() {
        let engine = ScriptedEngine::new(vec![ScriptStep::token("a"), ScriptStep::token("b")]);
        let flag = InterruptFlag::new();
        flag.interrupt();

        let events = collect(engine.start_generation(request(2), flag).unwrap()).await;

        assert_eq!(events.len(), 1);
        let EngineEvent::Finished { output, .. } = &events[0] else {
            panic!("expected finish, got {events:?}");
        };
        assert_eq!(output.stop_reason, StopReason::Interrupted);
        assert!(output.text.is_empty());
    }

    #[tokio::test]
    async fn eos_token_ends_generation_without_emitting_text() {
        let engine = ScriptedEngine::new(vec![
            ScriptStep::token_id(5, "ok"),
            ScriptStep::token_id(2, "</s>"),
            ScriptStep::token_id(6, "never"),
        ])
        .with_eos_token_ids(vec![2]);

        let events = collect(engine.start_generation(request(3), InterruptFlag::new()).unwrap()).await;

        let deltas = events
            .iter()
            .filter(|event| matches!(event, EngineEvent::Delta { .. }))
            .count();
        assert_eq!(deltas, 1);
        let Some(EngineEvent::Finished { output, .. }) = events.last() else {
            panic!("missing terminal event");
        };
        assert_eq!(output.text, "ok");
        assert_eq!(output.stop_reason, StopReason::EndOfSequence);
    }

    #[tokio::test]
    async fn max_new_tokens_caps_the_script() {
        let engine = ScriptedEngine::new(vec![
            ScriptStep::token("1"),
            ScriptStep::token("2"),
            ScriptStep::token("3"),
        ]);
        let mut limited = request(4);
        limited.generation.max_new_tokens = 2;

        let events = collect(engine.start_generation(limited, InterruptFlag::new()).unwrap()).await;
        let Some(EngineEvent::Finished { output, .. }) = events.last() else {
            panic!("missing terminal event");
        };
        assert_eq!(output.text, "12");
        assert_eq!(output.stop_reason, StopReason::MaxTokens);
    }

    #[tokio::test]
    async fn failure_step_is_terminal() {
        let engine = ScriptedEngine::new(vec![
            ScriptStep::Fail(EngineFailure::load("shard missing")),
            ScriptStep::token("unreachable"),
        ]);

        let events = collect(engine.start_generation(request(5), InterruptFlag::new()).unwrap()).await;
        assert_eq!(
            events,
            vec![EngineEvent::Failed(EngineFailure::load("shard missing"))]
        );
    }

    #[test]
    fn rejects_empty_history_and_unsupported_tasks() {
        let engine = ScriptedEngine::new(Vec::new()).with_tasks(vec![ModelTask::TextGeneration]);

        let mut empty = request(6);
        empty.history.clear();
        assert!(engine.start_generation(empty, InterruptFlag::new()).is_err());

        let mut speech = request(7);
        speech.model = ModelConfig::default().with_task(ModelTask::SpeechToText);
        assert!(engine.start_generation(speech, InterruptFlag::new()).is_err());
    }
}
