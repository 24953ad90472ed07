use snafu::Snafu;

use super::config::ModelTask;
use super::types::SessionId;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EngineError {
    #[snafu(display("generation request for {session_id} has no messages"))]
    EmptyHistory {
        stage: &'static str,
        session_id: SessionId,
    },
    #[snafu(display("engine has no pipeline for task '{task}'"))]
    PipelineUnavailable {
        stage: &'static str,
        task: ModelTask,
    },
    #[snafu(display("engine rejected {kind} attachment for task '{task}'"))]
    AttachmentRejected {
        stage: &'static str,
        task: ModelTask,
        kind: &'static str,
    },
}

pub type EngineResult<T> = Result<T, EngineError>;
