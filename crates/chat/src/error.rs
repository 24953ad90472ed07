use snafu::Snafu;

use sidechat_engine::{EngineError, ModelTask, SessionId};

use crate::session::SessionState;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("{session_id} cannot start from state {state:?}"))]
    AlreadyStarted {
        stage: &'static str,
        session_id: SessionId,
        state: SessionState,
    },
}

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ControllerError {
    #[snafu(display("{active} is still generating"))]
    SessionBusy {
        stage: &'static str,
        active: SessionId,
    },
    #[snafu(display("nothing to send: prompt is empty"))]
    EmptyPrompt { stage: &'static str },
    #[snafu(display("task '{task}' is not supported"))]
    UnsupportedTask {
        stage: &'static str,
        task: ModelTask,
    },
    #[snafu(display("{kind} attachments are not accepted by task '{task}'"))]
    UnsupportedAttachment {
        stage: &'static str,
        task: ModelTask,
        kind: &'static str,
    },
    #[snafu(display("session lifecycle error on `{stage}`: {source}"))]
    Session {
        stage: &'static str,
        source: SessionError,
    },
    #[snafu(display("engine refused request on `{stage}`: {source}"))]
    Engine {
        stage: &'static str,
        source: EngineError,
    },
}

impl ControllerError {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::SessionBusy { .. })
    }
}

pub type ControllerResult<T> = Result<T, ControllerError>;
