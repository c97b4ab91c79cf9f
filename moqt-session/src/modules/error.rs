use moqt_wire::constants::TerminationErrorCode;
use thiserror::Error;

/// A condition that poisons the whole session. Internal handlers return
/// this; the session façade turns it into a single transport close and a
/// termination callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct SessionError {
    pub code: TerminationErrorCode,
    pub reason: String,
}

impl SessionError {
    pub fn protocol_violation(reason: impl Into<String>) -> Self {
        SessionError {
            code: TerminationErrorCode::ProtocolViolation,
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        SessionError {
            code: TerminationErrorCode::InternalError,
            reason: reason.into(),
        }
    }

    pub fn too_many_subscribes(reason: impl Into<String>) -> Self {
        SessionError {
            code: TerminationErrorCode::TooManySubscribes,
            reason: reason.into(),
        }
    }
}

pub(crate) type SessionResult<T = ()> = Result<T, SessionError>;
