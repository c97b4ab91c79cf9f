use thiserror::Error;

/// Error produced by the incremental parsers.
///
/// `NeedMoreData` means the input ended in the middle of a field and the
/// caller should retry once more bytes arrive; nothing has been consumed.
/// `ProtocolViolation` means the bytes can never parse and the session
/// must be terminated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("need more data")]
    NeedMoreData,
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

impl ParseError {
    pub fn violation(reason: impl Into<String>) -> Self {
        ParseError::ProtocolViolation(reason.into())
    }
}
