use std::time::Duration;

use thiserror::Error;

use super::command::CommandError;
use super::registry::HandleToken;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// Token was never minted or has already been released.
    #[error("Invalid handle token: {0}")]
    InvalidToken(HandleToken),

    #[error("Native engine rejected command '{command}'")]
    DispatchRejected { command: String },

    #[error("Native engine refused listener registration for stream '{stream}'")]
    RegistrationFailed { stream: String },

    /// The engine session was stopped or destroyed while the command was in
    /// flight. Not a failure: callers retry later or ignore it.
    #[error("Command '{command}' was canceled by the engine")]
    Canceled { command: String },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Out of memory: could not allocate {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("{0} used after dispose")]
    UseAfterDispose(&'static str),

    #[error("Blocking command wait called from inside an async runtime")]
    BlockingInAsyncContext,

    #[error("Command '{command}' did not complete within {elapsed:?}")]
    Timeout { command: String, elapsed: Duration },

    #[error("Malformed payload: {0}")]
    Payload(String),

    #[error("Native library error: {0}")]
    Library(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// True for the normal "engine went away mid-command" outcome.
    pub fn is_canceled(&self) -> bool {
        matches!(self, BridgeError::Canceled { .. })
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Payload(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
