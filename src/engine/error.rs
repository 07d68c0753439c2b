use std::process::ExitStatus;

/// Errors raised while talking to the container engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The engine binary cannot be resolved. Terminal until the environment changes.
    #[error("container engine `{binary}` is not available")]
    EngineUnavailable { binary: String },
    #[error("failed to list containers: {0}")]
    ListFailed(#[source] CommandError),
    #[error("container event stream failed: {0}")]
    EventStreamFailed(#[source] CommandError),
}

impl Error {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::EngineUnavailable { .. })
    }
}

/// Failure of a single engine invocation.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    Exit {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("failed to read output of `{command}`: {source}")]
    Read {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed engine output: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("unexpected engine output: expected a JSON array or JSON objects, found `{0}`")]
    UnexpectedShape(String),
    #[error("`{command}` closed its output stream")]
    StreamClosed { command: String },
}

pub type Result<T> = std::result::Result<T, Error>;
