/// Unified error types for the Streamgrab host.
use thiserror::Error;

/// Top-level error type for one host invocation.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Invalid request: {0}")]
    Request(#[from] RequestError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// Text for the `message` field of an error response. Errors the
    /// caller can act on are reported without the category prefix.
    pub fn protocol_message(&self) -> String {
        match self {
            HostError::Request(e) => e.to_string(),
            HostError::Supervisor(e) => e.to_string(),
            HostError::Process(e) => e.to_string(),
            other => other.to_string(),
        }
    }
}

/// Errors on the length-prefixed stdio transport.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Stream closed after {0} of 4 length-prefix bytes")]
    TruncatedPrefix(usize),

    #[error("Frame of {len} bytes exceeds the {limit} byte limit")]
    TooLarge { len: usize, limit: usize },

    #[error("Stream closed before the {0} byte payload was complete")]
    TruncatedPayload(usize),

    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the frame boundary itself is broken, as opposed to a
    /// well-framed payload that failed to decode.
    pub fn is_framing(&self) -> bool {
        !matches!(self, FrameError::InvalidJson(_))
    }
}

/// Validation failures while turning a decoded message into a request.
///
/// The `Display` text is what the caller sees in the `error` response.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("No URL provided")]
    MissingUrl,

    #[error("No PID provided")]
    MissingPid,

    #[error("Invalid PID: {0}")]
    InvalidPid(i64),

    #[error("File not found")]
    MissingFilename,
}

/// Errors raised while launching the external tool.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("{tool} not found: {detail}")]
    ToolNotFound { tool: String, detail: String },

    #[error("Failed to start {tool}: {detail}")]
    SpawnFailed { tool: String, detail: String },

    #[error("{0} exited before reporting a process id")]
    NoPid(String),

    #[error("Cannot reserve output path {path}: {source}")]
    Reserve {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors while signalling a process by id.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcessError {
    #[error("Failed to kill: {0}")]
    SignalFailed(String),
}

/// Result type alias for host operations.
pub type HostResult<T> = Result<T, HostError>;
