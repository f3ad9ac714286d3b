/// Native messaging protocol types for extension <-> host communication.
///
/// Each message is one JSON object carried in a length-prefixed frame
/// (see [`crate::framing`]). Requests are decoded loosely off the wire and
/// converted once into the [`Request`] sum type.
use serde::{Deserialize, Serialize};

use crate::errors::RequestError;

// ====== REQUEST (extension -> host) ======

/// Command string for progress queries.
pub const GET_PROGRESS_COMMAND: &str = "get-progress";
/// Command string for cancellation.
pub const KILL_COMMAND: &str = "kill";
/// Explicit download command. Absence of `command` means the same thing.
pub const DOWNLOAD_COMMAND: &str = "download";

/// Error text for get-progress when the download file is absent.
pub const FILE_NOT_FOUND: &str = "File not found";

/// Message exactly as it arrives on stdin, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i64>,
}

/// A validated request. One per host invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Start FFmpeg on `url`, writing to `filename` (or a derived name).
    Download { url: String, filename: Option<String> },
    /// Report the on-disk size of a download started by another invocation.
    GetProgress { pid: u32, filename: String },
    /// Terminate a previously reported pid.
    Kill { pid: u32 },
}

/// The command a wire message asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Download,
    GetProgress,
    Kill,
}

impl CommandKind {
    /// Map the optional `command` field. Missing or unknown commands fall
    /// back to a download so plain `{"url": ...}` messages keep working.
    pub fn from_wire(command: Option<&str>) -> Self {
        match command {
            None | Some(DOWNLOAD_COMMAND) => CommandKind::Download,
            Some(GET_PROGRESS_COMMAND) => CommandKind::GetProgress,
            Some(KILL_COMMAND) => CommandKind::Kill,
            Some(_) => CommandKind::Download,
        }
    }

    fn is_known(command: &str) -> bool {
        matches!(command, DOWNLOAD_COMMAND | GET_PROGRESS_COMMAND | KILL_COMMAND)
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandKind::Download => write!(f, "{}", DOWNLOAD_COMMAND),
            CommandKind::GetProgress => write!(f, "{}", GET_PROGRESS_COMMAND),
            CommandKind::Kill => write!(f, "{}", KILL_COMMAND),
        }
    }
}

impl WireRequest {
    /// Parse from a raw JSON payload.
    pub fn from_json_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn kind(&self) -> CommandKind {
        CommandKind::from_wire(self.command.as_deref())
    }

    /// The `command` string when it names no known command.
    pub fn unrecognised_command(&self) -> Option<&str> {
        self.command
            .as_deref()
            .filter(|command| !CommandKind::is_known(command))
    }
}

impl TryFrom<WireRequest> for Request {
    type Error = RequestError;

    fn try_from(wire: WireRequest) -> Result<Self, Self::Error> {
        match wire.kind() {
            CommandKind::Download => {
                let url = wire
                    .url
                    .filter(|u| !u.trim().is_empty())
                    .ok_or(RequestError::MissingUrl)?;
                let filename = wire.filename.filter(|f| !f.trim().is_empty());
                Ok(Request::Download { url, filename })
            }
            CommandKind::GetProgress => {
                let pid = validate_pid(wire.pid)?;
                let filename = wire
                    .filename
                    .filter(|f| !f.trim().is_empty())
                    .ok_or(RequestError::MissingFilename)?;
                Ok(Request::GetProgress { pid, filename })
            }
            CommandKind::Kill => Ok(Request::Kill {
                pid: validate_pid(wire.pid)?,
            }),
        }
    }
}

/// Pids must be positive and fit the platform's unsigned id. Zero and
/// negative values address process groups when signalled.
fn validate_pid(pid: Option<i64>) -> Result<u32, RequestError> {
    let raw = pid.ok_or(RequestError::MissingPid)?;
    match u32::try_from(raw) {
        Ok(pid) if pid > 0 => Ok(pid),
        _ => Err(RequestError::InvalidPid(raw)),
    }
}

// ====== RESPONSE (host -> extension) ======

/// Response written back to the extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// FFmpeg was started; the caller keeps `pid` and `filename` for
    /// later get-progress and kill requests.
    Success {
        pid: u32,
        path: String,
        filename: String,
    },
    Progress {
        pid: u32,
        #[serde(rename = "downloaded")]
        downloaded_bytes: u64,
        #[serde(rename = "estimated_total")]
        estimated_total_bytes: u64,
    },
    Killed { pid: u32 },
    Error { message: String },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }

    /// Serialize to the JSON payload carried inside a frame.
    pub fn to_json_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Extract error message if this is an error response.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Response::Error { message } => Some(message),
            _ => None,
        }
    }
}

impl From<RequestError> for Response {
    fn from(err: RequestError) -> Self {
        Response::error(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> Result<Request, RequestError> {
        Request::try_from(WireRequest::from_json_slice(json.as_bytes()).unwrap())
    }

    #[test]
    fn test_implicit_download() {
        let req = decode(r#"{"url":"https://example.com/a.mp4"}"#).unwrap();
        assert_eq!(
            req,
            Request::Download {
                url: "https://example.com/a.mp4".into(),
                filename: None,
            }
        );
    }

    #[test]
    fn test_download_keeps_filename() {
        let req = decode(r#"{"command":"download","url":"https://x/y","filename":"clip"}"#).unwrap();
        assert_eq!(
            req,
            Request::Download {
                url: "https://x/y".into(),
                filename: Some("clip".into()),
            }
        );
    }

    #[test]
    fn test_unknown_command_falls_back_to_download() {
        let req = decode(r#"{"command":"fetch","url":"https://x/y.ts"}"#).unwrap();
        assert!(matches!(req, Request::Download { .. }));
    }

    #[test]
    fn test_unrecognised_command_detection() {
        let wire = |json: &str| WireRequest::from_json_slice(json.as_bytes()).unwrap();
        assert_eq!(wire(r#"{"command":"fetch"}"#).unrecognised_command(), Some("fetch"));
        assert_eq!(wire(r#"{"command":"kill"}"#).unrecognised_command(), None);
        assert_eq!(wire(r#"{"url":"https://x/y"}"#).unrecognised_command(), None);
    }

    #[test]
    fn test_missing_or_blank_url_rejected() {
        assert_eq!(decode(r#"{}"#), Err(RequestError::MissingUrl));
        assert_eq!(decode(r#"{"url":"  "}"#), Err(RequestError::MissingUrl));
    }

    #[test]
    fn test_get_progress_request() {
        let req = decode(r#"{"command":"get-progress","pid":4242,"filename":"a.mp4"}"#).unwrap();
        assert_eq!(
            req,
            Request::GetProgress {
                pid: 4242,
                filename: "a.mp4".into(),
            }
        );
    }

    #[test]
    fn test_get_progress_without_filename_is_not_found() {
        let err = decode(r#"{"command":"get-progress","pid":7}"#).unwrap_err();
        assert_eq!(err, RequestError::MissingFilename);
        assert_eq!(Response::from(err).error_message(), Some("File not found"));
    }

    #[test]
    fn test_kill_pid_validation() {
        assert_eq!(decode(r#"{"command":"kill","pid":99}"#), Ok(Request::Kill { pid: 99 }));
        assert_eq!(decode(r#"{"command":"kill"}"#), Err(RequestError::MissingPid));
        assert_eq!(decode(r#"{"command":"kill","pid":0}"#), Err(RequestError::InvalidPid(0)));
        assert_eq!(decode(r#"{"command":"kill","pid":-1}"#), Err(RequestError::InvalidPid(-1)));
        assert_eq!(
            decode(r#"{"command":"kill","pid":8589934592}"#),
            Err(RequestError::InvalidPid(8_589_934_592))
        );
    }

    #[test]
    fn test_response_wire_shapes() {
        let success = Response::Success {
            pid: 12,
            path: "/home/u/Downloads/a.mp4".into(),
            filename: "a.mp4".into(),
        };
        let value: serde_json::Value = serde_json::from_slice(&success.to_json_vec().unwrap()).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["pid"], 12);
        assert_eq!(value["filename"], "a.mp4");

        let progress = Response::Progress {
            pid: 12,
            downloaded_bytes: 2048,
            estimated_total_bytes: 0,
        };
        let value: serde_json::Value = serde_json::from_slice(&progress.to_json_vec().unwrap()).unwrap();
        assert_eq!(value["status"], "progress");
        assert_eq!(value["downloaded"], 2048);
        assert_eq!(value["estimated_total"], 0);

        let killed = serde_json::to_value(Response::Killed { pid: 3 }).unwrap();
        assert_eq!(killed, serde_json::json!({"status": "killed", "pid": 3}));

        let error = serde_json::to_value(Response::error("File not found")).unwrap();
        assert_eq!(error, serde_json::json!({"status": "error", "message": "File not found"}));
    }
}
