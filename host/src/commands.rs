/// Request handlers for one host invocation.
///
/// The browser spawns a fresh host per message. Exactly one request is
/// read, routed to download, get-progress or kill, and answered with one
/// response. Nothing is remembered between invocations: get-progress and
/// kill work purely from the pid and filename the caller sends back.
use std::process::ExitCode;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

use streamgrab_shared::errors::{HostError, HostResult, RequestError, SupervisorError};
use streamgrab_shared::framing::{read_message, write_message};
use streamgrab_shared::ipc_protocol::{Request, Response, FILE_NOT_FOUND};
use streamgrab_shared::target::{expected_path, reserve_target, resolve_filename};

use crate::config::HostConfig;
use crate::process::{terminate_pid, KillOutcome};
use crate::workers::ffmpeg_supervisor::{FfmpegSupervisor, SupervisedDownload};

/// Process exit status for an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostExit {
    /// Every handled outcome, including errors reported in a response.
    Success,
    /// Download request without a URL.
    Failure,
}

impl From<HostExit> for ExitCode {
    fn from(exit: HostExit) -> Self {
        match exit {
            HostExit::Success => ExitCode::SUCCESS,
            HostExit::Failure => ExitCode::FAILURE,
        }
    }
}

/// Everything a handler needs, built once per invocation.
pub struct HostState {
    pub config: HostConfig,
    pub supervisor: FfmpegSupervisor,
}

impl HostState {
    pub fn new(config: HostConfig) -> Self {
        let supervisor = FfmpegSupervisor::new(config.ffmpeg_bin.clone(), config.poll_interval);
        Self { config, supervisor }
    }
}

/// Read one request from `reader`, handle it, and answer on `writer`.
///
/// For downloads this returns only after FFmpeg has exited and the final
/// summary has been logged.
pub async fn handle_invocation<R, W>(state: &HostState, reader: &mut R, writer: &mut W) -> HostExit
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let wire = match read_message(reader).await {
        Ok(Some(wire)) => wire,
        Ok(None) => {
            info!("Input closed before any request");
            return HostExit::Success;
        }
        Err(e) => {
            // Reported in the protocol, so the exit status stays 0
            let message = if e.is_framing() {
                error!("Protocol error: {}", e);
                format!("Malformed message: {}", e)
            } else {
                error!("Undecodable request: {}", e);
                format!("Invalid message: {}", e)
            };
            send(writer, &Response::error(message)).await;
            return HostExit::Success;
        }
    };

    let kind = wire.kind();
    if let Some(command) = wire.unrecognised_command() {
        warn!("Unknown command {:?}, treating as download", command);
    }
    info!("Received {} request", kind);

    let request = match Request::try_from(wire) {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejected {} request: {}", kind, e);
            let exit = if e == RequestError::MissingUrl {
                HostExit::Failure
            } else {
                HostExit::Success
            };
            send(writer, &Response::from(e)).await;
            return exit;
        }
    };

    match request {
        Request::Download { url, filename } => {
            cmd_download(state, &url, filename.as_deref(), writer).await
        }
        Request::GetProgress { pid, filename } => {
            let response = cmd_get_progress(state, pid, &filename).await;
            send(writer, &response).await;
            HostExit::Success
        }
        Request::Kill { pid } => {
            let response = cmd_kill(pid);
            send(writer, &response).await;
            HostExit::Success
        }
    }
}

/// Best-effort write. A closed transport is logged, never fatal.
async fn send<W>(writer: &mut W, response: &Response)
where
    W: AsyncWrite + Unpin,
{
    if let Err(e) = write_message(writer, response).await {
        warn!("Failed to send {:?}: {}", response, e);
    }
}

/// Download: reply with pid and path as soon as FFmpeg runs, then stay
/// alive until it exits.
async fn cmd_download<W>(state: &HostState, url: &str, filename: Option<&str>, writer: &mut W) -> HostExit
where
    W: AsyncWrite + Unpin,
{
    let download = match start_download(state, url, filename).await {
        Ok(download) => download,
        Err(e) => {
            error!("{}", e);
            send(writer, &Response::error(e.protocol_message())).await;
            return HostExit::Success;
        }
    };

    let response = Response::Success {
        pid: download.pid,
        path: download.target.path_string(),
        filename: download.target.filename.clone(),
    };
    send(writer, &response).await;

    // The caller already has the pid; the host lives until monitoring ends.
    match tokio::spawn(download.monitor()).await {
        Ok(report) => info!(
            "PID {}: monitoring finished: {:?} (final bytes: {:?}, estimated total: {:?}, samples: {})",
            report.pid,
            report.outcome,
            report.summary.map(|s| s.final_bytes),
            report.estimated_total_bytes,
            report.samples
        ),
        Err(e) => error!("Monitoring task failed: {}", e),
    }
    HostExit::Success
}

async fn start_download(
    state: &HostState,
    url: &str,
    filename: Option<&str>,
) -> HostResult<SupervisedDownload> {
    let dir = &state.config.download_dir;
    tokio::fs::create_dir_all(dir).await?;

    let name = resolve_filename(filename, url);
    let target = reserve_target(dir, &name).map_err(|source| SupervisorError::Reserve {
        path: dir.join(&name).to_string_lossy().to_string(),
        source,
    })?;

    info!("URL: {}", url);
    info!("Output: {}", target.path.display());

    Ok(state.supervisor.start(url, target)?)
}

/// Get-progress: report the file's current size. No estimate survives
/// across invocations, so `estimated_total` is always 0.
async fn cmd_get_progress(state: &HostState, pid: u32, filename: &str) -> Response {
    let Some(path) = expected_path(&state.config.download_dir, filename) else {
        return Response::error(FILE_NOT_FOUND);
    };

    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {
            debug!("Progress for PID {}: {} bytes in {}", pid, meta.len(), path.display());
            Response::Progress {
                pid,
                downloaded_bytes: meta.len(),
                estimated_total_bytes: 0,
            }
        }
        Ok(_) => Response::error(FILE_NOT_FOUND),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Response::error(FILE_NOT_FOUND),
        Err(e) => {
            warn!("Could not stat {}: {}", path.display(), e);
            Response::error(HostError::from(e).protocol_message())
        }
    }
}

/// Kill: a process that is already gone counts as killed.
fn cmd_kill(pid: u32) -> Response {
    info!("Kill request for PID: {}", pid);
    match terminate_pid(pid) {
        Ok(KillOutcome::Signalled) => {
            info!("Process {} terminated", pid);
            Response::Killed { pid }
        }
        Ok(KillOutcome::AlreadyGone) => {
            warn!("Process {} not found (already finished)", pid);
            Response::Killed { pid }
        }
        Err(e) => {
            error!("Failed to kill process {}: {}", pid, e);
            Response::error(HostError::from(e).protocol_message())
        }
    }
}
