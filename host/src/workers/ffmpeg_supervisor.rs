/// FFmpeg subprocess supervisor.
///
/// Spawns FFmpeg detached from the host's process group, with its output
/// piped into the host (never onto the host's stdout, which carries
/// protocol frames). The returned [`SupervisedDownload`] is then monitored
/// until FFmpeg exits, logging progress scraped from its output and polled
/// from the output file.
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use streamgrab_shared::errors::SupervisorError;
use streamgrab_shared::progress::{LogHints, SizeTracker, TransferSummary};
use streamgrab_shared::target::DownloadTarget;

use super::tool_output::spawn_line_reader;

/// Name used in error messages and logs.
pub const TOOL_NAME: &str = "FFmpeg";

/// How long to wait for buffered output after FFmpeg exits.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Arguments for a stream-copy download of `url` into `output`.
pub fn ffmpeg_args(url: &str, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-loglevel", "info", "-y", "-i", url, "-c", "copy", "-movflags", "+faststart",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(output.as_os_str().to_os_string());
    args
}

/// Launches FFmpeg downloads.
#[derive(Debug, Clone)]
pub struct FfmpegSupervisor {
    ffmpeg_bin: PathBuf,
    poll_interval: Duration,
}

impl FfmpegSupervisor {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            poll_interval,
        }
    }

    /// Start downloading `url` into the already reserved `target`.
    pub fn start(&self, url: &str, target: DownloadTarget) -> Result<SupervisedDownload, SupervisorError> {
        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(ffmpeg_args(url, &target.path));
        self.launch(cmd, target)
    }

    /// Spawn `cmd` as the download process for `target`.
    pub(crate) fn launch(
        &self,
        mut cmd: Command,
        target: DownloadTarget,
    ) -> Result<SupervisedDownload, SupervisorError> {
        let program = cmd.as_std().get_program().to_string_lossy().to_string();

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        detach(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                discard_placeholder(&target.path);
                let detail = format!("{} ({})", e, program);
                return Err(if e.kind() == std::io::ErrorKind::NotFound {
                    SupervisorError::ToolNotFound {
                        tool: TOOL_NAME.to_string(),
                        detail,
                    }
                } else {
                    SupervisorError::SpawnFailed {
                        tool: TOOL_NAME.to_string(),
                        detail,
                    }
                });
            }
        };

        let Some(pid) = child.id() else {
            discard_placeholder(&target.path);
            return Err(SupervisorError::NoPid(TOOL_NAME.to_string()));
        };
        info!("{} started with PID: {}", TOOL_NAME, pid);

        // Merge stdout and stderr into one line feed
        let (tx, lines) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader("stdout", stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader("stderr", stderr, tx));
        }

        Ok(SupervisedDownload {
            pid,
            target,
            child,
            lines,
            readers,
            started: Instant::now(),
            poll_interval: self.poll_interval,
        })
    }
}

#[cfg(unix)]
fn detach(cmd: &mut Command) {
    // Own process group: signals aimed at the host's group skip FFmpeg.
    cmd.process_group(0);
}

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
}

#[cfg(not(any(unix, windows)))]
fn detach(_cmd: &mut Command) {}

fn discard_placeholder(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        debug!("Could not remove placeholder {:?}: {}", path, e);
    }
}

/// How monitoring ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// FFmpeg exited with status 0.
    Completed,
    /// FFmpeg exited with a failure status (`None` when killed by a signal).
    Failed { code: Option<i32> },
    /// Waiting on the process failed; it can no longer be observed.
    ProcessVanished(String),
}

/// Result of one monitoring run.
#[derive(Debug, Clone)]
pub struct MonitorReport {
    pub pid: u32,
    pub outcome: MonitorOutcome,
    /// `None` when the output file was gone at the end.
    pub summary: Option<TransferSummary>,
    pub estimated_total_bytes: Option<u64>,
    /// Progress samples taken from the output file while FFmpeg ran.
    pub samples: u32,
}

/// A spawned FFmpeg process and its output feed, owned by one invocation.
pub struct SupervisedDownload {
    pub pid: u32,
    pub target: DownloadTarget,
    child: Child,
    lines: mpsc::UnboundedReceiver<String>,
    readers: Vec<JoinHandle<()>>,
    started: Instant,
    poll_interval: Duration,
}

impl SupervisedDownload {
    /// Watch the download until FFmpeg exits.
    ///
    /// Output lines update the size estimate as they arrive; the output
    /// file is polled every `poll_interval`. There is no timeout.
    pub async fn monitor(self) -> MonitorReport {
        let SupervisedDownload {
            pid,
            target,
            mut child,
            mut lines,
            readers,
            started,
            poll_interval,
        } = self;

        let mut hints = LogHints::new();
        let mut tracker = SizeTracker::new(poll_interval);
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + poll_interval,
            poll_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut lines_open = true;
        let mut samples = 0u32;

        let outcome = loop {
            tokio::select! {
                status = child.wait() => {
                    break match status {
                        Ok(status) if status.success() => MonitorOutcome::Completed,
                        Ok(status) => MonitorOutcome::Failed { code: status.code() },
                        Err(e) => MonitorOutcome::ProcessVanished(e.to_string()),
                    };
                }
                line = lines.recv(), if lines_open => match line {
                    Some(line) => {
                        debug!(target: "ffmpeg", "{}", line);
                        hints.observe(&line);
                    }
                    None => lines_open = false,
                },
                _ = ticker.tick() => {
                    if log_progress(pid, &target.path, started, &mut tracker, &hints).await {
                        samples += 1;
                    }
                }
            }
        };

        // Pick up whatever FFmpeg printed right before exiting
        let drain = async {
            while let Some(line) = lines.recv().await {
                debug!(target: "ffmpeg", "{}", line);
                hints.observe(&line);
            }
        };
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            debug!("PID {}: output still open after exit, stopped draining", pid);
        }
        for reader in readers {
            reader.abort();
        }

        let summary = final_summary(pid, &target.path, started, &outcome).await;
        if let Some(estimate) = hints.estimated_total_bytes() {
            debug!("PID {}: estimated total was {} bytes", pid, estimate);
        }

        MonitorReport {
            pid,
            outcome,
            summary,
            estimated_total_bytes: hints.estimated_total_bytes(),
            samples,
        }
    }
}

/// Poll the output file once and log a progress line. Failures skip the
/// sample and return `false`; they never end monitoring.
async fn log_progress(
    pid: u32,
    path: &Path,
    started: Instant,
    tracker: &mut SizeTracker,
    hints: &LogHints,
) -> bool {
    let size = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("PID {}: output file not created yet", pid);
            return false;
        }
        Err(e) => {
            warn!("Progress check failed: {}", e);
            return false;
        }
    };

    let sample = tracker.sample(size, started.elapsed(), hints);
    let mut line = format!(
        "PID {}: {:.2} MB downloaded | Speed: {:.2} Mbps | Elapsed: {}s",
        pid,
        sample.downloaded_mb(),
        sample.rate_mbps(),
        sample.elapsed_seconds as u64
    );
    if let Some(percent) = sample.percent() {
        line.push_str(&format!(
            " | Estimated total: {} bytes ({:.1}%)",
            sample.estimated_total_bytes, percent
        ));
    }
    if let (Some(time), Some(speed)) = (hints.media_time_seconds(), hints.speed()) {
        line.push_str(&format!(" | Media time: {:.1}s at {:.2}x", time, speed));
    }
    info!("{}", line);
    true
}

/// Log the closing line for a download and return its final numbers.
async fn final_summary(
    pid: u32,
    path: &Path,
    started: Instant,
    outcome: &MonitorOutcome,
) -> Option<TransferSummary> {
    let size = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            error!("PID {}: Download failed - file not found", pid);
            return None;
        }
        Err(e) => {
            error!("PID {}: Final check failed: {}", pid, e);
            return None;
        }
    };

    let summary = TransferSummary::new(size, started.elapsed());
    let totals = format!(
        "{:.2} MB | Total time: {}s | Avg speed: {:.2} Mbps",
        summary.final_mb(),
        summary.elapsed_seconds as u64,
        summary.average_mbps
    );
    match outcome {
        MonitorOutcome::Completed => info!("PID {}: complete: {}", pid, totals),
        MonitorOutcome::Failed { code } => {
            warn!("PID {}: {} exited with code {:?}: {}", pid, TOOL_NAME, code, totals)
        }
        MonitorOutcome::ProcessVanished(reason) => {
            warn!("PID {}: lost track of {} ({}): {}", pid, TOOL_NAME, reason, totals)
        }
    }

    // An untouched placeholder from a failed run is just clutter
    if size == 0 && *outcome != MonitorOutcome::Completed {
        discard_placeholder(path);
    }

    Some(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamgrab_shared::target::reserve_target;

    #[test]
    fn test_ffmpeg_args_template() {
        let args = ffmpeg_args("https://example.com/a.m3u8", Path::new("/tmp/a.mp4"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(
            args,
            vec![
                "-loglevel", "info", "-y", "-i", "https://example.com/a.m3u8", "-c", "copy",
                "-movflags", "+faststart", "/tmp/a.mp4",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_tool_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let target = reserve_target(dir.path(), "a.mp4").unwrap();
        let supervisor = FfmpegSupervisor::new(
            dir.path().join("no-such-ffmpeg"),
            Duration::from_millis(50),
        );

        let err = supervisor
            .start("https://example.com/a.mp4", target.clone())
            .err()
            .expect("spawn should fail");
        assert!(matches!(err, SupervisorError::ToolNotFound { .. }));
        assert!(err.to_string().starts_with("FFmpeg not found: "));
        assert!(!target.path.exists());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_monitor_reports_completion_and_estimate() {
        let dir = tempfile::tempdir().unwrap();
        let target = reserve_target(dir.path(), "clip.mp4").unwrap();
        let supervisor = FfmpegSupervisor::new("ffmpeg", Duration::from_millis(50));

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(
                "echo '  Duration: 00:01:40.00, start: 0.000000, bitrate: 128 kb/s' >&2; \
                 printf abcdef > \"$1\"; sleep 0.2",
            )
            .arg("sh")
            .arg(&target.path);

        let download = supervisor.launch(cmd, target.clone()).unwrap();
        assert!(download.pid > 0);

        let report = download.monitor().await;
        assert_eq!(report.outcome, MonitorOutcome::Completed);
        assert_eq!(report.estimated_total_bytes, Some(1_600_000));
        assert_eq!(report.summary.unwrap().final_bytes, 6);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_monitor_polls_growing_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = reserve_target(dir.path(), "grow.mp4").unwrap();
        let supervisor = FfmpegSupervisor::new("ffmpeg", Duration::from_millis(50));

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("for i in 1 2 3; do printf xxxx >> \"$1\"; sleep 0.1; done")
            .arg("sh")
            .arg(&target.path);

        let report = supervisor.launch(cmd, target).unwrap().monitor().await;
        assert_eq!(report.outcome, MonitorOutcome::Completed);
        assert!(report.samples >= 1, "no samples taken");
        assert_eq!(report.summary.unwrap().final_bytes, 12);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_monitor_reports_failure_and_cleans_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let target = reserve_target(dir.path(), "broken.mp4").unwrap();
        let supervisor = FfmpegSupervisor::new("ffmpeg", Duration::from_millis(50));

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo 'Server returned 404 Not Found' >&2; exit 3");

        let report = supervisor.launch(cmd, target.clone()).unwrap().monitor().await;
        assert_eq!(report.outcome, MonitorOutcome::Failed { code: Some(3) });
        assert_eq!(report.estimated_total_bytes, None);
        assert!(!target.path.exists());
    }
}
