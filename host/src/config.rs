/// Host configuration read from the environment.
///
/// A `.env` file next to the working directory is honoured via dotenvy.
/// Every value has a default, so a browser-launched host with an empty
/// environment still works.
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

#[cfg(windows)]
const FFMPEG_EXE: &str = "ffmpeg.exe";
#[cfg(not(windows))]
const FFMPEG_EXE: &str = "ffmpeg";

#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Where downloads are written and get-progress looks for them.
    pub download_dir: PathBuf,
    /// Directory holding the append-only diagnostic log.
    pub log_dir: PathBuf,
    /// FFmpeg executable, either a path or a bare name resolved via PATH.
    pub ffmpeg_bin: PathBuf,
    /// How often the output file is polled while monitoring.
    pub poll_interval: Duration,
}

impl HostConfig {
    pub fn from_env() -> Self {
        let download_dir = absolute_dir(
            std::env::var_os("STREAMGRAB_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_download_dir),
        );
        let log_dir = std::env::var_os("STREAMGRAB_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_log_dir);
        let ffmpeg_bin = std::env::var_os("FFMPEG_BIN")
            .map(PathBuf::from)
            .unwrap_or_else(discover_ffmpeg);
        let poll_secs: u64 = std::env::var("STREAMGRAB_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);

        Self {
            download_dir,
            log_dir,
            ffmpeg_bin,
            poll_interval: Duration::from_secs(poll_secs),
        }
    }

    /// Log the effective configuration once logging is up.
    pub fn log_summary(&self) {
        info!(
            "Config: downloads={:?} logs={:?} ffmpeg={:?} poll={}s",
            self.download_dir,
            self.log_dir,
            self.ffmpeg_bin,
            self.poll_interval.as_secs()
        );
    }
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("./downloads"))
}

/// Callers get `path` back in success responses, so it must not depend
/// on the host's working directory.
fn absolute_dir(dir: PathBuf) -> PathBuf {
    match std::path::absolute(&dir) {
        Ok(abs) => abs,
        Err(e) => {
            warn!("Cannot make {:?} absolute: {}", dir, e);
            dir
        }
    }
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("streamgrab").join("logs"))
        .unwrap_or_else(|| PathBuf::from("./logs"))
}

/// Candidate directories that may contain the FFmpeg binary.
///
/// Browsers launch native hosts with a stripped-down PATH, so common
/// install locations are probed explicitly.
fn candidate_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    // Explicit env var first
    if let Some(ffmpeg_path) = std::env::var_os("FFMPEG_PATH") {
        dirs.push(PathBuf::from(ffmpeg_path));
    }

    if cfg!(target_os = "windows") {
        for path in &[r"C:\ffmpeg", r"C:\ffmpeg\bin", r"C:\Program Files\ffmpeg\bin"] {
            dirs.push(PathBuf::from(path));
        }

        if let Some(local_app) = std::env::var_os("LOCALAPPDATA") {
            // winget installs ffmpeg here
            let winget_dir = PathBuf::from(local_app)
                .join("Microsoft")
                .join("WinGet")
                .join("Packages");
            if let Ok(entries) = std::fs::read_dir(&winget_dir) {
                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if !name.starts_with("Gyan.FFmpeg") {
                        continue;
                    }
                    if let Ok(sub_entries) = std::fs::read_dir(entry.path()) {
                        for sub in sub_entries.flatten() {
                            dirs.push(sub.path().join("bin"));
                        }
                    }
                }
            }
        }
    } else {
        for path in &[
            "/usr/bin",
            "/usr/local/bin",
            "/snap/bin",
            "/opt/homebrew/bin",
            "/home/linuxbrew/.linuxbrew/bin",
        ] {
            dirs.push(PathBuf::from(path));
        }
    }

    dirs
}

/// Locate FFmpeg, falling back to the bare name so the OS searches PATH.
pub fn discover_ffmpeg() -> PathBuf {
    for dir in candidate_dirs() {
        let candidate = dir.join(FFMPEG_EXE);
        if candidate.is_file() {
            debug!("Found FFmpeg at {:?}", candidate);
            return candidate;
        }
    }
    PathBuf::from(FFMPEG_EXE)
}
