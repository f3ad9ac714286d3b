/// Progress estimation from FFmpeg's log text and the growing output file.
///
/// Two signals feed it: the file size polled off disk (what callers see as
/// `downloaded`) and hints scraped from FFmpeg's output, which give an
/// approximate final size once both duration and bitrate are known.
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

// ====== REGEX PATTERNS ======

/// `Duration: 00:01:40.00, start: ...` from the input header.
static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap()
});

/// `bitrate: 128 kb/s` in the header or `128 kb/s` on a stream line.
static BITRATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)\s*kb/s").unwrap()
});

/// `time=00:00:12.34` on status lines.
static MEDIA_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"time=\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap()
});

/// `speed=1.5x` on status lines.
static SPEED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"speed=\s*(\d+(?:\.\d+)?)x").unwrap()
});

fn hms_to_seconds(caps: &regex::Captures<'_>) -> Option<f64> {
    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Total media duration in seconds, if the line carries the header.
pub fn parse_duration(line: &str) -> Option<f64> {
    DURATION_RE.captures(line).and_then(|c| hms_to_seconds(&c))
}

pub fn parse_bitrate_kbps(line: &str) -> Option<f64> {
    BITRATE_RE
        .captures(line)
        .and_then(|c| c.get(1)?.as_str().parse().ok())
}

pub fn parse_media_time(line: &str) -> Option<f64> {
    MEDIA_TIME_RE.captures(line).and_then(|c| hms_to_seconds(&c))
}

pub fn parse_speed(line: &str) -> Option<f64> {
    SPEED_RE
        .captures(line)
        .and_then(|c| c.get(1)?.as_str().parse().ok())
}

/// Bytes implied by a constant bitrate over a duration.
pub fn estimate_total_bytes(bitrate_kbps: f64, duration_seconds: f64) -> u64 {
    let bytes = bitrate_kbps * 1000.0 / 8.0 * duration_seconds;
    if bytes.is_finite() && bytes > 0.0 {
        bytes.round() as u64
    } else {
        0
    }
}

/// Hints accumulated from FFmpeg's output during one download.
///
/// Duration and bitrate keep their first value. The size estimate is
/// computed once both are known and never changes afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogHints {
    duration_seconds: Option<f64>,
    bitrate_kbps: Option<f64>,
    estimated_total_bytes: Option<u64>,
    media_time_seconds: Option<f64>,
    speed: Option<f64>,
}

impl LogHints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line of tool output.
    pub fn observe(&mut self, line: &str) {
        if self.duration_seconds.is_none() {
            self.duration_seconds = parse_duration(line);
        }
        if self.bitrate_kbps.is_none() {
            self.bitrate_kbps = parse_bitrate_kbps(line);
        }
        if self.estimated_total_bytes.is_none() {
            if let (Some(duration), Some(bitrate)) = (self.duration_seconds, self.bitrate_kbps) {
                self.estimated_total_bytes = Some(estimate_total_bytes(bitrate, duration));
            }
        }
        if let Some(time) = parse_media_time(line) {
            self.media_time_seconds = Some(time);
        }
        if let Some(speed) = parse_speed(line) {
            self.speed = Some(speed);
        }
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.duration_seconds
    }

    pub fn bitrate_kbps(&self) -> Option<f64> {
        self.bitrate_kbps
    }

    pub fn estimated_total_bytes(&self) -> Option<u64> {
        self.estimated_total_bytes
    }

    /// Media time FFmpeg has written so far, from the latest status line.
    pub fn media_time_seconds(&self) -> Option<f64> {
        self.media_time_seconds
    }

    pub fn speed(&self) -> Option<f64> {
        self.speed
    }
}

/// One poll of the output file, combined with the current hints.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSample {
    pub duration_seconds: Option<f64>,
    pub bitrate_kbps: Option<f64>,
    /// Zero until the log has yielded both duration and bitrate.
    pub estimated_total_bytes: u64,
    pub downloaded_bytes: u64,
    pub elapsed_seconds: f64,
    pub rate_bytes_per_sec: f64,
}

impl ProgressSample {
    pub fn downloaded_mb(&self) -> f64 {
        bytes_to_mb(self.downloaded_bytes)
    }

    pub fn rate_mbps(&self) -> f64 {
        bytes_per_sec_to_mbps(self.rate_bytes_per_sec)
    }

    /// Share of the estimate already on disk, capped at 100.
    pub fn percent(&self) -> Option<f64> {
        if self.estimated_total_bytes == 0 {
            return None;
        }
        let pct = self.downloaded_bytes as f64 / self.estimated_total_bytes as f64 * 100.0;
        Some(pct.min(100.0))
    }
}

/// Turns successive file sizes into samples with a rolling rate.
#[derive(Debug, Clone)]
pub struct SizeTracker {
    interval: Duration,
    previous: Option<u64>,
}

impl SizeTracker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            previous: None,
        }
    }

    /// Record a size read `elapsed` after the download started.
    ///
    /// The rate is the growth over one interval once a previous sample
    /// exists, otherwise the average since the start.
    pub fn sample(&mut self, current: u64, elapsed: Duration, hints: &LogHints) -> ProgressSample {
        let elapsed_seconds = elapsed.as_secs_f64();
        let rate = match self.previous {
            Some(previous) => {
                let interval = self.interval.as_secs_f64();
                if interval > 0.0 {
                    current.saturating_sub(previous) as f64 / interval
                } else {
                    0.0
                }
            }
            None if elapsed_seconds > 0.0 => current as f64 / elapsed_seconds,
            None => 0.0,
        };
        self.previous = Some(current);

        ProgressSample {
            duration_seconds: hints.duration_seconds(),
            bitrate_kbps: hints.bitrate_kbps(),
            estimated_total_bytes: hints.estimated_total_bytes().unwrap_or(0),
            downloaded_bytes: current,
            elapsed_seconds,
            rate_bytes_per_sec: rate,
        }
    }
}

/// Final numbers logged when monitoring ends.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSummary {
    pub final_bytes: u64,
    pub elapsed_seconds: f64,
    pub average_mbps: f64,
}

impl TransferSummary {
    pub fn new(final_bytes: u64, elapsed: Duration) -> Self {
        let elapsed_seconds = elapsed.as_secs_f64();
        let average_mbps = if elapsed_seconds > 0.0 {
            bytes_per_sec_to_mbps(final_bytes as f64 / elapsed_seconds)
        } else {
            0.0
        };
        Self {
            final_bytes,
            elapsed_seconds,
            average_mbps,
        }
    }

    pub fn final_mb(&self) -> f64 {
        bytes_to_mb(self.final_bytes)
    }
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Megabits per second, using binary megabits like the log has always shown.
pub fn bytes_per_sec_to_mbps(bytes_per_sec: f64) -> f64 {
    bytes_per_sec * 8.0 / (1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "  Duration: 00:01:40.00, start: 0.000000, bitrate: 128.0 kb/s";

    #[test]
    fn test_estimate_from_header_line() {
        let mut hints = LogHints::new();
        hints.observe(HEADER);
        assert_eq!(hints.duration_seconds(), Some(100.0));
        assert_eq!(hints.bitrate_kbps(), Some(128.0));
        assert_eq!(hints.estimated_total_bytes(), Some(1_600_000));
    }

    #[test]
    fn test_estimate_is_frozen_once_computed() {
        let mut hints = LogHints::new();
        hints.observe(HEADER);
        hints.observe("    Stream #0:1: Audio: aac, 48000 Hz, stereo, fltp, 256 kb/s");
        hints.observe("  Duration: 00:10:00.00, start: 0.000000, bitrate: 4000 kb/s");
        assert_eq!(hints.bitrate_kbps(), Some(128.0));
        assert_eq!(hints.estimated_total_bytes(), Some(1_600_000));
    }

    #[test]
    fn test_bitrate_before_duration() {
        let mut hints = LogHints::new();
        hints.observe("    Stream #0:0: Video: h264, 1280x720, 2000 kb/s, 30 fps");
        assert_eq!(hints.estimated_total_bytes(), None);
        hints.observe("  Duration: 00:00:10.50, start: 1.400000, bitrate: N/A");
        assert_eq!(hints.estimated_total_bytes(), Some(2_625_000));
    }

    #[test]
    fn test_status_line_time_is_not_duration() {
        let line = "frame= 250 fps= 50 q=-1.0 size=    1024kB time=00:00:10.00 bitrate= 838.9kbits/s speed=2.01x";
        let mut hints = LogHints::new();
        hints.observe(line);
        assert_eq!(hints.duration_seconds(), None);
        assert_eq!(hints.bitrate_kbps(), None);
        assert_eq!(hints.media_time_seconds(), Some(10.0));
        assert_eq!(hints.speed(), Some(2.01));
    }

    #[test]
    fn test_live_stream_has_no_estimate() {
        let mut hints = LogHints::new();
        hints.observe("  Duration: N/A, start: 0.000000, bitrate: N/A");
        assert_eq!(hints.estimated_total_bytes(), None);
    }

    #[test]
    fn test_tracker_first_sample_uses_average() {
        let mut tracker = SizeTracker::new(Duration::from_secs(5));
        let hints = LogHints::new();
        let sample = tracker.sample(10_000, Duration::from_secs(4), &hints);
        assert_eq!(sample.rate_bytes_per_sec, 2_500.0);
        assert_eq!(sample.estimated_total_bytes, 0);
        assert_eq!(sample.percent(), None);
    }

    #[test]
    fn test_tracker_rolling_rate() {
        let mut tracker = SizeTracker::new(Duration::from_secs(5));
        let mut hints = LogHints::new();
        hints.observe(HEADER);
        tracker.sample(100_000, Duration::from_secs(5), &hints);
        let sample = tracker.sample(400_000, Duration::from_secs(10), &hints);
        assert_eq!(sample.rate_bytes_per_sec, 60_000.0);
        assert_eq!(sample.percent(), Some(25.0));

        // faststart rewrites can shrink the file briefly
        let shrunk = tracker.sample(300_000, Duration::from_secs(15), &hints);
        assert_eq!(shrunk.rate_bytes_per_sec, 0.0);
    }

    #[test]
    fn test_summary_average() {
        let summary = TransferSummary::new(10 * 1024 * 1024, Duration::from_secs(10));
        assert_eq!(summary.final_mb(), 10.0);
        assert_eq!(summary.average_mbps, 8.0);

        let instant = TransferSummary::new(5, Duration::ZERO);
        assert_eq!(instant.average_mbps, 0.0);
    }
}
