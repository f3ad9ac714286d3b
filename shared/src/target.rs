/// Output filename and path resolution for downloads.
///
/// Names come from the caller or the URL's last path segment, always end
/// in a recognised media extension, and never replace an existing file.
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use url::Url;

/// Name used when neither the caller nor the URL offers one. The extension
/// also sends it as a placeholder, so it is treated as "no filename".
pub const DEFAULT_FILENAME: &str = "output.mp4";

/// HLS manifests all share this name, so it says nothing about the media.
const PLAYLIST_SEGMENT: &str = "playlist.m3u8";

/// Extensions accepted as-is. Anything else gets `.mp4` appended.
pub const MEDIA_EXTENSIONS: &[&str] = &["mp4", "mkv", "m3u8", "ts"];

const FALLBACK_EXTENSION: &str = "mp4";

/// Resolved, reserved output location for one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub path: PathBuf,
    pub filename: String,
}

impl DownloadTarget {
    pub fn path_string(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

/// Last non-empty path segment of `url`, percent-decoded, with the query
/// and fragment dropped. `None` for bare manifests and unparseable URLs.
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    let name = sanitize_filename(&decoded)?;
    if name == PLAYLIST_SEGMENT {
        return None;
    }
    Some(name)
}

/// Reduce a caller-supplied name to a single path component.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let trimmed = name.trim();
    // Backslashes separate components on Windows even when we run elsewhere.
    let last = trimmed.rsplit(|c: char| c == '/' || c == '\\').next()?.trim();
    match last {
        "" | "." | ".." => None,
        other => Some(other.to_string()),
    }
}

pub fn has_media_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            MEDIA_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Pick the base filename for a download request.
pub fn resolve_filename(requested: Option<&str>, url: &str) -> String {
    let requested = requested
        .filter(|name| *name != DEFAULT_FILENAME)
        .and_then(sanitize_filename);

    let name = requested
        .or_else(|| filename_from_url(url))
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string());

    if has_media_extension(&name) {
        name
    } else {
        format!("{}.{}", name, FALLBACK_EXTENSION)
    }
}

/// `stem_N.ext` for the N-th collision.
fn numbered_name(filename: &str, counter: u32) -> String {
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string());
    match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, counter, ext.to_string_lossy()),
        None => format!("{}_{}", stem, counter),
    }
}

/// Claim a free path for `filename` inside `dir` by creating it empty.
///
/// `create_new` makes the claim atomic, so concurrent invocations asking
/// for the same name get distinct files.
pub fn reserve_target(dir: &Path, filename: &str) -> io::Result<DownloadTarget> {
    let mut counter = 0;
    loop {
        let candidate = if counter == 0 {
            filename.to_string()
        } else {
            numbered_name(filename, counter)
        };
        let path = dir.join(&candidate);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {
                debug!("Reserved output path {:?}", path);
                return Ok(DownloadTarget {
                    path,
                    filename: candidate,
                });
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => counter += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Where a get-progress request expects to find `filename`.
pub fn expected_path(dir: &Path, filename: &str) -> Option<PathBuf> {
    sanitize_filename(filename).map(|name| dir.join(name))
}
