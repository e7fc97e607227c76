#![forbid(unsafe_code)]

//! [`Extractor`] backed by the `yt-dlp` executable.
//!
//! Metadata comes from `--dump-single-json`. Streams are produced by asking
//! yt-dlp to write the selected format to stdout (`-o -`), which is then read
//! chunk by chunk. The child is spawned with `kill_on_drop`, so dropping the
//! returned [`ByteSource`] terminates the download.

use std::{
    io,
    path::PathBuf,
    process::{ExitStatus, Stdio},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use serde::Deserialize;
use tokio::{
    io::AsyncReadExt,
    process::{Child, ChildStderr, ChildStdout, Command},
    task::JoinHandle,
};
use tokio_util::io::ReaderStream;

use super::{
    ByteSource, Extractor, FormatEntry, MediaInfo, StreamFilter, VariantSelection, platform,
};
use crate::error::ExtractError;

#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: PathBuf,
}

impl YtDlp {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

/// Subset of the `--dump-single-json` payload. Everything is optional because
/// older or unusual videos omit fields freely.
#[derive(Debug, Deserialize)]
struct VideoInfo {
    title: Option<String>,
    fulltitle: Option<String>,
    #[serde(default)]
    formats: Vec<FormatInfo>,
}

#[derive(Debug, Deserialize)]
struct FormatInfo {
    format_id: Option<String>,
    format_note: Option<String>,
    ext: Option<String>,
    height: Option<i64>,
    vcodec: Option<String>,
    acodec: Option<String>,
}

impl VideoInfo {
    fn into_media_info(self) -> MediaInfo {
        let title = self
            .fulltitle
            .filter(|title| !title.trim().is_empty())
            .or(self.title)
            .unwrap_or_default();
        let formats = self
            .formats
            .into_iter()
            .filter_map(|format| {
                let format_id = format.format_id?.trim().to_string();
                if format_id.is_empty() {
                    return None;
                }
                Some(FormatEntry {
                    format_id,
                    ext: format.ext,
                    height: format
                        .height
                        .and_then(|height| u32::try_from(height).ok())
                        .filter(|height| *height > 0),
                    quality_label: format.format_note,
                    has_video: codec_present(format.vcodec.as_deref()),
                    has_audio: codec_present(format.acodec.as_deref()),
                })
            })
            .collect();
        MediaInfo { title, formats }
    }
}

fn codec_present(codec: Option<&str>) -> bool {
    codec.is_some_and(|codec| !codec.trim().is_empty() && codec != "none")
}

/// Maps a variant request onto a yt-dlp `-f` expression. Unknown quality
/// labels fall back to the best available file of the requested kind.
pub(crate) fn format_selector(selection: &VariantSelection) -> String {
    let quality = selection.quality.trim().to_ascii_lowercase();
    match selection.filter {
        StreamFilter::AudioOnly => match quality.as_str() {
            "lowestaudio" | "lowest" => "worstaudio/worst".to_string(),
            _ => "bestaudio/best".to_string(),
        },
        StreamFilter::AudioAndVideo => match quality.as_str() {
            "" | "highest" | "highestvideo" => "best".to_string(),
            "lowest" | "lowestvideo" => "worst".to_string(),
            other => {
                if let Some(height) = other
                    .strip_suffix('p')
                    .and_then(|height| height.parse::<u32>().ok())
                {
                    format!("best[height<={height}]/best")
                } else if other.chars().all(|c| c.is_ascii_digit()) {
                    format!("{other}/best")
                } else {
                    "best".to_string()
                }
            }
        },
    }
}

/// Shortens yt-dlp's stderr into a human readable reason.
fn translate_stderr(stderr: &str) -> String {
    let lower = stderr.to_lowercase();

    if lower.contains("private video") {
        return "This video is private.".to_string();
    }
    if lower.contains("sign in to confirm") || lower.contains("login required") {
        return "Video requires login.".to_string();
    }
    if lower.contains("http error 429") {
        return "Upstream is rate limiting requests (429). Try again later.".to_string();
    }
    if lower.contains("geo") && lower.contains("block") {
        return "Video restricted in this region.".to_string();
    }
    if lower.contains("http error 403") {
        return "Access denied (403).".to_string();
    }
    if lower.contains("video unavailable") || lower.contains("has been removed") {
        return "Video unavailable or removed.".to_string();
    }
    if lower.contains("requested format") && lower.contains("not available") {
        return "Requested format is not available.".to_string();
    }

    let last_error_line = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.to_lowercase().starts_with("error"))
        .unwrap_or("");
    if last_error_line.is_empty() {
        let trimmed = stderr.trim();
        if trimmed.is_empty() {
            return "yt-dlp failed without output".to_string();
        }
        return trimmed.chars().take(300).collect();
    }
    last_error_line
        .strip_prefix("ERROR: ")
        .or_else(|| last_error_line.strip_prefix("ERROR:"))
        .unwrap_or(last_error_line)
        .to_string()
}

fn exit_failure(status: ExitStatus, stderr: &str) -> String {
    let reason = translate_stderr(stderr);
    format!("{reason} (yt-dlp {status})")
}

#[async_trait]
impl Extractor for YtDlp {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn validate(&self, url: &str) -> bool {
        platform::is_supported_url(url)
    }

    async fn get_info(&self, url: &str) -> Result<MediaInfo, ExtractError> {
        let output = self
            .command()
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg(url)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::Unavailable(exit_failure(
                output.status,
                &stderr,
            )));
        }

        let info: VideoInfo = serde_json::from_slice(&output.stdout)
            .map_err(|err| ExtractError::Malformed(err.to_string()))?;
        Ok(info.into_media_info())
    }

    async fn open_stream(
        &self,
        url: &str,
        selection: &VariantSelection,
    ) -> Result<ByteSource, ExtractError> {
        let selector = format_selector(selection);
        tracing::debug!(%selector, filter = selection.filter.as_str(), "spawning yt-dlp stream");

        let mut child = self
            .command()
            .arg("--no-playlist")
            .arg("--no-part")
            .arg("--quiet")
            .arg("--no-warnings")
            .arg("-f")
            .arg(&selector)
            .arg("-o")
            .arg("-")
            .arg(url)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::Malformed("yt-dlp stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractError::Malformed("yt-dlp stderr not captured".to_string()))?;

        let state = ChildStream {
            child,
            reader: ReaderStream::new(stdout),
            stderr: Some(tokio::spawn(collect_stderr(stderr))),
        };
        Ok(stream::unfold(Some(state), next_chunk).boxed())
    }
}

/// Drains stderr in the background so a chatty child never blocks on a full
/// pipe while we are reading stdout.
async fn collect_stderr(mut stderr: ChildStderr) -> String {
    let mut buf = Vec::new();
    if let Err(err) = stderr.read_to_end(&mut buf).await {
        tracing::debug!(error = %err, "reading yt-dlp stderr failed");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

struct ChildStream {
    child: Child,
    reader: ReaderStream<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
}

impl ChildStream {
    /// Waits for the child once stdout hit EOF. A non-zero exit turns into
    /// the stream's final error.
    async fn finish(mut self) -> io::Result<()> {
        let status = self.child.wait().await?;
        if status.success() {
            return Ok(());
        }
        let stderr = match self.stderr.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        Err(io::Error::other(exit_failure(status, &stderr)))
    }
}

async fn next_chunk(
    state: Option<ChildStream>,
) -> Option<(io::Result<Bytes>, Option<ChildStream>)> {
    let mut state = state?;
    match state.reader.next().await {
        Some(Ok(chunk)) => Some((Ok(chunk), Some(state))),
        Some(Err(err)) => Some((Err(err), None)),
        None => match state.finish().await {
            Ok(()) => None,
            Err(err) => Some((Err(err), None)),
        },
    }
}
