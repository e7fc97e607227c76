#![forbid(unsafe_code)]

//! Boundary to the extraction service that turns a page URL into metadata and
//! raw media bytes. Everything behind [`Extractor`] is a black box to the
//! proxy: the trait only describes what goes in and what comes back out.

pub mod platform;
pub mod ytdlp;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::ExtractError;

pub use ytdlp::YtDlp;

/// Chunks produced by an open upstream stream, in upstream order. The stream
/// ends after the last chunk; an `Err` item means the upstream broke.
pub type ByteSource = BoxStream<'static, std::io::Result<Bytes>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFilter {
    AudioOnly,
    AudioAndVideo,
}

impl StreamFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AudioOnly => "audioonly",
            Self::AudioAndVideo => "audioandvideo",
        }
    }
}

/// The exact variant request forwarded to [`Extractor::open_stream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantSelection {
    pub filter: StreamFilter,
    /// Opaque quality label; the extractor decides what it means.
    pub quality: String,
}

/// One format advertised by the extractor for a URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatEntry {
    pub format_id: String,
    pub ext: Option<String>,
    pub height: Option<u32>,
    pub quality_label: Option<String>,
    pub has_video: bool,
    pub has_audio: bool,
}

impl FormatEntry {
    pub fn is_combined(&self) -> bool {
        self.has_video && self.has_audio
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaInfo {
    pub title: String,
    pub formats: Vec<FormatEntry>,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Name of the backend, for logs.
    fn name(&self) -> &'static str;

    /// Cheap, offline check that `url` belongs to a supported platform.
    fn validate(&self, url: &str) -> bool;

    async fn get_info(&self, url: &str) -> Result<MediaInfo, ExtractError>;

    async fn open_stream(
        &self,
        url: &str,
        selection: &VariantSelection,
    ) -> Result<ByteSource, ExtractError>;
}
