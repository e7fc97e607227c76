#![forbid(unsafe_code)]

//! Input validation and display metadata. The resolver is the only place a
//! [`CanonicalUrl`] can be built, so nothing downstream ever sees an
//! unvalidated URL.

use std::{collections::HashSet, fmt, sync::Arc};

use serde::Serialize;

use crate::{
    error::{ProxyError, ProxyResult},
    extractor::{Extractor, FormatEntry, MediaInfo},
};

pub const DEFAULT_TITLE: &str = "video";
pub const HIGHEST: &str = "highest";
pub const HIGHEST_AUDIO: &str = "highestaudio";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    /// Anything other than `audio` selects video, matching the lenient form
    /// handling of the download endpoint.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|value| value.trim().to_ascii_lowercase()) {
            Some(ref value) if value == "audio" => Self::Audio,
            _ => Self::Video,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Video => "mp4",
            Self::Audio => "mp3",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

/// A source URL accepted by the extractor's URL grammar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalUrl(String);

impl CanonicalUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    pub title: String,
    pub available_qualities: Vec<String>,
}

#[derive(Clone)]
pub struct Resolver {
    extractor: Arc<dyn Extractor>,
}

impl Resolver {
    pub fn new(extractor: Arc<dyn Extractor>) -> Self {
        Self { extractor }
    }

    pub fn extractor(&self) -> &Arc<dyn Extractor> {
        &self.extractor
    }

    /// Fails fast, without any network access, on empty or foreign URLs.
    pub fn resolve(&self, raw: Option<&str>) -> ProxyResult<CanonicalUrl> {
        let raw = raw.map(str::trim).unwrap_or_default();
        if raw.is_empty() || !self.extractor.validate(raw) {
            return Err(ProxyError::invalid_url());
        }
        Ok(CanonicalUrl(raw.to_string()))
    }

    pub async fn metadata(
        &self,
        url: &CanonicalUrl,
        kind: MediaKind,
    ) -> ProxyResult<MediaMetadata> {
        let info = self.extractor.get_info(url.as_str()).await?;
        Ok(metadata_for(&info, kind))
    }
}

pub fn metadata_for(info: &MediaInfo, kind: MediaKind) -> MediaMetadata {
    MediaMetadata {
        title: display_title(&info.title),
        available_qualities: available_qualities(&info.formats, kind),
    }
}

fn display_title(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Quality labels the extractor can actually serve for `kind`, best first.
pub fn available_qualities(formats: &[FormatEntry], kind: MediaKind) -> Vec<String> {
    match kind {
        MediaKind::Audio => {
            if formats.iter().any(|format| format.has_audio) {
                vec![HIGHEST_AUDIO.to_string()]
            } else {
                Vec::new()
            }
        }
        MediaKind::Video => {
            let mut combined: Vec<&FormatEntry> =
                formats.iter().filter(|format| format.is_combined()).collect();
            if combined.is_empty() {
                return Vec::new();
            }
            // Formats without a height sort last but keep their own label.
            combined.sort_by(|a, b| b.height.unwrap_or(0).cmp(&a.height.unwrap_or(0)));

            let mut seen = HashSet::new();
            let mut labels = vec![HIGHEST.to_string()];
            for format in combined {
                let label = match (format.height, format.quality_label.as_deref()) {
                    (Some(height), _) => format!("{height}p"),
                    (None, Some(label)) if !label.trim().is_empty() => label.trim().to_string(),
                    _ => continue,
                };
                if seen.insert(label.clone()) {
                    labels.push(label);
                }
            }
            labels
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractError;
    use crate::extractor::{ByteSource, VariantSelection, platform};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingExtractor {
        info_calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Extractor for CountingExtractor {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn validate(&self, url: &str) -> bool {
            platform::is_supported_url(url)
        }

        async fn get_info(&self, _url: &str) -> Result<MediaInfo, ExtractError> {
            self.info_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ExtractError::Unavailable("Video unavailable or removed.".into()));
            }
            Ok(MediaInfo {
                title: "  Alpha  ".into(),
                formats: vec![
                    format("18", Some(360), true, true),
                    format("22", Some(720), true, true),
                    format("137", Some(1080), true, false),
                    format("140", None, false, true),
                    format("92", Some(240), true, true),
                    format("94", Some(720), true, true),
                ],
            })
        }

        async fn open_stream(
            &self,
            _url: &str,
            _selection: &VariantSelection,
        ) -> Result<ByteSource, ExtractError> {
            unreachable!("resolver never opens streams")
        }
    }

    fn format(id: &str, height: Option<u32>, video: bool, audio: bool) -> FormatEntry {
        FormatEntry {
            format_id: id.into(),
            ext: Some("mp4".into()),
            height,
            quality_label: None,
            has_video: video,
            has_audio: audio,
        }
    }

    #[test]
    fn resolve_rejects_missing_blank_and_foreign_urls() {
        let resolver = Resolver::new(Arc::new(CountingExtractor::default()));
        for raw in [None, Some(""), Some("   "), Some("not-a-url"), Some("https://vimeo.com/1")] {
            let err = resolver.resolve(raw).unwrap_err();
            assert!(matches!(err, ProxyError::InvalidInput(_)), "{raw:?}");
        }
    }

    #[test]
    fn resolve_trims_and_accepts_platform_urls() {
        let resolver = Resolver::new(Arc::new(CountingExtractor::default()));
        let url = resolver.resolve(Some(" https://youtu.be/abc123 ")).unwrap();
        assert_eq!(url.as_str(), "https://youtu.be/abc123");
    }

    #[tokio::test]
    async fn metadata_lists_real_qualities_best_first() {
        let extractor = Arc::new(CountingExtractor::default());
        let resolver = Resolver::new(extractor.clone());
        let url = resolver.resolve(Some("https://youtu.be/abc123")).unwrap();

        let video = resolver.metadata(&url, MediaKind::Video).await.unwrap();
        assert_eq!(video.title, "Alpha");
        assert_eq!(
            video.available_qualities,
            vec!["highest", "720p", "360p", "240p"]
        );

        let audio = resolver.metadata(&url, MediaKind::Audio).await.unwrap();
        assert_eq!(audio.available_qualities, vec!["highestaudio"]);
        assert_eq!(extractor.info_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn metadata_failure_is_upstream_resolution() {
        let resolver = Resolver::new(Arc::new(CountingExtractor {
            fail: true,
            ..CountingExtractor::default()
        }));
        let url = resolver.resolve(Some("https://youtu.be/abc123")).unwrap();
        let err = resolver.metadata(&url, MediaKind::Video).await.unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamResolution(_)));
    }

    #[test]
    fn qualities_use_labels_when_height_missing() {
        let mut labelled = format("43", None, true, true);
        labelled.quality_label = Some("medium".into());
        let qualities = available_qualities(&[labelled], MediaKind::Video);
        assert_eq!(qualities, vec!["highest", "medium"]);
        assert!(available_qualities(&[], MediaKind::Video).is_empty());
        assert!(available_qualities(&[], MediaKind::Audio).is_empty());
    }

    #[test]
    fn media_kind_parse_defaults_to_video() {
        assert_eq!(MediaKind::parse(None), MediaKind::Video);
        assert_eq!(MediaKind::parse(Some("video")), MediaKind::Video);
        assert_eq!(MediaKind::parse(Some(" AUDIO ")), MediaKind::Audio);
        assert_eq!(MediaKind::parse(Some("gif")), MediaKind::Video);
        assert_eq!(MediaKind::Audio.extension(), "mp3");
        assert_eq!(MediaKind::Video.extension(), "mp4");
    }
}
