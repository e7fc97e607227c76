#![forbid(unsafe_code)]

//! Proxy streamer: picks the variant, fixes the attachment headers and wires
//! the upstream byte source into the response body through a bounded queue.

use std::{io, time::Duration};

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use futures::{StreamExt, stream};
use mime_guess::MimeGuess;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::{
    error::{ProxyError, ProxyResult},
    extractor::{StreamFilter, VariantSelection},
    resolver::{CanonicalUrl, DEFAULT_TITLE, HIGHEST, HIGHEST_AUDIO, MediaKind, Resolver},
    session::StreamSession,
};

/// Audio ignores the requested quality; video forwards it verbatim.
pub fn select_variant(kind: MediaKind, quality: Option<&str>) -> VariantSelection {
    match kind {
        MediaKind::Audio => VariantSelection {
            filter: StreamFilter::AudioOnly,
            quality: HIGHEST_AUDIO.to_string(),
        },
        MediaKind::Video => VariantSelection {
            filter: StreamFilter::AudioAndVideo,
            quality: quality
                .filter(|quality| !quality.trim().is_empty())
                .unwrap_or(HIGHEST)
                .to_string(),
        },
    }
}

/// `<title>.<ext>` with everything a quoted header parameter cannot carry
/// removed: non-ASCII, control characters, quotes and backslashes.
pub fn attachment_filename(title: &str, kind: MediaKind) -> String {
    let base: String = title
        .chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control() && *c != '"' && *c != '\\')
        .collect();
    let base = if base.trim().is_empty() {
        DEFAULT_TITLE
    } else {
        base.as_str()
    };
    format!("{base}.{}", kind.extension())
}

fn content_disposition(filename: &str, kind: MediaKind) -> HeaderValue {
    HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")).unwrap_or_else(|_| {
        match kind {
            MediaKind::Video => HeaderValue::from_static("attachment; filename=\"video.mp4\""),
            MediaKind::Audio => HeaderValue::from_static("attachment; filename=\"video.mp3\""),
        }
    })
}

fn content_type(filename: &str) -> HeaderValue {
    MimeGuess::from_path(filename)
        .first()
        .and_then(|mime| HeaderValue::from_str(mime.as_ref()).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"))
}

#[derive(Clone)]
pub struct ProxyStreamer {
    resolver: Resolver,
    relay_capacity: usize,
    metadata_timeout: Option<Duration>,
}

impl ProxyStreamer {
    pub fn new(
        resolver: Resolver,
        relay_capacity: usize,
        metadata_timeout: Option<Duration>,
    ) -> Self {
        Self {
            resolver,
            relay_capacity: relay_capacity.max(1),
            metadata_timeout,
        }
    }

    /// Best-effort title lookup. Any failure, including the optional
    /// timeout, yields the default title.
    async fn title_for(&self, url: &CanonicalUrl, kind: MediaKind) -> String {
        let lookup = self.resolver.metadata(url, kind);
        let result = match self.metadata_timeout {
            Some(limit) => match tokio::time::timeout(limit, lookup).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(timeout = ?limit, "title lookup timed out, using default title");
                    return DEFAULT_TITLE.to_string();
                }
            },
            None => lookup.await,
        };
        match result {
            Ok(metadata) => metadata.title,
            Err(err) => {
                tracing::warn!(error = %err, "title lookup failed, using default title");
                DEFAULT_TITLE.to_string()
            }
        }
    }

    /// Opens the upstream for the selected variant and returns a response
    /// whose body relays it.
    ///
    /// The first upstream chunk is awaited before anything is committed, so
    /// an upstream that cannot be opened, or fails or ends before producing a
    /// byte, is still reported as a clean 500. Past that point the status and
    /// headers are fixed and a failure can only abort the body.
    pub async fn stream(
        &self,
        mut session: StreamSession,
        url: &CanonicalUrl,
        kind: MediaKind,
        quality: Option<&str>,
    ) -> ProxyResult<Response> {
        let selection = select_variant(kind, quality);
        tracing::debug!(
            filter = selection.filter.as_str(),
            quality = %selection.quality,
            extractor = self.resolver.extractor().name(),
            "opening upstream"
        );

        let extractor = self.resolver.extractor();
        let (title, opened) = tokio::join!(
            self.title_for(url, kind),
            extractor.open_stream(url.as_str(), &selection)
        );

        let mut upstream = match opened {
            Ok(upstream) => upstream,
            Err(err) => {
                let err = ProxyError::from(err);
                session.reject(&err.to_string());
                return Err(err);
            }
        };

        let first = match upstream.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(err)) => {
                let err = ProxyError::UpstreamResolution(err.to_string());
                session.reject(&err.to_string());
                return Err(err);
            }
            None => {
                let err =
                    ProxyError::UpstreamResolution("upstream produced no data".to_string());
                session.reject(&err.to_string());
                return Err(err);
            }
        };

        let filename = attachment_filename(&title, kind);
        session
            .commit(upstream)
            .map_err(|err| ProxyError::UpstreamResolution(err.to_string()))?;
        tracing::info!(request_id = session.request_id(), %filename, "streaming download");

        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(self.relay_capacity);
        tokio::spawn(session.relay(first, tx).in_current_span());

        let body_stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        let mut response = Response::new(Body::from_stream(body_stream));
        *response.status_mut() = StatusCode::OK;
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_DISPOSITION, content_disposition(&filename, kind));
        headers.insert(header::CONTENT_TYPE, content_type(&filename));
        Ok(response)
    }
}
