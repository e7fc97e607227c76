#![forbid(unsafe_code)]

//! HTTP surface: `GET /download` and `GET /info`.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use axum::{
    Json, Router,
    extract::{Query, State, rejection::QueryRejection},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tracing::Instrument;

use crate::{
    config::RuntimeSettings,
    error::ProxyResult,
    extractor::Extractor,
    resolver::{MediaKind, MediaMetadata, Resolver},
    session::StreamSession,
    streamer::ProxyStreamer,
};

/// Shared state injected into every handler. Nothing in here is mutated per
/// request except the id counter.
#[derive(Clone)]
pub struct AppState {
    resolver: Resolver,
    streamer: ProxyStreamer,
    requests: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(extractor: Arc<dyn Extractor>, settings: &RuntimeSettings) -> Self {
        let resolver = Resolver::new(extractor);
        let streamer = ProxyStreamer::new(
            resolver.clone(),
            settings.relay_capacity,
            settings.metadata_timeout,
        );
        Self {
            resolver,
            streamer,
            requests: Arc::new(AtomicU64::new(1)),
        }
    }

    fn next_request_id(&self) -> String {
        let id = self.requests.fetch_add(1, Ordering::Relaxed);
        format!("dl-{id}")
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/download", get(download))
        .route("/info", get(info))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadParams {
    url: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    quality: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InfoParams {
    url: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

pub async fn download(
    State(state): State<AppState>,
    params: Result<Query<DownloadParams>, QueryRejection>,
) -> Response {
    let request_id = state.next_request_id();
    let params = params.map(|Query(params)| params).unwrap_or_default();
    let kind = MediaKind::parse(params.kind.as_deref());
    let span = tracing::info_span!("download", %request_id, kind = kind.as_str());

    async move {
        let session = StreamSession::new(request_id);
        let url = match state.resolver.resolve(params.url.as_deref()) {
            Ok(url) => url,
            Err(err) => {
                session.reject(&err.to_string());
                return err.into_response();
            }
        };

        match state
            .streamer
            .stream(session, &url, kind, params.quality.as_deref())
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(error = %err, %url, "download failed before streaming");
                err.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

pub async fn info(
    State(state): State<AppState>,
    params: Result<Query<InfoParams>, QueryRejection>,
) -> ProxyResult<Json<MediaMetadata>> {
    let request_id = state.next_request_id();
    let params = params.map(|Query(params)| params).unwrap_or_default();
    let kind = MediaKind::parse(params.kind.as_deref());
    let span = tracing::info_span!("info", %request_id, kind = kind.as_str());

    async move {
        let url = state.resolver.resolve(params.url.as_deref())?;
        let metadata = state
            .resolver
            .metadata(&url, kind)
            .await
            .inspect_err(|err| tracing::warn!(error = %err, %url, "metadata lookup failed"))?;
        Ok(Json(metadata))
    }
    .instrument(span)
    .await
}
