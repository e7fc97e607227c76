#![forbid(unsafe_code)]

//! URL grammar of the supported video platform.

use url::Url;

const CANONICAL_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "gaming.youtube.com",
];
const SHORT_LINK_HOSTS: &[&str] = &["youtu.be", "www.youtu.be"];
// Path prefixes on the canonical hosts that carry the id as the next segment.
const ID_PATH_PREFIXES: &[&str] = &["shorts", "embed", "v", "live"];

pub fn is_supported_url(raw: &str) -> bool {
    video_id(raw).is_some()
}

/// Extracts the video id from a canonical or short-link URL.
pub fn video_id(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.to_ascii_lowercase();
    let mut segments = parsed
        .path_segments()
        .into_iter()
        .flatten()
        .filter(|segment| !segment.is_empty());

    let candidate = if SHORT_LINK_HOSTS.contains(&host.as_str()) {
        segments.next().map(str::to_string)
    } else if CANONICAL_HOSTS.contains(&host.as_str()) {
        match segments.next() {
            Some("watch") => parsed
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned()),
            Some(prefix) if ID_PATH_PREFIXES.contains(&prefix) => {
                segments.next().map(str::to_string)
            }
            _ => None,
        }
    } else {
        None
    };

    candidate.filter(|id| is_valid_id(id))
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
