#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_YTDLP: &str = "yt-dlp";
pub const DEFAULT_RELAY_CAPACITY: usize = 8;
pub const DEFAULT_METADATA_TIMEOUT_SECS: u64 = 15;

const HOST_KEY: &str = "TUBEPROXY_HOST";
const PORT_KEY: &str = "TUBEPROXY_PORT";
const YTDLP_KEY: &str = "TUBEPROXY_YTDLP";
const RELAY_CAPACITY_KEY: &str = "TUBEPROXY_RELAY_CAPACITY";
const METADATA_TIMEOUT_KEY: &str = "TUBEPROXY_METADATA_TIMEOUT_SECS";

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub host: String,
    pub port: u16,
    pub ytdlp: PathBuf,
    /// Depth of the upstream→client hand-off queue, in chunks.
    pub relay_capacity: usize,
    /// Upper bound for the best-effort title lookup. `None` waits forever;
    /// configured with `0`.
    pub metadata_timeout: Option<Duration>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            ytdlp: PathBuf::from(DEFAULT_YTDLP),
            relay_capacity: DEFAULT_RELAY_CAPACITY,
            metadata_timeout: Some(Duration::from_secs(DEFAULT_METADATA_TIMEOUT_SECS)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ytdlp: Option<PathBuf>,
    pub relay_capacity: Option<usize>,
    pub metadata_timeout_secs: Option<u64>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_runtime_settings_with_overrides(
        &file_vars,
        env_var_string,
        overrides,
    ))
}

#[cfg(test)]
fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> RuntimeSettings {
    build_runtime_settings_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimeSettings {
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_value(HOST_KEY, file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| lookup_parsed(PORT_KEY, file_vars, &env_lookup))
        .unwrap_or(DEFAULT_PORT);
    let ytdlp = overrides
        .ytdlp
        .filter(|path| !path.as_os_str().is_empty())
        .or_else(|| lookup_value(YTDLP_KEY, file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP));
    // A zero-capacity channel cannot be built, so zero counts as invalid.
    let relay_capacity = overrides
        .relay_capacity
        .filter(|capacity| *capacity > 0)
        .or_else(|| {
            lookup_parsed::<usize>(RELAY_CAPACITY_KEY, file_vars, &env_lookup)
                .filter(|capacity| *capacity > 0)
        })
        .unwrap_or(DEFAULT_RELAY_CAPACITY);
    // Zero turns the title deadline off.
    let timeout_secs = overrides
        .metadata_timeout_secs
        .or_else(|| lookup_parsed(METADATA_TIMEOUT_KEY, file_vars, &env_lookup))
        .unwrap_or(DEFAULT_METADATA_TIMEOUT_SECS);
    let metadata_timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));

    RuntimeSettings {
        host,
        port,
        ytdlp,
        relay_capacity,
        metadata_timeout,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn lookup_parsed<T: std::str::FromStr>(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<T> {
    lookup_value(key, file_vars, env_lookup).and_then(|value| value.parse::<T>().ok())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn settings_from(contents: &str) -> RuntimeSettings {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_settings(&vars, |_| None)
    }

    #[test]
    fn empty_file_yields_defaults() {
        let settings = settings_from("");
        assert_eq!(settings.host, DEFAULT_HOST);
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.ytdlp, PathBuf::from(DEFAULT_YTDLP));
        assert_eq!(settings.relay_capacity, DEFAULT_RELAY_CAPACITY);
        assert_eq!(
            settings.metadata_timeout,
            Some(Duration::from_secs(DEFAULT_METADATA_TIMEOUT_SECS))
        );
        assert_eq!(settings.metadata_timeout, RuntimeSettings::default().metadata_timeout);
    }

    #[test]
    fn zero_timeout_disables_title_deadline() {
        let settings = settings_from("TUBEPROXY_METADATA_TIMEOUT_SECS=0\n");
        assert!(settings.metadata_timeout.is_none());
    }

    #[test]
    fn reads_every_key_from_file() {
        let settings = settings_from(
            "TUBEPROXY_HOST=\"0.0.0.0\"\nTUBEPROXY_PORT=\"4242\"\nTUBEPROXY_YTDLP=\"/opt/yt-dlp\"\nTUBEPROXY_RELAY_CAPACITY=\"32\"\nTUBEPROXY_METADATA_TIMEOUT_SECS=\"40\"\n",
        );
        assert_eq!(settings.host, "0.0.0.0");
        assert_eq!(settings.port, 4242);
        assert_eq!(settings.ytdlp, PathBuf::from("/opt/yt-dlp"));
        assert_eq!(settings.relay_capacity, 32);
        assert_eq!(settings.metadata_timeout, Some(Duration::from_secs(40)));
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let settings = settings_from(
            "TUBEPROXY_PORT=\"nope\"\nTUBEPROXY_RELAY_CAPACITY=\"0\"\nTUBEPROXY_METADATA_TIMEOUT_SECS=\"soon\"\n",
        );
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.relay_capacity, DEFAULT_RELAY_CAPACITY);
        assert_eq!(
            settings.metadata_timeout,
            Some(Duration::from_secs(DEFAULT_METADATA_TIMEOUT_SECS))
        );
    }

    #[test]
    fn env_takes_precedence_over_file() {
        let vars = read_env_file(make_config("TUBEPROXY_PORT=\"7000\"\n").path()).unwrap();
        let settings = build_runtime_settings(&vars, |key| {
            if key == PORT_KEY {
                Some("9000".to_string())
            } else {
                None
            }
        });
        assert_eq!(settings.port, 9000);
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export TUBEPROXY_HOST="0.0.0.0"
            TUBEPROXY_YTDLP='/usr/local/bin/yt-dlp'
            TUBEPROXY_PORT =  9090
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("TUBEPROXY_HOST").unwrap(), "0.0.0.0");
        assert_eq!(vars.get("TUBEPROXY_YTDLP").unwrap(), "/usr/local/bin/yt-dlp");
        assert_eq!(vars.get("TUBEPROXY_PORT").unwrap(), "9090");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn overrides_win_over_env_and_file() {
        let mut vars = HashMap::new();
        vars.insert(HOST_KEY.to_string(), "file-host".to_string());
        vars.insert(PORT_KEY.to_string(), "7000".to_string());
        vars.insert(RELAY_CAPACITY_KEY.to_string(), "2".to_string());

        let overrides = RuntimeOverrides {
            host: Some("override-host".into()),
            port: None,
            ytdlp: Some(PathBuf::from("/override/yt-dlp")),
            relay_capacity: Some(64),
            metadata_timeout_secs: Some(5),
            env_path: None,
        };

        let settings = build_runtime_settings_with_overrides(
            &vars,
            |key| {
                if key == PORT_KEY {
                    Some("8000".to_string())
                } else {
                    None
                }
            },
            overrides,
        );

        assert_eq!(settings.host, "override-host");
        assert_eq!(settings.port, 8000);
        assert_eq!(settings.ytdlp, PathBuf::from("/override/yt-dlp"));
        assert_eq!(settings.relay_capacity, 64);
        assert_eq!(settings.metadata_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn blank_host_override_is_ignored() {
        let vars = HashMap::new();
        let settings = build_runtime_settings_with_overrides(
            &vars,
            |_| None,
            RuntimeOverrides {
                host: Some("   ".into()),
                ..RuntimeOverrides::default()
            },
        );
        assert_eq!(settings.host, DEFAULT_HOST);
    }

    #[test]
    fn resolve_reads_explicit_env_path() {
        let cfg = make_config("TUBEPROXY_RELAY_CAPACITY=\"3\"\n");
        let settings = resolve_runtime_settings(RuntimeOverrides {
            env_path: Some(cfg.path().to_path_buf()),
            ..RuntimeOverrides::default()
        })
        .unwrap();
        assert_eq!(settings.relay_capacity, 3);
    }
}
