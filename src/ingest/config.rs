// src/ingest/config.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::fetcher::RetryPolicy;
use crate::ingest::retention::DEFAULT_RETENTION_YEARS;
use crate::ingest::types::FeedSource;
use crate::preview::PreviewConfig;

const ENV_PATH: &str = "ARCHIVER_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config/archiver.toml";

/// Accepted range for `retention_years`.
pub const RETENTION_YEARS_RANGE: std::ops::RangeInclusive<u32> = 1..=100;

fn default_source_param() -> String {
    "bbsNo".to_string()
}
fn default_retention_years() -> u32 {
    DEFAULT_RETENTION_YEARS
}
fn default_storage_root() -> PathBuf {
    PathBuf::from("archive")
}
fn default_progress_path() -> PathBuf {
    PathBuf::from("archive/progress.json")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiverConfig {
    pub feed_base_url: String,
    /// Query parameter carrying the board id.
    #[serde(default = "default_source_param")]
    pub source_param: String,
    pub source_ids: Vec<String>,
    #[serde(default)]
    pub preview: Option<PreviewConfig>,
    #[serde(default = "default_retention_years")]
    pub retention_years: u32,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    #[serde(default = "default_progress_path")]
    pub progress_path: PathBuf,
    /// Re-run every N seconds instead of exiting after one run.
    #[serde(default)]
    pub run_interval_secs: Option<u64>,
}

impl ArchiverConfig {
    pub fn new(feed_base_url: impl Into<String>, source_ids: Vec<String>) -> Self {
        Self {
            feed_base_url: feed_base_url.into(),
            source_param: default_source_param(),
            source_ids: clean_ids(source_ids),
            preview: None,
            retention_years: default_retention_years(),
            retry: RetryPolicy::default(),
            storage_root: default_storage_root(),
            progress_path: default_progress_path(),
            run_interval_secs: None,
        }
    }

    pub fn sources(&self) -> Vec<FeedSource> {
        self.source_ids.iter().map(FeedSource::new).collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.feed_base_url.trim().is_empty() {
            bail!("feed base URL is empty");
        }
        if self.source_ids.is_empty() {
            bail!("no source ids configured");
        }
        if !RETENTION_YEARS_RANGE.contains(&self.retention_years) {
            bail!(
                "retention_years must be between {} and {}, got {}",
                RETENTION_YEARS_RANGE.start(),
                RETENTION_YEARS_RANGE.end(),
                self.retention_years
            );
        }
        if let Some(p) = &self.preview {
            if p.base_url.trim().is_empty() || p.token.trim().is_empty() {
                bail!("preview service needs both a base URL and a token");
            }
        }
        Ok(())
    }

    /// Build from process environment (after `.env` has been loaded).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base = get("RSS_FEED_BASE_URL").ok_or_else(|| anyhow!("Missing RSS_FEED_BASE_URL"))?;
        let ids = get("BOARD_IDS").ok_or_else(|| anyhow!("Missing BOARD_IDS"))?;
        let mut cfg = Self::new(base.trim(), parse_id_list(&ids));

        if let Some(p) = get("SOURCE_PARAM").filter(|s| !s.trim().is_empty()) {
            cfg.source_param = p.trim().to_string();
        }
        let preview_base = get("PREVIEW_PARSER_BASE_URL").filter(|s| !s.trim().is_empty());
        let preview_token = get("PREVIEW_PARSER_TOKEN").filter(|s| !s.trim().is_empty());
        if let (Some(base), Some(token)) = (preview_base, preview_token) {
            cfg.preview = Some(PreviewConfig::new(base.trim(), token.trim()));
        }

        if let Some(v) = get("RETENTION_YEARS") {
            cfg.retention_years = parse_num("RETENTION_YEARS", &v)?;
        }
        if let Some(v) = get("FEED_TIMEOUT_MS") {
            cfg.retry.timeout_ms = parse_num("FEED_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("FEED_MAX_RETRIES") {
            cfg.retry.max_retries = parse_num("FEED_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("FEED_BACKOFF_MULTIPLIER") {
            cfg.retry.backoff_multiplier = parse_num("FEED_BACKOFF_MULTIPLIER", &v)?;
        }
        if let Some(v) = get("ARCHIVE_ROOT") {
            cfg.storage_root = PathBuf::from(v.trim());
        }
        if let Some(v) = get("PROGRESS_PATH") {
            cfg.progress_path = PathBuf::from(v.trim());
        }
        if let Some(v) = get("RUN_INTERVAL_SECS") {
            cfg.run_interval_secs = Some(parse_num("RUN_INTERVAL_SECS", &v)?);
        }
        Ok(cfg)
    }
}

fn parse_num<T: std::str::FromStr>(name: &str, v: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    v.trim()
        .parse::<T>()
        .with_context(|| format!("{name} must be a number, got {v:?}"))
}

/// Comma-separated ids: trimmed, empties dropped, first occurrence wins.
pub fn parse_id_list(s: &str) -> Vec<String> {
    clean_ids(s.split(',').map(str::to_string).collect())
}

fn clean_ids(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if !t.is_empty() && !out.iter().any(|o| o == t) {
            out.push(t.to_string());
        }
    }
    out
}

/// Load from an explicit path. Supports TOML or JSON formats.
pub fn load_from(path: &Path) -> Result<ArchiverConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading archiver config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let mut cfg = parse_config(&content, ext.as_str())?;
    cfg.source_ids = clean_ids(std::mem::take(&mut cfg.source_ids));
    Ok(cfg)
}

/// Resolution order:
/// 1) $ARCHIVER_CONFIG_PATH
/// 2) config/archiver.toml
/// 3) environment variables
pub fn load_default() -> Result<ArchiverConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        } else {
            return Err(anyhow!("ARCHIVER_CONFIG_PATH points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from(DEFAULT_CONFIG_PATH);
    if toml_p.exists() {
        return load_from(&toml_p);
    }
    ArchiverConfig::from_env()
}

fn parse_config(s: &str, hint_ext: &str) -> Result<ArchiverConfig> {
    if hint_ext == "json" {
        return serde_json::from_str(s).context("parsing JSON archiver config");
    }
    match toml::from_str::<ArchiverConfig>(s) {
        Ok(cfg) => Ok(cfg),
        Err(toml_err) => serde_json::from_str(s).map_err(|_| {
            anyhow!("unsupported archiver config format (TOML error: {toml_err})")
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn env_defaults_match_documented_values() {
        let cfg = ArchiverConfig::from_lookup(lookup(&[
            ("RSS_FEED_BASE_URL", "https://www.knue.ac.kr/rssBbsNtt.do"),
            ("BOARD_IDS", " 25, 26 ,,25"),
        ]))
        .unwrap();
        assert_eq!(cfg.source_ids, vec!["25".to_string(), "26".to_string()]);
        assert_eq!(cfg.retention_years, 2);
        assert_eq!(cfg.retry.timeout_ms, 5000);
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.retry.backoff_multiplier, 2.0);
        assert_eq!(cfg.source_param, "bbsNo");
        assert!(cfg.preview.is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn preview_needs_both_url_and_token() {
        let only_url = ArchiverConfig::from_lookup(lookup(&[
            ("RSS_FEED_BASE_URL", "https://x/rss"),
            ("BOARD_IDS", "1"),
            ("PREVIEW_PARSER_BASE_URL", "https://preview.example.com"),
        ]))
        .unwrap();
        assert!(only_url.preview.is_none());

        let both = ArchiverConfig::from_lookup(lookup(&[
            ("RSS_FEED_BASE_URL", "https://x/rss"),
            ("BOARD_IDS", "1"),
            ("PREVIEW_PARSER_BASE_URL", "https://preview.example.com"),
            ("PREVIEW_PARSER_TOKEN", "secret"),
        ]))
        .unwrap();
        assert_eq!(
            both.preview,
            Some(PreviewConfig::new("https://preview.example.com", "secret"))
        );
    }

    #[test]
    fn bad_numbers_are_reported() {
        let err = ArchiverConfig::from_lookup(lookup(&[
            ("RSS_FEED_BASE_URL", "https://x/rss"),
            ("BOARD_IDS", "1"),
            ("FEED_MAX_RETRIES", "many"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("FEED_MAX_RETRIES"));
    }

    #[test]
    fn empty_source_list_fails_validation() {
        let cfg = ArchiverConfig::new("https://x/rss", parse_id_list(" , "));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn retention_years_out_of_range_fails_validation() {
        let mut cfg = ArchiverConfig::new("https://x/rss", vec!["25".into()]);
        for bad in [0, 101, i32::MAX as u32 + 1, u32::MAX] {
            cfg.retention_years = bad;
            let err = cfg.validate().unwrap_err();
            assert!(err.to_string().contains("retention_years"), "{err}");
        }
        for ok in [1, 2, 100] {
            cfg.retention_years = ok;
            cfg.validate().unwrap();
        }

        let from_env = ArchiverConfig::from_lookup(lookup(&[
            ("RSS_FEED_BASE_URL", "https://x/rss"),
            ("BOARD_IDS", "1"),
            ("RETENTION_YEARS", "4294967295"),
        ]))
        .unwrap();
        assert!(from_env.validate().is_err());
    }

    #[test]
    fn toml_and_json_parse() {
        let toml = r#"
feed_base_url = "https://x/rss"
source_ids = ["25", " 26 "]
retention_years = 3

[retry]
max_retries = 1
"#;
        let cfg = parse_config(toml, "toml").unwrap();
        assert_eq!(cfg.retention_years, 3);
        assert_eq!(cfg.retry.max_retries, 1);
        assert_eq!(cfg.retry.timeout_ms, 5000);

        let json = r#"{"feed_base_url":"https://x/rss","source_ids":["7"],
            "preview":{"base_url":"https://p","token":"t"}}"#;
        let cfg = parse_config(json, "").unwrap();
        assert_eq!(cfg.source_ids, vec!["7".to_string()]);
        assert_eq!(cfg.preview.unwrap().timeout_ms, 5000);
    }
}
