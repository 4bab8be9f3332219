// src/ingest/types.rs
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Identifier used when a link carries no article number.
pub const UNKNOWN_ARTICLE_ID: &str = "unknown";

/// One configured board. The feed URL is `<base>?<param>=<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    pub id: String,
}

impl FeedSource {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn feed_url(&self, base: &str, param: &str) -> String {
        let sep = if base.contains('?') { '&' } else { '?' };
        format!("{base}{sep}{param}={}", self.id)
    }
}

/// Parsed channel with its items in feed order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub title: String,
    pub link: String,
    /// Raw HTML body.
    pub description: String,
    /// `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`, archive-zone local time.
    pub published_at: String,
    pub department: Option<String>,
    pub article_id: String,
    pub attachments: Vec<Attachment>,
}

impl Entry {
    /// Numeric article id, if the id is a plain integer.
    pub fn numeric_id(&self) -> Option<u64> {
        self.article_id.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub download_url: String,
    pub preview_url: Option<String>,
    pub preview_id: Option<String>,
    /// Filled in by the enrichment stage only.
    pub preview_content: Option<String>,
}

impl Attachment {
    pub fn new(filename: String, download_url: String, preview_url: Option<String>) -> Self {
        let preview_id = preview_url.as_deref().and_then(extract_preview_id);
        Self {
            filename,
            download_url,
            preview_url,
            preview_id,
            preview_content: None,
        }
    }

    /// Filename with leading whitespace and stray punctuation removed.
    /// Opening brackets survive so tags like `[공지]` stay intact.
    pub fn display_filename(&self) -> &str {
        self.filename
            .trim_start_matches(|c: char| {
                c.is_whitespace() || (c.is_ascii_punctuation() && c != '[' && c != '(')
            })
    }
}

/// `nttNo=<digits>` from an article link, or `"unknown"`.
pub fn extract_article_id(link: &str) -> String {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r"nttNo=(\d+)").unwrap());
    re.captures(link)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| UNKNOWN_ARTICLE_ID.to_string())
}

/// `atchmnflNo=<digits>` from a preview link.
pub fn extract_preview_id(url: &str) -> Option<String> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r"atchmnflNo=(\d+)").unwrap());
    re.captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
