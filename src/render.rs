// src/render.rs
//! HTML body rendering and final document layout.

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::OnceCell;
use regex::{Captures, Regex};

use crate::ingest::retention::archive_offset;
use crate::ingest::types::{Entry, Feed};

/// Pure `html -> text` conversion used for entry bodies.
pub trait Render: Send + Sync {
    fn render(&self, html: &str) -> String;
}

impl<F> Render for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn render(&self, html: &str) -> String {
        self(html)
    }
}

/// Lightweight HTML -> Markdown for board posts (paragraphs, emphasis,
/// links, headings, lists). Unknown tags are dropped, text is kept.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownRenderer;

macro_rules! re {
    ($pat:expr) => {{
        static RE: OnceCell<Regex> = OnceCell::new();
        RE.get_or_init(|| Regex::new($pat).unwrap())
    }};
}

impl Render for MarkdownRenderer {
    fn render(&self, html: &str) -> String {
        if html.trim().is_empty() {
            return String::new();
        }

        let mut out = re!(r"(?is)<(script|style)[^>]*>.*?</(script|style)>")
            .replace_all(html, "")
            .into_owned();
        out = re!(r"(?i)<br\s*/?>").replace_all(&out, "\n").into_owned();
        out = re!(r"(?is)<h([1-6])[^>]*>(.*?)</h[1-6]>")
            .replace_all(&out, |c: &Captures| {
                let level: usize = c[1].parse().unwrap_or(1);
                format!("\n\n{} {}\n\n", "#".repeat(level), c[2].trim())
            })
            .into_owned();
        out = re!(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a>"#)
            .replace_all(&out, "[$2]($1)")
            .into_owned();
        out = re!(r"(?i)</?(strong|b)(\s[^>]*)?>")
            .replace_all(&out, "**")
            .into_owned();
        out = re!(r"(?i)</?(em|i)(\s[^>]*)?>")
            .replace_all(&out, "*")
            .into_owned();
        out = re!(r"(?i)<li(\s[^>]*)?>").replace_all(&out, "\n- ").into_owned();
        out = re!(r"(?i)</?(p|div|ul|ol|li|table|tr|blockquote|section|article)(\s[^>]*)?>")
            .replace_all(&out, "\n\n")
            .into_owned();
        out = re!(r"(?s)</?[^>]+>").replace_all(&out, "").into_owned();
        out = html_escape::decode_html_entities(&out).replace('\u{00A0}', " ");

        let ws = re!(r"[ \t]+");
        let lines: Vec<String> = out
            .lines()
            .map(|l| ws.replace_all(l.trim(), " ").into_owned())
            .collect();
        let joined = lines.join("\n");
        re!(r"\n{3,}")
            .replace_all(joined.trim(), "\n\n")
            .into_owned()
    }
}

fn format_generated(at: DateTime<Utc>) -> String {
    format!(
        "{} ({})",
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        at.with_timezone(&archive_offset())
            .format("%Y-%m-%dT%H:%M:%S%:z")
    )
}

/// Markdown document for one entry, headed by its feed's metadata.
pub fn format_document(
    feed: &Feed,
    entry: &Entry,
    generated_at: DateTime<Utc>,
    renderer: &dyn Render,
) -> String {
    let mut lines: Vec<String> = vec![
        format!("# {}", feed.title),
        format!("**Source**: {}  ", feed.link),
        format!("**Description**: {}  ", feed.description),
        format!("**Generated**: {}", format_generated(generated_at)),
        String::new(),
        "---".into(),
        String::new(),
        format!("## [{}]({})", entry.title, entry.link),
        format!("**Published**: {}  ", entry.published_at),
    ];
    if let Some(dept) = entry.department.as_deref().filter(|d| !d.trim().is_empty()) {
        lines.push(format!("**Department**: {dept}"));
    }
    lines.push(String::new());
    lines.push(renderer.render(&entry.description));
    lines.push(String::new());

    if !entry.attachments.is_empty() {
        lines.push("### 첨부파일".into());
        for att in &entry.attachments {
            lines.push(format!("- [{}]({})", att.display_filename(), att.download_url));
            if let Some(preview) = att.preview_content.as_deref().filter(|p| !p.is_empty()) {
                for l in preview.lines() {
                    lines.push(format!("  > {l}").trim_end().to_string());
                }
            }
        }
        lines.push(String::new());
    }

    lines.push("---".into());
    lines.join("\n").trim().to_string()
}
