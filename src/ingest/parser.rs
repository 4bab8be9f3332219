// src/ingest/parser.rs
//! Feed parser for the board RSS variant: `rss > channel > item*`, where each
//! item carries its attachments as numbered sibling fields
//! (`filename1`, `url1`, `preview1`, `filename2`, ...).

use std::borrow::Cow;

use metrics::histogram;
use once_cell::sync::OnceCell;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use thiserror::Error;

use crate::ingest::types::{extract_article_id, Attachment, Entry, Feed};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Failed to parse RSS XML: {0}")]
    Xml(String),
    #[error("Invalid RSS format: missing rss or channel")]
    MissingChannel,
    #[error("Failed to parse RSS XML: unexpected end of document inside <{0}>")]
    UnexpectedEof(String),
}

/// Read access to one parsed element by child name. All schema knowledge
/// (field names, attachment numbering) goes through this lookup.
pub trait RawNode {
    /// Text of the first child called `name`: CDATA unwrapped, trimmed and
    /// entity-decoded. `None` when the child does not exist.
    fn field(&self, name: &str) -> Option<String>;

    /// Children called `name`, in document order.
    fn children_named<'a>(&'a self, name: &str) -> Vec<&'a Self>;
}

/// Minimal element tree; attributes are not needed by this schema.
#[derive(Debug, Default, Clone)]
pub struct XmlNode {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }
}

impl RawNode for XmlNode {
    fn field(&self, name: &str) -> Option<String> {
        self.child(name).map(|c| decode_entities(c.text.trim()).into_owned())
    }

    fn children_named<'a>(&'a self, name: &str) -> Vec<&'a Self> {
        self.children.iter().filter(|c| c.name == name).collect()
    }
}

/// Decode the fixed entity table in one left-to-right pass. The output is
/// never rescanned, so `&amp;lt;` becomes `&lt;` and stays that way.
pub fn decode_entities(s: &str) -> Cow<'_, str> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r"&(lt|gt|amp|quot|#39|apos);").unwrap());
    re.replace_all(s, |caps: &regex::Captures| {
        match &caps[1] {
            "lt" => "<",
            "gt" => ">",
            "amp" => "&",
            "quot" => "\"",
            _ => "'",
        }
        .to_string()
    })
}

/// Build the element tree. Text and CDATA are kept raw; decoding happens on
/// field access.
fn read_tree(xml: &str) -> Result<Option<XmlNode>, ParseError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            ParseError::Xml(format!("{e} (at byte {})", reader.buffer_position()))
        })?;
        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                stack.push(XmlNode::new(name));
            }
            Event::Empty(e) => {
                let node = XmlNode::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = root.or(Some(node)),
                }
            }
            Event::End(_) => {
                let Some(node) = stack.pop() else {
                    return Err(ParseError::Xml("unbalanced closing tag".into()));
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = root.or(Some(node)),
                }
            }
            Event::Text(e) => {
                if let Some(cur) = stack.last_mut() {
                    cur.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::CData(e) => {
                if let Some(cur) = stack.last_mut() {
                    cur.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::UnexpectedEof(open.name.clone()));
    }
    Ok(root)
}

/// Scan `filename<k>/url<k>/preview<k>` from k = 1 until the first missing
/// (or empty) `filename<k>`. A gap truncates the list.
pub fn parse_attachments<N: RawNode + ?Sized>(item: &N) -> Vec<Attachment> {
    let mut out = Vec::new();
    let mut k = 1usize;
    while let Some(filename) = item.field(&format!("filename{k}")).filter(|f| !f.is_empty()) {
        let download_url = item.field(&format!("url{k}")).unwrap_or_default();
        let preview_url = item
            .field(&format!("preview{k}"))
            .filter(|p| !p.is_empty());
        out.push(Attachment::new(filename, download_url, preview_url));
        k += 1;
    }
    out
}

fn parse_entry<N: RawNode + ?Sized>(item: &N) -> Entry {
    let link = item.field("link").unwrap_or_default();
    let article_id = extract_article_id(&link);
    Entry {
        title: item.field("title").unwrap_or_default(),
        description: item.field("description").unwrap_or_default(),
        published_at: item.field("pubDate").unwrap_or_default(),
        department: item.field("department").filter(|d| !d.is_empty()),
        attachments: parse_attachments(item),
        link,
        article_id,
    }
}

/// Parse raw feed markup into a [`Feed`]. No partial result is returned on
/// structural errors.
pub fn parse_feed(xml: &str) -> Result<Feed, ParseError> {
    let t0 = std::time::Instant::now();

    let root = read_tree(xml)?
        .filter(|r| r.name == "rss")
        .ok_or(ParseError::MissingChannel)?;
    let channel = root.child("channel").ok_or(ParseError::MissingChannel)?;

    let items = channel
        .children_named("item")
        .into_iter()
        .map(parse_entry)
        .collect::<Vec<_>>();

    let feed = Feed {
        title: channel.field("title").unwrap_or_default(),
        link: channel.field("link").unwrap_or_default(),
        description: channel.field("description").unwrap_or_default(),
        items,
    };

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("archiver_parse_ms").record(ms);
    Ok(feed)
}
