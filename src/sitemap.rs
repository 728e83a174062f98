//! Sitemap fetching and parsing for change detection.
//!
//! Reads `<base>/sitemap.xml`, follows one level of sitemap-index indirection
//! and yields entries keyed by normalized URL in document order. Fetch and
//! parse problems never escape [`SitemapReader::fetch`]; they are reported in
//! [`SitemapFetch::failures`] next to whatever entries could be read.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::blocking::Client;

use crate::urls::normalize_url;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_CHILD_SITEMAPS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapEntry {
    pub url: String,
    pub lastmod: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct SitemapFetch {
    pub entries: Vec<SitemapEntry>,
    pub failures: Vec<String>,
}

impl SitemapFetch {
    /// True when nothing could be read at all, so staleness is unknown.
    pub fn is_unavailable(&self) -> bool {
        self.entries.is_empty() && !self.failures.is_empty()
    }
}

#[derive(Debug)]
pub enum SitemapDocument {
    UrlSet(Vec<SitemapEntry>),
    Index(Vec<String>),
}

pub struct SitemapReader {
    http: Client,
}

impl SitemapReader {
    pub fn new() -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(concat!("firecrawl-md/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("build sitemap http client")?;
        Ok(Self { http })
    }

    pub fn sitemap_url(base_url: &str) -> String {
        format!("{}/sitemap.xml", base_url.trim_end_matches('/'))
    }

    pub fn fetch(&self, base_url: &str) -> SitemapFetch {
        let root_url = Self::sitemap_url(base_url);
        let mut fetch = SitemapFetch::default();

        let document = match self.fetch_document(&root_url) {
            Ok(document) => document,
            Err(err) => {
                tracing::warn!(url = %root_url, error = %format!("{err:#}"), "sitemap unavailable");
                fetch.failures.push(format!("{root_url}: {err:#}"));
                return fetch;
            }
        };

        let mut raw_entries = Vec::new();
        match document {
            SitemapDocument::UrlSet(entries) => raw_entries = entries,
            SitemapDocument::Index(children) => {
                if children.len() > MAX_CHILD_SITEMAPS {
                    tracing::warn!(
                        count = children.len(),
                        max = MAX_CHILD_SITEMAPS,
                        "sitemap index truncated"
                    );
                }
                tracing::debug!(count = children.len(), "following sitemap index");
                for child_url in children.into_iter().take(MAX_CHILD_SITEMAPS) {
                    match self.fetch_document(&child_url) {
                        Ok(SitemapDocument::UrlSet(entries)) => raw_entries.extend(entries),
                        Ok(SitemapDocument::Index(_)) => {
                            tracing::warn!(url = %child_url, "nested sitemap index skipped");
                            fetch
                                .failures
                                .push(format!("{child_url}: nested sitemap index not followed"));
                        }
                        Err(err) => {
                            tracing::warn!(url = %child_url, error = %format!("{err:#}"), "child sitemap unavailable");
                            fetch.failures.push(format!("{child_url}: {err:#}"));
                        }
                    }
                }
            }
        }

        fetch.entries = dedupe_entries(raw_entries);
        tracing::info!(
            url = %root_url,
            entries = fetch.entries.len(),
            failures = fetch.failures.len(),
            "sitemap read"
        );
        fetch
    }

    fn fetch_document(&self, url: &str) -> anyhow::Result<SitemapDocument> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("GET {url}"))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {status}");
        }
        let xml = response.text().context("read sitemap body")?;
        parse_document(&xml)
    }
}

/// Parses either a `<urlset>` or a `<sitemapindex>` document.
pub fn parse_document(xml: &str) -> anyhow::Result<SitemapDocument> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut root: Option<String> = None;
    let mut urls = Vec::new();
    let mut children = Vec::new();

    // Depth of the open `<url>`/`<sitemap>`; only its direct children count,
    // so extension elements such as `<image:loc>` are ignored.
    let mut item_depth: Option<usize> = None;
    let mut current_loc: Option<String> = None;
    let mut current_lastmod: Option<DateTime<Utc>> = None;
    let mut current_element: Option<String> = None;
    let mut depth = 0_usize;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| anyhow::anyhow!("XML parse error at {}: {err}", reader.buffer_position()))?;
        match event {
            Event::Start(e) => {
                depth += 1;
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if root.is_none() {
                    root = Some(name.clone());
                }
                match name.as_str() {
                    "url" | "sitemap" if item_depth.is_none() => {
                        item_depth = Some(depth);
                        current_loc = None;
                        current_lastmod = None;
                    }
                    "loc" | "lastmod" if item_depth.is_some_and(|item| depth == item + 1) => {
                        current_element = Some(name)
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => {
                if root.is_none() {
                    root = Some(String::from_utf8_lossy(e.local_name().as_ref()).to_string());
                }
            }
            Event::End(e) => {
                let closes_item = item_depth == Some(depth);
                depth = depth.saturating_sub(1);
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match name.as_str() {
                    "url" if closes_item => {
                        if let Some(url) = current_loc.take() {
                            urls.push(SitemapEntry {
                                url,
                                lastmod: current_lastmod.take(),
                            });
                        }
                        item_depth = None;
                    }
                    "sitemap" if closes_item => {
                        if let Some(loc) = current_loc.take() {
                            children.push(loc);
                        }
                        item_depth = None;
                    }
                    _ => {}
                }
                current_element = None;
            }
            Event::Text(e) => {
                if let Some(element) = current_element.as_deref() {
                    let text = e.unescape().context("unescape sitemap text")?;
                    apply_text(element, text.trim(), &mut current_loc, &mut current_lastmod);
                }
            }
            Event::CData(e) => {
                if let Some(element) = current_element.as_deref() {
                    let raw = e.into_inner();
                    let text = String::from_utf8_lossy(&raw);
                    apply_text(element, text.trim(), &mut current_loc, &mut current_lastmod);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if depth != 0 {
        anyhow::bail!("truncated sitemap document ({depth} unclosed elements)");
    }

    match root.as_deref() {
        Some("urlset") => Ok(SitemapDocument::UrlSet(urls)),
        Some("sitemapindex") => Ok(SitemapDocument::Index(children)),
        Some(other) => anyhow::bail!("unexpected sitemap root element <{other}>"),
        None => anyhow::bail!("empty sitemap document"),
    }
}

fn apply_text(
    element: &str,
    text: &str,
    loc: &mut Option<String>,
    lastmod: &mut Option<DateTime<Utc>>,
) {
    match element {
        "loc" if !text.is_empty() => *loc = Some(text.to_owned()),
        "lastmod" => *lastmod = crate::timestamp::parse(text),
        _ => {}
    }
}

/// Normalizes URLs; the first occurrence keeps its position and the latest
/// `lastmod` among duplicates wins.
fn dedupe_entries(entries: Vec<SitemapEntry>) -> Vec<SitemapEntry> {
    let mut out: Vec<SitemapEntry> = Vec::with_capacity(entries.len());
    let mut index_by_url: HashMap<String, usize> = HashMap::new();

    for entry in entries {
        let url = normalize_url(&entry.url);
        match index_by_url.get(&url) {
            Some(&idx) => {
                let existing = &mut out[idx];
                if entry.lastmod > existing.lastmod {
                    existing.lastmod = entry.lastmod;
                }
            }
            None => {
                index_by_url.insert(url.clone(), out.len());
                out.push(SitemapEntry {
                    url,
                    lastmod: entry.lastmod,
                });
            }
        }
    }
    out
}
