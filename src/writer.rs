use std::path::PathBuf;

use anyhow::Context as _;
use chrono::Utc;
use sha2::Digest as _;

use crate::gateway::ScrapedPage;
use crate::ledger::{Ledger, LedgerEntry};
use crate::urls::normalize_url;

pub const INDEX_FILE_NAME: &str = "INDEX.md";

const MAX_STEM_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedPage {
    pub url: String,
    pub file: String,
    pub path: PathBuf,
    pub bytes: u64,
    /// The URL was already in the ledger before this save.
    pub replaced: bool,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub saved: Vec<SavedPage>,
    pub failures: Vec<(String, String)>,
}

/// Writes `page` as markdown under the ledger directory and records it.
///
/// The ledger is updated in memory only; callers persist it once per batch.
pub fn save_page(ledger: &mut Ledger, page: &ScrapedPage) -> anyhow::Result<SavedPage> {
    let url = normalize_url(&page.url);
    if url.is_empty() {
        anyhow::bail!("scraped page has no url");
    }

    let title = page
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty());
    let stem = file_stem_for(&url, title);
    let file = choose_file_name(ledger, &url, &stem)?;
    let path = ledger.dir().join(&file);

    let content = render_markdown(&url, title.unwrap_or("Untitled"), &page.markdown);
    std::fs::write(&path, content.as_bytes())
        .with_context(|| format!("write page: {}", path.display()))?;

    let previous = ledger.upsert(
        &url,
        LedgerEntry {
            file: file.clone(),
            scraped_at: Utc::now(),
            file_size: content.len() as u64,
            title: title.map(str::to_owned),
        },
    );

    if let Some(previous) = previous.as_ref()
        && previous.file != file
        && ledger.owner_of_file(&previous.file).is_none()
    {
        let stale = ledger.dir().join(&previous.file);
        if let Err(err) = std::fs::remove_file(&stale)
            && err.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %stale.display(), %err, "remove renamed page");
        }
    }

    tracing::info!(%url, file = %file, words = page.word_count(), "saved page");
    Ok(SavedPage {
        url,
        file,
        path,
        bytes: content.len() as u64,
        replaced: previous.is_some(),
    })
}

/// Saves every page, collecting per-page failures instead of stopping.
pub fn save_pages(ledger: &mut Ledger, pages: &[ScrapedPage]) -> BatchReport {
    let mut report = BatchReport::default();
    let total = pages.len();
    for (idx, page) in pages.iter().enumerate() {
        tracing::debug!(page = idx + 1, total, url = %page.url, "saving page");
        match save_page(ledger, page) {
            Ok(saved) => report.saved.push(saved),
            Err(err) => {
                tracing::warn!(url = %page.url, error = %format!("{err:#}"), "page save failed");
                report.failures.push((page.url.clone(), format!("{err:#}")));
            }
        }
    }
    report
}

pub fn render_markdown(url: &str, title: &str, body: &str) -> String {
    format!("# {title}\n\n**Source:** {url}\n\n---\n\n{body}")
}

/// Regenerates `INDEX.md` from the ledger, sorted by file name.
pub fn write_index(ledger: &Ledger) -> anyhow::Result<PathBuf> {
    let mut rows: Vec<(&str, &str, &str)> = ledger
        .pages()
        .iter()
        .filter(|(_, entry)| !entry.file.eq_ignore_ascii_case(INDEX_FILE_NAME))
        .map(|(url, entry)| {
            let title = entry
                .title
                .as_deref()
                .unwrap_or_else(|| entry.file.trim_end_matches(".md"));
            (entry.file.as_str(), title, url.as_str())
        })
        .collect();
    rows.sort_by(|a, b| a.0.cmp(b.0));

    let mut content = String::from("# Index\n\n");
    content.push_str(&format!("Total pages: {}\n\n---\n\n", rows.len()));
    for (file, title, url) in rows {
        let title = title.replace('[', "\\[").replace(']', "\\]");
        content.push_str(&format!("- [{title}](./{file}) - {url}\n"));
    }

    let path = ledger.dir().join(INDEX_FILE_NAME);
    std::fs::write(&path, content).with_context(|| format!("write index: {}", path.display()))?;
    tracing::debug!(path = %path.display(), "index written");
    Ok(path)
}

fn choose_file_name(ledger: &Ledger, url: &str, stem: &str) -> anyhow::Result<String> {
    let candidate = format!("{stem}.md");
    if !is_taken(ledger, url, &candidate) {
        return Ok(candidate);
    }

    let suffixed = format!("{stem}-{}.md", short_hash(url));
    if is_taken(ledger, url, &suffixed) {
        anyhow::bail!("cannot find a free file name for {url} (tried {candidate}, {suffixed})");
    }
    tracing::debug!(%url, %candidate, file = %suffixed, "file name collision");
    Ok(suffixed)
}

fn is_taken(ledger: &Ledger, url: &str, file: &str) -> bool {
    if file.eq_ignore_ascii_case(INDEX_FILE_NAME) {
        return true;
    }
    match ledger.owner_of_file(file) {
        Some(owner) => owner != url,
        None => ledger.dir().join(file).exists(),
    }
}

fn short_hash(url: &str) -> String {
    let digest = sha2::Sha256::digest(url.as_bytes());
    hex::encode(digest)[..8].to_owned()
}

/// Derives the file stem from the title, else the last URL path segment,
/// else the host.
pub fn file_stem_for(url: &str, title: Option<&str>) -> String {
    let from_title = title.and_then(sanitize_file_stem);
    let from_url = || {
        let parsed = url::Url::parse(url).ok()?;
        let segment = parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(str::to_owned));
        segment
            .and_then(|segment| sanitize_file_stem(&segment))
            .or_else(|| parsed.host_str().and_then(sanitize_file_stem))
    };

    let stem = from_title
        .or_else(from_url)
        .unwrap_or_else(|| "untitled".to_owned());
    let lower = stem.to_ascii_lowercase();
    match lower.strip_suffix(".md") {
        Some(rest) if !rest.is_empty() => stem[..rest.len()].to_owned(),
        _ => stem,
    }
}

pub fn sanitize_file_stem(text: &str) -> Option<String> {
    let replaced: String = text
        .chars()
        .map(|ch| match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '-',
            ch if ch.is_control() => ' ',
            ch => ch,
        })
        .collect();
    let trimmed = replaced.trim_matches(|ch: char| ch == '.' || ch.is_whitespace());
    let truncated: String = trimmed.chars().take(MAX_STEM_CHARS).collect();

    let mut out = String::with_capacity(truncated.len());
    let mut in_run = false;
    for ch in truncated.chars() {
        if ch == '-' || ch.is_whitespace() {
            if !in_run {
                out.push('-');
                in_run = true;
            }
        } else {
            out.push(ch);
            in_run = false;
        }
    }

    let out = out.trim_matches('-').to_owned();
    (!out.is_empty()).then_some(out)
}
