use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::urls::normalize_url;

pub const LEDGER_FILE_NAME: &str = ".scrape_metadata.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// File name relative to the section output directory.
    pub file: String,
    #[serde(with = "crate::timestamp::lenient")]
    pub scraped_at: DateTime<Utc>,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct LedgerDocument {
    #[serde(default)]
    pages: BTreeMap<String, LedgerEntry>,
    #[serde(default, with = "crate::timestamp::lenient::option")]
    last_crawl: Option<DateTime<Utc>>,
}

/// Per-directory record of which URLs were scraped, when, and into which file.
///
/// Loaded once per command and rewritten whole by [`Ledger::persist`].
#[derive(Debug, Clone)]
pub struct Ledger {
    dir: PathBuf,
    pages: BTreeMap<String, LedgerEntry>,
    last_crawl: Option<DateTime<Utc>>,
}

impl Ledger {
    pub fn empty(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pages: BTreeMap::new(),
            last_crawl: None,
        }
    }

    /// Opens the ledger of `dir`, creating the directory when needed.
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create output dir: {}", dir.display()))?;
        Self::load(dir)
    }

    /// Reads the ledger of `dir`; a missing file is an empty ledger.
    pub fn load(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        let path = dir.join(LEDGER_FILE_NAME);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no ledger yet");
                return Ok(Self::empty(dir));
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read ledger: {}", path.display()));
            }
        };
        let document: LedgerDocument = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse ledger: {}", path.display()))?;

        let mut ledger = Self::empty(dir);
        ledger.last_crawl = document.last_crawl;
        for (url, entry) in document.pages {
            ledger.merge_loaded(&url, entry);
        }
        tracing::debug!(path = %path.display(), pages = ledger.pages.len(), "ledger loaded");
        Ok(ledger)
    }

    // Older files may hold both `.../a` and `.../a/`, and store the file as a
    // path including the output directory. The later scrape wins.
    fn merge_loaded(&mut self, url: &str, mut entry: LedgerEntry) {
        if let Some(name) = Path::new(&entry.file).file_name().and_then(|n| n.to_str())
            && name != entry.file
        {
            entry.file = name.to_owned();
        }
        let key = normalize_url(url);
        match self.pages.get(&key) {
            Some(existing) if existing.scraped_at >= entry.scraped_at => {}
            _ => {
                self.pages.insert(key, entry);
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE_NAME)
    }

    pub fn pages(&self) -> &BTreeMap<String, LedgerEntry> {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn last_crawl(&self) -> Option<DateTime<Utc>> {
        self.last_crawl
    }

    pub fn get(&self, url: &str) -> Option<&LedgerEntry> {
        self.pages.get(&normalize_url(url))
    }

    /// URL currently owning `file`, if any. Compared case-insensitively so
    /// names stay distinct on case-folding filesystems.
    pub fn owner_of_file(&self, file: &str) -> Option<&str> {
        self.pages
            .iter()
            .find(|(_, entry)| entry.file.eq_ignore_ascii_case(file))
            .map(|(url, _)| url.as_str())
    }

    /// Inserts or replaces the entry for `url`, returning the previous one.
    pub fn upsert(&mut self, url: &str, entry: LedgerEntry) -> Option<LedgerEntry> {
        self.pages.insert(normalize_url(url), entry)
    }

    pub fn mark_crawled(&mut self, at: DateTime<Utc>) {
        self.last_crawl = Some(at);
    }

    pub fn total_size(&self) -> u64 {
        self.pages.values().map(|entry| entry.file_size).sum()
    }

    /// Rewrites the whole ledger file through a temp file and rename.
    ///
    /// Entries whose markdown file no longer exists are dropped first.
    pub fn persist(&mut self) -> anyhow::Result<()> {
        let dir = self.dir.clone();
        self.pages.retain(|url, entry| {
            let exists = dir.join(&entry.file).is_file();
            if !exists {
                tracing::warn!(%url, file = %entry.file, "dropping ledger entry without file");
            }
            exists
        });

        let document = LedgerDocument {
            pages: self.pages.clone(),
            last_crawl: self.last_crawl,
        };
        let path = self.path();
        write_json_atomic(&path, &document)
            .with_context(|| format!("write ledger: {}", path.display()))?;
        tracing::debug!(path = %path.display(), pages = self.pages.len(), "ledger persisted");
        Ok(())
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    std::fs::write(&tmp_path, &data)
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    if let Err(err) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err).with_context(|| format!("rename tmp to final: {}", path.display()));
    }
    Ok(())
}
