//! Sitemap-versus-ledger staleness classification.

use std::collections::BTreeMap;

use crate::ledger::LedgerEntry;
use crate::sitemap::SitemapEntry;
use crate::urls::{PathScope, normalize_url};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Not in the ledger yet.
    New,
    /// `lastmod` is newer than the recorded scrape.
    Changed,
    /// Ledgered but the sitemap gives no `lastmod`; left alone.
    Undated,
    UpToDate,
}

impl Classification {
    pub fn needs_scrape(self) -> bool {
        matches!(self, Self::New | Self::Changed)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Changed => "changed",
            Self::Undated => "unknown, skip",
            Self::UpToDate => "up to date",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeCounts {
    pub new: usize,
    pub changed: usize,
    pub undated: usize,
    pub up_to_date: usize,
}

impl ChangeCounts {
    pub fn stale(&self) -> usize {
        self.new + self.changed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeReport {
    /// Every considered sitemap URL, in sitemap order.
    pub items: Vec<(String, Classification)>,
    pub counts: ChangeCounts,
}

impl ChangeReport {
    /// URLs needing a scrape, in sitemap order.
    pub fn stale_urls(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|(_, class)| class.needs_scrape())
            .map(|(url, _)| url.clone())
            .collect()
    }

    pub fn classification_of(&self, url: &str) -> Option<Classification> {
        let url = normalize_url(url);
        self.items
            .iter()
            .find(|(candidate, _)| *candidate == url)
            .map(|(_, class)| *class)
    }
}

pub fn classify(entry: &SitemapEntry, recorded: Option<&LedgerEntry>) -> Classification {
    match (recorded, entry.lastmod) {
        (None, _) => Classification::New,
        (Some(_), None) => Classification::Undated,
        (Some(recorded), Some(lastmod)) if lastmod > recorded.scraped_at => Classification::Changed,
        (Some(_), Some(_)) => Classification::UpToDate,
    }
}

/// Classifies each sitemap URL (optionally only those under `scope`) against
/// the ledger pages.
pub fn detect_changes(
    sitemap: &[SitemapEntry],
    ledger_pages: &BTreeMap<String, LedgerEntry>,
    scope: Option<&PathScope>,
) -> ChangeReport {
    let mut report = ChangeReport::default();

    for entry in sitemap {
        let url = normalize_url(&entry.url);
        if let Some(scope) = scope
            && !scope.contains_url(&url)
        {
            continue;
        }

        let class = classify(entry, ledger_pages.get(&url));
        match class {
            Classification::New => report.counts.new += 1,
            Classification::Changed => report.counts.changed += 1,
            Classification::Undated => report.counts.undated += 1,
            Classification::UpToDate => report.counts.up_to_date += 1,
        }
        report.items.push((url, class));
    }

    report
}
