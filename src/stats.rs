use std::fmt::Write as _;
use std::path::Path;

use crate::cli::StatsArgs;
use crate::ledger::Ledger;

const MAX_DETAIL_ENTRIES: usize = 20;

pub fn render(ledger: &Ledger, details: bool) -> String {
    let mut out = String::new();
    let size_mb = ledger.total_size() as f64 / (1024.0 * 1024.0);
    let last_crawl = ledger
        .last_crawl()
        .map_or_else(|| "never".to_owned(), |at| at.to_rfc3339());

    let _ = writeln!(out, "Scraped pages in {}", ledger.dir().display());
    let _ = writeln!(out, "Total pages: {}", ledger.len());
    let _ = writeln!(out, "Total size: {size_mb:.2} MB");
    let _ = writeln!(out, "Last crawl: {last_crawl}");

    if details && !ledger.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Pages:");
        for (url, entry) in ledger.pages().iter().take(MAX_DETAIL_ENTRIES) {
            let _ = writeln!(out, "  - {url}");
            let _ = writeln!(out, "    File: {}", entry.file);
            let _ = writeln!(out, "    Scraped: {}", entry.scraped_at.to_rfc3339());
        }
        if ledger.len() > MAX_DETAIL_ENTRIES {
            let _ = writeln!(out, "  ... and {} more pages", ledger.len() - MAX_DETAIL_ENTRIES);
        }
    }
    out
}

pub fn run(out_dir: &Path, args: StatsArgs) -> anyhow::Result<()> {
    let ledger = Ledger::load(out_dir)?;
    print!("{}", render(&ledger, args.details));
    Ok(())
}
