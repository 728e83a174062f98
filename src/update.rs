use std::path::Path;

use anyhow::Context as _;
use chrono::Utc;
use url::Url;

use crate::cli::{GatewayArgs, UpdateArgs};
use crate::detect::{ChangeReport, detect_changes};
use crate::gateway::{Gateway, ScrapeOptions};
use crate::ledger::Ledger;
use crate::sitemap::SitemapReader;
use crate::urls::{PathScope, origin_of, parse_http_url};
use crate::writer::{BatchReport, save_page, write_index};

const MAX_LISTED_URLS: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub show_urls: bool,
    pub auto_update: bool,
    pub scrape: ScrapeOptions,
}

#[derive(Debug)]
pub struct UpdatePlan {
    pub origin: String,
    pub scope: Option<PathScope>,
    /// No sitemap entry could be read, so staleness is unknown.
    pub unavailable: bool,
    pub sitemap_failures: Vec<String>,
    pub report: ChangeReport,
}

/// Reads the sitemap of `site_url`'s origin and classifies the entries under
/// its path against the ledger.
pub fn plan_update(
    reader: &SitemapReader,
    ledger: &Ledger,
    site_url: &Url,
) -> anyhow::Result<UpdatePlan> {
    let origin = origin_of(site_url)?;
    let scope = PathScope::for_url(site_url);
    let fetch = reader.fetch(&origin);
    let report = detect_changes(&fetch.entries, ledger.pages(), scope.as_ref());
    tracing::info!(
        %origin,
        scope = scope.as_ref().map(PathScope::prefix).unwrap_or("/"),
        new = report.counts.new,
        changed = report.counts.changed,
        undated = report.counts.undated,
        up_to_date = report.counts.up_to_date,
        "change detection finished"
    );

    Ok(UpdatePlan {
        origin,
        scope,
        unavailable: fetch.is_unavailable(),
        sitemap_failures: fetch.failures,
        report,
    })
}

/// Scrapes `urls` one at a time and saves each page.
///
/// Per-URL failures are collected. A gateway outage stops the batch, but pages
/// saved before it are still persisted.
pub fn rescrape(
    gateway: &dyn Gateway,
    ledger: &mut Ledger,
    urls: &[String],
    options: &ScrapeOptions,
) -> anyhow::Result<BatchReport> {
    let mut report = BatchReport::default();
    let mut outage = None;

    for (idx, url) in urls.iter().enumerate() {
        println!("[{}/{}] Scraping: {url}", idx + 1, urls.len());
        let page = match gateway.scrape(url, options) {
            Ok(page) => page,
            Err(err) if err.is_outage() => {
                outage = Some(err);
                break;
            }
            Err(err) => {
                tracing::warn!(%url, %err, "scrape failed");
                report.failures.push((url.clone(), err.to_string()));
                continue;
            }
        };
        match save_page(ledger, &page) {
            Ok(saved) => report.saved.push(saved),
            Err(err) => {
                tracing::warn!(%url, error = %format!("{err:#}"), "save failed");
                report.failures.push((url.clone(), format!("{err:#}")));
            }
        }
    }

    if !report.saved.is_empty() {
        ledger.mark_crawled(Utc::now());
        ledger.persist().context("persist ledger")?;
        write_index(ledger).context("write index")?;
    }

    if let Some(err) = outage {
        return Err(anyhow::Error::new(err).context(format!(
            "update aborted after {} of {} pages",
            report.saved.len(),
            urls.len()
        )));
    }
    Ok(report)
}

pub fn print_plan(plan: &UpdatePlan, ledger: &Ledger, show_urls: bool) {
    let scope = plan.scope.as_ref().map(PathScope::prefix).unwrap_or("/");
    println!("Checking for updates on: {} (path {scope})", plan.origin);
    println!("Output directory: {}", ledger.dir().display());
    println!("Previously scraped: {} pages", ledger.len());
    for failure in &plan.sitemap_failures {
        println!("Sitemap problem: {failure}");
    }
    if plan.unavailable {
        println!("Cannot determine staleness: sitemap unavailable. 0 pages need updating.");
        return;
    }

    let counts = plan.report.counts;
    println!(
        "Found {} pages that need updating (new {}, changed {}, unknown {}, up to date {})",
        counts.stale(),
        counts.new,
        counts.changed,
        counts.undated,
        counts.up_to_date
    );

    if show_urls {
        let stale: Vec<_> = plan
            .report
            .items
            .iter()
            .filter(|(_, class)| class.needs_scrape())
            .collect();
        for (url, class) in stale.iter().take(MAX_LISTED_URLS) {
            println!("  - {url} ({})", class.label());
        }
        if stale.len() > MAX_LISTED_URLS {
            println!("  ... and {} more", stale.len() - MAX_LISTED_URLS);
        }
    }
}

/// Full update flow for one site URL and output directory.
pub fn update_site(
    gateway_args: &GatewayArgs,
    out_dir: &Path,
    site_url: &Url,
    options: &UpdateOptions,
) -> anyhow::Result<()> {
    let mut ledger = Ledger::open(out_dir).context("open ledger")?;
    let reader = SitemapReader::new()?;
    let plan = plan_update(&reader, &ledger, site_url)?;
    print_plan(&plan, &ledger, options.show_urls);

    let stale = plan.report.stale_urls();
    if plan.unavailable {
        return Ok(());
    }
    if stale.is_empty() {
        println!("All pages are up to date.");
        return Ok(());
    }
    if !options.auto_update {
        println!(
            "Run with --auto-update to scrape these {} pages",
            stale.len()
        );
        return Ok(());
    }

    let client = gateway_args.client()?;
    let batch = rescrape(&client, &mut ledger, &stale, &options.scrape)?;
    println!("Update complete.");
    println!("  Updated: {}", batch.saved.len());
    println!("  Failed: {}", batch.failures.len());
    for (url, error) in &batch.failures {
        println!("  FAILED {url}: {error}");
    }
    if !batch.failures.is_empty() {
        anyhow::bail!("{} of {} pages failed to update", batch.failures.len(), stale.len());
    }
    Ok(())
}

pub fn run(gateway_args: &GatewayArgs, out_dir: &Path, args: UpdateArgs) -> anyhow::Result<()> {
    let site_url = parse_http_url(&args.url)?;
    let options = UpdateOptions {
        show_urls: args.show_urls,
        auto_update: args.auto_update,
        scrape: ScrapeOptions {
            only_main_content: !args.full_content,
            ..ScrapeOptions::default()
        },
    };
    update_site(gateway_args, out_dir, &site_url, &options)
}
