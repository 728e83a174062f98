use std::path::Path;

use anyhow::Context as _;
use chrono::Utc;

use crate::cli::{GatewayArgs, ScrapeArgs};
use crate::gateway::{Gateway, ScrapeOptions};
use crate::ledger::Ledger;
use crate::urls::parse_http_url;
use crate::writer::{SavedPage, save_page, write_index};

/// Fetches one page, saves it and persists the ledger.
pub fn scrape_into(
    gateway: &dyn Gateway,
    ledger: &mut Ledger,
    url: &str,
    options: &ScrapeOptions,
) -> anyhow::Result<SavedPage> {
    let page = gateway
        .scrape(url, options)
        .with_context(|| format!("scrape {url}"))?;
    if page.markdown.trim().is_empty() {
        tracing::warn!(%url, "page has no markdown content");
    }
    let saved = save_page(ledger, &page).context("save page")?;
    ledger.mark_crawled(Utc::now());
    ledger.persist().context("persist ledger")?;
    write_index(ledger).context("write index")?;
    Ok(saved)
}

pub fn run(gateway_args: &GatewayArgs, out_dir: &Path, args: ScrapeArgs) -> anyhow::Result<()> {
    let url = parse_http_url(&args.url)?;
    let client = gateway_args.client()?;
    let mut ledger = Ledger::open(out_dir).context("open ledger")?;
    let options = ScrapeOptions {
        only_main_content: !args.full_content,
        wait_for_ms: args.wait_for,
    };

    let saved = scrape_into(&client, &mut ledger, url.as_str(), &options)?;
    let verb = if saved.replaced { "Updated" } else { "Saved" };
    println!("{verb}: {} ({} bytes)", saved.path.display(), saved.bytes);
    Ok(())
}
