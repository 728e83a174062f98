use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use chrono::Utc;

use crate::cli::{CrawlArgs, FetchArgs, GatewayArgs};
use crate::gateway::{CrawlRequest, CrawlState, Gateway, GatewayError, ScrapedPage};
use crate::ledger::Ledger;
use crate::urls::parse_http_url;
use crate::writer::{SavedPage, save_pages, write_index};

/// How a crawl job is waited on.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
    /// Extra polls granted when a job reports `completed` with no data yet
    /// while its `total` says pages exist.
    pub empty_result_retries: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
            empty_result_retries: 3,
        }
    }
}

impl PollSettings {
    pub fn from_secs(interval: u64, timeout: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval.max(1)),
            timeout: Duration::from_secs(timeout),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub enum CrawlOutcome {
    Completed {
        job_id: String,
        pages: Vec<ScrapedPage>,
    },
    Failed {
        job_id: String,
        error: String,
    },
    TimedOut {
        job_id: String,
        waited: Duration,
    },
}

#[derive(Debug)]
pub struct CrawlReport {
    pub job_id: String,
    pub saved: Vec<SavedPage>,
    pub failures: Vec<(String, String)>,
    pub index: PathBuf,
}

/// Polls `job_id` until it completes, fails, or `settings.timeout` elapses.
///
/// Status request errors are returned as-is; the job is not retried.
pub fn wait_for_crawl(
    gateway: &dyn Gateway,
    job_id: &str,
    settings: &PollSettings,
) -> Result<CrawlOutcome, GatewayError> {
    let started = Instant::now();
    let mut empty_polls = 0_u32;

    loop {
        let status = gateway.crawl_status(job_id)?;
        match status.state {
            CrawlState::Completed => {
                let waiting_for_data = status.pages.is_empty()
                    && status.total > 0
                    && empty_polls < settings.empty_result_retries
                    && started.elapsed() < settings.timeout;
                if !waiting_for_data {
                    return Ok(CrawlOutcome::Completed {
                        job_id: job_id.to_owned(),
                        pages: status.pages,
                    });
                }
                empty_polls += 1;
                tracing::info!(
                    job_id,
                    total = status.total,
                    attempt = empty_polls,
                    "crawl completed without data; polling again"
                );
            }
            CrawlState::Failed => {
                return Ok(CrawlOutcome::Failed {
                    job_id: job_id.to_owned(),
                    error: status
                        .error
                        .unwrap_or_else(|| format!("job status `{}`", status.raw_status)),
                });
            }
            CrawlState::Pending | CrawlState::Running => {
                tracing::info!(
                    job_id,
                    status = %status.raw_status,
                    completed = status.completed,
                    total = status.total,
                    "crawl in progress"
                );
            }
        }

        let elapsed = started.elapsed();
        if elapsed >= settings.timeout {
            return Ok(CrawlOutcome::TimedOut {
                job_id: job_id.to_owned(),
                waited: elapsed,
            });
        }
        std::thread::sleep(settings.interval.min(settings.timeout - elapsed));
    }
}

/// Starts a crawl job and folds its pages into `ledger`.
pub fn crawl_into(
    gateway: &dyn Gateway,
    ledger: &mut Ledger,
    request: &CrawlRequest,
    settings: &PollSettings,
) -> anyhow::Result<CrawlReport> {
    let job_id = gateway
        .start_crawl(request)
        .with_context(|| format!("start crawl: {}", request.url))?;
    tracing::info!(%job_id, url = %request.url, "crawl job started");
    collect_crawl(gateway, ledger, &job_id, settings)
}

/// Waits for an existing job and saves its pages.
///
/// Nothing is written unless the job completes with at least one page. On
/// success the ledger is persisted once and `INDEX.md` regenerated; per-page
/// save failures are returned in the report.
pub fn collect_crawl(
    gateway: &dyn Gateway,
    ledger: &mut Ledger,
    job_id: &str,
    settings: &PollSettings,
) -> anyhow::Result<CrawlReport> {
    let outcome = wait_for_crawl(gateway, job_id, settings)
        .with_context(|| format!("poll crawl job {job_id}"))?;
    let (job_id, pages) = match outcome {
        CrawlOutcome::Completed { job_id, pages } => (job_id, pages),
        CrawlOutcome::Failed { job_id, error } => {
            anyhow::bail!("crawl job {job_id} failed: {error}");
        }
        CrawlOutcome::TimedOut { job_id, waited } => {
            anyhow::bail!(
                "crawl job {job_id} timed out after {}s (job abandoned)",
                waited.as_secs()
            );
        }
    };
    if pages.is_empty() {
        anyhow::bail!("crawl job {job_id} completed without any pages");
    }

    tracing::info!(%job_id, pages = pages.len(), "crawl completed");
    let batch = save_pages(ledger, &pages);
    ledger.mark_crawled(Utc::now());
    ledger.persist().context("persist ledger")?;
    let index = write_index(ledger).context("write index")?;

    Ok(CrawlReport {
        job_id,
        saved: batch.saved,
        failures: batch.failures,
        index,
    })
}

pub fn print_report(report: &CrawlReport, out_dir: &Path) {
    println!(
        "Crawl {} complete: {} pages saved to {}",
        report.job_id,
        report.saved.len(),
        out_dir.display()
    );
    for saved in &report.saved {
        println!("  {} <- {}", saved.file, saved.url);
    }
    for (url, error) in &report.failures {
        println!("  FAILED {url}: {error}");
    }
    println!("Index: {}", report.index.display());
}

pub fn run(gateway_args: &GatewayArgs, out_dir: &Path, args: CrawlArgs) -> anyhow::Result<()> {
    let start_url = parse_http_url(&args.url)?;
    let client = gateway_args.client()?;
    let mut ledger = Ledger::open(out_dir).context("open ledger")?;

    let request = CrawlRequest {
        url: start_url.to_string(),
        max_depth: args.max_depth,
        limit: args.limit,
        only_main_content: !args.full_content,
    };
    let settings = PollSettings::from_secs(args.poll_interval, args.timeout);

    let report = crawl_into(&client, &mut ledger, &request, &settings)?;
    finish(&report, out_dir)
}

/// Saves the pages of a job started earlier, e.g. one a crawl gave up on.
pub fn run_fetch(gateway_args: &GatewayArgs, out_dir: &Path, args: FetchArgs) -> anyhow::Result<()> {
    let client = gateway_args.client()?;
    let mut ledger = Ledger::open(out_dir).context("open ledger")?;
    let settings = PollSettings::from_secs(args.poll_interval, args.timeout);

    let report = collect_crawl(&client, &mut ledger, &args.job_id, &settings)?;
    finish(&report, out_dir)
}

fn finish(report: &CrawlReport, out_dir: &Path) -> anyhow::Result<()> {
    print_report(report, out_dir);
    if !report.failures.is_empty() {
        anyhow::bail!("{} of the crawled pages could not be saved", report.failures.len());
    }
    Ok(())
}
