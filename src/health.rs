use anyhow::Context as _;

use crate::cli::{GatewayArgs, StatusArgs};
use crate::gateway::{CrawlStatus, Gateway as _, Health};

const MAX_LISTED_PAGES: usize = 5;

pub fn run_health(gateway_args: &GatewayArgs) -> anyhow::Result<()> {
    let client = gateway_args.client()?;
    let api_url = client.config().api_url.clone();
    println!("Checking Firecrawl API at {api_url}");

    let health = client
        .check_health()
        .with_context(|| format!("firecrawl api unreachable at {api_url}"))?;
    match health {
        Health::Healthy { endpoint } => println!("Firecrawl API is healthy ({endpoint})"),
        Health::Reachable { endpoint } => {
            println!("Firecrawl API is reachable at {endpoint} (no health endpoint)");
        }
    }
    Ok(())
}

pub fn render_status(job_id: &str, status: &CrawlStatus) -> String {
    let mut lines = vec![format!(
        "Job {job_id}: {} ({}/{} pages)",
        status.raw_status, status.completed, status.total
    )];
    if let Some(error) = status.error.as_deref() {
        lines.push(format!("Error: {error}"));
    }
    lines.push(format!("Pages returned: {}", status.pages.len()));
    for (idx, page) in status.pages.iter().take(MAX_LISTED_PAGES).enumerate() {
        let title = page.title.as_deref().unwrap_or("(untitled)");
        lines.push(format!("  {}. {title} - {}", idx + 1, page.url));
    }
    if status.pages.len() > MAX_LISTED_PAGES {
        lines.push(format!(
            "  ... and {} more",
            status.pages.len() - MAX_LISTED_PAGES
        ));
    }
    lines.join("\n")
}

pub fn run_status(gateway_args: &GatewayArgs, args: StatusArgs) -> anyhow::Result<()> {
    let client = gateway_args.client()?;
    let status = client
        .crawl_status(&args.job_id)
        .with_context(|| format!("get status of crawl job {}", args.job_id))?;
    println!("{}", render_status(&args.job_id, &status));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{CrawlState, PageMetadata, ScrapedPage};

    #[test]
    fn status_lists_first_pages() {
        let pages = (1..=7)
            .map(|idx| ScrapedPage {
                url: format!("https://s.com/{idx}"),
                title: (idx != 2).then(|| format!("Page {idx}")),
                markdown: String::new(),
                metadata: PageMetadata::default(),
            })
            .collect();
        let status = CrawlStatus {
            state: CrawlState::Completed,
            raw_status: "completed".to_owned(),
            total: 7,
            completed: 7,
            pages,
            error: None,
        };

        let text = render_status("job-9", &status);
        assert!(text.starts_with("Job job-9: completed (7/7 pages)"));
        assert!(text.contains("  2. (untitled) - https://s.com/2"));
        assert!(text.contains("  5. Page 5 - https://s.com/5"));
        assert!(!text.contains("https://s.com/6"));
        assert!(text.ends_with("  ... and 2 more"));
    }

    #[test]
    fn failed_status_shows_error() {
        let status = CrawlStatus {
            state: CrawlState::Failed,
            raw_status: "failed".to_owned(),
            total: 0,
            completed: 0,
            pages: Vec::new(),
            error: Some("blocked".to_owned()),
        };
        let text = render_status("j", &status);
        assert!(text.contains("Error: blocked"));
        assert!(text.contains("Pages returned: 0"));
    }
}
