use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_API_URL, DEFAULT_OUTPUT_DIR, DEFAULT_SECTIONS_CONFIG, GatewayConfig};
use crate::gateway::FirecrawlClient;

#[derive(Debug, Parser)]
#[command(author, version, about = "Scrape pages through Firecrawl into markdown files")]
pub struct Cli {
    #[command(flatten)]
    pub gateway: GatewayArgs,

    /// Output directory for markdown files and the scrape ledger.
    #[arg(short, long, env = "OUTPUT_DIR", default_value = DEFAULT_OUTPUT_DIR, global = true)]
    pub output: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct GatewayArgs {
    /// Firecrawl API base URL.
    #[arg(long, env = "FIRECRAWL_API_URL", default_value = DEFAULT_API_URL, global = true)]
    pub api_url: String,

    /// Bearer token sent to the Firecrawl API.
    #[arg(long, env = "FIRECRAWL_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,
}

impl GatewayArgs {
    pub fn config(&self) -> GatewayConfig {
        GatewayConfig::new(&self.api_url, self.api_key.as_deref())
    }

    pub fn client(&self) -> anyhow::Result<FirecrawlClient> {
        FirecrawlClient::new(self.config())
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scrape a single page.
    Scrape(ScrapeArgs),
    /// Crawl a site and save every page.
    Crawl(CrawlArgs),
    /// Compare the sitemap with the ledger and optionally re-scrape stale pages.
    Update(UpdateArgs),
    /// Show ledger statistics for the output directory.
    Stats(StatsArgs),
    /// Check that the Firecrawl API is reachable.
    Health,
    /// Show the status of a crawl job.
    Status(StatusArgs),
    /// Save the pages of an earlier crawl job into the output directory.
    Fetch(FetchArgs),
}

#[derive(Debug, Args)]
pub struct ScrapeArgs {
    /// Page URL (must be http/https).
    pub url: String,

    /// Keep navigation, headers and footers instead of only the main content.
    #[arg(long)]
    pub full_content: bool,

    /// Milliseconds to wait for the page to load before scraping.
    #[arg(long, value_name = "MS")]
    pub wait_for: Option<u64>,
}

#[derive(Debug, Args)]
pub struct CrawlArgs {
    /// Start URL (must be http/https).
    pub url: String,

    /// Maximum link depth to traverse.
    #[arg(long, default_value_t = 2)]
    pub max_depth: u32,

    /// Maximum pages to retrieve.
    #[arg(long, default_value_t = 10)]
    pub limit: u32,

    /// Keep navigation, headers and footers instead of only the main content.
    #[arg(long)]
    pub full_content: bool,

    /// Seconds to wait for the crawl job before giving up.
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,

    /// Seconds between crawl status polls.
    #[arg(long, default_value_t = 5)]
    pub poll_interval: u64,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    /// Site or section URL whose sitemap is compared with the ledger.
    pub url: String,

    /// List the URLs that need a scrape.
    #[arg(long)]
    pub show_urls: bool,

    /// Re-scrape new and changed pages.
    #[arg(long)]
    pub auto_update: bool,

    /// Keep navigation, headers and footers instead of only the main content.
    #[arg(long)]
    pub full_content: bool,
}

#[derive(Debug, Args)]
pub struct StatsArgs {
    /// List individual ledger entries.
    #[arg(long)]
    pub details: bool,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Crawl job id returned when the crawl was started.
    pub job_id: String,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Crawl job id returned when the crawl was started.
    pub job_id: String,

    /// Seconds to wait for the job to finish.
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,

    /// Seconds between status checks.
    #[arg(long, default_value_t = 5)]
    pub poll_interval: u64,
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Crawl and update the configured site sections")]
pub struct SectionsCli {
    /// Section registry file.
    #[arg(long, env = "SECTIONS_CONFIG", default_value = DEFAULT_SECTIONS_CONFIG, global = true)]
    pub config: PathBuf,

    #[command(flatten)]
    pub gateway: GatewayArgs,

    #[command(subcommand)]
    pub command: SectionsCommand,
}

#[derive(Debug, Subcommand)]
pub enum SectionsCommand {
    /// List the configured sections.
    List,
    /// Crawl one section.
    Crawl(SectionCrawlArgs),
    /// Crawl every section in turn.
    CrawlAll(SectionCrawlAllArgs),
    /// Check one section for new and changed pages.
    Update(SectionUpdateArgs),
}

#[derive(Debug, Args)]
pub struct SectionCrawlArgs {
    /// Section key from the registry.
    pub section: String,

    /// Output directory (default: the section's `output_dir`).
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Maximum link depth (default: configured or detected from the sitemap).
    #[arg(long)]
    pub max_depth: Option<u32>,

    /// Maximum pages (default: configured or detected from the sitemap).
    #[arg(long)]
    pub limit: Option<u32>,

    /// Seconds to wait for the crawl job (default: configured or estimated).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Seconds between crawl status polls.
    #[arg(long, default_value_t = 5)]
    pub poll_interval: u64,
}

#[derive(Debug, Args)]
pub struct SectionCrawlAllArgs {
    /// Seconds between crawl status polls.
    #[arg(long, default_value_t = 5)]
    pub poll_interval: u64,
}

#[derive(Debug, Args)]
pub struct SectionUpdateArgs {
    /// Section key from the registry.
    pub section: String,

    /// Output directory (default: the section's `output_dir`).
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// List the URLs that need a scrape.
    #[arg(long)]
    pub show_urls: bool,

    /// Re-scrape new and changed pages.
    #[arg(long)]
    pub auto_update: bool,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;

    use super::*;

    #[test]
    fn cli_definitions_are_consistent() {
        Cli::command().debug_assert();
        SectionsCli::command().debug_assert();
    }

    #[test]
    fn crawl_defaults() {
        let cli = Cli::try_parse_from(["firecrawl-md", "crawl", "https://s.com"]).unwrap();
        let Command::Crawl(args) = cli.command else {
            panic!("expected crawl");
        };
        assert_eq!(args.max_depth, 2);
        assert_eq!(args.limit, 10);
        assert_eq!(args.timeout, 300);
        assert_eq!(args.poll_interval, 5);
        assert!(!args.full_content);
    }

    #[test]
    fn flags_override_environment_defaults() {
        let cli = Cli::try_parse_from([
            "firecrawl-md",
            "stats",
            "--api-url",
            "http://fc.local:9999",
            "-o",
            "out/docs",
        ])
        .unwrap();
        assert_eq!(cli.gateway.api_url, "http://fc.local:9999");
        assert_eq!(cli.output, PathBuf::from("out/docs"));
    }

    #[test]
    fn sections_update_flags() {
        let cli = SectionsCli::try_parse_from([
            "firecrawl-sections",
            "update",
            "about",
            "--show-urls",
            "--auto-update",
        ])
        .unwrap();
        let SectionsCommand::Update(args) = cli.command else {
            panic!("expected update");
        };
        assert_eq!(args.section, "about");
        assert!(args.show_urls && args.auto_update);
        assert!(args.output.is_none());
    }
}
