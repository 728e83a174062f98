use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn try_main() -> anyhow::Result<()> {
    firecrawl_md::logging::init().context("init logging")?;

    let cli = firecrawl_md::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let gateway = &cli.gateway;
    let output = cli.output.as_path();
    match cli.command {
        firecrawl_md::cli::Command::Scrape(args) => {
            firecrawl_md::scrape::run(gateway, output, args).context("scrape")?;
        }
        firecrawl_md::cli::Command::Crawl(args) => {
            firecrawl_md::crawl::run(gateway, output, args).context("crawl")?;
        }
        firecrawl_md::cli::Command::Update(args) => {
            firecrawl_md::update::run(gateway, output, args).context("update")?;
        }
        firecrawl_md::cli::Command::Stats(args) => {
            firecrawl_md::stats::run(output, args).context("stats")?;
        }
        firecrawl_md::cli::Command::Health => {
            firecrawl_md::health::run_health(gateway).context("health")?;
        }
        firecrawl_md::cli::Command::Status(args) => {
            firecrawl_md::health::run_status(gateway, args).context("status")?;
        }
        firecrawl_md::cli::Command::Fetch(args) => {
            firecrawl_md::crawl::run_fetch(gateway, output, args).context("fetch")?;
        }
    }

    Ok(())
}
