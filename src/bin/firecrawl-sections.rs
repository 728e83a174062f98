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

    let cli = firecrawl_md::cli::SectionsCli::parse();
    tracing::debug!(?cli, "parsed cli");

    firecrawl_md::sections::run(cli).context("sections")
}
