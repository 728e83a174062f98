//! Named site sections: registry loading, crawl limit detection and the
//! `firecrawl-sections` commands.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;
use url::Url;

use crate::cli::{
    GatewayArgs, SectionCrawlAllArgs, SectionCrawlArgs, SectionUpdateArgs, SectionsCli,
    SectionsCommand,
};
use crate::crawl::{CrawlReport, PollSettings, crawl_into, print_report};
use crate::gateway::{CrawlRequest, Gateway, is_outage};
use crate::ledger::Ledger;
use crate::sitemap::{SitemapEntry, SitemapReader};
use crate::update::{UpdateOptions, update_site};
use crate::urls::{PathScope, origin_of, parse_http_url};

const FALLBACK_MAX_DEPTH: u32 = 2;
const FALLBACK_LIMIT: u32 = 50;
const FALLBACK_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Section {
    pub name: String,
    pub url: String,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub max_depth: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
    /// Crawl job timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub schedule: String,
    #[serde(default)]
    pub description: String,
}

impl Section {
    fn needs_detection(&self) -> bool {
        self.max_depth.is_none() || self.limit.is_none() || self.timeout.is_none()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SectionRegistry {
    #[serde(default)]
    sections: BTreeMap<String, Section>,
}

impl SectionRegistry {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read section registry: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parse section registry: {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let registry: Self = serde_json::from_str(text)?;
        for (key, section) in &registry.sections {
            parse_http_url(&section.url).with_context(|| format!("section `{key}`"))?;
        }
        Ok(registry)
    }

    pub fn get(&self, key: &str) -> anyhow::Result<&Section> {
        self.sections.get(key).ok_or_else(|| {
            let available: Vec<&str> = self.sections.keys().map(String::as_str).collect();
            anyhow::anyhow!(
                "unknown section `{key}` (available: {})",
                available.join(", ")
            )
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Section)> {
        self.sections.iter().map(|(key, section)| (key.as_str(), section))
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// What the sitemap says about the pages under a section URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionAnalysis {
    pub page_count: usize,
    /// Deepest path depth below the section path.
    pub max_depth: usize,
}

pub fn analyze_section(entries: &[SitemapEntry], section_url: &Url) -> SectionAnalysis {
    let scope = PathScope::for_url(section_url).unwrap_or_else(|| PathScope::new("/"));
    let mut analysis = SectionAnalysis::default();
    for entry in entries {
        let Ok(url) = Url::parse(&entry.url) else {
            continue;
        };
        if url.host_str() != section_url.host_str() {
            continue;
        }
        if let Some(depth) = scope.relative_depth(url.path()) {
            analysis.page_count += 1;
            analysis.max_depth = analysis.max_depth.max(depth);
        }
    }
    analysis
}

/// `1.5 × (30 + 3·limit + 10·depth)` seconds, kept within one minute and one hour.
pub fn estimate_timeout(limit: u32, max_depth: u32) -> u64 {
    let base = 30 + 3 * u64::from(limit) + 10 * u64::from(max_depth);
    (base * 3 / 2).clamp(60, 3600)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlLimits {
    pub max_depth: u32,
    pub limit: u32,
    pub timeout: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LimitOverrides {
    pub max_depth: Option<u32>,
    pub limit: Option<u32>,
    pub timeout: Option<u64>,
}

/// Fills missing limits from overrides, then the section, then `analyze`.
///
/// `analyze` runs only when something is still missing.
pub fn resolve_limits(
    section: &Section,
    overrides: LimitOverrides,
    analyze: impl FnOnce() -> SectionAnalysis,
) -> CrawlLimits {
    let max_depth = overrides.max_depth.or(section.max_depth);
    let limit = overrides.limit.or(section.limit);
    let timeout = overrides.timeout.or(section.timeout);
    if let (Some(max_depth), Some(limit), Some(timeout)) = (max_depth, limit, timeout) {
        return CrawlLimits {
            max_depth,
            limit,
            timeout,
        };
    }

    let analysis = analyze();
    if analysis.page_count == 0 {
        tracing::warn!(section = %section.name, "no sitemap pages found; using default limits");
        return CrawlLimits {
            max_depth: max_depth.unwrap_or(FALLBACK_MAX_DEPTH),
            limit: limit.unwrap_or(FALLBACK_LIMIT),
            timeout: timeout.unwrap_or(FALLBACK_TIMEOUT_SECS),
        };
    }

    let max_depth = max_depth.unwrap_or(u32::try_from(analysis.max_depth).unwrap_or(u32::MAX));
    let limit = limit.unwrap_or(u32::try_from(analysis.page_count).unwrap_or(u32::MAX));
    let timeout = timeout.unwrap_or_else(|| estimate_timeout(limit, max_depth));
    tracing::info!(
        section = %section.name,
        pages = analysis.page_count,
        max_depth,
        limit,
        timeout,
        "detected crawl limits"
    );
    CrawlLimits {
        max_depth,
        limit,
        timeout,
    }
}

fn detect_from_sitemap(reader: &SitemapReader, section_url: &Url) -> SectionAnalysis {
    let origin = match origin_of(section_url) {
        Ok(origin) => origin,
        Err(err) => {
            tracing::warn!(url = %section_url, error = %format!("{err:#}"), "cannot locate sitemap");
            return SectionAnalysis::default();
        }
    };
    let fetch = reader.fetch(&origin);
    analyze_section(&fetch.entries, section_url)
}

fn format_limit<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "auto".to_owned(), |value| value.to_string())
}

pub fn print_sections(registry: &SectionRegistry) {
    println!("Available sections ({}):", registry.len());
    for (key, section) in registry.iter() {
        println!();
        println!("{} ({key})", section.name);
        println!("  URL: {}", section.url);
        println!("  Output: {}", section.output_dir.display());
        println!(
            "  Limits: max_depth={}, limit={}, timeout={}",
            format_limit(section.max_depth),
            format_limit(section.limit),
            format_limit(section.timeout.map(|secs| format!("{secs}s")))
        );
        if section.needs_detection() {
            println!("  Missing limits are detected from the sitemap at crawl time");
        }
        if !section.schedule.is_empty() {
            println!("  Schedule: {}", section.schedule);
        }
        if !section.description.is_empty() {
            println!("  Description: {}", section.description);
        }
    }
}

/// Crawls one section into its output directory.
pub fn crawl_section(
    gateway: &dyn Gateway,
    reader: &SitemapReader,
    key: &str,
    section: &Section,
    output: Option<&Path>,
    overrides: LimitOverrides,
    poll_interval: u64,
) -> anyhow::Result<CrawlReport> {
    let url = parse_http_url(&section.url).with_context(|| format!("section `{key}`"))?;
    let limits = resolve_limits(section, overrides, || detect_from_sitemap(reader, &url));
    let out_dir = output.unwrap_or(&section.output_dir);

    println!("=== Crawling {} ({key}) ===", section.name);
    println!("URL: {url}");
    println!("Output: {}", out_dir.display());
    println!("Max depth: {}, Limit: {}", limits.max_depth, limits.limit);
    println!(
        "Timeout: {}s ({}m {}s)",
        limits.timeout,
        limits.timeout / 60,
        limits.timeout % 60
    );

    let mut ledger = Ledger::open(out_dir).context("open ledger")?;
    let request = CrawlRequest {
        url: url.to_string(),
        max_depth: limits.max_depth,
        limit: limits.limit,
        only_main_content: true,
    };
    let settings = PollSettings::from_secs(poll_interval, limits.timeout);
    let report = crawl_into(gateway, &mut ledger, &request, &settings)?;
    print_report(&report, out_dir);
    Ok(report)
}

/// Crawls every section in key order. A failing section does not stop the
/// others unless the gateway itself is unreachable.
pub fn crawl_all(
    gateway: &dyn Gateway,
    reader: &SitemapReader,
    registry: &SectionRegistry,
    poll_interval: u64,
) -> anyhow::Result<()> {
    let total = registry.len();
    let mut failed: Vec<(&str, String)> = Vec::new();

    for (idx, (key, section)) in registry.iter().enumerate() {
        println!("[{}/{total}] Starting section: {}", idx + 1, section.name);
        let result = crawl_section(
            gateway,
            reader,
            key,
            section,
            None,
            LimitOverrides::default(),
            poll_interval,
        );
        match result {
            Ok(report) if report.failures.is_empty() => {
                println!("[{}/{total}] Completed: {}", idx + 1, section.name);
            }
            Ok(report) => {
                let message = format!("{} pages could not be saved", report.failures.len());
                println!("[{}/{total}] Failed: {} ({message})", idx + 1, section.name);
                failed.push((key, message));
            }
            Err(err) if is_outage(&err) => {
                return Err(err.context(format!("crawl-all aborted at section `{key}`")));
            }
            Err(err) => {
                tracing::warn!(section = key, error = %format!("{err:#}"), "section crawl failed");
                println!("[{}/{total}] Failed: {} ({err:#})", idx + 1, section.name);
                failed.push((key, format!("{err:#}")));
            }
        }
    }

    if !failed.is_empty() {
        let keys: Vec<&str> = failed.iter().map(|(key, _)| *key).collect();
        anyhow::bail!(
            "{} of {total} sections failed: {}",
            failed.len(),
            keys.join(", ")
        );
    }
    println!("All {total} sections crawled.");
    Ok(())
}

fn run_crawl(
    gateway_args: &GatewayArgs,
    registry: &SectionRegistry,
    args: SectionCrawlArgs,
) -> anyhow::Result<()> {
    let section = registry.get(&args.section)?;
    let client = gateway_args.client()?;
    let reader = SitemapReader::new()?;
    let overrides = LimitOverrides {
        max_depth: args.max_depth,
        limit: args.limit,
        timeout: args.timeout,
    };
    let report = crawl_section(
        &client,
        &reader,
        &args.section,
        section,
        args.output.as_deref(),
        overrides,
        args.poll_interval,
    )?;
    if !report.failures.is_empty() {
        anyhow::bail!("{} of the crawled pages could not be saved", report.failures.len());
    }
    Ok(())
}

fn run_crawl_all(
    gateway_args: &GatewayArgs,
    registry: &SectionRegistry,
    args: SectionCrawlAllArgs,
) -> anyhow::Result<()> {
    let client = gateway_args.client()?;
    let reader = SitemapReader::new()?;
    crawl_all(&client, &reader, registry, args.poll_interval)
}

fn run_update(
    gateway_args: &GatewayArgs,
    registry: &SectionRegistry,
    args: SectionUpdateArgs,
) -> anyhow::Result<()> {
    let section = registry.get(&args.section)?;
    let url = parse_http_url(&section.url).with_context(|| format!("section `{}`", args.section))?;
    let out_dir = args.output.as_deref().unwrap_or(&section.output_dir);
    println!("=== Checking updates: {} ({}) ===", section.name, args.section);

    let options = UpdateOptions {
        show_urls: args.show_urls,
        auto_update: args.auto_update,
        ..UpdateOptions::default()
    };
    update_site(gateway_args, out_dir, &url, &options)
}

pub fn run(cli: SectionsCli) -> anyhow::Result<()> {
    let registry = SectionRegistry::load(&cli.config)?;
    tracing::debug!(config = %cli.config.display(), sections = registry.len(), "loaded section registry");

    match cli.command {
        SectionsCommand::List => {
            print_sections(&registry);
            Ok(())
        }
        SectionsCommand::Crawl(args) => run_crawl(&cli.gateway, &registry, args),
        SectionsCommand::CrawlAll(args) => run_crawl_all(&cli.gateway, &registry, args),
        SectionsCommand::Update(args) => run_update(&cli.gateway, &registry, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::tests::{ScriptedGateway, page, status};
    use crate::gateway::CrawlState;

    fn section(url: &str) -> Section {
        Section {
            name: "Docs".to_owned(),
            url: url.to_owned(),
            output_dir: PathBuf::from("output/docs"),
            max_depth: None,
            limit: None,
            timeout: None,
            schedule: "weekly".to_owned(),
            description: String::new(),
        }
    }

    fn entries(urls: &[&str]) -> Vec<SitemapEntry> {
        urls.iter()
            .map(|url| SitemapEntry {
                url: (*url).to_owned(),
                lastmod: None,
            })
            .collect()
    }

    #[test]
    fn registry_parses_optional_limits_in_key_order() -> anyhow::Result<()> {
        let registry = SectionRegistry::parse(
            r#"{
                "sections": {
                    "research": {
                        "name": "Research",
                        "url": "https://s.com/research",
                        "output_dir": "output/research",
                        "max_depth": 3,
                        "limit": 100,
                        "schedule": "monthly",
                        "description": "Labs"
                    },
                    "about": {
                        "name": "About",
                        "url": "https://s.com/about",
                        "output_dir": "output/about",
                        "schedule": "weekly",
                        "description": "Who we are"
                    }
                }
            }"#,
        )?;
        let keys: Vec<&str> = registry.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["about", "research"]);
        let research = registry.get("research")?;
        assert_eq!(research.max_depth, Some(3));
        assert!(research.timeout.is_none());
        assert!(registry.get("about")?.needs_detection());
        Ok(())
    }

    #[test]
    fn unknown_section_lists_available_keys() -> anyhow::Result<()> {
        let registry = SectionRegistry::parse(
            r#"{"sections":{"a":{"name":"A","url":"https://s.com/a","output_dir":"o"}}}"#,
        )?;
        let err = registry.get("zzz").unwrap_err();
        assert_eq!(err.to_string(), "unknown section `zzz` (available: a)");
        Ok(())
    }

    #[test]
    fn registry_rejects_non_http_urls() {
        let err = SectionRegistry::parse(
            r#"{"sections":{"a":{"name":"A","url":"mailto:x@s.com","output_dir":"o"}}}"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("section `a`"));
    }

    #[test]
    fn analysis_counts_pages_under_section_path() {
        let url = Url::parse("https://s.com/about").unwrap();
        let analysis = analyze_section(
            &entries(&[
                "https://s.com/about",
                "https://s.com/about/team",
                "https://s.com/about/team/alice/",
                "https://s.com/aboutus",
                "https://s.com/blog/post",
                "https://other.com/about/x",
            ]),
            &url,
        );
        assert_eq!(
            analysis,
            SectionAnalysis {
                page_count: 3,
                max_depth: 2
            }
        );
    }

    #[test]
    fn timeout_estimate_is_clamped() {
        assert_eq!(estimate_timeout(10, 2), 120);
        assert_eq!(estimate_timeout(1, 0), 60);
        assert_eq!(estimate_timeout(2000, 5), 3600);
    }

    #[test]
    fn detected_limits_fill_only_missing_values() {
        let mut docs = section("https://s.com/docs");
        docs.limit = Some(7);
        let limits = resolve_limits(&docs, LimitOverrides::default(), || SectionAnalysis {
            page_count: 40,
            max_depth: 3,
        });
        assert_eq!(
            limits,
            CrawlLimits {
                max_depth: 3,
                limit: 7,
                timeout: estimate_timeout(7, 3),
            }
        );
    }

    #[test]
    fn empty_sitemap_uses_fallback_limits() {
        let limits = resolve_limits(
            &section("https://s.com/docs"),
            LimitOverrides::default(),
            SectionAnalysis::default,
        );
        assert_eq!(
            limits,
            CrawlLimits {
                max_depth: 2,
                limit: 50,
                timeout: 600,
            }
        );
    }

    #[test]
    fn complete_limits_skip_detection() {
        let limits = resolve_limits(
            &section("https://s.com/docs"),
            LimitOverrides {
                max_depth: Some(1),
                limit: Some(5),
                timeout: Some(90),
            },
            || panic!("sitemap should not be consulted"),
        );
        assert_eq!(limits.timeout, 90);
    }

    fn registry_in(dir: &Path) -> SectionRegistry {
        let json = serde_json::json!({
            "sections": {
                "about": {
                    "name": "About",
                    "url": "https://s.com/about",
                    "output_dir": dir.join("about"),
                    "max_depth": 1, "limit": 5, "timeout": 60
                },
                "news": {
                    "name": "News",
                    "url": "https://s.com/news",
                    "output_dir": dir.join("news"),
                    "max_depth": 1, "limit": 5, "timeout": 60
                }
            }
        });
        SectionRegistry::parse(&json.to_string()).unwrap()
    }

    #[test]
    fn crawl_all_fills_each_section_directory() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let registry = registry_in(temp.path());
        let gateway = ScriptedGateway::new(vec![status(
            CrawlState::Completed,
            vec![page("https://s.com/x", "X")],
        )]);

        crawl_all(&gateway, &SitemapReader::new()?, &registry, 1)?;
        assert_eq!(gateway.started.borrow().len(), 2);
        assert_eq!(gateway.started.borrow()[0].url, "https://s.com/about");
        for dir in ["about", "news"] {
            assert_eq!(Ledger::load(temp.path().join(dir))?.len(), 1);
        }
        Ok(())
    }

    #[test]
    fn crawl_all_continues_past_failed_sections() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let registry = registry_in(temp.path());
        let gateway = ScriptedGateway::new(vec![status(CrawlState::Failed, vec![])]);

        let err = crawl_all(&gateway, &SitemapReader::new()?, &registry, 1).unwrap_err();
        assert_eq!(gateway.started.borrow().len(), 2);
        assert!(err.to_string().contains("2 of 2 sections failed: about, news"));
        Ok(())
    }
}
