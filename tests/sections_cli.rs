mod firecrawl_stub;

use std::path::Path;

use firecrawl_stub::{FirecrawlStub, FirecrawlStubConfig, StubPage};
use predicates::prelude::*;

fn write_registry(dir: &Path, site: &str) -> std::path::PathBuf {
    let registry = serde_json::json!({
        "sections": {
            "docs": {
                "name": "Documentation",
                "url": format!("{site}/docs"),
                "output_dir": dir.join("docs"),
                "max_depth": 2,
                "limit": 10,
                "timeout": 30,
                "schedule": "weekly",
                "description": "Product docs"
            },
            "blog": {
                "name": "Blog",
                "url": format!("{site}/blog"),
                "output_dir": dir.join("blog"),
                "schedule": "daily",
                "description": "Posts"
            }
        }
    });
    let path = dir.join("sections_config.json");
    std::fs::write(&path, registry.to_string()).expect("write registry");
    path
}

fn cmd(stub_url: &str, config: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("firecrawl-sections");
    cmd.env_remove("FIRECRAWL_API_KEY")
        .env_remove("RUST_LOG")
        .env_remove("LOG_LEVEL")
        .args(["--api-url", stub_url, "--config"])
        .arg(config);
    cmd
}

fn docs_pages() -> Vec<StubPage> {
    vec![
        StubPage {
            path: "/docs/start",
            title: "Getting Started",
            markdown: "Install it.",
            lastmod: Some("2025-01-01"),
        },
        StubPage {
            path: "/docs/guides/deploy",
            title: "Deploy",
            markdown: "Ship it.",
            lastmod: Some("2025-01-02"),
        },
    ]
}

#[test]
fn list_shows_configured_and_auto_limits() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    let config = write_registry(temp.path(), "https://s.example");

    cmd("http://127.0.0.1:9", &config)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Documentation (docs)"))
        .stdout(predicate::str::contains("max_depth=2, limit=10, timeout=30s"))
        .stdout(predicate::str::contains("max_depth=auto, limit=auto, timeout=auto"));
}

#[test]
fn unknown_section_fails_with_available_keys() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    let config = write_registry(temp.path(), "https://s.example");

    cmd("http://127.0.0.1:9", &config)
        .args(["crawl", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown section `nope` (available: blog, docs)"));
}

#[test]
fn missing_registry_is_reported() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    cmd("http://127.0.0.1:9", &temp.path().join("absent.json"))
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("read section registry"));
}

#[test]
fn crawl_section_writes_into_its_output_dir() {
    let stub = FirecrawlStub::spawn(FirecrawlStubConfig {
        pages: docs_pages(),
        ..FirecrawlStubConfig::default()
    });
    let temp = tempfile::TempDir::new().expect("tempdir");
    let config = write_registry(temp.path(), &stub.base_url);

    cmd(&stub.base_url, &config)
        .args(["crawl", "docs", "--poll-interval", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Max depth: 2, Limit: 10"))
        .stdout(predicate::str::contains("2 pages saved"));

    let out = temp.path().join("docs");
    assert!(out.join("Getting-Started.md").is_file());
    assert!(out.join("Deploy.md").is_file());
    assert!(out.join("INDEX.md").is_file());
}

#[test]
fn crawl_section_detects_missing_limits_from_sitemap() {
    let mut pages = docs_pages();
    pages.push(StubPage {
        path: "/blog/2025/01/hello",
        title: "Hello",
        markdown: "First post.",
        lastmod: None,
    });
    let stub = FirecrawlStub::spawn(FirecrawlStubConfig {
        pages,
        ..FirecrawlStubConfig::default()
    });
    let temp = tempfile::TempDir::new().expect("tempdir");
    let config = write_registry(temp.path(), &stub.base_url);

    cmd(&stub.base_url, &config)
        .args(["crawl", "blog", "--poll-interval", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Max depth: 3, Limit: 1"))
        .stdout(predicate::str::contains("Timeout: 94s (1m 34s)"));
}

#[test]
fn update_section_lists_new_pages() {
    let stub = FirecrawlStub::spawn(FirecrawlStubConfig {
        pages: docs_pages(),
        ..FirecrawlStubConfig::default()
    });
    let temp = tempfile::TempDir::new().expect("tempdir");
    let config = write_registry(temp.path(), &stub.base_url);

    cmd(&stub.base_url, &config)
        .args(["update", "docs", "--show-urls"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 2 pages that need updating"))
        .stdout(predicate::str::contains(format!("{} (new)", stub.url("/docs/guides/deploy"))));
}
