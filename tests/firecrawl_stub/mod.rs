use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::Value;

#[derive(Debug, Clone)]
pub struct StubPage {
    pub path: &'static str,
    pub title: &'static str,
    pub markdown: &'static str,
    pub lastmod: Option<&'static str>,
}

#[derive(Debug, Clone)]
pub struct FirecrawlStubConfig {
    pub pages: Vec<StubPage>,
    /// Polls answered with `scraping` before the crawl completes; `None`
    /// keeps the job running forever.
    pub polls_before_done: Option<usize>,
    pub health_endpoint: bool,
}

impl Default for FirecrawlStubConfig {
    fn default() -> Self {
        Self {
            pages: Vec::new(),
            polls_before_done: Some(0),
            health_endpoint: true,
        }
    }
}

/// Serves the Firecrawl v1 API and the site's `sitemap.xml` from one address.
pub struct FirecrawlStub {
    pub base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl FirecrawlStub {
    pub fn spawn(config: FirecrawlStubConfig) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start firecrawl stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let site = base_url.clone();

        let handle = thread::spawn(move || {
            let mut polls = 0_usize;
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let path = request.url().to_string();
                let method = request.method().clone();
                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);
                seen.lock()
                    .expect("lock request log")
                    .push(format!("{method} {path} {body}"));

                let (status, content_type, payload) = match (method, path.as_str()) {
                    (tiny_http::Method::Get, "/health") if config.health_endpoint => {
                        (200, "application/json", r#"{"status":"ok"}"#.to_owned())
                    }
                    (tiny_http::Method::Get, "/") => (200, "text/plain", "Firecrawl".to_owned()),
                    (tiny_http::Method::Get, "/sitemap.xml") => {
                        (200, "application/xml", sitemap_xml(&site, &config.pages))
                    }
                    (tiny_http::Method::Post, "/v1/scrape") => scrape_response(&site, &config.pages, &body),
                    (tiny_http::Method::Post, "/v1/crawl") => (
                        200,
                        "application/json",
                        r#"{"success":true,"id":"job-1"}"#.to_owned(),
                    ),
                    (tiny_http::Method::Get, "/v1/crawl/job-1") => {
                        polls += 1;
                        let done = config
                            .polls_before_done
                            .is_some_and(|before| polls > before);
                        (200, "application/json", crawl_status(&site, &config.pages, done))
                    }
                    _ => (404, "application/json", r#"{"error":"not found"}"#.to_owned()),
                };

                let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes())
                    .expect("build header");
                let response = tiny_http::Response::from_string(payload)
                    .with_status_code(status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Pages requested through `POST /v1/scrape`, in order.
    #[allow(dead_code)]
    pub fn scraped_urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .expect("lock request log")
            .iter()
            .filter_map(|line| line.strip_prefix("POST /v1/scrape "))
            .filter_map(|body| serde_json::from_str::<Value>(body).ok())
            .filter_map(|body| body.get("url").and_then(Value::as_str).map(str::to_owned))
            .collect()
    }
}

impl Drop for FirecrawlStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn document(site: &str, page: &StubPage) -> Value {
    let url = format!("{site}{}", page.path);
    serde_json::json!({
        "markdown": page.markdown,
        "metadata": {
            "title": page.title,
            "sourceURL": url,
            "url": url,
            "statusCode": 200
        }
    })
}

fn sitemap_xml(site: &str, pages: &[StubPage]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
"#,
    );
    for page in pages {
        xml.push_str(&format!("  <url><loc>{site}{}</loc>", page.path));
        if let Some(lastmod) = page.lastmod {
            xml.push_str(&format!("<lastmod>{lastmod}</lastmod>"));
        }
        xml.push_str("</url>\n");
    }
    xml.push_str("</urlset>\n");
    xml
}

fn scrape_response(site: &str, pages: &[StubPage], body: &str) -> (u16, &'static str, String) {
    let requested = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|body| body.get("url").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_default();
    let requested = requested.trim_end_matches('/');

    let found = pages
        .iter()
        .find(|page| format!("{site}{}", page.path).trim_end_matches('/') == requested);
    match found {
        Some(page) => (
            200,
            "application/json",
            serde_json::json!({ "success": true, "data": document(site, page) }).to_string(),
        ),
        None => (
            404,
            "application/json",
            serde_json::json!({ "success": false, "error": "page not found" }).to_string(),
        ),
    }
}

fn crawl_status(site: &str, pages: &[StubPage], done: bool) -> String {
    let total = pages.len();
    if !done {
        return serde_json::json!({
            "status": "scraping",
            "total": total,
            "completed": 0,
            "data": []
        })
        .to_string();
    }
    let data: Vec<Value> = pages.iter().map(|page| document(site, page)).collect();
    serde_json::json!({
        "status": "completed",
        "total": total,
        "completed": total,
        "data": data
    })
    .to_string()
}
