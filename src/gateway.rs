use anyhow::Context as _;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::GatewayConfig;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("cannot reach gateway at {endpoint}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    #[error("gateway returned HTTP {status} for {endpoint}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("gateway rejected {url}: {message}")]
    Rejected { url: String, message: String },

    #[error("decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    #[error("gateway did not return a crawl job id for {url}")]
    MissingJobId { url: String },
}

impl GatewayError {
    /// Connection-level failures mean every further request will fail too.
    pub fn is_outage(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

/// True when any cause in `err` is a gateway connection failure.
pub fn is_outage(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<GatewayError>()
            .is_some_and(GatewayError::is_outage)
    })
}

#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    pub only_main_content: bool,
    pub wait_for_ms: Option<u64>,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            only_main_content: true,
            wait_for_ms: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub url: String,
    pub max_depth: u32,
    pub limit: u32,
    pub only_main_content: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "sourceURL")]
    pub source_url: Option<String>,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// One page as returned by the gateway. Lives only until it is written.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedPage {
    pub url: String,
    pub title: Option<String>,
    pub markdown: String,
    pub metadata: PageMetadata,
}

impl ScrapedPage {
    pub fn word_count(&self) -> usize {
        self.markdown.split_whitespace().count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl CrawlState {
    fn from_wire(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" | "waiting" => Self::Pending,
            "completed" | "done" => Self::Completed,
            "failed" | "cancelled" | "canceled" | "error" => Self::Failed,
            // Firecrawl reports an in-flight job as "scraping".
            _ => Self::Running,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlStatus {
    pub state: CrawlState,
    pub raw_status: String,
    pub total: u64,
    pub completed: u64,
    pub pages: Vec<ScrapedPage>,
    pub error: Option<String>,
}

/// Operations the orchestrator needs from the scraping backend.
pub trait Gateway {
    fn scrape(&self, url: &str, options: &ScrapeOptions) -> Result<ScrapedPage, GatewayError>;
    fn start_crawl(&self, request: &CrawlRequest) -> Result<String, GatewayError>;
    fn crawl_status(&self, job_id: &str) -> Result<CrawlStatus, GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy { endpoint: String },
    /// The server answered, but has no health endpoint.
    Reachable { endpoint: String },
}

#[derive(Debug, Clone)]
pub struct FirecrawlClient {
    http: Client,
    config: GatewayConfig,
}

// Upper bound on `next` links followed for one completed job.
const MAX_RESULT_PAGES: usize = 1000;

impl FirecrawlClient {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("firecrawl-md/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build gateway http client")?;
        tracing::debug!(api_url = %config.api_url, "initialized gateway client");
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn check_health(&self) -> Result<Health, GatewayError> {
        let endpoint = self.config.endpoint("health");
        match self.send(self.http.get(&endpoint), &endpoint) {
            Ok(_) => return Ok(Health::Healthy { endpoint }),
            Err(GatewayError::Status { status: 404, .. }) => {
                tracing::debug!(%endpoint, "health endpoint missing; probing api root");
            }
            Err(err) => return Err(err),
        }

        let mut last_err = None;
        for candidate in [self.config.endpoint(""), self.config.endpoint("v1")] {
            match self.authorize(self.http.get(&candidate)).send() {
                Ok(response) => {
                    tracing::debug!(endpoint = %candidate, status = %response.status(), "api root answered");
                    return Ok(Health::Reachable {
                        endpoint: candidate,
                    });
                }
                Err(err) => last_err = Some(classify(&candidate, err)),
            }
        }
        Err(last_err.unwrap_or(GatewayError::Transport {
            endpoint,
            message: "no probe endpoint answered".to_owned(),
        }))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.config.api_key.as_deref() {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn send(&self, request: RequestBuilder, endpoint: &str) -> Result<String, GatewayError> {
        let response = self
            .authorize(request)
            .send()
            .map_err(|err| classify(endpoint, err))?;
        let status = response.status();
        let body = response.text().map_err(|err| classify(endpoint, err))?;
        if !status.is_success() {
            let message = parse_error_message(&body).unwrap_or_else(|| truncate(&body, 300));
            return Err(GatewayError::Status {
                endpoint: endpoint.to_owned(),
                status: status.as_u16(),
                message,
            });
        }
        Ok(body)
    }

    fn fetch_status_page(&self, endpoint: &str) -> Result<WireCrawlStatus, GatewayError> {
        let body = self.send(self.http.get(endpoint), endpoint)?;
        decode(endpoint, &body)
    }
}

impl Gateway for FirecrawlClient {
    fn scrape(&self, url: &str, options: &ScrapeOptions) -> Result<ScrapedPage, GatewayError> {
        let endpoint = self.config.endpoint("v1/scrape");
        let mut body = serde_json::json!({
            "url": url,
            "formats": ["markdown"],
            "onlyMainContent": options.only_main_content,
        });
        if let Some(wait_for) = options.wait_for_ms
            && let Some(obj) = body.as_object_mut()
        {
            obj.insert("waitFor".to_owned(), serde_json::json!(wait_for));
        }

        tracing::debug!(%url, only_main_content = options.only_main_content, "scrape request");
        let raw = self.send(self.http.post(&endpoint).json(&body), &endpoint)?;
        let response: WireScrapeResponse = decode(&endpoint, &raw)?;

        if !response.success {
            return Err(GatewayError::Rejected {
                url: url.to_owned(),
                message: response
                    .error
                    .unwrap_or_else(|| "unknown error".to_owned()),
            });
        }
        let document = response.data.ok_or_else(|| GatewayError::Decode {
            endpoint: endpoint.clone(),
            message: "missing `data` in scrape response".to_owned(),
        })?;

        // Keyed by the requested URL so that redirects do not detach the page
        // from its sitemap entry.
        Ok(document.into_page(Some(url)).unwrap_or_else(|| ScrapedPage {
            url: url.to_owned(),
            title: None,
            markdown: String::new(),
            metadata: PageMetadata::default(),
        }))
    }

    fn start_crawl(&self, request: &CrawlRequest) -> Result<String, GatewayError> {
        let endpoint = self.config.endpoint("v1/crawl");
        let body = serde_json::json!({
            "url": request.url,
            "limit": request.limit,
            "maxDepth": request.max_depth,
            "scrapeOptions": {
                "formats": ["markdown"],
                "onlyMainContent": request.only_main_content,
            },
        });

        tracing::info!(url = %request.url, depth = request.max_depth, limit = request.limit, "starting crawl");
        let raw = self.send(self.http.post(&endpoint).json(&body), &endpoint)?;
        let response: WireStartCrawl = decode(&endpoint, &raw)?;

        if response.success == Some(false) {
            return Err(GatewayError::Rejected {
                url: request.url.clone(),
                message: response
                    .error
                    .unwrap_or_else(|| "unknown error".to_owned()),
            });
        }
        response
            .id
            .or(response.job_id)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| GatewayError::MissingJobId {
                url: request.url.clone(),
            })
    }

    fn crawl_status(&self, job_id: &str) -> Result<CrawlStatus, GatewayError> {
        let endpoint = self.config.endpoint(&format!("v1/crawl/{job_id}"));
        let first = self.fetch_status_page(&endpoint)?;
        let state = CrawlState::from_wire(&first.status);

        let mut documents = first.data;
        let mut next = first.next.filter(|_| state == CrawlState::Completed);
        let mut followed = 0_usize;
        while let Some(next_url) = next.take() {
            followed += 1;
            if followed > MAX_RESULT_PAGES {
                tracing::warn!(job_id, "too many result pages; truncating crawl data");
                break;
            }
            let page = self.fetch_status_page(&next_url)?;
            documents.extend(page.data);
            next = page.next;
        }

        let pages = documents
            .into_iter()
            .filter_map(|document| {
                let page = document.into_page(None);
                if page.is_none() {
                    tracing::warn!(job_id, "crawl result without url; skipping");
                }
                page
            })
            .collect();

        Ok(CrawlStatus {
            state,
            raw_status: first.status,
            total: first.total,
            completed: first.completed,
            pages,
            error: first.error,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireScrapeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<WireDocument>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireStartCrawl {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "jobId")]
    job_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCrawlStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    completed: u64,
    #[serde(default)]
    data: Vec<WireDocument>,
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDocument {
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    metadata: PageMetadata,
    #[serde(default)]
    url: Option<String>,
}

impl WireDocument {
    fn into_page(self, requested_url: Option<&str>) -> Option<ScrapedPage> {
        let url = requested_url
            .map(str::to_owned)
            .or_else(|| self.metadata.source_url.clone())
            .or_else(|| self.metadata.url.clone())
            .or(self.url)
            .filter(|url| !url.trim().is_empty())?;
        let title = self
            .metadata
            .title
            .clone()
            .filter(|title| !title.trim().is_empty());
        Some(ScrapedPage {
            url,
            title,
            markdown: self.markdown.unwrap_or_default(),
            metadata: self.metadata,
        })
    }
}

fn decode<T: DeserializeOwned>(endpoint: &str, body: &str) -> Result<T, GatewayError> {
    serde_json::from_str(body).map_err(|err| GatewayError::Decode {
        endpoint: endpoint.to_owned(),
        message: err.to_string(),
    })
}

fn classify(endpoint: &str, err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout {
            endpoint: endpoint.to_owned(),
        }
    } else if err.is_connect() {
        GatewayError::Unreachable {
            endpoint: endpoint.to_owned(),
            source: err,
        }
    } else {
        GatewayError::Transport {
            endpoint: endpoint.to_owned(),
            message: err.to_string(),
        }
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let error = value.get("error")?;
    if let Some(message) = error.as_str() {
        return Some(message.to_owned());
    }
    Some(error.get("message")?.as_str()?.to_owned())
}

fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_owned();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push('…');
    out
}
