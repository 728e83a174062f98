use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:3002";
pub const DEFAULT_OUTPUT_DIR: &str = "./output";
pub const DEFAULT_SECTIONS_CONFIG: &str = "sections_config.json";

/// Connection settings for the scrape gateway.
///
/// Built once at startup from CLI flags, which clap already merged with
/// `FIRECRAWL_API_URL` / `FIRECRAWL_API_KEY`.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_owned(),
            api_key: None,
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl GatewayConfig {
    pub fn new(api_url: &str, api_key: Option<&str>) -> Self {
        let api_url = api_url.trim().trim_end_matches('/');
        Self {
            api_url: if api_url.is_empty() {
                DEFAULT_API_URL.to_owned()
            } else {
                api_url.to_owned()
            },
            api_key: api_key
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_owned),
            ..Self::default()
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_url_and_blank_key() {
        let config = GatewayConfig::new("http://fc.local:3002/", Some("  "));
        assert_eq!(config.api_url, "http://fc.local:3002");
        assert!(config.api_key.is_none());
        assert_eq!(config.endpoint("/v1/scrape"), "http://fc.local:3002/v1/scrape");
    }

    #[test]
    fn empty_url_falls_back_to_default() {
        let config = GatewayConfig::new("", Some("fc-key"));
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.api_key.as_deref(), Some("fc-key"));
    }
}
