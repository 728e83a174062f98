use anyhow::Context as _;
use url::Url;

/// Canonical ledger key for a page URL.
///
/// Drops the fragment and trailing slashes (except the root path) so that
/// `https://x.com/a` and `https://x.com/a/` share one key. The query is kept.
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(url) => canonical_url(&url).to_string(),
        Err(_) => {
            let trimmed = raw.trim_end_matches('/');
            if trimmed.is_empty() {
                raw.to_owned()
            } else {
                trimmed.to_owned()
            }
        }
    }
}

pub fn canonical_url(url: &Url) -> Url {
    let mut canonical = url.clone();
    canonical.set_fragment(None);
    let mut path = canonical.path().to_owned();
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    canonical.set_path(&path);
    canonical
}

/// `scheme://host[:port]` of a URL, used to locate `sitemap.xml`.
pub fn origin_of(url: &Url) -> anyhow::Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("url must have host: {url}"))?;
    Ok(match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    })
}

pub fn parse_http_url(raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("parse url: {raw}"))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        anyhow::bail!("url must be http/https: {url}");
    }
    if url.host_str().is_none() {
        anyhow::bail!("url must have host: {url}");
    }
    Ok(url)
}

/// Restricts URLs to a path prefix on segment boundaries: `/docs` covers
/// `/docs` and `/docs/x`, not `/docs2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathScope {
    prefix: String,
}

impl PathScope {
    pub fn new(prefix: &str) -> Self {
        let mut prefix = prefix.trim().to_owned();
        if !prefix.starts_with('/') {
            prefix.insert(0, '/');
        }
        while prefix.len() > 1 && prefix.ends_with('/') {
            prefix.pop();
        }
        Self { prefix }
    }

    /// Scope for the path of `url`, or `None` when it is the site root.
    pub fn for_url(url: &Url) -> Option<Self> {
        let scope = Self::new(url.path());
        (scope.prefix != "/").then_some(scope)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn contains_path(&self, path: &str) -> bool {
        if self.prefix == "/" {
            return true;
        }
        path == self.prefix || path.starts_with(&format!("{}/", self.prefix))
    }

    pub fn contains_url(&self, raw: &str) -> bool {
        match Url::parse(raw) {
            Ok(url) => self.contains_path(url.path()),
            Err(_) => false,
        }
    }

    /// Number of path segments below the prefix (`/docs` → `/docs/a/b` is 2).
    pub fn relative_depth(&self, path: &str) -> Option<usize> {
        if !self.contains_path(path) {
            return None;
        }
        let rest = if self.prefix == "/" {
            path
        } else {
            &path[self.prefix.len()..]
        };
        Some(rest.split('/').filter(|segment| !segment.is_empty()).count())
    }
}
