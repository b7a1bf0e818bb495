use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;

use url::Url;

/// The document's base URL, shared cheaply across the pipeline.
#[derive(Clone, Debug)]
pub struct DocumentUrl {
    base_url: Arc<Url>,
}

impl DocumentUrl {
    pub fn resolve_relative(&self, raw: &str) -> Option<Url> {
        self.base_url.join(raw).ok()
    }

    /// Same-origin in the scheme/host/port sense. Documents without a host
    /// (e.g. `about:blank`) only consider themselves same-origin with URLs
    /// that also lack one.
    pub fn is_same_origin(&self, other: &Url) -> bool {
        self.base_url.scheme() == other.scheme()
            && self.base_url.host_str() == other.host_str()
            && self.base_url.port_or_known_default() == other.port_or_known_default()
    }
}

impl Default for DocumentUrl {
    fn default() -> Self {
        Self::from_str("about:blank").unwrap()
    }
}

impl FromStr for DocumentUrl {
    type Err = <Url as FromStr>::Err;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let base_url = Arc::new(Url::parse(s)?);
        Ok(Self { base_url })
    }
}

impl From<Url> for DocumentUrl {
    fn from(base_url: Url) -> Self {
        Self {
            base_url: Arc::new(base_url),
        }
    }
}

impl Deref for DocumentUrl {
    type Target = Url;
    fn deref(&self) -> &Self::Target {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_references() {
        let base = DocumentUrl::from_str("https://example.com/app/index.html").unwrap();
        let resolved = base.resolve_relative("../img/logo.png").unwrap();
        assert_eq!(resolved.as_str(), "https://example.com/img/logo.png");
    }

    #[test]
    fn origin_comparison() {
        let base = DocumentUrl::from_str("https://example.com/a").unwrap();
        assert!(base.is_same_origin(&Url::parse("https://example.com:443/x/y").unwrap()));
        assert!(!base.is_same_origin(&Url::parse("https://other.com/x").unwrap()));
        assert!(!base.is_same_origin(&Url::parse("http://example.com/x").unwrap()));
    }
}
