//! Schedulable URIs
//!
//! A [`CrawlUri`] is the unit of work flowing through the engine. It is owned
//! by its frontier group while queued and by exactly one worker while
//! checked out.

mod key;
mod normalize;
pub mod status;

use crate::{UrlError, UrlResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

pub use key::politeness_key;
pub use normalize::{canonicalize, normalize_uri};

/// How urgently a URI should be scheduled within its group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulingDirective {
    /// Insertion order
    Normal,
    /// Ahead of all normal URIs in the group
    High,
    /// Ahead of normal URIs, and scheduled even if already seen
    Forced,
}

impl SchedulingDirective {
    /// Ordering tier within a group; lower values are handed out first
    ///
    /// Tier 0 is reserved for URIs returned to the head of their group.
    pub fn precedence(&self) -> u8 {
        match self {
            Self::High | Self::Forced => 1,
            Self::Normal => 2,
        }
    }
}

impl Default for SchedulingDirective {
    fn default() -> Self {
        Self::Normal
    }
}

/// A URI scheduled for (or undergoing) processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlUri {
    /// Normalized URI
    pub url: Url,

    /// Politeness key (host[:port]) of the group this URI belongs to
    pub class_key: String,

    /// Scheduling directive
    pub directive: SchedulingDirective,

    /// Fetch status; see [`status`]
    pub fetch_status: i32,

    /// Free-form processing notes (e.g. `err=...`)
    pub annotations: Vec<String>,

    /// Number of times processing of this URI has begun
    pub fetch_attempts: u32,

    /// URI this one was discovered from
    pub via: Option<Url>,

    /// Number of link hops from a seed
    pub hops: u32,

    /// Frontier-assigned sequence number, unique per scheduled URI
    pub ordinal: u64,

    /// Duration of the last fetch in milliseconds, if one happened
    pub fetch_duration_ms: Option<u64>,

    /// Size of the fetched content in bytes
    pub content_size: u64,

    /// Links discovered while processing, consumed by the disposition chain
    #[serde(skip)]
    pub outlinks: Vec<Url>,
}

impl CrawlUri {
    /// Creates a new unattempted URI from a string
    ///
    /// # Arguments
    ///
    /// * `uri` - The URI string; it is normalized before use
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlUri)` - A seed-level URI with the normal directive
    /// * `Err(UrlError)` - The string is not a crawlable URI
    pub fn new(uri: &str) -> UrlResult<Self> {
        Self::from_url(normalize_uri(uri)?)
    }

    /// Creates a new unattempted URI from an already normalized URL
    pub fn from_url(url: Url) -> UrlResult<Self> {
        let class_key = politeness_key(&url).ok_or(UrlError::MissingHost)?;
        Ok(Self {
            url,
            class_key,
            directive: SchedulingDirective::Normal,
            fetch_status: status::S_UNATTEMPTED,
            annotations: Vec::new(),
            fetch_attempts: 0,
            via: None,
            hops: 0,
            ordinal: 0,
            fetch_duration_ms: None,
            content_size: 0,
            outlinks: Vec::new(),
        })
    }

    /// Creates a URI discovered while processing this one
    pub fn discovered(&self, uri: &str) -> UrlResult<Self> {
        let resolved = self
            .url
            .join(uri)
            .map_err(|e| UrlError::Parse(e.to_string()))?;
        let mut child = Self::new(resolved.as_str())?;
        child.via = Some(self.url.clone());
        child.hops = self.hops + 1;
        Ok(child)
    }

    /// Returns the URI with the given scheduling directive
    pub fn with_directive(mut self, directive: SchedulingDirective) -> Self {
        self.directive = directive;
        self
    }

    /// Appends a processing note
    pub fn annotate(&mut self, note: impl Into<String>) {
        self.annotations.push(note.into());
    }

    /// Canonical form used for already-seen filtering
    pub fn canonical(&self) -> String {
        canonicalize(&self.url)
    }

    pub fn is_success(&self) -> bool {
        status::is_success(self.fetch_status)
    }
}

impl fmt::Display for CrawlUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.fetch_status, self.url)?;
        if !self.annotations.is_empty() {
            write!(f, " [{}]", self.annotations.join(","))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_computes_class_key() {
        let uri = CrawlUri::new("https://Example.com:8080/a#x").unwrap();
        assert_eq!(uri.class_key, "example.com:8080");
        assert_eq!(uri.url.as_str(), "https://example.com:8080/a");
        assert_eq!(uri.fetch_status, status::S_UNATTEMPTED);
        assert_eq!(uri.directive, SchedulingDirective::Normal);
    }

    #[test]
    fn test_new_rejects_non_http() {
        assert!(CrawlUri::new("mailto:someone@example.com").is_err());
    }

    #[test]
    fn test_discovered_resolves_relative() {
        let seed = CrawlUri::new("https://example.com/dir/page").unwrap();
        let child = seed.discovered("other").unwrap();
        assert_eq!(child.url.as_str(), "https://example.com/dir/other");
        assert_eq!(child.via.as_ref(), Some(&seed.url));
        assert_eq!(child.hops, 1);
    }

    #[test]
    fn test_directive_precedence() {
        assert!(
            SchedulingDirective::High.precedence() < SchedulingDirective::Normal.precedence()
        );
        assert_eq!(
            SchedulingDirective::Forced.precedence(),
            SchedulingDirective::High.precedence()
        );
    }

    #[test]
    fn test_display_includes_annotations() {
        let mut uri = CrawlUri::new("https://example.com/").unwrap();
        uri.fetch_status = status::S_RUNTIME_EXCEPTION;
        uri.annotate("err=boom");
        assert_eq!(uri.to_string(), "-5 https://example.com/ [err=boom]");
    }

    #[test]
    fn test_outlinks_not_serialized() {
        let mut uri = CrawlUri::new("https://example.com/").unwrap();
        uri.outlinks.push(Url::parse("https://example.com/x").unwrap());
        let json = serde_json::to_string(&uri).unwrap();
        let back: CrawlUri = serde_json::from_str(&json).unwrap();
        assert!(back.outlinks.is_empty());
        assert_eq!(back.url, uri.url);
    }
}
