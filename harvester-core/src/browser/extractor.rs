use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use url::Url;

use crate::pattern::PatternSet;

use super::session::SessionSnapshot;

/// How a candidate URL was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryStrategy {
    Selector,
    NetworkIntercept,
    MediaSource,
}

impl fmt::Display for DiscoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DiscoveryStrategy::Selector => "selector",
            DiscoveryStrategy::NetworkIntercept => "network-intercept",
            DiscoveryStrategy::MediaSource => "media-source",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CapturedLink {
    pub url: String,
    pub strategy: DiscoveryStrategy,
    pub source_url: String,
}

/// Applies the three extraction strategies to a finished session snapshot.
///
/// Pure function of the snapshot: no browser access, no side effects. The
/// per-session result is deduplicated by exact URL string with
/// insert-if-absent semantics, so the first strategy to find a URL keeps the
/// tag regardless of how the later strategies iterate.
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    patterns: PatternSet,
}

impl LinkExtractor {
    pub fn new(patterns: PatternSet) -> Self {
        Self { patterns }
    }

    pub fn extract(&self, snapshot: &SessionSnapshot) -> Vec<CapturedLink> {
        let mut seen = HashSet::new();
        let mut links = Vec::new();
        let mut push = |url: &str, strategy: DiscoveryStrategy| {
            if seen.insert(url.to_string()) {
                links.push(CapturedLink {
                    url: url.to_string(),
                    strategy,
                    source_url: snapshot.source_url.clone(),
                });
            }
        };

        for hit in &snapshot.selector_hits {
            if is_http_url(hit) {
                push(hit, DiscoveryStrategy::Selector);
            }
        }
        for entry in &snapshot.network_log {
            if self.patterns.matches(entry) {
                push(entry, DiscoveryStrategy::NetworkIntercept);
            }
        }
        for source in &snapshot.media_sources {
            if is_http_url(source) {
                push(source, DiscoveryStrategy::MediaSource);
            }
        }

        links
    }
}

/// DOM attributes can carry relative paths, javascript: handlers, or blob:
/// object URLs; only absolute http(s) URLs are downloadable candidates.
fn is_http_url(candidate: &str) -> bool {
    match Url::parse(candidate) {
        Ok(url) => matches!(url.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor(globs: &[&str]) -> LinkExtractor {
        let owned: Vec<String> = globs.iter().map(|g| g.to_string()).collect();
        LinkExtractor::new(PatternSet::compile(&owned).unwrap())
    }

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            source_url: "https://a.com/ep1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn unions_all_three_strategies() {
        let mut snap = snapshot();
        snap.selector_hits = vec!["https://cdn.com/file.mp4".to_string()];
        snap.network_log = vec![
            "https://cdn.com/master.m3u8".to_string(),
            "https://cdn.com/analytics.js".to_string(),
        ];
        snap.media_sources = vec!["https://cdn.com/embed".to_string()];

        let links = extractor(&["*.m3u8*"]).extract(&snap);
        assert_eq!(links.len(), 3);
        assert_eq!(links[0].strategy, DiscoveryStrategy::Selector);
        assert_eq!(links[1].url, "https://cdn.com/master.m3u8");
        assert_eq!(links[1].strategy, DiscoveryStrategy::NetworkIntercept);
        assert_eq!(links[2].strategy, DiscoveryStrategy::MediaSource);
    }

    #[test]
    fn first_strategy_wins_on_duplicate_url() {
        let mut snap = snapshot();
        snap.selector_hits = vec!["https://cdn.com/master.m3u8".to_string()];
        snap.network_log = vec!["https://cdn.com/master.m3u8".to_string()];

        let links = extractor(&["*.m3u8*"]).extract(&snap);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].strategy, DiscoveryStrategy::Selector);
    }

    #[test]
    fn network_log_duplicates_collapse() {
        let mut snap = snapshot();
        snap.network_log = vec![
            "https://cdn.com/chunk.m3u8".to_string(),
            "https://cdn.com/chunk.m3u8".to_string(),
        ];
        let links = extractor(&["*.m3u8*"]).extract(&snap);
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn non_http_candidates_are_ignored() {
        let mut snap = snapshot();
        snap.selector_hits = vec![
            "javascript:void(0)".to_string(),
            "/relative/path.mp4".to_string(),
        ];
        snap.media_sources = vec!["blob:https://a.com/uuid".to_string()];
        let links = extractor(&["*video*"]).extract(&snap);
        assert!(links.is_empty());
    }

    #[test]
    fn empty_snapshot_yields_empty_set_not_error() {
        let links = extractor(&["*video*"]).extract(&snapshot());
        assert!(links.is_empty());
    }

    #[test]
    fn links_carry_their_source_url() {
        let mut snap = snapshot();
        snap.media_sources = vec!["https://cdn.com/clip.mp4".to_string()];
        let links = extractor(&["*video*"]).extract(&snap);
        assert_eq!(links[0].source_url, "https://a.com/ep1");
    }
}
