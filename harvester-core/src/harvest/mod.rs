mod rate_limit;

pub use rate_limit::RateLimiter;

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::browser::{
    BrowserAutomation, BrowserResult, CapturedLink, LinkExtractor, PageSession, SessionSnapshot,
};
use crate::config::HarvesterConfig;
use crate::error::ConfigError;
use crate::pattern::PatternSet;

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("no source urls provided")]
    NoSources,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestStatus {
    Success,
    Timeout,
    Error,
}

impl fmt::Display for HarvestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HarvestStatus::Success => "success",
            HarvestStatus::Timeout => "timeout",
            HarvestStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Per-source outcome. Created once per URL processed and never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestResult {
    pub source_url: String,
    pub status: HarvestStatus,
    pub links: Vec<CapturedLink>,
    #[serde(serialize_with = "serialize_millis", rename = "elapsed_ms")]
    pub elapsed: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn serialize_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

/// Unique download URLs across the whole run, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct AggregateLinkSet {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl AggregateLinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-if-absent; returns whether the URL was new.
    pub fn insert(&mut self, url: &str) -> bool {
        if self.seen.insert(url.to_string()) {
            self.ordered.push(url.to_string());
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn urls(&self) -> &[String] {
        &self.ordered
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(String::as_str)
    }
}

impl Serialize for AggregateLinkSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.ordered.serialize(serializer)
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct HarvestStats {
    pub processed: usize,
    pub succeeded: usize,
    pub timed_out: usize,
    pub failed: usize,
    pub unique_links: usize,
    pub total_wait_ms: u64,
    pub duration_secs: u64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub results: Vec<HarvestResult>,
    pub links: AggregateLinkSet,
    pub stats: HarvestStats,
}

/// Seam between the orchestrator and the browser, so the harvesting loop is
/// testable without Chromium.
#[async_trait(?Send)]
pub trait PageVisitor: Send + Sync {
    async fn visit(&self, url: &str) -> BrowserResult<SessionSnapshot>;
}

/// Production visitor: one isolated page session per URL, closed on every
/// exit path.
pub struct BrowserPageVisitor {
    automation: Arc<BrowserAutomation>,
    patterns: PatternSet,
    selectors: Vec<String>,
    timeout: Duration,
}

impl BrowserPageVisitor {
    pub fn new(
        automation: Arc<BrowserAutomation>,
        config: &HarvesterConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            automation,
            patterns: config.compiled_patterns()?,
            selectors: config.download_link_selectors.clone(),
            timeout: Duration::from_secs_f64(config.timeout),
        })
    }
}

#[async_trait(?Send)]
impl PageVisitor for BrowserPageVisitor {
    async fn visit(&self, url: &str) -> BrowserResult<SessionSnapshot> {
        let mut session = PageSession::open(
            &self.automation,
            self.patterns.clone(),
            &self.selectors,
            self.timeout,
        )
        .await?;
        let outcome = session.run(url).await;
        if let Err(err) = session.close().await {
            warn!(url, error = %err, "failed to dispose browsing context");
        }
        outcome
    }
}

/// Drives the whole harvest pass: sources strictly in input order, one
/// session at a time, each visit gated by the rate limiter. A single URL's
/// failure or timeout never aborts the run.
pub struct HarvestOrchestrator {
    visitor: Arc<dyn PageVisitor>,
    extractor: LinkExtractor,
    limiter: RateLimiter,
    cancel: Arc<AtomicBool>,
}

impl HarvestOrchestrator {
    pub fn new(
        visitor: Arc<dyn PageVisitor>,
        extractor: LinkExtractor,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            visitor,
            extractor,
            limiter,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between URLs; setting it stops the run gracefully with
    /// partial results intact.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub async fn run(&mut self, sources: &[String]) -> Result<HarvestReport, HarvestError> {
        if sources.is_empty() {
            return Err(HarvestError::NoSources);
        }

        let start = Instant::now();
        let mut stats = HarvestStats::default();
        let mut aggregate = AggregateLinkSet::new();
        let mut results = Vec::with_capacity(sources.len());

        for url in sources {
            if self.cancel.load(Ordering::Relaxed) {
                info!(processed = results.len(), "harvest cancelled between sources");
                stats.cancelled = true;
                break;
            }

            let waited = self.limiter.acquire().await;
            stats.total_wait_ms += waited.as_millis() as u64;
            if !waited.is_zero() {
                debug!(url = %url, waited_ms = waited.as_millis() as u64, "rate limit gate");
            }

            let visit_start = Instant::now();
            let result = match self.visitor.visit(url).await {
                Ok(snapshot) => {
                    let links = self.extractor.extract(&snapshot);
                    let status = if snapshot.timed_out && links.is_empty() {
                        HarvestStatus::Timeout
                    } else {
                        HarvestStatus::Success
                    };
                    for link in &links {
                        if aggregate.insert(&link.url) {
                            debug!(url = %link.url, strategy = %link.strategy, "captured link");
                        }
                    }
                    HarvestResult {
                        source_url: url.clone(),
                        status,
                        links,
                        elapsed: visit_start.elapsed(),
                        error: None,
                    }
                }
                Err(err) => {
                    warn!(url = %url, error = %err, "source failed");
                    HarvestResult {
                        source_url: url.clone(),
                        status: HarvestStatus::Error,
                        links: Vec::new(),
                        elapsed: visit_start.elapsed(),
                        error: Some(err.to_string()),
                    }
                }
            };

            match result.status {
                HarvestStatus::Success => stats.succeeded += 1,
                HarvestStatus::Timeout => stats.timed_out += 1,
                HarvestStatus::Error => stats.failed += 1,
            }
            info!(
                url = %url,
                status = %result.status,
                links = result.links.len(),
                "source processed"
            );
            results.push(result);
        }

        stats.processed = results.len();
        stats.unique_links = aggregate.len();
        stats.duration_secs = start.elapsed().as_secs();
        info!(
            processed = stats.processed,
            succeeded = stats.succeeded,
            timed_out = stats.timed_out,
            failed = stats.failed,
            unique_links = stats.unique_links,
            "harvest finished"
        );

        Ok(HarvestReport {
            results,
            links: aggregate,
            stats,
        })
    }
}
