use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use harvester_core::{
    BrowserError, BrowserResult, HarvestError, HarvestOrchestrator, HarvestStatus, LinkExtractor,
    PageVisitor, PatternSet, RateLimiter, SessionSnapshot,
};

#[derive(Clone, Default)]
struct PageStub {
    selector_hits: Vec<String>,
    network_log: Vec<String>,
    media_sources: Vec<String>,
    timed_out: bool,
    fail: bool,
}

#[derive(Default)]
struct MockVisitor {
    pages: HashMap<String, PageStub>,
    visited: Mutex<Vec<String>>,
    cancel_on_visit: Mutex<Option<Arc<AtomicBool>>>,
}

impl MockVisitor {
    fn new(pages: HashMap<String, PageStub>) -> Arc<Self> {
        Arc::new(Self {
            pages,
            ..Default::default()
        })
    }
}

#[async_trait(?Send)]
impl PageVisitor for MockVisitor {
    async fn visit(&self, url: &str) -> BrowserResult<SessionSnapshot> {
        self.visited.lock().unwrap().push(url.to_string());
        if let Some(flag) = self.cancel_on_visit.lock().unwrap().as_ref() {
            flag.store(true, Ordering::Relaxed);
        }
        let stub = self.pages.get(url).cloned().unwrap_or_default();
        if stub.fail {
            return Err(BrowserError::Navigation(format!("{url}: dns failure")));
        }
        Ok(SessionSnapshot {
            source_url: url.to_string(),
            timed_out: stub.timed_out,
            selector_hits: stub.selector_hits,
            network_log: stub.network_log,
            media_sources: stub.media_sources,
        })
    }
}

fn extractor(globs: &[&str]) -> LinkExtractor {
    let owned: Vec<String> = globs.iter().map(|g| g.to_string()).collect();
    LinkExtractor::new(PatternSet::compile(&owned).unwrap())
}

fn orchestrator(visitor: Arc<MockVisitor>, min_delay: Duration) -> HarvestOrchestrator {
    HarvestOrchestrator::new(
        visitor,
        extractor(&["*.m3u8*", "*video*", "*.mp4*"]),
        RateLimiter::new(min_delay, 100),
    )
}

fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(|u| u.to_string()).collect()
}

#[tokio::test]
async fn aggregate_preserves_first_seen_order_across_sources() {
    let mut pages = HashMap::new();
    pages.insert(
        "https://a.com/ep1".to_string(),
        PageStub {
            selector_hits: vec![
                "https://cdn.com/x.mp4".to_string(),
                "https://cdn.com/y.mp4".to_string(),
            ],
            ..Default::default()
        },
    );
    pages.insert(
        "https://a.com/ep2".to_string(),
        PageStub {
            network_log: vec![
                "https://cdn.com/y.mp4".to_string(),
                "https://cdn.com/z.m3u8".to_string(),
            ],
            ..Default::default()
        },
    );

    let mut runner = orchestrator(MockVisitor::new(pages), Duration::ZERO);
    let report = runner
        .run(&urls(&["https://a.com/ep1", "https://a.com/ep2"]))
        .await
        .unwrap();

    // ep1 {x,y} via selector, ep2 {y,z} via intercept: aggregate is [x,y,z].
    assert_eq!(
        report.links.urls(),
        &[
            "https://cdn.com/x.mp4".to_string(),
            "https://cdn.com/y.mp4".to_string(),
            "https://cdn.com/z.m3u8".to_string(),
        ]
    );
    assert_eq!(report.stats.succeeded, 2);
    assert_eq!(report.stats.unique_links, 3);
}

#[tokio::test]
async fn navigation_failure_does_not_halt_the_run() {
    let mut pages = HashMap::new();
    pages.insert(
        "https://a.com/ok1".to_string(),
        PageStub {
            media_sources: vec!["https://cdn.com/one.mp4".to_string()],
            ..Default::default()
        },
    );
    pages.insert(
        "https://a.com/bad".to_string(),
        PageStub {
            fail: true,
            ..Default::default()
        },
    );
    pages.insert(
        "https://a.com/ok2".to_string(),
        PageStub {
            media_sources: vec!["https://cdn.com/two.mp4".to_string()],
            ..Default::default()
        },
    );

    let visitor = MockVisitor::new(pages);
    let mut runner = orchestrator(Arc::clone(&visitor), Duration::ZERO);
    let report = runner
        .run(&urls(&[
            "https://a.com/ok1",
            "https://a.com/bad",
            "https://a.com/ok2",
        ]))
        .await
        .unwrap();

    assert_eq!(visitor.visited.lock().unwrap().len(), 3);
    assert_eq!(report.results.len(), 3);
    assert_eq!(report.results[0].status, HarvestStatus::Success);
    assert_eq!(report.results[1].status, HarvestStatus::Error);
    assert!(report.results[1].error.as_deref().unwrap().contains("dns"));
    assert_eq!(report.results[2].status, HarvestStatus::Success);
    assert_eq!(report.links.len(), 2);
    assert_eq!(report.stats.failed, 1);
}

#[tokio::test]
async fn empty_source_list_fails_fast() {
    let mut runner = orchestrator(MockVisitor::new(HashMap::new()), Duration::ZERO);
    let err = runner.run(&[]).await.unwrap_err();
    assert!(matches!(err, HarvestError::NoSources));
}

#[tokio::test]
async fn timeout_without_links_is_timeout_status() {
    let mut pages = HashMap::new();
    pages.insert(
        "https://a.com/slow".to_string(),
        PageStub {
            timed_out: true,
            ..Default::default()
        },
    );
    let mut runner = orchestrator(MockVisitor::new(pages), Duration::ZERO);
    let report = runner.run(&urls(&["https://a.com/slow"])).await.unwrap();
    assert_eq!(report.results[0].status, HarvestStatus::Timeout);
    assert_eq!(report.stats.timed_out, 1);
    assert!(report.links.is_empty());
}

#[tokio::test]
async fn timeout_with_links_still_counts_as_success() {
    let mut pages = HashMap::new();
    pages.insert(
        "https://a.com/slow".to_string(),
        PageStub {
            timed_out: true,
            media_sources: vec!["https://cdn.com/late.mp4".to_string()],
            ..Default::default()
        },
    );
    let mut runner = orchestrator(MockVisitor::new(pages), Duration::ZERO);
    let report = runner.run(&urls(&["https://a.com/slow"])).await.unwrap();
    assert_eq!(report.results[0].status, HarvestStatus::Success);
    assert_eq!(report.links.len(), 1);
}

#[tokio::test]
async fn sources_are_visited_in_input_order() {
    let visitor = MockVisitor::new(HashMap::new());
    let mut runner = orchestrator(Arc::clone(&visitor), Duration::ZERO);
    runner
        .run(&urls(&["https://a.com/3", "https://a.com/1", "https://a.com/2"]))
        .await
        .unwrap();
    assert_eq!(
        *visitor.visited.lock().unwrap(),
        urls(&["https://a.com/3", "https://a.com/1", "https://a.com/2"])
    );
}

#[tokio::test(start_paused = true)]
async fn rate_limiter_gates_every_visit() {
    let mut pages = HashMap::new();
    for url in ["https://a.com/1", "https://a.com/2", "https://a.com/3"] {
        pages.insert(url.to_string(), PageStub::default());
    }
    let mut runner = orchestrator(MockVisitor::new(pages), Duration::from_secs(5));
    let start = Instant::now();
    let report = runner
        .run(&urls(&["https://a.com/1", "https://a.com/2", "https://a.com/3"]))
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_secs(10));
    assert_eq!(report.stats.total_wait_ms, 10_000);
}

#[tokio::test]
async fn cancel_flag_stops_between_sources() {
    let mut pages = HashMap::new();
    pages.insert(
        "https://a.com/1".to_string(),
        PageStub {
            media_sources: vec!["https://cdn.com/one.mp4".to_string()],
            ..Default::default()
        },
    );
    pages.insert("https://a.com/2".to_string(), PageStub::default());

    let visitor = MockVisitor::new(pages);
    let mut runner = orchestrator(Arc::clone(&visitor), Duration::ZERO);
    *visitor.cancel_on_visit.lock().unwrap() = Some(runner.cancel_flag());

    let report = runner
        .run(&urls(&["https://a.com/1", "https://a.com/2"]))
        .await
        .unwrap();

    // The flag is raised during the first visit, so the second never starts.
    assert_eq!(report.results.len(), 1);
    assert!(report.stats.cancelled);
    assert_eq!(report.links.len(), 1);
    assert_eq!(visitor.visited.lock().unwrap().len(), 1);
}
