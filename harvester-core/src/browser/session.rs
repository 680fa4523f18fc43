use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::pattern::PatternSet;

use super::automation::{BrowserAutomation, IsolatedContext};
use super::error::{BrowserError, BrowserResult};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Consecutive polls with no new captured requests before the page counts
/// as network-idle (only after the load event has fired).
const IDLE_STABLE_POLLS: u32 = 2;

/// Everything the extractor needs from a finished page visit: the final
/// DOM's selector hits and media sources, plus the ordered network-request
/// log captured from before navigation started. Duplicates in the log are
/// expected; dedup happens at aggregation.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub source_url: String,
    /// True when the wait budget elapsed before either wait condition fired.
    pub timed_out: bool,
    pub selector_hits: Vec<String>,
    pub network_log: Vec<String>,
    pub media_sources: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitOutcome {
    PatternMatched,
    NetworkIdle,
    TimedOut,
}

/// One browser-tab lifecycle. The backing browsing context is isolated per
/// session and is disposed on every exit path via `close`.
pub struct PageSession<'a> {
    automation: &'a BrowserAutomation,
    context: Option<IsolatedContext>,
    patterns: PatternSet,
    selectors: Vec<String>,
    timeout: Duration,
}

impl<'a> PageSession<'a> {
    pub async fn open(
        automation: &'a BrowserAutomation,
        patterns: PatternSet,
        selectors: &[String],
        timeout: Duration,
    ) -> BrowserResult<PageSession<'a>> {
        let context = automation.new_context().await?;
        Ok(Self {
            automation,
            context: Some(context),
            patterns,
            selectors: selectors.to_vec(),
            timeout,
        })
    }

    /// Navigates and waits until network-idle quiescence or the first
    /// pattern match in the captured log, whichever fires first, bounded by
    /// the session timeout. A timeout is reported in the snapshot, not as an
    /// error; browser-level failures surface as `BrowserError::Navigation`.
    pub async fn run(&mut self, url: &str) -> BrowserResult<SessionSnapshot> {
        let deadline = Instant::now() + self.timeout;

        let load_complete = self.navigate(url, deadline).await?;
        let outcome = self.wait_for_signal(load_complete, deadline).await?;
        debug!(url, ?outcome, "page wait resolved");

        let timed_out = outcome == WaitOutcome::TimedOut;
        let snapshot = SessionSnapshot {
            source_url: url.to_string(),
            timed_out,
            selector_hits: self.read_strings(self.selector_script(), timed_out).await?,
            network_log: self.read_strings(NETWORK_LOG_SCRIPT.to_string(), timed_out).await?,
            media_sources: self.read_strings(MEDIA_SOURCE_SCRIPT.to_string(), timed_out).await?,
        };
        Ok(snapshot)
    }

    pub async fn close(mut self) -> BrowserResult<()> {
        if let Some(context) = self.context.take() {
            self.automation.dispose_context(context).await?;
        }
        Ok(())
    }

    fn context(&self) -> BrowserResult<&IsolatedContext> {
        self.context
            .as_ref()
            .ok_or_else(|| BrowserError::Unexpected("session already closed".to_string()))
    }

    /// Returns whether the load event fired within the budget. A navigation
    /// that is merely slow is not an error; a refused one is.
    async fn navigate(&self, url: &str, deadline: Instant) -> BrowserResult<bool> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        let page = self.context()?.page();
        page.goto(params)
            .await
            .map_err(|err| BrowserError::Navigation(format!("{url}: {err}")))?;

        let budget = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(budget, page.wait_for_navigation()).await {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(err)) => Err(BrowserError::Navigation(format!("{url}: {err}"))),
            Err(_) => Ok(false),
        }
    }

    async fn wait_for_signal(
        &self,
        load_complete: bool,
        deadline: Instant,
    ) -> BrowserResult<WaitOutcome> {
        let mut last_len = 0usize;
        let mut stable_polls = 0u32;
        loop {
            let log = self.read_network_log().await?;
            // Pattern match takes the tick when both conditions could fire.
            if log.iter().any(|entry| self.patterns.matches(entry)) {
                return Ok(WaitOutcome::PatternMatched);
            }
            if log.len() == last_len {
                stable_polls += 1;
            } else {
                stable_polls = 0;
                last_len = log.len();
            }
            if load_complete && stable_polls >= IDLE_STABLE_POLLS {
                return Ok(WaitOutcome::NetworkIdle);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn read_network_log(&self) -> BrowserResult<Vec<String>> {
        self.evaluate_strings(NETWORK_LOG_SCRIPT).await
    }

    /// Snapshot reads after a timeout tolerate evaluation failures: a page
    /// that never settled may refuse script execution, and that must not
    /// escalate a timeout into a run error.
    async fn read_strings(&self, script: String, lenient: bool) -> BrowserResult<Vec<String>> {
        match self.evaluate_strings(&script).await {
            Ok(values) => Ok(values),
            Err(err) if lenient => {
                warn!(error = %err, "snapshot read failed on timed-out page");
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    async fn evaluate_strings(&self, script: &str) -> BrowserResult<Vec<String>> {
        self.context()?
            .page()
            .evaluate(script)
            .await?
            .into_value()
            .map_err(|err| {
                BrowserError::Unexpected(format!("failed to decode page payload: {err}"))
            })
    }

    fn selector_script(&self) -> String {
        format!(
            r#"
(() => {{
    const selectors = {selectors};
    const found = [];
    selectors.forEach(sel => {{
        let nodes = [];
        try {{
            nodes = document.querySelectorAll(sel);
        }} catch (_) {{
            return;
        }}
        nodes.forEach(node => {{
            const candidates = [
                node.href || null,
                node.getAttribute ? node.getAttribute('href') : null,
                node.getAttribute ? node.getAttribute('data-download-url') : null,
                node.getAttribute ? node.getAttribute('data-video-url') : null,
            ];
            for (const candidate of candidates) {{
                if (candidate) {{
                    found.push(String(candidate));
                    break;
                }}
            }}
        }});
    }});
    return found;
}})()
"#,
            selectors = serde_json::to_string(&self.selectors).unwrap_or_else(|_| "[]".to_string())
        )
    }
}

/// Combines the pre-navigation fetch/XHR hook with the performance resource
/// timeline, so media and segment requests issued outside fetch/XHR are
/// still observed.
const NETWORK_LOG_SCRIPT: &str = r#"
(() => {
    const hooked = Array.from(window.__harvesterNetworkLog || []).map(String);
    const resources = performance
        .getEntriesByType('resource')
        .map(entry => String(entry.name || ''));
    return hooked.concat(resources).filter(url => url.length > 0);
})()
"#;

const MEDIA_SOURCE_SCRIPT: &str = r#"
(() => {
    const sources = [];
    document.querySelectorAll('video, source, iframe').forEach(node => {
        const src = node.currentSrc
            || node.src
            || (node.getAttribute ? node.getAttribute('src') : '');
        if (src) {
            sources.push(String(src));
        }
    });
    return sources;
})()
"#;
