use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::{sleep, Instant};

const WINDOW: Duration = Duration::from_secs(60);

/// Throttles page visits against the remote site.
///
/// Two constraints are enforced together: a minimum delay since the last
/// acquired slot, and a cap on acquisitions within any trailing 60-second
/// window. `acquire` waits for the larger of the two required delays, so it
/// only ever delays, never fails. State persists for the lifetime of the
/// limiter; reuse across sequential passes is fine.
#[derive(Debug)]
pub struct RateLimiter {
    min_delay: Duration,
    max_per_minute: usize,
    window: VecDeque<Instant>,
    // Tracked separately from the window: the min-delay constraint must
    // outlive pruning when the configured delay exceeds 60 s.
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_delay: Duration, max_per_minute: usize) -> Self {
        Self {
            min_delay,
            max_per_minute: max_per_minute.max(1),
            window: VecDeque::new(),
            last: None,
        }
    }

    /// Blocks until the next visit is safe, records it, and returns how long
    /// the caller waited.
    pub async fn acquire(&mut self) -> Duration {
        let now = Instant::now();
        while self
            .window
            .front()
            .is_some_and(|stamp| now.duration_since(*stamp) >= WINDOW)
        {
            self.window.pop_front();
        }

        let mut wait = Duration::ZERO;
        if let Some(last) = self.last {
            let since_last = now.duration_since(last);
            if since_last < self.min_delay {
                wait = self.min_delay - since_last;
            }
        }
        if self.window.len() >= self.max_per_minute {
            // The Mth-most-recent acquisition must age past the window
            // before another slot opens.
            let gate = self.window[self.window.len() - self.max_per_minute];
            wait = wait.max((gate + WINDOW).saturating_duration_since(now));
        }

        if !wait.is_zero() {
            sleep(wait).await;
        }
        let stamp = Instant::now();
        self.window.push_back(stamp);
        self.last = Some(stamp);
        wait
    }
}
