//! Time-to-live gate in front of the scrape coordinator.

use std::time::Duration;

use tokio::time::Instant;

/// Decides whether a poll should trigger a fresh scrape.
///
/// A zero TTL means every poll scrapes. Scrapes that ended with errors still
/// open a new cache window.
#[derive(Debug, Clone)]
pub struct CacheGate {
    ttl: Duration,
    window: Window,
}

#[derive(Debug, Clone, Copy)]
enum Window {
    /// The next poll scrapes.
    Open,
    Until(Instant),
    /// The TTL reaches past any representable instant.
    Forever,
}

impl CacheGate {
    /// Starts out immediately eligible.
    pub fn new(ttl: Duration) -> Self {
        CacheGate {
            ttl,
            window: Window::Open,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.window {
            Window::Open => true,
            Window::Until(next) => now >= next,
            Window::Forever => false,
        }
    }

    pub fn mark_scraped(&mut self, now: Instant) {
        self.window = match now.checked_add(self.ttl) {
            Some(next) => Window::Until(next),
            None => Window::Forever,
        };
    }
}
