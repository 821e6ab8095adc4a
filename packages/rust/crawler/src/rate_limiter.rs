//! Per-origin request pacing.
//!
//! One [`RateLimiter`] is shared by every research cycle. Each origin gets its
//! own slot guarded by its own async mutex, so waiting on a slow origin never
//! delays requests to another one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;
use url::Url;

use featurelens_shared::ScrapingConfig;

/// Last dispatch time for one origin.
type Slot = Arc<tokio::sync::Mutex<Option<Instant>>>;

/// Keyed registry of per-origin pacing slots.
pub struct RateLimiter {
    config: Arc<ScrapingConfig>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl RateLimiter {
    pub fn new(config: Arc<ScrapingConfig>) -> Self {
        Self {
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Minimum spacing between two requests to `host`.
    ///
    /// A rate of zero or below disables pacing for that origin.
    pub fn interval_for(&self, host: &str) -> Duration {
        let rps = self
            .config
            .origin_rule(host)
            .and_then(|rule| rule.requests_per_second)
            .unwrap_or(self.config.default_requests_per_second);

        if rps > 0.0 && rps.is_finite() {
            Duration::from_secs_f64(1.0 / rps)
        } else {
            Duration::ZERO
        }
    }

    /// Wait until a request to `url`'s origin may be dispatched.
    pub async fn wait_for(&self, url: &Url) {
        let host = url.host_str().unwrap_or_default();
        self.wait(&origin_key(url), host).await;
    }

    /// Wait until a pacing slot for `origin` is available.
    ///
    /// The origin's lock is held while sleeping, so concurrent callers for
    /// the same origin queue up behind each other.
    pub async fn wait(&self, origin: &str, host: &str) {
        let interval = self.interval_for(host);
        let slot = self.slot(origin);
        let mut last = slot.lock().await;

        if let Some(previous) = *last {
            let ready_at = previous + interval;
            if ready_at > Instant::now() {
                trace!(origin, wait_ms = (ready_at - Instant::now()).as_millis() as u64, "pacing");
                tokio::time::sleep_until(ready_at).await;
            }
        }

        *last = Some(Instant::now());
    }

    fn slot(&self, origin: &str) -> Slot {
        // Inserts are atomic, so a poisoned map is still consistent.
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(origin.to_string()).or_default().clone()
    }
}

/// `scheme://host[:port]`, the key pacing state is tracked under.
pub fn origin_key(url: &Url) -> String {
    url.origin().ascii_serialization()
}

#[cfg(test)]
mod tests {
    use super::*;
    use featurelens_shared::OriginRule;

    fn limiter(default_rps: f64, origins: Vec<OriginRule>) -> Arc<RateLimiter> {
        let config = ScrapingConfig {
            default_requests_per_second: default_rps,
            origins,
            ..ScrapingConfig::default()
        };
        Arc::new(RateLimiter::new(Arc::new(config)))
    }

    #[test]
    fn interval_uses_origin_rule_when_present() {
        let limiter = limiter(
            2.0,
            vec![OriginRule {
                domain: "elastic.co".into(),
                requests_per_second: Some(4.0),
                ..OriginRule::default()
            }],
        );
        assert_eq!(limiter.interval_for("www.elastic.co"), Duration::from_millis(250));
        assert_eq!(limiter.interval_for("github.com"), Duration::from_millis(500));
    }

    #[test]
    fn zero_rate_disables_pacing() {
        let limiter = limiter(0.0, Vec::new());
        assert_eq!(limiter.interval_for("example.com"), Duration::ZERO);
    }

    #[test]
    fn origin_key_includes_port() {
        let url = Url::parse("http://127.0.0.1:8080/docs/page").unwrap();
        assert_eq!(origin_key(&url), "http://127.0.0.1:8080");
    }

    #[tokio::test(start_paused = true)]
    async fn same_origin_requests_are_spaced() {
        let limiter = limiter(5.0, Vec::new());
        let interval = Duration::from_millis(200);

        let mut handles = Vec::new();
        for _ in 0..6 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.wait("https://example.com", "example.com").await;
                Instant::now()
            }));
        }

        let mut stamps = Vec::new();
        for handle in handles {
            stamps.push(handle.await.unwrap());
        }
        stamps.sort();

        for pair in stamps.windows(2) {
            assert!(
                pair[1] - pair[0] >= interval,
                "gap {:?} shorter than {interval:?}",
                pair[1] - pair[0]
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn different_origins_are_independent() {
        let limiter = limiter(1.0, Vec::new());
        let start = Instant::now();

        limiter.wait("https://a.example.com", "a.example.com").await;
        limiter.wait("https://b.example.com", "b.example.com").await;
        limiter.wait("https://c.example.com", "c.example.com").await;

        assert_eq!(Instant::now() - start, Duration::ZERO);

        limiter.wait("https://a.example.com", "a.example.com").await;
        assert!(Instant::now() - start >= Duration::from_secs(1));
    }
}
