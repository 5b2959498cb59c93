use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use actix_web::HttpRequest;
use dashmap::DashMap;

/// Idle keys are dropped once every this many checks.
const SWEEP_EVERY: usize = 256;

#[derive(Default)]
struct Hits {
    window: Duration,
    times: VecDeque<Instant>,
}

impl Hits {
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.times.front() {
            if now.duration_since(*front) >= self.window { self.times.pop_front(); } else { break; }
        }
    }
}

/// Sliding window in-memory rate limiter (pod local).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, Hits>>,
    checks: Arc<AtomicUsize>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), checks: Arc::new(AtomicUsize::new(0)), enabled }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled { return true; }
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep();
        }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        entry.window = window;
        entry.prune(now);
        if entry.times.len() < limit {
            entry.times.push_back(now);
            true
        } else {
            false
        }
    }

    /// Forget keys with no hits left inside their window.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.store.retain(|_, hits| {
            hits.prune(now);
            !hits.times.is_empty()
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }
}

/// Per-action limits derived from env.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub contact_limit: usize,
    pub contact_window: Duration,
    pub subscribe_limit: usize,
    pub subscribe_window: Duration,
    pub login_limit: usize,
    pub login_window: Duration,
    /// Key on `Forwarded`/`X-Forwarded-For` instead of the socket peer. Only
    /// safe behind a proxy that overwrites those headers.
    pub trust_forwarded: bool,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
        fn dur_env(name: &str, default: u64) -> Duration { Duration::from_secs(std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)) }
        Self {
            contact_limit: usize_env("RL_CONTACT_LIMIT", 5),
            contact_window: dur_env("RL_CONTACT_WINDOW", 600),
            subscribe_limit: usize_env("RL_SUBSCRIBE_LIMIT", 5),
            subscribe_window: dur_env("RL_SUBSCRIBE_WINDOW", 600),
            login_limit: usize_env("RL_LOGIN_LIMIT", 10),
            login_window: dur_env("RL_LOGIN_WINDOW", 300),
            trust_forwarded: std::env::var("RL_TRUST_FORWARDED").map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false),
        }
    }
}

/// Guard used by the public write endpoints and login.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self { Self { limiter, cfg } }

    /// Built from `RL_ENABLED` (default on) and the per-action env limits.
    pub fn from_env() -> Self {
        let enabled = std::env::var("RL_ENABLED").map(|v| v != "0" && !v.eq_ignore_ascii_case("false")).unwrap_or(true);
        Self::new(InMemoryRateLimiter::new(enabled), RateLimitConfig::from_env())
    }

    /// Client address used as the limiter key.
    pub fn client_key(&self, req: &HttpRequest) -> String {
        if self.cfg.trust_forwarded {
            if let Some(addr) = req.connection_info().realip_remote_addr() {
                return addr.to_string();
            }
        }
        req.peer_addr().map(|a| a.ip().to_string()).unwrap_or_else(|| "unknown".to_string())
    }

    pub fn allow_contact(&self, ip: &str) -> bool { self.limiter.check(&format!("contact:{ip}"), self.cfg.contact_limit, self.cfg.contact_window) }
    pub fn allow_subscribe(&self, ip: &str) -> bool { self.limiter.check(&format!("subscribe:{ip}"), self.cfg.subscribe_limit, self.cfg.subscribe_window) }
    pub fn allow_login(&self, ip: &str) -> bool { self.limiter.check(&format!("login:{ip}"), self.cfg.login_limit, self.cfg.login_window) }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn sliding_window_basic() {
        let rl = InMemoryRateLimiter::new(true);
        let window = Duration::from_millis(50);
        for _ in 0..3 { assert!(rl.check("k", 3, window)); }
        assert!(!rl.check("k", 3, window));
        std::thread::sleep(window);
        assert!(rl.check("k", 3, window));
    }

    #[test]
    fn actions_are_counted_separately() {
        let cfg = RateLimitConfig {
            contact_limit: 1,
            contact_window: Duration::from_secs(60),
            subscribe_limit: 1,
            subscribe_window: Duration::from_secs(60),
            login_limit: 1,
            login_window: Duration::from_secs(60),
            trust_forwarded: false,
        };
        let rl = RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg);
        assert!(rl.allow_contact("1.2.3.4"));
        assert!(!rl.allow_contact("1.2.3.4"));
        assert!(rl.allow_contact("5.6.7.8"));
        assert!(rl.allow_subscribe("1.2.3.4"));
        assert!(rl.allow_login("1.2.3.4"));
    }

    #[test]
    fn idle_keys_are_swept() {
        let rl = InMemoryRateLimiter::new(true);
        let window = Duration::from_millis(20);
        for i in 0..50 { assert!(rl.check(&format!("k{i}"), 1, window)); }
        assert!(rl.check("long", 1, Duration::from_secs(60)));
        assert_eq!(rl.tracked_keys(), 51);
        std::thread::sleep(Duration::from_millis(30));
        rl.sweep();
        assert_eq!(rl.tracked_keys(), 1);
        assert!(!rl.check("long", 1, Duration::from_secs(60)));
    }

    #[test]
    fn many_keys_trigger_a_sweep() {
        let rl = InMemoryRateLimiter::new(true);
        let window = Duration::from_millis(1);
        for i in 0..SWEEP_EVERY * 2 {
            rl.check(&format!("k{i}"), 1, window);
            std::thread::sleep(Duration::from_micros(50));
        }
        assert!(rl.tracked_keys() < SWEEP_EVERY * 2);
    }

    #[test]
    fn disabled_limiter_allows_everything() {
        let rl = InMemoryRateLimiter::new(false);
        for _ in 0..10 { assert!(rl.check("k", 1, Duration::from_secs(60))); }
    }
}
