use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::{Duration, Instant},
};

use axum::http::{HeaderValue, StatusCode};

use crate::config::{normalize_origin, GatewayConfig};

#[derive(Clone, Copy)]
struct RateEntry {
    count: u32,
    window_start: Instant,
}

pub struct FixedWindowRateLimiter {
    max_requests: u32,
    window: Duration,
    max_keys: usize,
    entries: Mutex<HashMap<String, RateEntry>>,
}

impl FixedWindowRateLimiter {
    pub fn new(max_requests: u32, window: Duration, max_keys: usize) -> Self {
        Self {
            max_requests,
            window,
            max_keys,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut guard = match self.entries.lock() {
            Ok(v) => v,
            Err(_) => return false,
        };

        if guard.len() > self.max_keys {
            guard.retain(|_, entry| now.duration_since(entry.window_start) < self.window);
            if guard.len() > self.max_keys {
                return false;
            }
        }

        let entry = guard.entry(key.to_string()).or_insert(RateEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= self.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count = entry.count.saturating_add(1);
        entry.count <= self.max_requests
    }
}

/// Global and per-IP caps on open control connections.
#[derive(Default)]
pub struct ConnectionLimits {
    active: AtomicUsize,
    per_ip: Mutex<HashMap<IpAddr, usize>>,
}

impl ConnectionLimits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot for `ip`. Every `Ok` must be paired with one `release`.
    pub fn try_acquire(&self, ip: IpAddr, config: &GatewayConfig) -> Result<(), StatusCode> {
        let mut counts = self
            .per_ip
            .lock()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let count = counts.get(&ip).copied().unwrap_or(0);
        if count >= config.ws_max_per_ip {
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
        if self.active.load(Ordering::Relaxed) >= config.ws_max_connections {
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
        counts.insert(ip, count + 1);
        self.active.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn release(&self, ip: IpAddr) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        if let Ok(mut counts) = self.per_ip.lock() {
            if let Some(count) = counts.get_mut(&ip) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    counts.remove(&ip);
                }
            }
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

pub fn cors_origin_values(config: &GatewayConfig) -> Vec<HeaderValue> {
    config
        .allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect()
}

pub fn ws_origin_allowed(config: &GatewayConfig, origin: Option<&str>) -> bool {
    let Some(origin) = origin else {
        return !config.require_origin;
    };
    config.allowed_origins.contains(&normalize_origin(origin))
}
