use std::collections::HashSet;
use std::time::Duration;

const DEFAULT_ALLOWED_ORIGINS: [&str; 4] = [
    "http://localhost:4200",
    "http://127.0.0.1:4200",
    "http://localhost:3000",
    "http://127.0.0.1:3000",
];

/// Gateway runtime settings, read once at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub allow_public_bind: bool,
    pub ws_max_connections: usize,
    pub ws_max_per_ip: usize,
    pub ws_max_messages_per_minute: u32,
    pub register_rate_limit: u32,
    pub register_rate_window: Duration,
    pub allowed_origins: HashSet<String>,
    /// Reject upgrades that carry no `Origin` header. Native clients never send one.
    pub require_origin: bool,
    pub cors_allow_any: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            allow_public_bind: false,
            ws_max_connections: 4096,
            ws_max_per_ip: 16,
            ws_max_messages_per_minute: 600,
            register_rate_limit: 10,
            register_rate_window: Duration::from_secs(60),
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|origin| normalize_origin(origin))
                .collect(),
            require_origin: false,
            cors_allow_any: false,
        }
    }
}

impl GatewayConfig {
    /// Build the config from `DUET_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("DUET_GATEWAY_BIND_ADDR").unwrap_or(defaults.bind_addr),
            allow_public_bind: env_bool("DUET_ALLOW_PUBLIC_BIND", defaults.allow_public_bind),
            ws_max_connections: env_usize("DUET_WS_MAX_CONNECTIONS", defaults.ws_max_connections),
            ws_max_per_ip: env_usize("DUET_WS_MAX_PER_IP", defaults.ws_max_per_ip),
            ws_max_messages_per_minute: env_u32(
                "DUET_WS_MAX_MESSAGES_PER_MINUTE",
                defaults.ws_max_messages_per_minute,
            ),
            register_rate_limit: env_u32("DUET_REGISTER_RATE_LIMIT", defaults.register_rate_limit),
            register_rate_window: Duration::from_secs(
                env_u32("DUET_REGISTER_RATE_WINDOW_SECS", 60).max(1) as u64,
            ),
            allowed_origins: load_allowed_origins(
                &std::env::var("DUET_ALLOWED_ORIGINS").unwrap_or_default(),
            ),
            require_origin: env_bool("DUET_WS_REQUIRE_ORIGIN", defaults.require_origin),
            cors_allow_any: env_bool("DUET_CORS_ALLOW_ANY", defaults.cors_allow_any),
        }
    }
}

pub fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

pub fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

fn load_allowed_origins(configured: &str) -> HashSet<String> {
    let set: HashSet<String> = configured
        .split(',')
        .map(normalize_origin)
        .filter(|origin| !origin.is_empty())
        .collect();

    if set.is_empty() {
        return DEFAULT_ALLOWED_ORIGINS
            .iter()
            .map(|origin| normalize_origin(origin))
            .collect();
    }
    set
}
