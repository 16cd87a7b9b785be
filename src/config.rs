use std::time::Duration;

use crate::backoff::BackoffConfig;

/// What happens to a selected item whose single approve/reject/escalate call fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailedDecisionPolicy {
    /// Leave it selected so the operator can retry right away.
    #[default]
    KeepSelected,
    /// Drop it from the selection and let the next refresh reconcile.
    Deselect,
}

impl FailedDecisionPolicy {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep_selected" | "keep" | "retry" => Some(Self::KeepSelected),
            "deselect" | "drop" => Some(Self::Deselect),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the REST backend, e.g. `http://localhost:5000`.
    pub api_url: String,
    pub api_token: Option<String>,
    /// Push endpoint. `None` disables realtime sync without error.
    pub realtime_url: Option<String>,
    /// Minimum gap between realtime-triggered refreshes.
    /// Set via WORKFLOW_REFRESH_THROTTLE_MS. Default: 2000.
    pub refresh_throttle_ms: u64,
    pub reconnect: BackoffConfig,
    pub http_timeout_secs: u64,
    pub http_retries: u32,
    pub default_role: String,
    pub failed_decision_policy: FailedDecisionPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000".into(),
            api_token: None,
            realtime_url: None,
            refresh_throttle_ms: 2000,
            reconnect: BackoffConfig::default(),
            http_timeout_secs: 30,
            http_retries: 2,
            default_role: "MANAGER".into(),
            failed_decision_policy: FailedDecisionPolicy::default(),
        }
    }
}

impl Config {
    pub fn refresh_throttle(&self) -> Duration {
        Duration::from_millis(self.refresh_throttle_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Map an `http(s)://` push URL onto `ws(s)://`. Empty input disables realtime.
pub fn normalize_realtime_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let url = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        trimmed.to_string()
    };
    Some(url)
}

/// Reject unparseable URLs, and plain http to a remote host in production.
fn check_api_url(api_url: &str, env_mode: &str) -> anyhow::Result<()> {
    let parsed = url::Url::parse(api_url)
        .map_err(|e| anyhow::anyhow!("WORKFLOW_API_URL '{}' is not a valid URL: {}", api_url, e))?;

    if env_mode == "production" && parsed.scheme() == "http" {
        let loopback = matches!(parsed.host_str(), Some("localhost") | Some("127.0.0.1") | Some("[::1]"));
        if !loopback {
            anyhow::bail!(
                "WORKFLOW_API_URL uses plain http to a remote host. \
                 Use https before running in production."
            );
        }
    }
    Ok(())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

pub fn load() -> anyhow::Result<Config> {
    load_with(None)
}

/// Like [`load`], with `api_url_override` (e.g. a CLI flag) taking precedence
/// over `WORKFLOW_API_URL`. The override goes through the same checks.
pub fn load_with(api_url_override: Option<String>) -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let defaults = Config::default();

    let api_url = api_url_override
        .or_else(|| std::env::var("WORKFLOW_API_URL").ok())
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .unwrap_or(defaults.api_url);
    check_api_url(&api_url, &std::env::var("WORKFLOW_ENV").unwrap_or_default())?;

    let failed_decision_policy = match std::env::var("WORKFLOW_FAILED_DECISION_POLICY") {
        Ok(v) => FailedDecisionPolicy::parse(&v).unwrap_or_else(|| {
            tracing::warn!(value = %v, "unknown WORKFLOW_FAILED_DECISION_POLICY, using keep_selected");
            FailedDecisionPolicy::KeepSelected
        }),
        Err(_) => defaults.failed_decision_policy,
    };

    let base = defaults.reconnect;
    let reconnect = BackoffConfig {
        base_ms: env_parse("WORKFLOW_RECONNECT_BASE_MS", base.base_ms),
        max_ms: env_parse("WORKFLOW_RECONNECT_MAX_MS", base.max_ms),
        jitter_ms: env_parse("WORKFLOW_RECONNECT_JITTER_MS", base.jitter_ms),
    };

    Ok(Config {
        api_url,
        api_token: std::env::var("WORKFLOW_API_TOKEN").ok().filter(|t| !t.is_empty()),
        realtime_url: std::env::var("WORKFLOW_REALTIME_URL")
            .ok()
            .and_then(|v| normalize_realtime_url(&v)),
        refresh_throttle_ms: env_parse("WORKFLOW_REFRESH_THROTTLE_MS", defaults.refresh_throttle_ms),
        reconnect,
        http_timeout_secs: env_parse("WORKFLOW_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
        http_retries: env_parse("WORKFLOW_HTTP_RETRIES", defaults.http_retries),
        default_role: std::env::var("WORKFLOW_DEFAULT_ROLE")
            .ok()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(defaults.default_role),
        failed_decision_policy,
    })
}
