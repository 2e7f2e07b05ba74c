use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://api.sense.com/apiservice/api/v1";
pub const DEFAULT_REALTIME_BASE: &str = "wss://clientrt.sense.com";

/// Where the vendor API lives. Split out of [`Config`] so the session and the
/// stream can be pointed at a local mock.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub api_base: String,
    pub realtime_base: String,
}

impl Endpoints {
    pub fn new(api_base: &str, realtime_base: &str) -> Result<Self> {
        let api_base = api_base.trim().trim_end_matches('/').to_string();
        let realtime_base = realtime_base.trim().trim_end_matches('/').to_string();
        Url::parse(&api_base).with_context(|| format!("invalid API base URL {api_base}"))?;
        let realtime = Url::parse(&realtime_base)
            .with_context(|| format!("invalid realtime base URL {realtime_base}"))?;
        if !matches!(realtime.scheme(), "ws" | "wss") {
            return Err(anyhow!(
                "realtime base URL must use ws:// or wss:// (got {realtime_base})"
            ));
        }
        Ok(Self {
            api_base,
            realtime_base,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub username: String,
    pub password: String,

    pub output_dir: PathBuf,
    pub rrdtool_bin: PathBuf,

    pub endpoints: Endpoints,
    pub http_timeout: Duration,
    pub watchdog_interval: Duration,
    pub refresh_margin: Duration,
    /// Log the labs report and per-device usage once after login.
    pub startup_report: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let username = env_required("SENSE_USER")?;
        let password = env_required("SENSE_PASS")?;

        let output_dir = PathBuf::from(env_string("SENSE_OUTPUT_DIR", Some("out".to_string()))?);
        let rrdtool_bin =
            PathBuf::from(env_string("SENSE_RRDTOOL_BIN", Some("rrdtool".to_string()))?);

        let api_base = env_string("SENSE_API_BASE", Some(DEFAULT_API_BASE.to_string()))?;
        let realtime_base =
            env_string("SENSE_REALTIME_BASE", Some(DEFAULT_REALTIME_BASE.to_string()))?;
        let endpoints = Endpoints::new(&api_base, &realtime_base)?;

        let http_timeout = Duration::from_secs(env_u64("SENSE_HTTP_TIMEOUT_SECS", Some(10))?);
        let watchdog_interval = Duration::from_secs(env_u64("SENSE_WATCHDOG_SECS", Some(5))?);
        if watchdog_interval.is_zero() {
            return Err(anyhow!("SENSE_WATCHDOG_SECS must be greater than zero"));
        }
        let refresh_margin =
            Duration::from_secs(env_u64("SENSE_REFRESH_MARGIN_SECS", Some(5 * 60))?);
        let startup_report = env_bool("SENSE_STARTUP_REPORT", false);

        Ok(Self {
            username,
            password,
            output_dir,
            rrdtool_bin,
            endpoints,
            http_timeout,
            watchdog_interval,
            refresh_margin,
            startup_report,
        })
    }
}

fn env_required(key: &str) -> Result<String> {
    env_optional(key).ok_or_else(|| anyhow!("missing env var {key}"))
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env_optional(key) {
        Some(value) => value
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        None => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_optional(key).map(|value| value.to_lowercase()) {
        Some(value) if value == "1" || value == "true" || value == "yes" => true,
        Some(value) if value == "0" || value == "false" || value == "no" => false,
        _ => default,
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
