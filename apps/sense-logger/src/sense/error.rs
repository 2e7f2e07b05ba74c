use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SenseError {
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("account has no monitor to track")]
    NoMonitor,
    #[error("transport error calling {endpoint}: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected HTTP status {status} from {endpoint}")]
    UnexpectedStatus {
        endpoint: &'static str,
        status: StatusCode,
    },
    #[error("failed to decode {endpoint} response: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid request URL {0}")]
    InvalidUrl(String),
    #[error("failed to load devices: {status}")]
    LoadDevicesFailed { status: StatusCode },
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("failed to connect to realtime feed: {0}")]
    ConnectFailed(String),
    #[error("realtime feed closed")]
    EndOfStream,
}

impl SenseError {
    pub(crate) fn transport(endpoint: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| Self::Transport { endpoint, source }
    }

    pub(crate) fn decode(endpoint: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| Self::Decode { endpoint, source }
    }
}
