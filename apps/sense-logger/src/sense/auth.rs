use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};

/// Lifetime assumed for a token pair when the server does not say otherwise.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 24 * 60 * 60;

fn default_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    now + ChronoDuration::seconds(DEFAULT_TOKEN_LIFETIME_SECS)
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MonitorInfo {
    pub id: i64,
    #[serde(flatten)]
    pub details: Map<String, JsonValue>,
}

/// Bearer credential for one account plus the metadata the login endpoint
/// hands back alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub authorized: bool,
    pub account_id: i64,
    pub user_id: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub roles: Option<String>,
    pub bridge_server: Option<String>,
    pub date_created: Option<String>,
    pub totp_enabled: bool,
    pub settings: Option<JsonValue>,
    pub monitors: Vec<MonitorInfo>,
    pub expires: DateTime<Utc>,
}

/// Body of either the authenticate or the renew endpoint. Every field is
/// optional: the renew endpoint omits most of what login returns.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialUpdate {
    #[serde(default)]
    pub authorized: Option<bool>,
    #[serde(default)]
    pub account_id: Option<i64>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub roles: Option<String>,
    #[serde(default)]
    pub bridge_server: Option<String>,
    #[serde(default)]
    pub date_created: Option<String>,
    #[serde(default)]
    pub totp_enabled: Option<bool>,
    #[serde(default)]
    pub settings: Option<JsonValue>,
    #[serde(default)]
    pub monitors: Option<Vec<MonitorInfo>>,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
}

impl Credential {
    /// Builds the credential from a login response. An `expires` in the
    /// response wins over the default lifetime.
    pub fn from_login(update: CredentialUpdate, now: DateTime<Utc>) -> Self {
        let mut credential = Self {
            authorized: false,
            account_id: 0,
            user_id: 0,
            access_token: String::new(),
            refresh_token: String::new(),
            roles: None,
            bridge_server: None,
            date_created: None,
            totp_enabled: false,
            settings: None,
            monitors: Vec::new(),
            expires: default_expiry(now),
        };
        credential.apply(update);
        credential
    }

    /// Overlays a renew response: the expiry restarts from `now` unless the
    /// response carries its own, and absent fields keep their prior value.
    pub fn refresh_with(&mut self, update: CredentialUpdate, now: DateTime<Utc>) {
        self.expires = default_expiry(now);
        self.apply(update);
    }

    pub fn apply(&mut self, update: CredentialUpdate) {
        if let Some(authorized) = update.authorized {
            self.authorized = authorized;
        }
        if let Some(account_id) = update.account_id {
            self.account_id = account_id;
        }
        if let Some(user_id) = update.user_id {
            self.user_id = user_id;
        }
        if let Some(access_token) = update.access_token {
            self.access_token = access_token;
        }
        if let Some(refresh_token) = update.refresh_token {
            self.refresh_token = refresh_token;
        }
        if update.roles.is_some() {
            self.roles = update.roles;
        }
        if update.bridge_server.is_some() {
            self.bridge_server = update.bridge_server;
        }
        if update.date_created.is_some() {
            self.date_created = update.date_created;
        }
        if let Some(totp_enabled) = update.totp_enabled {
            self.totp_enabled = totp_enabled;
        }
        if update.settings.is_some() {
            self.settings = update.settings;
        }
        if let Some(monitors) = update.monitors {
            self.monitors = monitors;
        }
        if let Some(expires) = update.expires {
            self.expires = expires;
        }
    }

    /// The session only ever tracks the first monitor on the account.
    pub fn monitor_id(&self) -> Option<i64> {
        self.monitors.first().map(|monitor| monitor.id)
    }
}
