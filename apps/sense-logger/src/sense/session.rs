use super::auth::{Credential, CredentialUpdate};
use super::devices::{DeviceDetails, DeviceOverview, DeviceRegistry};
use super::labs::LabsReport;
use super::SenseError;
use crate::config::Endpoints;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::sync::Arc;

const CLIENT_ID_LEN: usize = 128;
const CLIENT_ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// What the realtime stream needs from the session to open a connection.
#[derive(Debug, Clone)]
pub struct StreamCredentials {
    pub monitor_id: i64,
    pub access_token: String,
    pub client_id: String,
}

/// Authenticated session against the vendor API. Owns the credential and the
/// device registry it populates; there is exactly one per process and it is
/// passed explicitly to whatever needs it.
pub struct SenseSession {
    http: Client,
    endpoints: Endpoints,
    client_id: String,
    credential: Option<Credential>,
    registry: Arc<DeviceRegistry>,
}

impl SenseSession {
    pub fn new(http: Client, endpoints: Endpoints) -> Self {
        Self {
            http,
            endpoints,
            client_id: generate_client_id(CLIENT_ID_LEN),
            credential: None,
            registry: Arc::new(DeviceRegistry::new()),
        }
    }

    pub fn registry(&self) -> Arc<DeviceRegistry> {
        self.registry.clone()
    }

    /// Logs in and loads the device snapshot. The session is only usable once
    /// both have succeeded.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), SenseError> {
        const ENDPOINT: &str = "authenticate";
        let url = format!("{}/authenticate", self.endpoints.api_base);
        let response = self
            .http
            .post(url)
            .form(&[("email", username), ("password", password)])
            .send()
            .await
            .map_err(SenseError::transport(ENDPOINT))?;
        let update: CredentialUpdate = decode_auth_response(ENDPOINT, response).await?;

        let credential = Credential::from_login(update, Utc::now());
        if !credential.authorized {
            self.credential = None;
            return Err(SenseError::AuthenticationFailed);
        }
        if credential.monitor_id().is_none() {
            self.credential = None;
            return Err(SenseError::NoMonitor);
        }
        tracing::info!(
            account_id = credential.account_id,
            user_id = credential.user_id,
            monitor_id = credential.monitor_id().unwrap_or_default(),
            expires = %credential.expires,
            "authenticated with Sense"
        );
        tracing::debug!(
            roles = credential.roles.as_deref().unwrap_or(""),
            bridge_server = credential.bridge_server.as_deref().unwrap_or(""),
            date_created = credential.date_created.as_deref().unwrap_or(""),
            totp_enabled = credential.totp_enabled,
            has_settings = credential.settings.is_some(),
            "account details"
        );
        self.credential = Some(credential);

        if let Err(err) = self.load_snapshot().await {
            self.credential = None;
            return Err(err);
        }
        Ok(())
    }

    /// Renews the token pair and returns the new expiry.
    pub async fn refresh(&mut self) -> Result<DateTime<Utc>, SenseError> {
        const ENDPOINT: &str = "renew";
        let credential = self.authorized()?;
        let user_id = credential.user_id.to_string();
        let refresh_token = credential.refresh_token.clone();

        let url = format!("{}/renew", self.endpoints.api_base);
        let response = self
            .http
            .post(url)
            .form(&[
                ("user_id", user_id.as_str()),
                ("is_access_token", "true"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(SenseError::transport(ENDPOINT))?;
        let update = match decode_auth_response(ENDPOINT, response).await {
            Ok(update) => update,
            Err(SenseError::AuthenticationFailed) => {
                if let Some(credential) = self.credential.as_mut() {
                    credential.authorized = false;
                }
                return Err(SenseError::AuthenticationFailed);
            }
            Err(err) => return Err(err),
        };

        let Some(credential) = self.credential.as_mut() else {
            return Err(SenseError::NotAuthenticated);
        };
        credential.refresh_with(update, Utc::now());
        if !credential.authorized {
            return Err(SenseError::AuthenticationFailed);
        }
        tracing::info!(expires = %credential.expires, "refreshed Sense credential");
        Ok(credential.expires)
    }

    /// `None` until a login has succeeded (or after the server revoked it).
    pub fn token_expiry(&self) -> Option<DateTime<Utc>> {
        self.credential
            .as_ref()
            .filter(|credential| credential.authorized)
            .map(|credential| credential.expires)
    }

    /// Fetches the monitor's device overview into the registry.
    pub async fn load_snapshot(&self) -> Result<usize, SenseError> {
        const ENDPOINT: &str = "devices/overview";
        let credential = self.authorized()?;
        let monitor_id = credential.monitor_id().ok_or(SenseError::NoMonitor)?;
        let url = format!(
            "{}/app/monitors/{monitor_id}/devices/overview",
            self.endpoints.api_base
        );
        let response = self
            .http
            .get(url)
            .query(&[("include_merged", "true")])
            .header("Authorization", format!("bearer {}", credential.access_token))
            .send()
            .await
            .map_err(SenseError::transport(ENDPOINT))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SenseError::LoadDevicesFailed { status });
        }
        let overview: DeviceOverview = decode_body(ENDPOINT, response).await?;
        let count = self.registry.replace_snapshot(overview);
        tracing::info!(
            monitor_id,
            devices = count,
            checksum = self.registry.checksum().as_deref().unwrap_or(""),
            "loaded device snapshot"
        );
        Ok(count)
    }

    /// Fetches the detail record (usage history, alert settings) of one device.
    pub async fn device_details(&self, device_id: &str) -> Result<DeviceDetails, SenseError> {
        self.get_monitor_resource("devices/{device}", &["devices", device_id])
            .await
    }

    pub async fn labs_report(&self) -> Result<LabsReport, SenseError> {
        self.get_monitor_resource("labs_content", &["labs_content"])
            .await
    }

    pub fn stream_credentials(&self) -> Result<StreamCredentials, SenseError> {
        let credential = self.authorized()?;
        Ok(StreamCredentials {
            monitor_id: credential.monitor_id().ok_or(SenseError::NoMonitor)?,
            access_token: credential.access_token.clone(),
            client_id: self.client_id.clone(),
        })
    }

    /// Bearer GET of `{api_base}/app/monitors/{monitor_id}/<segments>`.
    async fn get_monitor_resource<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        segments: &[&str],
    ) -> Result<T, SenseError> {
        let credential = self.authorized()?;
        let monitor_id = credential.monitor_id().ok_or(SenseError::NoMonitor)?;
        let raw = format!("{}/app/monitors/{monitor_id}", self.endpoints.api_base);
        let mut url =
            Url::parse(&raw).map_err(|err| SenseError::InvalidUrl(format!("{raw}: {err}")))?;
        url.path_segments_mut()
            .map_err(|()| SenseError::InvalidUrl(raw.clone()))?
            .extend(segments);

        let response = self
            .http
            .get(url)
            .header("Authorization", format!("bearer {}", credential.access_token))
            .send()
            .await
            .map_err(SenseError::transport(endpoint))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SenseError::UnexpectedStatus { endpoint, status });
        }
        decode_body(endpoint, response).await
    }

    fn authorized(&self) -> Result<&Credential, SenseError> {
        self.credential
            .as_ref()
            .filter(|credential| credential.authorized)
            .ok_or(SenseError::NotAuthenticated)
    }
}

async fn decode_auth_response(
    endpoint: &'static str,
    response: Response,
) -> Result<CredentialUpdate, SenseError> {
    let status = response.status();
    if matches!(
        status,
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
    ) {
        return Err(SenseError::AuthenticationFailed);
    }
    if !status.is_success() {
        return Err(SenseError::UnexpectedStatus { endpoint, status });
    }
    decode_body(endpoint, response).await
}

async fn decode_body<T: DeserializeOwned>(
    endpoint: &'static str,
    response: Response,
) -> Result<T, SenseError> {
    let body = response
        .bytes()
        .await
        .map_err(SenseError::transport(endpoint))?;
    serde_json::from_slice(&body).map_err(SenseError::decode(endpoint))
}

fn generate_client_id(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(CLIENT_ID_CHARSET[rng.gen_range(0..CLIENT_ID_CHARSET.len())]))
        .collect()
}
