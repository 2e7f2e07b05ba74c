//! In-process stand-ins for the vendor cloud and the rrdtool binary.

use crate::archive::{ArchiveError, RrdEngine, StoreDefinition};
use crate::config::Endpoints;
use crate::sense::{RealtimeStream, SenseSession};
use axum::extract::{Form, Path as UrlPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response as WsResponse};
use tokio_tungstenite::tungstenite::Message;

pub const MONITOR_ID: i64 = 4242;
pub const USER_ID: i64 = 77;

/// One scripted action on a mock feed connection. After the script runs out
/// the connection stays open (silent) until the client goes away.
#[derive(Debug, Clone)]
pub enum FeedStep {
    Send(String),
    Pause(Duration),
    Close,
}

#[derive(Debug, Default)]
pub struct MockSenseOptions {
    pub reject_login: bool,
    pub reject_refresh: bool,
    pub fail_devices: bool,
    pub fail_labs: bool,
    /// Played in order, one script per accepted feed connection.
    pub feeds: Vec<Vec<FeedStep>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenewForm {
    pub user_id: String,
    pub is_access_token: String,
    pub refresh_token: String,
}

pub struct MockState {
    reject_login: bool,
    reject_refresh: bool,
    fail_devices: bool,
    fail_labs: bool,
    logins: Mutex<Vec<String>>,
    renew_forms: Mutex<Vec<RenewForm>>,
    refreshes: AtomicUsize,
    feeds: Mutex<VecDeque<Vec<FeedStep>>>,
    feed_requests: Mutex<Vec<String>>,
}

impl MockState {
    pub fn logins(&self) -> Vec<String> {
        self.logins.lock().unwrap().clone()
    }

    pub fn renew_forms(&self) -> Vec<RenewForm> {
        self.renew_forms.lock().unwrap().clone()
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Request URIs (path and query) of every feed handshake so far.
    pub fn feed_requests(&self) -> Vec<String> {
        self.feed_requests.lock().unwrap().clone()
    }
}

pub struct MockSense {
    pub api_base: String,
    pub realtime_base: String,
    pub state: Arc<MockState>,
}

impl MockSense {
    pub async fn start(options: MockSenseOptions) -> Self {
        let state = Arc::new(MockState {
            reject_login: options.reject_login,
            reject_refresh: options.reject_refresh,
            fail_devices: options.fail_devices,
            fail_labs: options.fail_labs,
            logins: Mutex::default(),
            renew_forms: Mutex::default(),
            refreshes: AtomicUsize::new(0),
            feeds: Mutex::new(options.feeds.into_iter().collect()),
            feed_requests: Mutex::default(),
        });

        let app = Router::new()
            .route("/authenticate", post(authenticate))
            .route("/renew", post(renew))
            .route(
                "/app/monitors/{monitor_id}/devices/overview",
                get(devices_overview),
            )
            .route(
                "/app/monitors/{monitor_id}/devices/{device_id}",
                get(device_details),
            )
            .route("/app/monitors/{monitor_id}/labs_content", get(labs_content))
            .with_state(state.clone());
        let api_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let api_addr = api_listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(api_listener, app).await.ok();
        });

        let feed_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let feed_addr = feed_listener.local_addr().unwrap();
        tokio::spawn(serve_feeds(feed_listener, state.clone()));

        Self {
            api_base: format!("http://{api_addr}"),
            realtime_base: format!("ws://{feed_addr}"),
            state,
        }
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints::new(&self.api_base, &self.realtime_base).unwrap()
    }

    pub fn session(&self) -> SenseSession {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        SenseSession::new(http, self.endpoints())
    }

    pub fn stream(&self, session: &SenseSession, watchdog: Duration) -> RealtimeStream {
        RealtimeStream::new(&self.realtime_base, session.registry(), watchdog)
    }
}

async fn authenticate(
    State(state): State<Arc<MockState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state
        .logins
        .lock()
        .unwrap()
        .push(form.get("email").cloned().unwrap_or_default());
    if state.reject_login {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"status": "error", "error_reason": "bad credentials"})),
        )
            .into_response();
    }
    Json(json!({
        "authorized": true,
        "account_id": 9,
        "user_id": USER_ID,
        "access_token": "access-0",
        "refresh_token": "refresh-0",
        "bridge_server": "wss://bridge.example",
        "date_created": "2021-03-04T05:06:07.000Z",
        "totp_enabled": false,
        "settings": {"user_id": USER_ID, "settings": {"notifications": {}}},
        "monitors": [{"id": MONITOR_ID, "serial_number": "M4242", "time_zone": "America/New_York"}]
    }))
    .into_response()
}

async fn renew(State(state): State<Arc<MockState>>, Form(form): Form<RenewForm>) -> Response {
    state.renew_forms.lock().unwrap().push(form);
    let n = state.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
    if state.reject_refresh {
        return Json(json!({"authorized": false})).into_response();
    }
    Json(json!({
        "authorized": true,
        "access_token": format!("access-{n}"),
        "refresh_token": format!("refresh-{n}"),
        "roles": "owner"
    }))
    .into_response()
}

async fn devices_overview(
    State(state): State<Arc<MockState>>,
    UrlPath(monitor_id): UrlPath<i64>,
    headers: HeaderMap,
) -> Response {
    if !bearer_for_monitor(&headers, monitor_id) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if state.fail_devices {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(json!({
        "devices": [
            {"id": "A", "name": "Kettle", "icon": "kettle", "tags": {"DefaultUserDeviceType": "Kettle"}},
            {"id": "B", "name": "Dryer", "icon": "dryer", "make": "Acme"},
            {"id": "C", "name": "Heater", "icon": "heat"}
        ],
        "device_data_checksum": "checksum-1"
    }))
    .into_response()
}

fn bearer_for_monitor(headers: &HeaderMap, monitor_id: i64) -> bool {
    let authorized = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("bearer access-"));
    authorized && monitor_id == MONITOR_ID
}

async fn device_details(
    UrlPath((monitor_id, device_id)): UrlPath<(i64, String)>,
    headers: HeaderMap,
) -> Response {
    if !bearer_for_monitor(&headers, monitor_id) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let (name, yearly_kwh) = match device_id.as_str() {
        "A" => ("Kettle", 120.5),
        "B" => ("Dryer", 610.0),
        "C" => ("Heater", 1450.25),
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    Json(json!({
        "device": {"id": device_id, "name": name, "icon": "plug"},
        "alerts": {"allowed": true, "enabled": false},
        "info": "",
        "notes": null,
        "timeline": {"allowed": true, "visible": true},
        "usage": {"avg_duration": 300, "avg_monthly_KWH": yearly_kwh / 12.0, "yearly_KWH": yearly_kwh}
    }))
    .into_response()
}

async fn labs_content(
    State(state): State<Arc<MockState>>,
    UrlPath(monitor_id): UrlPath<i64>,
    headers: HeaderMap,
) -> Response {
    if !bearer_for_monitor(&headers, monitor_id) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if state.fail_labs {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(json!({
        "fault_detection_json": {
            "motorStalls": null,
            "powerQuality": {
                "displaySupport": true,
                "data": {"start_date": "2025-05-01", "end_date": "2025-05-18", "length": 18}
            }
        },
        "power_quality_raw_csv": "date,vmin,vmax\n2025-05-01,118.2,124.9\n",
        "motor_stall_raw_csv": ""
    }))
    .into_response()
}

async fn serve_feeds(listener: TcpListener, state: Arc<MockState>) {
    while let Ok((tcp, _)) = listener.accept().await {
        let state = state.clone();
        tokio::spawn(async move {
            let uri = Arc::new(Mutex::new(String::new()));
            let captured = uri.clone();
            let callback = move |request: &Request, response: WsResponse| -> Result<WsResponse, ErrorResponse> {
                *captured.lock().unwrap() = request.uri().to_string();
                Ok(response)
            };
            let Ok(mut socket) = tokio_tungstenite::accept_hdr_async(tcp, callback).await else {
                return;
            };
            let request_uri = uri.lock().unwrap().clone();
            state.feed_requests.lock().unwrap().push(request_uri);
            let script = state.feeds.lock().unwrap().pop_front().unwrap_or_default();

            for step in script {
                match step {
                    FeedStep::Send(text) => {
                        if socket.send(Message::Text(text)).await.is_err() {
                            return;
                        }
                    }
                    FeedStep::Pause(duration) => tokio::time::sleep(duration).await,
                    FeedStep::Close => {
                        socket.close(None).await.ok();
                        return;
                    }
                }
            }
            while let Some(Ok(_)) = socket.next().await {}
        });
    }
}

pub fn realtime_frame(epoch: i64, devices: JsonValue) -> String {
    json!({
        "type": "realtime_update",
        "payload": {
            "epoch": epoch,
            "voltage": [121.9, 121.4],
            "channels": [700.0, 450.0],
            "w": 1150.0,
            "d_w": 1100.0,
            "grid_w": 1150.0,
            "hz": 60.0,
            "devices": devices
        }
    })
    .to_string()
}

pub fn heartbeat_frame(epoch: i64) -> String {
    json!({
        "type": "realtime_update",
        "payload": {"epoch": epoch, "w": 1150.0, "hz": 60.0}
    })
    .to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Create { path: PathBuf, start: i64, sources: Vec<String> },
    Update { path: PathBuf, epoch: i64, values: Vec<Option<f64>> },
}

impl EngineCall {
    fn file_name(path: &Path) -> String {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// `create <file>@<start>` / `update <file>@<epoch>`, directory stripped.
    pub fn describe(&self) -> String {
        match self {
            Self::Create { path, start, .. } => format!("create {}@{start}", Self::file_name(path)),
            Self::Update { path, epoch, .. } => format!("update {}@{epoch}", Self::file_name(path)),
        }
    }
}

/// Records calls instead of running rrdtool. `create` leaves an empty file
/// behind so existence checks behave as they would on disk.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    calls: Mutex<Vec<EngineCall>>,
    fail_next_update: Mutex<Option<String>>,
}

impl RecordingEngine {
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn creates_for(&self, file: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, EngineCall::Create { path, .. } if EngineCall::file_name(path) == file))
            .count()
    }

    pub fn created_sources(&self, file: &str) -> Option<Vec<String>> {
        self.calls().into_iter().find_map(|call| match call {
            EngineCall::Create { path, sources, .. } if EngineCall::file_name(&path) == file => {
                Some(sources)
            }
            _ => None,
        })
    }

    pub fn updates_for(&self, file: &str) -> Vec<Vec<Option<f64>>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Update { path, values, .. } if EngineCall::file_name(&path) == file => {
                    Some(values)
                }
                _ => None,
            })
            .collect()
    }

    pub fn fail_next_update(&self, file: &str) {
        *self.fail_next_update.lock().unwrap() = Some(file.to_string());
    }
}

impl RrdEngine for RecordingEngine {
    fn create(
        &self,
        path: &Path,
        definition: &StoreDefinition,
        start: i64,
    ) -> Result<(), ArchiveError> {
        std::fs::write(path, b"").map_err(|err| ArchiveError::CreateFailed {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        self.calls.lock().unwrap().push(EngineCall::Create {
            path: path.to_path_buf(),
            start,
            sources: definition.sources.iter().map(|ds| ds.name.to_string()).collect(),
        });
        Ok(())
    }

    fn update(&self, path: &Path, epoch: i64, values: &[Option<f64>]) -> Result<(), ArchiveError> {
        let mut fail = self.fail_next_update.lock().unwrap();
        if fail.as_deref() == Some(EngineCall::file_name(path).as_str()) {
            *fail = None;
            return Err(ArchiveError::UpdateFailed {
                path: path.to_path_buf(),
                reason: "injected failure".to_string(),
            });
        }
        drop(fail);
        self.calls.lock().unwrap().push(EngineCall::Update {
            path: path.to_path_buf(),
            epoch,
            values: values.to_vec(),
        });
        Ok(())
    }
}
