use super::devices::DeviceRegistry;
use super::realtime::{decode_frame, Frame, RealtimeSample};
use super::session::{SenseSession, StreamCredentials};
use super::SenseError;
use futures::StreamExt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

pub const PROTOCOL_VERSION: u32 = 11;
pub const CLIENT_TYPE: &str = "web";
pub const UI_LANGUAGE: &str = "en-US";
pub const DELIVERY_QUEUE_CAPACITY: usize = 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type FeedSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct LiveConnection {
    generation: u64,
    reader: JoinHandle<()>,
    watchdog: JoinHandle<()>,
    updates: Arc<Mutex<mpsc::Receiver<RealtimeSample>>>,
}

impl LiveConnection {
    /// Dropping the reader drops both the socket and the queue's sender, which
    /// is what wakes a pending `next_sample` with end-of-stream.
    fn shutdown(self) {
        self.reader.abort();
        self.watchdog.abort();
    }
}

#[derive(Default)]
struct StreamState {
    live: Option<LiveConnection>,
    next_generation: u64,
}

/// Owner of the (at most one) realtime feed connection.
///
/// Connection lifecycle: `next_sample` connects lazily, a reader task decodes
/// frames into a bounded FIFO queue, and a watchdog task force-closes the
/// connection if no device-bearing frame shows up within the window. Every
/// teardown path (`close`, watchdog, reader exit) goes through the same state
/// lock and only ever closes the generation it was started for.
pub struct RealtimeStream {
    realtime_base: String,
    registry: Arc<DeviceRegistry>,
    watchdog_interval: Duration,
    state: Arc<Mutex<StreamState>>,
}

impl RealtimeStream {
    pub fn new(
        realtime_base: &str,
        registry: Arc<DeviceRegistry>,
        watchdog_interval: Duration,
    ) -> Self {
        Self {
            realtime_base: realtime_base.trim_end_matches('/').to_string(),
            registry,
            watchdog_interval,
            state: Arc::new(Mutex::new(StreamState::default())),
        }
    }

    /// Waits for the next realtime sample, connecting first if needed. The
    /// returned sample's device records reflect the registry's merged view.
    pub async fn next_sample(&self, session: &SenseSession) -> Result<RealtimeSample, SenseError> {
        let (generation, updates) = {
            let mut state = self.state.lock().await;
            if state.live.is_none() {
                let credentials = session.stream_credentials()?;
                let generation = state.next_generation;
                state.next_generation = state.next_generation.wrapping_add(1);
                let live = self.connect(&credentials, generation).await?;
                state.live = Some(live);
            }
            match state.live.as_ref() {
                Some(live) => (live.generation, live.updates.clone()),
                None => return Err(SenseError::EndOfStream),
            }
        };

        let received = updates.lock().await.recv().await;
        let Some(mut sample) = received else {
            close_generation(&self.state, generation).await;
            return Err(SenseError::EndOfStream);
        };
        self.merge_into_registry(&mut sample);
        Ok(sample)
    }

    /// Tears down the live connection, if any. Idempotent.
    pub async fn close(&self) {
        let live = self.state.lock().await.live.take();
        if let Some(live) = live {
            tracing::debug!(generation = live.generation, "closing realtime feed");
            live.shutdown();
        }
    }

    async fn connect(
        &self,
        credentials: &StreamCredentials,
        generation: u64,
    ) -> Result<LiveConnection, SenseError> {
        let url = feed_url(&self.realtime_base, credentials)?;
        let (socket, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
            .await
            .map_err(|_| SenseError::ConnectFailed("handshake timed out".to_string()))?
            .map_err(|err| SenseError::ConnectFailed(err.to_string()))?;
        tracing::info!(
            monitor_id = credentials.monitor_id,
            generation,
            "realtime feed connected"
        );

        let (tx, rx) = mpsc::channel(DELIVERY_QUEUE_CAPACITY);
        let reset = Arc::new(Notify::new());
        let reader = tokio::spawn(read_frames(socket, tx, reset.clone(), generation));
        let watchdog = tokio::spawn(run_watchdog(
            Arc::downgrade(&self.state),
            generation,
            reset,
            self.watchdog_interval,
        ));

        Ok(LiveConnection {
            generation,
            reader,
            watchdog,
            updates: Arc::new(Mutex::new(rx)),
        })
    }

    fn merge_into_registry(&self, sample: &mut RealtimeSample) {
        for record in sample.devices.iter_mut() {
            if !self.registry.merge_volatile(&record.id, &record.volatile) {
                continue;
            }
            if let Ok(merged) = self.registry.lookup_by_id(&record.id) {
                *record = merged;
            }
        }
    }
}

fn feed_url(realtime_base: &str, credentials: &StreamCredentials) -> Result<Url, SenseError> {
    let raw = format!(
        "{realtime_base}/monitors/{}/realtimefeed",
        credentials.monitor_id
    );
    let mut url = Url::parse(&raw)
        .map_err(|err| SenseError::ConnectFailed(format!("invalid realtime URL {raw}: {err}")))?;
    url.query_pairs_mut()
        .append_pair("access_token", &credentials.access_token)
        .append_pair("sense_device_id", &credentials.client_id)
        .append_pair("sense_protocol_version", &PROTOCOL_VERSION.to_string())
        .append_pair("sense_client_type", CLIENT_TYPE)
        .append_pair("sense_ui_language", UI_LANGUAGE);
    Ok(url)
}

async fn close_generation(state: &Mutex<StreamState>, generation: u64) -> bool {
    let mut state = state.lock().await;
    if state.live.as_ref().map(|live| live.generation) != Some(generation) {
        return false;
    }
    if let Some(live) = state.live.take() {
        live.shutdown();
    }
    true
}

async fn read_frames(
    mut socket: FeedSocket,
    updates: mpsc::Sender<RealtimeSample>,
    reset: Arc<Notify>,
    generation: u64,
) {
    while let Some(message) = socket.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error=%err, generation, "realtime feed read error");
                return;
            }
        };
        let text = match message {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(error=%err, generation, "discarding non-UTF-8 binary frame");
                    continue;
                }
            },
            Message::Close(frame) => {
                tracing::info!(generation, frame=?frame, "realtime feed closed by server");
                return;
            }
            _ => continue,
        };

        match decode_frame(&text) {
            Ok(Frame::Realtime(sample)) => {
                if sample.has_devices() {
                    reset.notify_one();
                }
                if updates.send(sample).await.is_err() {
                    return;
                }
            }
            Ok(Frame::Other(kind)) => {
                tracing::debug!(generation, kind=%kind, "ignoring non-realtime frame");
            }
            Err(err) => {
                tracing::warn!(error=%err, generation, "failed to decode realtime frame");
            }
        }
    }
    tracing::debug!(generation, "realtime feed reader finished");
}

async fn run_watchdog(
    state: Weak<Mutex<StreamState>>,
    generation: u64,
    reset: Arc<Notify>,
    window: Duration,
) {
    loop {
        tokio::select! {
            _ = reset.notified() => continue,
            _ = tokio::time::sleep(window) => break,
        }
    }
    let Some(state) = state.upgrade() else {
        return;
    };
    tracing::warn!(
        generation,
        window_ms = window.as_millis() as u64,
        "no device updates within watchdog window; closing realtime feed"
    );
    close_generation(&state, generation).await;
}
