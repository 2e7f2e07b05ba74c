use crate::archive::{Archive, WriteOutcome};
use crate::sense::{RealtimeStream, SenseError, SenseSession};
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

/// What one pass of the keeper loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Archived { epoch: i64, device_stores: usize },
    Throttled { epoch: i64 },
    /// Sample without device records; not archived.
    Heartbeat,
    /// The stream failed and the credential was renewed; the next step
    /// reconnects.
    Reconnect,
}

/// Drives the session: keeps the credential fresh, pulls samples off the
/// realtime stream and hands them to the archive. Any credential renewal
/// failure is fatal.
pub struct SessionKeeper {
    session: SenseSession,
    stream: RealtimeStream,
    archive: Arc<Archive>,
    refresh_margin: ChronoDuration,
}

impl SessionKeeper {
    pub fn new(
        session: SenseSession,
        stream: RealtimeStream,
        archive: Arc<Archive>,
        refresh_margin: Duration,
    ) -> Self {
        let refresh_margin =
            ChronoDuration::from_std(refresh_margin).unwrap_or_else(|_| ChronoDuration::zero());
        Self {
            session,
            stream,
            archive,
            refresh_margin,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        loop {
            self.step().await?;
        }
    }

    pub async fn step(&mut self) -> Result<Step> {
        if self.credential_expiring() {
            self.session
                .refresh()
                .await
                .context("failed to renew Sense credential before expiry")?;
            // The open feed was authorized with the old token.
            self.stream.close().await;
        }

        let sample = match self.stream.next_sample(&self.session).await {
            Ok(sample) => sample,
            Err(err) => {
                match &err {
                    SenseError::EndOfStream => {
                        tracing::info!("realtime feed ended; renewing credential before reconnect")
                    }
                    other => {
                        tracing::warn!(error=%other, "realtime feed failed; renewing credential before reconnect")
                    }
                }
                self.session
                    .refresh()
                    .await
                    .context("failed to renew Sense credential after feed failure")?;
                return Ok(Step::Reconnect);
            }
        };

        if !sample.has_devices() {
            return Ok(Step::Heartbeat);
        }

        let epoch = sample.epoch;
        tracing::debug!(
            epoch,
            frame = sample.frame,
            total_watts = sample.total_watts,
            devices = sample.devices.len(),
            expires_in_secs = self
                .session
                .token_expiry()
                .map(|expires| (expires - Utc::now()).num_seconds())
                .unwrap_or_default(),
            "realtime sample"
        );

        let archive = self.archive.clone();
        let outcome = tokio::task::spawn_blocking(move || archive.write(&sample))
            .await
            .context("archive writer task panicked")?
            .context("failed to archive realtime sample")?;
        Ok(match outcome {
            WriteOutcome::Throttled => Step::Throttled { epoch },
            WriteOutcome::Written { device_stores } => Step::Archived {
                epoch,
                device_stores,
            },
        })
    }

    pub async fn shutdown(&self) {
        self.stream.close().await;
    }

    fn credential_expiring(&self) -> bool {
        match self.session.token_expiry() {
            Some(expires) => expires - Utc::now() < self.refresh_margin,
            None => true,
        }
    }
}
