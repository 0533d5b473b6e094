//! Polling driver
//!
//! Ticks a device at a fixed interval from a tokio task. A tick that fails is
//! logged and dropped; the previous frame stays visible to consumers and the
//! next tick tries again.

use crate::device::{DeviceError, Pollable};
use chrono::{DateTime, Local};
use serde::Serialize;
use statum::{machine, state};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// Driver settings
#[derive(Clone, Debug, PartialEq)]
pub struct DriverSettings {
    pub poll_interval_ms: u64,
    pub stats_interval_secs: u64,
}

/// Longest accepted stats window, one day
pub const MAX_STATS_INTERVAL_SECS: u64 = 86_400;

impl DriverSettings {
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.poll_interval_ms == 0 {
            return Err(DriverError::SettingsError(
                "poll interval must be at least 1 ms".to_string(),
            ));
        }
        if self.stats_interval_secs == 0 || self.stats_interval_secs > MAX_STATS_INTERVAL_SECS {
            return Err(DriverError::SettingsError(format!(
                "stats interval must be between 1 and {} seconds, got {}",
                MAX_STATS_INTERVAL_SECS, self.stats_interval_secs
            )));
        }
        Ok(())
    }

    fn stats_window(&self) -> Result<chrono::Duration, DriverError> {
        i64::try_from(self.stats_interval_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                DriverError::SettingsError(format!(
                    "stats interval of {} seconds is out of range",
                    self.stats_interval_secs
                ))
            })
    }
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            stats_interval_secs: 10,
        }
    }
}

// Driver errors
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Failed to initialize driver: {0}")]
    InitializationError(#[source] DeviceError),

    #[error("Invalid driver settings: {0}")]
    SettingsError(String),

    #[error("Driver task failed: {0}")]
    ThreadError(String),
}

/// Frame counters published after every tick
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollStats {
    /// Number of frames published so far
    pub frame: u64,
    /// Ticks whose poll failed and whose frame was dropped
    pub dropped: u64,
    pub last_frame_at: Option<DateTime<Local>>,
}

#[state]
#[derive(Debug, Clone)]
pub enum DriverState {
    Initializing,
    Polling,
}

#[machine]
pub struct PollingDriver<S: DriverState> {
    device: Box<dyn Pollable>,
    settings: DriverSettings,
    stats: PollStats,
    stats_sender: watch::Sender<PollStats>,
}

impl<S: DriverState> PollingDriver<S> {
    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn stats(&self) -> &PollStats {
        &self.stats
    }

    pub fn device_id(&self) -> &str {
        self.device.device_id()
    }
}

impl PollingDriver<Initializing> {
    pub fn create(
        device: Box<dyn Pollable>,
        settings: Option<DriverSettings>,
    ) -> Result<(Self, watch::Receiver<PollStats>), DriverError> {
        let settings = settings.unwrap_or_default();
        debug!("Creating polling driver with settings: {:?}", settings);
        settings.validate()?;
        settings.stats_window()?;

        let (stats_sender, stats_receiver) = watch::channel(PollStats::default());
        Ok((
            Self::new(device, settings, PollStats::default(), stats_sender),
            stats_receiver,
        ))
    }

    /// Runs the first tick and transitions to Polling
    ///
    /// Unlike later ticks, a failure here is fatal: a device that cannot be
    /// polled once is not worth driving.
    pub fn start(mut self) -> Result<PollingDriver<Polling>, DriverError> {
        info!("Starting polling driver for \"{}\"", self.device.device_id());
        if let Err(e) = self.device.poll() {
            error!("First poll of \"{}\" failed: {}", self.device.device_id(), e);
            return Err(DriverError::InitializationError(e));
        }
        publish(&mut self.stats, &self.stats_sender);

        info!("Polling driver initialized, transitioning to Polling state");
        Ok(self.transition())
    }
}

impl PollingDriver<Polling> {
    /// Polls the device once; publishes the frame on success.
    pub fn tick(&mut self) -> Result<(), DeviceError> {
        match self.device.poll() {
            Ok(()) => {
                publish(&mut self.stats, &self.stats_sender);
                Ok(())
            }
            Err(e) => {
                self.stats.dropped += 1;
                error!(
                    "Dropping frame {} of \"{}\": {}",
                    self.stats.frame + 1,
                    self.device.device_id(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Ticks until `token` is cancelled, then hands the device back.
    ///
    /// Each tick runs on tokio's blocking pool, so an adapter may block
    /// inside [`Pollable::poll`] without stalling the runtime.
    pub async fn run_until_cancelled(self, token: CancellationToken) -> Box<dyn Pollable> {
        let mut driver = self;
        info!("Starting polling loop for \"{}\"", driver.device.device_id());

        let mut interval =
            tokio::time::interval(Duration::from_millis(driver.settings.poll_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // For performance monitoring
        let mut frames_since_log = 0u64;
        let mut dropped_since_log = 0u64;
        let mut last_log_time = Local::now();
        let log_interval = driver
            .settings
            .stats_window()
            .unwrap_or_else(|_| chrono::Duration::seconds(10));

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Shutdown signal received for \"{}\"", driver.device.device_id());
                    break;
                }

                _ = interval.tick() => {
                    let ticked = tokio::task::spawn_blocking(move || {
                        let ticked = driver.tick().is_ok();
                        (driver, ticked)
                    })
                    .await;
                    // a panicking poll takes the loop down with it
                    let ticked = match ticked {
                        Ok((returned, ticked)) => {
                            driver = returned;
                            ticked
                        }
                        Err(e) => std::panic::resume_unwind(e.into_panic()),
                    };
                    if ticked {
                        frames_since_log += 1;
                    } else {
                        dropped_since_log += 1;
                    }

                    let now = Local::now();
                    if now - last_log_time > log_interval {
                        info!(
                            "Polling driver stats: {} frames, {} dropped in last {} seconds (avg {:.2}/sec)",
                            frames_since_log,
                            dropped_since_log,
                            log_interval.num_seconds(),
                            frames_since_log as f64 / log_interval.num_seconds().max(1) as f64
                        );
                        frames_since_log = 0;
                        dropped_since_log = 0;
                        last_log_time = now;
                    }
                }
            }
        }

        info!(
            "Polling loop for \"{}\" stopped after {} frames ({} dropped)",
            driver.device.device_id(),
            driver.stats.frame,
            driver.stats.dropped
        );
        driver.device
    }
}

fn publish(stats: &mut PollStats, sender: &watch::Sender<PollStats>) {
    stats.frame += 1;
    stats.last_frame_at = Some(Local::now());
    // no receivers left is fine, the driver keeps running for the device's sake
    sender.send_replace(stats.clone());
}

/// Driver running in a tokio task
pub struct DriverHandle {
    token: CancellationToken,
    task_handle: JoinHandle<Box<dyn Pollable>>,
    stats: watch::Receiver<PollStats>,
}

impl DriverHandle {
    /// Starts the driver and spawns its loop; must be called within a tokio runtime.
    pub fn spawn(
        device: Box<dyn Pollable>,
        settings: Option<DriverSettings>,
    ) -> Result<Self, DriverError> {
        info!("Spawning polling driver with settings: {:?}", settings);

        let (driver, stats) = PollingDriver::create(device, settings)?;
        let driver = driver.start()?;

        let token = CancellationToken::new();
        let task_token = token.clone();
        let task_handle =
            tokio::spawn(async move { driver.run_until_cancelled(task_token).await });
        info!("Polling driver successfully started");

        Ok(Self {
            token,
            task_handle,
            stats,
        })
    }

    /// Receiver of the stats published after every frame
    pub fn subscribe(&self) -> watch::Receiver<PollStats> {
        self.stats.clone()
    }

    pub fn stats(&self) -> PollStats {
        self.stats.borrow().clone()
    }

    /// Stops the loop and waits for the task to hand back the device.
    pub async fn shutdown(self) -> Result<Box<dyn Pollable>, DriverError> {
        debug!("Sending shutdown signal to polling driver");
        self.token.cancel();

        match self.task_handle.await {
            Ok(device) => {
                debug!("Polling driver task completed");
                Ok(device)
            }
            Err(e) => {
                warn!("Polling driver task failed: {}", e);
                Err(DriverError::ThreadError(e.to_string()))
            }
        }
    }
}
