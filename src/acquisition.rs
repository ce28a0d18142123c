//! Periodic and one-shot trace acquisition.
//!
//! The scheduler owns the running/idle state of the acquisition and publishes every new
//! trace on its own event stream. Continuous acquisition runs as a tokio task that
//! sleeps for the refresh interval, retrieves a trace and re-arms only while the
//! scheduler is still running and the task belongs to the current start.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ScopeConfig;
use crate::error::{AppResult, DaqError};
use crate::events::EventDistributor;
use crate::hardware::TraceSource;
use crate::measurement_types::Trace;

const EVENT_CAPACITY: usize = 16;

/// Whether continuous acquisition is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionState {
    /// No loop is running
    Idle,
    /// The refresh loop is re-arming
    Running,
}

/// Horizontal and vertical oscilloscope settings pushed as one unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScopeSettings {
    /// Horizontal range in seconds
    pub timebase_s: f64,
    /// Samples per trace
    pub record_length: usize,
    /// Volts per division on the acquisition channel
    pub vertical_scale_v: f64,
}

impl From<&ScopeConfig> for ScopeSettings {
    fn from(config: &ScopeConfig) -> Self {
        Self {
            timebase_s: config.timebase_s,
            record_length: config.record_length,
            vertical_scale_v: config.vertical_scale_v,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LoopSettings {
    channel: u32,
    refresh_interval_ms: u64,
    record_length: usize,
}

struct Shared {
    source: Arc<dyn TraceSource>,
    running: AtomicBool,
    generation: AtomicU64,
    settings: Mutex<LoopSettings>,
    latest: RwLock<Option<Arc<Trace>>>,
    events: EventDistributor<Arc<Trace>>,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    async fn retrieve(&self, channel: u32, continuous: bool) -> AppResult<Arc<Trace>> {
        let time_axis = self
            .source
            .time_axis(channel)
            .await
            .map_err(DaqError::instrument)?;
        let read = if continuous {
            self.source.read_continuous(channel).await
        } else {
            self.source.read_single(channel).await
        };
        let samples = read.map_err(DaqError::instrument)?;

        let trace = if samples.is_empty() {
            let record_length = self.settings.lock().await.record_length;
            warn!(channel, record_length, "Empty trace received, using placeholder");
            Trace::placeholder(record_length)
        } else {
            Trace::new(time_axis, samples)?
        };
        Ok(Arc::new(trace))
    }

    async fn store(&self, trace: Arc<Trace>) {
        *self.latest.write().await = Some(Arc::clone(&trace));
        self.events.publish(trace).await;
    }
}

/// Drives a [`TraceSource`] in single-shot or continuous mode
#[derive(Clone)]
pub struct AcquisitionScheduler {
    shared: Arc<Shared>,
}

impl AcquisitionScheduler {
    /// `record_length` sizes the placeholder used for empty reads
    pub fn new(source: Arc<dyn TraceSource>, record_length: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                settings: Mutex::new(LoopSettings {
                    channel: 1,
                    refresh_interval_ms: 200,
                    record_length,
                }),
                latest: RwLock::new(None),
                events: EventDistributor::new(EVENT_CAPACITY),
            }),
        }
    }

    /// Subscribe to new traces
    pub async fn subscribe(&self) -> mpsc::Receiver<Arc<Trace>> {
        self.shared.events.subscribe().await
    }

    /// Idle or running
    pub fn state(&self) -> AcquisitionState {
        if self.shared.running.load(Ordering::SeqCst) {
            AcquisitionState::Running
        } else {
            AcquisitionState::Idle
        }
    }

    /// Most recent trace, if any was acquired
    pub async fn latest_trace(&self) -> Option<Arc<Trace>> {
        self.shared.latest.read().await.clone()
    }

    /// Channel and refresh interval of the last start
    pub async fn channel_and_interval(&self) -> (u32, u64) {
        let settings = self.shared.settings.lock().await;
        (settings.channel, settings.refresh_interval_ms)
    }

    /// Acquire one trace and publish it
    #[instrument(skip(self))]
    pub async fn get_single_trace(&self, channel: u32) -> AppResult<Arc<Trace>> {
        let trace = self.shared.retrieve(channel, false).await?;
        self.shared.store(Arc::clone(&trace)).await;
        Ok(trace)
    }

    /// Start continuous acquisition, refreshing every `refresh_interval_ms`
    #[instrument(skip(self))]
    pub async fn start_acquisition(&self, channel: u32, refresh_interval_ms: u64) -> AppResult<()> {
        if refresh_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "refresh interval must be positive".to_string(),
            ));
        }

        self.get_single_trace(channel).await?;
        {
            let mut settings = self.shared.settings.lock().await;
            settings.channel = channel;
            settings.refresh_interval_ms = refresh_interval_ms;
        }
        self.shared
            .source
            .run_continuous(channel)
            .await
            .map_err(DaqError::instrument)?;

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.running.store(true, Ordering::SeqCst);
        info!(channel, refresh_interval_ms, "Acquisition started");

        let shared = Arc::clone(&self.shared);
        let interval = Duration::from_millis(refresh_interval_ms);
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                if !shared.is_current(generation) {
                    debug!(generation, "Acquisition loop exiting");
                    break;
                }
                match shared.retrieve(channel, true).await {
                    Ok(trace) => shared.store(trace).await,
                    Err(err) => error!(error = %err, "Trace retrieval failed"),
                }
            }
        });
        Ok(())
    }

    /// Stop re-arming; a retrieval already in flight still completes
    pub fn stop_acquisition(&self) {
        if self.shared.running.swap(false, Ordering::SeqCst) {
            info!("Acquisition stopped");
        }
    }

    /// Push new scope settings, restarting acquisition around them if it was running
    #[instrument(skip(self))]
    pub async fn update_scope_settings(&self, settings: ScopeSettings) -> AppResult<()> {
        let was_running = self.state() == AcquisitionState::Running;
        if was_running {
            self.stop_acquisition();
        }

        let (channel, refresh_interval_ms) = self.channel_and_interval().await;
        let source = &self.shared.source;
        source
            .set_timebase(settings.timebase_s)
            .await
            .map_err(DaqError::instrument)?;
        source
            .set_record_length(settings.record_length)
            .await
            .map_err(DaqError::instrument)?;
        source
            .set_vertical_scale(channel, settings.vertical_scale_v)
            .await
            .map_err(DaqError::instrument)?;
        self.shared.settings.lock().await.record_length = settings.record_length;

        if was_running {
            self.start_acquisition(channel, refresh_interval_ms).await?;
        }
        Ok(())
    }

    /// Stop acquisition and the instrument
    pub async fn shutdown(&self) -> AppResult<()> {
        self.stop_acquisition();
        self.shared
            .source
            .stop()
            .await
            .map_err(DaqError::instrument)
    }
}
