//! RF synthesizer module.
//!
//! Drives the synthesizer that feeds the EOM: per-channel frequency, power and phase,
//! output switching, and a background loop polling the channel temperatures. After a
//! failed temperature query the loop backs off to [`THROTTLED_QUERY_INTERVAL_MS`] for
//! the next poll.
//!
//! Recognised [`ModuleConfig`] keys: `query_interval_ms`.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument};

use super::{Module, ModuleConfig, ModuleStatus};
use crate::config::{SynthChannelConfig, SynthesizerConfig};
use crate::error::{AppResult, DaqError};
use crate::events::EventDistributor;
use crate::hardware::FrequencySynthesizer;

/// Poll interval used after a failed temperature query
pub const THROTTLED_QUERY_INTERVAL_MS: u64 = 3000;

const EVENT_CAPACITY: usize = 32;

/// Channel setting that can be changed at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SynthParameter {
    /// Hz
    Frequency,
    /// dBm
    Power,
    /// Degrees
    Phase,
}

/// Notifications of the synthesizer module
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesizerEvent {
    /// A channel setting was pushed to the device
    Updated {
        channel: usize,
        parameter: SynthParameter,
        value: f64,
    },
    /// Temperatures of all channels, °C
    Temperatures(Vec<f64>),
    /// Output state of all channels
    RfState(Vec<bool>),
}

struct Shared {
    device: Arc<dyn FrequencySynthesizer>,
    events: EventDistributor<SynthesizerEvent>,
    temperatures: RwLock<Vec<f64>>,
    querying: AtomicBool,
    generation: AtomicU64,
    query_interval_ms: AtomicU64,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.querying.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    async fn read_temperatures(&self) -> anyhow::Result<Vec<f64>> {
        let mut temperatures = Vec::with_capacity(self.device.channel_count());
        for channel in 0..self.device.channel_count() {
            temperatures.push(self.device.temperature(channel).await?);
        }
        Ok(temperatures)
    }

    /// One poll; returns the delay before the next one
    async fn poll(&self) -> Duration {
        match self.read_temperatures().await {
            Ok(temperatures) => {
                debug!(?temperatures, "Synthesizer temperatures");
                *self.temperatures.write().await = temperatures.clone();
                self.events
                    .publish(SynthesizerEvent::Temperatures(temperatures))
                    .await;
                Duration::from_millis(self.query_interval_ms.load(Ordering::SeqCst))
            }
            Err(err) => {
                let message = format!("{err:#}");
                error!(error = %message, "Temperature query failed, throttling refresh rate");
                Duration::from_millis(THROTTLED_QUERY_INTERVAL_MS)
            }
        }
    }
}

/// Logic for the EOM's RF synthesizer
pub struct SynthesizerModule {
    name: String,
    shared: Arc<Shared>,
    channels: RwLock<Vec<SynthChannelConfig>>,
    status: ModuleStatus,
}

impl SynthesizerModule {
    /// Module for `device`, channels configured from `config`
    pub fn new(
        name: impl Into<String>,
        config: &SynthesizerConfig,
        device: Arc<dyn FrequencySynthesizer>,
    ) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                device,
                events: EventDistributor::new(EVENT_CAPACITY),
                temperatures: RwLock::new(Vec::new()),
                querying: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                query_interval_ms: AtomicU64::new(config.query_interval_ms),
            }),
            channels: RwLock::new(config.channels.clone()),
            status: ModuleStatus::Idle,
        }
    }

    /// Receive parameter, temperature and RF events
    pub async fn subscribe(&self) -> mpsc::Receiver<SynthesizerEvent> {
        self.shared.events.subscribe().await
    }

    /// Configured temperature poll interval
    pub fn query_interval_ms(&self) -> u64 {
        self.shared.query_interval_ms.load(Ordering::SeqCst)
    }

    /// Last temperatures read by the poll loop
    pub async fn temperatures(&self) -> Vec<f64> {
        self.shared.temperatures.read().await.clone()
    }

    /// Settings last pushed to each channel
    pub async fn channel_settings(&self) -> Vec<SynthChannelConfig> {
        self.channels.read().await.clone()
    }

    fn check_channel(&self, channel: usize) -> AppResult<()> {
        let count = self.shared.device.channel_count();
        if channel >= count {
            return Err(DaqError::ParameterInvalidChoice(format!(
                "synthesizer channel {channel} (device has {count})"
            )));
        }
        Ok(())
    }

    async fn remember(&self, channel: usize, parameter: SynthParameter, value: f64) {
        {
            let mut channels = self.channels.write().await;
            if channels.len() <= channel {
                channels.resize(channel + 1, SynthChannelConfig::default());
            }
            let settings = &mut channels[channel];
            match parameter {
                SynthParameter::Frequency => settings.frequency_hz = value,
                SynthParameter::Power => settings.power_dbm = value,
                SynthParameter::Phase => settings.phase_deg = value,
            }
        }
        self.shared
            .events
            .publish(SynthesizerEvent::Updated {
                channel,
                parameter,
                value,
            })
            .await;
    }

    /// Set the output frequency of `channel` in Hz
    #[instrument(skip(self))]
    pub async fn set_frequency(&self, channel: usize, hz: f64) -> AppResult<()> {
        self.check_channel(channel)?;
        self.shared
            .device
            .set_frequency(channel, hz)
            .await
            .map_err(DaqError::instrument)?;
        self.remember(channel, SynthParameter::Frequency, hz).await;
        Ok(())
    }

    /// Read back the output frequency in Hz
    pub async fn read_frequency(&self, channel: usize) -> AppResult<f64> {
        self.check_channel(channel)?;
        self.shared
            .device
            .frequency(channel)
            .await
            .map_err(DaqError::instrument)
    }

    /// Set the output power in dBm
    #[instrument(skip(self))]
    pub async fn set_power(&self, channel: usize, dbm: f64) -> AppResult<()> {
        self.check_channel(channel)?;
        self.shared
            .device
            .set_power(channel, dbm)
            .await
            .map_err(DaqError::instrument)?;
        self.remember(channel, SynthParameter::Power, dbm).await;
        Ok(())
    }

    /// Read back the output power in dBm
    pub async fn read_power(&self, channel: usize) -> AppResult<f64> {
        self.check_channel(channel)?;
        self.shared
            .device
            .power(channel)
            .await
            .map_err(DaqError::instrument)
    }

    /// Set the output phase in degrees
    #[instrument(skip(self))]
    pub async fn set_phase(&self, channel: usize, degrees: f64) -> AppResult<()> {
        self.check_channel(channel)?;
        self.shared
            .device
            .set_phase(channel, degrees)
            .await
            .map_err(DaqError::instrument)?;
        self.remember(channel, SynthParameter::Phase, degrees).await;
        Ok(())
    }

    /// Read back the output phase in degrees
    pub async fn read_phase(&self, channel: usize) -> AppResult<f64> {
        self.check_channel(channel)?;
        self.shared
            .device
            .phase(channel)
            .await
            .map_err(DaqError::instrument)
    }

    /// Enable the RF output of `channel`
    pub async fn switch_on(&self, channel: usize) -> AppResult<()> {
        self.check_channel(channel)?;
        self.shared
            .device
            .enable(channel)
            .await
            .map_err(DaqError::instrument)?;
        info!(channel, "RF output on");
        Ok(())
    }

    /// Disable the RF output of `channel`
    pub async fn switch_off(&self, channel: usize) -> AppResult<()> {
        self.check_channel(channel)?;
        self.shared
            .device
            .disable(channel)
            .await
            .map_err(DaqError::instrument)?;
        info!(channel, "RF output off");
        Ok(())
    }

    /// Query and publish which outputs are on
    pub async fn check_rf_state(&self) -> AppResult<Vec<bool>> {
        let active = self
            .shared
            .device
            .active_channels()
            .await
            .map_err(DaqError::instrument)?;
        self.shared
            .events
            .publish(SynthesizerEvent::RfState(active.clone()))
            .await;
        Ok(active)
    }

    /// Start polling temperatures every `query_interval_ms`
    pub fn start_query_loop(&self) {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.querying.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let first = Duration::from_millis(self.query_interval_ms());
        tokio::spawn(async move {
            let mut delay = first;
            loop {
                sleep(delay).await;
                if !shared.is_current(generation) {
                    debug!(generation, "Temperature loop exiting");
                    break;
                }
                delay = shared.poll().await;
            }
        });
    }

    /// Stop polling; the loop exits at its next wake-up
    pub fn stop_query_loop(&self) {
        self.shared.querying.store(false, Ordering::SeqCst);
    }

    /// Whether the temperature loop is active
    pub fn is_querying(&self) -> bool {
        self.shared.querying.load(Ordering::SeqCst)
    }

    async fn activate(&self) -> AppResult<()> {
        let channels = self.channel_settings().await;
        for (channel, settings) in channels
            .iter()
            .enumerate()
            .take(self.shared.device.channel_count())
        {
            self.set_frequency(channel, settings.frequency_hz).await?;
            self.set_power(channel, settings.power_dbm).await?;
            self.set_phase(channel, settings.phase_deg).await?;
        }
        self.check_rf_state().await?;
        self.start_query_loop();
        Ok(())
    }
}

#[async_trait]
impl Module for SynthesizerModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, config: ModuleConfig) -> Result<()> {
        if let Some(interval) = config.get_u64("query_interval_ms")? {
            if interval == 0 {
                return Err(DaqError::Configuration(
                    "query_interval_ms must be positive".to_string(),
                )
                .into());
            }
            self.shared
                .query_interval_ms
                .store(interval, Ordering::SeqCst);
        }
        self.status = ModuleStatus::Initialized;
        Ok(())
    }

    fn status(&self) -> ModuleStatus {
        self.status
    }

    async fn start(&mut self) -> Result<()> {
        match self.activate().await {
            Ok(()) => {
                self.status = ModuleStatus::Running;
                info!(module = %self.name, "Synthesizer module started");
                Ok(())
            }
            Err(err) => {
                self.status = ModuleStatus::Error;
                Err(err.into())
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        self.stop_query_loop();
        self.status = ModuleStatus::Stopped;
        info!(module = %self.name, "Synthesizer module stopped");
        Ok(())
    }
}
