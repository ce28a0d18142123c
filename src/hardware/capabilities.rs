//! Hardware Capabilities
//!
//! Narrow capability traits for the two instruments the measurement logic talks to:
//!
//! - An oscilloscope implements [`TraceSource`]
//! - The RF synthesizer driving the EOM implements [`FrequencySynthesizer`]
//!
//! The logic never sees a transport (VISA, serial). Drivers implement these traits and
//! are injected as `Arc<dyn Trait>`.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Takes `&self`; drivers keep mutable state behind a lock

use anyhow::Result;
use async_trait::async_trait;

/// Capability: Trace Acquisition
///
/// Oscilloscope-like devices delivering a time axis and one voltage sample per point.
///
/// # Contract
/// - Channels are 1-based, as printed on the instrument front panel
/// - `read_continuous` may be polled faster than the device acquires; it then returns
///   the most recently cached trace
/// - A zero-length read is legal (acquisition glitch); callers decide how to handle it
/// - `time_axis` and the samples of the next read have the same length when the
///   device is healthy
#[async_trait]
pub trait TraceSource: Send + Sync {
    /// Time axis in seconds for the given channel
    async fn time_axis(&self, channel: u32) -> Result<Vec<f64>>;

    /// Acquire one trace and return its samples in volts
    async fn read_single(&self, channel: u32) -> Result<Vec<f64>>;

    /// Return the latest samples of a continuously running acquisition
    async fn read_continuous(&self, channel: u32) -> Result<Vec<f64>>;

    /// Switch the device into continuous (free-running) acquisition
    async fn run_continuous(&self, channel: u32) -> Result<()>;

    /// Stop acquisition
    async fn stop(&self) -> Result<()>;

    /// Set horizontal range in seconds
    async fn set_timebase(&self, seconds: f64) -> Result<()>;

    /// Set number of samples per trace
    async fn set_record_length(&self, points: usize) -> Result<()>;

    /// Set vertical scale in volts per division for one channel
    async fn set_vertical_scale(&self, channel: u32, volts: f64) -> Result<()>;
}

/// Capability: RF Frequency Synthesis
///
/// Multi-channel synthesizers (e.g. the one driving the EOM sidebands).
///
/// # Contract
/// - Channels are 0-based
/// - Frequencies in Hz, power in dBm, phase in degrees, temperature in °C
#[async_trait]
pub trait FrequencySynthesizer: Send + Sync {
    /// Number of output channels
    fn channel_count(&self) -> usize;

    /// Enable RF output of a channel
    async fn enable(&self, channel: usize) -> Result<()>;

    /// Disable RF output of a channel
    async fn disable(&self, channel: usize) -> Result<()>;

    async fn set_frequency(&self, channel: usize, hz: f64) -> Result<()>;

    async fn frequency(&self, channel: usize) -> Result<f64>;

    async fn set_power(&self, channel: usize, dbm: f64) -> Result<()>;

    async fn power(&self, channel: usize) -> Result<f64>;

    async fn set_phase(&self, channel: usize, degrees: f64) -> Result<()>;

    async fn phase(&self, channel: usize) -> Result<f64>;

    /// Board temperature seen by a channel
    async fn temperature(&self, channel: usize) -> Result<f64>;

    /// Output state of every channel, index = channel
    async fn active_channels(&self) -> Result<Vec<bool>>;
}
