//! Mock Hardware Implementations
//!
//! Simulated devices for tests and the CLI. All mocks use async-safe operations
//! (`tokio::time::sleep`, never `std::thread::sleep`).
//!
//! # Available Mocks
//!
//! - `MockOscilloscope` - cavity transmission scan: one Lorentzian carrier plus two EOM
//!   sidebands on a flat offset, with uniform noise
//! - `MockSynthesizer` - two-channel RF synthesizer with a drifting board temperature
//!
//! Both mocks can inject faults (empty reads, failed queries) and record the setting
//! calls they receive so tests can check ordering.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Duration};

use crate::fitting::{linspace, lorentzian};
use crate::hardware::capabilities::{FrequencySynthesizer, TraceSource};

// =============================================================================
// MockOscilloscope - Simulated cavity transmission scan
// =============================================================================

/// Line shape of the simulated cavity resonance, all times in seconds
#[derive(Debug, Clone, PartialEq)]
pub struct CavityProfile {
    /// Carrier position
    pub center_s: f64,
    /// Carrier (and sideband) FWHM
    pub fwhm_s: f64,
    /// Distance between carrier and each sideband
    pub sideband_spacing_s: f64,
    /// Sideband height relative to the carrier
    pub sideband_ratio: f64,
    /// Carrier height in volts
    pub amplitude_v: f64,
    /// Flat offset in volts
    pub offset_v: f64,
    /// Peak-to-peak uniform noise in volts
    pub noise_v: f64,
}

impl Default for CavityProfile {
    fn default() -> Self {
        Self {
            center_s: 0.0,
            fwhm_s: 25e-6,
            sideband_spacing_s: 500e-6,
            sideband_ratio: 0.3,
            amplitude_v: 0.05,
            offset_v: 0.001,
            noise_v: 0.0005,
        }
    }
}

impl CavityProfile {
    /// Noise-free transmission at time `t`
    pub fn evaluate(&self, t: f64) -> f64 {
        let sideband_amplitude = self.amplitude_v * self.sideband_ratio;
        self.offset_v
            + lorentzian(t, self.center_s, self.fwhm_s, self.amplitude_v)
            + lorentzian(
                t,
                self.center_s - self.sideband_spacing_s,
                self.fwhm_s,
                sideband_amplitude,
            )
            + lorentzian(
                t,
                self.center_s + self.sideband_spacing_s,
                self.fwhm_s,
                sideband_amplitude,
            )
    }
}

/// Setting call received by the mock oscilloscope
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeCall {
    /// Continuous acquisition started on a channel
    RunContinuous(u32),
    /// Acquisition stopped
    Stop,
    /// Timebase in seconds
    SetTimebase(f64),
    /// Record length in samples
    SetRecordLength(usize),
    /// Channel and volts per division
    SetVerticalScale(u32, f64),
}

#[derive(Debug, Clone)]
struct ScopeState {
    timebase_s: f64,
    record_length: usize,
    running: bool,
}

/// Mock oscilloscope with a synthetic cavity scan
///
/// # Example
///
/// ```rust,ignore
/// let scope = MockOscilloscope::new();
/// let t = scope.time_axis(1).await?;
/// let v = scope.read_single(1).await?;
/// assert_eq!(t.len(), v.len());
/// ```
pub struct MockOscilloscope {
    state: RwLock<ScopeState>,
    profile: RwLock<CavityProfile>,
    rng: Mutex<StdRng>,
    calls: Mutex<Vec<ScopeCall>>,
    read_delay: Duration,
    read_count: AtomicU64,
    empty_reads: AtomicUsize,
    failing_reads: AtomicUsize,
}

impl MockOscilloscope {
    /// Create a mock scope with a 5 ms timebase and 10 000 points per trace
    pub fn new() -> Self {
        Self::with_settings(5e-3, 10_000)
    }

    /// Create a mock scope with custom horizontal settings
    pub fn with_settings(timebase_s: f64, record_length: usize) -> Self {
        Self {
            state: RwLock::new(ScopeState {
                timebase_s,
                record_length,
                running: false,
            }),
            profile: RwLock::new(CavityProfile::default()),
            rng: Mutex::new(StdRng::seed_from_u64(0x5eed)),
            calls: Mutex::new(Vec::new()),
            read_delay: Duration::ZERO,
            read_count: AtomicU64::new(0),
            empty_reads: AtomicUsize::new(0),
            failing_reads: AtomicUsize::new(0),
        }
    }

    /// Replace the simulated line shape
    pub fn with_profile(self, profile: CavityProfile) -> Self {
        Self {
            profile: RwLock::new(profile),
            ..self
        }
    }

    /// Simulated readout time per trace
    pub fn with_read_delay(self, read_delay: Duration) -> Self {
        Self { read_delay, ..self }
    }

    /// Make the next `count` continuous reads return no samples
    pub fn inject_empty_reads(&self, count: usize) {
        self.empty_reads.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` reads (single or continuous) fail
    pub fn inject_read_failures(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Number of successful sample reads so far
    pub fn read_count(&self) -> u64 {
        self.read_count.load(Ordering::SeqCst)
    }

    /// Setting calls received so far, oldest first
    pub async fn calls(&self) -> Vec<ScopeCall> {
        self.calls.lock().await.clone()
    }

    /// Whether the scope is in continuous mode
    pub async fn is_running(&self) -> bool {
        self.state.read().await.running
    }

    /// Current record length
    pub async fn record_length(&self) -> usize {
        self.state.read().await.record_length
    }

    async fn record(&self, call: ScopeCall) {
        self.calls.lock().await.push(call);
    }

    fn take_fault(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn acquire(&self, channel: u32) -> Result<Vec<f64>> {
        if channel == 0 {
            bail!("MockOscilloscope: channels are 1-based, got 0");
        }
        if Self::take_fault(&self.failing_reads) {
            return Err(anyhow!("MockOscilloscope: simulated read failure on CH{channel}"));
        }
        if !self.read_delay.is_zero() {
            sleep(self.read_delay).await;
        }

        let (timebase, n) = {
            let state = self.state.read().await;
            (state.timebase_s, state.record_length)
        };
        let profile = self.profile.read().await.clone();
        let mut rng = self.rng.lock().await;
        let half_noise = profile.noise_v / 2.0;
        let samples = linspace(-timebase / 2.0, timebase / 2.0, n)
            .into_iter()
            .map(|t| {
                let noise = if half_noise > 0.0 {
                    rng.gen_range(-half_noise..half_noise)
                } else {
                    0.0
                };
                profile.evaluate(t) + noise
            })
            .collect();
        self.read_count.fetch_add(1, Ordering::SeqCst);
        Ok(samples)
    }
}

impl Default for MockOscilloscope {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TraceSource for MockOscilloscope {
    async fn time_axis(&self, _channel: u32) -> Result<Vec<f64>> {
        let state = self.state.read().await;
        Ok(linspace(
            -state.timebase_s / 2.0,
            state.timebase_s / 2.0,
            state.record_length,
        ))
    }

    async fn read_single(&self, channel: u32) -> Result<Vec<f64>> {
        self.acquire(channel).await
    }

    async fn read_continuous(&self, channel: u32) -> Result<Vec<f64>> {
        if Self::take_fault(&self.empty_reads) {
            return Ok(Vec::new());
        }
        self.acquire(channel).await
    }

    async fn run_continuous(&self, channel: u32) -> Result<()> {
        self.state.write().await.running = true;
        self.record(ScopeCall::RunContinuous(channel)).await;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.state.write().await.running = false;
        self.record(ScopeCall::Stop).await;
        Ok(())
    }

    async fn set_timebase(&self, seconds: f64) -> Result<()> {
        if seconds <= 0.0 {
            bail!("MockOscilloscope: timebase must be positive");
        }
        self.state.write().await.timebase_s = seconds;
        self.record(ScopeCall::SetTimebase(seconds)).await;
        Ok(())
    }

    async fn set_record_length(&self, points: usize) -> Result<()> {
        self.state.write().await.record_length = points;
        self.record(ScopeCall::SetRecordLength(points)).await;
        Ok(())
    }

    async fn set_vertical_scale(&self, channel: u32, volts: f64) -> Result<()> {
        self.record(ScopeCall::SetVerticalScale(channel, volts)).await;
        Ok(())
    }
}

// =============================================================================
// MockSynthesizer - Simulated RF synthesizer
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct SynthChannel {
    enabled: bool,
    frequency_hz: f64,
    power_dbm: f64,
    phase_deg: f64,
}

impl Default for SynthChannel {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency_hz: 1e9,
            power_dbm: 0.0,
            phase_deg: 0.0,
        }
    }
}

/// Mock two-channel synthesizer
pub struct MockSynthesizer {
    channels: RwLock<Vec<SynthChannel>>,
    base_temperature_c: f64,
    temperature_reads: AtomicU64,
    failing_temperature_reads: AtomicUsize,
}

impl MockSynthesizer {
    /// Create a two-channel synthesizer with outputs off
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(vec![SynthChannel::default(); 2]),
            base_temperature_c: 45.0,
            temperature_reads: AtomicU64::new(0),
            failing_temperature_reads: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` temperature queries fail
    pub fn inject_temperature_failures(&self, count: usize) {
        self.failing_temperature_reads.store(count, Ordering::SeqCst);
    }

    /// Number of temperature queries received, failed ones included
    pub fn temperature_reads(&self) -> u64 {
        self.temperature_reads.load(Ordering::SeqCst)
    }

    async fn with_channel<T>(&self, channel: usize, f: impl FnOnce(&mut SynthChannel) -> T) -> Result<T> {
        let mut channels = self.channels.write().await;
        let state = channels
            .get_mut(channel)
            .ok_or_else(|| anyhow!("MockSynthesizer: no channel {channel}"))?;
        Ok(f(state))
    }
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrequencySynthesizer for MockSynthesizer {
    fn channel_count(&self) -> usize {
        2
    }

    async fn enable(&self, channel: usize) -> Result<()> {
        self.with_channel(channel, |c| c.enabled = true).await
    }

    async fn disable(&self, channel: usize) -> Result<()> {
        self.with_channel(channel, |c| c.enabled = false).await
    }

    async fn set_frequency(&self, channel: usize, hz: f64) -> Result<()> {
        if hz <= 0.0 {
            bail!("MockSynthesizer: frequency must be positive");
        }
        self.with_channel(channel, |c| c.frequency_hz = hz).await
    }

    async fn frequency(&self, channel: usize) -> Result<f64> {
        self.with_channel(channel, |c| c.frequency_hz).await
    }

    async fn set_power(&self, channel: usize, dbm: f64) -> Result<()> {
        self.with_channel(channel, |c| c.power_dbm = dbm).await
    }

    async fn power(&self, channel: usize) -> Result<f64> {
        self.with_channel(channel, |c| c.power_dbm).await
    }

    async fn set_phase(&self, channel: usize, degrees: f64) -> Result<()> {
        self.with_channel(channel, |c| c.phase_deg = degrees.rem_euclid(360.0))
            .await
    }

    async fn phase(&self, channel: usize) -> Result<f64> {
        self.with_channel(channel, |c| c.phase_deg).await
    }

    async fn temperature(&self, channel: usize) -> Result<f64> {
        let n = self.temperature_reads.fetch_add(1, Ordering::SeqCst);
        if MockOscilloscope::take_fault(&self.failing_temperature_reads) {
            bail!("MockSynthesizer: temperature query timed out");
        }
        let enabled = self.with_channel(channel, |c| c.enabled).await?;
        // Slow drift, plus self-heating while the output is on
        let drift = 0.01 * (n % 100) as f64;
        Ok(self.base_temperature_c + drift + if enabled { 5.0 } else { 0.0 })
    }

    async fn active_channels(&self) -> Result<Vec<bool>> {
        Ok(self.channels.read().await.iter().map(|c| c.enabled).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scope_trace_matches_time_axis() {
        let scope = MockOscilloscope::with_settings(1e-3, 500);
        let t = scope.time_axis(1).await.unwrap();
        let v = scope.read_single(1).await.unwrap();
        assert_eq!(t.len(), 500);
        assert_eq!(v.len(), 500);
        assert!((t[0] + 0.5e-3).abs() < 1e-15);
        assert_eq!(scope.read_count(), 1);
    }

    #[tokio::test]
    async fn scope_fault_injection() {
        let scope = MockOscilloscope::with_settings(1e-3, 100);
        scope.inject_empty_reads(1);
        assert!(scope.read_continuous(1).await.unwrap().is_empty());
        assert_eq!(scope.read_continuous(1).await.unwrap().len(), 100);

        scope.inject_read_failures(1);
        assert!(scope.read_single(1).await.is_err());
        assert!(scope.read_single(1).await.is_ok());
        assert!(scope.read_single(0).await.is_err());
    }

    #[tokio::test]
    async fn scope_records_setting_calls() {
        let scope = MockOscilloscope::new();
        scope.set_timebase(2e-3).await.unwrap();
        scope.set_record_length(2000).await.unwrap();
        scope.run_continuous(2).await.unwrap();
        assert!(scope.is_running().await);
        assert_eq!(scope.record_length().await, 2000);
        assert_eq!(
            scope.calls().await,
            vec![
                ScopeCall::SetTimebase(2e-3),
                ScopeCall::SetRecordLength(2000),
                ScopeCall::RunContinuous(2),
            ]
        );
    }

    #[tokio::test]
    async fn synthesizer_channel_state() {
        let synth = MockSynthesizer::new();
        synth.set_frequency(0, 1.004e9).await.unwrap();
        synth.set_phase(1, 370.0).await.unwrap();
        synth.enable(1).await.unwrap();

        assert_eq!(synth.frequency(0).await.unwrap(), 1.004e9);
        assert!((synth.phase(1).await.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(synth.active_channels().await.unwrap(), vec![false, true]);
        assert!(synth.set_frequency(2, 1e9).await.is_err());
    }

    #[tokio::test]
    async fn synthesizer_temperature_failures() {
        let synth = MockSynthesizer::new();
        synth.inject_temperature_failures(1);
        assert!(synth.temperature(0).await.is_err());
        assert!(synth.temperature(0).await.is_ok());
        assert_eq!(synth.temperature_reads(), 2);
    }
}
