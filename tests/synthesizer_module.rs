//! Integration tests for the synthesizer module and its temperature loop

use finesse_daq::config::{SynthChannelConfig, SynthesizerConfig};
use finesse_daq::hardware::mock::MockSynthesizer;
use finesse_daq::hardware::FrequencySynthesizer;
use finesse_daq::modules::synthesizer::THROTTLED_QUERY_INTERVAL_MS;
use finesse_daq::modules::{Module, ModuleStatus, SynthesizerEvent, SynthesizerModule};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn config() -> SynthesizerConfig {
    SynthesizerConfig {
        query_interval_ms: 1000,
        channels: vec![
            SynthChannelConfig {
                frequency_hz: 53e6,
                power_dbm: -5.0,
                phase_deg: 0.0,
            },
            SynthChannelConfig {
                frequency_hz: 60e6,
                power_dbm: 2.0,
                phase_deg: 90.0,
            },
        ],
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_applies_channel_settings() {
    let device = Arc::new(MockSynthesizer::new());
    let mut synth = SynthesizerModule::new("synth", &config(), device.clone());

    synth.start().await.unwrap();
    assert_eq!(synth.status(), ModuleStatus::Running);
    assert!(synth.is_querying());

    assert_eq!(device.frequency(0).await.unwrap(), 53e6);
    assert_eq!(device.frequency(1).await.unwrap(), 60e6);
    assert_eq!(device.power(1).await.unwrap(), 2.0);
    assert_eq!(device.phase(1).await.unwrap(), 90.0);

    synth.stop().await.unwrap();
    assert_eq!(synth.status(), ModuleStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_temperature_loop_polls_both_channels() {
    let device = Arc::new(MockSynthesizer::new());
    let synth = SynthesizerModule::new("synth", &config(), device.clone());
    let mut events = synth.subscribe().await;

    synth.start_query_loop();
    sleep(Duration::from_millis(2500)).await;
    assert_eq!(device.temperature_reads(), 4);

    match events.recv().await {
        Some(SynthesizerEvent::Temperatures(t)) => assert_eq!(t.len(), 2),
        other => panic!("expected temperatures, got {other:?}"),
    }
    assert_eq!(synth.temperatures().await.len(), 2);
    synth.stop_query_loop();
}

#[tokio::test(start_paused = true)]
async fn test_failed_query_throttles_next_poll() {
    let device = Arc::new(MockSynthesizer::new());
    let synth = SynthesizerModule::new("synth", &config(), device.clone());
    device.inject_temperature_failures(1);

    synth.start_query_loop();

    // first poll at 1000 ms fails on channel 0
    sleep(Duration::from_millis(1500)).await;
    assert_eq!(device.temperature_reads(), 1);

    // next poll only after the throttled interval
    sleep(Duration::from_millis(THROTTLED_QUERY_INTERVAL_MS - 600)).await;
    assert_eq!(device.temperature_reads(), 1);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(device.temperature_reads(), 3);

    // back to the normal interval afterwards
    sleep(Duration::from_millis(1000)).await;
    assert_eq!(device.temperature_reads(), 5);
    synth.stop_query_loop();
}

#[tokio::test(start_paused = true)]
async fn test_stopped_loop_does_not_rearm() {
    let device = Arc::new(MockSynthesizer::new());
    let synth = SynthesizerModule::new("synth", &config(), device.clone());

    synth.start_query_loop();
    sleep(Duration::from_millis(1500)).await;
    synth.stop_query_loop();
    let reads = device.temperature_reads();

    sleep(Duration::from_millis(5000)).await;
    assert_eq!(device.temperature_reads(), reads);
    assert!(!synth.is_querying());
}

#[tokio::test]
async fn test_phase_wraps_on_device() {
    let device = Arc::new(MockSynthesizer::new());
    let synth = SynthesizerModule::new("synth", &config(), device);

    synth.set_phase(0, 370.0).await.unwrap();
    assert_eq!(synth.read_phase(0).await.unwrap(), 10.0);
    assert_eq!(synth.channel_settings().await[0].phase_deg, 370.0);
}
