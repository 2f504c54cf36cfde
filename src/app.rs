//! Device composition root.
//!
//! Wires the three pipelines, the downmix engine and the wireless link
//! onto one event bus:
//! link → base pipeline ─┐
//!                       ├→ downmix → mix pipeline → output
//! tones → announcement ─┘

use crate::bus::{EventBus, EventPoster};
use crate::config::Config;
use crate::defaults;
use crate::downmix::{DownmixControl, DownmixEngine, SourceSlot};
use crate::element::{
    LinkReader, MixerStage, OutputSink, PassthroughDecoder, RawWriter, Resampler, ToneReader,
};
use crate::error::Result;
use crate::link::{LinkScript, Peripheral, SimulatedLink};
use crate::orchestrator::{ExitReason, Orchestrator, OrchestratorConfig, Pipelines, Transition};
use crate::pipeline::{AudioPipeline, StagePipeline, names};
use crossbeam_channel::{Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// A fully wired device, ready to start.
pub struct Device {
    orchestrator: Orchestrator,
    engine: Arc<DownmixEngine>,
    played: Arc<AtomicU64>,
}

/// How a device run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceReport {
    pub exit: ExitReason,
    pub frames_played: u64,
}

impl Device {
    /// A poster onto the device's bus, for shutdown sentinels.
    pub fn poster(&self) -> EventPoster {
        self.orchestrator.poster()
    }

    pub fn with_transition_sender(mut self, tx: Sender<Transition>) -> Self {
        self.orchestrator = self.orchestrator.with_transition_sender(tx);
        self
    }

    pub fn engine(&self) -> Arc<DownmixEngine> {
        self.engine.clone()
    }
}

/// Builds every pipeline and binds the downmix slots.
///
/// Any wiring failure is returned before anything runs.
pub fn build_device(config: &Config, script: LinkScript) -> Result<Device> {
    config.validate()?;

    let bus = EventBus::new();
    let out = &config.output;
    let capacity = config.downmix.ring_buffer_frames;
    let engine = Arc::new(DownmixEngine::new(out.info(), out.frame_ms));

    let (link_tx, link_rx) = bounded(capacity);

    let mut base = StagePipeline::new("base", capacity);
    base.register(Box::new(LinkReader::new(link_rx)), names::LINK_READER)?;
    base.register(
        Box::new(Resampler::new(
            defaults::LINK_SAMPLE_RATE,
            defaults::LINK_CHANNELS,
            out.sample_rate,
            out.channels,
        )),
        names::BASE_FILTER,
    )?;
    base.register(Box::new(RawWriter::new()), names::BASE_RAW)?;
    base.link(&[names::LINK_READER, names::BASE_FILTER, names::BASE_RAW])?;
    base.set_event_listener(bus.poster());

    let mut announcement = StagePipeline::new("announcement", capacity);
    announcement.register(
        Box::new(ToneReader::new(config.tones.clip_ms, out.frame_ms)),
        names::TONE_FILE,
    )?;
    announcement.register(Box::new(PassthroughDecoder::new()), names::TONE_DECODER)?;
    announcement.register(
        Box::new(Resampler::new(
            defaults::ASSET_SAMPLE_RATE,
            1,
            out.sample_rate,
            out.channels,
        )),
        names::TONE_FILTER,
    )?;
    announcement.register(Box::new(RawWriter::new()), names::TONE_RAW)?;
    announcement.link(&[
        names::TONE_FILE,
        names::TONE_DECODER,
        names::TONE_FILTER,
        names::TONE_RAW,
    ])?;
    announcement.set_event_listener(bus.poster());

    engine.bind_source(SourceSlot::Base, base.output_ring_buffer())?;
    engine.bind_source(SourceSlot::Announcement, announcement.output_ring_buffer())?;

    let sink = OutputSink::new();
    let played = sink.played_counter();
    let mut mix = StagePipeline::new("mix", capacity).with_link_capacity(1);
    mix.register(Box::new(MixerStage::new(engine.clone())), names::MIXER)?;
    mix.register(Box::new(sink), names::OUTPUT)?;
    mix.link(&[names::MIXER, names::OUTPUT])?;
    mix.set_event_listener(bus.poster());

    let link = SimulatedLink::new(
        &config.link.device_name,
        script,
        bus.poster(),
        link_tx,
        out.frame_ms,
    );
    let link_id = link.source_id();

    let orchestrator = Orchestrator::new(
        bus,
        Pipelines {
            base: Box::new(base),
            announcement: Box::new(announcement),
            mix: Box::new(mix),
        },
        engine.clone(),
        OrchestratorConfig::from_config(config),
        link_id,
    )?
    .with_peripheral(Box::new(link));

    info!(device = %config.link.device_name, output = %engine.output_info(), "device wired");
    Ok(Device {
        orchestrator,
        engine,
        played,
    })
}

/// Starts the device, runs the event loop to its end and shuts down.
///
/// Blocks the calling thread for the device's whole lifetime.
pub fn run_device(device: Device) -> Result<DeviceReport> {
    let Device {
        mut orchestrator,
        played,
        ..
    } = device;

    if let Err(e) = orchestrator.start() {
        orchestrator.shutdown();
        return Err(e);
    }
    let exit = orchestrator.run();
    orchestrator.shutdown();
    let exit = exit?;

    let frames_played = played.load(Ordering::Relaxed);
    info!(?exit, frames_played, "device stopped");
    Ok(DeviceReport {
        exit,
        frames_played,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downmix::WorkMode;
    use crate::error::TonemixError;

    #[test]
    fn test_build_binds_both_slots() {
        let device = build_device(&Config::default(), LinkScript::default()).unwrap();
        let snapshot = device.engine().snapshot().unwrap();
        assert_eq!(snapshot.bound, [true, true]);
        assert_eq!(snapshot.mode, WorkMode::Bypass);
    }

    #[test]
    fn test_engine_mixes_in_configured_output_format() {
        let mut config = Config::default();
        config.output.sample_rate = 44100;
        config.output.channels = 2;
        let device = build_device(&config, LinkScript::default()).unwrap();
        assert_eq!(device.engine().output_info(), config.output.info());
    }

    #[test]
    fn test_build_rejects_24_bit_output() {
        let mut config = Config::default();
        config.output.bits = 24;
        assert!(matches!(
            build_device(&config, LinkScript::default()),
            Err(TonemixError::ConfigInvalidValue { key, .. }) if key == "output.bits"
        ));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = Config::default();
        config.output.frame_ms = 0;
        assert!(matches!(
            build_device(&config, LinkScript::default()),
            Err(TonemixError::ConfigInvalidValue { .. })
        ));
    }
}
