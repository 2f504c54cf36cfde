//! Reader elements: heads of the base and announcement pipelines.

use crate::bus::AudioInfo;
use crate::defaults;
use crate::element::{AudioElement, AudioFrame, ElementConfig, ElementContext, ElementKind, Flow};
use crate::error::{Result, TonemixError};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::fs;
use std::time::Duration;
use tracing::debug;

const FLASH_SCHEME: &str = "flash://";
const FILE_SCHEME: &str = "file://";

/// Half-period of the synthesised beep, in samples.
const BEEP_HALF_PERIOD: usize = 50;
const BEEP_AMPLITUDE: i16 = 6000;

/// Plays one announcement clip selected by URI.
///
/// `flash://` locators name clips baked into the device; they are
/// synthesised here as a plain beep of `clip_ms`. `file://` locators point
/// at raw mono s16le PCM on disk.
pub struct ToneReader {
    uri: Option<String>,
    clip_ms: u32,
    frame_samples: usize,
    clip: Vec<i16>,
    cursor: usize,
}

impl ToneReader {
    pub fn new(clip_ms: u32, frame_ms: u32) -> Self {
        Self {
            uri: None,
            clip_ms,
            frame_samples: defaults::frame_samples(defaults::ASSET_SAMPLE_RATE, 1, frame_ms).max(1),
            clip: Vec::new(),
            cursor: 0,
        }
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    fn load(&self, uri: &str) -> Result<Vec<i16>> {
        if uri.starts_with(FLASH_SCHEME) {
            let len = defaults::ASSET_SAMPLE_RATE as usize * self.clip_ms as usize / 1000;
            return Ok(beep(len));
        }
        if let Some(path) = uri.strip_prefix(FILE_SCHEME) {
            let bytes = fs::read(path).map_err(|e| TonemixError::Asset {
                uri: uri.to_string(),
                message: e.to_string(),
            })?;
            return Ok(bytes
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                .collect());
        }
        Err(TonemixError::Asset {
            uri: uri.to_string(),
            message: "unsupported locator scheme".to_string(),
        })
    }
}

fn beep(len: usize) -> Vec<i16> {
    (0..len)
        .map(|i| {
            if (i / BEEP_HALF_PERIOD) % 2 == 0 {
                BEEP_AMPLITUDE
            } else {
                -BEEP_AMPLITUDE
            }
        })
        .collect()
}

impl AudioElement for ToneReader {
    fn kind(&self) -> ElementKind {
        ElementKind::Reader
    }

    fn configure(&mut self, config: &ElementConfig) -> Result<()> {
        match config {
            ElementConfig::SourceUri(uri) => {
                self.uri = Some(uri.clone());
                Ok(())
            }
            other => Err(TonemixError::UnsupportedConfig {
                element: self.kind().to_string(),
                config: other.to_string(),
            }),
        }
    }

    fn info(&self) -> Option<AudioInfo> {
        Some(AudioInfo::new(defaults::ASSET_SAMPLE_RATE, 16, 1))
    }

    fn open(&mut self) -> Result<()> {
        let uri = self.uri.clone().ok_or_else(|| TonemixError::Asset {
            uri: String::new(),
            message: "no source URI set".to_string(),
        })?;
        self.clip = self.load(&uri)?;
        self.cursor = 0;
        debug!(uri = %uri, samples = self.clip.len(), "tone loaded");
        Ok(())
    }

    fn process(&mut self, _input: Option<AudioFrame>, _ctx: &ElementContext) -> Result<Flow> {
        if self.cursor >= self.clip.len() {
            return Ok(Flow::Finished);
        }
        let end = (self.cursor + self.frame_samples).min(self.clip.len());
        let samples = self.clip[self.cursor..end].to_vec();
        self.cursor = end;
        Ok(Flow::Emit(AudioFrame::new(
            samples,
            defaults::ASSET_SAMPLE_RATE,
            1,
        )))
    }

    fn reset(&mut self) {
        self.clip.clear();
        self.cursor = 0;
    }
}

/// Pulls frames off the wireless link.
///
/// Reports MusicInfo on the bus whenever the incoming format changes,
/// including the first frame after a reset.
pub struct LinkReader {
    frames: Receiver<AudioFrame>,
    bits: u16,
    poll: Duration,
    current: Option<AudioInfo>,
}

impl LinkReader {
    pub fn new(frames: Receiver<AudioFrame>) -> Self {
        Self {
            frames,
            bits: defaults::BITS,
            poll: Duration::from_millis(10),
            current: None,
        }
    }
}

impl AudioElement for LinkReader {
    fn kind(&self) -> ElementKind {
        ElementKind::Reader
    }

    fn info(&self) -> Option<AudioInfo> {
        self.current
    }

    fn process(&mut self, _input: Option<AudioFrame>, ctx: &ElementContext) -> Result<Flow> {
        match self.frames.recv_timeout(self.poll) {
            Ok(frame) => {
                let info = AudioInfo::new(frame.sample_rate, self.bits, frame.channels);
                if self.current != Some(info) {
                    self.current = Some(info);
                    ctx.report_music_info(info);
                }
                Ok(Flow::Emit(frame))
            }
            Err(RecvTimeoutError::Timeout) => Ok(Flow::Skip),
            Err(RecvTimeoutError::Disconnected) => Ok(Flow::Finished),
        }
    }

    fn reset(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusEvent, EventBus, SourceId};
    use crossbeam_channel::bounded;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn ctx() -> ElementContext {
        ElementContext::new("test", SourceId::allocate(), None)
    }

    fn drain(reader: &mut ToneReader) -> Vec<AudioFrame> {
        let ctx = ctx();
        let mut frames = Vec::new();
        while let Ok(Flow::Emit(frame)) = reader.process(None, &ctx) {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_tone_reader_requires_uri() {
        let mut reader = ToneReader::new(100, 20);
        assert!(matches!(reader.open(), Err(TonemixError::Asset { .. })));
    }

    #[test]
    fn test_flash_tone_has_clip_length() {
        let mut reader = ToneReader::new(100, 20);
        reader
            .configure(&ElementConfig::SourceUri(
                "flash://tone/0_connected.mp3".to_string(),
            ))
            .unwrap();
        reader.open().unwrap();

        let frames = drain(&mut reader);
        let total: usize = frames.iter().map(|f| f.samples.len()).sum();
        assert_eq!(total, 4410);
        assert_eq!(frames[0].samples.len(), 882);
        assert!(frames.iter().all(|f| f.sample_rate == 44100 && f.channels == 1));
    }

    #[test]
    fn test_tone_reader_finishes_after_clip() {
        let mut reader = ToneReader::new(20, 20);
        reader
            .configure(&ElementConfig::SourceUri("flash://tone/x".to_string()))
            .unwrap();
        reader.open().unwrap();
        drain(&mut reader);

        assert_eq!(reader.process(None, &ctx()).unwrap(), Flow::Finished);
    }

    #[test]
    fn test_file_tone_reads_raw_pcm() {
        let mut file = NamedTempFile::new().unwrap();
        for sample in [1i16, -2, 300] {
            file.write_all(&sample.to_le_bytes()).unwrap();
        }
        let uri = format!("file://{}", file.path().display());

        let mut reader = ToneReader::new(100, 20);
        reader.configure(&ElementConfig::SourceUri(uri)).unwrap();
        reader.open().unwrap();

        let frames = drain(&mut reader);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples, vec![1, -2, 300]);
    }

    #[test]
    fn test_missing_file_is_asset_error() {
        let mut reader = ToneReader::new(100, 20);
        reader
            .configure(&ElementConfig::SourceUri(
                "file:///nonexistent/tone.raw".to_string(),
            ))
            .unwrap();
        assert!(matches!(reader.open(), Err(TonemixError::Asset { .. })));
    }

    #[test]
    fn test_unknown_scheme_is_asset_error() {
        let mut reader = ToneReader::new(100, 20);
        reader
            .configure(&ElementConfig::SourceUri("http://x/tone.mp3".to_string()))
            .unwrap();
        match reader.open() {
            Err(TonemixError::Asset { message, .. }) => {
                assert!(message.contains("scheme"))
            }
            other => panic!("Expected Asset error, got {:?}", other),
        }
    }

    #[test]
    fn test_tone_reader_rejects_format_config() {
        let mut reader = ToneReader::new(100, 20);
        let result = reader.configure(&ElementConfig::SourceFormat {
            sample_rate: 48000,
            channels: 1,
        });
        assert!(matches!(
            result,
            Err(TonemixError::UnsupportedConfig { .. })
        ));
    }

    #[test]
    fn test_reset_keeps_uri_and_rewinds() {
        let mut reader = ToneReader::new(40, 20);
        reader
            .configure(&ElementConfig::SourceUri("flash://tone/x".to_string()))
            .unwrap();
        reader.open().unwrap();
        drain(&mut reader);

        reader.reset();
        assert_eq!(reader.uri(), Some("flash://tone/x"));
        reader.open().unwrap();
        assert_eq!(drain(&mut reader).len(), 2);
    }

    #[test]
    fn test_link_reader_reports_format_once() {
        let bus = EventBus::new();
        let id = SourceId::allocate();
        let ctx = ElementContext::new("link", id, Some(bus.poster()));
        let (tx, rx) = bounded(4);
        let mut reader = LinkReader::new(rx);

        tx.send(AudioFrame::new(vec![0; 1764], 44100, 2)).unwrap();
        tx.send(AudioFrame::new(vec![0; 1764], 44100, 2)).unwrap();
        assert!(matches!(reader.process(None, &ctx), Ok(Flow::Emit(_))));
        assert!(matches!(reader.process(None, &ctx), Ok(Flow::Emit(_))));

        assert_eq!(
            bus.listen(),
            Ok(BusEvent::MusicInfo {
                source: id,
                info: AudioInfo::new(44100, 16, 2)
            })
        );
        assert!(bus.try_listen().is_none());
        assert_eq!(reader.info(), Some(AudioInfo::new(44100, 16, 2)));
    }

    #[test]
    fn test_link_reader_reports_format_change_and_after_reset() {
        let bus = EventBus::new();
        let ctx = ElementContext::new("link", SourceId::allocate(), Some(bus.poster()));
        let (tx, rx) = bounded(4);
        let mut reader = LinkReader::new(rx);

        tx.send(AudioFrame::new(vec![0; 10], 44100, 2)).unwrap();
        reader.process(None, &ctx).unwrap();
        tx.send(AudioFrame::new(vec![0; 10], 48000, 2)).unwrap();
        reader.process(None, &ctx).unwrap();
        reader.reset();
        tx.send(AudioFrame::new(vec![0; 10], 48000, 2)).unwrap();
        reader.process(None, &ctx).unwrap();

        assert_eq!(bus.pending(), 3);
    }

    #[test]
    fn test_link_reader_idle_and_closed() {
        let (tx, rx) = bounded::<AudioFrame>(1);
        let mut reader = LinkReader::new(rx);
        assert_eq!(reader.process(None, &ctx()).unwrap(), Flow::Skip);

        drop(tx);
        assert_eq!(reader.process(None, &ctx()).unwrap(), Flow::Finished);
    }
}
