//! Wireless link peripherals.

use crate::bus::{AudioInfo, BusEvent, EventPoster, PeripheralKind, SourceId};
use crate::defaults;
use crate::element::AudioFrame;
use crate::error::{Result, TonemixError};
use crossbeam_channel::{Sender, TrySendError};
use std::f32::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const STREAM_TONE_HZ: f32 = 220.0;
const STREAM_AMPLITUDE: f32 = 3000.0;

/// Something outside the pipelines that posts onto the bus.
pub trait Peripheral: Send {
    fn name(&self) -> &str;

    /// Identity its bus events carry.
    fn source_id(&self) -> SourceId;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;
}

/// What the simulated remote device does, and when.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkScript {
    /// Delay before the remote connects and starts streaming.
    pub connect_after: Duration,
    /// Format of the streamed audio.
    pub stream: AudioInfo,
    /// Time after connecting at which the link drops. `None` streams until stopped.
    pub disconnect_after: Option<Duration>,
}

impl Default for LinkScript {
    fn default() -> Self {
        Self {
            connect_after: Duration::from_secs(2),
            stream: AudioInfo::new(
                defaults::LINK_SAMPLE_RATE,
                defaults::BITS,
                defaults::LINK_CHANNELS,
            ),
            disconnect_after: None,
        }
    }
}

/// Plays a [`LinkScript`] on a background thread.
pub struct SimulatedLink {
    name: String,
    id: SourceId,
    script: LinkScript,
    frame_ms: u32,
    events: EventPoster,
    frames: Option<Sender<AudioFrame>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimulatedLink {
    pub fn new(
        name: &str,
        script: LinkScript,
        events: EventPoster,
        frames: Sender<AudioFrame>,
        frame_ms: u32,
    ) -> Self {
        Self {
            name: name.to_string(),
            id: SourceId::allocate(),
            script,
            frame_ms: frame_ms.max(1),
            events,
            frames: Some(frames),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

impl Peripheral for SimulatedLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_id(&self) -> SourceId {
        self.id
    }

    fn start(&mut self) -> Result<()> {
        let frames = self
            .frames
            .take()
            .ok_or_else(|| TonemixError::Other(format!("link '{}' already started", self.name)))?;

        let stream = Stream {
            name: self.name.clone(),
            id: self.id,
            script: self.script.clone(),
            frame_ms: self.frame_ms,
            events: self.events.clone(),
            frames,
            stop: self.stop.clone(),
        };
        self.handle = Some(thread::spawn(move || stream.play()));
        debug!(link = %self.name, "link started");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| TonemixError::Other(format!("link '{}' thread panicked", self.name)))?;
        }
        debug!(link = %self.name, "link stopped");
        Ok(())
    }
}

impl Drop for SimulatedLink {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

struct Stream {
    name: String,
    id: SourceId,
    script: LinkScript,
    frame_ms: u32,
    events: EventPoster,
    frames: Sender<AudioFrame>,
    stop: Arc<AtomicBool>,
}

impl Stream {
    fn play(self) {
        if !self.sleep(self.script.connect_after) {
            return;
        }

        let info = self.script.stream;
        info!(link = %self.name, %info, "remote connected");
        self.events.post(BusEvent::Peripheral {
            source: self.id,
            kind: PeripheralKind::Connected,
        });

        let len = defaults::frame_samples(info.sample_rate, info.channels, self.frame_ms);
        let period = Duration::from_millis(self.frame_ms as u64);
        let connected_at = Instant::now();
        let mut phase = 0.0f32;
        let step = TAU * STREAM_TONE_HZ / info.sample_rate.max(1) as f32;

        loop {
            if self.stop.load(Ordering::SeqCst) {
                return;
            }
            if let Some(limit) = self.script.disconnect_after
                && connected_at.elapsed() >= limit
            {
                break;
            }

            let frame = sine_frame(len, info, &mut phase, step);
            match self.frames.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    trace!(link = %self.name, "reader behind, frame dropped")
                }
                Err(TrySendError::Disconnected(_)) => break,
            }
            thread::sleep(period);
        }

        info!(link = %self.name, "remote disconnected");
        self.events.post(BusEvent::Peripheral {
            source: self.id,
            kind: PeripheralKind::Disconnected,
        });
    }

    /// Sleeps in short steps. Returns false if stopped first.
    fn sleep(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        while Instant::now() < deadline {
            if self.stop.load(Ordering::SeqCst) {
                return false;
            }
            thread::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
        }
        !self.stop.load(Ordering::SeqCst)
    }
}

fn sine_frame(len: usize, info: AudioInfo, phase: &mut f32, step: f32) -> AudioFrame {
    let channels = info.channels.max(1) as usize;
    let mut samples = Vec::with_capacity(len);
    while samples.len() < len {
        let value = (phase.sin() * STREAM_AMPLITUDE) as i16;
        for _ in 0..channels {
            samples.push(value);
        }
        *phase = (*phase + step) % TAU;
    }
    samples.truncate(len);
    AudioFrame::new(samples, info.sample_rate, info.channels)
}
