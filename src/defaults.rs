//! Default configuration constants for tonemix.
//!
//! Shared between the config sections and the wiring code so the two never
//! drift apart.

/// Name the device advertises on the wireless link.
pub const DEVICE_NAME: &str = "Ochil Room";

/// Output sample rate in Hz. Every stream is resampled to this before mixing.
pub const SAMPLE_RATE: u32 = 48000;

/// Output channel count (the codec runs in one-channel mode).
pub const CHANNELS: u16 = 1;

/// Output sample width.
pub const BITS: u16 = 16;

/// Length of one frame moved between elements, in milliseconds.
pub const FRAME_MS: u32 = 20;

/// Crossfade duration shared by both slots' gain plans.
pub const TRANSITION_MS: u32 = 500;

/// Level the base stream is ducked to while an announcement plays.
///
/// The announcement ramps from this level up to 0 dB over the same
/// transition, so the two plans stay complementary.
pub const DUCK_DB: f32 = -10.0;

/// Admission timeout for the announcement slot while it is mixed.
///
/// Small and positive so decoder jitter does not punch holes into a tone.
pub const ANNOUNCEMENT_TIMEOUT_MS: u64 = 50;

/// Capacity of each ring buffer, in frames.
pub const RING_BUFFER_FRAMES: usize = 32;

/// Bounded wait for a pipeline to acknowledge stop before forcing terminate.
pub const STOP_TIMEOUT_MS: u64 = 2000;

/// Length of a synthesised flash tone.
pub const CLIP_MS: u32 = 1200;

/// Sample rate of flash tone assets and raw PCM files.
pub const ASSET_SAMPLE_RATE: u32 = 44100;

/// Default wireless stream format until the link reports otherwise.
pub const LINK_SAMPLE_RATE: u32 = 44100;
pub const LINK_CHANNELS: u16 = 2;

pub const TONE_CONNECTED: &str = "flash://tone/0_connected.mp3";
pub const TONE_DISCONNECTED: &str = "flash://tone/1_disconnected.mp3";
pub const TONE_READY_TO_CONNECT: &str = "flash://tone/2_ready_to_connect.mp3";

/// Number of samples in one frame of the given format.
pub fn frame_samples(sample_rate: u32, channels: u16, frame_ms: u32) -> usize {
    (sample_rate as usize * channels as usize * frame_ms as usize) / 1000
}
