use std::time::Duration;

/// Number of bands of the lossy-codec graphic equalizer.
pub const EQ_BANDS: usize = 10;

/// Playback tuning parameters, supplied once at startup.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Number of PCM buffers in the output ring (2 = double, 3 = triple buffering).
    pub ring_buffers: usize,
    /// Frames per PCM buffer handed to the output.
    pub buffer_frames: usize,
    /// Bounded wait of one playback loop iteration.
    pub poll_interval: Duration,
    /// Prefetch ring size per open file, in bytes.
    pub reader_capacity: usize,
    /// Prefetch starts topping up once occupancy drops below this many bytes.
    pub reader_low_water: usize,
    /// Bytes requested from storage per prefetch read.
    pub reader_chunk: usize,
    /// Pause when the headset is unplugged.
    pub pause_on_headset_unplug: bool,
    /// Options for the lossy-codec source.
    pub lossy: LossyConfig,
}

impl Default for PlaybackConfig {
    /// Defaults tuned for slow storage: ~280 ms of 44.1 kHz audio queued and
    /// a 256 KiB read-ahead per file.
    fn default() -> Self {
        Self {
            ring_buffers: 3,
            buffer_frames: 4096,
            poll_interval: Duration::from_millis(20),
            reader_capacity: 256 * 1024,
            reader_low_water: 128 * 1024,
            reader_chunk: 32 * 1024,
            pause_on_headset_unplug: true,
            lossy: LossyConfig::default(),
        }
    }
}

impl PlaybackConfig {
    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            capacity: self.reader_capacity,
            low_water: self.reader_low_water,
            chunk: self.reader_chunk,
        }
    }
}

/// Lossy-codec decode settings.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LossyConfig {
    /// Sample-accurate seeking (slower) instead of packet-granular seeking.
    pub accurate_seek: bool,
    /// Per-band gain in dB (ISO octave bands, 31.5 Hz .. 16 kHz), clamped to ±12.
    pub equalizer: Option<[f32; EQ_BANDS]>,
}

/// Buffered File Reader sizing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReaderOptions {
    pub capacity: usize,
    pub low_water: usize,
    pub chunk: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        PlaybackConfig::default().reader_options()
    }
}

impl ReaderOptions {
    /// Clamp values into a consistent shape (non-zero, low-water and chunk within capacity).
    pub fn normalized(self) -> Self {
        let capacity = self.capacity.max(1024);
        Self {
            capacity,
            low_water: self.low_water.clamp(1, capacity),
            chunk: self.chunk.clamp(1, capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_triple_buffered() {
        let cfg = PlaybackConfig::default();
        assert_eq!(cfg.ring_buffers, 3);
        assert!(cfg.reader_low_water < cfg.reader_capacity);
        assert!(cfg.lossy.equalizer.is_none());
    }

    #[test]
    fn reader_options_normalize_out_of_range_values() {
        let opts = ReaderOptions {
            capacity: 0,
            low_water: 1 << 20,
            chunk: 0,
        }
        .normalized();
        assert_eq!(opts.capacity, 1024);
        assert_eq!(opts.low_water, 1024);
        assert_eq!(opts.chunk, 1);
    }
}
