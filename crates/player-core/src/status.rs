use crate::output::OutputStatus;
use crate::session::{RepeatMode, SongId};

/// Point-in-time view of the player, returned by `GetStatus`.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusSnapshot {
    pub status: OutputStatus,
    /// Position in the current song, from the output's played-frame counter.
    pub elapsed_ms: u64,
    /// Length of the current song; 0 when nothing is loaded.
    pub duration_ms: u64,
    pub volume: f32,
    /// Now-playing `(queue index, song)`.
    pub current: Option<(usize, SongId)>,
    pub shuffle: bool,
    pub repeat: RepeatMode,
    pub underruns: u64,
}

impl StatusSnapshot {
    /// Progress as a fraction in `[0.0, 1.0]`.
    pub fn progress(&self) -> f32 {
        if self.duration_ms == 0 {
            return 0.0;
        }
        (self.elapsed_ms as f32 / self.duration_ms as f32).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_clamped() {
        let mut snap = StatusSnapshot {
            status: OutputStatus::Playing,
            elapsed_ms: 500,
            duration_ms: 1000,
            volume: 100.0,
            current: Some((0, 1)),
            shuffle: false,
            repeat: RepeatMode::Off,
            underruns: 0,
        };
        assert_eq!(snap.progress(), 0.5);
        snap.elapsed_ms = 5000;
        assert_eq!(snap.progress(), 1.0);
        snap.duration_ms = 0;
        assert_eq!(snap.progress(), 0.0);
    }
}
