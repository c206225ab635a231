//! Play queue with shuffle and repeat policy.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Key into the song library.
pub type SongId = u32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}

impl RepeatMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RepeatMode::Off => "off",
            RepeatMode::One => "one",
            RepeatMode::All => "all",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "0" => Some(RepeatMode::Off),
            "one" | "1" | "track" => Some(RepeatMode::One),
            "all" | "2" | "queue" => Some(RepeatMode::All),
            _ => None,
        }
    }
}

/// Why the queue is moving on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advance {
    /// The current song played to the end.
    Completed,
    /// The user asked for the next song.
    Manual,
}

/// What `remove` did to the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Removal {
    OutOfRange,
    Removed,
    /// The now-playing entry was removed; nothing is current any more.
    RemovedCurrent,
}

pub struct Session {
    queue: Vec<SongId>,
    current: Option<usize>,
    shuffle: bool,
    repeat: RepeatMode,
    /// Indices not yet played in this shuffle cycle; never holds `current`.
    unplayed: Vec<usize>,
    history: Vec<usize>,
    rng: StdRng,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Deterministic shuffle order.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            queue: Vec::new(),
            current: None,
            shuffle: false,
            repeat: RepeatMode::Off,
            unplayed: Vec::new(),
            history: Vec::new(),
            rng,
        }
    }

    pub fn queue(&self) -> &[SongId] {
        &self.queue
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn song_at(&self, index: usize) -> Option<SongId> {
        self.queue.get(index).copied()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// Now-playing entry as `(index, song)`.
    pub fn current(&self) -> Option<(usize, SongId)> {
        let idx = self.current?;
        Some((idx, self.queue[idx]))
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    /// Forget the now-playing entry (nothing playable was found).
    pub fn clear_current(&mut self) {
        self.current = None;
    }

    pub fn set_queue(&mut self, songs: Vec<SongId>) {
        self.queue = songs;
        self.current = None;
        self.history.clear();
        self.refill_pool();
    }

    pub fn add(&mut self, song: SongId) {
        self.queue.push(song);
        if self.shuffle {
            self.unplayed.push(self.queue.len() - 1);
        }
    }

    pub fn remove(&mut self, index: usize) -> Removal {
        if index >= self.queue.len() {
            return Removal::OutOfRange;
        }
        self.queue.remove(index);

        let shift = |v: &mut Vec<usize>| {
            v.retain(|&i| i != index);
            for i in v.iter_mut() {
                if *i > index {
                    *i -= 1;
                }
            }
        };
        shift(&mut self.unplayed);
        shift(&mut self.history);

        match self.current {
            Some(cur) if cur == index => {
                self.current = None;
                Removal::RemovedCurrent
            }
            Some(cur) if cur > index => {
                self.current = Some(cur - 1);
                Removal::Removed
            }
            _ => Removal::Removed,
        }
    }

    /// Make `index` current. Returns `None` when out of range.
    pub fn jump(&mut self, index: usize) -> Option<usize> {
        if index >= self.queue.len() {
            return None;
        }
        if let Some(cur) = self.current {
            if cur != index {
                self.history.push(cur);
            }
        }
        self.unplayed.retain(|&i| i != index);
        self.current = Some(index);
        Some(index)
    }

    /// Starting point when nothing is current: a random entry under shuffle,
    /// otherwise the head of the queue.
    pub fn start(&mut self) -> Option<usize> {
        if self.queue.is_empty() {
            return None;
        }
        if self.shuffle {
            if self.unplayed.is_empty() {
                self.refill_pool();
            }
            let pick = self.draw()?;
            self.current = Some(pick);
            return Some(pick);
        }
        self.jump(0)
    }

    /// Move past the current entry. `None` means playback should stop.
    pub fn advance(&mut self, reason: Advance) -> Option<usize> {
        if self.queue.is_empty() {
            self.current = None;
            return None;
        }
        let Some(cur) = self.current else {
            return self.start();
        };
        if self.repeat == RepeatMode::One && reason == Advance::Completed {
            return Some(cur);
        }
        let wrap = match self.repeat {
            RepeatMode::All => true,
            RepeatMode::One => reason == Advance::Manual,
            RepeatMode::Off => false,
        };

        if self.shuffle {
            if self.unplayed.is_empty() {
                if !wrap {
                    self.current = None;
                    return None;
                }
                self.refill_pool();
            }
            let Some(pick) = self.draw() else {
                // Single-entry queue under repeat.
                return Some(cur);
            };
            self.history.push(cur);
            self.current = Some(pick);
            return Some(pick);
        }

        let next = if cur + 1 < self.queue.len() {
            cur + 1
        } else if wrap {
            0
        } else {
            self.current = None;
            return None;
        };
        self.current = Some(next);
        Some(next)
    }

    /// Step back: the previously played entry under shuffle, the preceding
    /// index otherwise (wrapping under repeat-all, restarting at 0 otherwise).
    pub fn previous(&mut self) -> Option<usize> {
        if self.queue.is_empty() {
            return None;
        }
        if self.shuffle {
            if let Some(prev) = self.history.pop() {
                if let Some(cur) = self.current {
                    self.unplayed.push(cur);
                }
                self.current = Some(prev);
                return Some(prev);
            }
            return self.current.or_else(|| self.start());
        }
        let prev = match self.current {
            Some(0) if self.repeat == RepeatMode::All => self.queue.len() - 1,
            Some(cur) => cur.saturating_sub(1),
            None => 0,
        };
        self.current = Some(prev);
        Some(prev)
    }

    pub fn set_shuffle(&mut self, on: bool) {
        if self.shuffle == on {
            return;
        }
        self.shuffle = on;
        self.history.clear();
        self.refill_pool();
    }

    pub fn set_repeat(&mut self, mode: RepeatMode) {
        self.repeat = mode;
    }

    /// Empty queue, default modes.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.current = None;
        self.shuffle = false;
        self.repeat = RepeatMode::Off;
        self.unplayed.clear();
        self.history.clear();
    }

    fn refill_pool(&mut self) {
        self.unplayed.clear();
        if self.shuffle {
            self.unplayed
                .extend((0..self.queue.len()).filter(|&i| Some(i) != self.current));
        }
    }

    fn draw(&mut self) -> Option<usize> {
        if self.unplayed.is_empty() {
            return None;
        }
        let slot = self.rng.random_range(0..self.unplayed.len());
        Some(self.unplayed.swap_remove(slot))
    }
}
