//! Buffered File Reader.
//!
//! Wraps a file with a background prefetch thread that keeps a circular byte
//! buffer topped up, so decode calls see a synchronous `Read + Seek` interface
//! that tolerates slow storage.
//!
//! ## Design
//! - Single producer (prefetch thread) advances `tail`; single consumer (the
//!   owning Source) advances `head`. Both happen under one mutex, with a
//!   [`Condvar`] as the "state changed" signal.
//! - A seek that leaves the buffered window bumps `generation`; data read for
//!   an older generation is discarded, so a reader never observes a half-reset
//!   buffer.
//! - Dropping the reader stops and joins the prefetch thread before the file
//!   handle is released.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use symphonia::core::io::MediaSource;

use crate::config::ReaderOptions;
use crate::error::{EngineError, Result};

/// Upper bound of a single condition-variable wait; waits are re-checked in a loop.
const WAIT_SLICE: Duration = Duration::from_millis(50);

pub struct BufferedFileReader {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    len: u64,
    path: PathBuf,
}

struct Shared {
    ring: Mutex<Ring>,
    cv: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Ring {
    buf: Box<[u8]>,
    head: u64,
    tail: u64,
    /// File offset of the byte at `head`.
    offset: u64,
    low_water: usize,
    filling: bool,
    eof: bool,
    error: bool,
    stop: bool,
    seek_to: Option<u64>,
    generation: u64,
}

impl Ring {
    fn new(capacity: usize, low_water: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            offset: 0,
            low_water,
            filling: true,
            eof: false,
            error: false,
            stop: false,
            seek_to: None,
            generation: 0,
        }
    }

    fn occupancy(&self) -> usize {
        (self.tail - self.head) as usize
    }

    fn free(&self) -> usize {
        self.buf.len() - self.occupancy()
    }

    /// Hysteresis: start filling below the low-water mark, keep going until full.
    fn wants_data(&mut self) -> bool {
        if self.eof || self.error {
            return false;
        }
        if self.occupancy() < self.low_water {
            self.filling = true;
        }
        if self.free() == 0 {
            self.filling = false;
        }
        self.filling
    }

    fn push(&mut self, data: &[u8]) {
        debug_assert!(data.len() <= self.free());
        let cap = self.buf.len();
        let start = (self.tail % cap as u64) as usize;
        let first = data.len().min(cap - start);
        self.buf[start..start + first].copy_from_slice(&data[..first]);
        self.buf[..data.len() - first].copy_from_slice(&data[first..]);
        self.tail += data.len() as u64;
    }

    fn pop_into(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.occupancy());
        if n == 0 {
            return 0;
        }
        let cap = self.buf.len();
        let start = (self.head % cap as u64) as usize;
        let first = n.min(cap - start);
        dst[..first].copy_from_slice(&self.buf[start..start + first]);
        dst[first..n].copy_from_slice(&self.buf[..n - first]);
        self.head += n as u64;
        self.offset += n as u64;
        n
    }

    fn reset_at(&mut self, target: u64) {
        self.head = 0;
        self.tail = 0;
        self.offset = target;
        self.eof = false;
        self.error = false;
        self.filling = true;
        self.seek_to = Some(target);
        self.generation = self.generation.wrapping_add(1);
    }
}

impl BufferedFileReader {
    /// Open `path` and start prefetching from offset 0.
    pub fn open(path: &Path, options: ReaderOptions) -> Result<Self> {
        let file = File::open(path).map_err(|e| EngineError::io(path, e))?;
        let len = file
            .metadata()
            .map_err(|e| EngineError::io(path, e))?
            .len();
        Self::with_source(file, len, options, path)
    }

    /// Run the prefetch engine over any seekable byte source of known length.
    pub fn with_source<R>(
        inner: R,
        len: u64,
        options: ReaderOptions,
        origin: impl Into<PathBuf>,
    ) -> Result<Self>
    where
        R: Read + Seek + Send + 'static,
    {
        let path = origin.into();
        let options = options.normalized();
        let shared = Arc::new(Shared {
            ring: Mutex::new(Ring::new(options.capacity, options.low_water)),
            cv: Condvar::new(),
        });

        let shared_for_thread = shared.clone();
        let chunk = options.chunk;
        let worker = thread::Builder::new()
            .name("prefetch".to_string())
            .spawn(move || prefetch_main(inner, &shared_for_thread, chunk))
            .map_err(|e| EngineError::io(&path, e))?;

        tracing::debug!(path = ?path, len, capacity = options.capacity, "prefetch started");
        Ok(Self {
            shared,
            worker: Some(worker),
            len,
            path,
        })
    }

    /// Total length of the underlying file in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Absolute file offset of the next byte returned by a read.
    pub fn position(&self) -> u64 {
        self.shared.lock().offset
    }

    /// Whether the prefetch thread hit an I/O error since the last reset.
    pub fn has_error(&self) -> bool {
        self.shared.lock().error
    }

    /// Block until `dst` is full, EOF, or an I/O error.
    ///
    /// Returns the bytes copied: `dst.len()` normally, fewer at end of file,
    /// and 0 once the error flag is set and the buffered data is exhausted.
    pub fn read_blocking(&mut self, dst: &mut [u8]) -> usize {
        let mut copied = 0usize;
        let mut g = self.shared.lock();
        while copied < dst.len() {
            let n = g.pop_into(&mut dst[copied..]);
            copied += n;
            if n > 0 {
                self.shared.cv.notify_all();
            }
            if copied == dst.len() || g.error || (g.eof && g.occupancy() == 0) {
                break;
            }
            g = self
                .shared
                .cv
                .wait_timeout(g, WAIT_SLICE)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        copied
    }

    /// Reposition to an absolute file offset.
    ///
    /// Forward seeks inside the buffered window only advance `head`; anything
    /// else discards the buffer and re-primes from `target`.
    pub fn seek_absolute(&mut self, target: u64) -> u64 {
        let mut g = self.shared.lock();
        let window = g.occupancy() as u64;
        if g.seek_to.is_none() && target >= g.offset && target - g.offset <= window {
            let skip = target - g.offset;
            g.head += skip;
            g.offset = target;
        } else {
            g.reset_at(target);
        }
        drop(g);
        self.shared.cv.notify_all();
        target
    }
}

impl Read for BufferedFileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = self.read_blocking(buf);
        if n == 0 && self.has_error() {
            return Err(io::Error::other(format!("prefetch failed for {:?}", self.path)));
        }
        Ok(n)
    }
}

impl Seek for BufferedFileReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target: i128 = match pos {
            SeekFrom::Start(x) => i128::from(x),
            SeekFrom::Current(d) => i128::from(self.position()) + i128::from(d),
            SeekFrom::End(d) => i128::from(self.len) + i128::from(d),
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        Ok(self.seek_absolute(target as u64))
    }
}

impl MediaSource for BufferedFileReader {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.len)
    }
}

impl Drop for BufferedFileReader {
    fn drop(&mut self) {
        self.shared.lock().stop = true;
        self.shared.cv.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!(path = ?self.path, "prefetch thread panicked");
            }
        }
    }
}

/// Prefetch loop: apply pending seeks, top up below low water, stop on request.
fn prefetch_main<R: Read + Seek>(mut inner: R, shared: &Shared, chunk: usize) {
    let mut scratch = vec![0u8; chunk];
    loop {
        let (want, generation) = {
            let mut g = shared.lock();
            loop {
                if g.stop {
                    return;
                }
                if let Some(target) = g.seek_to.take() {
                    if let Err(e) = inner.seek(SeekFrom::Start(target)) {
                        tracing::warn!(offset = target, "prefetch seek failed: {e}");
                        g.error = true;
                        shared.cv.notify_all();
                    }
                    continue;
                }
                if g.wants_data() {
                    break;
                }
                g = shared
                    .cv
                    .wait_timeout(g, WAIT_SLICE)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            (g.free().min(chunk), g.generation)
        };

        let result = read_retrying(&mut inner, &mut scratch[..want]);

        let mut g = shared.lock();
        if g.generation != generation {
            // A seek raced with this read; its data belongs to the old position.
            continue;
        }
        match result {
            Ok(0) => g.eof = true,
            Ok(n) => g.push(&scratch[..n]),
            Err(e) => {
                tracing::warn!("prefetch read failed: {e}");
                g.error = true;
            }
        }
        drop(g);
        shared.cv.notify_all();
    }
}

fn read_retrying(inner: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match inner.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn small_options() -> ReaderOptions {
        ReaderOptions {
            capacity: 4096,
            low_water: 1024,
            chunk: 512,
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// Storage that returns tiny reads after a delay.
    struct SlowReader {
        inner: Cursor<Vec<u8>>,
        delay: Duration,
        max_read: usize,
    }

    impl Read for SlowReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            thread::sleep(self.delay);
            let n = buf.len().min(self.max_read);
            self.inner.read(&mut buf[..n])
        }
    }

    impl Seek for SlowReader {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    /// Storage that fails once `fail_after` bytes have been served.
    struct FailingReader {
        inner: Cursor<Vec<u8>>,
        fail_after: u64,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.inner.position() >= self.fail_after {
                return Err(io::Error::other("media removed"));
            }
            let left = (self.fail_after - self.inner.position()) as usize;
            let n = buf.len().min(left);
            self.inner.read(&mut buf[..n])
        }
    }

    impl Seek for FailingReader {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    /// Storage that records when the prefetch thread released it.
    struct DropFlag {
        inner: Cursor<Vec<u8>>,
        dropped: Arc<AtomicBool>,
    }

    impl Read for DropFlag {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Seek for DropFlag {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let err = BufferedFileReader::open(Path::new("/definitely/not/here.wav"), small_options())
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Io { .. }));
    }

    #[test]
    fn reads_whole_file_through_small_ring() {
        let data = pattern(100_000);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let mut reader = BufferedFileReader::open(file.path(), small_options()).unwrap();
        assert_eq!(reader.len(), data.len() as u64);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(reader.position(), data.len() as u64);
    }

    #[test]
    fn read_returns_short_count_at_eof() {
        let data = pattern(1000);
        let mut reader =
            BufferedFileReader::with_source(Cursor::new(data.clone()), 1000, small_options(), "mem")
                .unwrap();
        let mut buf = vec![0u8; 1500];
        assert_eq!(reader.read_blocking(&mut buf), 1000);
        assert_eq!(&buf[..1000], &data[..]);
        assert_eq!(reader.read_blocking(&mut buf), 0);
        assert!(!reader.has_error());
    }

    #[test]
    fn slow_storage_still_delivers_exact_bytes() {
        let data = pattern(20_000);
        let slow = SlowReader {
            inner: Cursor::new(data.clone()),
            delay: Duration::from_millis(1),
            max_read: 300,
        };
        let mut reader =
            BufferedFileReader::with_source(slow, data.len() as u64, small_options(), "slow")
                .unwrap();

        let mut out = vec![0u8; data.len()];
        let mut filled = 0;
        while filled < out.len() {
            let end = (filled + 777).min(out.len());
            let n = reader.read_blocking(&mut out[filled..end]);
            assert_eq!(n, end - filled, "short read before EOF");
            filled += n;
        }
        assert_eq!(out, data);
    }

    #[test]
    fn seek_outside_window_reprimes_from_new_offset() {
        let data = pattern(50_000);
        let mut reader = BufferedFileReader::with_source(
            Cursor::new(data.clone()),
            data.len() as u64,
            small_options(),
            "mem",
        )
        .unwrap();

        let mut buf = [0u8; 16];
        reader.read_blocking(&mut buf);
        assert_eq!(&buf, &data[..16]);

        reader.seek_absolute(40_000);
        assert_eq!(reader.position(), 40_000);
        reader.read_blocking(&mut buf);
        assert_eq!(&buf, &data[40_000..40_016]);

        reader.seek(SeekFrom::Start(10)).unwrap();
        reader.read_blocking(&mut buf);
        assert_eq!(&buf, &data[10..26]);

        reader.seek(SeekFrom::End(-16)).unwrap();
        reader.read_blocking(&mut buf);
        assert_eq!(&buf, &data[data.len() - 16..]);
    }

    #[test]
    fn seek_inside_window_skips_forward() {
        let data = pattern(8000);
        let mut reader = BufferedFileReader::with_source(
            Cursor::new(data.clone()),
            data.len() as u64,
            small_options(),
            "mem",
        )
        .unwrap();

        let mut buf = [0u8; 8];
        reader.read_blocking(&mut buf);
        reader.seek(SeekFrom::Current(100)).unwrap();
        assert_eq!(reader.position(), 108);
        reader.read_blocking(&mut buf);
        assert_eq!(&buf, &data[108..116]);
    }

    #[test]
    fn seek_before_start_is_rejected() {
        let mut reader =
            BufferedFileReader::with_source(Cursor::new(pattern(10)), 10, small_options(), "mem")
                .unwrap();
        let err = reader.seek(SeekFrom::Current(-1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn io_error_is_flagged_and_read_returns_zero() {
        let data = pattern(3000);
        let failing = FailingReader {
            inner: Cursor::new(data.clone()),
            fail_after: 1500,
        };
        let mut reader =
            BufferedFileReader::with_source(failing, data.len() as u64, small_options(), "flaky")
                .unwrap();

        let mut buf = vec![0u8; 3000];
        let n = reader.read_blocking(&mut buf);
        assert_eq!(n, 1500);
        assert_eq!(&buf[..1500], &data[..1500]);
        assert_eq!(reader.read_blocking(&mut buf), 0);
        assert!(reader.has_error());
        assert!(reader.read(&mut buf).is_err());
    }

    #[test]
    fn drop_joins_prefetch_thread() {
        let dropped = Arc::new(AtomicBool::new(false));
        let source = DropFlag {
            inner: Cursor::new(pattern(100_000)),
            dropped: dropped.clone(),
        };
        let reader =
            BufferedFileReader::with_source(source, 100_000, small_options(), "flag").unwrap();
        drop(reader);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn media_source_reports_length() {
        let reader =
            BufferedFileReader::with_source(Cursor::new(pattern(42)), 42, small_options(), "mem")
                .unwrap();
        assert!(reader.is_seekable());
        assert_eq!(reader.byte_len(), Some(42));
    }
}
