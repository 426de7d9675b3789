//! SPSC ring buffer carrying interleaved stereo frames
//!
//! The producer (emulation thread) and consumer (audio callback) coordinate
//! through monotonically increasing atomic frame cursors; the sample storage
//! itself sits behind a `parking_lot` mutex that is only ever held for a
//! bounded copy. Cursor distances never wrap ambiguously because the cursors
//! count frames since creation, not slot indices.
//!
//! Overrun policy is drop-oldest: when the producer laps the consumer the
//! oldest frames are discarded so the stream stays as fresh as possible.
//! Underrun policy is zero-fill: the consumer always gets a full buffer and
//! never blocks.

use std::sync::atomic::{AtomicUsize, Ordering};

use log::warn;
use parking_lot::Mutex;

use crate::{AudioError, Result};

/// Upper bound on capacity; past this a config typo is more likely than a
/// genuine need (1M frames is ~23 seconds at 44.1kHz).
const MAX_CAPACITY_FRAMES: usize = 1 << 20;

/// Running transport counters, all in frames
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RingBufferStats {
    /// Total frames accepted from the producer
    pub frames_written: usize,
    /// Total frames handed to the consumer (excluding zero-fill)
    pub frames_read: usize,
    /// Frames discarded by the drop-oldest overrun policy
    pub frames_dropped: usize,
    /// Frames zero-filled on underrun
    pub frames_zero_filled: usize,
}

/// Fixed-capacity SPSC ring buffer of stereo `i16` frames
pub struct AudioRingBuffer {
    storage: Mutex<Vec<i16>>,
    capacity: usize,
    mask: usize,
    write_cursor: AtomicUsize,
    read_cursor: AtomicUsize,
    dropped: AtomicUsize,
    written: AtomicUsize,
    read: AtomicUsize,
    zero_filled: AtomicUsize,
}

impl AudioRingBuffer {
    /// Create a buffer holding at least `min_frames` stereo frames.
    ///
    /// Capacity is rounded up to a power of two so cursor arithmetic stays a
    /// mask, matching how the rest of the audio path sizes its buffers.
    pub fn new(min_frames: usize) -> Result<Self> {
        if min_frames == 0 {
            return Err(AudioError::Buffer(
                "ring buffer capacity must be non-zero".into(),
            ));
        }
        let capacity = min_frames.next_power_of_two();
        if capacity > MAX_CAPACITY_FRAMES {
            return Err(AudioError::Buffer(format!(
                "ring buffer capacity {capacity} frames exceeds the {MAX_CAPACITY_FRAMES} frame limit"
            )));
        }
        Ok(Self {
            storage: Mutex::new(vec![0; capacity * 2]),
            capacity,
            mask: capacity - 1,
            write_cursor: AtomicUsize::new(0),
            read_cursor: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
            written: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
            zero_filled: AtomicUsize::new(0),
        })
    }

    /// Usable capacity in frames
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames currently buffered.
    ///
    /// The two cursors are loaded independently, so a concurrent read can
    /// momentarily make the distance appear negative; saturate instead.
    pub fn available(&self) -> usize {
        let write = self.write_cursor.load(Ordering::Acquire);
        let read = self.read_cursor.load(Ordering::Acquire);
        write.saturating_sub(read)
    }

    /// Whether every slot is occupied
    pub fn is_full(&self) -> bool {
        self.available() == self.capacity
    }

    /// Whether no frames are buffered
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Write interleaved stereo samples; the slice length must be even.
    ///
    /// When the buffer cannot hold all incoming frames the oldest buffered
    /// frames are dropped to make room. Returns the number of frames
    /// dropped this call.
    pub fn write(&self, samples: &[i16]) -> Result<usize> {
        if samples.len() % 2 != 0 {
            return Err(AudioError::Buffer(
                "interleaved stereo writes need an even sample count".into(),
            ));
        }
        let frames = samples.len() / 2;
        if frames == 0 {
            return Ok(0);
        }

        let mut storage = self.storage.lock();

        // An oversized write keeps only its newest `capacity` frames.
        let (samples, skipped) = if frames > self.capacity {
            let skip = frames - self.capacity;
            (&samples[skip * 2..], skip)
        } else {
            (samples, 0)
        };
        let frames = samples.len() / 2;

        let write = self.write_cursor.load(Ordering::Relaxed);
        let read = self.read_cursor.load(Ordering::Relaxed);
        let free = self.capacity - (write - read);
        let lapped = frames.saturating_sub(free);
        if lapped > 0 {
            // consumer is behind: drop the oldest frames
            self.read_cursor.fetch_add(lapped, Ordering::Release);
        }
        let dropped = skipped + lapped;
        if dropped > 0 {
            self.dropped.fetch_add(dropped, Ordering::Relaxed);
            warn!("audio ring buffer overrun, dropped {dropped} frames");
        }

        for (i, frame) in samples.chunks_exact(2).enumerate() {
            let slot = ((write + i) & self.mask) * 2;
            storage[slot] = frame[0];
            storage[slot + 1] = frame[1];
        }
        // cursor updates stay inside the lock so read and write cursors can
        // never cross each other
        self.written.fetch_add(frames, Ordering::Relaxed);
        self.write_cursor.fetch_add(frames, Ordering::Release);
        drop(storage);

        Ok(dropped)
    }

    /// Fill `out` with interleaved stereo samples, zero-filling any shortfall.
    ///
    /// Never blocks on the producer; returns the number of real (non-zero-
    /// filled) frames delivered. The slice length must be even.
    pub fn read(&self, out: &mut [i16]) -> Result<usize> {
        if out.len() % 2 != 0 {
            return Err(AudioError::Buffer(
                "interleaved stereo reads need an even sample count".into(),
            ));
        }
        let wanted = out.len() / 2;

        let storage = self.storage.lock();
        let write = self.write_cursor.load(Ordering::Acquire);
        let read = self.read_cursor.load(Ordering::Relaxed);
        let available = write - read;
        let delivered = wanted.min(available);

        for (i, frame) in out.chunks_exact_mut(2).take(delivered).enumerate() {
            let slot = ((read + i) & self.mask) * 2;
            frame[0] = storage[slot];
            frame[1] = storage[slot + 1];
        }
        self.read.fetch_add(delivered, Ordering::Relaxed);
        self.read_cursor.fetch_add(delivered, Ordering::Release);
        drop(storage);

        for sample in &mut out[delivered * 2..] {
            *sample = 0;
        }
        let shortfall = wanted - delivered;
        if shortfall > 0 {
            self.zero_filled.fetch_add(shortfall, Ordering::Relaxed);
        }
        Ok(delivered)
    }

    /// Discard everything buffered
    pub fn clear(&self) {
        let _storage = self.storage.lock();
        let write = self.write_cursor.load(Ordering::Relaxed);
        self.read_cursor.store(write, Ordering::Release);
    }

    /// Snapshot of the transport counters
    pub fn stats(&self) -> RingBufferStats {
        RingBufferStats {
            frames_written: self.written.load(Ordering::Relaxed),
            frames_read: self.read.load(Ordering::Relaxed),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
            frames_zero_filled: self.zero_filled.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for AudioRingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioRingBuffer")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .field("stats", &self.stats())
            .finish()
    }
}
