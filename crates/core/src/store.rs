//! Crash-consistent ring store of telemetry snapshots on a byte-addressable
//! durable device.
//!
//! ## Device layout
//!
//! ```text
//! 0                 header (16 B): magic u16 | count u16 | head u16 | reserved
//! 16                slot 0 .. slot capacity-1 (32 B each)
//! 16 + 32*capacity  settings byte (auto-mode)
//! ```
//!
//! `head` is the slot the next append writes to. While the store has never
//! wrapped `head == count`; once full, `count == capacity` and `head` walks
//! the slots overwriting the oldest record. Reads reconstruct chronological
//! order from `head` and `count`.
//!
//! Every append commits the record before the header, so a reset between the
//! two leaves the previous header describing the previous contents.

use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::snapshot::{TelemetrySnapshot, RECORD_SIZE};

/// Validity marker stored at offset 0.
pub const STORE_MAGIC: u16 = 0x1AA1;

/// Bytes reserved for the header ahead of the first slot.
pub const HEADER_SIZE: usize = 16;

const MAGIC_AT: usize = 0;
const COUNT_AT: usize = 2;
const HEAD_AT: usize = 4;

const AUTO_MODE_OFF: u8 = 0;
const AUTO_MODE_ON: u8 = 1;

// ---------------------------------------------------------------------------
// Device boundary
// ---------------------------------------------------------------------------

/// Byte-addressable durable storage with an explicit commit boundary.
/// Writes become durable only once `commit` succeeds.
pub trait StorageDevice {
    fn size(&self) -> usize;
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StoreError>;
    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
}

/// Device size needed for a store of `capacity` records plus the settings byte.
pub fn required_size(capacity: u16) -> usize {
    HEADER_SIZE + RECORD_SIZE * capacity as usize + 1
}

/// Outcome of [`RingStore::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// A valid header was found; buffered records survive.
    Restored { count: usize },
    /// The header was missing or corrupt and has been reset to empty.
    Formatted,
}

// ---------------------------------------------------------------------------
// Ring store
// ---------------------------------------------------------------------------

pub struct RingStore<D> {
    device: D,
    capacity: u16,
    count: u16,
    head: u16,
    ready: bool,
}

impl<D: StorageDevice> RingStore<D> {
    pub fn new(device: D, capacity: u16) -> Self {
        Self {
            device,
            capacity: capacity.max(1),
            count: 0,
            head: 0,
            ready: false,
        }
    }

    /// Validate the header, formatting the store when it is absent, torn, or
    /// describes an impossible state.
    pub fn init(&mut self) -> Result<InitOutcome, StoreError> {
        let needed = required_size(self.capacity);
        if self.device.size() < needed {
            return Err(StoreError::OutOfRange {
                offset: 0,
                len: needed,
                size: self.device.size(),
            });
        }

        let mut header = [0u8; HEADER_SIZE];
        self.device.read(0, &mut header)?;

        if let Some((count, head)) = self.parse_header(&header) {
            self.count = count;
            self.head = head;
            self.ready = true;
            info!(count, capacity = self.capacity, "ring store restored");
            return Ok(InitOutcome::Restored {
                count: count as usize,
            });
        }

        warn!("ring store: first run or corrupted store, formatting (buffered records discarded)");
        self.write_header(0, 0)?;
        self.count = 0;
        self.head = 0;
        self.ready = true;
        Ok(InitOutcome::Formatted)
    }

    /// Append a snapshot, overwriting the oldest record once the store is full.
    /// Returns the slot written.
    pub fn append(&mut self, snapshot: &TelemetrySnapshot) -> Result<usize, StoreError> {
        if !self.ready {
            return Err(StoreError::Uninitialized);
        }

        let slot = self.head;
        let overwriting = self.count == self.capacity;

        self.device
            .write(slot_offset(slot), &snapshot.to_bytes())?;
        self.device.commit()?;

        let next_head = self.wrap(slot as u32 + 1);
        let next_count = if overwriting { self.count } else { self.count + 1 };
        self.write_header(next_count, next_head)?;
        self.head = next_head;
        self.count = next_count;

        if overwriting {
            debug!(slot, "ring store full, oldest record overwritten");
        }
        Ok(slot as usize)
    }

    /// Lazily read the stored snapshots, oldest first. Each call starts a
    /// fresh pass.
    pub fn read_all(&self) -> Records<'_, D> {
        Records {
            store: self,
            next: 0,
        }
    }

    /// Forget every record. Slot bytes are left in place.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        if !self.ready {
            return Err(StoreError::Uninitialized);
        }
        self.write_header(0, 0)?;
        self.count = 0;
        self.head = 0;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count as usize
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Persisted auto-mode flag, or `None` if it was never saved.
    pub fn load_auto_mode(&self) -> Option<bool> {
        let mut byte = [0u8; 1];
        self.device.read(self.settings_offset(), &mut byte).ok()?;
        match byte[0] {
            AUTO_MODE_OFF => Some(false),
            AUTO_MODE_ON => Some(true),
            _ => None,
        }
    }

    pub fn save_auto_mode(&mut self, on: bool) -> Result<(), StoreError> {
        let byte = if on { AUTO_MODE_ON } else { AUTO_MODE_OFF };
        self.device.write(self.settings_offset(), &[byte])?;
        self.device.commit()
    }

    #[cfg(test)]
    pub(crate) fn device(&self) -> &D {
        &self.device
    }

    #[cfg(test)]
    pub(crate) fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    #[cfg(test)]
    pub(crate) fn into_device(self) -> D {
        self.device
    }

    fn parse_header(&self, header: &[u8; HEADER_SIZE]) -> Option<(u16, u16)> {
        let field = |at: usize| u16::from_le_bytes([header[at], header[at + 1]]);
        if field(MAGIC_AT) != STORE_MAGIC {
            return None;
        }
        let count = field(COUNT_AT);
        let head = field(HEAD_AT);
        let consistent = if count < self.capacity {
            head == count
        } else {
            count == self.capacity && head < self.capacity
        };
        consistent.then_some((count, head))
    }

    fn write_header(&mut self, count: u16, head: u16) -> Result<(), StoreError> {
        let mut header = [0u8; HEADER_SIZE];
        header[MAGIC_AT..MAGIC_AT + 2].copy_from_slice(&STORE_MAGIC.to_le_bytes());
        header[COUNT_AT..COUNT_AT + 2].copy_from_slice(&count.to_le_bytes());
        header[HEAD_AT..HEAD_AT + 2].copy_from_slice(&head.to_le_bytes());
        self.device.write(0, &header)?;
        self.device.commit()
    }

    fn settings_offset(&self) -> usize {
        HEADER_SIZE + RECORD_SIZE * self.capacity as usize
    }

    fn oldest_slot(&self) -> u16 {
        self.wrap(self.head as u32 + self.capacity as u32 - self.count as u32)
    }

    /// Reduce a slot index modulo capacity. Sums are widened since a u16
    /// capacity above `u16::MAX / 2` overflows them.
    fn wrap(&self, index: u32) -> u16 {
        (index % self.capacity as u32) as u16
    }
}

fn slot_offset(slot: u16) -> usize {
    HEADER_SIZE + RECORD_SIZE * slot as usize
}

/// Finite pass over the stored snapshots, oldest first.
pub struct Records<'a, D> {
    store: &'a RingStore<D>,
    next: u16,
}

impl<D: StorageDevice> Iterator for Records<'_, D> {
    type Item = Result<TelemetrySnapshot, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let store = self.store;
        if !store.ready || self.next >= store.count {
            return None;
        }
        let slot = store.wrap(store.oldest_slot() as u32 + self.next as u32);
        self.next += 1;

        let mut buf = [0u8; RECORD_SIZE];
        Some(
            store
                .device
                .read(slot_offset(slot), &mut buf)
                .map(|()| TelemetrySnapshot::from_bytes(&buf)),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.store.count.saturating_sub(self.next) as usize;
        (left, Some(left))
    }
}

// ---------------------------------------------------------------------------
// In-memory device (tests)
// ---------------------------------------------------------------------------

/// RAM-backed device that separates staged writes from the committed image
/// so tests can simulate resets and failing commits.
#[cfg(test)]
pub(crate) struct MemoryDevice {
    durable: Vec<u8>,
    staged: Vec<u8>,
    passing_commits: usize,
    failing_commits: usize,
}

#[cfg(test)]
impl MemoryDevice {
    /// Erased device (all bytes 0xFF, like blank flash).
    pub(crate) fn new(size: usize) -> Self {
        Self::from_image(vec![0xFF; size])
    }

    pub(crate) fn from_image(image: Vec<u8>) -> Self {
        Self {
            staged: image.clone(),
            durable: image,
            passing_commits: 0,
            failing_commits: 0,
        }
    }

    /// Make the next `n` commits fail, discarding their staged writes.
    pub(crate) fn fail_next_commits(&mut self, n: usize) {
        self.fail_commits_after(0, n);
    }

    /// Let `pass` commits succeed, then fail the following `n`.
    pub(crate) fn fail_commits_after(&mut self, pass: usize, n: usize) {
        self.passing_commits = pass;
        self.failing_commits = n;
    }

    /// Committed image, as it would be seen after a reset.
    pub(crate) fn durable(&self) -> &[u8] {
        &self.durable
    }
}

#[cfg(test)]
impl StorageDevice for MemoryDevice {
    fn size(&self) -> usize {
        self.staged.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StoreError> {
        let end = check_range(offset, buf.len(), self.staged.len())?;
        buf.copy_from_slice(&self.staged[offset..end]);
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StoreError> {
        let end = check_range(offset, bytes.len(), self.staged.len())?;
        self.staged[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.passing_commits > 0 {
            self.passing_commits -= 1;
        } else if self.failing_commits > 0 {
            self.failing_commits -= 1;
            self.staged.copy_from_slice(&self.durable);
            return Err(StoreError::Io("simulated commit failure".into()));
        }
        self.durable.copy_from_slice(&self.staged);
        Ok(())
    }
}

/// Bounds check shared by device implementations. Returns the end offset.
pub fn check_range(offset: usize, len: usize, size: usize) -> Result<usize, StoreError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(end),
        _ => Err(StoreError::OutOfRange { offset, len, size }),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
