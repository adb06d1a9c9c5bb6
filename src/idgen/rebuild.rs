//! Reconstruction of allocator state from the owning record store.
//!
//! Used when a store opens and its id file is missing. Every slot up to the
//! physical end of the store file is classified as in use or not; the high id
//! becomes one past the last in-use slot and every unused slot below it is free.

use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::file::IdFileImage;
use crate::primitives::io::FileSystem;
use crate::types::{Result, SombraError};

/// Bytes read per bulk request in [`RebuildMode::Fast`].
pub const FAST_SCAN_CHUNK_BYTES: usize = 64 * 1024;

/// Strategy used to classify record slots during a rebuild.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildMode {
    /// One in-use probe per record.
    #[default]
    Slow,
    /// Chunked bulk reads classified in memory. Same result as `Slow`.
    Fast,
}

/// Read access to a record store, as needed by the rebuild scanner.
pub trait RecordScan {
    /// Size in bytes of one record slot.
    fn record_size(&self) -> usize;
    /// Number of slots up to the physical end of the store file.
    fn slot_count(&self) -> Result<u64>;
    /// Whether slot `id` holds a live record.
    fn is_in_use(&self, id: u64) -> Result<bool>;
    /// Fills `dst` with consecutive slots starting at `first`. `dst` is a whole number of slots.
    fn read_slots(&self, first: u64, dst: &mut [u8]) -> Result<()>;
    /// Whether the raw slot bytes `record` describe a live record.
    fn record_in_use(&self, record: &[u8]) -> bool;
}

/// Format constraints applied while rebuilding.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RebuildSpec {
    /// Largest addressable id.
    pub max_id: u64,
    /// Ids below this are owned by the format and never freed.
    pub reserved_low_ids: u64,
    /// Id never offered as free.
    pub reserved_id: Option<u64>,
}

/// Result of a scan.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RebuildOutcome {
    /// Recomputed watermark.
    pub high_id: u64,
    /// Unused slots below the watermark, ascending.
    pub free_ids: Vec<u64>,
    /// Number of slots examined.
    pub scanned: u64,
}

impl RebuildOutcome {
    /// Id file contents equivalent to this outcome.
    pub fn to_image(&self) -> IdFileImage {
        IdFileImage::new(self.high_id, self.free_ids.clone())
    }
}

/// Classifies every slot of `source` and derives the allocator state.
pub fn scan(source: &dyn RecordScan, spec: &RebuildSpec, mode: RebuildMode) -> Result<RebuildOutcome> {
    let slots = source.slot_count()?;
    let (highest, free) = match mode {
        RebuildMode::Slow => scan_slow(source, slots)?,
        RebuildMode::Fast => scan_fast(source, slots)?,
    };
    let high_id = highest.max(spec.reserved_low_ids);
    if high_id > 0 && high_id - 1 > spec.max_id {
        warn!(high_id, max_id = spec.max_id, "rebuild exceeds id capacity");
        return Err(SombraError::CapacityExceeded {
            id: high_id - 1,
            max_id: spec.max_id,
        });
    }
    let free_ids = free
        .into_iter()
        .filter(|&id| id >= spec.reserved_low_ids && id < high_id && Some(id) != spec.reserved_id)
        .collect();
    Ok(RebuildOutcome {
        high_id,
        free_ids,
        scanned: slots,
    })
}

/// Scans `source` and writes a fresh, clean id file at `path`, replacing any existing one.
pub fn rebuild_id_file(
    fs: &dyn FileSystem,
    path: &Path,
    source: &dyn RecordScan,
    spec: &RebuildSpec,
    mode: RebuildMode,
) -> Result<RebuildOutcome> {
    let started = Instant::now();
    info!(path = %path.display(), ?mode, "rebuilding id file from store");
    let outcome = scan(source, spec, mode)?;
    if fs.exists(path) {
        fs.delete(path)?;
    }
    let io = fs.create_new(path)?;
    outcome.to_image().write_to(&*io)?;
    info!(
        path = %path.display(),
        high_id = outcome.high_id,
        free = outcome.free_ids.len(),
        scanned = outcome.scanned,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "rebuilt id file"
    );
    Ok(outcome)
}

/// Returns `(one past the highest in-use slot, every unused slot)`.
fn scan_slow(source: &dyn RecordScan, slots: u64) -> Result<(u64, Vec<u64>)> {
    let mut highest = 0;
    let mut free = Vec::new();
    for id in 0..slots {
        if source.is_in_use(id)? {
            highest = id + 1;
        } else {
            free.push(id);
        }
    }
    Ok((highest, free))
}

fn scan_fast(source: &dyn RecordScan, slots: u64) -> Result<(u64, Vec<u64>)> {
    let record_size = source.record_size();
    if record_size == 0 {
        return Err(SombraError::Invalid("record size must be positive"));
    }
    let per_chunk = (FAST_SCAN_CHUNK_BYTES / record_size).max(1) as u64;
    let mut buf = vec![0u8; per_chunk as usize * record_size];

    // Walk backwards to the last chunk holding a live record so the forward pass
    // never touches the unused tail.
    let mut end = slots;
    let mut highest = 0;
    while end > 0 {
        let start = end.saturating_sub(per_chunk);
        let chunk = &mut buf[..(end - start) as usize * record_size];
        source.read_slots(start, chunk)?;
        if let Some(pos) = chunk
            .chunks_exact(record_size)
            .rposition(|record| source.record_in_use(record))
        {
            highest = start + pos as u64 + 1;
            break;
        }
        end = start;
    }

    let mut bitmap = vec![0u64; highest.div_ceil(64) as usize];
    let mut start = 0;
    while start < highest {
        let count = per_chunk.min(highest - start);
        let chunk = &mut buf[..count as usize * record_size];
        source.read_slots(start, chunk)?;
        for (offset, record) in chunk.chunks_exact(record_size).enumerate() {
            if source.record_in_use(record) {
                let id = start + offset as u64;
                bitmap[(id / 64) as usize] |= 1u64 << (id % 64);
            }
        }
        start += count;
    }
    let free = (0..highest)
        .filter(|&id| bitmap[(id / 64) as usize] & (1u64 << (id % 64)) == 0)
        .collect();
    debug!(slots, highest, "fast scan complete");
    Ok((highest, free))
}
