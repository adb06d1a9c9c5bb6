//! Free-id cache: in-memory batches in front of the free-id region of an id file.
//!
//! The file holds free ids after the header. `[read_position, max_read_position)`
//! is the region still offered to `pop`; entries appended past
//! `max_read_position` were freed this session and only become visible after a
//! reopen, or right away when aggressive reuse is on.

use std::collections::VecDeque;

use tracing::{debug, trace};

use super::file::{self, HEADER_LEN, ID_ENTRY_LEN};
use crate::primitives::io::FileIo;
use crate::types::Result;

#[derive(Debug)]
pub(crate) struct FreeIdCache {
    grab_size: usize,
    aggressive_reuse: bool,
    /// Batch materialized from the file, ascending, consumed front first.
    read_batch: VecDeque<u64>,
    /// Ids freed this session and not yet written out.
    released: VecDeque<u64>,
    read_position: u64,
    max_read_position: u64,
    /// Free ids known to this cache across memory and file.
    free_count: u64,
}

impl FreeIdCache {
    /// Attaches to the free-id region of `io`.
    pub(crate) fn open(io: &dyn FileIo, grab_size: usize, aggressive_reuse: bool) -> Result<Self> {
        let len = io.len()?;
        let entries = len.saturating_sub(HEADER_LEN as u64) / ID_ENTRY_LEN as u64;
        Ok(Self {
            grab_size,
            aggressive_reuse,
            read_batch: VecDeque::with_capacity(grab_size),
            released: VecDeque::new(),
            read_position: HEADER_LEN as u64,
            max_read_position: file::entry_offset(entries),
            free_count: entries,
        })
    }

    pub(crate) fn free_count(&self) -> u64 {
        self.free_count
    }

    /// Takes the next reusable id, skipping `reserved` and anything at or above `high_id`.
    pub(crate) fn pop(
        &mut self,
        io: &dyn FileIo,
        reserved: Option<u64>,
        high_id: u64,
    ) -> Result<Option<u64>> {
        loop {
            let candidate = if self.aggressive_reuse && !self.released.is_empty() {
                self.released.pop_front()
            } else if let Some(id) = self.read_batch.pop_front() {
                Some(id)
            } else if self.read_position < self.max_read_position {
                self.load_batch(io)?;
                continue;
            } else {
                None
            };
            let Some(id) = candidate else {
                return Ok(None);
            };
            self.free_count = self.free_count.saturating_sub(1);
            if Some(id) == reserved {
                trace!(id, "skipping reserved id found in free list");
                continue;
            }
            if id >= high_id {
                trace!(id, high_id, "dropping free id above high id");
                continue;
            }
            return Ok(Some(id));
        }
    }

    /// Buffers a freed id, writing the buffer out once it holds a full grab.
    pub(crate) fn release(&mut self, io: &dyn FileIo, id: u64) -> Result<()> {
        self.released.push_back(id);
        self.free_count += 1;
        if self.released.len() >= self.grab_size {
            self.flush_released(io)?;
        }
        Ok(())
    }

    /// Drops every free id at or above `high_id`, in memory and in the file.
    pub(crate) fn retain_below(&mut self, io: &dyn FileIo, high_id: u64) -> Result<()> {
        let before = self.read_batch.len() + self.released.len();
        self.read_batch.retain(|&id| id < high_id);
        self.released.retain(|&id| id < high_id);
        let mut dropped = (before - self.read_batch.len() - self.released.len()) as u64;

        let end = io.len()?;
        if self.read_position < end {
            let mut buf = vec![0u8; (end - self.read_position) as usize];
            io.read_at(self.read_position, &mut buf)?;
            let split = (self.max_read_position - self.read_position) as usize;
            let readable = file::decode_ids(&buf[..split]);
            let pending = file::decode_ids(&buf[split..]);
            let total = (readable.len() + pending.len()) as u64;
            let readable: Vec<u64> = readable.into_iter().filter(|&id| id < high_id).collect();
            let pending: Vec<u64> = pending.into_iter().filter(|&id| id < high_id).collect();
            dropped += total - (readable.len() + pending.len()) as u64;

            let mut out = Vec::with_capacity((readable.len() + pending.len()) * ID_ENTRY_LEN);
            file::encode_ids(&readable, &mut out);
            file::encode_ids(&pending, &mut out);
            io.write_at(self.read_position, &out)?;
            io.truncate(self.read_position + out.len() as u64)?;
            self.max_read_position = self.read_position + (readable.len() * ID_ENTRY_LEN) as u64;
            if self.aggressive_reuse {
                self.max_read_position = io.len()?;
            }
        }
        self.free_count = self.free_count.saturating_sub(dropped);
        debug!(high_id, dropped, "dropped free ids above new high id");
        Ok(())
    }

    /// Persists every buffered id and compacts the unread region behind the header.
    pub(crate) fn close(&mut self, io: &dyn FileIo) -> Result<()> {
        self.flush_released(io)?;
        if !self.read_batch.is_empty() {
            self.released.extend(self.read_batch.drain(..));
            self.flush_released(io)?;
        }

        let end = io.len()?;
        let mut read_pos = self.read_position.min(self.max_read_position).min(end);
        let mut write_pos = HEADER_LEN as u64;
        if read_pos > write_pos {
            let chunk = (self.grab_size * ID_ENTRY_LEN) as u64;
            let mut buf = Vec::new();
            while read_pos < end {
                let len = chunk.min(end - read_pos);
                buf.resize(len as usize, 0);
                io.read_at(read_pos, &mut buf)?;
                io.write_at(write_pos, &buf)?;
                read_pos += len;
                write_pos += len;
            }
            io.truncate(write_pos)?;
        }
        self.read_position = HEADER_LEN as u64;
        self.max_read_position = io.len()?;
        Ok(())
    }

    fn load_batch(&mut self, io: &dyn FileIo) -> Result<()> {
        let wanted = (self.grab_size * ID_ENTRY_LEN) as u64;
        let len = wanted.min(self.max_read_position - self.read_position);
        let mut buf = vec![0u8; len as usize];
        io.read_at(self.read_position, &mut buf)?;
        self.read_position += len;
        let mut ids = file::decode_ids(&buf);
        ids.sort_unstable();
        trace!(
            count = ids.len(),
            read_position = self.read_position,
            "loaded free id batch"
        );
        self.read_batch.extend(ids);
        Ok(())
    }

    fn flush_released(&mut self, io: &dyn FileIo) -> Result<()> {
        if self.released.is_empty() {
            return Ok(());
        }
        let ids: Vec<u64> = self.released.drain(..).collect();
        let mut out = Vec::with_capacity(ids.len() * ID_ENTRY_LEN);
        file::encode_ids(&ids, &mut out);
        let end = io.len()?;
        io.write_at(end, &out)?;
        if self.aggressive_reuse {
            self.max_read_position = end + out.len() as u64;
        }
        trace!(count = ids.len(), offset = end, "flushed released ids");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn released_len(&self) -> usize {
        self.released.len()
    }
}
