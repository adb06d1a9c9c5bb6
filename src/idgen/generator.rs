use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::cache::FreeIdCache;
use super::file::{self, IdFileHeader, IdFileImage};
use super::IdType;
use crate::primitives::io::{FileIo, FileSystem};
use crate::types::{Result, SombraError};

/// Configuration for opening an [`IdGenerator`].
#[derive(Clone, Debug)]
pub struct IdGeneratorOptions {
    /// Number of free ids read from, and written to, the id file per batch.
    pub grab_size: u32,
    /// Largest id the owning record format can address.
    pub max_id: u64,
    /// Id that must never be handed out, typically the format's "no record" marker.
    pub reserved_id: Option<u64>,
    /// Open without taking ownership of the file; every mutation is rejected.
    pub read_only: bool,
    /// Identifier space served by the generator.
    pub id_type: IdType,
    /// Offer ids freed in this session before older ones from the file.
    pub aggressive_reuse: bool,
}

impl IdGeneratorOptions {
    /// Creates options with the given type, grab size and capacity.
    pub fn new(id_type: IdType, grab_size: u32, max_id: u64) -> Self {
        Self {
            grab_size,
            max_id,
            reserved_id: None,
            read_only: false,
            id_type,
            aggressive_reuse: false,
        }
    }

    /// Sets the id that is never allocated.
    pub fn reserved_id(mut self, id: Option<u64>) -> Self {
        self.reserved_id = id;
        self
    }

    /// Enables or disables read-only mode.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Enables or disables reuse of ids freed within the same session.
    pub fn aggressive_reuse(mut self, enabled: bool) -> Self {
        self.aggressive_reuse = enabled;
        self
    }
}

struct GeneratorState {
    /// `None` once closed.
    file: Option<Arc<dyn FileIo>>,
    high_id: u64,
    cache: FreeIdCache,
}

/// Allocator for the record ids of one store.
///
/// Owns its id file between [`IdGenerator::open`] and [`IdGenerator::close`].
/// While open the file carries the sticky marker, so a second open of the same
/// file fails until this instance closes. Dropping without `close` leaves the
/// marker set, which the next open reports the same way as a crash.
///
/// All state sits behind one mutex; the handle can be shared across writer
/// threads by reference or `Arc`.
pub struct IdGenerator {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    id_type: IdType,
    grab_size: u32,
    max_id: u64,
    reserved_id: Option<u64>,
    read_only: bool,
    state: Mutex<GeneratorState>,
}

impl IdGenerator {
    /// Creates an empty id file holding `high_id`.
    ///
    /// With `throw_if_exists` an existing file is an error; otherwise it is replaced.
    pub fn create(
        fs: &dyn FileSystem,
        path: impl AsRef<Path>,
        high_id: u64,
        throw_if_exists: bool,
    ) -> Result<()> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(SombraError::Invalid("id file path is empty"));
        }
        if fs.exists(path) {
            if throw_if_exists {
                return Err(SombraError::InvalidState("id file already exists"));
            }
            fs.delete(path)?;
        }
        let io = fs.create_new(path)?;
        IdFileImage::new(high_id, Vec::new()).write_to(&*io)?;
        info!(path = %path.display(), high_id, "created id file");
        Ok(())
    }

    /// Opens an existing id file. A missing file is created at high id 0.
    pub fn open(
        fs: Arc<dyn FileSystem>,
        path: impl Into<PathBuf>,
        options: IdGeneratorOptions,
    ) -> Result<Self> {
        Self::open_with_high_id(fs, path, options, || Ok(0))
    }

    /// Opens an id file, creating it with `high_id_supplier()` as watermark if it is missing.
    ///
    /// The supplier is only consulted for a missing file and never for a read-only open.
    pub fn open_with_high_id(
        fs: Arc<dyn FileSystem>,
        path: impl Into<PathBuf>,
        options: IdGeneratorOptions,
        high_id_supplier: impl FnOnce() -> Result<u64>,
    ) -> Result<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(SombraError::Invalid("id file path is empty"));
        }
        if options.grab_size == 0 {
            return Err(SombraError::Invalid("grab size must be positive"));
        }
        if !fs.exists(&path) {
            if options.read_only {
                return Err(SombraError::NotFound("id file"));
            }
            Self::create(&*fs, &path, high_id_supplier()?, true)?;
        }

        let io = if options.read_only {
            fs.open_read(&path)?
        } else {
            fs.open_rw(&path)?
        };
        let header = file::read_header(&*io)?;
        if !options.read_only {
            if header.sticky {
                warn!(
                    path = %path.display(),
                    id_type = %options.id_type,
                    "id file is sticky; refusing to open"
                );
                return Err(SombraError::StickyFile { path });
            }
            file::write_marker(&*io, true)?;
            io.sync_all()?;
        }
        let cache = FreeIdCache::open(&*io, options.grab_size as usize, options.aggressive_reuse)?;
        debug!(
            path = %path.display(),
            id_type = %options.id_type,
            high_id = header.high_id,
            free = cache.free_count(),
            read_only = options.read_only,
            "opened id generator"
        );
        Ok(Self {
            fs,
            path,
            id_type: options.id_type,
            grab_size: options.grab_size,
            max_id: options.max_id,
            reserved_id: options.reserved_id,
            read_only: options.read_only,
            state: Mutex::new(GeneratorState {
                file: Some(io),
                high_id: header.high_id,
                cache,
            }),
        })
    }

    /// Reads the watermark stored in an id file without opening it for allocation.
    pub fn read_high_id(fs: &dyn FileSystem, path: impl AsRef<Path>) -> Result<u64> {
        let io = fs.open_read(path.as_ref())?;
        Ok(file::read_header(&*io)?.high_id)
    }

    /// Decodes a whole id file, for inspection tools.
    pub fn read_image(fs: &dyn FileSystem, path: impl AsRef<Path>) -> Result<IdFileImage> {
        let io = fs.open_read(path.as_ref())?;
        IdFileImage::read_from(&*io)
    }

    /// Returns an unused id: a reusable free id if one is available, otherwise the high id.
    pub fn next_id(&self) -> Result<u64> {
        let mut state = self.state.lock();
        self.allocate(&mut state)
    }

    /// Allocates `count` ids under a single lock acquisition.
    ///
    /// On failure the ids taken by this call are handed back: ids grown from the
    /// watermark rewind the high id, reused ids return to the free list. The
    /// allocation error is returned even if the hand-back fails.
    pub fn next_id_batch(&self, count: usize) -> Result<Vec<u64>> {
        let mut state = self.state.lock();
        let start_high_id = state.high_id;
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            match self.allocate(&mut state) {
                Ok(id) => ids.push(id),
                Err(err) => {
                    self.hand_back(&mut state, start_high_id, ids);
                    return Err(err);
                }
            }
        }
        Ok(ids)
    }

    /// Marks `id` as reusable. The reserved id is accepted and ignored.
    pub fn free_id(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock();
        let GeneratorState {
            file,
            high_id,
            cache,
        } = &mut *state;
        let io = self.writable(file)?;
        if Some(id) == self.reserved_id {
            trace!(id, id_type = %self.id_type, "ignoring free of reserved id");
            return Ok(());
        }
        if id >= *high_id {
            return Err(SombraError::IllegalId {
                id,
                high_id: *high_id,
            });
        }
        cache.release(io, id)
    }

    /// Returns the first never-issued id.
    pub fn high_id(&self) -> Result<u64> {
        let state = self.state.lock();
        self.readable(&state.file)?;
        Ok(state.high_id)
    }

    /// Moves the watermark. Lowering it drops every free id at or above `id`.
    pub fn set_high_id(&self, id: u64) -> Result<()> {
        if id > self.max_id.saturating_add(1) {
            return Err(SombraError::CapacityExceeded {
                id: id - 1,
                max_id: self.max_id,
            });
        }
        let mut state = self.state.lock();
        let GeneratorState {
            file,
            high_id,
            cache,
        } = &mut *state;
        let io = self.writable(file)?;
        if id < *high_id {
            cache.retain_below(io, id)?;
        }
        debug!(id_type = %self.id_type, from = *high_id, to = id, "set high id");
        *high_id = id;
        Ok(())
    }

    /// Highest id that may be in use, or `None` if nothing was ever issued.
    pub fn highest_possible_id_in_use(&self) -> Result<Option<u64>> {
        Ok(self.high_id()?.checked_sub(1))
    }

    /// Number of ids below the high id that are not free.
    pub fn number_of_ids_in_use(&self) -> Result<u64> {
        let state = self.state.lock();
        self.readable(&state.file)?;
        Ok(state.high_id.saturating_sub(state.cache.free_count()))
    }

    /// Number of free ids held in memory and in the file.
    pub fn free_id_count(&self) -> Result<u64> {
        let state = self.state.lock();
        self.readable(&state.file)?;
        Ok(state.cache.free_count())
    }

    /// Persists free ids and the high id, clears the sticky marker and releases the file.
    ///
    /// Closing an already closed generator does nothing.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        let Some(io) = state.file.take() else {
            return Ok(());
        };
        if self.read_only {
            debug!(path = %self.path.display(), "closed read-only id generator");
            return Ok(());
        }
        state.cache.close(&*io)?;
        file::write_header(&*io, &IdFileHeader::clean(state.high_id))?;
        io.sync_all()?;
        debug!(
            path = %self.path.display(),
            id_type = %self.id_type,
            high_id = state.high_id,
            free = state.cache.free_count(),
            "closed id generator"
        );
        Ok(())
    }

    /// Removes the id file. Only valid once closed.
    pub fn delete(&self) -> Result<()> {
        if !self.is_closed() {
            return Err(SombraError::InvalidState(
                "generator must be closed before delete",
            ));
        }
        self.fs.delete(&self.path)?;
        info!(path = %self.path.display(), "deleted id file");
        Ok(())
    }

    /// True once [`IdGenerator::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.state.lock().file.is_none()
    }

    /// Path of the backing id file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identifier space of this generator.
    pub fn id_type(&self) -> IdType {
        self.id_type
    }

    /// Capacity of the owning record format.
    pub fn max_id(&self) -> u64 {
        self.max_id
    }

    /// Batch size of the free-id cache.
    pub fn grab_size(&self) -> u32 {
        self.grab_size
    }

    /// Id that is never handed out.
    pub fn reserved_id(&self) -> Option<u64> {
        self.reserved_id
    }

    /// True when opened read-only.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn allocate(&self, state: &mut GeneratorState) -> Result<u64> {
        let GeneratorState {
            file,
            high_id,
            cache,
        } = state;
        let io = self.writable(file)?;
        if let Some(id) = cache.pop(io, self.reserved_id, *high_id)? {
            return Ok(id);
        }

        let mut candidate = *high_id;
        if Some(candidate) == self.reserved_id {
            trace!(id = candidate, id_type = %self.id_type, "skipping reserved id at high id");
            candidate = candidate.checked_add(1).ok_or(SombraError::CapacityExceeded {
                id: candidate,
                max_id: self.max_id,
            })?;
        }
        if candidate > self.max_id {
            warn!(id_type = %self.id_type, id = candidate, max_id = self.max_id, "id capacity exceeded");
            return Err(SombraError::CapacityExceeded {
                id: candidate,
                max_id: self.max_id,
            });
        }
        *high_id = candidate + 1;
        Ok(candidate)
    }

    fn hand_back(&self, state: &mut GeneratorState, start_high_id: u64, ids: Vec<u64>) {
        let GeneratorState {
            file,
            high_id,
            cache,
        } = state;
        *high_id = start_high_id;
        let Some(io) = file.as_deref() else {
            return;
        };
        for id in ids.into_iter().filter(|&id| id < start_high_id) {
            if let Err(err) = cache.release(io, id) {
                warn!(id, id_type = %self.id_type, error = %err, "failed to hand back id");
                return;
            }
        }
    }

    fn readable<'a>(&self, file: &'a Option<Arc<dyn FileIo>>) -> Result<&'a dyn FileIo> {
        file.as_deref()
            .ok_or(SombraError::InvalidState("generator is closed"))
    }

    fn writable<'a>(&self, file: &'a Option<Arc<dyn FileIo>>) -> Result<&'a dyn FileIo> {
        let io = self.readable(file)?;
        if self.read_only {
            return Err(SombraError::ReadOnly("id generator opened read-only"));
        }
        Ok(io)
    }
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdGenerator")
            .field("path", &self.path)
            .field("id_type", &self.id_type)
            .field("grab_size", &self.grab_size)
            .field("max_id", &self.max_id)
            .field("reserved_id", &self.reserved_id)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl Drop for IdGenerator {
    fn drop(&mut self) {
        if !self.read_only && self.state.get_mut().file.is_some() {
            debug!(
                path = %self.path.display(),
                "id generator dropped without close; sticky marker left set"
            );
        }
    }
}
