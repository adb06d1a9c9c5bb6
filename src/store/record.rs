use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::kind::{RecordFormat, IN_USE_BIT, IN_USE_BYTE};
use crate::config::StoreConfig;
use crate::idgen::file::IdFileImage;
use crate::idgen::{rebuild, IdGenerator, IdType, RecordScan};
use crate::primitives::concurrency::WriteSequence;
use crate::primitives::io::{FileIo, FileSystem};
use crate::types::{Result, SombraError};

/// A file of fixed-size record slots plus the id generator that allocates them.
///
/// The first byte of each slot carries the in-use flag; the remaining bytes are
/// payload this store does not interpret.
pub struct RecordStore {
    format: RecordFormat,
    store_path: PathBuf,
    file: Arc<dyn FileIo>,
    ids: IdGenerator,
    writes: WriteSequence,
    read_only: bool,
}

impl RecordStore {
    /// Creates an empty store and its id file in `dir`, then opens it.
    pub fn create(
        fs: Arc<dyn FileSystem>,
        dir: impl AsRef<Path>,
        id_type: IdType,
        config: &StoreConfig,
    ) -> Result<Self> {
        if config.read_only {
            return Err(SombraError::ReadOnly("cannot create a store read-only"));
        }
        let dir = dir.as_ref();
        let format = RecordFormat::of(id_type);
        let store_path = dir.join(format.store_file_name());
        let file = fs.create_new(&store_path)?;
        if format.is_dynamic() {
            file.write_at(0, &format.header_record())?;
        }
        file.sync_all()?;
        IdGenerator::create(
            &*fs,
            dir.join(format.id_file_name()),
            format.reserved_low_ids,
            true,
        )?;
        info!(store = %id_type, path = %store_path.display(), "created record store");
        Self::open(fs, dir, id_type, config)
    }

    /// Opens the store of `id_type` in `dir`, rebuilding its id file when missing.
    pub fn open(
        fs: Arc<dyn FileSystem>,
        dir: impl AsRef<Path>,
        id_type: IdType,
        config: &StoreConfig,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let format = RecordFormat::of(id_type);
        let store_path = dir.join(format.store_file_name());
        if !fs.exists(&store_path) {
            return Err(SombraError::NotFound("store file"));
        }
        let file = if config.read_only {
            fs.open_read(&store_path)?
        } else {
            fs.open_rw(&store_path)?
        };
        let id_path = dir.join(format.id_file_name());

        if !config.read_only && Self::needs_rebuild(&*fs, &id_path, config)? {
            let scanner = StoreScanner {
                file: &*file,
                format,
            };
            rebuild::rebuild_id_file(
                &*fs,
                &id_path,
                &scanner,
                &format.rebuild_spec(),
                config.rebuild_mode,
            )
            .inspect_err(|err| warn!(store = %id_type, error = %err, "id file rebuild failed"))?;
        }

        let ids = IdGenerator::open(Arc::clone(&fs), &id_path, config.generator_options(&format))
            .inspect_err(|err| {
                if err.is_storage_failure() {
                    warn!(store = %id_type, error = %err, "failed to open id generator");
                }
            })?;
        debug!(store = %id_type, high_id = ids.high_id()?, "opened record store");
        Ok(Self {
            format,
            store_path,
            file,
            ids,
            writes: WriteSequence::new(),
            read_only: config.read_only,
        })
    }

    fn needs_rebuild(fs: &dyn FileSystem, id_path: &Path, config: &StoreConfig) -> Result<bool> {
        if !fs.exists(id_path) {
            info!(path = %id_path.display(), "id file missing");
            return Ok(true);
        }
        if !config.validate_id_files {
            return Ok(false);
        }
        let bytes = fs.open_read(id_path)?.read_all()?;
        match IdFileImage::decode_strict(&bytes) {
            Ok(_) => Ok(false),
            Err(err) => {
                warn!(path = %id_path.display(), error = %err, "id file failed validation");
                Ok(true)
            }
        }
    }

    /// Allocates an id for a new record.
    pub fn allocate(&self) -> Result<u64> {
        self.ids.next_id().inspect_err(|err| self.log_failure("allocate", err))
    }

    /// Writes `payload` into slot `id` and marks it in use.
    pub fn write_record(&self, id: u64, payload: &[u8]) -> Result<()> {
        self.check_writable()?;
        if payload.len() > self.format.payload_len() {
            return Err(SombraError::Invalid("payload larger than record"));
        }
        self.check_issued(id)?;
        let mut record = vec![0u8; self.format.record_size];
        record[IN_USE_BYTE] = IN_USE_BIT;
        record[1..1 + payload.len()].copy_from_slice(payload);
        let offset = self.offset(id);
        self.writes
            .write(|| self.file.write_at(offset, &record))
            .inspect_err(|err| self.log_failure("write", err))
    }

    /// Payload of slot `id`, or `None` when the slot is not in use.
    pub fn read_record(&self, id: u64) -> Result<Option<Vec<u8>>> {
        let mut record = vec![0u8; self.format.record_size];
        let present = self.writes.read(|| self.read_slot(id, &mut record))?;
        if present && RecordFormat::record_in_use(&record) {
            Ok(Some(record[1..].to_vec()))
        } else {
            Ok(None)
        }
    }

    /// Whether slot `id` holds a live record. Slots past the end of the file are not in use.
    pub fn is_in_use(&self, id: u64) -> Result<bool> {
        let mut flags = [0u8; 1];
        let present = self.writes.read(|| -> Result<bool> {
            if id >= self.slot_count()? {
                return Ok(false);
            }
            self.file
                .read_at(self.offset(id) + IN_USE_BYTE as u64, &mut flags)?;
            Ok(true)
        })?;
        Ok(present && RecordFormat::record_in_use(&flags))
    }

    /// Clears slot `id` and hands the id back to the generator.
    pub fn delete_record(&self, id: u64) -> Result<()> {
        self.check_writable()?;
        if id < self.format.reserved_low_ids {
            return Err(SombraError::Invalid("id is reserved by the record format"));
        }
        self.check_issued(id)?;
        let offset = self.offset(id);
        let cleared = self
            .writes
            .write(|| -> Result<bool> {
                if id >= self.slot_count()? {
                    return Ok(false);
                }
                let mut flags = [0u8; 1];
                self.file.read_at(offset + IN_USE_BYTE as u64, &mut flags)?;
                if !RecordFormat::record_in_use(&flags) {
                    return Ok(false);
                }
                self.file
                    .write_at(offset, &vec![0u8; self.format.record_size])?;
                Ok(true)
            })
            .inspect_err(|err| self.log_failure("delete", err))?;
        if !cleared {
            return Err(SombraError::InvalidState("record is not in use"));
        }
        self.ids
            .free_id(id)
            .inspect_err(|err| self.log_failure("free", err))
    }

    /// First id never issued by this store.
    pub fn high_id(&self) -> Result<u64> {
        self.ids.high_id()
    }

    /// Issued ids that are not free.
    pub fn number_of_ids_in_use(&self) -> Result<u64> {
        self.ids.number_of_ids_in_use()
    }

    /// Syncs the store file and closes the id generator. Closing twice does nothing.
    pub fn close(&self) -> Result<()> {
        if self.ids.is_closed() {
            return Ok(());
        }
        if !self.read_only {
            self.file.sync_all()?;
        }
        self.ids
            .close()
            .inspect_err(|err| self.log_failure("close", err))
    }

    /// Number of whole slots in the store file.
    pub fn slot_count(&self) -> Result<u64> {
        Ok(self.file.len()? / self.format.record_size as u64)
    }

    /// Format of this store.
    pub fn format(&self) -> &RecordFormat {
        &self.format
    }

    /// Identifier space of this store.
    pub fn id_type(&self) -> IdType {
        self.format.id_type
    }

    /// Path of the store file.
    pub fn path(&self) -> &Path {
        &self.store_path
    }

    /// The allocator backing this store.
    pub fn id_generator(&self) -> &IdGenerator {
        &self.ids
    }

    /// Reads retried because they overlapped a write.
    pub fn read_retries(&self) -> u64 {
        self.writes.retries()
    }

    fn offset(&self, id: u64) -> u64 {
        id * self.format.record_size as u64
    }

    /// Fills `record` from slot `id`; false when the slot lies past the end of the file.
    fn read_slot(&self, id: u64, record: &mut [u8]) -> Result<bool> {
        if id >= self.slot_count()? {
            return Ok(false);
        }
        self.file.read_at(self.offset(id), record)?;
        Ok(true)
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(SombraError::ReadOnly("record store opened read-only"));
        }
        Ok(())
    }

    fn check_issued(&self, id: u64) -> Result<()> {
        let high_id = self.ids.high_id()?;
        if id >= high_id {
            return Err(SombraError::IllegalId { id, high_id });
        }
        Ok(())
    }

    fn log_failure(&self, op: &'static str, err: &SombraError) {
        if err.is_storage_failure() {
            warn!(store = %self.format.id_type, op, error = %err, "record store failure");
        }
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("id_type", &self.format.id_type)
            .field("path", &self.store_path)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

/// Rebuild view of a store file.
struct StoreScanner<'a> {
    file: &'a dyn FileIo,
    format: RecordFormat,
}

impl RecordScan for StoreScanner<'_> {
    fn record_size(&self) -> usize {
        self.format.record_size
    }

    fn slot_count(&self) -> Result<u64> {
        Ok(self.file.len()? / self.format.record_size as u64)
    }

    fn is_in_use(&self, id: u64) -> Result<bool> {
        let mut flags = [0u8; 1];
        self.file.read_at(
            id * self.format.record_size as u64 + IN_USE_BYTE as u64,
            &mut flags,
        )?;
        Ok(RecordFormat::record_in_use(&flags))
    }

    fn read_slots(&self, first: u64, dst: &mut [u8]) -> Result<()> {
        self.file
            .read_at(first * self.format.record_size as u64, dst)
    }

    fn record_in_use(&self, record: &[u8]) -> bool {
        RecordFormat::record_in_use(record)
    }
}
