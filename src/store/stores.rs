use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use super::record::RecordStore;
use crate::config::StoreConfig;
use crate::idgen::IdType;
use crate::primitives::io::FileSystem;
use crate::types::{Result, SombraError};

/// Every record store of one database directory.
#[derive(Debug)]
pub struct RecordStores {
    dir: PathBuf,
    stores: BTreeMap<IdType, RecordStore>,
}

impl RecordStores {
    /// Creates every store kind in `dir`.
    pub fn create(
        fs: Arc<dyn FileSystem>,
        dir: impl AsRef<Path>,
        config: &StoreConfig,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        fs.create_dir_all(dir)?;
        let mut stores = BTreeMap::new();
        for id_type in IdType::ALL {
            match RecordStore::create(Arc::clone(&fs), dir, id_type, config) {
                Ok(store) => {
                    stores.insert(id_type, store);
                }
                Err(err) => {
                    close_all(&stores);
                    return Err(err);
                }
            }
        }
        info!(dir = %dir.display(), stores = stores.len(), "created record stores");
        Ok(Self {
            dir: dir.to_path_buf(),
            stores,
        })
    }

    /// Opens every store kind in `dir`.
    pub fn open(
        fs: Arc<dyn FileSystem>,
        dir: impl AsRef<Path>,
        config: &StoreConfig,
    ) -> Result<Self> {
        Self::open_kinds(fs, dir, config, &IdType::ALL)
    }

    /// Opens only `kinds`. Stores opened before a failure are closed again.
    pub fn open_kinds(
        fs: Arc<dyn FileSystem>,
        dir: impl AsRef<Path>,
        config: &StoreConfig,
        kinds: &[IdType],
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let mut stores = BTreeMap::new();
        for &id_type in kinds {
            if stores.contains_key(&id_type) {
                continue;
            }
            match RecordStore::open(Arc::clone(&fs), dir, id_type, config) {
                Ok(store) => {
                    stores.insert(id_type, store);
                }
                Err(err) => {
                    close_all(&stores);
                    return Err(err);
                }
            }
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            stores,
        })
    }

    /// The store of `id_type`.
    pub fn store(&self, id_type: IdType) -> Result<&RecordStore> {
        self.stores
            .get(&id_type)
            .ok_or(SombraError::InvalidState("store kind was not opened"))
    }

    /// Opened store kinds, in creation order.
    pub fn kinds(&self) -> impl Iterator<Item = IdType> + '_ {
        self.stores.keys().copied()
    }

    /// Directory holding the store files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Closes every store and reports the first failure.
    pub fn close(&self) -> Result<()> {
        let mut first = None;
        for (id_type, store) in &self.stores {
            if let Err(err) = store.close() {
                warn!(store = %id_type, error = %err, "failed to close record store");
                first.get_or_insert(err);
            }
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn close_all(stores: &BTreeMap<IdType, RecordStore>) {
    for (id_type, store) in stores {
        if let Err(err) = store.close() {
            warn!(store = %id_type, error = %err, "failed to close record store after open error");
        }
    }
}
