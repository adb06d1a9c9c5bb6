//! Store configuration, loadable from TOML.
//!
//! ```toml
//! rebuild_mode = "fast"
//! aggressive_reuse = false
//! validate_id_files = true
//! default_grab_size = 1024
//!
//! [grab_sizes]
//! node = 50
//! string_block = 200
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::idgen::{IdGeneratorOptions, IdType, RebuildMode};
use crate::store::kind::{RecordFormat, DEFAULT_GRAB_SIZE};

/// Options applied when creating or opening record stores.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    /// Scanner used when an id file has to be rebuilt.
    pub rebuild_mode: RebuildMode,
    /// Offer ids freed in this session before older free ids.
    pub aggressive_reuse: bool,
    /// Open every store without taking ownership of its id file.
    pub read_only: bool,
    /// Structurally check id files on open and rebuild the ones that fail.
    pub validate_id_files: bool,
    /// Per-store grab size overrides.
    pub grab_sizes: HashMap<IdType, u32>,
    /// Grab size for stores without an override.
    pub default_grab_size: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            rebuild_mode: RebuildMode::default(),
            aggressive_reuse: false,
            read_only: false,
            validate_id_files: false,
            grab_sizes: HashMap::new(),
            default_grab_size: DEFAULT_GRAB_SIZE,
        }
    }
}

impl StoreConfig {
    /// Sets the rebuild scanner.
    pub fn rebuild_mode(mut self, mode: RebuildMode) -> Self {
        self.rebuild_mode = mode;
        self
    }

    /// Enables or disables same-session reuse of freed ids.
    pub fn aggressive_reuse(mut self, enabled: bool) -> Self {
        self.aggressive_reuse = enabled;
        self
    }

    /// Enables or disables read-only opening.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Enables or disables id file validation on open.
    pub fn validate_id_files(mut self, enabled: bool) -> Self {
        self.validate_id_files = enabled;
        self
    }

    /// Overrides the grab size of one store.
    pub fn grab_size(mut self, id_type: IdType, grab_size: u32) -> Self {
        self.grab_sizes.insert(id_type, grab_size);
        self
    }

    /// Sets the grab size used by stores without an override.
    pub fn default_grab_size(mut self, grab_size: u32) -> Self {
        self.default_grab_size = grab_size;
        self
    }

    /// Effective grab size for `id_type`.
    pub fn grab_size_for(&self, id_type: IdType) -> u32 {
        self.grab_sizes
            .get(&id_type)
            .copied()
            .unwrap_or(self.default_grab_size)
    }

    /// Generator options for a store of the given format.
    pub fn generator_options(&self, format: &RecordFormat) -> IdGeneratorOptions {
        IdGeneratorOptions::new(
            format.id_type,
            self.grab_size_for(format.id_type),
            format.max_id(),
        )
        .reserved_id(format.reserved_id())
        .read_only(self.read_only)
        .aggressive_reuse(self.aggressive_reuse)
    }

    /// Rejects values no store can be opened with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_grab_size == 0 {
            return Err(ConfigError::InvalidGrabSize {
                scope: "default".to_string(),
            });
        }
        if let Some((id_type, _)) = self.grab_sizes.iter().find(|&(_, &size)| size == 0) {
            return Err(ConfigError::InvalidGrabSize {
                scope: id_type.name().to_string(),
            });
        }
        Ok(())
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawStoreConfig =
            toml::from_str(contents).map_err(|source| ConfigError::Parse { source })?;
        let config = convert(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }
}

fn convert(raw: RawStoreConfig) -> Result<StoreConfig, ConfigError> {
    let defaults = StoreConfig::default();
    let mut grab_sizes = HashMap::with_capacity(raw.grab_sizes.len());
    for (name, size) in raw.grab_sizes {
        let id_type =
            IdType::from_name(&name).ok_or(ConfigError::UnknownStore { name: name.clone() })?;
        grab_sizes.insert(id_type, size);
    }
    Ok(StoreConfig {
        rebuild_mode: raw.rebuild_mode.unwrap_or(defaults.rebuild_mode),
        aggressive_reuse: raw.aggressive_reuse.unwrap_or(defaults.aggressive_reuse),
        read_only: raw.read_only.unwrap_or(defaults.read_only),
        validate_id_files: raw.validate_id_files.unwrap_or(defaults.validate_id_files),
        grab_sizes,
        default_grab_size: raw.default_grab_size.unwrap_or(defaults.default_grab_size),
    })
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawStoreConfig {
    rebuild_mode: Option<RebuildMode>,
    aggressive_reuse: Option<bool>,
    read_only: Option<bool>,
    validate_id_files: Option<bool>,
    default_grab_size: Option<u32>,
    #[serde(default)]
    grab_sizes: HashMap<String, u32>,
}

/// Failures while loading a [`StoreConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read store config {path}: {source}")]
    Read {
        /// Offending file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The contents are not valid TOML for this schema.
    #[error("failed to parse store config: {source}")]
    Parse {
        /// Underlying error.
        source: toml::de::Error,
    },
    /// A `grab_sizes` key names no store.
    #[error("unknown store '{name}' in grab_sizes")]
    UnknownStore {
        /// The unrecognized key.
        name: String,
    },
    /// A grab size of zero.
    #[error("grab size for {scope} must be positive")]
    InvalidGrabSize {
        /// `default` or the store name.
        scope: String,
    },
}
