//! Persistent record-id allocation for the Sombra record stores.
//!
//! [`idgen::IdGenerator`] hands out and reclaims the ids addressing the
//! fixed-size records of one store and keeps them durable in an id file.
//! [`store::RecordStore`] binds a generator to its store file and rebuilds the
//! id file from the store when it is missing.

#![warn(missing_docs)]

pub mod config;
pub mod idgen;
pub mod logging;
pub mod primitives;
pub mod store;
pub mod types;

pub use config::{ConfigError, StoreConfig};
pub use idgen::{IdGenerator, IdGeneratorOptions, IdType, RebuildMode};
pub use store::{RecordFormat, RecordStore, RecordStores};
pub use types::{Result, SombraError};
