#![forbid(unsafe_code)]

//! Fixed-size record stores bound to their id generators.
//!
//! A store file is a sequence of `record_size`-byte slots addressed by id. Its
//! generator lives in `<store file>.id` next to it; when that file is missing
//! the store is scanned to rebuild it before the generator opens.

pub mod kind;
mod record;
mod stores;

pub use kind::RecordFormat;
pub use record::RecordStore;
pub use stores::RecordStores;
