#![forbid(unsafe_code)]

//! Persistent record-id allocation.
//!
//! Every typed record store owns one [`IdGenerator`] backed by an id file
//! (see [`file`] for the layout). Freed ids are buffered by the free-id cache
//! and written to the file in grab-size runs; a missing id file is rebuilt by
//! scanning the owning store (see [`rebuild`]).

mod cache;
pub mod file;
mod generator;
pub mod rebuild;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use generator::{IdGenerator, IdGeneratorOptions};
pub use rebuild::{RebuildMode, RebuildOutcome, RebuildSpec, RecordScan};

/// Largest 32-bit unsigned value. Formats with 32-bit pointers use it as "no record".
pub const INTEGER_MINUS_ONE: u64 = 0xFFFF_FFFF;

/// Identifier space an id generator serves. One per record store.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdType {
    /// Node records.
    Node,
    /// Relationship records.
    Relationship,
    /// Property records.
    Property,
    /// Dynamic string blocks for property values.
    StringBlock,
    /// Dynamic array blocks for property values.
    ArrayBlock,
    /// Property key tokens.
    PropertyKeyToken,
    /// Dynamic name blocks for property key tokens.
    PropertyKeyTokenName,
    /// Relationship type tokens.
    RelationshipTypeToken,
    /// Dynamic name blocks for relationship type tokens.
    RelationshipTypeTokenName,
    /// Label tokens.
    LabelToken,
    /// Dynamic name blocks for label tokens.
    LabelTokenName,
    /// Relationship group records of dense nodes.
    RelationshipGroup,
    /// Schema rule records.
    Schema,
}

impl IdType {
    /// Every id type, in store creation order.
    pub const ALL: [IdType; 13] = [
        IdType::Node,
        IdType::Relationship,
        IdType::Property,
        IdType::StringBlock,
        IdType::ArrayBlock,
        IdType::PropertyKeyToken,
        IdType::PropertyKeyTokenName,
        IdType::RelationshipTypeToken,
        IdType::RelationshipTypeTokenName,
        IdType::LabelToken,
        IdType::LabelTokenName,
        IdType::RelationshipGroup,
        IdType::Schema,
    ];

    /// Stable lowercase name used in logs and config keys.
    pub const fn name(self) -> &'static str {
        match self {
            IdType::Node => "node",
            IdType::Relationship => "relationship",
            IdType::Property => "property",
            IdType::StringBlock => "string_block",
            IdType::ArrayBlock => "array_block",
            IdType::PropertyKeyToken => "property_key_token",
            IdType::PropertyKeyTokenName => "property_key_token_name",
            IdType::RelationshipTypeToken => "relationship_type_token",
            IdType::RelationshipTypeTokenName => "relationship_type_token_name",
            IdType::LabelToken => "label_token",
            IdType::LabelTokenName => "label_token_name",
            IdType::RelationshipGroup => "relationship_group",
            IdType::Schema => "schema",
        }
    }

    /// Inverse of [`IdType::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id_type| id_type.name() == name)
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
