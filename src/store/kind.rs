//! Static format description of each record store.

use crate::idgen::{IdType, RebuildSpec, INTEGER_MINUS_ONE};

/// Grab size used when the configuration does not name one.
pub const DEFAULT_GRAB_SIZE: u32 = 1024;

/// Suffix appended to a store file name to get its id file name.
pub const ID_FILE_SUFFIX: &str = ".id";

/// Offset of the in-use flag inside a record.
pub const IN_USE_BYTE: usize = 0;
/// Bit of [`IN_USE_BYTE`] that marks a live record.
pub const IN_USE_BIT: u8 = 0x1;

/// Layout constraints of one record store.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RecordFormat {
    /// Store this format belongs to.
    pub id_type: IdType,
    /// Bytes per record slot, in-use flag included.
    pub record_size: usize,
    /// Width of the pointers that address records of this store.
    pub id_bits: u32,
    /// Leading slots owned by the format itself.
    pub reserved_low_ids: u64,
}

impl RecordFormat {
    /// Format of the store serving `id_type`.
    pub const fn of(id_type: IdType) -> Self {
        let (record_size, id_bits, reserved_low_ids) = match id_type {
            IdType::Node => (15, 35, 0),
            IdType::Relationship => (34, 35, 0),
            IdType::Property => (41, 36, 0),
            IdType::StringBlock | IdType::ArrayBlock => (128, 36, 1),
            IdType::PropertyKeyToken => (9, 24, 0),
            IdType::RelationshipTypeToken => (5, 16, 0),
            IdType::LabelToken => (9, 32, 0),
            IdType::PropertyKeyTokenName
            | IdType::RelationshipTypeTokenName
            | IdType::LabelTokenName => (38, 32, 1),
            IdType::RelationshipGroup => (25, 35, 0),
            IdType::Schema => (64, 32, 0),
        };
        Self {
            id_type,
            record_size,
            id_bits,
            reserved_low_ids,
        }
    }

    /// Largest addressable id.
    pub const fn max_id(&self) -> u64 {
        (1u64 << self.id_bits) - 1
    }

    /// The 32-bit "no record" value, for formats wide enough to address it.
    pub const fn reserved_id(&self) -> Option<u64> {
        if self.max_id() >= INTEGER_MINUS_ONE {
            Some(INTEGER_MINUS_ONE)
        } else {
            None
        }
    }

    /// True for dynamic block stores, whose slot 0 holds the block size.
    pub const fn is_dynamic(&self) -> bool {
        self.reserved_low_ids > 0
    }

    /// Payload bytes available per record.
    pub const fn payload_len(&self) -> usize {
        self.record_size - 1
    }

    /// Name of the store file.
    pub fn store_file_name(&self) -> String {
        format!("{}.db", self.id_type.name())
    }

    /// Name of the id file next to the store file.
    pub fn id_file_name(&self) -> String {
        format!("{}{ID_FILE_SUFFIX}", self.store_file_name())
    }

    /// Constraints handed to the rebuild scanner.
    pub const fn rebuild_spec(&self) -> RebuildSpec {
        RebuildSpec {
            max_id: self.max_id(),
            reserved_low_ids: self.reserved_low_ids,
            reserved_id: self.reserved_id(),
        }
    }

    /// Whether the raw bytes of one slot describe a live record.
    pub fn record_in_use(record: &[u8]) -> bool {
        record
            .get(IN_USE_BYTE)
            .is_some_and(|flags| flags & IN_USE_BIT != 0)
    }

    /// Contents of the reserved header slot of a dynamic store.
    pub fn header_record(&self) -> Vec<u8> {
        let mut record = vec![0u8; self.record_size];
        record[IN_USE_BYTE] = IN_USE_BIT;
        record[1..5].copy_from_slice(&(self.record_size as u32).to_be_bytes());
        record
    }
}
