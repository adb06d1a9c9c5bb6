//! On-disk layout of an id file.
//!
//! ```text
//! [0]      sticky marker: 0 clean, anything else open or dirty
//! [1..9]   high id, u64 big-endian
//! [9..]    free ids, u64 big-endian each, appended in grab-size runs
//! ```

use std::io::ErrorKind;
use std::ops::Range;

use rustc_hash::FxHashSet;

use crate::primitives::io::FileIo;
use crate::types::{Result, SombraError};

/// Offset of the sticky marker byte.
pub const STICKY_MARKER: usize = 0;
const HIGH_ID: Range<usize> = 1..9;
/// Length of the fixed header preceding the free-id entries.
pub const HEADER_LEN: usize = 9;
/// Width of one persisted free-id entry.
pub const ID_ENTRY_LEN: usize = 8;
/// Marker value of a cleanly closed file.
pub const CLEAN_GENERATOR: u8 = 0;
/// Marker value written while a generator has the file open.
pub const STICKY_GENERATOR: u8 = 1;

/// Fixed header of an id file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IdFileHeader {
    /// True when the file was not closed cleanly or is open elsewhere.
    pub sticky: bool,
    /// First never-issued id.
    pub high_id: u64,
}

impl IdFileHeader {
    /// Header of a cleanly closed file.
    pub fn clean(high_id: u64) -> Self {
        Self {
            sticky: false,
            high_id,
        }
    }

    /// Encodes the header into its on-disk form.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[STICKY_MARKER] = if self.sticky {
            STICKY_GENERATOR
        } else {
            CLEAN_GENERATOR
        };
        buf[HIGH_ID].copy_from_slice(&self.high_id.to_be_bytes());
        buf
    }

    /// Decodes a header. Any non-zero marker byte counts as sticky.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < HEADER_LEN {
            return Err(SombraError::Corruption("id file header truncated"));
        }
        Ok(Self {
            sticky: src[STICKY_MARKER] != CLEAN_GENERATOR,
            high_id: read_u64(&src[HIGH_ID]),
        })
    }
}

/// Byte offset of free-id entry `index`.
pub fn entry_offset(index: u64) -> u64 {
    HEADER_LEN as u64 + index * ID_ENTRY_LEN as u64
}

/// Appends the big-endian encoding of `ids` to `out`.
pub fn encode_ids(ids: &[u64], out: &mut Vec<u8>) {
    out.reserve(ids.len() * ID_ENTRY_LEN);
    for id in ids {
        out.extend_from_slice(&id.to_be_bytes());
    }
}

/// Decodes every complete entry in `src`; a trailing partial entry is ignored.
pub fn decode_ids(src: &[u8]) -> Vec<u64> {
    src.chunks_exact(ID_ENTRY_LEN).map(read_u64).collect()
}

fn read_u64(src: &[u8]) -> u64 {
    let mut raw = [0u8; ID_ENTRY_LEN];
    raw.copy_from_slice(src);
    u64::from_be_bytes(raw)
}

/// Reads the header of an open id file.
pub fn read_header(io: &dyn FileIo) -> Result<IdFileHeader> {
    let mut buf = [0u8; HEADER_LEN];
    match io.read_at(0, &mut buf) {
        Ok(()) => {}
        Err(SombraError::Io(err)) if err.kind() == ErrorKind::UnexpectedEof => {
            return Err(SombraError::Corruption("id file header truncated"));
        }
        Err(err) => return Err(err),
    }
    IdFileHeader::decode(&buf)
}

/// Overwrites the header of an id file.
pub fn write_header(io: &dyn FileIo, header: &IdFileHeader) -> Result<()> {
    io.write_at(0, &header.encode())
}

/// Flips only the sticky marker byte.
pub fn write_marker(io: &dyn FileIo, sticky: bool) -> Result<()> {
    let marker = if sticky {
        STICKY_GENERATOR
    } else {
        CLEAN_GENERATOR
    };
    io.write_at(STICKY_MARKER as u64, &[marker])
}

/// Fully decoded id file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IdFileImage {
    /// Header fields.
    pub header: IdFileHeader,
    /// Free ids in file order.
    pub free_ids: Vec<u64>,
}

impl IdFileImage {
    /// A clean image with the given watermark and free ids.
    pub fn new(high_id: u64, free_ids: Vec<u64>) -> Self {
        Self {
            header: IdFileHeader::clean(high_id),
            free_ids,
        }
    }

    /// Encodes header and entries.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.free_ids.len() * ID_ENTRY_LEN);
        out.extend_from_slice(&self.header.encode());
        encode_ids(&self.free_ids, &mut out);
        out
    }

    /// Decodes a whole file without structural checks beyond the header length.
    pub fn decode(src: &[u8]) -> Result<Self> {
        let header = IdFileHeader::decode(src)?;
        Ok(Self {
            header,
            free_ids: decode_ids(&src[HEADER_LEN..]),
        })
    }

    /// Decodes a whole file and rejects anything a clean close could not have produced.
    pub fn decode_strict(src: &[u8]) -> Result<Self> {
        if src.len() < HEADER_LEN {
            return Err(SombraError::Corruption("id file header truncated"));
        }
        if (src.len() - HEADER_LEN) % ID_ENTRY_LEN != 0 {
            return Err(SombraError::Corruption("id file has a partial free-id entry"));
        }
        if src[STICKY_MARKER] != CLEAN_GENERATOR && src[STICKY_MARKER] != STICKY_GENERATOR {
            return Err(SombraError::Corruption("id file marker byte is not 0 or 1"));
        }
        let image = Self::decode(src)?;
        let mut seen = FxHashSet::default();
        for &id in &image.free_ids {
            if id >= image.header.high_id {
                return Err(SombraError::Corruption("free id at or above high id"));
            }
            if !seen.insert(id) {
                return Err(SombraError::Corruption("duplicate free id"));
            }
        }
        Ok(image)
    }

    /// Reads and decodes the full contents of `io`.
    pub fn read_from(io: &dyn FileIo) -> Result<Self> {
        Self::decode(&io.read_all()?)
    }

    /// Replaces the contents of `io` with this image and syncs.
    pub fn write_to(&self, io: &dyn FileIo) -> Result<()> {
        let bytes = self.encode();
        io.write_at(0, &bytes)?;
        io.truncate(bytes.len() as u64)?;
        io.sync_all()
    }
}
