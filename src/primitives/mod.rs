//! Low-level primitives shared by the id allocator and the record stores.
//!
//! Includes the filesystem abstraction and the read-retry sequence used to
//! tolerate torn reads.

/// Concurrency primitives and synchronization.
///
/// Write sequencing so readers can detect and retry reads that overlapped a write.
pub mod concurrency;

/// I/O abstractions and utilities.
///
/// Positioned file access plus OS-backed and in-memory filesystems.
pub mod io;
