//! Low-level primitives shared by the page layer and the backends.
//!
//! Includes byte encoding utilities, positioned file I/O and the
//! single-writer coordinator.

/// Byte-level encoding and decoding.
///
/// Big-endian writer and bounds-checked cursor used by every page codec.
pub mod bytes;

/// Concurrency primitives and synchronization.
///
/// Writer slot and reader accounting for one resource, plus the file lock
/// that extends writer exclusion across processes.
pub mod concurrency;

/// I/O abstractions and utilities.
///
/// Positioned reads and writes used by the file backend.
pub mod io;
