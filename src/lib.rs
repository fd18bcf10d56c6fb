//! # TurConf - Shared-Memory Configuration Store
//!
//! TurConf is a key-value configuration store backed by a single fixed-size,
//! memory-mapped file. One writer process mutates the file; any number of
//! reader processes map it read-only and observe updates with no RPC, daemon,
//! or IPC beyond the shared file itself. Consistency across processes is
//! enforced with advisory whole-file locks.
//!
//! ## Quick Start
//!
//! ```ignore
//! use turconf::{Manager, Reader};
//!
//! // Writer process: creates the file on first open.
//! let manager = Manager::open("/var/run/app.conf")?;
//! manager.set("feature.rollout", b"25")?;
//!
//! // Reader process (possibly a different binary).
//! let reader = Reader::open("/var/run/app.conf")?;
//! let rollout = reader.get("feature.rollout")?;
//! ```
//!
//! ## File Layout
//!
//! The store is exactly three regions concatenated in a single file:
//!
//! ```text
//! +----------------------+  offset 0
//! | header (32 B)        |  version, total size, modified time,
//! +----------------------+  region offsets and sizes
//! | index (4 MiB)        |  flat array of 4-byte bucket slots,
//! +----------------------+  each holding a data-record offset or 0
//! | data (128 MiB)       |  16-byte allocator header, then
//! |                      |  variable-length chained records
//! +----------------------+  offset == total size
//! ```
//!
//! A lookup hashes the key to a bucket, reads the 4-byte slot, and walks the
//! singly-linked record chain starting at that offset - all directly against
//! the mapping, with no up-front deserialization. Updates are written in
//! place when the new value is exactly the old value's size; any other update
//! appends a fresh record and abandons the old bytes, which only an explicit
//! [`Manager::defrag`] reclaims.
//!
//! ## Concurrency Model
//!
//! Processes, not threads: many readers, at most one writer. Every public
//! operation acquires the advisory file lock in the appropriate mode (shared
//! for reads, exclusive for mutations) and releases it before returning.
//! Within a process, a [`Manager`] serializes its own calls; a handle may be
//! shared across threads freely.
//!
//! ## Module Overview
//!
//! - [`config`]: store geometry, format limits, and the [`Geometry`] type
//! - [`encoding`]: bounds-checked little-endian slice I/O
//! - [`record`]: the variable-length data-record codec
//! - [`store`]: on-disk structures - header block, bucket index, data block,
//!   file mapping and lock guards
//! - [`manager`]: the public [`Manager`] and [`Reader`] handles

pub mod config;
pub mod encoding;
pub mod error;
pub mod manager;
pub mod record;
pub mod store;

pub use config::Geometry;
pub use error::StoreError;
pub use manager::{Builder, HashFn, Manager, Reader, StoreStats};
pub use store::index::fnv1a_32;
