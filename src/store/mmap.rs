//! # Store File and Mapping
//!
//! Creation and opening of the store file, memory mapping, and the advisory
//! lock guards every public operation runs under.
//!
//! ## Mapping Model
//!
//! The writer holds a single read-write mapping (`MmapMut`, `MAP_SHARED`);
//! readers hold read-only mappings (`Mmap`) of the same file. The operating
//! system's coherence guarantees on shared mappings make the writer's stores
//! visible to readers; the advisory lock is what keeps readers from
//! observing a mutation in progress.
//!
//! ## Locking
//!
//! Whole-file advisory locks in exactly two modes: shared (many readers)
//! and exclusive (one writer). [`FileLock`] is an RAII guard - acquisition
//! may block indefinitely behind an incompatible holder, and the lock is
//! released when the guard drops, so every return path (including `?`
//! propagation) releases it. No lock survives past an API call.
//!
//! ## File Size
//!
//! The file is created sparse at its full fixed size (`set_len`) and never
//! grows; an existing file whose size disagrees with the expected total is
//! rejected before mapping rather than mapped short.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use fs2::FileExt;
use memmap2::{Mmap, MmapMut};

use crate::error::StoreError;

/// RAII advisory-lock guard. Dropping releases the lock.
#[derive(Debug)]
pub struct FileLock<'a> {
    file: &'a File,
}

impl<'a> FileLock<'a> {
    /// Acquires the shared (read) lock, blocking behind an exclusive holder.
    pub fn shared(file: &'a File) -> Result<Self> {
        file.lock_shared()
            .map_err(StoreError::Io)
            .wrap_err("failed to acquire the shared file lock")?;
        Ok(Self { file })
    }

    /// Acquires the exclusive (write) lock, blocking behind any holder.
    pub fn exclusive(file: &'a File) -> Result<Self> {
        file.lock_exclusive()
            .map_err(StoreError::Io)
            .wrap_err("failed to acquire the exclusive file lock")?;
        Ok(Self { file })
    }
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Creates the store file at its full size and maps it read-write.
///
/// Truncates any existing file at `path`; callers decide between this and
/// [`open_rw`] by checking for the file first.
pub fn create_rw(path: &Path, total_size: u32) -> Result<(File, MmapMut)> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(StoreError::Io)
        .wrap_err_with(|| format!("failed to create the store file '{}'", path.display()))?;

    file.set_len(total_size as u64)
        .map_err(StoreError::Io)
        .wrap_err_with(|| {
            format!(
                "failed to size the store file '{}' to {} bytes",
                path.display(),
                total_size
            )
        })?;

    let mmap = map_rw(&file, path)?;
    ensure!(
        mmap.len() == total_size as usize,
        "mapping of '{}' is {} bytes, expected {}",
        path.display(),
        mmap.len(),
        total_size
    );
    Ok((file, mmap))
}

/// Opens an existing store file read-write, validating its size first.
pub fn open_rw(path: &Path, expected_size: u32) -> Result<(File, MmapMut)> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(StoreError::Io)
        .wrap_err_with(|| format!("failed to open the store file '{}'", path.display()))?;

    let actual = file
        .metadata()
        .map_err(StoreError::Io)
        .wrap_err_with(|| format!("failed to stat the store file '{}'", path.display()))?
        .len();
    if actual != expected_size as u64 {
        return Err(StoreError::SizeMismatch {
            expected: expected_size as u64,
            actual,
        })
        .wrap_err_with(|| {
            format!(
                "refusing to open '{}': fix the file or delete it to discard its data",
                path.display()
            )
        });
    }

    let mmap = map_rw(&file, path)?;
    Ok((file, mmap))
}

/// Opens an existing store file and maps it read-only.
///
/// The caller validates the mapping length against the header's recorded
/// total size once the header has been read.
pub fn open_ro(path: &Path) -> Result<(File, Mmap)> {
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(StoreError::Io)
        .wrap_err_with(|| format!("failed to open the store file '{}'", path.display()))?;

    // SAFETY: Mmap::map is unsafe because the underlying file can change
    // under the mapping. That is this store's operating mode: one external
    // writer mutates the file while readers hold mappings. It is sound here
    // because:
    // 1. The mapping is read-only; this process never writes through it.
    // 2. Every read happens under the shared advisory lock, which the writer
    //    excludes, so no read observes a mutation in progress.
    // 3. The file size is fixed for its lifetime; the mapping is never
    //    truncated under us by a well-behaved writer.
    // 4. All parsing of mapped bytes is bounds-checked and validated.
    let mmap = unsafe {
        Mmap::map(&file)
            .map_err(StoreError::Io)
            .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
    };

    Ok((file, mmap))
}

fn map_rw(file: &File, path: &Path) -> Result<MmapMut> {
    // SAFETY: MmapMut::map_mut is unsafe because memory-mapped files can be
    // modified externally. This is sound because:
    // 1. The store admits a single writer; reader processes map read-only
    //    and never mutate the file.
    // 2. Every access through this mapping happens under the exclusive (or,
    //    for reads, shared) advisory lock, so no two processes mutate or
    //    observe a half-written state concurrently.
    // 3. The mapping's lifetime is tied to the owning handle, preventing
    //    use-after-unmap.
    // 4. All parsing of mapped bytes is bounds-checked and validated.
    unsafe {
        MmapMut::map_mut(file)
            .map_err(StoreError::Io)
            .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))
    }
}
