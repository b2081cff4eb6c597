//! Uniform read access to the archive's backing store.
//!
//! The bundle index and the bundles themselves are reached through a
//! capability interface of three operations — open, size, positional read
//! — with close expressed as `Drop` on the handle. Two providers exist:
//! [`DirVfs`] over a plain install directory and [`GgpkVfs`] over a parsed
//! pack. Paths handed to a VFS always use `/` separators; providers
//! translate internally.

use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::ggpk::{self, Ggpk};

#[derive(Error, Debug)]
pub enum VfsError {
    #[error("\"{0}\" not found")]
    NotFound(String),
    #[error("{path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("short read: wanted {wanted} bytes, got {got}")]
    ShortRead { wanted: usize, got: usize },
}

/// An open handle. Dropping it closes it.
pub trait VfsFile {
    fn size(&self) -> u64;
    /// Read into `buf` starting at `offset`, returning the byte count; the
    /// handle needs no mutable state, so reads never disturb each other.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, VfsError>;
}

pub trait Vfs {
    fn open(&self, path: &str) -> Result<Box<dyn VfsFile + '_>, VfsError>;

    /// Slurp a whole file.
    fn read_all(&self, path: &str) -> Result<Vec<u8>, VfsError> {
        let handle = self.open(path)?;
        let size = handle.size() as usize;
        let mut buf = vec![0u8; size];
        let got = handle.read_at(&mut buf, 0)?;
        if got != size {
            return Err(VfsError::ShortRead { wanted: size, got });
        }
        Ok(buf)
    }
}

// ── Directory provider ───────────────────────────────────────────────────────

/// Resolves paths beneath an install directory (the one holding `Bundles2`).
pub struct DirVfs {
    root: PathBuf,
}

impl DirVfs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Vfs for DirVfs {
    fn open(&self, path: &str) -> Result<Box<dyn VfsFile + '_>, VfsError> {
        let mut full = self.root.clone();
        full.extend(path.split('/').filter(|p| !p.is_empty()));

        let file = fs::File::open(&full).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => VfsError::NotFound(path.to_owned()),
            _ => VfsError::Io { path: path.to_owned(), source: e },
        })?;
        let size = file
            .metadata()
            .map_err(|e| VfsError::Io { path: path.to_owned(), source: e })?
            .len();
        Ok(Box::new(DirFile { file, size, path: path.to_owned() }))
    }
}

struct DirFile {
    file: fs::File,
    size: u64,
    path: String,
}

impl VfsFile for DirFile {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, VfsError> {
        #[cfg(unix)]
        use std::os::unix::fs::FileExt;

        #[cfg(unix)]
        let read = self.file.read_at(buf, offset);
        #[cfg(windows)]
        let read = {
            use std::os::windows::fs::FileExt;
            self.file.seek_read(buf, offset)
        };

        read.map_err(|e| VfsError::Io { path: self.path.clone(), source: e })
    }
}

// ── GGPK provider ────────────────────────────────────────────────────────────

/// Resolves paths against a parsed pack's directory tree, case-insensitively.
pub struct GgpkVfs {
    pack: Ggpk,
}

impl GgpkVfs {
    pub fn new(pack: Ggpk) -> Self {
        Self { pack }
    }

    pub fn pack(&self) -> &Ggpk {
        &self.pack
    }
}

impl Vfs for GgpkVfs {
    fn open(&self, path: &str) -> Result<Box<dyn VfsFile + '_>, VfsError> {
        let file = self
            .pack
            .find_file(path)
            .ok_or_else(|| VfsError::NotFound(path.to_owned()))?;
        Ok(Box::new(GgpkFile { pack: &self.pack, file }))
    }
}

struct GgpkFile<'a> {
    pack: &'a Ggpk,
    file: &'a ggpk::File,
}

impl VfsFile for GgpkFile<'_> {
    fn size(&self) -> u64 {
        self.file.data_size
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, VfsError> {
        let data = self.pack.file_bytes(self.file);
        if offset >= data.len() as u64 {
            return Ok(0);
        }
        let tail = &data[offset as usize..];
        let n = buf.len().min(tail.len());
        buf[..n].copy_from_slice(&tail[..n]);
        Ok(n)
    }
}
