//! High-level [`Archive`] API — the primary embedding surface.
//!
//! ```no_run
//! use poepack::archive::Archive;
//! use poepack::codec::OodleCodec;
//!
//! let codec = OodleCodec::load("libooz.so", None)?;
//! let ar = Archive::open_root("/games/poe".as_ref(), Box::new(codec))?;
//! let id = ar.lookup_file("data/passiveskills.dat64").ok_or("missing")?;
//! let bytes = ar.extract_file(id)?;
//! # let _ = bytes;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! An archive is a VFS (plain directory or GGPK pack), a block codec, and
//! the parsed bundle index. Nothing else is cached: every extraction reads
//! and decompresses the containing bundle in full, which is how the format
//! is meant to be consumed — bundles have no mid-stream entry points.

use std::path::Path;

use thiserror::Error;

use crate::bundle::{self, BundleError};
use crate::codec::BlockCodec;
use crate::ggpk::{Ggpk, GgpkError};
use crate::index::{BundleIndex, IndexError};
use crate::paths::{generate_paths, PathError};
use crate::vfs::{DirVfs, GgpkVfs, Vfs, VfsError};

/// The bundle set lives under this directory in both layouts.
pub const BUNDLE_ROOT: &str = "Bundles2";
/// The master index file within [`BUNDLE_ROOT`].
pub const INDEX_NAME: &str = "_.index.bin";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error(transparent)]
    Vfs(#[from] VfsError),
    #[error(transparent)]
    Ggpk(#[from] GgpkError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Bundle(#[from] BundleError),
    #[error(transparent)]
    Paths(#[from] PathError),
    #[error("no file with id {0}")]
    BadFileId(u32),
    #[error("no bundle with id {0}")]
    BadBundleId(u32),
}

pub struct Archive {
    vfs:   Box<dyn Vfs>,
    codec: Box<dyn BlockCodec>,
    index: BundleIndex,
}

impl Archive {
    /// Open against an explicit VFS. Reads and parses the master index;
    /// everything derived from it lives as long as the archive.
    pub fn open(vfs: Box<dyn Vfs>, codec: Box<dyn BlockCodec>) -> Result<Self, ArchiveError> {
        let index_bin = vfs.read_all(&bundle_path(INDEX_NAME))?;
        let index = BundleIndex::parse(codec.as_ref(), &index_bin)?;
        Ok(Self { vfs, codec, index })
    }

    /// Open from an install root: a `*.ggpk` pack file, or a directory
    /// containing `Bundles2`.
    pub fn open_root(root: &Path, codec: Box<dyn BlockCodec>) -> Result<Self, ArchiveError> {
        if root.is_file() {
            Self::open(Box::new(GgpkVfs::new(Ggpk::open(root)?)), codec)
        } else {
            Self::open(Box::new(DirVfs::new(root)), codec)
        }
    }

    pub fn index(&self) -> &BundleIndex {
        &self.index
    }

    /// Resolve a logical path to its file id. Case-insensitive: the path
    /// is lowercased on its way into the active hash.
    pub fn lookup_file(&self, path: &str) -> Option<u32> {
        self.index
            .file_id_by_hash(self.index.algorithm().hash_file(path))
    }

    /// Materialize one stored file: read its bundle through the VFS,
    /// decompress the whole thing, slice out the file's range.
    pub fn extract_file(&self, file_id: u32) -> Result<Vec<u8>, ArchiveError> {
        let record = *self
            .index
            .files()
            .get(file_id as usize)
            .ok_or(ArchiveError::BadFileId(file_id))?;
        let data = self.extract_bundle(record.bundle_index)?;
        let start = record.offset as usize;
        Ok(data[start..start + record.size as usize].to_vec())
    }

    /// Read and decompress a whole bundle.
    pub fn extract_bundle(&self, bundle_id: u32) -> Result<Vec<u8>, ArchiveError> {
        let record = self
            .index
            .bundles()
            .get(bundle_id as usize)
            .ok_or(ArchiveError::BadBundleId(bundle_id))?;
        let src = self
            .vfs
            .read_all(&bundle_path(&format!("{}.bundle.bin", record.name)))?;
        Ok(bundle::decompress(self.codec.as_ref(), &src)?)
    }

    /// Every logical path in the archive, in path-rep order.
    pub fn list_paths(&self) -> Result<Vec<String>, ArchiveError> {
        let mut out = Vec::new();
        for rep in self.index.path_reps() {
            out.extend(generate_paths(self.index.path_rep_program(rep))?);
        }
        Ok(out)
    }
}

fn bundle_path(name: &str) -> String {
    format!("{BUNDLE_ROOT}/{name}")
}
