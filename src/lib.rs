//! # poepack — read-only extraction from GGPK + bundle archives
//!
//! Format facts (fixed by the game client, not negotiable here):
//! - Every multi-byte integer is little-endian; bundle-index strings are
//!   ASCII, GGPK names are UTF-16LE with counted terminators
//! - The install root is either a `*.ggpk` pack or a directory; both hold
//!   a `Bundles2` tree with `_.index.bin` and `*.bundle.bin` files
//! - The master index is itself a bundle, and carries one more bundle in
//!   its tail: the path-generation program
//! - Bundles decompress whole; single-file reads still decode the full
//!   containing bundle
//! - Block decompression is an external Oodle-style export loaded from a
//!   shared object; it overreads its input and scribbles past its output,
//!   so it only ever runs behind the guard rails in [`codec`]
//! - Path keys are FNV-1a/64 (legacy) or seeded MurmurHash64A; the seed is
//!   recovered from the root path-rep, never stored

pub mod reader;
pub mod hash;
pub mod codec;
pub mod bundle;
pub mod ggpk;
pub mod paths;
pub mod index;
pub mod vfs;
pub mod archive;

// Flat re-exports for the most common types.
pub use archive::{Archive, ArchiveError, BUNDLE_ROOT, INDEX_NAME};
pub use bundle::{BundleError, BundleHeader};
pub use codec::{BlockCodec, CodecError, OodleCodec, SAFE_SPACE};
pub use ggpk::{Ggpk, GgpkError};
pub use hash::HashAlgorithm;
pub use index::{BundleIndex, BundleRecord, FileRecord, IndexError, PathRep};
pub use paths::{generate_paths, PathError};
pub use vfs::{DirVfs, GgpkVfs, Vfs, VfsError, VfsFile};
