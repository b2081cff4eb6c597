//! The master bundle index.
//!
//! `Bundles2/_.index.bin` is itself a bundle; its decompressed payload
//! holds three tables followed by one more embedded bundle:
//!
//! 1. bundle table — `{name_len: u32, name: ASCII, uncompressed_size: u32}`
//! 2. file table — `{path_hash: u64, bundle_index: u32, offset: u32, size: u32}`
//! 3. path-rep table — `{hash: u64, offset: u32, size: u32, recursive_size: u32}`
//! 4. the path-program bundle, whose decompressed bytes are the shared
//!    region every path-rep's `(offset, size)` range points into
//!
//! Which hash keys the file table is not stored anywhere. The root
//! path-rep gives it away: the legacy FNV variant keys it with a
//! well-known constant, and the seeded MurmurHash64A variant keys it with
//! `murmur_hash_64a("", seed)` — so the seed falls out of the inverse
//! finalizer and gets validated against a later path-rep's directory hash.

use std::collections::HashMap;

use thiserror::Error;

use crate::bundle::{self, BundleError};
use crate::codec::BlockCodec;
use crate::hash::{unfinalize_murmur64a, HashAlgorithm, LEGACY_ROOT_HASH};
use crate::paths::{generate_paths, PathError};
use crate::reader::{Reader, Truncated};

#[derive(Debug, Clone)]
pub struct BundleRecord {
    pub name:              String,
    pub uncompressed_size: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct FileRecord {
    pub path_hash:    u64,
    pub bundle_index: u32,
    pub offset:       u32,
    pub size:         u32,
}

/// One directory's worth of the path catalogue: a key plus the span of the
/// path program that generates its file paths.
#[derive(Debug, Clone, Copy)]
pub struct PathRep {
    pub hash:           u64,
    pub offset:         u32,
    pub size:           u32,
    pub recursive_size: u32,
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error(transparent)]
    Truncated(#[from] Truncated),
    #[error(transparent)]
    Bundle(#[from] BundleError),
    #[error(transparent)]
    Paths(#[from] PathError),
    #[error("bundle name is not valid UTF-8")]
    BadBundleName(#[from] std::string::FromUtf8Error),
    #[error("file record {file_id} references bundle {bundle_index} of {bundle_count}")]
    BadBundleRef { file_id: u32, bundle_index: u32, bundle_count: u32 },
    #[error("file record {file_id} overruns bundle \"{bundle}\"")]
    BadFileSpan { file_id: u32, bundle: String },
    #[error("path-rep {0} points outside the path program")]
    BadPathRepSpan(usize),
    #[error("could not determine the path hash algorithm")]
    UnknownHashAlgorithm,
}

pub struct BundleIndex {
    bundles:   Vec<BundleRecord>,
    files:     Vec<FileRecord>,
    path_reps: Vec<PathRep>,
    /// Decompressed path program; path-rep spans point into this.
    path_blob: Vec<u8>,
    by_hash:   HashMap<u64, u32>,
    algorithm: HashAlgorithm,
}

impl BundleIndex {
    /// Decompress and parse a raw `_.index.bin`.
    pub fn parse(codec: &dyn BlockCodec, index_bin: &[u8]) -> Result<Self, IndexError> {
        let raw = bundle::decompress(codec, index_bin)?;
        let mut r = Reader::new(&raw);

        let bundle_count = r.read_u32()?;
        let mut bundles = Vec::with_capacity(bundle_count as usize);
        for _ in 0..bundle_count {
            let name_len = r.read_u32()? as usize;
            let name = String::from_utf8(r.read_bytes(name_len)?.to_vec())?;
            let uncompressed_size = r.read_u32()?;
            bundles.push(BundleRecord { name, uncompressed_size });
        }

        let file_count = r.read_u32()?;
        let mut files = Vec::with_capacity(file_count as usize);
        let mut by_hash = HashMap::with_capacity(file_count as usize);
        for i in 0..file_count {
            let record = FileRecord {
                path_hash:    r.read_u64()?,
                bundle_index: r.read_u32()?,
                offset:       r.read_u32()?,
                size:         r.read_u32()?,
            };
            by_hash.insert(record.path_hash, i);
            files.push(record);
        }

        let path_rep_count = r.read_u32()?;
        let mut path_reps = Vec::with_capacity(path_rep_count as usize);
        for _ in 0..path_rep_count {
            path_reps.push(PathRep {
                hash:           r.read_u64()?,
                offset:         r.read_u32()?,
                size:           r.read_u32()?,
                recursive_size: r.read_u32()?,
            });
        }

        // The cursor now sits on the embedded path-program bundle.
        let path_blob = bundle::decompress(codec, r.rest())?;

        for (i, file) in files.iter().enumerate() {
            let bundle = bundles.get(file.bundle_index as usize).ok_or(
                IndexError::BadBundleRef {
                    file_id:      i as u32,
                    bundle_index: file.bundle_index,
                    bundle_count,
                },
            )?;
            if file.offset as u64 + file.size as u64 > bundle.uncompressed_size as u64 {
                return Err(IndexError::BadFileSpan {
                    file_id: i as u32,
                    bundle:  bundle.name.clone(),
                });
            }
        }
        for (i, rep) in path_reps.iter().enumerate() {
            if rep.offset as u64 + rep.size as u64 > path_blob.len() as u64 {
                return Err(IndexError::BadPathRepSpan(i));
            }
        }

        let algorithm = detect_algorithm(&path_reps, &path_blob)?;
        log::debug!(
            "bundle index: {} bundles, {} files, {} path-reps, {algorithm:?}",
            bundles.len(),
            files.len(),
            path_reps.len(),
        );

        Ok(Self { bundles, files, path_reps, path_blob, by_hash, algorithm })
    }

    pub fn bundles(&self) -> &[BundleRecord] {
        &self.bundles
    }

    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    pub fn path_reps(&self) -> &[PathRep] {
        &self.path_reps
    }

    /// The decompressed path program. Lives as long as the index.
    pub fn path_blob(&self) -> &[u8] {
        &self.path_blob
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn file_id_by_hash(&self, path_hash: u64) -> Option<u32> {
        self.by_hash.get(&path_hash).copied()
    }

    pub fn bundle_id_by_name(&self, name: &str) -> Option<u32> {
        self.bundles
            .iter()
            .position(|b| b.name == name)
            .map(|i| i as u32)
    }

    /// The bytes of one path-rep's sub-program. Spans were validated at
    /// parse time.
    pub fn path_rep_program(&self, rep: &PathRep) -> &[u8] {
        &self.path_blob[rep.offset as usize..rep.offset as usize + rep.size as usize]
    }
}

/// Fix the path-hash algorithm from the root path-rep's key.
///
/// The legacy constant selects unseeded FNV outright. Anything else is
/// treated as `murmur_hash_64a("", seed)`: the inverse finalizer yields a
/// candidate seed, which must then reproduce the stored directory key of
/// the first path-rep whose leading path has a parent directory.
fn detect_algorithm(path_reps: &[PathRep], blob: &[u8]) -> Result<HashAlgorithm, IndexError> {
    let root = path_reps.first().ok_or(IndexError::UnknownHashAlgorithm)?;
    if root.hash == LEGACY_ROOT_HASH {
        return Ok(HashAlgorithm::UnseededFnv1a);
    }

    let candidate = HashAlgorithm::SeededMurmur64a { seed: unfinalize_murmur64a(root.hash) };
    for rep in &path_reps[1..] {
        let program = &blob[rep.offset as usize..rep.offset as usize + rep.size as usize];
        let paths = generate_paths(program)?;
        let Some(first) = paths.first() else { continue };
        let Some(slash) = first.rfind('/') else { continue };

        if candidate.hash_directory(&first[..slash]) == rep.hash {
            return Ok(candidate);
        }
        return Err(IndexError::UnknownHashAlgorithm);
    }
    Err(IndexError::UnknownHashAlgorithm)
}

#[cfg(test)]
pub(crate) mod testing {
    /// Serialize index tables plus an already-framed path-program bundle
    /// into the raw (pre-compression) index payload.
    pub(crate) fn build_tables(
        bundles: &[(&str, u32)],
        files: &[(u64, u32, u32, u32)],
        path_reps: &[(u64, u32, u32, u32)],
        path_bundle: &[u8],
    ) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(bundles.len() as u32).to_le_bytes());
        for (name, size) in bundles {
            out.extend_from_slice(&(name.len() as u32).to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&size.to_le_bytes());
        }
        out.extend_from_slice(&(files.len() as u32).to_le_bytes());
        for &(hash, bundle, offset, size) in files {
            out.extend_from_slice(&hash.to_le_bytes());
            out.extend_from_slice(&bundle.to_le_bytes());
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
        }
        out.extend_from_slice(&(path_reps.len() as u32).to_le_bytes());
        for &(hash, offset, size, recursive) in path_reps {
            out.extend_from_slice(&hash.to_le_bytes());
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
            out.extend_from_slice(&recursive.to_le_bytes());
        }
        out.extend_from_slice(path_bundle);
        out
    }

    /// A path program emitting exactly `path` (empty template section).
    pub(crate) fn verbatim_program(path: &str) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&0u32.to_le_bytes());
        p.extend_from_slice(&0u32.to_le_bytes());
        p.extend_from_slice(&1u32.to_le_bytes());
        p.extend_from_slice(path.as_bytes());
        p.push(0);
        p
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::bundle::testing::build as build_bundle;
    use crate::codec::testing::StoreCodec;
    use crate::hash::murmur_hash64a;

    fn build_index(
        bundles: &[(&str, u32)],
        files: &[(u64, u32, u32, u32)],
        path_reps: &[(u64, u32, u32, u32)],
        path_blob: &[u8],
    ) -> Vec<u8> {
        let inner = build_bundle(path_blob, 64);
        let raw = build_tables(bundles, files, path_reps, &inner);
        build_bundle(&raw, 4096)
    }

    #[test]
    fn legacy_root_hash_selects_unseeded_fnv() {
        let algo = HashAlgorithm::UnseededFnv1a;
        let program = verbatim_program("a.txt");
        let reps = [(LEGACY_ROOT_HASH, 0, program.len() as u32, 0)];
        let files = [(algo.hash_file("a.txt"), 0, 0, 2)];
        let bin = build_index(&[("Data", 16)], &files, &reps, &program);

        let index = BundleIndex::parse(&StoreCodec, &bin).unwrap();
        assert_eq!(index.algorithm(), HashAlgorithm::UnseededFnv1a);
        assert_eq!(index.file_id_by_hash(algo.hash_file("a.txt")), Some(0));
        assert_eq!(index.bundle_id_by_name("Data"), Some(0));
    }

    #[test]
    fn seed_is_recovered_and_validated() {
        let seed = 0x0123_4567_89ab_cdef;
        let algo = HashAlgorithm::SeededMurmur64a { seed };

        let root_program = verbatim_program("a.txt");
        let dir_program = verbatim_program("dir/b.bin");
        let mut blob = root_program.clone();
        blob.extend_from_slice(&dir_program);

        let reps = [
            (murmur_hash64a(b"", seed), 0, root_program.len() as u32, 0),
            (algo.hash_directory("dir"), root_program.len() as u32, dir_program.len() as u32, 0),
        ];
        let files = [
            (algo.hash_file("a.txt"), 0, 0, 2),
            (algo.hash_file("dir/b.bin"), 0, 2, 2),
        ];
        let bin = build_index(&[("Data", 16)], &files, &reps, &blob);

        let index = BundleIndex::parse(&StoreCodec, &bin).unwrap();
        assert_eq!(index.algorithm(), algo);
    }

    #[test]
    fn wrong_directory_hash_is_an_unknown_algorithm() {
        let seed = 0xdead_beef_dead_beef;
        let root_program = verbatim_program("a.txt");
        let dir_program = verbatim_program("dir/b.bin");
        let mut blob = root_program.clone();
        blob.extend_from_slice(&dir_program);

        let reps = [
            (murmur_hash64a(b"", seed), 0, root_program.len() as u32, 0),
            (0x1111, root_program.len() as u32, dir_program.len() as u32, 0),
        ];
        let bin = build_index(&[("Data", 16)], &[], &reps, &blob);
        assert!(matches!(
            BundleIndex::parse(&StoreCodec, &bin),
            Err(IndexError::UnknownHashAlgorithm)
        ));
    }

    #[test]
    fn file_record_outside_its_bundle_is_rejected() {
        let program = verbatim_program("a.txt");
        let reps = [(LEGACY_ROOT_HASH, 0, program.len() as u32, 0)];
        let files = [(1u64, 0, 10, 10)]; // 20 > bundle size 16
        let bin = build_index(&[("Data", 16)], &files, &reps, &program);
        assert!(matches!(
            BundleIndex::parse(&StoreCodec, &bin),
            Err(IndexError::BadFileSpan { .. })
        ));
    }

    #[test]
    fn file_record_with_bad_bundle_index_is_rejected() {
        let program = verbatim_program("a.txt");
        let reps = [(LEGACY_ROOT_HASH, 0, program.len() as u32, 0)];
        let files = [(1u64, 3, 0, 1)];
        let bin = build_index(&[("Data", 16)], &files, &reps, &program);
        assert!(matches!(
            BundleIndex::parse(&StoreCodec, &bin),
            Err(IndexError::BadBundleRef { bundle_index: 3, .. })
        ));
    }

    #[test]
    fn path_rep_span_outside_the_blob_is_rejected() {
        let program = verbatim_program("a.txt");
        let reps = [(LEGACY_ROOT_HASH, 0, program.len() as u32 + 99, 0)];
        let bin = build_index(&[("Data", 16)], &[], &reps, &program);
        assert!(matches!(
            BundleIndex::parse(&StoreCodec, &bin),
            Err(IndexError::BadPathRepSpan(0))
        ));
    }

    #[test]
    fn empty_path_rep_table_cannot_fix_an_algorithm() {
        let bin = build_index(&[], &[], &[], &[]);
        assert!(matches!(
            BundleIndex::parse(&StoreCodec, &bin),
            Err(IndexError::UnknownHashAlgorithm)
        ));
    }
}
