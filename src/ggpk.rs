//! GGPK pack container.
//!
//! # On-disk layout (all fields little-endian)
//!
//! The pack is tiled edge to edge with length-prefixed records:
//!
//! ```text
//! Offset  Size  Field
//!    0      4   rec_len   total record length, length and tag included
//!    4      4   tag       "GGPK" | "FREE" | "PDIR" | "FILE"
//!    8    ...   body
//! ```
//!
//! `GGPK` body: `{version: u32, children: [u64; 2]}` — one child is the
//! root `PDIR`, the other the first `FREE` chunk (0 meaning absent).
//!
//! `PDIR` body: `{name_len: u32, child_count: u32, sha256: [u8; 32],
//! name: [u16; name_len] incl. NUL, children: child_count ×
//! {name_hash: u32, offset: u64}}`. Child name hashes are murmur2-32 of
//! the lowercased UTF-16LE name.
//!
//! `FILE` body: `{name_len: u32, sha256: [u8; 32], name as above,
//! payload to the end of the record}`.
//!
//! `FREE` bodies are opaque and skipped.
//!
//! Parsing is two passes: a linear sweep collecting every `FILE`/`PDIR`
//! record keyed by offset, then a tree build following child offsets from
//! the header's root. Stored digests are surfaced but never verified, and
//! stored name hashes are preserved as-is rather than recomputed.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use memmap2::Mmap;
use thiserror::Error;

use crate::hash::murmur2_32;
use crate::reader::{Reader, Truncated};

pub type ChunkTag = [u8; 4];

pub const GGPK_TAG: ChunkTag = *b"GGPK";
pub const FREE_TAG: ChunkTag = *b"FREE";
pub const PDIR_TAG: ChunkTag = *b"PDIR";
pub const FILE_TAG: ChunkTag = *b"FILE";

pub type Sha256Digest = [u8; 32];

/// Directory nesting bound; a pack deeper than this is cyclic or hostile.
const MAX_DEPTH: usize = 1024;

#[derive(Error, Debug)]
pub enum GgpkError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Truncated(#[from] Truncated),
    #[error("unknown chunk tag \"{tag}\" at offset {offset}")]
    UnknownTag { tag: String, offset: u64 },
    #[error("record at offset {0} is malformed: {1}")]
    Malformed(u64, &'static str),
    #[error("pack does not start with a GGPK header")]
    BadHeader,
    #[error("duplicate root {0} chunk")]
    DuplicateRoot(&'static str),
    #[error("missing root {0} chunk")]
    MissingRoot(&'static str),
    #[error("child offset {0} does not resolve to a parsed record")]
    UnresolvedChild(u64),
    #[error("directory nesting exceeds {0}")]
    TooDeep(usize),
}

/// A stored file: name, stored digest, and the payload's position within
/// the pack.
#[derive(Debug, Clone)]
pub struct File {
    pub offset:      u64,
    pub name:        String,
    pub name_hash:   u32,
    pub digest:      Sha256Digest,
    pub data_offset: u64,
    pub data_size:   u64,
}

/// A directory and its children, in stored order.
#[derive(Debug, Clone)]
pub struct Directory {
    pub offset:    u64,
    pub name:      String,
    pub name_hash: u32,
    pub digest:    Sha256Digest,
    pub entries:   Vec<Entry>,
}

#[derive(Debug, Clone)]
pub enum Entry {
    Directory(Directory),
    File(File),
}

impl Entry {
    pub fn name(&self) -> &str {
        match self {
            Entry::Directory(d) => &d.name,
            Entry::File(f) => &f.name,
        }
    }

    pub fn name_hash(&self) -> u32 {
        match self {
            Entry::Directory(d) => d.name_hash,
            Entry::File(f) => f.name_hash,
        }
    }

    pub fn digest(&self) -> &Sha256Digest {
        match self {
            Entry::Directory(d) => &d.digest,
            Entry::File(f) => &f.digest,
        }
    }

    /// Stored SHA-256 digest, hex-encoded. Surfaced, never verified.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest())
    }

    pub fn as_directory(&self) -> Option<&Directory> {
        match self {
            Entry::Directory(d) => Some(d),
            Entry::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&File> {
        match self {
            Entry::File(f) => Some(f),
            Entry::Directory(_) => None,
        }
    }
}

/// A parsed pack: the memory mapping plus the materialized directory tree.
pub struct Ggpk {
    mapping:     Mmap,
    version:     u32,
    root:        Directory,
    free_offset: Option<u64>,
}

impl Ggpk {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GgpkError> {
        let file = fs::File::open(path.as_ref())?;
        let mapping = unsafe { Mmap::map(&file)? };

        let raw = sweep(&mapping)?;
        let (version, root, free_offset) = build_tree(&mapping, &raw)?;
        log::debug!(
            "indexed GGPK version {version}: {} records, root digest {}",
            raw.len(),
            hex::encode(root.digest),
        );
        Ok(Self { mapping, version, root, free_offset })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn root(&self) -> &Directory {
        &self.root
    }

    /// Offset of the first `FREE` chunk, if the pack has one.
    pub fn free_offset(&self) -> Option<u64> {
        self.free_offset
    }

    /// Case-insensitive path resolution. Components are `/`-separated;
    /// empty components are skipped.
    pub fn find_file(&self, path: &str) -> Option<&File> {
        let mut dir = &self.root;
        let mut parts = path.split('/').filter(|p| !p.is_empty()).peekable();
        while let Some(part) = parts.next() {
            let lower = part.to_lowercase();
            let child = dir
                .entries
                .iter()
                .find(|e| e.name().to_lowercase() == lower)?;
            match (child, parts.peek()) {
                (Entry::File(f), None) => return Some(f),
                (Entry::Directory(d), Some(_)) => dir = d,
                _ => return None,
            }
        }
        None
    }

    /// The payload bytes of a stored file, served from the mapping.
    pub fn file_bytes(&self, file: &File) -> &[u8] {
        let start = file.data_offset as usize;
        &self.mapping[start..start + file.data_size as usize]
    }
}

struct RawEntry {
    name:      String,
    name_hash: u32,
    digest:    Sha256Digest,
    kind:      RawKind,
}

enum RawKind {
    Directory { child_hashes: Vec<u32>, child_offsets: Vec<u64> },
    File { data_offset: u64, data_size: u64 },
}

fn printable_tag(tag: ChunkTag) -> String {
    tag.iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
        .collect()
}

/// Hash a child name the way directories index them: murmur2-32 of the
/// lowercased UTF-16LE code units.
fn name_index_hash(name: &str) -> u32 {
    let mut bytes = Vec::with_capacity(name.len() * 2);
    for unit in name.to_lowercase().encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    murmur2_32(&bytes)
}

/// Pass 1: sweep the pack linearly, collecting `FILE` and `PDIR` records
/// keyed by their starting offset.
fn sweep(data: &[u8]) -> Result<BTreeMap<u64, RawEntry>, GgpkError> {
    let len = data.len() as u64;
    let mut entries = BTreeMap::new();
    let mut offset = 0u64;

    while offset < len {
        if len - offset < 8 {
            return Err(GgpkError::Malformed(offset, "record header past end of pack"));
        }
        let at = offset as usize;
        let rec_len = u32::from_le_bytes(data[at..at + 4].try_into().unwrap()) as u64;
        let tag: ChunkTag = data[at + 4..at + 8].try_into().unwrap();
        if rec_len < 8 {
            return Err(GgpkError::Malformed(offset, "record shorter than its own header"));
        }
        if offset + rec_len > len {
            return Err(GgpkError::Malformed(offset, "record overruns the pack"));
        }

        match tag {
            FILE_TAG | PDIR_TAG => {
                let body = &data[at + 8..at + rec_len as usize];
                entries.insert(offset, parse_raw(body, offset, tag == PDIR_TAG)?);
            }
            FREE_TAG | GGPK_TAG => {}
            _ => return Err(GgpkError::UnknownTag { tag: printable_tag(tag), offset }),
        }
        offset += rec_len;
    }
    Ok(entries)
}

fn parse_raw(body: &[u8], offset: u64, is_dir: bool) -> Result<RawEntry, GgpkError> {
    let mut r = Reader::new(body);
    let name_len = r.read_u32()? as usize;
    let child_count = if is_dir { r.read_u32()? as usize } else { 0 };
    let digest: Sha256Digest = r.read_bytes(32)?.try_into().unwrap();

    if name_len == 0 {
        return Err(GgpkError::Malformed(offset, "empty name"));
    }
    let units = r.read_u16_vec(name_len)?;
    let name = String::from_utf16(&units[..name_len - 1])
        .map_err(|_| GgpkError::Malformed(offset, "name is not valid UTF-16"))?;
    let name_hash = name_index_hash(&name);

    let kind = if is_dir {
        let mut child_hashes = Vec::with_capacity(child_count);
        let mut child_offsets = Vec::with_capacity(child_count);
        for _ in 0..child_count {
            child_hashes.push(r.read_u32()?);
            child_offsets.push(r.read_u64()?);
        }
        RawKind::Directory { child_hashes, child_offsets }
    } else {
        let consumed = (body.len() - r.remaining()) as u64;
        RawKind::File {
            data_offset: offset + 8 + consumed,
            data_size:   body.len() as u64 - consumed,
        }
    };

    Ok(RawEntry { name, name_hash, digest, kind })
}

/// Pass 2: read the header at offset 0 and materialize the tree from its
/// root `PDIR` child. Exactly one root `PDIR` and at most one `FREE` root
/// are accepted; a zero child offset stands for an absent free list.
fn build_tree(
    data: &[u8],
    entries: &BTreeMap<u64, RawEntry>,
) -> Result<(u32, Directory, Option<u64>), GgpkError> {
    let mut r = Reader::new(data);
    let _rec_len = r.read_u32()?;
    let tag: ChunkTag = r.read_bytes(4)?.try_into().unwrap();
    if tag != GGPK_TAG {
        return Err(GgpkError::BadHeader);
    }
    let version = r.read_u32()?;
    let children = [r.read_u64()?, r.read_u64()?];

    let mut free_offset: Option<u64> = None;
    let mut free_seen = false;
    let mut root: Option<Directory> = None;

    for child in children {
        if child == 0 {
            free_seen = true;
            continue;
        }
        if child + 8 > data.len() as u64 {
            return Err(GgpkError::UnresolvedChild(child));
        }
        let at = child as usize;
        let tag: ChunkTag = data[at + 4..at + 8].try_into().unwrap();
        match tag {
            FREE_TAG => {
                if free_seen {
                    return Err(GgpkError::DuplicateRoot("FREE"));
                }
                free_seen = true;
                free_offset = Some(child);
            }
            PDIR_TAG => {
                if root.is_some() {
                    return Err(GgpkError::DuplicateRoot("PDIR"));
                }
                match build_entry(entries, child, None, 0)? {
                    Entry::Directory(d) => root = Some(d),
                    Entry::File(_) => {
                        return Err(GgpkError::Malformed(child, "root chunk is a file"))
                    }
                }
            }
            _ => return Err(GgpkError::UnknownTag { tag: printable_tag(tag), offset: child }),
        }
    }

    if !free_seen {
        return Err(GgpkError::MissingRoot("FREE"));
    }
    let root = root.ok_or(GgpkError::MissingRoot("PDIR"))?;
    Ok((version, root, free_offset))
}

fn build_entry(
    entries: &BTreeMap<u64, RawEntry>,
    offset: u64,
    stored_hash: Option<u32>,
    depth: usize,
) -> Result<Entry, GgpkError> {
    if depth > MAX_DEPTH {
        return Err(GgpkError::TooDeep(MAX_DEPTH));
    }
    let raw = entries.get(&offset).ok_or(GgpkError::UnresolvedChild(offset))?;
    // Children carry the hash their parent stored for them; the root keeps
    // its own computed one.
    let name_hash = stored_hash.unwrap_or(raw.name_hash);

    match &raw.kind {
        RawKind::File { data_offset, data_size } => Ok(Entry::File(File {
            offset,
            name: raw.name.clone(),
            name_hash,
            digest: raw.digest,
            data_offset: *data_offset,
            data_size: *data_size,
        })),
        RawKind::Directory { child_hashes, child_offsets } => {
            let mut dir_entries = Vec::with_capacity(child_hashes.len());
            for (&hash, &child_offset) in child_hashes.iter().zip(child_offsets) {
                dir_entries.push(build_entry(entries, child_offset, Some(hash), depth + 1)?);
            }
            Ok(Entry::Directory(Directory {
                offset,
                name: raw.name.clone(),
                name_hash,
                digest: raw.digest,
                entries: dir_entries,
            }))
        }
    }
}
