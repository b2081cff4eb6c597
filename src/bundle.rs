//! Bundle framing — fixed header, block-size table, per-block decode.
//!
//! # On-disk layout (60-byte header, all fields little-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      4   uncompressed_size    (LE u32)
//!    4      4   total_payload_size   (LE u32)
//!    8      4   head_payload_size    (LE u32)
//!   12      4   first_file_encode    8=Kraken 9=Mermaid 13=Leviathan
//!   16      4   unk10                read, never interpreted
//!   20      8   uncompressed_size2   (LE u64, authoritative)
//!   28      8   total_payload_size2  (LE u64, authoritative)
//!   36      4   block_count          (LE u32)
//!   40      4   granularity          uncompressed bytes per block
//!   44     16   unk28[4]             read, never interpreted
//!   60    4×N   block_sizes          compressed size of each block
//!   ...        concatenated compressed blocks
//! ```
//!
//! Every block decompresses to exactly `granularity` bytes except the last,
//! which carries the remainder of `uncompressed_size2`. Decompression is
//! whole-bundle: there is no way to start mid-stream.

use crate::codec::{BlockCodec, CodecError, SAFE_SPACE};
use crate::reader::{Reader, Truncated};
use thiserror::Error;

/// `first_file_encode` values observed in the wild.
pub const ENCODE_KRAKEN: u32 = 8;
pub const ENCODE_MERMAID: u32 = 9;
pub const ENCODE_LEVIATHAN: u32 = 13;

#[derive(Error, Debug)]
pub enum BundleError {
    #[error(transparent)]
    Truncated(#[from] Truncated),
    #[error("bundle payload shorter than declared: {declared} declared, {available} available")]
    ShortPayload { declared: u64, available: usize },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("destination holds {got} bytes, bundle decompresses to {needed}")]
    ShortDestination { needed: u64, got: usize },
    #[error("bundle decoded {produced} of {expected} bytes")]
    Incomplete { produced: u64, expected: u64 },
}

/// Parsed fixed header. The `unk` fields are carried verbatim for a future
/// writer; nothing here interprets them.
#[derive(Debug, Clone)]
pub struct BundleHeader {
    pub uncompressed_size:   u32,
    pub total_payload_size:  u32,
    pub head_payload_size:   u32,
    pub first_file_encode:   u32,
    pub unk10:               u32,
    pub uncompressed_size2:  u64,
    pub total_payload_size2: u64,
    pub block_count:         u32,
    pub granularity:         u32,
    pub unk28:               [u32; 4],
}

impl BundleHeader {
    pub fn parse(r: &mut Reader) -> Result<Self, Truncated> {
        Ok(Self {
            uncompressed_size:   r.read_u32()?,
            total_payload_size:  r.read_u32()?,
            head_payload_size:   r.read_u32()?,
            first_file_encode:   r.read_u32()?,
            unk10:               r.read_u32()?,
            uncompressed_size2:  r.read_u64()?,
            total_payload_size2: r.read_u64()?,
            block_count:         r.read_u32()?,
            granularity:         r.read_u32()?,
            unk28: {
                let v = r.read_u32_vec(4)?;
                [v[0], v[1], v[2], v[3]]
            },
        })
    }
}

/// Size probe: how many bytes the bundle decompresses to, without decoding
/// anything.
pub fn decompressed_size(src: &[u8]) -> Result<u64, BundleError> {
    let mut r = Reader::new(src);
    Ok(BundleHeader::parse(&mut r)?.uncompressed_size2)
}

/// Decompress a whole bundle into a fresh buffer.
pub fn decompress(codec: &dyn BlockCodec, src: &[u8]) -> Result<Vec<u8>, BundleError> {
    let mut r = Reader::new(src);
    let header = BundleHeader::parse(&mut r)?;
    let block_sizes = r.read_u32_vec(header.block_count as usize)?;
    check_payload(&header, &r)?;

    let total = header.uncompressed_size2 as usize;
    let mut out = vec![0u8; total + SAFE_SPACE];
    decode_blocks(codec, &header, &block_sizes, r.rest(), &mut out)?;
    out.truncate(total);
    Ok(out)
}

/// Decompress into a caller-supplied buffer of at least
/// `uncompressed_size2` bytes, returning the byte count written.
///
/// Blocks whose output region reaches too close to the end of `dst` to
/// leave [`SAFE_SPACE`] of tail scratch are decoded through a private
/// buffer and copied into place.
pub fn decompress_into(
    codec: &dyn BlockCodec,
    src: &[u8],
    dst: &mut [u8],
) -> Result<u64, BundleError> {
    let mut r = Reader::new(src);
    let header = BundleHeader::parse(&mut r)?;
    if (dst.len() as u64) < header.uncompressed_size2 {
        return Err(BundleError::ShortDestination {
            needed: header.uncompressed_size2,
            got:    dst.len(),
        });
    }
    let block_sizes = r.read_u32_vec(header.block_count as usize)?;
    check_payload(&header, &r)?;
    decode_blocks(codec, &header, &block_sizes, r.rest(), dst)?;
    Ok(header.uncompressed_size2)
}

fn check_payload(header: &BundleHeader, r: &Reader) -> Result<(), BundleError> {
    if (r.remaining() as u64) < header.total_payload_size2 {
        return Err(BundleError::ShortPayload {
            declared:  header.total_payload_size2,
            available: r.remaining(),
        });
    }
    Ok(())
}

fn decode_blocks(
    codec: &dyn BlockCodec,
    header: &BundleHeader,
    block_sizes: &[u32],
    payload: &[u8],
    dst: &mut [u8],
) -> Result<(), BundleError> {
    let total = header.uncompressed_size2 as usize;
    let granularity = header.granularity as usize;

    let mut payload = Reader::new(payload);
    let mut out_cur = 0usize;
    for &block_size in block_sizes {
        let block = payload.read_bytes(block_size as usize)?;
        let want = granularity.min(total - out_cur);

        if dst.len() - out_cur >= want + SAFE_SPACE {
            codec.decompress_block(block, &mut dst[out_cur..], want)?;
        } else {
            // Last block flush against the end of dst: decode privately,
            // then copy the meaningful bytes into place.
            let mut scratch = vec![0u8; want + SAFE_SPACE];
            codec.decompress_block(block, &mut scratch, want)?;
            dst[out_cur..out_cur + want].copy_from_slice(&scratch[..want]);
        }
        out_cur += want;
    }
    if out_cur != total {
        return Err(BundleError::Incomplete {
            produced: out_cur as u64,
            expected: total as u64,
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::ENCODE_KRAKEN;

    /// Assemble a synthetic bundle around the pass-through codec: each
    /// "compressed" block is just the plain chunk.
    pub(crate) fn build(data: &[u8], granularity: u32) -> Vec<u8> {
        let blocks: Vec<&[u8]> = if data.is_empty() {
            Vec::new()
        } else {
            data.chunks(granularity as usize).collect()
        };

        let mut out = Vec::new();
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        let payload: u32 = blocks.iter().map(|b| b.len() as u32).sum();
        out.extend_from_slice(&payload.to_le_bytes());
        out.extend_from_slice(&payload.to_le_bytes()); // head_payload_size
        out.extend_from_slice(&ENCODE_KRAKEN.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // unk10
        out.extend_from_slice(&(data.len() as u64).to_le_bytes());
        out.extend_from_slice(&(payload as u64).to_le_bytes());
        out.extend_from_slice(&(blocks.len() as u32).to_le_bytes());
        out.extend_from_slice(&granularity.to_le_bytes());
        out.extend_from_slice(&[0u8; 16]); // unk28
        for b in &blocks {
            out.extend_from_slice(&(b.len() as u32).to_le_bytes());
        }
        for b in &blocks {
            out.extend_from_slice(b);
        }
        out
    }
}
