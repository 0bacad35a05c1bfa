//! Image patch decoding
//!
//! An image patch (`IMGDIFF2`) splits a firmware image into chunks so
//! compressed regions can be patched in their expanded form. Three
//! chunk kinds: a normal chunk embeds a bsdiff patch over a source
//! window; a raw chunk carries literal target bytes; a deflate chunk
//! inflates its source window, patches the expanded data, and
//! recompresses the result before emitting it.

use crate::bsdiff;
use crate::error::DecodeError;
use crate::sink::{emit, MemorySink, Sink};
use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use sha1::Sha1;
use std::io::{Cursor, Read, Write};

pub const MAGIC: &[u8; 8] = b"IMGDIFF2";

const CHUNK_NORMAL: i32 = 0;
const CHUNK_DEFLATE: i32 = 2;
const CHUNK_RAW: i32 = 3;

/// Whether a patch blob carries the image patch magic
pub fn is_imgdiff(patch: &[u8]) -> bool {
    patch.len() >= MAGIC.len() && &patch[..MAGIC.len()] == MAGIC
}

fn read_len(cursor: &mut Cursor<&[u8]>) -> Result<usize, DecodeError> {
    let v = cursor.read_i64::<LittleEndian>()?;
    usize::try_from(v).map_err(|_| DecodeError::Corrupt("negative chunk field"))
}

fn source_window(source: &[u8], start: usize, len: usize) -> Result<&[u8], DecodeError> {
    start
        .checked_add(len)
        .and_then(|end| source.get(start..end))
        .ok_or(DecodeError::Corrupt("chunk window outside source"))
}

/// Apply an image patch to `source`, pushing output into `sink` and
/// folding every emitted byte into `hasher`.
pub fn apply(
    source: &[u8],
    patch: &[u8],
    sink: &mut dyn Sink,
    hasher: &mut Sha1,
) -> Result<(), DecodeError> {
    if !is_imgdiff(patch) {
        return Err(DecodeError::Corrupt("missing IMGDIFF2 header"));
    }

    let mut cursor = Cursor::new(patch);
    cursor.set_position(MAGIC.len() as u64);
    let num_chunks = cursor.read_i32::<LittleEndian>()?;
    if num_chunks < 0 {
        return Err(DecodeError::Corrupt("negative chunk count"));
    }

    for _ in 0..num_chunks {
        let kind = cursor.read_i32::<LittleEndian>()?;
        match kind {
            CHUNK_NORMAL => {
                let src_start = read_len(&mut cursor)?;
                let src_len = read_len(&mut cursor)?;
                let patch_offset = read_len(&mut cursor)?;

                let window = source_window(source, src_start, src_len)?;
                let embedded = patch
                    .get(patch_offset..)
                    .ok_or(DecodeError::Corrupt("chunk patch offset outside patch"))?;
                bsdiff::apply(window, embedded, sink, hasher)?;
            }

            CHUNK_RAW => {
                let data_len = cursor.read_i32::<LittleEndian>()?;
                let data_len = usize::try_from(data_len)
                    .map_err(|_| DecodeError::Corrupt("negative raw chunk length"))?;
                let start = cursor.position() as usize;
                let data = start
                    .checked_add(data_len)
                    .and_then(|end| patch.get(start..end))
                    .ok_or(DecodeError::Corrupt("raw chunk overruns patch"))?;
                emit(sink, hasher, data)?;
                cursor.set_position((start + data_len) as u64);
            }

            CHUNK_DEFLATE => {
                let src_start = read_len(&mut cursor)?;
                let src_len = read_len(&mut cursor)?;
                let patch_offset = read_len(&mut cursor)?;
                let expanded_len = read_len(&mut cursor)?;
                let target_size = read_len(&mut cursor)?;
                let level = cursor.read_i32::<LittleEndian>()?;
                // method, windowBits, memLevel, strategy: fixed by the
                // raw-deflate encoder here, only the level varies
                for _ in 0..4 {
                    cursor.read_i32::<LittleEndian>()?;
                }

                let window = source_window(source, src_start, src_len)?;
                let mut expanded = Vec::new();
                DeflateDecoder::new(window).read_to_end(&mut expanded)?;
                if expanded.len() != expanded_len {
                    return Err(DecodeError::Corrupt("expanded source length mismatch"));
                }

                let embedded = patch
                    .get(patch_offset..)
                    .ok_or(DecodeError::Corrupt("chunk patch offset outside patch"))?;
                let mut target = MemorySink::with_capacity(target_size);
                let mut scratch = Sha1::default();
                bsdiff::apply(&expanded, embedded, &mut target, &mut scratch)?;
                let target = target.into_inner();
                if target.len() != target_size {
                    return Err(DecodeError::Corrupt("expanded target length mismatch"));
                }

                let level = level.clamp(0, 9) as u32;
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(level));
                encoder.write_all(&target)?;
                emit(sink, hasher, &encoder.finish()?)?;
            }

            _ => return Err(DecodeError::Corrupt("unsupported chunk type")),
        }
    }

    Ok(())
}
