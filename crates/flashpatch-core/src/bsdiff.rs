//! bsdiff patch decoding
//!
//! A bsdiff patch is the `BSDIFF40` magic, three sign-magnitude 64-bit
//! lengths (control block, diff block, output size), and three bzip2
//! streams: control triples, diff bytes added to the source window, and
//! extra bytes copied verbatim. Output is pushed through the sink and
//! folded into the running target digest as it is produced.

use crate::error::DecodeError;
use crate::sink::{emit, Sink};
use bzip2::read::BzDecoder;
use sha1::Sha1;
use std::io::Read;

pub const MAGIC: &[u8; 8] = b"BSDIFF40";

const HEADER_LEN: usize = 32;

/// Decoded output is produced through a bounded scratch buffer so a
/// forged output size cannot drive allocation.
const CHUNK_SIZE: usize = 64 * 1024;

/// Whether a patch blob carries the bsdiff magic
pub fn is_bsdiff(patch: &[u8]) -> bool {
    patch.len() >= MAGIC.len() && &patch[..MAGIC.len()] == MAGIC
}

/// Sign-magnitude 64-bit integer, as bsdiff encodes offsets.
/// The top bit is the sign; this is not two's complement.
fn unpack_off(buf: [u8; 8]) -> i64 {
    let v = i64::from_le_bytes(buf);
    if v & (1 << 63) == 0 {
        v
    } else {
        -(v & !(1 << 63))
    }
}

fn read_off(reader: &mut impl Read) -> Result<i64, DecodeError> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(unpack_off(buf))
}

fn header_len(buf: &[u8], corrupt: &'static str) -> Result<usize, DecodeError> {
    let v = unpack_off(buf.try_into().expect("8-byte header field"));
    usize::try_from(v).map_err(|_| DecodeError::Corrupt(corrupt))
}

/// Apply a bsdiff patch to `source`, pushing output into `sink` and
/// folding every emitted byte into `hasher`.
pub fn apply(
    source: &[u8],
    patch: &[u8],
    sink: &mut dyn Sink,
    hasher: &mut Sha1,
) -> Result<(), DecodeError> {
    if !is_bsdiff(patch) || patch.len() < HEADER_LEN {
        return Err(DecodeError::Corrupt("missing BSDIFF40 header"));
    }

    let ctrl_len = header_len(&patch[8..16], "negative control block length")?;
    let diff_len = header_len(&patch[16..24], "negative diff block length")?;
    let new_size = header_len(&patch[24..32], "negative output size")?;

    let diff_start = HEADER_LEN
        .checked_add(ctrl_len)
        .ok_or(DecodeError::Corrupt("control block length overflow"))?;
    let extra_start = diff_start
        .checked_add(diff_len)
        .ok_or(DecodeError::Corrupt("diff block length overflow"))?;
    if extra_start > patch.len() {
        return Err(DecodeError::Corrupt("block lengths exceed patch size"));
    }

    let mut ctrl = BzDecoder::new(&patch[HEADER_LEN..diff_start]);
    let mut diff = BzDecoder::new(&patch[diff_start..extra_start]);
    let mut extra = BzDecoder::new(&patch[extra_start..]);

    let mut old_pos = 0i64;
    let mut new_pos = 0usize;
    let mut chunk = vec![0u8; CHUNK_SIZE];

    while new_pos < new_size {
        let add_len = read_off(&mut ctrl)?;
        let copy_len = read_off(&mut ctrl)?;
        let seek = read_off(&mut ctrl)?;
        if add_len < 0 || copy_len < 0 {
            return Err(DecodeError::Corrupt("negative control length"));
        }
        let add_len = add_len as usize;
        let copy_len = copy_len as usize;

        if add_len > 0 {
            if new_size - new_pos < add_len {
                return Err(DecodeError::Corrupt("diff data overruns output"));
            }
            let start = usize::try_from(old_pos)
                .map_err(|_| DecodeError::Corrupt("diff window before source start"))?;
            let end = start
                .checked_add(add_len)
                .filter(|&end| end <= source.len())
                .ok_or(DecodeError::Corrupt("diff window outside source"))?;

            let mut window = &source[start..end];
            while !window.is_empty() {
                let n = window.len().min(CHUNK_SIZE);
                diff.read_exact(&mut chunk[..n])?;
                for (byte, old) in chunk[..n].iter_mut().zip(window) {
                    *byte = byte.wrapping_add(*old);
                }
                emit(sink, hasher, &chunk[..n])?;
                window = &window[n..];
            }
            new_pos += add_len;
        }
        old_pos += add_len as i64;

        if copy_len > 0 {
            if new_size - new_pos < copy_len {
                return Err(DecodeError::Corrupt("extra data overruns output"));
            }
            let mut remaining = copy_len;
            while remaining > 0 {
                let n = remaining.min(CHUNK_SIZE);
                extra.read_exact(&mut chunk[..n])?;
                emit(sink, hasher, &chunk[..n])?;
                remaining -= n;
            }
            new_pos += copy_len;
        }

        old_pos = old_pos
            .checked_add(seek)
            .ok_or(DecodeError::Corrupt("seek offset overflow"))?;
    }

    Ok(())
}
