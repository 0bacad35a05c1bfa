//! Shared helpers for unit tests

use crate::bsdiff;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use std::io::Write;

pub fn pack_off(v: i64) -> [u8; 8] {
    if v < 0 {
        (((-v) as u64) | (1 << 63)).to_le_bytes()
    } else {
        (v as u64).to_le_bytes()
    }
}

pub fn bz(data: &[u8]) -> Vec<u8> {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Build a valid single-control-entry bsdiff patch transforming `old`
/// into `new`: add over the common prefix, copy the tail from the extra
/// block.
pub fn make_bsdiff_patch(old: &[u8], new: &[u8]) -> Vec<u8> {
    let add_len = old.len().min(new.len());
    let mut ctrl = Vec::new();
    ctrl.extend_from_slice(&pack_off(add_len as i64));
    ctrl.extend_from_slice(&pack_off((new.len() - add_len) as i64));
    ctrl.extend_from_slice(&pack_off(0));

    let diff: Vec<u8> = new[..add_len]
        .iter()
        .zip(&old[..add_len])
        .map(|(n, o)| n.wrapping_sub(*o))
        .collect();
    let extra = &new[add_len..];

    let (ctrl, diff, extra) = (bz(&ctrl), bz(&diff), bz(extra));
    let mut patch = Vec::new();
    patch.extend_from_slice(bsdiff::MAGIC);
    patch.extend_from_slice(&pack_off(ctrl.len() as i64));
    patch.extend_from_slice(&pack_off(diff.len() as i64));
    patch.extend_from_slice(&pack_off(new.len() as i64));
    patch.extend_from_slice(&ctrl);
    patch.extend_from_slice(&diff);
    patch.extend_from_slice(&extra);
    patch
}
