//! Patch application (component C7): applies an ordered list of ROM-modifying
//! patch files to a ROM blob before it is pushed to a cabinet.
//!
//! A patch file is a flat sequence of records, each `(offset: u32 LE,
//! length: u32 LE, bytes: [u8; length])`; applying a patch overwrites the ROM
//! buffer at `offset`, growing it with zero-fill first if the record's tail
//! runs past the current end.

use naomi_common::read_u32_le;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const RECORD_HEADER_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum PatchApplyError {
    #[error("failed to read patch file {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("patch file {path} is truncated at byte {offset}")]
    Truncated { path: PathBuf, offset: usize },
}

/// The C7 boundary: applies a list of patch files to a ROM buffer.
pub trait PatchApplier {
    fn apply(&self, rom: Vec<u8>, patch_files: &[PathBuf]) -> Result<Vec<u8>, PatchApplyError>;
}

/// Applies patch records read from disk, in order.
#[derive(Debug, Default)]
pub struct FilePatchApplier;

impl PatchApplier for FilePatchApplier {
    fn apply(&self, mut rom: Vec<u8>, patch_files: &[PathBuf]) -> Result<Vec<u8>, PatchApplyError> {
        for path in patch_files {
            let patch_bytes =
                fs::read(path).map_err(|source| PatchApplyError::Io { path: path.clone(), source })?;
            log::debug!("applying patch {} ({} bytes)", path.display(), patch_bytes.len());
            apply_records(&mut rom, &patch_bytes, path)?;
        }
        Ok(rom)
    }
}

fn apply_records(rom: &mut Vec<u8>, patch: &[u8], path: &Path) -> Result<(), PatchApplyError> {
    let mut cursor = 0;
    while cursor < patch.len() {
        if cursor + RECORD_HEADER_LEN > patch.len() {
            return Err(PatchApplyError::Truncated { path: path.to_path_buf(), offset: cursor });
        }
        let offset = read_u32_le(patch, cursor) as usize;
        let length = read_u32_le(patch, cursor + 4) as usize;
        let body_start = cursor + RECORD_HEADER_LEN;
        let body_end = body_start + length;
        if body_end > patch.len() {
            return Err(PatchApplyError::Truncated { path: path.to_path_buf(), offset: body_start });
        }

        if offset + length > rom.len() {
            rom.resize(offset + length, 0);
        }
        rom[offset..offset + length].copy_from_slice(&patch[body_start..body_end]);

        cursor = body_end;
    }
    Ok(())
}

/// Encodes a single patch record; used by the real format's writer and by
/// tests to build fixture patch files without hand-packing bytes.
#[must_use]
pub fn encode_record(offset: u32, bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(RECORD_HEADER_LEN + bytes.len());
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
    out
}

/// An in-memory applier for tests: records every `(rom_len_before, patch)`
/// pair it was asked to apply, then delegates to the same record format as
/// [`FilePatchApplier`] but reads patch bytes from a map instead of disk.
#[derive(Debug, Default)]
pub struct RecordingPatchApplier {
    pub patches_by_path: std::collections::HashMap<PathBuf, Vec<u8>>,
}

impl PatchApplier for RecordingPatchApplier {
    fn apply(&self, mut rom: Vec<u8>, patch_files: &[PathBuf]) -> Result<Vec<u8>, PatchApplyError> {
        for path in patch_files {
            let patch_bytes = self.patches_by_path.get(path).cloned().unwrap_or_default();
            apply_records(&mut rom, &patch_bytes, path)?;
        }
        Ok(rom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_overwrite_record() {
        let rom = vec![0u8; 8];
        let patch = encode_record(2, &[0xAA, 0xBB]);
        let mut applier = RecordingPatchApplier::default();
        applier.patches_by_path.insert(PathBuf::from("p.bin"), patch);

        let patched = applier.apply(rom, &[PathBuf::from("p.bin")]).unwrap();
        assert_eq!(patched, vec![0, 0, 0xAA, 0xBB, 0, 0, 0, 0]);
    }

    #[test]
    fn grows_rom_for_trailing_record() {
        let rom = vec![1u8; 2];
        let patch = encode_record(4, &[9, 9]);
        let mut applier = RecordingPatchApplier::default();
        applier.patches_by_path.insert(PathBuf::from("p.bin"), patch);

        let patched = applier.apply(rom, &[PathBuf::from("p.bin")]).unwrap();
        assert_eq!(patched, vec![1, 1, 0, 0, 9, 9]);
    }

    #[test]
    fn multiple_patches_apply_in_order() {
        let rom = vec![0u8; 4];
        let mut applier = RecordingPatchApplier::default();
        applier.patches_by_path.insert(PathBuf::from("a.bin"), encode_record(0, &[1, 1]));
        applier.patches_by_path.insert(PathBuf::from("b.bin"), encode_record(0, &[2, 2]));

        let patched = applier
            .apply(rom, &[PathBuf::from("a.bin"), PathBuf::from("b.bin")])
            .unwrap();
        assert_eq!(patched, vec![2, 2, 0, 0]);
    }
}
