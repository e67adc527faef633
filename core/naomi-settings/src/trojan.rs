//! The 28-byte `TrojanConfig` block embedded in a compiled trojan, and the
//! placeholder patching built on top of it.

use crate::error::SettingsError;
use naomi_common::{find_run_bounds, read_u32_le};

const SENTINEL_LEN: usize = 4;
const FIELD_LEN: usize = 4;
const CONFIG_LEN: usize = SENTINEL_LEN + 5 * FIELD_LEN + SENTINEL_LEN;
const SENTINEL_BYTE: u8 = 0xEE;

const SENTINEL_CFCFCFCF: u32 = 0xCFCF_CFCF;
const SENTINEL_DDDDDDDD: u32 = 0xDDDD_DDDD;

pub const PLACEHOLDER_ENTRYPOINT: u8 = 0xAA;
pub const PLACEHOLDER_PAYLOAD: u8 = 0xBB;
pub const PLACEHOLDER_OPTIONS: u8 = 0xCF;
pub const PLACEHOLDER_DEBUG: u8 = 0xDD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrojanDate {
    pub year: u32,
    pub month: u32,
    pub day: u32,
}

impl TrojanDate {
    fn decode(date: u32) -> Self {
        Self { day: date % 100, month: (date / 100) % 100, year: date / 10_000 }
    }
}

/// The decoded 28-byte configuration block. `sentinel_flag`/`debug_flag`
/// carry 0xCFCFCFCF/0xDDDDDDDD only in a never-patched trojan; `write_settings`
/// always overwrites them with a literal 0 or 1, so a fully-attached ROM
/// never exposes the wildcard markers through [`crate::SettingsPatcher::read_info`].
#[derive(Debug, Clone, Copy)]
pub struct TrojanConfig {
    pub original_entrypoint: u32,
    pub trojan_load_address: u32,
    pub sentinel_flag: u32,
    pub debug_flag: u32,
    pub date: u32,
}

impl TrojanConfig {
    #[must_use]
    pub fn date(&self) -> TrojanDate {
        TrojanDate::decode(self.date)
    }
}

fn flag_is_valid(flag: u32, wildcard: u32) -> bool {
    matches!(flag, 0 | 1) || flag == wildcard
}

/// Scans `window` for the `0xEE x4 / ... / 0xEE x4` bracketed config block,
/// rejecting matches whose flag words fall outside their allowed trio and
/// continuing the scan past them, per spec.md §4.1.
pub fn read_trojan_config(window: &[u8]) -> Result<(usize, TrojanConfig), SettingsError> {
    if window.len() < CONFIG_LEN {
        return Err(SettingsError::MissingConfig);
    }

    for start in 0..=(window.len() - CONFIG_LEN) {
        let head = &window[start..start + SENTINEL_LEN];
        let tail_start = start + CONFIG_LEN - SENTINEL_LEN;
        let tail = &window[tail_start..tail_start + SENTINEL_LEN];
        if !head.iter().all(|&b| b == SENTINEL_BYTE) || !tail.iter().all(|&b| b == SENTINEL_BYTE) {
            continue;
        }

        let fields_start = start + SENTINEL_LEN;
        let original_entrypoint = read_u32_le(window, fields_start);
        let trojan_load_address = read_u32_le(window, fields_start + FIELD_LEN);
        let sentinel_flag = read_u32_le(window, fields_start + 2 * FIELD_LEN);
        let debug_flag = read_u32_le(window, fields_start + 3 * FIELD_LEN);
        let date = read_u32_le(window, fields_start + 4 * FIELD_LEN);

        if !flag_is_valid(sentinel_flag, SENTINEL_CFCFCFCF) || !flag_is_valid(debug_flag, SENTINEL_DDDDDDDD) {
            continue;
        }

        return Ok((
            start,
            TrojanConfig { original_entrypoint, trojan_load_address, sentinel_flag, debug_flag, date },
        ));
    }

    Err(SettingsError::MissingConfig)
}

/// Overwrites the single occurrence of `sentinel` bytes in `exe` with
/// `replacement`, failing if the placeholder is absent or its run length
/// doesn't match the replacement's length exactly.
pub fn patch_placeholder(exe: &mut [u8], sentinel: u8, replacement: &[u8]) -> Result<usize, SettingsError> {
    let (offset, found_len) =
        find_run_bounds(exe, sentinel).ok_or(SettingsError::PlaceholderMissing { sentinel })?;
    if found_len != replacement.len() {
        return Err(SettingsError::PlaceholderSizeMismatch {
            sentinel,
            found: found_len,
            expected: replacement.len(),
        });
    }
    exe[offset..offset + replacement.len()].copy_from_slice(replacement);
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_block(original_entrypoint: u32, load_address: u32, sentinel: u32, debug: u32, date: u32) -> Vec<u8> {
        let mut out = vec![0xEEu8; 4];
        out.extend_from_slice(&original_entrypoint.to_le_bytes());
        out.extend_from_slice(&load_address.to_le_bytes());
        out.extend_from_slice(&sentinel.to_le_bytes());
        out.extend_from_slice(&debug.to_le_bytes());
        out.extend_from_slice(&date.to_le_bytes());
        out.extend_from_slice(&[0xEE; 4]);
        out
    }

    #[test]
    fn parses_well_formed_block() {
        let block = config_block(0x0C010000, 0x0C020000, 1, 0, 20_230_615);
        let (offset, cfg) = read_trojan_config(&block).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(cfg.trojan_load_address, 0x0C020000);
        assert_eq!(cfg.date(), TrojanDate { year: 2023, month: 6, day: 15 });
    }

    #[test]
    fn wildcard_flags_still_parse() {
        let block = config_block(0xAAAA_AAAA, 0x0C020000, SENTINEL_CFCFCFCF, SENTINEL_DDDDDDDD, 20_230_101);
        let (_, cfg) = read_trojan_config(&block).unwrap();
        assert_eq!(cfg.sentinel_flag, SENTINEL_CFCFCFCF);
    }

    #[test]
    fn rejects_invalid_flag_then_fails() {
        let block = config_block(0, 0, 2, 0, 20_230_101);
        assert!(matches!(read_trojan_config(&block), Err(SettingsError::MissingConfig)));
    }

    #[test]
    fn skips_invalid_match_and_finds_next() {
        let mut data = config_block(0, 0, 2, 0, 20_230_101);
        data.extend(config_block(0x1111_1111, 0x2222_2222, 0, 0, 20_230_202));
        let (offset, cfg) = read_trojan_config(&data).unwrap();
        assert_eq!(offset, CONFIG_LEN);
        assert_eq!(cfg.trojan_load_address, 0x2222_2222);
    }

    #[test]
    fn patch_placeholder_rejects_size_mismatch() {
        let mut exe = vec![0xAA, 0xAA, 0xAA, 0x00];
        let err = patch_placeholder(&mut exe, 0xAA, &[1, 2, 3, 4]).unwrap_err();
        assert!(matches!(err, SettingsError::PlaceholderSizeMismatch { .. }));
    }

    #[test]
    fn patch_placeholder_missing() {
        let mut exe = vec![0x00, 0x00];
        let err = patch_placeholder(&mut exe, 0xAA, &[1]).unwrap_err();
        assert!(matches!(err, SettingsError::PlaceholderMissing { .. }));
    }
}
