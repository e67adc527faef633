//! Settings patching (component C4): reads and writes the SRAM/EEPROM
//! settings payload attached to a NAOMI ROM image, relocating and patching
//! the embedded "trojan" executable that applies EEPROM settings before the
//! game starts.
//!
//! Reachable two ways: as part of the cabinet fleet's offline "bake settings
//! into a ROM file" tooling, and directly from tests. The fleet's poll loop
//! does not call this crate at tick time — only [`naomi_patch`] does, via
//! the transport's `send`.

mod error;
mod trojan;

pub use error::SettingsError;
pub use trojan::{TrojanConfig, TrojanDate};

use naomi_rom::{RomImage, RomSection, MAX_SECTIONS};
use trojan::{read_trojan_config, PLACEHOLDER_DEBUG, PLACEHOLDER_ENTRYPOINT, PLACEHOLDER_OPTIONS, PLACEHOLDER_PAYLOAD};

pub const SRAM_LOCATION: u32 = 0x0020_0000;
pub const SRAM_SIZE: usize = 32_768;
pub const EEPROM_SIZE: usize = naomi_eeprom::EEPROM_SIZE;
pub const MAX_TROJAN_SIZE: usize = 512 * 1024;

const DEFAULT_TROJAN_BYTES: &[u8] = include_bytes!("assets/default_trojan.bin");

/// Returns the packaged default trojan, embedded at build time so callers
/// don't need to know this crate's internal asset layout.
#[must_use]
pub fn default_trojan() -> &'static [u8] {
    DEFAULT_TROJAN_BYTES
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsKind {
    None,
    Eeprom,
    Sram,
}

#[derive(Debug, Clone, Copy)]
pub struct SettingsInfo {
    pub sentinel: bool,
    pub debug: bool,
    pub date: TrojanDate,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SettingsOptions {
    pub sentinel: bool,
    pub debug: bool,
}

/// Reads and writes the settings payload attached to one [`RomImage`].
///
/// The computed [`SettingsKind`] is cached after the first read and asserted
/// consistent on subsequent reads (spec.md §9: "caching is a local
/// optimization and the assertion is a bug check"). A fresh `SettingsPatcher`
/// should be built per patch request; it is not meant to be shared across
/// threads.
pub struct SettingsPatcher {
    rom: RomImage,
    trojan: Vec<u8>,
    cached_kind: Option<SettingsKind>,
}

impl SettingsPatcher {
    /// `trojan` defaults to [`default_trojan`] when `None`.
    pub fn new(rom: RomImage, trojan: Option<Vec<u8>>) -> Self {
        Self { rom, trojan: trojan.unwrap_or_else(|| default_trojan().to_vec()), cached_kind: None }
    }

    #[must_use]
    pub fn rom(&self) -> &RomImage {
        &self.rom
    }

    #[must_use]
    pub fn into_rom(self) -> RomImage {
        self.rom
    }

    #[must_use]
    pub fn serial(&self) -> [u8; 4] {
        self.rom.header().serial
    }

    /// Finds the section containing `address`, skipping any section longer
    /// than [`MAX_TROJAN_SIZE`] as a fast reject (spec.md §4.1).
    fn section_containing<'a>(&self, sections: &'a [RomSection], address: u32) -> Option<&'a RomSection> {
        sections
            .iter()
            .filter(|s| s.length as usize <= MAX_TROJAN_SIZE)
            .find(|s| s.contains_load_address(address))
    }

    /// Returns the (owned, `Copy`) section holding the trojan and its
    /// decoded config block, if the entrypoint currently lands in one.
    fn trojan_slot(&self) -> Option<(RomSection, TrojanConfig)> {
        let sections = self.rom.header().main_executable.sections.clone();
        let entrypoint = self.rom.header().main_executable.entrypoint;
        let section = *self.section_containing(&sections, entrypoint)?;
        let data = &self.rom.data()[section.offset as usize..(section.offset + section.length) as usize];
        let (_, config) = read_trojan_config(data).ok()?;
        Some((section, config))
    }

    /// Detects the kind of settings currently attached to the ROM, caching
    /// the result and asserting consistency with any prior cached value.
    pub fn detect_kind(&mut self) -> SettingsKind {
        let kind = self.detect_kind_uncached();
        self.assert_and_cache(kind);
        kind
    }

    fn detect_kind_uncached(&self) -> SettingsKind {
        let sections = &self.rom.header().main_executable.sections;
        if sections.iter().any(|s| s.load_address == SRAM_LOCATION && s.length as usize == SRAM_SIZE) {
            return SettingsKind::Sram;
        }
        if self.trojan_slot().is_some() {
            return SettingsKind::Eeprom;
        }
        SettingsKind::None
    }

    fn assert_and_cache(&mut self, kind: SettingsKind) {
        if let Some(cached) = self.cached_kind {
            debug_assert_eq!(cached, kind, "SettingsPatcher kind changed between reads, logic error");
        }
        self.cached_kind = Some(kind);
    }

    /// Extracts `{sentinel, debug, date}` from the trojan section, or `None`
    /// if the ROM carries no trojan (or carries SRAM settings instead).
    pub fn read_info(&self) -> Option<SettingsInfo> {
        let (_, config) = self.trojan_slot()?;
        Some(SettingsInfo { sentinel: config.sentinel_flag != 0, debug: config.debug_flag != 0, date: config.date() })
    }

    /// Returns the currently attached settings payload, if any.
    pub fn read_settings(&mut self) -> Option<Vec<u8>> {
        let sections = self.rom.header().main_executable.sections.clone();
        for section in &sections {
            if section.load_address == SRAM_LOCATION && section.length as usize == SRAM_SIZE {
                let start = section.offset as usize;
                let bytes = self.rom.data()[start..start + SRAM_SIZE].to_vec();
                self.assert_and_cache(SettingsKind::Sram);
                return Some(bytes);
            }
        }

        if let Some((section, _)) = self.trojan_slot() {
            let start = section.offset as usize;
            let end = start + section.length as usize;
            let trojan_data = self.rom.data()[start..end].to_vec();
            let window_count = trojan_data.len().checked_sub(EEPROM_SIZE).map_or(0, |n| n + 1);
            let found = (0..window_count)
                .map(|window_start| &trojan_data[window_start..window_start + EEPROM_SIZE])
                .find(|window| naomi_eeprom::validate(window))
                .map(<[u8]>::to_vec);
            if let Some(bytes) = found {
                self.assert_and_cache(SettingsKind::Eeprom);
                return Some(bytes);
            }
        }

        self.assert_and_cache(SettingsKind::None);
        None
    }

    /// Writes a settings payload, inferring the kind from `payload.len()`
    /// (128 bytes -> EEPROM, 32768 bytes -> SRAM). Operates on a working
    /// copy and only publishes the new ROM on success, per spec.md §7.
    pub fn write_settings(&mut self, payload: &[u8], options: SettingsOptions) -> Result<(), SettingsError> {
        let current_kind = self.detect_kind();

        match payload.len() {
            EEPROM_SIZE => {
                if !naomi_eeprom::validate(payload) {
                    return Err(SettingsError::InvalidEeprom);
                }
                let serial = self.rom.header().serial;
                if naomi_eeprom::system_serial(payload) != Some(serial)
                    || naomi_eeprom::game_serial(payload) != Some(serial)
                {
                    return Err(SettingsError::SerialMismatch);
                }
                if current_kind == SettingsKind::Sram {
                    return Err(SettingsError::KindConflict {
                        existing: SettingsKind::Sram,
                        requested: SettingsKind::Eeprom,
                    });
                }
                if self.trojan.is_empty() {
                    return Err(SettingsError::EmptyTrojan);
                }

                let debug_bit = u32::from(options.debug);
                let options_bit = u32::from(options.sentinel);
                self.attach_trojan(debug_bit, options_bit, payload)?;
                self.cached_kind = Some(SettingsKind::Eeprom);
                Ok(())
            }
            SRAM_SIZE => {
                if current_kind == SettingsKind::Eeprom {
                    return Err(SettingsError::KindConflict {
                        existing: SettingsKind::Eeprom,
                        requested: SettingsKind::Sram,
                    });
                }
                self.attach_section(SRAM_LOCATION, payload)?;
                self.cached_kind = Some(SettingsKind::Sram);
                Ok(())
            }
            len => Err(SettingsError::UnknownPayloadLength { len }),
        }
    }

    /// Overwrites or appends a raw section at `location`. Used directly for
    /// SRAM settings, and would be usable for any other fixed-address blob a
    /// future settings kind needed.
    pub fn attach_section(&mut self, location: u32, bytes: &[u8]) -> Result<(), SettingsError> {
        let mut data = self.rom.data().to_vec();
        let mut header = self.rom.header().clone();

        if let Some(section) = header.main_executable.sections.iter_mut().find(|s| s.load_address == location) {
            if section.length as usize != bytes.len() {
                return Err(SettingsError::SectionSizeMismatch {
                    load_address: location,
                    found: section.length as usize,
                    expected: bytes.len(),
                });
            }
            let start = section.offset as usize;
            data[start..start + bytes.len()].copy_from_slice(bytes);
            log::debug!("overwrote existing section at 0x{location:08X}");
        } else {
            if header.main_executable.sections.len() >= MAX_SECTIONS {
                return Err(SettingsError::MaxSections { max: MAX_SECTIONS });
            }
            let offset = data.len() as u32;
            data.extend_from_slice(bytes);
            header.main_executable.sections.push(RomSection { offset, load_address: location, length: bytes.len() as u32 });
            log::debug!("attached new section at 0x{location:08X}, {} bytes", bytes.len());
        }

        self.rom = RomImage::from_parts(data, header)?;
        Ok(())
    }

    /// Relocates and patches the trojan, attaching it as the ROM's new entry
    /// section, per spec.md §4.1's `attach_trojan`.
    fn attach_trojan(&mut self, debug_bit: u32, options_bit: u32, payload: &[u8]) -> Result<(), SettingsError> {
        let mut exe = self.trojan.clone();
        let (_, exe_config) = read_trojan_config(&exe)?;
        let load_address = exe_config.trojan_load_address;

        let mut data = self.rom.data().to_vec();
        let mut header = self.rom.header().clone();

        let existing_index =
            header.main_executable.sections.iter().position(|s| s.load_address == load_address);

        let original_entrypoint = match existing_index {
            Some(idx) => {
                let section = header.main_executable.sections[idx];
                let start = section.offset as usize;
                let end = start + section.length as usize;
                let (_, old_config) = read_trojan_config(&data[start..end])?;
                old_config.original_entrypoint
            }
            None => header.main_executable.entrypoint,
        };

        trojan::patch_placeholder(&mut exe, PLACEHOLDER_ENTRYPOINT, &original_entrypoint.to_le_bytes())?;
        trojan::patch_placeholder(&mut exe, PLACEHOLDER_PAYLOAD, payload)?;
        trojan::patch_placeholder(&mut exe, PLACEHOLDER_OPTIONS, &options_bit.to_le_bytes())?;
        trojan::patch_placeholder(&mut exe, PLACEHOLDER_DEBUG, &debug_bit.to_le_bytes())?;

        match existing_index {
            Some(idx) => {
                let section = header.main_executable.sections[idx];
                if section.offset as usize + section.length as usize == data.len() {
                    data.truncate(section.offset as usize);
                    data.extend_from_slice(&exe);
                    header.main_executable.sections[idx].length = exe.len() as u32;
                    log::debug!("overwrote trailing trojan section at 0x{load_address:08X}");
                } else {
                    let start = section.offset as usize;
                    let len = section.length as usize;
                    data[start..start + len].fill(0);
                    let new_offset = data.len() as u32;
                    data.extend_from_slice(&exe);
                    header.main_executable.sections[idx] =
                        RomSection { offset: new_offset, load_address, length: exe.len() as u32 };
                    log::debug!("relocated mid-file trojan section to tail at 0x{load_address:08X}");
                }
            }
            None => {
                if header.main_executable.sections.len() >= MAX_SECTIONS {
                    return Err(SettingsError::MaxSections { max: MAX_SECTIONS });
                }
                let offset = data.len() as u32;
                data.extend_from_slice(&exe);
                header.main_executable.sections.push(RomSection {
                    offset,
                    load_address,
                    length: exe.len() as u32,
                });
                log::debug!("attached new trojan section at 0x{load_address:08X}");
            }
        }

        header.main_executable.entrypoint = load_address;
        self.rom = RomImage::from_parts(data, header)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use naomi_rom::{MainExecutable, RomHeader, RomSection};

    const SERIAL: [u8; 4] = *b"BCY0";

    fn blank_rom(entrypoint: u32, sections: Vec<RomSection>) -> RomImage {
        let header = RomHeader { serial: SERIAL, main_executable: MainExecutable { entrypoint, sections } };
        RomImage::new(header.serialize()).unwrap()
    }

    fn test_trojan() -> Vec<u8> {
        default_trojan().to_vec()
    }

    fn trojan_load_address() -> u32 {
        let (_, cfg) = read_trojan_config(&test_trojan()).unwrap();
        cfg.trojan_load_address
    }

    #[test]
    fn write_then_read_eeprom_round_trips() {
        let rom = blank_rom(0x0C010000, vec![]);
        let mut patcher = SettingsPatcher::new(rom, Some(test_trojan()));
        let eeprom = naomi_eeprom::build(SERIAL);

        patcher.write_settings(&eeprom, SettingsOptions::default()).unwrap();
        assert_eq!(patcher.detect_kind(), SettingsKind::Eeprom);
        assert_eq!(patcher.read_settings().unwrap(), eeprom.to_vec());
        assert_eq!(patcher.rom().header().main_executable.entrypoint, trojan_load_address());
    }

    #[test]
    fn write_then_read_sram_round_trips() {
        let rom = blank_rom(0x0C010000, vec![]);
        let mut patcher = SettingsPatcher::new(rom, Some(test_trojan()));
        let sram = vec![0x42u8; SRAM_SIZE];

        patcher.write_settings(&sram, SettingsOptions::default()).unwrap();
        assert_eq!(patcher.detect_kind(), SettingsKind::Sram);
        assert_eq!(patcher.read_settings().unwrap(), sram);
    }

    #[test]
    fn wrong_serial_is_rejected_and_rom_unchanged() {
        let rom = blank_rom(0x0C010000, vec![]);
        let original_data = rom.data().to_vec();
        let mut patcher = SettingsPatcher::new(rom, Some(test_trojan()));
        let wrong_eeprom = naomi_eeprom::build(*b"ZZZZ");

        let err = patcher.write_settings(&wrong_eeprom, SettingsOptions::default()).unwrap_err();
        assert!(matches!(err, SettingsError::SerialMismatch));
        assert_eq!(patcher.rom().data(), original_data.as_slice());
    }

    #[test]
    fn sram_then_eeprom_is_kind_conflict() {
        let rom = blank_rom(0x0C010000, vec![]);
        let mut patcher = SettingsPatcher::new(rom, Some(test_trojan()));
        patcher.write_settings(&vec![0u8; SRAM_SIZE], SettingsOptions::default()).unwrap();

        let eeprom = naomi_eeprom::build(SERIAL);
        let err = patcher.write_settings(&eeprom, SettingsOptions::default()).unwrap_err();
        assert!(matches!(err, SettingsError::KindConflict { .. }));
    }

    #[test]
    fn unknown_length_is_rejected() {
        let rom = blank_rom(0x0C010000, vec![]);
        let mut patcher = SettingsPatcher::new(rom, Some(test_trojan()));
        let err = patcher.write_settings(&[0u8; 10], SettingsOptions::default()).unwrap_err();
        assert!(matches!(err, SettingsError::UnknownPayloadLength { len: 10 }));
    }

    #[test]
    fn repatching_reuses_trailing_section_without_growing_section_count() {
        let rom = blank_rom(0x0C010000, vec![]);
        let mut patcher = SettingsPatcher::new(rom, Some(test_trojan()));
        patcher.write_settings(&naomi_eeprom::build(SERIAL), SettingsOptions::default()).unwrap();
        assert_eq!(patcher.rom().header().main_executable.sections.len(), 1);

        let second = naomi_eeprom::build(SERIAL);
        patcher.write_settings(&second, SettingsOptions { sentinel: true, debug: false }).unwrap();
        assert_eq!(patcher.rom().header().main_executable.sections.len(), 1);
        assert_eq!(patcher.read_settings().unwrap(), second.to_vec());
    }

    #[test]
    fn attach_section_fails_when_rom_is_full() {
        let sections: Vec<RomSection> = (0..8)
            .map(|i| RomSection { offset: RomHeader::HEADER_LENGTH as u32, load_address: i + 1, length: 0 })
            .collect();
        let rom = blank_rom(0x0C010000, sections);
        let mut patcher = SettingsPatcher::new(rom, Some(test_trojan()));

        let err = patcher.attach_section(SRAM_LOCATION, &vec![0u8; SRAM_SIZE]).unwrap_err();
        assert!(matches!(err, SettingsError::MaxSections { .. }));
    }

    #[test]
    fn info_reports_compiled_date() {
        let rom = blank_rom(0x0C010000, vec![]);
        let mut patcher = SettingsPatcher::new(rom, Some(test_trojan()));
        patcher.write_settings(&naomi_eeprom::build(SERIAL), SettingsOptions::default()).unwrap();

        let info = patcher.read_info().unwrap();
        assert_eq!(info.date, TrojanDate { year: 2023, month: 6, day: 15 });
    }
}
