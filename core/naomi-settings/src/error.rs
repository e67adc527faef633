use thiserror::Error;

/// The §7 error taxonomy this crate owns: malformed trojans/ROMs
/// (`PatchFormat`) and settings payloads that don't belong on this ROM
/// (`SettingsMismatch`).
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("ROM already has the maximum of {max} sections")]
    MaxSections { max: usize },
    #[error("trojan is missing its 0x{sentinel:02X} placeholder")]
    PlaceholderMissing { sentinel: u8 },
    #[error(
        "trojan's 0x{sentinel:02X} placeholder is {found} bytes long, but the replacement is {expected} bytes"
    )]
    PlaceholderSizeMismatch { sentinel: u8, found: usize, expected: usize },
    #[error("no trojan configuration block found")]
    MissingConfig,
    #[error("existing section at load address 0x{load_address:08X} is {found} bytes, expected {expected}")]
    SectionSizeMismatch { load_address: u32, found: usize, expected: usize },
    #[error("payload is not a valid 128-byte EEPROM image")]
    InvalidEeprom,
    #[error("EEPROM serial does not match this ROM's serial")]
    SerialMismatch,
    #[error("payload length {len} is neither a 128-byte EEPROM nor a 32768-byte SRAM image")]
    UnknownPayloadLength { len: usize },
    #[error("ROM already carries {existing:?} settings, cannot attach {requested:?}")]
    KindConflict { existing: crate::SettingsKind, requested: crate::SettingsKind },
    #[error("attaching EEPROM settings requires a non-empty trojan")]
    EmptyTrojan,
    #[error(transparent)]
    Rom(#[from] naomi_rom::RomError),
}
