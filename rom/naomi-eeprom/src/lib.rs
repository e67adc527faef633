//! NAOMI EEPROM settings codec (component C2): validates a 128-byte EEPROM
//! image and exposes its game-serial fields.
//!
//! Layout (128 bytes total):
//! - `[0..2]`: big-endian checksum over the 16-byte system area `[2..18]`.
//! - `[3..7]`: game serial, inside the system area.
//! - `[18..20]`: big-endian checksum over the 16-byte game area `[20..36]`.
//! - `[21..25]`: game serial, duplicated inside the game area.
//! - `[36..128]`: unused, reserved for per-game settings fields (not
//!   interpreted by this codec; see spec.md's "editing individual settings
//!   fields" non-goal).

use naomi_common::{read_u16_be, write_u16_be};

pub const EEPROM_SIZE: usize = 128;

const SYSTEM_CHECKSUM_OFFSET: usize = 0;
const SYSTEM_AREA_OFFSET: usize = 2;
const SYSTEM_AREA_LEN: usize = 16;
const SYSTEM_SERIAL_OFFSET: usize = 3;

const GAME_CHECKSUM_OFFSET: usize = 18;
const GAME_AREA_OFFSET: usize = 20;
const GAME_AREA_LEN: usize = 16;
const GAME_SERIAL_OFFSET: usize = 21;

/// Sega's additive EEPROM checksum: a 16-bit sum seeded at `0xFFFF`.
#[must_use]
pub fn checksum16(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFFu16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// Validates that `bytes` is a well-formed 128-byte EEPROM image: correct
/// length and both area checksums intact.
#[must_use]
pub fn validate(bytes: &[u8]) -> bool {
    if bytes.len() != EEPROM_SIZE {
        return false;
    }

    let system_area = &bytes[SYSTEM_AREA_OFFSET..SYSTEM_AREA_OFFSET + SYSTEM_AREA_LEN];
    let system_checksum = read_u16_be(bytes, SYSTEM_CHECKSUM_OFFSET);
    if checksum16(system_area) != system_checksum {
        return false;
    }

    let game_area = &bytes[GAME_AREA_OFFSET..GAME_AREA_OFFSET + GAME_AREA_LEN];
    let game_checksum = read_u16_be(bytes, GAME_CHECKSUM_OFFSET);
    checksum16(game_area) == game_checksum
}

/// Returns the serial embedded in the system area (bytes `[3..7]`), without
/// checking that it agrees with the game-area copy or that the image
/// validates at all.
#[must_use]
pub fn system_serial(bytes: &[u8]) -> Option<[u8; 4]> {
    bytes.get(SYSTEM_SERIAL_OFFSET..SYSTEM_SERIAL_OFFSET + 4)?.try_into().ok()
}

/// Returns the serial embedded in the game area (bytes `[21..25]`).
#[must_use]
pub fn game_serial(bytes: &[u8]) -> Option<[u8; 4]> {
    bytes.get(GAME_SERIAL_OFFSET..GAME_SERIAL_OFFSET + 4)?.try_into().ok()
}

/// Builds a minimal, valid 128-byte EEPROM image carrying `serial` in both
/// serial fields and zeroes everywhere else, recomputing both checksums.
/// Used by callers that need a ready-to-write EEPROM and by the patcher's
/// and fleet's own tests in place of a hand-crafted fixture.
#[must_use]
pub fn build(serial: [u8; 4]) -> [u8; EEPROM_SIZE] {
    let mut eeprom = [0u8; EEPROM_SIZE];
    eeprom[SYSTEM_SERIAL_OFFSET..SYSTEM_SERIAL_OFFSET + 4].copy_from_slice(&serial);
    eeprom[GAME_SERIAL_OFFSET..GAME_SERIAL_OFFSET + 4].copy_from_slice(&serial);

    let system_checksum = checksum16(&eeprom[SYSTEM_AREA_OFFSET..SYSTEM_AREA_OFFSET + SYSTEM_AREA_LEN]);
    write_u16_be(&mut eeprom, SYSTEM_CHECKSUM_OFFSET, system_checksum);

    let game_checksum = checksum16(&eeprom[GAME_AREA_OFFSET..GAME_AREA_OFFSET + GAME_AREA_LEN]);
    write_u16_be(&mut eeprom, GAME_CHECKSUM_OFFSET, game_checksum);

    eeprom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_eeprom_validates() {
        let eeprom = build(*b"BCY0");
        assert!(validate(&eeprom));
        assert_eq!(system_serial(&eeprom), Some(*b"BCY0"));
        assert_eq!(game_serial(&eeprom), Some(*b"BCY0"));
    }

    #[test]
    fn wrong_length_fails() {
        assert!(!validate(&[0u8; 64]));
    }

    #[test]
    fn corrupted_checksum_fails() {
        let mut eeprom = build(*b"BCY0");
        eeprom[40] ^= 0xFF;
        assert!(!validate(&eeprom));
    }
}
