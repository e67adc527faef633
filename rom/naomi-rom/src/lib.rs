//! NAOMI ROM header parsing: the `RomHeader`/`RomImage`/`RomSection` boundary
//! that the settings patcher is built against (component C1 of the fleet
//! core).

use naomi_common::{read_u32_le, write_u32_le};
use thiserror::Error;

pub const MAGIC: &[u8; 16] = b"NAOMI ROM HDR\0\0\0";

const MAGIC_OFFSET: usize = 0x00;
const SERIAL_OFFSET: usize = 0x10;
const ENTRYPOINT_OFFSET: usize = 0x14;
const SECTION_COUNT_OFFSET: usize = 0x18;
const SECTION_TABLE_OFFSET: usize = 0x1C;
const SECTION_ENTRY_LEN: usize = 12;
pub const MAX_SECTIONS: usize = 8;

#[derive(Debug, Error)]
pub enum RomError {
    #[error("ROM data is {len} bytes, shorter than the {min}-byte header")]
    TooShort { len: usize, min: usize },
    #[error("ROM header declares {count} sections, more than the maximum of {MAX_SECTIONS}")]
    TooManySections { count: usize },
    #[error("ROM header magic is invalid")]
    BadMagic,
    #[error("section {index} spans [{offset}, {end}), which is out of bounds for a {data_len}-byte ROM")]
    SectionOutOfBounds { index: usize, offset: u32, end: u64, data_len: usize },
}

/// A single executable section: where it lives in the file, where it loads,
/// and how long it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomSection {
    pub offset: u32,
    pub load_address: u32,
    pub length: u32,
}

impl RomSection {
    #[must_use]
    pub fn end_offset(self) -> u64 {
        u64::from(self.offset) + u64::from(self.length)
    }

    #[must_use]
    pub fn contains_load_address(self, address: u32) -> bool {
        address >= self.load_address && address < self.load_address + self.length
    }
}

/// The "main executable" descriptor: the section table plus the address the
/// ROM jumps to at boot.
#[derive(Debug, Clone, Default)]
pub struct MainExecutable {
    pub entrypoint: u32,
    pub sections: Vec<RomSection>,
}

/// The parsed NAOMI ROM header.
#[derive(Debug, Clone)]
pub struct RomHeader {
    pub serial: [u8; 4],
    pub main_executable: MainExecutable,
}

impl RomHeader {
    pub const HEADER_LENGTH: usize = 0x360;

    /// Parses a header out of the first [`Self::HEADER_LENGTH`] bytes of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, RomError> {
        if data.len() < Self::HEADER_LENGTH {
            return Err(RomError::TooShort { len: data.len(), min: Self::HEADER_LENGTH });
        }
        if &data[MAGIC_OFFSET..MAGIC_OFFSET + MAGIC.len()] != MAGIC {
            return Err(RomError::BadMagic);
        }

        let mut serial = [0u8; 4];
        serial.copy_from_slice(&data[SERIAL_OFFSET..SERIAL_OFFSET + 4]);

        let entrypoint = read_u32_le(data, ENTRYPOINT_OFFSET);
        let section_count = read_u32_le(data, SECTION_COUNT_OFFSET) as usize;
        if section_count > MAX_SECTIONS {
            return Err(RomError::TooManySections { count: section_count });
        }

        let mut sections = Vec::with_capacity(section_count);
        for i in 0..section_count {
            let base = SECTION_TABLE_OFFSET + i * SECTION_ENTRY_LEN;
            sections.push(RomSection {
                offset: read_u32_le(data, base),
                load_address: read_u32_le(data, base + 4),
                length: read_u32_le(data, base + 8),
            });
        }

        Ok(Self { serial, main_executable: MainExecutable { entrypoint, sections } })
    }

    /// Serializes the header back into exactly [`Self::HEADER_LENGTH`] bytes.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_SECTIONS`] sections are present.
    /// [`RomImage::from_parts`] checks the cap itself and returns
    /// [`RomError::TooManySections`] instead of calling through to this;
    /// direct callers must enforce the cap themselves.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        assert!(
            self.main_executable.sections.len() <= MAX_SECTIONS,
            "header has more than {MAX_SECTIONS} sections"
        );

        let mut out = vec![0u8; Self::HEADER_LENGTH];
        out[MAGIC_OFFSET..MAGIC_OFFSET + MAGIC.len()].copy_from_slice(MAGIC);
        out[SERIAL_OFFSET..SERIAL_OFFSET + 4].copy_from_slice(&self.serial);
        write_u32_le(&mut out, ENTRYPOINT_OFFSET, self.main_executable.entrypoint);
        write_u32_le(&mut out, SECTION_COUNT_OFFSET, self.main_executable.sections.len() as u32);

        for (i, section) in self.main_executable.sections.iter().enumerate() {
            let base = SECTION_TABLE_OFFSET + i * SECTION_ENTRY_LEN;
            write_u32_le(&mut out, base, section.offset);
            write_u32_le(&mut out, base + 4, section.load_address);
            write_u32_le(&mut out, base + 8, section.length);
        }

        out
    }
}

/// An immutable-until-replaced ROM buffer paired with its parsed header.
#[derive(Debug, Clone)]
pub struct RomImage {
    data: Vec<u8>,
    header: RomHeader,
}

impl RomImage {
    /// Builds a `RomImage` from a raw buffer, validating the §3 invariants:
    /// every section lies within `data`, and the header prefix of `data`
    /// matches `header.serialize()`.
    pub fn new(data: Vec<u8>) -> Result<Self, RomError> {
        let header = RomHeader::parse(&data)?;
        Self::validate_sections(&header, data.len())?;
        Ok(Self { data, header })
    }

    fn validate_sections(header: &RomHeader, data_len: usize) -> Result<(), RomError> {
        for (index, section) in header.main_executable.sections.iter().enumerate() {
            let end = section.end_offset();
            if end > data_len as u64 {
                return Err(RomError::SectionOutOfBounds {
                    index,
                    offset: section.offset,
                    end,
                    data_len,
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn header(&self) -> &RomHeader {
        &self.header
    }

    #[must_use]
    pub fn header_mut(&mut self) -> &mut RomHeader {
        &mut self.header
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Builds a `RomImage` from a body buffer and a header, splicing
    /// `header.serialize()` onto the front of `data` and validating the §3
    /// invariant. Used by the settings patcher to publish a mutated working
    /// copy once every check has passed.
    pub fn from_parts(mut data: Vec<u8>, header: RomHeader) -> Result<Self, RomError> {
        let section_count = header.main_executable.sections.len();
        if section_count > MAX_SECTIONS {
            return Err(RomError::TooManySections { count: section_count });
        }

        let serialized = header.serialize();
        if data.len() < serialized.len() {
            data.resize(serialized.len(), 0);
        }
        data[..serialized.len()].copy_from_slice(&serialized);
        Self::validate_sections(&header, data.len())?;
        log::debug!(
            "rewrote ROM header: entrypoint=0x{:08x}, sections={}",
            header.main_executable.entrypoint,
            header.main_executable.sections.len()
        );
        Ok(Self { data, header })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_header_bytes(serial: [u8; 4], entrypoint: u32, sections: &[RomSection]) -> Vec<u8> {
        let header = RomHeader {
            serial,
            main_executable: MainExecutable { entrypoint, sections: sections.to_vec() },
        };
        header.serialize()
    }

    #[test]
    fn parse_round_trips_through_serialize() {
        let sections =
            [RomSection { offset: RomHeader::HEADER_LENGTH as u32, load_address: 0x0C020000, length: 16 }];
        let mut data = minimal_header_bytes(*b"TEST", 0x0C020000, &sections);
        data.extend(std::iter::repeat(0xFFu8).take(16));

        let header = RomHeader::parse(&data).unwrap();
        assert_eq!(header.serial, *b"TEST");
        assert_eq!(header.main_executable.entrypoint, 0x0C020000);
        assert_eq!(header.main_executable.sections, sections);
        assert_eq!(header.serialize(), data[..RomHeader::HEADER_LENGTH]);
    }

    #[test]
    fn too_short_is_rejected() {
        let err = RomHeader::parse(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, RomError::TooShort { .. }));
    }

    #[test]
    fn too_many_sections_is_rejected() {
        let sections: Vec<RomSection> =
            (0..9).map(|i| RomSection { offset: 0, load_address: i, length: 0 }).collect();
        // Build by hand since RomHeader::serialize asserts the cap.
        let mut data = vec![0u8; RomHeader::HEADER_LENGTH];
        data[..MAGIC.len()].copy_from_slice(MAGIC);
        write_u32_le(&mut data, SECTION_COUNT_OFFSET, sections.len() as u32);
        let err = RomHeader::parse(&data).unwrap_err();
        assert!(matches!(err, RomError::TooManySections { count: 9 }));
    }

    #[test]
    fn from_parts_rejects_too_many_sections_without_panicking() {
        let sections: Vec<RomSection> =
            (0..9).map(|i| RomSection { offset: 0, load_address: i, length: 0 }).collect();
        let header = RomHeader { serial: *b"TEST", main_executable: MainExecutable { entrypoint: 0, sections } };
        let err = RomImage::from_parts(vec![0u8; RomHeader::HEADER_LENGTH], header).unwrap_err();
        assert!(matches!(err, RomError::TooManySections { count: 9 }));
    }

    #[test]
    fn rom_image_rejects_out_of_bounds_section() {
        let sections = [RomSection { offset: 0, load_address: 0, length: 100_000 }];
        let data = minimal_header_bytes(*b"TEST", 0, &sections);
        let err = RomImage::new(data).unwrap_err();
        assert!(matches!(err, RomError::SectionOutOfBounds { .. }));
    }
}
