use std::fmt::Display;
use std::fmt::Error;
use std::fmt::Formatter;

/// Fixed header field offsets (bytes 0x00-0x3F of the story image).
pub const OFF_VERSION: usize = 0x00;
pub const OFF_FLAGS1: usize = 0x01;
pub const OFF_HIGH_MEM: usize = 0x04;
pub const OFF_INITIAL_PC: usize = 0x06;
pub const OFF_DICTIONARY: usize = 0x08;
pub const OFF_OBJECT_TABLE: usize = 0x0A;
pub const OFF_GLOBALS: usize = 0x0C;
pub const OFF_STATIC_MEM: usize = 0x0E;
pub const OFF_FLAGS2: usize = 0x10;
pub const OFF_ABBREV_TABLE: usize = 0x18;
pub const OFF_FILE_LEN: usize = 0x1A;
pub const OFF_CHECKSUM: usize = 0x1C;
pub const OFF_SCREEN_WIDTH: usize = 0x20;
pub const OFF_SCREEN_HEIGHT: usize = 0x21;
pub const OFF_STANDARD_REVISION: usize = 0x32;

/// Parsed snapshot of the story header. Fields that opcodes mutate
/// (flags, screen size) are always read back from memory instead.
#[derive(Debug, Clone)]
pub struct Header {
    pub version: u8,
    pub release: u16,
    pub serial: String,
    pub base_high_mem: u16,
    pub base_static_mem: u16,
    pub initial_pc: u16,
    pub dictionary: u16,
    pub object_table_addr: u16,
    pub global_variables: u16,
    pub abbrev_table: u16,
    pub len_file: usize,
    pub checksum_file: u16,
}

fn word(bytes: &[u8], offset: usize) -> u16 {
    ((bytes[offset] as u16) << 8) | (bytes[offset + 1] as u16)
}

impl Header {
    pub fn new(bytes: &[u8]) -> Header {
        let version = bytes[OFF_VERSION];
        Header {
            version,
            release: word(bytes, 0x02),
            serial: bytes[0x12..0x18].iter().map(|b| *b as char).collect(),
            base_high_mem: word(bytes, OFF_HIGH_MEM),
            base_static_mem: word(bytes, OFF_STATIC_MEM),
            initial_pc: word(bytes, OFF_INITIAL_PC),
            dictionary: word(bytes, OFF_DICTIONARY),
            object_table_addr: word(bytes, OFF_OBJECT_TABLE),
            global_variables: word(bytes, OFF_GLOBALS),
            abbrev_table: word(bytes, OFF_ABBREV_TABLE),
            len_file: word(bytes, OFF_FILE_LEN) as usize * file_length_scale(version),
            checksum_file: word(bytes, OFF_CHECKSUM),
        }
    }
}

/// The file-length header word is stored divided by a version-dependent scale.
pub fn file_length_scale(version: u8) -> usize {
    match version {
        1..=3 => 2,
        4..=5 => 4,
        _ => 8,
    }
}

impl Display for Header {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(
            f,
            "
Z-code version:           {}
Release number:           {}
Serial number:            {}
Start PC:                 {:#06x}
Base of high memory:      {:#06x}
Base of static memory:    {:#06x}
Dictionary address:       {:#06x}
Object table address:     {:#06x}
Global variables address: {:#06x}
Abbreviations address:    {:#06x}
File size:                {:#06x}
Checksum:                 {:#06x}
",
            self.version,
            self.release,
            self.serial,
            self.initial_pc,
            self.base_high_mem,
            self.base_static_mem,
            self.dictionary,
            self.object_table_addr,
            self.global_variables,
            self.abbrev_table,
            self.len_file,
            self.checksum_file,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_parse() {
        let mut bytes = vec![0u8; 0x40];
        bytes[OFF_VERSION] = 3;
        bytes[0x02] = 0x00;
        bytes[0x03] = 0x58; // release 88
        bytes[OFF_HIGH_MEM] = 0x4e;
        bytes[OFF_HIGH_MEM + 1] = 0x37;
        bytes[OFF_INITIAL_PC] = 0x4f;
        bytes[OFF_INITIAL_PC + 1] = 0x05;
        bytes[OFF_DICTIONARY] = 0x3b;
        bytes[OFF_DICTIONARY + 1] = 0x21;
        bytes[OFF_FILE_LEN] = 0x00;
        bytes[OFF_FILE_LEN + 1] = 0x10;
        for (i, b) in b"850101".iter().enumerate() {
            bytes[0x12 + i] = *b;
        }

        let h = Header::new(&bytes);
        assert_eq!(h.version, 3);
        assert_eq!(h.release, 88);
        assert_eq!(h.serial, "850101");
        assert_eq!(h.base_high_mem, 0x4e37);
        assert_eq!(h.initial_pc, 0x4f05);
        assert_eq!(h.dictionary, 0x3b21);
        // v3 file length is stored in 2-byte units
        assert_eq!(h.len_file, 0x20);
    }

    #[test]
    fn test_file_length_scale() {
        assert_eq!(file_length_scale(3), 2);
        assert_eq!(file_length_scale(5), 4);
        assert_eq!(file_length_scale(8), 8);
    }
}
