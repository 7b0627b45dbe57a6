//! Binary configuration image.
//!
//! A configuration image is a header followed by a stream of register and
//! table writes, in the order they must be applied to the chip.
//!
//! # Format Overview
//!
//! ```text
//! +------------------------------------------+
//! | Header (20 bytes)                        |
//! |   NumWords: 4                            |
//! |   IdentWord: "MAUC"                      |
//! |   Version: 0x0100                        |
//! |   Length: words (excluding header)       |
//! |   CheckSum: one's complement             |
//! +------------------------------------------+
//! | Command stream                           |
//! |   Each command: [len:16|opcode:16] + payload
//! |   64-bit fields are stored as lo, hi words
//! +------------------------------------------+
//! ```
//!
//! # Example
//!
//! ```
//! use mau_model::parser::image::{ConfigImage, ImageBuilder, ImageCommand};
//!
//! let mut builder = ImageBuilder::new();
//! builder.write(0x0000_1500_0000_0000, 0x3);
//! let bytes = builder.finish()?;
//!
//! let image = ConfigImage::parse(&bytes)?;
//! let cmds: Vec<_> = image.commands().collect();
//! assert_eq!(cmds[0], ImageCommand::Write { address: 0x0000_1500_0000_0000, value: 0x3 });
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::collections::HashMap;
use std::io::Cursor;

use anyhow::{anyhow, bail, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::device::RegWrite;

/// Image magic: "MAUC" in little-endian
pub const IMAGE_MAGIC: u32 = 0x4355_414D;

/// Current image format version
pub const IMAGE_VERSION: u32 = 0x0100;

/// Image header size in bytes
pub const IMAGE_HEADER_SIZE: usize = 20;

/// Raw image header (20 bytes)
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RawImageHeader {
    /// Number of remaining words in header (always 4)
    pub num_words: u32,
    /// Identification word: "MAUC"
    pub ident_word: u32,
    /// Format version
    pub version: u32,
    /// Length in 32-bit words (excluding header)
    pub length: u32,
    /// One's complement checksum of header fields
    pub checksum: u32,
}

impl RawImageHeader {
    fn expected_checksum(&self) -> u32 {
        !(self
            .num_words
            .wrapping_add(self.ident_word)
            .wrapping_add(self.version)
            .wrapping_add(self.length))
    }
}

/// Image command opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOpcode {
    Write,
    MaskWrite,
    TableWrite,
    Reset,
    Nop,
    EndMark,
    Unknown(u16),
}

impl From<u16> for ImageOpcode {
    fn from(v: u16) -> Self {
        match v {
            0x01 => Self::Write,
            0x02 => Self::MaskWrite,
            0x03 => Self::TableWrite,
            0x04 => Self::Reset,
            0x05 => Self::Nop,
            0x06 => Self::EndMark,
            other => Self::Unknown(other),
        }
    }
}

impl From<ImageOpcode> for u16 {
    fn from(op: ImageOpcode) -> Self {
        match op {
            ImageOpcode::Write => 0x01,
            ImageOpcode::MaskWrite => 0x02,
            ImageOpcode::TableWrite => 0x03,
            ImageOpcode::Reset => 0x04,
            ImageOpcode::Nop => 0x05,
            ImageOpcode::EndMark => 0x06,
            ImageOpcode::Unknown(v) => v,
        }
    }
}

/// Decoded image command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageCommand {
    /// Replace a register
    Write { address: u64, value: u64 },

    /// Masked write: reg = (reg & !mask) | (value & mask)
    MaskWrite { address: u64, mask: u64, value: u64 },

    /// Write one 128-bit table word
    TableWrite { address: u64, word0: u64, word1: u64 },

    /// Return the chip to power-on state
    Reset,

    /// No operation (padding)
    Nop { words: u16 },

    /// End marker
    EndMark,

    /// Known command with fewer payload words than it needs, or a command
    /// running past the end of the image
    Malformed { opcode: u16, expected: usize, got: usize },

    /// Unrecognized opcode
    Unknown { opcode: u16, payload: Vec<u32> },
}

impl ImageCommand {
    /// Target address for address-based commands
    pub fn address(&self) -> Option<u64> {
        match self {
            Self::Write { address, .. }
            | Self::MaskWrite { address, .. }
            | Self::TableWrite { address, .. } => Some(*address),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Write { .. } => "WRITE",
            Self::MaskWrite { .. } => "MASK_WRITE",
            Self::TableWrite { .. } => "TABLE_WRITE",
            Self::Reset => "RESET",
            Self::Nop { .. } => "NOP",
            Self::EndMark => "END_MARK",
            Self::Malformed { .. } => "MALFORMED",
            Self::Unknown { .. } => "UNKNOWN",
        }
    }
}

/// Parsed configuration image
pub struct ConfigImage<'a> {
    data: &'a [u8],
    /// Image header
    pub header: RawImageHeader,
}

impl<'a> ConfigImage<'a> {
    /// Parse an image from raw bytes
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < IMAGE_HEADER_SIZE {
            bail!(
                "Image too small: {} bytes (minimum {})",
                data.len(),
                IMAGE_HEADER_SIZE
            );
        }

        let (header, _) = RawImageHeader::read_from_prefix(data)
            .map_err(|e| anyhow!("Failed to parse image header: {:?}", e))?;

        if header.ident_word != IMAGE_MAGIC {
            bail!(
                "Invalid image magic: 0x{:08X} (expected 0x{:08X})",
                header.ident_word,
                IMAGE_MAGIC
            );
        }

        if header.version >> 8 != IMAGE_VERSION >> 8 {
            bail!("Unsupported image version 0x{:04X}", header.version);
        }

        let computed = header.expected_checksum();
        if header.checksum != computed {
            log::warn!(
                "Image checksum mismatch: expected 0x{:08X}, got 0x{:08X}",
                computed,
                header.checksum
            );
        }

        let available = (data.len() - IMAGE_HEADER_SIZE) / 4;
        if header.length as usize > available {
            log::warn!(
                "Image declares {} words but only {} are present",
                header.length,
                available
            );
        }

        Ok(Self { data, header })
    }

    /// Total command length in words
    pub fn command_length_words(&self) -> usize {
        self.header.length as usize
    }

    /// Raw command data
    pub fn command_data(&self) -> &'a [u8] {
        let end = (IMAGE_HEADER_SIZE + self.header.length as usize * 4).min(self.data.len());
        &self.data[IMAGE_HEADER_SIZE..end]
    }

    /// Iterate over all commands
    pub fn commands(&self) -> ImageCommandIterator<'a> {
        ImageCommandIterator {
            cursor: Cursor::new(self.command_data()),
        }
    }

    /// Count commands by type
    pub fn command_counts(&self) -> HashMap<&'static str, usize> {
        let mut counts = HashMap::new();
        for cmd in self.commands() {
            *counts.entry(cmd.name()).or_insert(0) += 1;
        }
        counts
    }

    /// Print a summary of the image contents
    pub fn print_summary(&self) {
        println!("Configuration Image");
        println!("===================");
        println!("Version: 0x{:04X}", self.header.version);
        println!(
            "Length: {} words ({} bytes)",
            self.command_length_words(),
            self.command_length_words() * 4
        );
        println!();
        println!("Command counts:");
        let counts = self.command_counts();
        let mut sorted: Vec<_> = counts.iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        for (name, count) in sorted {
            println!("  {}: {}", name, count);
        }
    }
}

/// Iterator over image commands
pub struct ImageCommandIterator<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl ImageCommandIterator<'_> {
    fn remaining(&self) -> usize {
        self.cursor.get_ref().len() - self.cursor.position() as usize
    }
}

fn join(lo: u32, hi: u32) -> u64 {
    ((hi as u64) << 32) | lo as u64
}

impl Iterator for ImageCommandIterator<'_> {
    type Item = ImageCommand;

    fn next(&mut self) -> Option<Self::Item> {
        // Read command word: [31:16] = payload length, [15:0] = opcode
        let cmd_word = self.cursor.read_u32::<LittleEndian>().ok()?;
        let raw_opcode = (cmd_word & 0xFFFF) as u16;
        let payload_len = (cmd_word >> 16) as usize;

        if payload_len * 4 > self.remaining() {
            // Truncated command: consume the rest and report it
            let got = self.remaining() / 4;
            let end = self.cursor.get_ref().len() as u64;
            self.cursor.set_position(end);
            return Some(ImageCommand::Malformed {
                opcode: raw_opcode,
                expected: payload_len,
                got,
            });
        }

        let mut payload = Vec::with_capacity(payload_len);
        for _ in 0..payload_len {
            payload.push(self.cursor.read_u32::<LittleEndian>().ok()?);
        }

        let cmd = match ImageOpcode::from(raw_opcode) {
            ImageOpcode::Write if payload_len >= 4 => ImageCommand::Write {
                address: join(payload[0], payload[1]),
                value: join(payload[2], payload[3]),
            },

            ImageOpcode::MaskWrite if payload_len >= 6 => ImageCommand::MaskWrite {
                address: join(payload[0], payload[1]),
                mask: join(payload[2], payload[3]),
                value: join(payload[4], payload[5]),
            },

            ImageOpcode::TableWrite if payload_len >= 6 => ImageCommand::TableWrite {
                address: join(payload[0], payload[1]),
                word0: join(payload[2], payload[3]),
                word1: join(payload[4], payload[5]),
            },

            ImageOpcode::Reset => ImageCommand::Reset,

            ImageOpcode::Nop => ImageCommand::Nop {
                words: payload_len as u16,
            },

            ImageOpcode::EndMark => ImageCommand::EndMark,

            ImageOpcode::Write => ImageCommand::Malformed {
                opcode: raw_opcode,
                expected: 4,
                got: payload_len,
            },

            ImageOpcode::MaskWrite | ImageOpcode::TableWrite => ImageCommand::Malformed {
                opcode: raw_opcode,
                expected: 6,
                got: payload_len,
            },

            ImageOpcode::Unknown(_) => ImageCommand::Unknown {
                opcode: raw_opcode,
                payload,
            },
        };

        Some(cmd)
    }
}

/// Builds configuration images.
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    words: Vec<u32>,
}

impl ImageBuilder {
    /// Empty image.
    pub fn new() -> Self {
        Self::default()
    }

    fn command(&mut self, opcode: ImageOpcode, payload: &[u32]) -> &mut Self {
        let op: u16 = opcode.into();
        self.words.push(((payload.len() as u32) << 16) | op as u32);
        self.words.extend_from_slice(payload);
        self
    }

    fn split(v: u64) -> [u32; 2] {
        [v as u32, (v >> 32) as u32]
    }

    /// Append a register write.
    pub fn write(&mut self, address: u64, value: u64) -> &mut Self {
        let [a0, a1] = Self::split(address);
        let [v0, v1] = Self::split(value);
        self.command(ImageOpcode::Write, &[a0, a1, v0, v1])
    }

    /// Append a masked register write.
    pub fn mask_write(&mut self, address: u64, mask: u64, value: u64) -> &mut Self {
        let [a0, a1] = Self::split(address);
        let [m0, m1] = Self::split(mask);
        let [v0, v1] = Self::split(value);
        self.command(ImageOpcode::MaskWrite, &[a0, a1, m0, m1, v0, v1])
    }

    /// Append a write list produced by the translators.
    pub fn reg_writes(&mut self, writes: &[RegWrite]) -> &mut Self {
        for w in writes {
            if w.is_full() {
                self.write(w.address, w.value);
            } else {
                self.mask_write(w.address, w.mask, w.value);
            }
        }
        self
    }

    /// Append a table word write.
    pub fn table_write(&mut self, address: u64, word0: u64, word1: u64) -> &mut Self {
        let [a0, a1] = Self::split(address);
        let [w00, w01] = Self::split(word0);
        let [w10, w11] = Self::split(word1);
        self.command(ImageOpcode::TableWrite, &[a0, a1, w00, w01, w10, w11])
    }

    /// Append a reset.
    pub fn reset(&mut self) -> &mut Self {
        self.command(ImageOpcode::Reset, &[])
    }

    /// Append padding.
    pub fn nop(&mut self, words: u16) -> &mut Self {
        let pad = vec![0u32; words as usize];
        self.command(ImageOpcode::Nop, &pad)
    }

    /// Terminate the stream and serialize header plus commands.
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        self.command(ImageOpcode::EndMark, &[]);

        let length = self.words.len() as u32;
        let mut header = RawImageHeader {
            num_words: 4,
            ident_word: IMAGE_MAGIC,
            version: IMAGE_VERSION,
            length,
            checksum: 0,
        };
        header.checksum = header.expected_checksum();

        let mut out = Vec::with_capacity(IMAGE_HEADER_SIZE + self.words.len() * 4);
        for w in [header.num_words, header.ident_word, header.version, header.length, header.checksum] {
            out.write_u32::<LittleEndian>(w)?;
        }
        for &w in &self.words {
            out.write_u32::<LittleEndian>(w)?;
        }
        Ok(out)
    }
}
