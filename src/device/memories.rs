//! Table memories written through the indirect path.
//!
//! TCAM entries, exact-match unit RAM lines, instruction memory slots and
//! action-data entries all share one write primitive: a 128-bit word made of
//! `(word0, word1)` at a flattened offset. Storage is sparse; a row that was
//! never written reads back as zero and is reported as unwritten.
//!
//! # Table Address Encoding
//!
//! ```text
//! [unused:16][stage:8][kind:8][offset:32]
//!
//! TCAM:        offset = (col * 12 + row) * 512 + entry
//! SRAM:        offset = (row * 12 + col) * 1024 + line
//! Instruction: offset = instruction * 8 + slot
//! Action data: offset = entry
//! ```

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use super::registers_spec::{
    ACTION_DATA_DEPTH, ADDRESS_MASK, CLASS_SHIFT, IMEM_DEPTH, IMEM_SLOTS, INDEX_MASK, MAX_STAGES, SRAM_COLS,
    SRAM_DEPTH, SRAM_ROWS, STAGE_SHIFT, TCAM_COLS, TCAM_DEPTH, TCAM_ROWS, TCAM_UNITS,
};

/// Errors raised while decoding a table address.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// Address has bits set above the 48-bit address space.
    #[error("address 0x{address:X} is outside the table address space")]
    OutOfSpace {
        /// Raw address.
        address: u64,
    },

    /// Stage cannot be encoded in an address.
    #[error("stage {stage} out of range (max {max} stages)")]
    StageOutOfRange {
        /// Requested stage.
        stage: usize,
        /// Stages an address can name.
        max: usize,
    },

    /// One coordinate of a table address is past the end of its dimension.
    #[error("{kind} {coord} {value} out of range ({size})")]
    CoordinateOutOfRange {
        /// Memory kind.
        kind: MemoryKind,
        /// Coordinate name.
        coord: &'static str,
        /// Offending value.
        value: usize,
        /// Size of the dimension.
        size: usize,
    },

    /// Kind id does not name a memory.
    #[error("unknown memory kind {kind} in table address 0x{address:012X}")]
    UnknownKind {
        /// Raw address.
        address: u64,
        /// Kind id found in the address.
        kind: u8,
    },

    /// Offset is past the end of the memory.
    #[error("offset {offset} out of range for {kind} ({depth} words)")]
    OffsetOutOfRange {
        /// Memory kind.
        kind: MemoryKind,
        /// Offending offset.
        offset: u64,
        /// Memory depth in words.
        depth: usize,
    },
}

/// Kind of table memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MemoryKind {
    /// TCAM entries (word0/word1 ternary encoding)
    Tcam = 1,
    /// Exact-match unit RAM lines
    Sram = 2,
    /// Instruction memory slots
    Imem = 3,
    /// Action-data entries
    ActionData = 4,
}

impl MemoryKind {
    /// All memory kinds.
    pub const ALL: [MemoryKind; 4] = [
        MemoryKind::Tcam,
        MemoryKind::Sram,
        MemoryKind::Imem,
        MemoryKind::ActionData,
    ];

    /// Decode a kind id.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(MemoryKind::Tcam),
            2 => Some(MemoryKind::Sram),
            3 => Some(MemoryKind::Imem),
            4 => Some(MemoryKind::ActionData),
            _ => None,
        }
    }

    /// Number of 128-bit words in this memory.
    pub fn depth(self) -> usize {
        match self {
            MemoryKind::Tcam => TCAM_UNITS * TCAM_DEPTH,
            MemoryKind::Sram => SRAM_ROWS * SRAM_COLS * SRAM_DEPTH,
            MemoryKind::Imem => IMEM_DEPTH * IMEM_SLOTS,
            MemoryKind::ActionData => ACTION_DATA_DEPTH,
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryKind::Tcam => write!(f, "TCAM"),
            MemoryKind::Sram => write!(f, "SRAM"),
            MemoryKind::Imem => write!(f, "IMEM"),
            MemoryKind::ActionData => write!(f, "ADATA"),
        }
    }
}

/// Decoded table address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableAddress {
    /// Pipeline stage
    pub stage: u8,
    /// Target memory
    pub kind: MemoryKind,
    /// Word offset within the memory
    pub offset: u32,
}

impl TableAddress {
    /// Decode a raw table address.
    pub fn decode(address: u64) -> Result<Self, MemoryError> {
        if address & !ADDRESS_MASK != 0 {
            return Err(MemoryError::OutOfSpace { address });
        }
        let kind_id = ((address >> CLASS_SHIFT) & 0xFF) as u8;
        let kind = MemoryKind::from_id(kind_id).ok_or(MemoryError::UnknownKind {
            address,
            kind: kind_id,
        })?;
        let offset = address & INDEX_MASK;
        if offset as usize >= kind.depth() {
            return Err(MemoryError::OffsetOutOfRange {
                kind,
                offset,
                depth: kind.depth(),
            });
        }
        Ok(Self {
            stage: ((address >> STAGE_SHIFT) & 0xFF) as u8,
            kind,
            offset: offset as u32,
        })
    }

    /// Encode into a raw address.
    pub fn encode(&self) -> u64 {
        ((self.stage as u64) << STAGE_SHIFT) | ((self.kind as u64) << CLASS_SHIFT) | self.offset as u64
    }

    /// Address of a TCAM entry.
    pub fn tcam(stage: usize, col: usize, row: usize, entry: usize) -> Result<Self, MemoryError> {
        let kind = MemoryKind::Tcam;
        check(kind, "column", col, TCAM_COLS)?;
        check(kind, "row", row, TCAM_ROWS)?;
        check(kind, "entry", entry, TCAM_DEPTH)?;
        Self::new(stage, kind, tcam_offset(col, row, entry))
    }

    /// Address of a unit RAM line.
    pub fn sram(stage: usize, row: usize, col: usize, line: usize) -> Result<Self, MemoryError> {
        let kind = MemoryKind::Sram;
        check(kind, "row", row, SRAM_ROWS)?;
        check(kind, "column", col, SRAM_COLS)?;
        check(kind, "line", line, SRAM_DEPTH)?;
        Self::new(stage, kind, sram_offset(row, col, line))
    }

    /// Address of an instruction memory slot.
    pub fn imem(stage: usize, instruction: usize, slot: usize) -> Result<Self, MemoryError> {
        let kind = MemoryKind::Imem;
        check(kind, "instruction", instruction, IMEM_DEPTH)?;
        check(kind, "slot", slot, IMEM_SLOTS)?;
        Self::new(stage, kind, imem_offset(instruction, slot))
    }

    /// Address of an action-data entry.
    pub fn action_data(stage: usize, entry: usize) -> Result<Self, MemoryError> {
        let kind = MemoryKind::ActionData;
        check(kind, "entry", entry, ACTION_DATA_DEPTH)?;
        Self::new(stage, kind, entry as u32)
    }

    fn new(stage: usize, kind: MemoryKind, offset: u32) -> Result<Self, MemoryError> {
        if stage >= MAX_STAGES {
            return Err(MemoryError::StageOutOfRange { stage, max: MAX_STAGES });
        }
        Ok(Self {
            stage: stage as u8,
            kind,
            offset,
        })
    }
}

fn check(kind: MemoryKind, coord: &'static str, value: usize, size: usize) -> Result<(), MemoryError> {
    if value >= size {
        return Err(MemoryError::CoordinateOutOfRange { kind, coord, value, size });
    }
    Ok(())
}

/// Offset of a TCAM entry within the stage. Coordinates are not checked.
#[inline]
pub fn tcam_offset(col: usize, row: usize, entry: usize) -> u32 {
    ((col * TCAM_ROWS + row) * TCAM_DEPTH + entry) as u32
}

/// Offset of a unit RAM line within the stage. Coordinates are not checked.
#[inline]
pub fn sram_offset(row: usize, col: usize, line: usize) -> u32 {
    ((row * SRAM_COLS + col) * SRAM_DEPTH + line) as u32
}

/// Offset of an instruction slot within the stage. Coordinates are not checked.
#[inline]
pub fn imem_offset(instruction: usize, slot: usize) -> u32 {
    (instruction * IMEM_SLOTS + slot) as u32
}

impl fmt::Display for TableAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} {}[{}]", self.stage, self.kind, self.offset)
    }
}

/// A 128-bit table word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableWord {
    /// Low 64 bits
    pub word0: u64,
    /// High 64 bits
    pub word1: u64,
}

impl TableWord {
    /// Construct a word.
    pub const fn new(word0: u64, word1: u64) -> Self {
        Self { word0, word1 }
    }

    /// Byte `i` (0..16) in little-endian order across word0 then word1.
    #[inline]
    pub fn byte(&self, i: usize) -> u8 {
        if i < 8 {
            (self.word0 >> (i * 8)) as u8
        } else {
            (self.word1 >> ((i - 8) * 8)) as u8
        }
    }
}

/// Sparse table memories for one stage.
#[derive(Debug, Clone, Default)]
pub struct TableMemories {
    tcam: HashMap<u32, TableWord>,
    sram: HashMap<u32, TableWord>,
    imem: HashMap<u32, TableWord>,
    action_data: HashMap<u32, TableWord>,
}

impl TableMemories {
    /// Create empty memories.
    pub fn new() -> Self {
        Self::default()
    }

    fn bank(&self, kind: MemoryKind) -> &HashMap<u32, TableWord> {
        match kind {
            MemoryKind::Tcam => &self.tcam,
            MemoryKind::Sram => &self.sram,
            MemoryKind::Imem => &self.imem,
            MemoryKind::ActionData => &self.action_data,
        }
    }

    fn bank_mut(&mut self, kind: MemoryKind) -> &mut HashMap<u32, TableWord> {
        match kind {
            MemoryKind::Tcam => &mut self.tcam,
            MemoryKind::Sram => &mut self.sram,
            MemoryKind::Imem => &mut self.imem,
            MemoryKind::ActionData => &mut self.action_data,
        }
    }

    /// Write a word, replacing any previous contents.
    pub fn write(&mut self, kind: MemoryKind, offset: u32, word: TableWord) {
        self.bank_mut(kind).insert(offset, word);
    }

    /// Read a word if it was written since reset.
    #[inline]
    pub fn get(&self, kind: MemoryKind, offset: u32) -> Option<TableWord> {
        self.bank(kind).get(&offset).copied()
    }

    /// Read a word, unwritten rows read as zero.
    #[inline]
    pub fn read(&self, kind: MemoryKind, offset: u32) -> TableWord {
        self.get(kind, offset).unwrap_or_default()
    }

    /// Number of words written in a memory.
    pub fn written(&self, kind: MemoryKind) -> usize {
        self.bank(kind).len()
    }

    /// Iterate over the written words of a memory.
    pub fn iter(&self, kind: MemoryKind) -> impl Iterator<Item = (u32, TableWord)> + '_ {
        self.bank(kind).iter().map(|(&o, &w)| (o, w))
    }

    /// Forget every written word.
    pub fn reset(&mut self) {
        for kind in MemoryKind::ALL {
            self.bank_mut(kind).clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_address_roundtrip() {
        let addr = TableAddress::tcam(2, 1, 3, 17).unwrap();
        assert_eq!(addr.offset as usize, 15 * TCAM_DEPTH + 17);
        assert_eq!(addr.offset, tcam_offset(1, 3, 17));
        let decoded = TableAddress::decode(addr.encode()).unwrap();
        assert_eq!(decoded, addr);
    }

    #[test]
    fn test_decode_errors() {
        let bad_kind = 9u64 << CLASS_SHIFT;
        assert!(matches!(
            TableAddress::decode(bad_kind),
            Err(MemoryError::UnknownKind { kind: 9, .. })
        ));

        let past_end = ((MemoryKind::Imem as u64) << CLASS_SHIFT) | (IMEM_DEPTH * IMEM_SLOTS) as u64;
        assert!(matches!(
            TableAddress::decode(past_end),
            Err(MemoryError::OffsetOutOfRange { kind: MemoryKind::Imem, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_high_bits() {
        let addr = TableAddress::action_data(0, 5).unwrap().encode();
        assert!(TableAddress::decode(addr).is_ok());
        assert_eq!(
            TableAddress::decode((1 << 48) | addr),
            Err(MemoryError::OutOfSpace { address: (1 << 48) | addr })
        );
        assert!(matches!(
            TableAddress::decode(u64::MAX),
            Err(MemoryError::OutOfSpace { .. })
        ));
    }

    #[test]
    fn test_constructors_check_coordinates() {
        assert_eq!(
            TableAddress::imem(256, 0, 0),
            Err(MemoryError::StageOutOfRange { stage: 256, max: MAX_STAGES })
        );
        assert!(TableAddress::tcam(MAX_STAGES, 0, 0, 0).is_err());
        assert!(matches!(
            TableAddress::tcam(0, 2, 0, 0),
            Err(MemoryError::CoordinateOutOfRange { coord: "column", value: 2, .. })
        ));
        assert!(TableAddress::tcam(0, 0, 0, TCAM_DEPTH).is_err());
        assert!(TableAddress::sram(0, SRAM_ROWS, 0, 0).is_err());
        assert!(TableAddress::sram(0, 0, 0, SRAM_DEPTH).is_err());
        assert!(TableAddress::imem(0, 0, IMEM_SLOTS).is_err());
        assert!(TableAddress::action_data(0, ACTION_DATA_DEPTH).is_err());

        // The last entry of each memory still decodes
        let last = TableAddress::sram(MAX_STAGES - 1, SRAM_ROWS - 1, SRAM_COLS - 1, SRAM_DEPTH - 1).unwrap();
        assert_eq!(TableAddress::decode(last.encode()).unwrap(), last);
    }

    #[test]
    fn test_unwritten_reads_zero() {
        let mems = TableMemories::new();
        assert_eq!(mems.get(MemoryKind::Sram, 5), None);
        assert_eq!(mems.read(MemoryKind::Sram, 5), TableWord::default());
    }

    #[test]
    fn test_write_replaces() {
        let mut mems = TableMemories::new();
        mems.write(MemoryKind::Tcam, 4, TableWord::new(1, 2));
        mems.write(MemoryKind::Tcam, 4, TableWord::new(3, 4));
        assert_eq!(mems.read(MemoryKind::Tcam, 4), TableWord::new(3, 4));
        assert_eq!(mems.written(MemoryKind::Tcam), 1);
        assert_eq!(mems.written(MemoryKind::Sram), 0);

        mems.reset();
        assert_eq!(mems.written(MemoryKind::Tcam), 0);
    }

    #[test]
    fn test_word_bytes() {
        let word = TableWord::new(0x0807_0605_0403_0201, 0x100F_0E0D_0C0B_0A09);
        for i in 0..16 {
            assert_eq!(word.byte(i), (i + 1) as u8);
        }
    }
}
