//! MAU register classes and address decoder.
//!
//! Every configuration register belongs to a class: a named, fixed-width,
//! multi-dimensional array replicated per stage. Registers are addressed
//! by a flat 48-bit value rather than by a nested struct path.
//!
//! # Address Encoding
//!
//! ```text
//! 64-bit address: [unused:16][stage:8][class:8][index:32]
//!
//!   STAGE_SHIFT = 40
//!   CLASS_SHIFT = 32
//!   index       = row-major flattening of the class dimensions
//! ```

use std::fmt;

use smallvec::SmallVec;
use thiserror::Error;

use super::registers_spec::{
    ADDRESS_MASK, CLASS_SHIFT, EXACT_GROUPS, EXACT_GROUP_BYTES, GALOIS_WORDS, HASH_FUNCTIONS,
    HASH_OUTPUT_BITS, HASH_PARITY_GROUPS, INDEX_MASK, LOGICAL_TABLES, LOGICAL_TCAM_TABLES,
    SRAM_COLS, SRAM_ROWS, STAGE_SHIFT, TCAM_COLS, TCAM_ROWS, TERNARY_GROUPS,
    TERNARY_GROUP_BYTES, TERNARY_MID_BYTES, TERNARY_VALID_LANES, THREADS, ACTION_BUS_BYTES,
    MAX_STAGES,
};

/// Errors raised while decoding or validating a register address.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegisterError {
    /// Address has bits set above the 48-bit address space.
    #[error("address 0x{address:X} is outside the register address space")]
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

    /// Class id does not name a register class.
    #[error("unknown register class {class} in address 0x{address:012X}")]
    UnknownClass {
        /// Raw address.
        address: u64,
        /// Class id found in the address.
        class: u8,
    },

    /// Flattened index is past the end of the class.
    #[error("index {index} out of range for {class} ({size} registers)")]
    IndexOutOfRange {
        /// Class name.
        class: &'static str,
        /// Offending index.
        index: u64,
        /// Number of registers in the class.
        size: usize,
    },

    /// Wrong number of coordinates for the class.
    #[error("{class} takes {expected} coordinates, got {got}")]
    DimensionMismatch {
        /// Class name.
        class: &'static str,
        /// Dimensions of the class.
        expected: usize,
        /// Coordinates supplied.
        got: usize,
    },

    /// Value has bits set above the register width (strict mode only).
    #[error("value 0x{value:X} does not fit {class} ({width} bits)")]
    ValueTooWide {
        /// Class name.
        class: &'static str,
        /// Value written.
        value: u64,
        /// Register width.
        width: u32,
    },
}

/// Static description of a register class.
#[derive(Debug)]
pub struct ClassInfo {
    /// Register name
    pub name: &'static str,
    /// Array dimensions (row-major)
    pub dims: &'static [usize],
    /// Width in bits
    pub width: u32,
    /// Brief description
    pub description: &'static str,
}

impl ClassInfo {
    /// Number of registers in the class.
    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    /// Whether the class is empty (never true for defined classes).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mask of the bits a register of this class holds.
    pub fn value_mask(&self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }
}

macro_rules! reg_classes {
    ($($variant:ident = $id:literal => $name:literal, [$($dim:expr),+], $width:literal, $desc:literal;)+) => {
        /// Register class (one array of identically-shaped registers).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum RegClass {
            $(
                #[doc = $desc]
                $variant = $id,
            )+
        }

        impl RegClass {
            /// All register classes in id order.
            pub const ALL: &'static [RegClass] = &[$(RegClass::$variant),+];

            /// Decode a class id.
            pub fn from_id(id: u8) -> Option<Self> {
                match id {
                    $($id => Some(RegClass::$variant),)+
                    _ => None,
                }
            }

            /// Static class description.
            pub fn info(self) -> &'static ClassInfo {
                match self {
                    $(
                        RegClass::$variant => {
                            static INFO: ClassInfo = ClassInfo {
                                name: $name,
                                dims: &[$($dim),+],
                                width: $width,
                                description: $desc,
                            };
                            &INFO
                        }
                    )+
                }
            }
        }
    };
}

reg_classes! {
    ExactXbarCtl = 1 => "exact_xbar_ctl", [EXACT_GROUPS, EXACT_GROUP_BYTES], 12,
        "Exact-match crossbar byte lane selector";
    TernaryXbarCtl = 2 => "ternary_xbar_ctl", [TERNARY_GROUPS, TERNARY_GROUP_BYTES], 12,
        "Ternary crossbar byte lane selector";
    TernaryMidByteCtl = 3 => "tcam_extra_byte_ctl", [TERNARY_MID_BYTES], 12,
        "Shared ternary mid byte (nibble) selector";
    TcamValidbitXbarCtl = 4 => "tcam_validbit_xbar_ctl", [TERNARY_GROUPS, TERNARY_VALID_LANES], 9,
        "Container valid bit selector for the ternary key";
    HashGroupEnable = 5 => "hash_group_enable", [HASH_FUNCTIONS], 8,
        "Exact bus groups feeding each hash function";
    GaloisFieldMatrix = 6 => "galois_field_matrix", [HASH_FUNCTIONS, HASH_OUTPUT_BITS, GALOIS_WORDS], 32,
        "Galois matrix row slice (32 input bits)";
    HashSeed = 7 => "hash_seed", [HASH_FUNCTIONS], 52,
        "Hash seed XORed into the output";
    HashParityCtl = 8 => "hash_parity_ctl", [HASH_FUNCTIONS, HASH_PARITY_GROUPS], 7,
        "Parity group destination bit and enable";
    HashParityMask = 9 => "hash_parity_mask", [HASH_FUNCTIONS, HASH_PARITY_GROUPS], 52,
        "Parity group source bit mask";
    TcamMode = 10 => "tcam_mode", [TCAM_COLS, TCAM_ROWS], 12,
        "TCAM unit enable, input group, chaining and priority";
    TcamTableMap = 11 => "tcam_table_map", [LOGICAL_TCAM_TABLES], 24,
        "TCAM units belonging to each logical TCAM table";
    TcamOutputTableThread = 12 => "tcam_output_table_thread", [LOGICAL_TCAM_TABLES], 2,
        "Threads for which a logical TCAM table reports";
    TcamHitOutputmap = 13 => "tcam_hit_to_logical_table_ixbar_outputmap", [LOGICAL_TCAM_TABLES], 5,
        "Logical table receiving a logical TCAM table's hit";
    UnitramCtl = 14 => "unitram_ctl", [SRAM_ROWS, SRAM_COLS], 11,
        "Unit RAM match enable, hash function, table and way";
    ExactmatchBankEnable = 15 => "exactmatch_bank_enable", [SRAM_ROWS], 12,
        "Enabled unit RAM banks per row";
    RowHashAdrXbar = 16 => "row_hash_adr_xbar", [SRAM_ROWS, SRAM_COLS], 6,
        "Hash bit offset of the unit RAM line address";
    MemHashAdrXbar = 17 => "mem_hash_adr_xbar", [SRAM_ROWS, SRAM_COLS], 14,
        "Hash bits selecting the unit RAM within a way";
    ExactmatchRowVhXbarCtl = 18 => "exactmatch_row_vh_xbar_ctl", [SRAM_ROWS], 8,
        "Exact bus group and byte rotation feeding a row";
    MatchKeyMask = 19 => "match_key_mask", [SRAM_ROWS, SRAM_COLS], 64,
        "Search key bits compared against the stored key";
    LogicalTableCtl = 20 => "logical_table_ctl", [LOGICAL_TABLES], 3,
        "Result sources and precedence per logical table";
    PredicationCtl = 21 => "predication_ctl", [THREADS], 16,
        "Logical tables active per thread";
    InstrAdrShiftcount = 22 => "mau_action_instruction_adr_shiftcount", [LOGICAL_TABLES], 5,
        "Hit address shift for the instruction address";
    InstrAdrMask = 23 => "mau_action_instruction_adr_mask", [LOGICAL_TABLES], 6,
        "Instruction address mask";
    InstrAdrDefault = 24 => "mau_action_instruction_adr_default", [LOGICAL_TABLES], 6,
        "Instruction address used on miss";
    ActiondataAdrShiftcount = 25 => "mau_actiondata_adr_shiftcount", [LOGICAL_TABLES], 5,
        "Hit address shift for the action-data address";
    ActiondataAdrMask = 26 => "mau_actiondata_adr_mask", [LOGICAL_TABLES], 12,
        "Action-data address mask";
    ActiondataAdrDefault = 27 => "mau_actiondata_adr_default", [LOGICAL_TABLES], 12,
        "Action-data address used on miss";
    NextTableFormatData = 28 => "next_table_format_data", [LOGICAL_TABLES], 16,
        "Next table on hit and on miss";
    ActionHvXbarCtlByte = 29 => "action_hv_xbar_ctl_byte", [ACTION_BUS_BYTES], 5,
        "Action-data byte routed onto each action bus byte";
    ActionHvXbarHalfEnable = 30 => "action_hv_xbar_half_enable", [ACTION_BUS_BYTES / 8], 8,
        "Action bus byte enables per half (revision B0)";
}

impl RegClass {
    /// Register name.
    #[inline]
    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Register width in bits.
    #[inline]
    pub fn width(self) -> u32 {
        self.info().width
    }

    /// Number of registers in the class.
    #[inline]
    pub fn len(self) -> usize {
        self.info().len()
    }

    /// Flatten coordinates into an index (row-major).
    pub fn flatten(self, coords: &[usize]) -> Result<u32, RegisterError> {
        let info = self.info();
        if coords.len() != info.dims.len() {
            return Err(RegisterError::DimensionMismatch {
                class: info.name,
                expected: info.dims.len(),
                got: coords.len(),
            });
        }

        let mut index = 0usize;
        for (&c, &d) in coords.iter().zip(info.dims) {
            if c >= d {
                return Err(RegisterError::IndexOutOfRange {
                    class: info.name,
                    index: c as u64,
                    size: d,
                });
            }
            index = index * d + c;
        }
        Ok(index as u32)
    }

    /// Expand a flat index back into coordinates.
    pub fn unflatten(self, index: u32) -> SmallVec<[usize; 3]> {
        let info = self.info();
        let mut coords: SmallVec<[usize; 3]> = SmallVec::new();
        let mut rest = index as usize;
        for &d in info.dims.iter().rev() {
            coords.push(rest % d);
            rest /= d;
        }
        coords.reverse();
        coords
    }

    /// Build the full register address for a stage and coordinates.
    pub fn address(self, stage: usize, coords: &[usize]) -> Result<u64, RegisterError> {
        if stage >= MAX_STAGES {
            return Err(RegisterError::StageOutOfRange { stage, max: MAX_STAGES });
        }
        let index = self.flatten(coords)?;
        Ok(RegisterAddress { stage: stage as u8, class: self, index }.encode())
    }
}

impl fmt::Display for RegClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Decoded register address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterAddress {
    /// Pipeline stage
    pub stage: u8,
    /// Register class
    pub class: RegClass,
    /// Flattened index within the class
    pub index: u32,
}

impl RegisterAddress {
    /// Decode a raw address, validating class and index.
    pub fn decode(address: u64) -> Result<Self, RegisterError> {
        if address & !ADDRESS_MASK != 0 {
            return Err(RegisterError::OutOfSpace { address });
        }
        let class_id = ((address >> CLASS_SHIFT) & 0xFF) as u8;
        let class = RegClass::from_id(class_id).ok_or(RegisterError::UnknownClass {
            address,
            class: class_id,
        })?;
        let index = address & INDEX_MASK;
        if index as usize >= class.len() {
            return Err(RegisterError::IndexOutOfRange {
                class: class.name(),
                index,
                size: class.len(),
            });
        }

        Ok(Self {
            stage: ((address >> STAGE_SHIFT) & 0xFF) as u8,
            class,
            index: index as u32,
        })
    }

    /// Encode into a raw address.
    pub fn encode(&self) -> u64 {
        ((self.stage as u64) << STAGE_SHIFT)
            | ((self.class as u64) << CLASS_SHIFT)
            | self.index as u64
    }
}

impl fmt::Display for RegisterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} {}", self.stage, self.class.name())?;
        for c in self.class.unflatten(self.index) {
            write!(f, "[{}]", c)?;
        }
        Ok(())
    }
}

/// One register write: `reg = (reg & !mask) | (value & mask)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegWrite {
    /// Raw register address
    pub address: u64,
    /// Value to write
    pub value: u64,
    /// Bits modified; `u64::MAX` replaces the whole register
    pub mask: u64,
}

impl RegWrite {
    /// Write replacing the whole register.
    pub const fn full(address: u64, value: u64) -> Self {
        Self { address, value, mask: u64::MAX }
    }

    /// Write modifying only the bits in `mask`.
    pub const fn masked(address: u64, mask: u64, value: u64) -> Self {
        Self { address, value, mask }
    }

    /// Whether this write replaces the whole register.
    pub fn is_full(&self) -> bool {
        self.mask == u64::MAX
    }
}

impl fmt::Display for RegWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_full() {
            write!(f, "{} = 0x{:X}", format_address(self.address), self.value)
        } else {
            write!(
                f,
                "{} mask=0x{:X} val=0x{:X}",
                format_address(self.address),
                self.mask,
                self.value
            )
        }
    }
}

/// Format an address for display, falling back to hex for undecodable ones.
pub fn format_address(address: u64) -> String {
    match RegisterAddress::decode(address) {
        Ok(reg) => reg.to_string(),
        Err(_) => format!("0x{:012X} [unmapped]", address),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_ids_roundtrip() {
        for &class in RegClass::ALL {
            assert_eq!(RegClass::from_id(class as u8), Some(class));
        }
        assert_eq!(RegClass::from_id(0), None);
        assert_eq!(RegClass::from_id(0xEE), None);
    }

    #[test]
    fn test_flatten_row_major() {
        assert_eq!(RegClass::TcamMode.flatten(&[0, 0]).unwrap(), 0);
        assert_eq!(RegClass::TcamMode.flatten(&[0, 11]).unwrap(), 11);
        assert_eq!(RegClass::TcamMode.flatten(&[1, 3]).unwrap(), 15);
        assert_eq!(RegClass::TcamMode.unflatten(15).as_slice(), &[1, 3]);
    }

    #[test]
    fn test_flatten_errors() {
        assert!(matches!(
            RegClass::TcamMode.flatten(&[2, 0]),
            Err(RegisterError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            RegClass::TcamMode.flatten(&[1]),
            Err(RegisterError::DimensionMismatch { expected: 2, got: 1, .. })
        ));
    }

    #[test]
    fn test_address_decode() {
        let addr = RegClass::GaloisFieldMatrix.address(3, &[1, 51, 31]).unwrap();
        let reg = RegisterAddress::decode(addr).unwrap();
        assert_eq!(reg.stage, 3);
        assert_eq!(reg.class, RegClass::GaloisFieldMatrix);
        assert_eq!(reg.class.unflatten(reg.index).as_slice(), &[1, 51, 31]);
        assert_eq!(reg.encode(), addr);
    }

    #[test]
    fn test_decode_unknown_class() {
        let addr = (0x7Fu64 << CLASS_SHIFT) | 4;
        assert!(matches!(
            RegisterAddress::decode(addr),
            Err(RegisterError::UnknownClass { class: 0x7F, .. })
        ));
    }

    #[test]
    fn test_decode_index_past_end() {
        let addr = ((RegClass::PredicationCtl as u64) << CLASS_SHIFT) | 2;
        assert!(matches!(
            RegisterAddress::decode(addr),
            Err(RegisterError::IndexOutOfRange { size: 2, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_high_bits() {
        let addr = RegClass::InstrAdrDefault.address(0, &[3]).unwrap();
        for high in [1u64 << 48, 1 << 63, 0xFFFF << 48] {
            assert_eq!(
                RegisterAddress::decode(high | addr),
                Err(RegisterError::OutOfSpace { address: high | addr })
            );
        }
        assert!(RegisterAddress::decode(addr).is_ok());
    }

    #[test]
    fn test_address_stage_not_wrapped() {
        assert!(RegClass::HashSeed.address(MAX_STAGES - 1, &[0]).is_ok());
        for stage in [MAX_STAGES, 256, 257] {
            assert_eq!(
                RegClass::HashSeed.address(stage, &[0]),
                Err(RegisterError::StageOutOfRange { stage, max: MAX_STAGES })
            );
        }
    }

    #[test]
    fn test_format_address() {
        let addr = RegClass::TcamMode.address(0, &[1, 3]).unwrap();
        assert_eq!(format_address(addr), "stage 0 tcam_mode[1][3]");
        assert!(format_address(0xFF_0000_0000).contains("unmapped"));
    }

    #[test]
    fn test_value_mask() {
        assert_eq!(RegClass::HashSeed.info().value_mask(), (1 << 52) - 1);
        assert_eq!(RegClass::MatchKeyMask.info().value_mask(), u64::MAX);
        assert_eq!(RegClass::LogicalTableCtl.info().value_mask(), 0x7);
    }
}
