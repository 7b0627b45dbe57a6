//! Register space, table memories and chip state for the MAU model.
//!
//! This module provides:
//! - Register classes and the flat register address decoder
//! - Per-stage register storage and sparse table memories
//! - Revision-specific register layouts (logical control fan-out)
//! - Pure translators from logical controls to register writes
//! - The chip: a set of stages behind the write / table-write / evaluate / reset boundary
//!
//! # Example
//!
//! ```
//! use mau_model::device::{Chip, ChipRev, RegClass};
//!
//! let mut chip = Chip::new(ChipRev::A0, 2);
//! let addr = RegClass::PredicationCtl.address(1, &[0]).unwrap();
//! chip.write(addr, 0x3).unwrap();
//! assert_eq!(chip.read(addr).unwrap(), 0x3);
//! ```

pub mod registers_spec;
pub mod registers;
pub mod regfile;
pub mod memories;
pub mod layout;
pub mod translate;
pub mod state;

use std::fmt;
use std::str::FromStr;

pub use registers::{format_address, RegClass, RegWrite, RegisterAddress, RegisterError};
pub use regfile::RegisterFile;
pub use memories::{
    imem_offset, sram_offset, tcam_offset, MemoryError, MemoryKind, TableAddress, TableMemories, TableWord,
};
pub use layout::{LogicalControl, RevisionLayout};
pub use state::{Chip, ModelError, ModelStats, PipelineOutput, SharedChip};

/// Silicon revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChipRev {
    /// First revision
    #[default]
    A0,
    /// Second revision (action bus half-enable workaround)
    B0,
}

impl FromStr for ChipRev {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A0" => Ok(ChipRev::A0),
            "B0" => Ok(ChipRev::B0),
            other => Err(format!("unknown chip revision '{}'", other)),
        }
    }
}

impl fmt::Display for ChipRev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChipRev::A0 => write!(f, "A0"),
            ChipRev::B0 => write!(f, "B0"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chip_rev_parse() {
        assert_eq!("a0".parse::<ChipRev>(), Ok(ChipRev::A0));
        assert_eq!("B0".parse::<ChipRev>(), Ok(ChipRev::B0));
        assert!("C1".parse::<ChipRev>().is_err());
    }

    #[test]
    fn test_chip_rev_display() {
        assert_eq!(ChipRev::B0.to_string(), "B0");
        assert_eq!(ChipRev::default(), ChipRev::A0);
    }
}
