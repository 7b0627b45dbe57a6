//! Chip revision register layouts.
//!
//! Some logical controls are backed by a different set of physical registers
//! depending on the silicon revision. On B0 the action bus byte control was
//! split: besides the per-byte control register, each byte must also be
//! enabled in a per-half enable register, and the datapath ignores bytes
//! whose half-enable bit is clear.
//!
//! Rather than duplicating write sequences at every call site, each revision
//! carries a fan-out table mapping a logical control to its physical targets.
//!
//! # Example
//!
//! ```
//! use mau_model::device::layout::{layout_for, LogicalControl};
//! use mau_model::device::ChipRev;
//!
//! let writes = layout_for(ChipRev::B0)
//!     .physical_writes(0, LogicalControl::ActionBusByte { byte: 3, value: 0x12 })
//!     .unwrap();
//! assert_eq!(writes.len(), 2);
//! ```

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use super::regfile::RegisterFile;
use super::registers::{RegClass, RegWrite, RegisterError};
use super::registers_spec::action_hv;
use super::ChipRev;

/// A logical control value, independent of revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalControl {
    /// Action bus byte routing (`action_hv_xbar_ctl_byte` encoding)
    ActionBusByte {
        /// Action bus byte (0..16)
        byte: usize,
        /// Source byte and enable
        value: u64,
    },
    /// Exact-match row search bus (`exactmatch_row_vh_xbar_ctl` encoding)
    RowVhXbar {
        /// Unit RAM row
        row: usize,
        /// Group, enable and rotation
        value: u64,
    },
}

impl LogicalControl {
    fn kind(&self) -> ControlKind {
        match self {
            LogicalControl::ActionBusByte { .. } => ControlKind::ActionBusByte,
            LogicalControl::RowVhXbar { .. } => ControlKind::RowVhXbar,
        }
    }
}

/// Logical control kinds keyed in the fan-out tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// See [`LogicalControl::ActionBusByte`]
    ActionBusByte,
    /// See [`LogicalControl::RowVhXbar`]
    RowVhXbar,
}

/// Physical register a logical control lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalTarget {
    /// `action_hv_xbar_ctl_byte[byte]`, whole register
    ActionHvCtlByte,
    /// `action_hv_xbar_half_enable[byte / 8]`, one bit
    ActionHvHalfEnableBit,
    /// `exactmatch_row_vh_xbar_ctl[row]`, whole register
    RowVhXbarCtl,
}

/// One row of a revision fan-out table.
#[derive(Debug)]
pub struct Fanout {
    /// Logical control
    pub control: ControlKind,
    /// Physical registers written, in order
    pub targets: &'static [PhysicalTarget],
}

static A0_FANOUT: &[Fanout] = &[
    Fanout {
        control: ControlKind::ActionBusByte,
        targets: &[PhysicalTarget::ActionHvCtlByte],
    },
    Fanout {
        control: ControlKind::RowVhXbar,
        targets: &[PhysicalTarget::RowVhXbarCtl],
    },
];

static B0_FANOUT: &[Fanout] = &[
    Fanout {
        control: ControlKind::ActionBusByte,
        targets: &[PhysicalTarget::ActionHvCtlByte, PhysicalTarget::ActionHvHalfEnableBit],
    },
    Fanout {
        control: ControlKind::RowVhXbar,
        targets: &[PhysicalTarget::RowVhXbarCtl],
    },
];

/// Revision-specific register layout.
///
/// Implementations supply the fan-out table and the read side of every
/// control whose physical layout differs between revisions.
pub trait RevisionLayout: Send + Sync + fmt::Debug {
    /// Revision this layout describes.
    fn rev(&self) -> ChipRev;

    /// Fan-out table for this revision.
    fn fanout(&self) -> &'static [Fanout];

    /// Whether action bus byte `byte` is driven.
    fn action_byte_enabled(&self, regs: &RegisterFile, byte: usize) -> bool;

    /// Physical targets for a control kind (empty if the kind is not mapped).
    fn targets(&self, control: ControlKind) -> &'static [PhysicalTarget] {
        self.fanout()
            .iter()
            .find(|f| f.control == control)
            .map(|f| f.targets)
            .unwrap_or(&[])
    }

    /// Expand a logical control into physical register writes.
    fn physical_writes(
        &self,
        stage: usize,
        control: LogicalControl,
    ) -> Result<SmallVec<[RegWrite; 2]>, RegisterError> {
        let mut writes = SmallVec::new();
        for target in self.targets(control.kind()) {
            let write = match (*target, control) {
                (PhysicalTarget::ActionHvCtlByte, LogicalControl::ActionBusByte { byte, value }) => {
                    RegWrite::full(RegClass::ActionHvXbarCtlByte.address(stage, &[byte])?, value)
                }
                (PhysicalTarget::ActionHvHalfEnableBit, LogicalControl::ActionBusByte { byte, value }) => {
                    let bit = 1u64 << (byte % 8);
                    let on = if value & action_hv::ENABLE != 0 { bit } else { 0 };
                    RegWrite::masked(RegClass::ActionHvXbarHalfEnable.address(stage, &[byte / 8])?, bit, on)
                }
                (PhysicalTarget::RowVhXbarCtl, LogicalControl::RowVhXbar { row, value }) => {
                    RegWrite::full(RegClass::ExactmatchRowVhXbarCtl.address(stage, &[row])?, value)
                }
                _ => continue,
            };
            writes.push(write);
        }
        Ok(writes)
    }
}

/// Revision A0 layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct RevA0;

impl RevisionLayout for RevA0 {
    fn rev(&self) -> ChipRev {
        ChipRev::A0
    }

    fn fanout(&self) -> &'static [Fanout] {
        A0_FANOUT
    }

    fn action_byte_enabled(&self, regs: &RegisterFile, byte: usize) -> bool {
        regs.read(RegClass::ActionHvXbarCtlByte, byte) & action_hv::ENABLE != 0
    }
}

/// Revision B0 layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct RevB0;

impl RevisionLayout for RevB0 {
    fn rev(&self) -> ChipRev {
        ChipRev::B0
    }

    fn fanout(&self) -> &'static [Fanout] {
        B0_FANOUT
    }

    fn action_byte_enabled(&self, regs: &RegisterFile, byte: usize) -> bool {
        let ctl = regs.read(RegClass::ActionHvXbarCtlByte, byte) & action_hv::ENABLE != 0;
        let half = regs.read(RegClass::ActionHvXbarHalfEnable, byte / 8) & (1 << (byte % 8)) != 0;
        ctl && half
    }
}

/// Layout for a revision.
pub fn layout_for(rev: ChipRev) -> Arc<dyn RevisionLayout> {
    match rev {
        ChipRev::A0 => Arc::new(RevA0),
        ChipRev::B0 => Arc::new(RevB0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::registers::RegisterAddress;

    fn apply(regs: &mut RegisterFile, writes: &[RegWrite]) {
        for w in writes {
            let reg = RegisterAddress::decode(w.address).unwrap();
            let old = regs.read(reg.class, reg.index as usize);
            regs.write(reg.class, reg.index as usize, (old & !w.mask) | (w.value & w.mask));
        }
    }

    #[test]
    fn test_a0_single_target() {
        let writes = RevA0
            .physical_writes(0, LogicalControl::ActionBusByte { byte: 9, value: 0x13 })
            .unwrap();
        assert_eq!(writes.len(), 1);
        assert!(writes[0].is_full());
    }

    #[test]
    fn test_b0_fans_out_to_half_enable() {
        let writes = RevB0
            .physical_writes(1, LogicalControl::ActionBusByte { byte: 9, value: 0x13 })
            .unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(
            writes[1].address,
            RegClass::ActionHvXbarHalfEnable.address(1, &[1]).unwrap()
        );
        assert_eq!(writes[1].mask, 1 << 1);
        assert_eq!(writes[1].value, 1 << 1);
    }

    #[test]
    fn test_b0_requires_half_enable() {
        let mut regs = RegisterFile::new();

        // Writing only the primary register is enough on A0 but not on B0
        let primary = RevA0
            .physical_writes(0, LogicalControl::ActionBusByte { byte: 2, value: action_hv::ENABLE })
            .unwrap();
        apply(&mut regs, &primary);
        assert!(RevA0.action_byte_enabled(&regs, 2));
        assert!(!RevB0.action_byte_enabled(&regs, 2));

        let full = RevB0
            .physical_writes(0, LogicalControl::ActionBusByte { byte: 2, value: action_hv::ENABLE })
            .unwrap();
        apply(&mut regs, &full);
        assert!(RevB0.action_byte_enabled(&regs, 2));
    }

    #[test]
    fn test_half_enable_bits_independent() {
        let mut regs = RegisterFile::new();
        for byte in [0usize, 3, 7] {
            let w = RevB0
                .physical_writes(0, LogicalControl::ActionBusByte { byte, value: action_hv::ENABLE })
                .unwrap();
            apply(&mut regs, &w);
        }
        assert_eq!(regs.read(RegClass::ActionHvXbarHalfEnable, 0), 0b1000_1001);

        // Disabling one byte leaves its neighbours alone
        let w = RevB0
            .physical_writes(0, LogicalControl::ActionBusByte { byte: 3, value: 0 })
            .unwrap();
        apply(&mut regs, &w);
        assert_eq!(regs.read(RegClass::ActionHvXbarHalfEnable, 0), 0b1000_0001);
    }

    #[test]
    fn test_row_vh_xbar_same_on_both() {
        let ctl = LogicalControl::RowVhXbar { row: 4, value: 0x2A };
        assert_eq!(
            RevA0.physical_writes(0, ctl).unwrap().as_slice(),
            RevB0.physical_writes(0, ctl).unwrap().as_slice()
        );
    }

    #[test]
    fn test_out_of_range_byte() {
        assert!(RevA0
            .physical_writes(0, LogicalControl::ActionBusByte { byte: 16, value: 0 })
            .is_err());
    }
}
