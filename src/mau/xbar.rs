//! Crossbar selector.
//!
//! Gathers PHV bytes into the exact-match bus (hash and row search input)
//! and the ternary search keys. Every lane is a small selector register;
//! a disabled lane, or one that names an invalid container, reads 0.
//!
//! # Ternary key layout
//!
//! ```text
//! bits 39:0   five group bytes, byte 0 in bits 7:0
//! bits 43:40  nibble from the shared mid byte
//! bits 45:44  two container valid bits
//! ```

use crate::device::registers_spec::{
    lane, validbit, vh_xbar, EXACT_BUS_BYTES, EXACT_GROUPS, EXACT_GROUP_BYTES, SRAM_ROWS,
    TERNARY_GROUPS, TERNARY_GROUP_BYTES, TERNARY_VALID_LANES,
};
use crate::device::{RegClass, RegisterFile};

use super::phv::Phv;

/// Exact-match bus contents.
pub type ExactBus = [u8; EXACT_BUS_BYTES];

/// Row search bus contents (one exact group, rotated).
pub type RowBus = [u8; EXACT_GROUP_BYTES];

/// A crossbar lane position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneSpec {
    /// Byte `byte` of exact group `group`
    ExactByte { group: usize, byte: usize },
    /// Byte `byte` of ternary group `group`
    TernaryByte { group: usize, byte: usize },
    /// Nibble of ternary group `group` (taken from the shared mid byte)
    TernaryNibble { group: usize },
    /// Byte `byte` of unit RAM row `row`'s search bus
    RowByte { row: usize, byte: usize },
}

/// Which half of a byte a nibble lane reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nibble {
    /// Bits 3:0
    Low,
    /// Bits 7:4
    High,
}

/// PHV byte a lane resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhvLaneRef {
    /// PHV container
    pub container: usize,
    /// Byte within the container
    pub byte: usize,
    /// Half of the byte, for nibble lanes
    pub nibble: Option<Nibble>,
    /// Byte rotation applied on the way to the lane (row search bus only)
    pub rotate: usize,
}

impl PhvLaneRef {
    /// Read the lane from a PHV.
    #[inline]
    pub fn read(&self, phv: &Phv) -> u8 {
        let b = phv.byte(self.container, self.byte);
        match self.nibble {
            None => b,
            Some(Nibble::Low) => b & 0xF,
            Some(Nibble::High) => b >> 4,
        }
    }
}

/// Decode a lane selector register, `None` if the lane is disabled.
#[inline]
fn decode_lane(value: u64) -> Option<(usize, usize)> {
    if value & lane::ENABLE == 0 {
        return None;
    }
    Some((
        (value & lane::CONTAINER_MASK) as usize,
        ((value >> lane::BYTE_SHIFT) & lane::BYTE_MASK) as usize,
    ))
}

/// Crossbar view over one stage's registers.
#[derive(Debug, Clone, Copy)]
pub struct Crossbar<'a> {
    regs: &'a RegisterFile,
}

impl<'a> Crossbar<'a> {
    /// Create a crossbar view.
    pub fn new(regs: &'a RegisterFile) -> Self {
        Self { regs }
    }

    /// Resolve a lane to the PHV byte feeding it. `None` means tie-low.
    pub fn select(&self, spec: LaneSpec) -> Option<PhvLaneRef> {
        match spec {
            LaneSpec::ExactByte { group, byte } => {
                let (container, b) = decode_lane(self.regs.get(RegClass::ExactXbarCtl, &[group, byte]))?;
                Some(PhvLaneRef { container, byte: b, nibble: None, rotate: 0 })
            }
            LaneSpec::TernaryByte { group, byte } => {
                let (container, b) = decode_lane(self.regs.get(RegClass::TernaryXbarCtl, &[group, byte]))?;
                Some(PhvLaneRef { container, byte: b, nibble: None, rotate: 0 })
            }
            LaneSpec::TernaryNibble { group } => {
                if group >= TERNARY_GROUPS {
                    return None;
                }
                let ctl = self.regs.get(RegClass::TernaryMidByteCtl, &[group / 2]);
                let (container, b) = decode_lane(ctl)?;
                let swap = ctl & lane::NIBBLE_SWAP != 0;
                let high = (group % 2 == 1) ^ swap;
                Some(PhvLaneRef {
                    container,
                    byte: b,
                    nibble: Some(if high { Nibble::High } else { Nibble::Low }),
                    rotate: 0,
                })
            }
            LaneSpec::RowByte { row, byte } => {
                let (group, rotate) = self.row_source(row)?;
                if byte >= EXACT_GROUP_BYTES {
                    return None;
                }
                let src = (byte + rotate) % EXACT_GROUP_BYTES;
                let lane = self.select(LaneSpec::ExactByte { group, byte: src })?;
                Some(PhvLaneRef { rotate, ..lane })
            }
        }
    }

    /// Exact group and rotation feeding a unit RAM row, `None` if disabled.
    pub fn row_source(&self, row: usize) -> Option<(usize, usize)> {
        if row >= SRAM_ROWS {
            return None;
        }
        let ctl = self.regs.get(RegClass::ExactmatchRowVhXbarCtl, &[row]);
        if ctl & vh_xbar::ENABLE == 0 {
            return None;
        }
        Some((
            (ctl & vh_xbar::GROUP_MASK) as usize,
            ((ctl >> vh_xbar::ROTATE_SHIFT) & vh_xbar::ROTATE_MASK) as usize,
        ))
    }

    /// Assemble the full exact-match bus.
    pub fn exact_bus(&self, phv: &Phv) -> ExactBus {
        let mut bus = [0u8; EXACT_BUS_BYTES];
        for group in 0..EXACT_GROUPS {
            for byte in 0..EXACT_GROUP_BYTES {
                if let Some(lane) = self.select(LaneSpec::ExactByte { group, byte }) {
                    bus[group * EXACT_GROUP_BYTES + byte] = lane.read(phv);
                }
            }
        }
        bus
    }

    /// 32-bit word `word` (0..4) of an exact group, little-endian.
    pub fn exact_word(bus: &ExactBus, group: usize, word: usize) -> u32 {
        let base = group * EXACT_GROUP_BYTES + word * 4;
        match bus.get(base..base + 4) {
            Some(b) => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            None => 0,
        }
    }

    /// Row search bus for a unit RAM row: the row's exact group, rotated.
    /// A disabled row sees all zeros.
    pub fn row_search(&self, bus: &ExactBus, row: usize) -> RowBus {
        let mut out = [0u8; EXACT_GROUP_BYTES];
        if let Some((group, rotate)) = self.row_source(row) {
            let base = group * EXACT_GROUP_BYTES;
            for (b, slot) in out.iter_mut().enumerate() {
                *slot = bus[base + (b + rotate) % EXACT_GROUP_BYTES];
            }
        }
        out
    }

    /// Ternary search key for one group.
    pub fn ternary_key(&self, phv: &Phv, group: usize) -> u64 {
        let mut key = 0u64;
        for byte in 0..TERNARY_GROUP_BYTES {
            if let Some(lane) = self.select(LaneSpec::TernaryByte { group, byte }) {
                key |= (lane.read(phv) as u64) << (byte * 8);
            }
        }
        if let Some(lane) = self.select(LaneSpec::TernaryNibble { group }) {
            key |= (lane.read(phv) as u64) << 40;
        }
        for v in 0..TERNARY_VALID_LANES {
            let ctl = self.regs.get(RegClass::TcamValidbitXbarCtl, &[group, v]);
            if ctl & validbit::ENABLE != 0 && phv.is_valid((ctl & validbit::CONTAINER_MASK) as usize) {
                key |= 1 << (44 + v);
            }
        }
        key
    }

    /// Search keys for every ternary group.
    pub fn ternary_keys(&self, phv: &Phv) -> [u64; TERNARY_GROUPS] {
        let mut keys = [0u64; TERNARY_GROUPS];
        for (group, key) in keys.iter_mut().enumerate() {
            *key = self.ternary_key(phv, group);
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::translate::lane_value;

    fn set(regs: &mut RegisterFile, class: RegClass, coords: &[usize], value: u64) {
        let idx = class.flatten(coords).unwrap() as usize;
        regs.write(class, idx, value);
    }

    fn sample_phv() -> Phv {
        let mut phv = Phv::default();
        phv.set(0, 0x4433_2211);
        phv.set(70, 0xA5);
        phv.set(130, 0xBEEF);
        phv
    }

    #[test]
    fn test_unconfigured_lane_ties_low() {
        let regs = RegisterFile::new();
        let xbar = Crossbar::new(&regs);
        assert_eq!(xbar.select(LaneSpec::ExactByte { group: 0, byte: 0 }), None);
        assert!(xbar.exact_bus(&sample_phv()).iter().all(|&b| b == 0));
        assert_eq!(xbar.ternary_key(&sample_phv(), 3), 0);
    }

    #[test]
    fn test_exact_bus() {
        let mut regs = RegisterFile::new();
        set(&mut regs, RegClass::ExactXbarCtl, &[1, 0], lane_value(0, 2));
        set(&mut regs, RegClass::ExactXbarCtl, &[1, 1], lane_value(130, 1));
        // Invalid container reads 0 even though the lane is enabled
        set(&mut regs, RegClass::ExactXbarCtl, &[1, 2], lane_value(5, 0));
        let bus = Crossbar::new(&regs).exact_bus(&sample_phv());
        assert_eq!(bus[16], 0x33);
        assert_eq!(bus[17], 0xBE);
        assert_eq!(bus[18], 0);
        assert_eq!(Crossbar::exact_word(&bus, 1, 0), 0x0000_BE33);
    }

    #[test]
    fn test_fan_out_same_byte() {
        let mut regs = RegisterFile::new();
        set(&mut regs, RegClass::ExactXbarCtl, &[0, 0], lane_value(70, 0));
        set(&mut regs, RegClass::ExactXbarCtl, &[5, 9], lane_value(70, 0));
        set(&mut regs, RegClass::TernaryXbarCtl, &[2, 4], lane_value(70, 0));
        let xbar = Crossbar::new(&regs);
        let bus = xbar.exact_bus(&sample_phv());
        assert_eq!(bus[0], 0xA5);
        assert_eq!(bus[5 * 16 + 9], 0xA5);
        assert_eq!(xbar.ternary_key(&sample_phv(), 2), 0xA5 << 32);
    }

    #[test]
    fn test_mid_byte_nibbles() {
        let mut regs = RegisterFile::new();
        set(&mut regs, RegClass::TernaryMidByteCtl, &[1], lane_value(70, 0));
        let xbar = Crossbar::new(&regs);
        let phv = sample_phv();
        assert_eq!(xbar.ternary_key(&phv, 2), 0x5 << 40);
        assert_eq!(xbar.ternary_key(&phv, 3), 0xA << 40);

        set(&mut regs, RegClass::TernaryMidByteCtl, &[1], lane_value(70, 0) | lane::NIBBLE_SWAP);
        let xbar = Crossbar::new(&regs);
        assert_eq!(xbar.ternary_key(&phv, 2), 0xA << 40);
        assert_eq!(xbar.ternary_key(&phv, 3), 0x5 << 40);
    }

    #[test]
    fn test_valid_bits() {
        let mut regs = RegisterFile::new();
        set(&mut regs, RegClass::TcamValidbitXbarCtl, &[0, 0], 70 | validbit::ENABLE);
        set(&mut regs, RegClass::TcamValidbitXbarCtl, &[0, 1], 71 | validbit::ENABLE);
        let key = Crossbar::new(&regs).ternary_key(&sample_phv(), 0);
        assert_eq!(key, 1 << 44);
    }

    #[test]
    fn test_row_search_rotation() {
        let mut regs = RegisterFile::new();
        for b in 0..4 {
            set(&mut regs, RegClass::ExactXbarCtl, &[2, b], lane_value(0, b));
        }
        set(
            &mut regs,
            RegClass::ExactmatchRowVhXbarCtl,
            &[3],
            2 | vh_xbar::ENABLE | (1 << vh_xbar::ROTATE_SHIFT),
        );
        let xbar = Crossbar::new(&regs);
        let bus = xbar.exact_bus(&sample_phv());
        let row = xbar.row_search(&bus, 3);
        assert_eq!(&row[..4], &[0x22, 0x33, 0x44, 0x00]);
        assert_eq!(row[15], 0x11);

        let lane = xbar.select(LaneSpec::RowByte { row: 3, byte: 0 }).unwrap();
        assert_eq!(lane.container, 0);
        assert_eq!(lane.byte, 1);
        assert_eq!(lane.rotate, 1);

        // Row 0 has no vh xbar enable
        assert!(xbar.row_search(&bus, 0).iter().all(|&b| b == 0));
    }
}
