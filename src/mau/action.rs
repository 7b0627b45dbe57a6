//! Action engine.
//!
//! An instruction is a group of eight VLIW slots stored in instruction
//! memory. Each slot names one destination container, an opcode and two
//! operands drawn from the PHV, the action-data bus or an immediate.
//!
//! # Slot encoding
//!
//! ```text
//! word0  [3:0]   opcode
//!        [4]     valid
//!        [12:5]  destination container
//!        [14:13] src1 kind (0 PHV, 1 action bus word, 2 immediate, 3 zero)
//!        [22:15] src1 index
//!        [24:23] src2 kind
//!        [32:25] src2 index
//!        [37:33] shift
//!        [42:38] field low bit
//!        [47:43] field high bit
//! word1  [31:0]  immediate
//! ```
//!
//! Every slot reads the stage-input PHV, so slots within one instruction
//! never observe each other's results.

use std::fmt;

use smallvec::SmallVec;
use thiserror::Error;

use crate::device::registers_spec::{action_hv, ACTION_BUS_BYTES, IMEM_DEPTH, IMEM_SLOTS};
use crate::device::{imem_offset, MemoryKind, RegClass, RegisterFile, RevisionLayout, TableMemories, TableWord};

use super::phv::{ContainerSize, Phv};

/// Errors raised while fetching or decoding an instruction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionDecodeError {
    /// No slot of the instruction was written since reset.
    #[error("instruction {0} is not initialized")]
    Uninitialized(usize),

    /// Instruction address past the end of instruction memory.
    #[error("instruction address {0} out of range")]
    AddressOutOfRange(usize),

    /// Opcode field does not name an operation.
    #[error("unknown opcode {opcode} in slot {slot}")]
    UnknownOpcode {
        /// Slot index.
        slot: usize,
        /// Raw opcode.
        opcode: u8,
    },

    /// Destination is not a PHV container.
    #[error("slot {slot} writes container {dst}, past the end of the PHV")]
    BadDestination {
        /// Slot index.
        slot: usize,
        /// Raw destination.
        dst: usize,
    },
}

/// Slot operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Leave the destination alone
    Nop = 0,
    /// dst = src1
    Set = 1,
    /// dst = src1 & src2
    And = 2,
    /// dst = src1 | src2
    Or = 3,
    /// dst = src1 ^ src2
    Xor = 4,
    /// dst = src1 + src2 (wrapping)
    Add = 5,
    /// dst = src1 - src2 (wrapping)
    Sub = 6,
    /// dst = src1 << shift
    Shl = 7,
    /// dst = src1 >> shift
    Shr = 8,
    /// dst[hi:lo] = rotr(src1, shift)[hi:lo], other bits from src2
    DepositField = 9,
    /// dst = !src1
    Not = 10,
    /// dst = min(src1, src2)
    Min = 11,
    /// dst = max(src1, src2)
    Max = 12,
    /// dst = src1 + src2, saturating at the container width
    SaddU = 13,
    /// Clear the destination's valid bit
    Invalidate = 14,
}

impl Opcode {
    /// Decode an opcode field.
    pub fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            0 => Opcode::Nop,
            1 => Opcode::Set,
            2 => Opcode::And,
            3 => Opcode::Or,
            4 => Opcode::Xor,
            5 => Opcode::Add,
            6 => Opcode::Sub,
            7 => Opcode::Shl,
            8 => Opcode::Shr,
            9 => Opcode::DepositField,
            10 => Opcode::Not,
            11 => Opcode::Min,
            12 => Opcode::Max,
            13 => Opcode::SaddU,
            14 => Opcode::Invalidate,
            _ => return None,
        })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Nop => "nop",
            Opcode::Set => "set",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Shl => "shl",
            Opcode::Shr => "shr",
            Opcode::DepositField => "deposit-field",
            Opcode::Not => "not",
            Opcode::Min => "min",
            Opcode::Max => "max",
            Opcode::SaddU => "saddu",
            Opcode::Invalidate => "invalidate",
        };
        write!(f, "{}", name)
    }
}

/// Slot source operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Operand {
    /// PHV container (stage input)
    Phv(usize),
    /// Action bus word (0..4)
    ActionBus(usize),
    /// Immediate from word1
    Immediate,
    /// Constant zero
    #[default]
    Zero,
}

impl Operand {
    fn decode(kind: u64, index: u64) -> Self {
        match kind & 0x3 {
            0 => Operand::Phv(index as usize),
            1 => Operand::ActionBus(index as usize),
            2 => Operand::Immediate,
            _ => Operand::Zero,
        }
    }

    fn encode(self) -> (u64, u64) {
        match self {
            Operand::Phv(i) => (0, i as u64 & 0xFF),
            Operand::ActionBus(i) => (1, i as u64 & 0xFF),
            Operand::Immediate => (2, 0),
            Operand::Zero => (3, 0),
        }
    }
}

/// One decoded VLIW slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSlot {
    /// Operation
    pub opcode: Opcode,
    /// Destination container
    pub dst: usize,
    /// First source
    pub src1: Operand,
    /// Second source
    pub src2: Operand,
    /// Shift / rotate amount
    pub shift: u32,
    /// Field low bit (deposit-field)
    pub lo: u32,
    /// Field high bit (deposit-field)
    pub hi: u32,
    /// Immediate
    pub imm: u32,
}

impl ActionSlot {
    /// Slot with zero operands.
    pub fn new(opcode: Opcode, dst: usize) -> Self {
        Self {
            opcode,
            dst,
            src1: Operand::Zero,
            src2: Operand::Zero,
            shift: 0,
            lo: 0,
            hi: 0,
            imm: 0,
        }
    }

    /// Set the sources.
    pub fn with_sources(mut self, src1: Operand, src2: Operand) -> Self {
        self.src1 = src1;
        self.src2 = src2;
        self
    }

    /// Set the immediate.
    pub fn with_imm(mut self, imm: u32) -> Self {
        self.imm = imm;
        self
    }

    /// Set shift and field bounds.
    pub fn with_field(mut self, shift: u32, lo: u32, hi: u32) -> Self {
        self.shift = shift;
        self.lo = lo;
        self.hi = hi;
        self
    }

    /// Encode into a (valid) table word.
    pub fn encode(&self) -> TableWord {
        let (k1, i1) = self.src1.encode();
        let (k2, i2) = self.src2.encode();
        let word0 = (self.opcode as u64)
            | 1 << 4
            | (self.dst as u64 & 0xFF) << 5
            | k1 << 13
            | i1 << 15
            | k2 << 23
            | i2 << 25
            | (self.shift as u64 & 0x1F) << 33
            | (self.lo as u64 & 0x1F) << 38
            | (self.hi as u64 & 0x1F) << 43;
        TableWord::new(word0, self.imm as u64)
    }

    /// Decode a table word. `Ok(None)` for a slot without its valid bit.
    pub fn decode(slot: usize, word: TableWord) -> Result<Option<Self>, ActionDecodeError> {
        let w = word.word0;
        if w & (1 << 4) == 0 {
            return Ok(None);
        }
        let raw = (w & 0xF) as u8;
        let opcode = Opcode::from_bits(raw).ok_or(ActionDecodeError::UnknownOpcode { slot, opcode: raw })?;
        let dst = ((w >> 5) & 0xFF) as usize;
        if opcode != Opcode::Nop && ContainerSize::of(dst).is_none() {
            return Err(ActionDecodeError::BadDestination { slot, dst });
        }
        Ok(Some(Self {
            opcode,
            dst,
            src1: Operand::decode(w >> 13, (w >> 15) & 0xFF),
            src2: Operand::decode(w >> 23, (w >> 25) & 0xFF),
            shift: ((w >> 33) & 0x1F) as u32,
            lo: ((w >> 38) & 0x1F) as u32,
            hi: ((w >> 43) & 0x1F) as u32,
            imm: word.word1 as u32,
        }))
    }
}

/// A fetched instruction (its valid slots).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instruction {
    /// Valid slots in slot order
    pub slots: SmallVec<[ActionSlot; IMEM_SLOTS]>,
}

impl Instruction {
    /// No-op instruction.
    pub fn nop() -> Self {
        Self::default()
    }

    /// Fetch and decode instruction `addr` from instruction memory.
    pub fn fetch(mems: &TableMemories, addr: usize) -> Result<Self, ActionDecodeError> {
        if addr >= IMEM_DEPTH {
            return Err(ActionDecodeError::AddressOutOfRange(addr));
        }
        let mut written = false;
        let mut slots = SmallVec::new();
        for slot in 0..IMEM_SLOTS {
            let offset = imem_offset(addr, slot);
            let Some(word) = mems.get(MemoryKind::Imem, offset) else {
                continue;
            };
            written = true;
            if let Some(decoded) = ActionSlot::decode(slot, word)? {
                slots.push(decoded);
            }
        }
        if !written {
            return Err(ActionDecodeError::Uninitialized(addr));
        }
        Ok(Self { slots })
    }
}

/// The 16-byte action-data bus for one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionBus {
    bytes: [u8; ACTION_BUS_BYTES],
}

impl ActionBus {
    /// Route an action-data entry onto the bus. Undriven bytes read 0.
    pub fn route(layout: &dyn RevisionLayout, regs: &RegisterFile, data: TableWord) -> Self {
        let mut bytes = [0u8; ACTION_BUS_BYTES];
        for (b, slot) in bytes.iter_mut().enumerate() {
            if layout.action_byte_enabled(regs, b) {
                let source = regs.read(RegClass::ActionHvXbarCtlByte, b) & action_hv::SOURCE_MASK;
                *slot = data.byte(source as usize);
            }
        }
        Self { bytes }
    }

    /// Bus from raw bytes.
    pub fn from_bytes(bytes: [u8; ACTION_BUS_BYTES]) -> Self {
        Self { bytes }
    }

    /// 32-bit word `i` (0..4), little-endian. Out of range reads 0.
    pub fn word(&self, i: usize) -> u32 {
        match self.bytes.get(i * 4..i * 4 + 4) {
            Some(b) => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            None => 0,
        }
    }
}

/// Result of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhvWrite {
    /// Write a value (masked to the container) and mark it valid
    Set {
        /// Destination
        dst: usize,
        /// Value
        value: u32,
    },
    /// Clear the container's valid bit
    Invalidate {
        /// Destination
        dst: usize,
    },
}

impl PhvWrite {
    /// Destination container.
    pub fn dst(&self) -> usize {
        match *self {
            PhvWrite::Set { dst, .. } | PhvWrite::Invalidate { dst } => dst,
        }
    }

    /// Apply to a PHV.
    pub fn apply(&self, phv: &mut Phv) {
        match *self {
            PhvWrite::Set { dst, value } => phv.set(dst, value),
            PhvWrite::Invalidate { dst } => phv.invalidate(dst),
        }
    }
}

/// Action ALU.
pub struct ActionAlu;

impl ActionAlu {
    fn operand(op: Operand, slot: &ActionSlot, phv: &Phv, bus: &ActionBus) -> u32 {
        match op {
            Operand::Phv(i) => phv.get(i),
            Operand::ActionBus(i) => bus.word(i),
            Operand::Immediate => slot.imm,
            Operand::Zero => 0,
        }
    }

    /// Execute one slot against the stage-input PHV.
    pub fn execute_slot(slot: &ActionSlot, phv: &Phv, bus: &ActionBus) -> Option<PhvWrite> {
        let size = ContainerSize::of(slot.dst)?;
        let width = size.bits();
        let mask = size.mask();
        let a = Self::operand(slot.src1, slot, phv, bus) & mask;
        let b = Self::operand(slot.src2, slot, phv, bus) & mask;

        let value = match slot.opcode {
            Opcode::Nop => return None,
            Opcode::Invalidate => return Some(PhvWrite::Invalidate { dst: slot.dst }),
            Opcode::Set => a,
            Opcode::And => a & b,
            Opcode::Or => a | b,
            Opcode::Xor => a ^ b,
            Opcode::Add => a.wrapping_add(b),
            Opcode::Sub => a.wrapping_sub(b),
            Opcode::Shl => a.checked_shl(slot.shift).unwrap_or(0),
            Opcode::Shr => a.checked_shr(slot.shift).unwrap_or(0),
            Opcode::DepositField => {
                let rot = rotate_right(a, slot.shift % width, width, mask);
                let field = field_mask(slot.lo, slot.hi.min(width - 1));
                (rot & field) | (b & !field)
            }
            Opcode::Not => !a,
            Opcode::Min => a.min(b),
            Opcode::Max => a.max(b),
            Opcode::SaddU => (a as u64 + b as u64).min(mask as u64) as u32,
        };
        Some(PhvWrite::Set { dst: slot.dst, value: value & mask })
    }

    /// Execute every slot of an instruction, in slot order.
    pub fn execute(instr: &Instruction, phv: &Phv, bus: &ActionBus) -> SmallVec<[PhvWrite; IMEM_SLOTS]> {
        instr
            .slots
            .iter()
            .filter_map(|slot| Self::execute_slot(slot, phv, bus))
            .collect()
    }
}

fn rotate_right(value: u32, shift: u32, width: u32, mask: u32) -> u32 {
    if shift == 0 {
        return value;
    }
    ((value >> shift) | (value << (width - shift))) & mask
}

fn field_mask(lo: u32, hi: u32) -> u32 {
    if lo > hi {
        return 0;
    }
    let len = hi - lo + 1;
    let ones = if len >= 32 { u32::MAX } else { (1u32 << len) - 1 };
    ones << lo
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::layout::{RevA0, RevB0};

    fn phv() -> Phv {
        let mut phv = Phv::default();
        phv.set(0, 0x1234_5678);
        phv.set(1, 0xFFFF_FFF0);
        phv.set(64, 0xF0);
        phv.set(130, 0x00FF);
        phv
    }

    fn run(slot: ActionSlot) -> Option<PhvWrite> {
        ActionAlu::execute_slot(&slot, &phv(), &ActionBus::default())
    }

    fn value(slot: ActionSlot) -> u32 {
        match run(slot) {
            Some(PhvWrite::Set { value, .. }) => value,
            other => panic!("expected a set, got {:?}", other),
        }
    }

    #[test]
    fn test_slot_encode_decode() {
        let slot = ActionSlot::new(Opcode::DepositField, 130)
            .with_sources(Operand::ActionBus(2), Operand::Phv(7))
            .with_field(4, 3, 11)
            .with_imm(0xDEAD);
        let decoded = ActionSlot::decode(0, slot.encode()).unwrap().unwrap();
        assert_eq!(decoded, slot);
    }

    #[test]
    fn test_decode_errors() {
        let word = TableWord::new(0xF | 1 << 4, 0);
        assert_eq!(
            ActionSlot::decode(3, word),
            Err(ActionDecodeError::UnknownOpcode { slot: 3, opcode: 15 })
        );
        let word = ActionSlot::new(Opcode::Set, 250).encode();
        assert!(matches!(ActionSlot::decode(0, word), Err(ActionDecodeError::BadDestination { dst: 250, .. })));
        assert_eq!(ActionSlot::decode(0, TableWord::new(1, 0)), Ok(None));
    }

    #[test]
    fn test_alu_arithmetic() {
        let add = ActionSlot::new(Opcode::Add, 0).with_sources(Operand::Phv(0), Operand::Immediate).with_imm(0x100);
        assert_eq!(value(add), 0x1234_5778);

        // Wraps at the destination width
        let add8 = ActionSlot::new(Opcode::Add, 64).with_sources(Operand::Phv(64), Operand::Immediate).with_imm(0x20);
        assert_eq!(value(add8), 0x10);

        let sat = ActionSlot::new(Opcode::SaddU, 64).with_sources(Operand::Phv(64), Operand::Immediate).with_imm(0x20);
        assert_eq!(value(sat), 0xFF);

        let sub = ActionSlot::new(Opcode::Sub, 130).with_sources(Operand::Zero, Operand::Immediate).with_imm(1);
        assert_eq!(value(sub), 0xFFFF);
    }

    #[test]
    fn test_alu_logic_and_shift() {
        let and = ActionSlot::new(Opcode::And, 0).with_sources(Operand::Phv(0), Operand::Phv(1));
        assert_eq!(value(and), 0x1234_5670);
        let not = ActionSlot::new(Opcode::Not, 130).with_sources(Operand::Phv(130), Operand::Zero);
        assert_eq!(value(not), 0xFF00);
        let shl = ActionSlot::new(Opcode::Shl, 64).with_sources(Operand::Phv(64), Operand::Zero).with_field(2, 0, 0);
        assert_eq!(value(shl), 0xC0);
        let shr = ActionSlot::new(Opcode::Shr, 0).with_sources(Operand::Phv(0), Operand::Zero).with_field(16, 0, 0);
        assert_eq!(value(shr), 0x1234);
        let min = ActionSlot::new(Opcode::Min, 0).with_sources(Operand::Phv(0), Operand::Phv(1));
        assert_eq!(value(min), 0x1234_5678);
        let max = ActionSlot::new(Opcode::Max, 0).with_sources(Operand::Phv(0), Operand::Phv(1));
        assert_eq!(value(max), 0xFFFF_FFF0);
    }

    #[test]
    fn test_deposit_field() {
        // Rotate 0x1234_5678 right by 8, keep bits 15:8, rest from phv[1]
        let dep = ActionSlot::new(Opcode::DepositField, 0)
            .with_sources(Operand::Phv(0), Operand::Phv(1))
            .with_field(8, 8, 15);
        assert_eq!(value(dep), 0xFFFF_34F0);

        // Rotation wraps within a 16-bit container
        let dep16 = ActionSlot::new(Opcode::DepositField, 130)
            .with_sources(Operand::Phv(130), Operand::Zero)
            .with_field(4, 0, 15);
        assert_eq!(value(dep16), 0xF00F);
    }

    #[test]
    fn test_invalidate_and_nop() {
        assert_eq!(run(ActionSlot::new(Opcode::Invalidate, 64)), Some(PhvWrite::Invalidate { dst: 64 }));
        assert_eq!(run(ActionSlot::new(Opcode::Nop, 64)), None);
    }

    #[test]
    fn test_fetch() {
        let mut mems = TableMemories::new();
        assert_eq!(Instruction::fetch(&mems, 5), Err(ActionDecodeError::Uninitialized(5)));
        assert_eq!(Instruction::fetch(&mems, 64), Err(ActionDecodeError::AddressOutOfRange(64)));

        let slot = ActionSlot::new(Opcode::Set, 3).with_sources(Operand::Immediate, Operand::Zero).with_imm(9);
        mems.write(MemoryKind::Imem, imem_offset(5, 2), slot.encode());
        let instr = Instruction::fetch(&mems, 5).unwrap();
        assert_eq!(instr.slots.as_slice(), &[slot]);

        let out = ActionAlu::execute(&instr, &Phv::default(), &ActionBus::default());
        assert_eq!(out.as_slice(), &[PhvWrite::Set { dst: 3, value: 9 }]);
    }

    #[test]
    fn test_action_bus_routing() {
        let mut regs = RegisterFile::new();
        let data = TableWord::new(0x0807_0605_0403_0201, 0x100F_0E0D_0C0B_0A09);
        // Bus byte 4 takes data byte 9, bus byte 5 takes data byte 0
        regs.write(RegClass::ActionHvXbarCtlByte, 4, 9 | action_hv::ENABLE);
        regs.write(RegClass::ActionHvXbarCtlByte, 5, action_hv::ENABLE);

        let bus = ActionBus::route(&RevA0, &regs, data);
        assert_eq!(bus.word(1), 0x0000_010A);
        assert_eq!(bus.word(0), 0);

        // B0 also needs the half-enable bits
        let bus = ActionBus::route(&RevB0, &regs, data);
        assert_eq!(bus.word(1), 0);
        regs.write(RegClass::ActionHvXbarHalfEnable, 0, 1 << 4);
        let bus = ActionBus::route(&RevB0, &regs, data);
        assert_eq!(bus.word(1), 0x0000_000A);
    }
}
