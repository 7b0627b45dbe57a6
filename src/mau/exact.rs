//! Exact-match row engine.
//!
//! Each enabled unit RAM takes its hash function's output and carves it into
//! a 10-bit line address (`row_hash_adr_xbar`) and an optional RAM select
//! field (`mem_hash_adr_xbar`). A unit only answers when the select field
//! equals its programmed value. The addressed line holds a match word whose
//! tag must equal the hash bits not used for addressing, and whose key must
//! equal the row search bus under `match_key_mask`.
//!
//! Several units (ways) may hit for the same logical table. The lowest way
//! wins, then the lowest (row, column).

use log::trace;

use crate::device::registers_spec::{
    match_word, mem_hash_adr, unitram_ctl, HASH_FUNCTIONS, HASH_OUTPUT_BITS, HASH_OUTPUT_MASK,
    LOGICAL_TABLES, SRAM_COLS, SRAM_DEPTH, SRAM_LINE_BITS, SRAM_ROWS,
};
use crate::device::{sram_offset, MemoryKind, RegClass, RegisterFile, TableMemories, TableWord};

use super::xbar::{Crossbar, ExactBus};

/// Match word stored in a unit RAM line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExactEntry {
    /// Search key compared against the row bus
    pub key: u64,
    /// Hash bits not used for addressing
    pub tag: u64,
    /// Payload pointer (becomes the hit address)
    pub payload: u32,
    /// Entry valid
    pub valid: bool,
}

impl ExactEntry {
    /// Valid entry.
    pub fn new(key: u64, tag: u64, payload: u32) -> Self {
        Self { key, tag, payload, valid: true }
    }

    /// Encode as a table word.
    pub fn to_word(self) -> TableWord {
        let mut word1 = ((self.tag & match_word::TAG_MASK) << match_word::TAG_SHIFT)
            | (self.payload as u64 & match_word::PAYLOAD_MASK);
        if self.valid {
            word1 |= match_word::VALID;
        }
        TableWord::new(self.key, word1)
    }

    /// Decode a table word.
    pub fn from_word(word: TableWord) -> Self {
        Self {
            key: word.word0,
            tag: (word.word1 >> match_word::TAG_SHIFT) & match_word::TAG_MASK,
            payload: (word.word1 & match_word::PAYLOAD_MASK) as u32,
            valid: word.word1 & match_word::VALID != 0,
        }
    }
}

/// How a unit RAM carves its hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCarve {
    /// First hash bit of the line address
    pub line_start: u32,
    /// First hash bit of the select field
    pub select_start: u32,
    /// Select width (0 disables the select check)
    pub select_width: u32,
    /// Select value the unit answers to
    pub select_value: u64,
}

impl HashCarve {
    /// Carve programmed for unit (row, col).
    pub fn read(regs: &RegisterFile, row: usize, col: usize) -> Self {
        let sel = regs.get(RegClass::MemHashAdrXbar, &[row, col]);
        Self {
            line_start: regs.get(RegClass::RowHashAdrXbar, &[row, col]) as u32,
            select_start: (sel & mem_hash_adr::START_MASK) as u32,
            select_width: (((sel >> mem_hash_adr::WIDTH_SHIFT) & mem_hash_adr::WIDTH_MASK) as u32)
                .min(mem_hash_adr::MAX_WIDTH),
            select_value: (sel >> mem_hash_adr::VALUE_SHIFT) & mem_hash_adr::VALUE_MASK,
        }
    }

    /// Line address.
    #[inline]
    pub fn line(&self, hash: u64) -> usize {
        field(hash, self.line_start, SRAM_LINE_BITS) as usize
    }

    /// Whether the select field addresses this unit.
    #[inline]
    pub fn selects(&self, hash: u64) -> bool {
        if self.select_width == 0 {
            return true;
        }
        let mask = (1u64 << self.select_width) - 1;
        field(hash, self.select_start, self.select_width) == self.select_value & mask
    }

    /// Hash bits consumed by addressing.
    pub fn used_bits(&self) -> u64 {
        let mut used = field_mask(self.line_start, SRAM_LINE_BITS);
        if self.select_width > 0 {
            used |= field_mask(self.select_start, self.select_width);
        }
        used & HASH_OUTPUT_MASK
    }

    /// Tag: the unused hash bits, packed towards bit 0.
    pub fn tag(&self, hash: u64) -> u64 {
        compact(hash & HASH_OUTPUT_MASK, !self.used_bits() & HASH_OUTPUT_MASK) & match_word::TAG_MASK
    }
}

fn field(value: u64, start: u32, width: u32) -> u64 {
    if start >= 64 {
        return 0;
    }
    (value >> start) & ((1u64 << width) - 1)
}

fn field_mask(start: u32, width: u32) -> u64 {
    if start >= 64 {
        return 0;
    }
    ((1u64 << width) - 1).checked_shl(start).unwrap_or(0)
}

/// Gather the bits of `value` selected by `mask` into the low bits.
fn compact(value: u64, mask: u64) -> u64 {
    let mut out = 0u64;
    let mut pos = 0;
    for bit in 0..HASH_OUTPUT_BITS {
        if mask & (1 << bit) != 0 {
            out |= ((value >> bit) & 1) << pos;
            pos += 1;
        }
    }
    out
}

/// Decoded `unitram_ctl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitRamCtl {
    /// Hash function
    pub hash_function: usize,
    /// Logical table
    pub logical_table: usize,
    /// Way index
    pub way: usize,
}

impl UnitRamCtl {
    /// Control of unit (row, col), `None` unless match-enabled and bank-enabled.
    pub fn read(regs: &RegisterFile, row: usize, col: usize) -> Option<Self> {
        let ctl = regs.get(RegClass::UnitramCtl, &[row, col]);
        if ctl & unitram_ctl::MATCH_ENABLE == 0 {
            return None;
        }
        if regs.get(RegClass::ExactmatchBankEnable, &[row]) & (1 << col) == 0 {
            return None;
        }
        Some(Self {
            hash_function: ((ctl >> unitram_ctl::HASH_SHIFT) & unitram_ctl::HASH_MASK) as usize,
            logical_table: ((ctl >> unitram_ctl::TABLE_SHIFT) & unitram_ctl::TABLE_MASK) as usize,
            way: ((ctl >> unitram_ctl::WAY_SHIFT) & unitram_ctl::WAY_MASK) as usize,
        })
    }
}

/// An exact-match hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExactHit {
    /// Logical table
    pub logical_table: usize,
    /// Way index
    pub way: usize,
    /// Unit RAM row
    pub row: usize,
    /// Unit RAM column
    pub col: usize,
    /// Line within the unit
    pub line: usize,
    /// Payload pointer
    pub payload: u32,
}

impl ExactHit {
    /// Hit address handed to address distribution.
    #[inline]
    pub fn hit_addr(&self) -> u32 {
        self.payload
    }

    fn rank(&self) -> (usize, usize, usize) {
        (self.way, self.row, self.col)
    }
}

/// Exact-match engine view over one stage.
#[derive(Debug, Clone, Copy)]
pub struct ExactEngine<'a> {
    regs: &'a RegisterFile,
    mems: &'a TableMemories,
}

impl<'a> ExactEngine<'a> {
    /// Create an engine view.
    pub fn new(regs: &'a RegisterFile, mems: &'a TableMemories) -> Self {
        Self { regs, mems }
    }

    /// Probe unit (row, col) with its hash and row search key.
    fn match_unit(&self, row: usize, col: usize, ctl: UnitRamCtl, hash: u64, search_key: u64) -> Option<ExactHit> {
        let carve = HashCarve::read(self.regs, row, col);
        if !carve.selects(hash) {
            return None;
        }
        let line = carve.line(hash);
        if line >= SRAM_DEPTH {
            return None;
        }
        let offset = sram_offset(row, col, line);
        let entry = ExactEntry::from_word(self.mems.get(MemoryKind::Sram, offset)?);
        if !entry.valid || entry.tag != carve.tag(hash) {
            return None;
        }
        let key_mask = self.regs.get(RegClass::MatchKeyMask, &[row, col]);
        if (entry.key ^ search_key) & key_mask != 0 {
            return None;
        }
        trace!("exact unit [{}][{}] line {} hit payload 0x{:X}", row, col, line, entry.payload);
        Some(ExactHit {
            logical_table: ctl.logical_table,
            way: ctl.way,
            row,
            col,
            line,
            payload: entry.payload,
        })
    }

    /// Winning exact-match hit for one logical table.
    pub fn lookup_table(
        &self,
        table: usize,
        bus: &ExactBus,
        hashes: &[u64; HASH_FUNCTIONS],
    ) -> Option<ExactHit> {
        self.lookup(bus, hashes).get(table).copied().flatten()
    }

    /// Winning exact-match hit for every logical table.
    pub fn lookup(&self, bus: &ExactBus, hashes: &[u64; HASH_FUNCTIONS]) -> [Option<ExactHit>; LOGICAL_TABLES] {
        let xbar = Crossbar::new(self.regs);
        let mut out: [Option<ExactHit>; LOGICAL_TABLES] = [None; LOGICAL_TABLES];
        for row in 0..SRAM_ROWS {
            let search = xbar.row_search(bus, row);
            let mut key_bytes = [0u8; 8];
            key_bytes.copy_from_slice(&search[..8]);
            let search_key = u64::from_le_bytes(key_bytes);

            for col in 0..SRAM_COLS {
                let Some(ctl) = UnitRamCtl::read(self.regs, row, col) else {
                    continue;
                };
                let Some(hit) = self.match_unit(row, col, ctl, hashes[ctl.hash_function], search_key) else {
                    continue;
                };
                let better = match out[hit.logical_table] {
                    Some(existing) => hit.rank() < existing.rank(),
                    None => true,
                };
                if better {
                    out[hit.logical_table] = Some(hit);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::registers_spec::{vh_xbar, EXACT_BUS_BYTES};
    use crate::device::translate::{unit_ram, UnitRamPlacement};
    use crate::device::{RegisterAddress, TableAddress};

    struct Fixture {
        regs: RegisterFile,
        mems: TableMemories,
    }

    impl Fixture {
        fn new() -> Self {
            Self { regs: RegisterFile::new(), mems: TableMemories::new() }
        }

        fn reg(&mut self, class: RegClass, coords: &[usize], value: u64) {
            let i = class.flatten(coords).unwrap() as usize;
            self.regs.write(class, i, value);
        }

        fn place(&mut self, p: UnitRamPlacement) {
            for w in unit_ram(0, &p).unwrap() {
                let reg = RegisterAddress::decode(w.address).unwrap();
                let old = self.regs.read(reg.class, reg.index as usize);
                self.regs.write(reg.class, reg.index as usize, (old & !w.mask) | (w.value & w.mask));
            }
        }

        fn store(&mut self, row: usize, col: usize, line: usize, e: ExactEntry) {
            let addr = TableAddress::sram(0, row, col, line).unwrap();
            self.mems.write(MemoryKind::Sram, addr.offset, e.to_word());
        }

        fn engine(&self) -> ExactEngine<'_> {
            ExactEngine::new(&self.regs, &self.mems)
        }
    }

    fn placement(row: usize, col: usize, way: usize) -> UnitRamPlacement {
        UnitRamPlacement {
            row,
            col,
            hash_function: 0,
            logical_table: 2,
            way,
            line_start: 0,
            select_start: 10,
            select_width: 0,
            select_value: 0,
        }
    }

    const BUS: ExactBus = [0u8; EXACT_BUS_BYTES];

    #[test]
    fn test_entry_word_layout() {
        let e = ExactEntry::new(0x1122, 0x7FF_FFFF_FFFF, 0xABCDE);
        let w = e.to_word();
        assert_eq!(w.word0, 0x1122);
        assert_eq!(w.word1 >> 63, 1);
        assert_eq!(w.word1 & 0xF_FFFF, 0xABCDE);
        assert_eq!(ExactEntry::from_word(w), e);
        assert!(!ExactEntry::from_word(TableWord::default()).valid);
    }

    #[test]
    fn test_carve() {
        let carve = HashCarve { line_start: 4, select_start: 0, select_width: 2, select_value: 3 };
        let hash = 0xABC_DEF0_1234_5677;
        assert_eq!(carve.line(hash), ((hash >> 4) & 0x3FF) as usize);
        assert!(carve.selects(hash));
        assert!(!carve.selects(hash & !1));
        assert_eq!(carve.used_bits(), 0x3FFF & !0b1100);
        // 52 bits minus 12 used
        assert_eq!(carve.tag(HASH_OUTPUT_MASK), (1 << 40) - 1);
        assert_eq!(carve.tag(1 << 2), 1);
        assert_eq!(carve.tag(1 << 14), 1 << 2);
    }

    #[test]
    fn test_hit_returns_payload() {
        let mut f = Fixture::new();
        f.place(placement(1, 3, 0));
        let hash = 0x0_1234_5678_9ABC;
        let carve = HashCarve::read(&f.regs, 1, 3);
        f.store(1, 3, carve.line(hash), ExactEntry::new(0, carve.tag(hash), 0x77));

        let mut hashes = [0u64; HASH_FUNCTIONS];
        hashes[0] = hash;
        let hit = f.engine().lookup_table(2, &BUS, &hashes).unwrap();
        assert_eq!(hit.payload, 0x77);
        assert_eq!(hit.hit_addr(), 0x77);
        assert_eq!((hit.row, hit.col), (1, 3));

        // Different tag bits miss
        hashes[0] = hash ^ (1 << 40);
        assert!(f.engine().lookup_table(2, &BUS, &hashes).is_none());
    }

    #[test]
    fn test_bank_disable() {
        let mut f = Fixture::new();
        f.place(placement(0, 0, 0));
        f.store(0, 0, 0, ExactEntry::new(0, 0, 1));
        let hashes = [0u64; HASH_FUNCTIONS];
        assert!(f.engine().lookup_table(2, &BUS, &hashes).is_some());

        f.reg(RegClass::ExactmatchBankEnable, &[0], 0);
        assert!(f.engine().lookup_table(2, &BUS, &hashes).is_none());
    }

    #[test]
    fn test_lowest_way_wins() {
        let mut f = Fixture::new();
        f.place(placement(0, 5, 1));
        f.place(placement(4, 2, 0));
        f.place(placement(0, 1, 2));
        f.store(0, 5, 0, ExactEntry::new(0, 0, 0x10));
        f.store(4, 2, 0, ExactEntry::new(0, 0, 0x20));
        f.store(0, 1, 0, ExactEntry::new(0, 0, 0x30));

        let hit = f.engine().lookup_table(2, &BUS, &[0; HASH_FUNCTIONS]).unwrap();
        assert_eq!(hit.way, 0);
        assert_eq!(hit.payload, 0x20);
    }

    #[test]
    fn test_select_field() {
        let mut f = Fixture::new();
        let mut p = placement(0, 0, 0);
        p.select_start = 20;
        p.select_width = 2;
        p.select_value = 1;
        f.place(p);
        let carve = HashCarve::read(&f.regs, 0, 0);

        let mut hashes = [0u64; HASH_FUNCTIONS];
        hashes[0] = 1 << 20;
        f.store(0, 0, 0, ExactEntry::new(0, carve.tag(hashes[0]), 9));
        assert!(f.engine().lookup_table(2, &BUS, &hashes).is_some());

        hashes[0] = 2 << 20;
        assert!(f.engine().lookup_table(2, &BUS, &hashes).is_none());
    }

    #[test]
    fn test_key_mask() {
        let mut f = Fixture::new();
        f.place(placement(0, 0, 0));
        f.store(0, 0, 0, ExactEntry::new(0xAB, 0, 1));
        let hashes = [0u64; HASH_FUNCTIONS];

        // Mask 0: tag-only match
        assert!(f.engine().lookup_table(2, &BUS, &hashes).is_some());

        f.reg(RegClass::MatchKeyMask, &[0, 0], 0xFF);
        assert!(f.engine().lookup_table(2, &BUS, &hashes).is_none());

        // Feed 0xAB into row 0 through group 0 byte 0
        let mut bus = BUS;
        bus[0] = 0xAB;
        f.reg(RegClass::ExactmatchRowVhXbarCtl, &[0], vh_xbar::ENABLE);
        assert!(f.engine().lookup_table(2, &bus, &hashes).is_some());
    }

    #[test]
    fn test_invalid_entry_misses() {
        let mut f = Fixture::new();
        f.place(placement(0, 0, 0));
        let mut e = ExactEntry::new(0, 0, 1);
        e.valid = false;
        f.store(0, 0, 0, e);
        assert!(f.engine().lookup_table(2, &BUS, &[0; HASH_FUNCTIONS]).is_none());
    }
}
