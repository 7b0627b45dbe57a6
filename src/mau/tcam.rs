//! TCAM match engine.
//!
//! Units are arranged in two columns of twelve rows. Every enabled unit
//! compares the search key of its ternary group against all 512 entries at
//! once; a unit flagged `chain_out` passes its match vector down to the next
//! row of the same column instead of reporting, which lets wide keys span
//! several units.
//!
//! Entries use the word0/word1 encoding: key bit value 0 matches when the
//! word0 bit is set, value 1 matches when the word1 bit is set. An entry with
//! both bits clear at any position never matches, so the all-zero entry of
//! an unwritten row is inert.

use log::trace;

use crate::device::registers_spec::{
    tcam_mode, tcam_outputmap, LOGICAL_TABLES, LOGICAL_TCAM_TABLES, TCAM_COLS, TCAM_DEPTH,
    TCAM_DEPTH_BITS, TCAM_KEY_MASK, TCAM_ROWS, TCAM_UNITS, TERNARY_GROUPS,
};
use crate::device::{MemoryKind, RegClass, RegisterFile, TableMemories, TableWord};

/// Match vector across one unit (one bit per entry).
type MatchVector = [u64; TCAM_DEPTH / 64];

/// A ternary entry in word0/word1 form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcamEntry {
    /// Bits that match a key bit of 0
    pub word0: u64,
    /// Bits that match a key bit of 1
    pub word1: u64,
}

impl TcamEntry {
    /// Entry matching `key` where `mask` bits are cared about.
    pub fn from_value_mask(value: u64, mask: u64) -> Self {
        Self {
            word0: (!value | !mask) & TCAM_KEY_MASK,
            word1: (value | !mask) & TCAM_KEY_MASK,
        }
    }

    /// Whether a search key matches this entry.
    #[inline]
    pub fn matches(&self, key: u64) -> bool {
        ((key & self.word1) | (!key & self.word0)) & TCAM_KEY_MASK == TCAM_KEY_MASK
    }

    /// Table memory word.
    pub fn to_word(self) -> TableWord {
        TableWord::new(self.word0, self.word1)
    }

    /// Entry stored in a table memory word.
    pub fn from_word(word: TableWord) -> Self {
        Self { word0: word.word0, word1: word.word1 }
    }
}

/// Decoded `tcam_mode` of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitMode {
    /// Ternary group feeding the unit
    pub group: usize,
    /// Pass the match vector to the next row
    pub chain_out: bool,
    /// Priority, lower wins
    pub priority: u8,
}

impl UnitMode {
    /// Mode of unit (col, row), `None` if disabled.
    pub fn read(regs: &RegisterFile, col: usize, row: usize) -> Option<Self> {
        let v = regs.get(RegClass::TcamMode, &[col, row]);
        if v & tcam_mode::ENABLE == 0 {
            return None;
        }
        Some(Self {
            group: ((v >> tcam_mode::GROUP_SHIFT) & tcam_mode::GROUP_MASK) as usize,
            chain_out: v & tcam_mode::CHAIN_OUT != 0,
            priority: ((v >> tcam_mode::PRIORITY_SHIFT) & tcam_mode::PRIORITY_MASK) as u8,
        })
    }
}

/// Unit index from column and row.
#[inline]
pub fn unit_index(col: usize, row: usize) -> usize {
    col * TCAM_ROWS + row
}

/// A TCAM hit delivered to a logical table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcamHit {
    /// Logical TCAM table that produced the hit
    pub tcam_table: usize,
    /// Logical table receiving it
    pub logical_table: usize,
    /// Reporting unit (`col * 12 + row`)
    pub unit: usize,
    /// Entry within the unit
    pub entry: usize,
    /// Unit priority
    pub priority: u8,
}

impl TcamHit {
    /// Hit address: `unit << 9 | entry`.
    #[inline]
    pub fn hit_addr(&self) -> u32 {
        ((self.unit as u32) << TCAM_DEPTH_BITS) | self.entry as u32
    }

    fn rank(&self) -> (u8, usize, usize) {
        (self.priority, self.unit, self.entry)
    }
}

/// Lowest matching entry reported by a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UnitResult {
    entry: usize,
    priority: u8,
}

/// TCAM engine view over one stage.
#[derive(Debug, Clone, Copy)]
pub struct TcamEngine<'a> {
    regs: &'a RegisterFile,
    mems: &'a TableMemories,
}

impl<'a> TcamEngine<'a> {
    /// Create an engine view.
    pub fn new(regs: &'a RegisterFile, mems: &'a TableMemories) -> Self {
        Self { regs, mems }
    }

    fn match_vector(&self, col: usize, row: usize, key: u64) -> MatchVector {
        let mut vec = [0u64; TCAM_DEPTH / 64];
        let base = (unit_index(col, row) * TCAM_DEPTH) as u32;
        for entry in 0..TCAM_DEPTH {
            if let Some(word) = self.mems.get(MemoryKind::Tcam, base + entry as u32) {
                if TcamEntry::from_word(word).matches(key) {
                    vec[entry / 64] |= 1 << (entry % 64);
                }
            }
        }
        vec
    }

    /// Per-unit results after chaining. Units that chain out, are disabled,
    /// or matched nothing report `None`.
    fn unit_results(&self, keys: &[u64; TERNARY_GROUPS]) -> [Option<UnitResult>; TCAM_UNITS] {
        let mut results = [None; TCAM_UNITS];
        for col in 0..TCAM_COLS {
            let mut carry: Option<MatchVector> = None;
            for row in 0..TCAM_ROWS {
                let Some(mode) = UnitMode::read(self.regs, col, row) else {
                    carry = None;
                    continue;
                };
                let key = keys.get(mode.group).copied().unwrap_or(0);
                let mut vec = self.match_vector(col, row, key);
                if let Some(prev) = carry.take() {
                    for (v, p) in vec.iter_mut().zip(prev) {
                        *v &= p;
                    }
                }

                if mode.chain_out {
                    carry = Some(vec);
                    continue;
                }

                let first = vec
                    .iter()
                    .enumerate()
                    .find(|&(_, &w)| w != 0)
                    .map(|(i, &w)| i * 64 + w.trailing_zeros() as usize);
                if let Some(entry) = first {
                    trace!("tcam unit [{}][{}] key 0x{:012X} hit entry {}", col, row, key, entry);
                    results[unit_index(col, row)] = Some(UnitResult { entry, priority: mode.priority });
                }
            }
        }
        results
    }

    fn table_hit(
        &self,
        tcam_table: usize,
        units: &[Option<UnitResult>; TCAM_UNITS],
        thread: usize,
    ) -> Option<TcamHit> {
        let threads = self.regs.get(RegClass::TcamOutputTableThread, &[tcam_table]);
        if threads & (1 << thread) == 0 {
            return None;
        }
        let outputmap = self.regs.get(RegClass::TcamHitOutputmap, &[tcam_table]);
        if outputmap & tcam_outputmap::ENABLE == 0 {
            return None;
        }
        let logical_table = (outputmap & tcam_outputmap::TABLE_MASK) as usize;
        let map = self.regs.get(RegClass::TcamTableMap, &[tcam_table]);

        units
            .iter()
            .enumerate()
            .filter(|&(unit, _)| map & (1 << unit) != 0)
            .filter_map(|(unit, r)| {
                r.map(|r| TcamHit {
                    tcam_table,
                    logical_table,
                    unit,
                    entry: r.entry,
                    priority: r.priority,
                })
            })
            .min_by_key(TcamHit::rank)
    }

    /// Winning hit of one logical TCAM table for a thread.
    pub fn lookup_table(
        &self,
        tcam_table: usize,
        keys: &[u64; TERNARY_GROUPS],
        thread: usize,
    ) -> Option<TcamHit> {
        let units = self.unit_results(keys);
        self.table_hit(tcam_table, &units, thread)
    }

    /// Winning TCAM hit for every logical table.
    pub fn lookup(&self, keys: &[u64; TERNARY_GROUPS], thread: usize) -> [Option<TcamHit>; LOGICAL_TABLES] {
        let units = self.unit_results(keys);
        let mut out: [Option<TcamHit>; LOGICAL_TABLES] = [None; LOGICAL_TABLES];
        for tcam_table in 0..LOGICAL_TCAM_TABLES {
            let Some(hit) = self.table_hit(tcam_table, &units, thread) else {
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
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::TableAddress;

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

        fn unit(&mut self, col: usize, row: usize, group: u64, chain: bool, priority: u64) {
            let mut v = tcam_mode::ENABLE | group << tcam_mode::GROUP_SHIFT | priority << tcam_mode::PRIORITY_SHIFT;
            if chain {
                v |= tcam_mode::CHAIN_OUT;
            }
            self.reg(RegClass::TcamMode, &[col, row], v);
        }

        fn table(&mut self, tcam_table: usize, map: u64, threads: u64, logical: u64) {
            self.reg(RegClass::TcamTableMap, &[tcam_table], map);
            self.reg(RegClass::TcamOutputTableThread, &[tcam_table], threads);
            self.reg(RegClass::TcamHitOutputmap, &[tcam_table], logical | tcam_outputmap::ENABLE);
        }

        fn entry(&mut self, col: usize, row: usize, entry: usize, e: TcamEntry) {
            let addr = TableAddress::tcam(0, col, row, entry).unwrap();
            self.mems.write(MemoryKind::Tcam, addr.offset, e.to_word());
        }

        fn engine(&self) -> TcamEngine<'_> {
            TcamEngine::new(&self.regs, &self.mems)
        }
    }

    #[test]
    fn test_entry_match() {
        let e = TcamEntry::from_value_mask(0x4, 0xF);
        assert!(e.matches(0x4));
        assert!(e.matches(0xFF4));
        assert!(!e.matches(0x5));
        assert!(!TcamEntry::default().matches(0));
        assert!(TcamEntry::from_value_mask(0, 0).matches(TCAM_KEY_MASK));
    }

    #[test]
    fn test_raw_word_pair_never_matches_without_full_coverage() {
        let e = TcamEntry::from_word(TableWord::new(0x7748dc2d5cd08bdd, 0x773e87b51f205e8c));
        // Bit 1 is clear in both words
        assert!(!e.matches(0));
        assert!(!e.matches(TCAM_KEY_MASK));
    }

    #[test]
    fn test_lowest_entry_wins() {
        let mut f = Fixture::new();
        f.unit(0, 0, 0, false, 0);
        f.table(0, 1, 1, 3);
        f.entry(0, 0, 9, TcamEntry::from_value_mask(0x4, 0xF));
        f.entry(0, 0, 4, TcamEntry::from_value_mask(0x0, 0x0));
        let mut keys = [0u64; TERNARY_GROUPS];
        keys[0] = 0x4;

        let hits = f.engine().lookup(&keys, 0);
        let hit = hits[3].unwrap();
        assert_eq!(hit.entry, 4);
        assert_eq!(hit.hit_addr(), 4);
        assert!(hits.iter().enumerate().all(|(t, h)| t == 3 || h.is_none()));
    }

    #[test]
    fn test_priority_overrides_unit_order() {
        let mut f = Fixture::new();
        f.unit(0, 0, 0, false, 5);
        f.unit(1, 2, 0, false, 1);
        f.table(0, 1 | 1 << 14, 1, 0);
        f.entry(0, 0, 0, TcamEntry::from_value_mask(0, 0));
        f.entry(1, 2, 7, TcamEntry::from_value_mask(0, 0));

        let hit = f.engine().lookup_table(0, &[0; TERNARY_GROUPS], 0).unwrap();
        assert_eq!(hit.unit, 14);
        assert_eq!(hit.entry, 7);
        assert_eq!(hit.hit_addr(), 14 << 9 | 7);
    }

    #[test]
    fn test_thread_and_outputmap_gating() {
        let mut f = Fixture::new();
        f.unit(0, 0, 0, false, 0);
        f.table(0, 1, 0b10, 0);
        f.entry(0, 0, 0, TcamEntry::from_value_mask(0, 0));
        let keys = [0u64; TERNARY_GROUPS];
        assert!(f.engine().lookup_table(0, &keys, 0).is_none());
        assert!(f.engine().lookup_table(0, &keys, 1).is_some());

        f.reg(RegClass::TcamHitOutputmap, &[0], 0);
        assert!(f.engine().lookup_table(0, &keys, 1).is_none());
    }

    #[test]
    fn test_chaining() {
        let mut f = Fixture::new();
        f.unit(0, 4, 1, true, 0);
        f.unit(0, 5, 2, false, 0);
        f.table(0, 1 << 4 | 1 << 5, 1, 0);
        // Entry 3 needs both halves, entry 8 only the second
        f.entry(0, 4, 3, TcamEntry::from_value_mask(0xAA, 0xFF));
        f.entry(0, 5, 3, TcamEntry::from_value_mask(0xBB, 0xFF));
        f.entry(0, 5, 8, TcamEntry::from_value_mask(0xBB, 0xFF));

        let mut keys = [0u64; TERNARY_GROUPS];
        keys[1] = 0xAA;
        keys[2] = 0xBB;
        let hit = f.engine().lookup_table(0, &keys, 0).unwrap();
        assert_eq!((hit.unit, hit.entry), (5, 3));

        keys[1] = 0xAB;
        assert!(f.engine().lookup_table(0, &keys, 0).is_none());
    }

    #[test]
    fn test_disabled_unit_never_hits() {
        let mut f = Fixture::new();
        f.table(0, 1, 1, 0);
        f.entry(0, 0, 0, TcamEntry::from_value_mask(0, 0));
        assert!(f.engine().lookup_table(0, &[0; TERNARY_GROUPS], 0).is_none());
    }
}
