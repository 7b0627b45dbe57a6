//! Address distribution.
//!
//! Merges the TCAM and exact-match results of each logical table and turns
//! the winning hit address into instruction and action-data addresses:
//!
//! ```text
//! hit:  addr = (hit_addr >> shiftcount) & mask
//! miss: addr = default
//! ```
//!
//! Each table walks `NoResult -> TcamHit | ExactHit | Miss -> Resolved`.

use std::fmt;

use crate::device::registers_spec::{logical_table_ctl, next_table_format, THREADS};
use crate::device::{RegClass, RegisterFile};

use super::exact::ExactHit;
use super::tcam::TcamHit;

/// Per-table resolution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    /// Lookups not yet consumed
    NoResult,
    /// TCAM result is authoritative
    TcamHit(TcamHit),
    /// Exact-match result is authoritative
    ExactHit(ExactHit),
    /// Neither enabled source hit
    Miss,
    /// Addresses computed
    Resolved(ResolvedAction),
}

impl TableState {
    /// Consume the lookup results. Only valid from `NoResult`; other states
    /// are returned unchanged.
    pub fn observe(self, cfg: &TableConfig, tcam: Option<TcamHit>, exact: Option<ExactHit>) -> Self {
        if self != TableState::NoResult {
            return self;
        }
        let tcam = tcam.filter(|_| cfg.tcam).map(TableState::TcamHit);
        let exact = exact.filter(|_| cfg.exact).map(TableState::ExactHit);
        let winner = if cfg.exact_first { exact.or(tcam) } else { tcam.or(exact) };
        winner.unwrap_or(TableState::Miss)
    }

    /// Compute the action addresses. `NoResult` is treated as a miss.
    pub fn resolve(self, cfg: &TableConfig) -> Self {
        let (source, hit_addr) = match self {
            TableState::Resolved(_) => return self,
            TableState::TcamHit(h) => (HitSource::Tcam, Some(h.hit_addr())),
            TableState::ExactHit(h) => (HitSource::Exact, Some(h.hit_addr())),
            TableState::NoResult | TableState::Miss => (HitSource::Miss, None),
        };
        TableState::Resolved(cfg.resolve(source, hit_addr))
    }

    /// Resolved action, if resolved.
    pub fn resolved(&self) -> Option<&ResolvedAction> {
        match self {
            TableState::Resolved(r) => Some(r),
            _ => None,
        }
    }
}

/// Which source produced a table's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitSource {
    /// TCAM hit
    Tcam,
    /// Exact-match hit
    Exact,
    /// Miss
    Miss,
}

impl fmt::Display for HitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HitSource::Tcam => write!(f, "tcam-hit"),
            HitSource::Exact => write!(f, "exact-hit"),
            HitSource::Miss => write!(f, "miss"),
        }
    }
}

/// Addresses and next table derived for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAction {
    /// Result source
    pub source: HitSource,
    /// Hit address, `None` on miss
    pub hit_addr: Option<u32>,
    /// Instruction address
    pub instr_addr: usize,
    /// Action-data address
    pub adata_addr: usize,
    /// Next table (global id)
    pub next_table: u8,
}

/// One logical table's address distribution registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableConfig {
    /// Exact-match results feed the table
    pub exact: bool,
    /// TCAM results feed the table
    pub tcam: bool,
    /// Exact-match hit takes precedence over a TCAM hit
    pub exact_first: bool,
    /// Instruction address shift
    pub instr_shift: u32,
    /// Instruction address mask
    pub instr_mask: u32,
    /// Instruction address on miss
    pub instr_default: u32,
    /// Action-data address shift
    pub adata_shift: u32,
    /// Action-data address mask
    pub adata_mask: u32,
    /// Action-data address on miss
    pub adata_default: u32,
    /// Next table on hit
    pub next_hit: u8,
    /// Next table on miss
    pub next_miss: u8,
}

impl TableConfig {
    /// Read table `table`'s registers.
    pub fn read(regs: &RegisterFile, table: usize) -> Self {
        let r = |class: RegClass| regs.get(class, &[table]);
        let ctl = r(RegClass::LogicalTableCtl);
        let next = r(RegClass::NextTableFormatData);
        Self {
            exact: ctl & logical_table_ctl::EXACT != 0,
            tcam: ctl & logical_table_ctl::TCAM != 0,
            exact_first: ctl & logical_table_ctl::EXACT_FIRST != 0,
            instr_shift: r(RegClass::InstrAdrShiftcount) as u32,
            instr_mask: r(RegClass::InstrAdrMask) as u32,
            instr_default: r(RegClass::InstrAdrDefault) as u32,
            adata_shift: r(RegClass::ActiondataAdrShiftcount) as u32,
            adata_mask: r(RegClass::ActiondataAdrMask) as u32,
            adata_default: r(RegClass::ActiondataAdrDefault) as u32,
            next_hit: (next & next_table_format::HIT_MASK) as u8,
            next_miss: ((next >> next_table_format::MISS_SHIFT) & next_table_format::HIT_MASK) as u8,
        }
    }

    /// Compute the addresses for a result.
    pub fn resolve(&self, source: HitSource, hit_addr: Option<u32>) -> ResolvedAction {
        let (instr_addr, adata_addr, next_table) = match hit_addr {
            Some(addr) => (
                addr.checked_shr(self.instr_shift).unwrap_or(0) & self.instr_mask,
                addr.checked_shr(self.adata_shift).unwrap_or(0) & self.adata_mask,
                self.next_hit,
            ),
            None => (self.instr_default, self.adata_default, self.next_miss),
        };
        ResolvedAction {
            source,
            hit_addr,
            instr_addr: instr_addr as usize,
            adata_addr: adata_addr as usize,
            next_table,
        }
    }
}

/// Whether `table` is predicated on for `thread`.
pub fn predicated(regs: &RegisterFile, thread: usize, table: usize) -> bool {
    thread < THREADS && regs.get(RegClass::PredicationCtl, &[thread]) & (1 << table) != 0
}
