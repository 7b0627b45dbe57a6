//! One MAU stage: register file, table memories and the evaluation pass.
//!
//! Evaluation is a single ordered pass with no side effects on the stage:
//!
//! ```text
//! crossbar -> hash + TCAM -> exact match -> address distribution -> action
//! ```

use log::{debug, trace, warn};
use smallvec::SmallVec;

use crate::device::registers_spec::{LOGICAL_TABLES, NEXT_TABLE_END};
use crate::device::{MemoryKind, RegisterFile, RevisionLayout, TableMemories};

use super::action::{ActionAlu, ActionBus, Instruction, PhvWrite};
use super::adist::{predicated, HitSource, ResolvedAction, TableConfig, TableState};
use super::exact::ExactEngine;
use super::hash::compute_all;
use super::phv::Phv;
use super::tcam::TcamEngine;
use super::xbar::Crossbar;

/// What happened to one logical table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableOutcome {
    /// Logical table within the stage
    pub table: usize,
    /// Resolved addresses
    pub action: ResolvedAction,
    /// Instruction actually executed
    pub instr_executed: Option<usize>,
}

/// Result of evaluating a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutput {
    /// Output PHV
    pub phv: Phv,
    /// Next table (global id), `0xFF` if no table ran
    pub next_table: u8,
    /// Tables that ran, in table order
    pub tables: Vec<TableOutcome>,
}

/// One MAU stage.
#[derive(Debug, Clone)]
pub struct MauStage {
    /// Stage index
    pub index: usize,
    /// Configuration registers
    pub regs: RegisterFile,
    /// Table memories
    pub mems: TableMemories,
}

impl MauStage {
    /// Stage at power-on.
    pub fn new(index: usize) -> Self {
        Self {
            index,
            regs: RegisterFile::new(),
            mems: TableMemories::new(),
        }
    }

    /// Return registers and tables to power-on state.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.mems.reset();
    }

    /// Global next-table id of a local table.
    #[inline]
    pub fn global_table(&self, table: usize) -> usize {
        self.index * LOGICAL_TABLES + table
    }

    /// Evaluate with every predicated table enabled.
    pub fn evaluate(&self, layout: &dyn RevisionLayout, phv: &Phv) -> StageOutput {
        self.evaluate_from(layout, phv, 0)
    }

    /// Evaluate, skipping tables whose global id is below `next_in`.
    pub fn evaluate_from(&self, layout: &dyn RevisionLayout, phv: &Phv, next_in: u8) -> StageOutput {
        let thread = phv.gress().thread();
        let active: SmallVec<[usize; LOGICAL_TABLES]> = (0..LOGICAL_TABLES)
            .filter(|&t| predicated(&self.regs, thread, t))
            .filter(|&t| self.global_table(t) >= next_in as usize)
            .collect();

        if active.is_empty() {
            debug!("stage {}: no active tables", self.index);
            return StageOutput {
                phv: phv.clone(),
                next_table: NEXT_TABLE_END,
                tables: Vec::new(),
            };
        }

        let xbar = Crossbar::new(&self.regs);
        let bus = xbar.exact_bus(phv);
        let keys = xbar.ternary_keys(phv);
        let hashes = compute_all(&self.regs, &bus);
        let tcam_hits = TcamEngine::new(&self.regs, &self.mems).lookup(&keys, thread);
        let exact_hits = ExactEngine::new(&self.regs, &self.mems).lookup(&bus, &hashes);

        let mut out = phv.clone();
        let mut written: SmallVec<[(usize, usize); 16]> = SmallVec::new();
        let mut tables = Vec::with_capacity(active.len());

        for &table in &active {
            let cfg = TableConfig::read(&self.regs, table);
            let state = TableState::NoResult
                .observe(&cfg, tcam_hits[table], exact_hits[table])
                .resolve(&cfg);
            let Some(&action) = state.resolved() else {
                continue;
            };
            trace!(
                "stage {} table {}: {} instr {} adata {} next 0x{:02X}",
                self.index,
                table,
                action.source,
                action.instr_addr,
                action.adata_addr,
                action.next_table
            );

            let (instr, instr_executed) = self.fetch_with_fallback(table, &cfg, &action);
            let data_offset = action.adata_addr as u32;
            let data = self.mems.read(MemoryKind::ActionData, data_offset);
            let action_bus = ActionBus::route(layout, &self.regs, data);

            for write in ActionAlu::execute(&instr, phv, &action_bus) {
                let dst = write.dst();
                if let Some(&(_, owner)) = written.iter().find(|&&(c, _)| c == dst) {
                    warn!(
                        "stage {}: table {} write to container {} dropped, already written by table {}",
                        self.index, table, dst, owner
                    );
                    continue;
                }
                written.push((dst, table));
                apply(&write, &mut out);
            }

            tables.push(TableOutcome { table, action, instr_executed });
        }

        let next_table = tables
            .iter()
            .map(|t| t.action.next_table)
            .min()
            .unwrap_or(NEXT_TABLE_END);

        debug!(
            "stage {}: {} tables ran, {} containers written, next table 0x{:02X}",
            self.index,
            tables.len(),
            written.len(),
            next_table
        );

        StageOutput { phv: out, next_table, tables }
    }

    /// Fetch the resolved instruction, falling back to the table default and
    /// then to a no-op.
    fn fetch_with_fallback(
        &self,
        table: usize,
        cfg: &TableConfig,
        action: &ResolvedAction,
    ) -> (Instruction, Option<usize>) {
        match Instruction::fetch(&self.mems, action.instr_addr) {
            Ok(instr) => return (instr, Some(action.instr_addr)),
            Err(e) if action.source == HitSource::Miss => {
                warn!("stage {} table {}: default instruction unusable: {}", self.index, table, e);
                return (Instruction::nop(), None);
            }
            Err(e) => {
                debug!("stage {} table {}: {}, using default instruction", self.index, table, e);
            }
        }

        let default = cfg.instr_default as usize;
        match Instruction::fetch(&self.mems, default) {
            Ok(instr) => (instr, Some(default)),
            Err(e) => {
                warn!("stage {} table {}: default instruction unusable: {}", self.index, table, e);
                (Instruction::nop(), None)
            }
        }
    }
}

fn apply(write: &PhvWrite, phv: &mut Phv) {
    trace!("phv write {:?}", write);
    write.apply(phv);
}
