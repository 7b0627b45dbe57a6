//! Chip state and configuration image application.
//!
//! The chip is the model boundary: a set of MAU stages behind four calls.
//!
//! - `write` / `mask_write`: configure one register by flat address
//! - `write_table_word`: load one TCAM, unit RAM, instruction or action-data word
//! - `evaluate` / `process`: run a PHV through one stage or the whole pipe
//! - `reset`: return every stage to power-on state
//!
//! Configuration images are applied command by command with the same calls.
//!
//! # Example
//!
//! ```
//! use mau_model::device::{Chip, ChipRev};
//! use mau_model::mau::{Gress, Phv};
//!
//! let chip = Chip::new(ChipRev::A0, 4);
//! let mut phv = Phv::new(Gress::Ingress);
//! phv.set(3, 0x1234);
//!
//! // Nothing is predicated on: the PHV passes through untouched
//! let out = chip.process(&phv);
//! assert_eq!(out.phv, phv);
//! assert!(out.stages_run.is_empty());
//! ```

use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use thiserror::Error;

use super::layout::{layout_for, LogicalControl, RevisionLayout};
use super::memories::{MemoryError, MemoryKind, TableAddress, TableWord};
use super::registers::{format_address, RegWrite, RegisterAddress, RegisterError};
use super::registers_spec::{LOGICAL_TABLES, MAX_STAGES, NEXT_TABLE_END};
use super::ChipRev;
use crate::config::Config;
use crate::mau::{MauStage, Phv, StageOutput};
use crate::parser::image::{ConfigImage, ImageCommand};

/// Errors returned at the model boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Bad register address or value
    #[error(transparent)]
    Register(#[from] RegisterError),

    /// Bad table address
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// Image command is truncated or too short for its opcode
    #[error("malformed image command 0x{opcode:04X}: {got} payload words, need {expected}")]
    MalformedCommand {
        /// Raw opcode
        opcode: u16,
        /// Payload words the command needs
        expected: usize,
        /// Payload words present
        got: usize,
    },

    /// Address names a stage the chip does not have
    #[error("stage {stage} out of range ({stages} stages)")]
    StageOutOfRange {
        /// Stage in the address
        stage: usize,
        /// Stages in the chip
        stages: usize,
    },
}

/// Statistics about writes applied to the chip.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ModelStats {
    /// Total image commands processed
    pub commands: usize,
    /// Register writes
    pub writes: usize,
    /// Masked register writes
    pub mask_writes: usize,
    /// Table word writes
    pub table_writes: usize,
    /// Resets
    pub resets: usize,
    /// NOP commands (skipped)
    pub nops: usize,
    /// Unknown/unhandled commands
    pub unknown: usize,
    /// Writes rejected as configuration errors
    pub rejected: usize,
}

/// Result of running a PHV through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutput {
    /// Final PHV
    pub phv: Phv,
    /// Last next-table id, `0xFF` at end of pipe
    pub next_table: u8,
    /// Stages in which at least one table ran
    pub stages_run: Vec<usize>,
}

/// A chip shared between one configuring writer and many evaluating readers.
pub type SharedChip = Arc<RwLock<Chip>>;

/// The modelled chip: stages plus the revision layout.
#[derive(Debug)]
pub struct Chip {
    rev: ChipRev,
    stages: Vec<MauStage>,
    layout: Arc<dyn RevisionLayout>,
    strict_width: bool,
    /// Write statistics since construction
    pub stats: ModelStats,
}

impl Chip {
    /// Create a chip with `stages` stages (clamped to 1..=16) at power-on.
    pub fn new(rev: ChipRev, stages: usize) -> Self {
        let n = stages.clamp(1, MAX_STAGES);
        if n != stages {
            log::warn!("{} stages requested, using {}", stages, n);
        }
        Self {
            rev,
            stages: (0..n).map(MauStage::new).collect(),
            layout: layout_for(rev),
            strict_width: false,
            stats: ModelStats::default(),
        }
    }

    /// Create a chip from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut chip = Self::new(config.chip_rev(), config.stages());
        chip.strict_width = config.strict_width();
        chip
    }

    /// Reject over-wide register values instead of truncating them.
    pub fn set_strict_width(&mut self, strict: bool) {
        self.strict_width = strict;
    }

    /// Silicon revision.
    #[inline]
    pub fn rev(&self) -> ChipRev {
        self.rev
    }

    /// Number of stages.
    #[inline]
    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// Register layout of this revision.
    pub fn layout(&self) -> &dyn RevisionLayout {
        self.layout.as_ref()
    }

    /// Stage `index`, if present.
    pub fn stage(&self, index: usize) -> Option<&MauStage> {
        self.stages.get(index)
    }

    /// Wrap the chip for shared access.
    pub fn into_shared(self) -> SharedChip {
        Arc::new(RwLock::new(self))
    }

    fn stage_index(&self, stage: u8) -> Result<usize, ModelError> {
        let stage = stage as usize;
        if stage >= self.stages.len() {
            return Err(ModelError::StageOutOfRange {
                stage,
                stages: self.stages.len(),
            });
        }
        Ok(stage)
    }

    /// Write a register: `reg = value`.
    pub fn write(&mut self, address: u64, value: u64) -> Result<(), ModelError> {
        self.stats.writes += 1;
        self.apply(&RegWrite::full(address, value))
    }

    /// Masked write: `reg = (reg & !mask) | (value & mask)`.
    pub fn mask_write(&mut self, address: u64, mask: u64, value: u64) -> Result<(), ModelError> {
        self.stats.mask_writes += 1;
        self.apply(&RegWrite::masked(address, mask, value))
    }

    /// Apply one register write. A rejected write leaves every register unchanged.
    pub fn apply(&mut self, write: &RegWrite) -> Result<(), ModelError> {
        let result = self.apply_inner(write);
        if let Err(e) = &result {
            self.stats.rejected += 1;
            log::warn!("Rejected write 0x{:012X}: {}", write.address, e);
        }
        result
    }

    fn apply_inner(&mut self, write: &RegWrite) -> Result<(), ModelError> {
        let reg = RegisterAddress::decode(write.address)?;
        let stage = self.stage_index(reg.stage)?;

        let width_mask = reg.class.info().value_mask();
        let mut value = write.value & write.mask;
        if value & !width_mask != 0 {
            if self.strict_width {
                return Err(RegisterError::ValueTooWide {
                    class: reg.class.name(),
                    value,
                    width: reg.class.width(),
                }
                .into());
            }
            log::warn!(
                "{}: value 0x{:X} truncated to {} bits",
                reg,
                value,
                reg.class.width()
            );
            value &= width_mask;
        }

        let regs = &mut self.stages[stage].regs;
        let old = regs.read(reg.class, reg.index as usize);
        let new = ((old & !write.mask) | value) & width_mask;
        log::trace!("{} = 0x{:X} (was 0x{:X})", reg, new, old);
        regs.write(reg.class, reg.index as usize, new);
        Ok(())
    }

    /// Apply a write list in order, stopping at the first rejected write.
    pub fn apply_all(&mut self, writes: &[RegWrite]) -> Result<(), ModelError> {
        for w in writes {
            if w.is_full() {
                self.write(w.address, w.value)?;
            } else {
                self.mask_write(w.address, w.mask, w.value)?;
            }
        }
        Ok(())
    }

    /// Set a logical control through this revision's fan-out.
    pub fn control(&mut self, stage: usize, control: LogicalControl) -> Result<(), ModelError> {
        let writes = self.layout.physical_writes(stage, control)?;
        self.apply_all(&writes)
    }

    /// Read a register.
    pub fn read(&self, address: u64) -> Result<u64, ModelError> {
        let reg = RegisterAddress::decode(address)?;
        let stage = self.stage_index(reg.stage)?;
        Ok(self.stages[stage].regs.read(reg.class, reg.index as usize))
    }

    /// Write one 128-bit table word.
    pub fn write_table_word(&mut self, address: u64, word0: u64, word1: u64) -> Result<(), ModelError> {
        self.stats.table_writes += 1;
        let result = self.write_table_inner(address, TableWord::new(word0, word1));
        if let Err(e) = &result {
            self.stats.rejected += 1;
            log::warn!("Rejected table write 0x{:012X}: {}", address, e);
        }
        result
    }

    fn write_table_inner(&mut self, address: u64, word: TableWord) -> Result<(), ModelError> {
        let target = TableAddress::decode(address)?;
        let stage = self.stage_index(target.stage)?;
        log::trace!(
            "{} = 0x{:016X}_{:016X}",
            target,
            word.word1,
            word.word0
        );
        self.stages[stage].mems.write(target.kind, target.offset, word);
        Ok(())
    }

    /// Read one table word (zero if never written).
    pub fn read_table_word(&self, address: u64) -> Result<TableWord, ModelError> {
        let target = TableAddress::decode(address)?;
        let stage = self.stage_index(target.stage)?;
        Ok(self.stages[stage].mems.read(target.kind, target.offset))
    }

    /// Evaluate one stage with every predicated table enabled.
    pub fn evaluate(&self, stage: usize, phv: &Phv) -> Result<StageOutput, ModelError> {
        self.evaluate_from(stage, phv, 0)
    }

    /// Evaluate one stage, skipping tables whose global id is below `next_in`.
    pub fn evaluate_from(&self, stage: usize, phv: &Phv, next_in: u8) -> Result<StageOutput, ModelError> {
        let s = self.stages.get(stage).ok_or(ModelError::StageOutOfRange {
            stage,
            stages: self.stages.len(),
        })?;
        Ok(s.evaluate_from(self.layout.as_ref(), phv, next_in))
    }

    /// Run a PHV through every stage, following next-table ids.
    ///
    /// A stage is skipped when the incoming next table lies beyond it, and a
    /// stage in which no table ran passes the PHV and next table through.
    pub fn process(&self, phv: &Phv) -> PipelineOutput {
        let mut current = phv.clone();
        let mut next_table = 0u8;
        let mut stages_run = Vec::new();

        for stage in &self.stages {
            if next_table == NEXT_TABLE_END {
                break;
            }
            if next_table as usize >= (stage.index + 1) * LOGICAL_TABLES {
                log::trace!("stage {}: skipped, next table 0x{:02X}", stage.index, next_table);
                continue;
            }

            let out = stage.evaluate_from(self.layout.as_ref(), &current, next_table);
            if out.tables.is_empty() {
                continue;
            }
            current = out.phv;
            next_table = out.next_table;
            stages_run.push(stage.index);
        }

        log::debug!(
            "pipeline: {} stages ran, next table 0x{:02X}",
            stages_run.len(),
            next_table
        );

        PipelineOutput {
            phv: current,
            next_table,
            stages_run,
        }
    }

    /// Return every stage to power-on state. Idempotent.
    pub fn reset(&mut self) {
        self.stats.resets += 1;
        for stage in &mut self.stages {
            stage.reset();
        }
        log::debug!("chip reset ({} stages)", self.stages.len());
    }

    /// Apply a configuration image.
    ///
    /// Processes every command up to the end marker. A rejected write stops
    /// the application with the command index attached.
    pub fn apply_image(&mut self, image: &ConfigImage) -> Result<()> {
        for (n, cmd) in image.commands().enumerate() {
            self.stats.commands += 1;
            if cmd == ImageCommand::EndMark {
                break;
            }
            self.apply_command(&cmd)
                .with_context(|| format!("image command {} ({:?})", n, cmd))?;
        }
        Ok(())
    }

    fn apply_command(&mut self, cmd: &ImageCommand) -> Result<(), ModelError> {
        match cmd {
            ImageCommand::Write { address, value } => {
                log::trace!("Image Write: {} value=0x{:X}", format_address(*address), value);
                self.write(*address, *value)
            }

            ImageCommand::MaskWrite { address, mask, value } => {
                log::trace!(
                    "Image MaskWrite: {} mask=0x{:X} value=0x{:X}",
                    format_address(*address),
                    mask,
                    value
                );
                self.mask_write(*address, *mask, *value)
            }

            ImageCommand::TableWrite { address, word0, word1 } => {
                self.write_table_word(*address, *word0, *word1)
            }

            ImageCommand::Reset => {
                self.reset();
                Ok(())
            }

            ImageCommand::Nop { .. } => {
                self.stats.nops += 1;
                Ok(())
            }

            ImageCommand::EndMark => Ok(()),

            ImageCommand::Malformed { opcode, expected, got } => {
                self.stats.rejected += 1;
                Err(ModelError::MalformedCommand {
                    opcode: *opcode,
                    expected: *expected,
                    got: *got,
                })
            }

            ImageCommand::Unknown { opcode, payload } => {
                self.stats.unknown += 1;
                log::warn!(
                    "Unknown image command 0x{:04X} ({} payload words)",
                    opcode,
                    payload.len()
                );
                Ok(())
            }
        }
    }

    /// Print a summary of chip state.
    pub fn print_summary(&self) {
        println!("Chip State Summary");
        println!("==================");
        println!("Revision: {}", self.rev);
        println!("Stages: {}", self.stages.len());

        println!();
        println!("Image Application Stats:");
        println!("  Commands: {}", self.stats.commands);
        println!("  Writes: {}", self.stats.writes);
        println!("  MaskWrites: {}", self.stats.mask_writes);
        println!("  TableWrites: {}", self.stats.table_writes);
        println!("  Resets: {}", self.stats.resets);
        println!("  NOPs: {}", self.stats.nops);
        println!("  Unknown: {}", self.stats.unknown);
        println!("  Rejected: {}", self.stats.rejected);

        println!();
        println!("Configured Stages:");
        for stage in &self.stages {
            let regs = stage.regs.non_zero().count();
            let words: usize = MemoryKind::ALL.iter().map(|&k| stage.mems.written(k)).sum();
            if regs == 0 && words == 0 {
                continue;
            }
            print!("  stage {}: regs:{}", stage.index, regs);
            for kind in MemoryKind::ALL {
                let n = stage.mems.written(kind);
                if n > 0 {
                    print!(" {}:{}", kind.to_string().to_lowercase(), n);
                }
            }
            println!();
        }
    }

    /// Print every non-zero register.
    pub fn dump_registers(&self) {
        for stage in &self.stages {
            for (class, index, value) in stage.regs.non_zero() {
                let reg = RegisterAddress {
                    stage: stage.index as u8,
                    class,
                    index: index as u32,
                };
                println!("{} = 0x{:X}", reg, value);
            }
        }
    }
}
