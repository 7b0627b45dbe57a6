//! Logical control translation.
//!
//! Pure functions turning a logically-named control (route action-data byte
//! `s` onto bus byte `b`, feed PHV byte `c.k` into crossbar lane `g.b`, ...)
//! into the register writes that implement it. Nothing here touches chip
//! state; the caller applies the returned writes with [`Chip::apply_all`].
//!
//! [`Chip::apply_all`]: crate::device::Chip::apply_all

use smallvec::SmallVec;

use super::layout::{LogicalControl, RevisionLayout};
use super::registers::{RegClass, RegWrite, RegisterError};
use super::registers_spec::{
    action_hv, hash_parity, lane, logical_table_ctl, mem_hash_adr, next_table_format, tcam_mode,
    tcam_outputmap, unitram_ctl, validbit, vh_xbar, GALOIS_WORDS, HASH_FUNCTIONS, LOGICAL_TABLES, TCAM_ROWS,
};

/// Write list returned by the translators.
pub type Writes = SmallVec<[RegWrite; 4]>;

fn check_index(class: RegClass, index: usize, size: usize) -> Result<(), RegisterError> {
    if index >= size {
        return Err(RegisterError::IndexOutOfRange {
            class: class.name(),
            index: index as u64,
            size,
        });
    }
    Ok(())
}

/// Encode an enabled PHV byte lane selector.
pub fn lane_value(container: usize, byte: usize) -> u64 {
    (container as u64 & lane::CONTAINER_MASK)
        | ((byte as u64 & lane::BYTE_MASK) << lane::BYTE_SHIFT)
        | lane::ENABLE
}

/// Route action-data byte `source` onto action bus byte `byte`.
pub fn ctl_byte(
    layout: &dyn RevisionLayout,
    stage: usize,
    byte: usize,
    source: usize,
) -> Result<Writes, RegisterError> {
    let value = (source as u64 & action_hv::SOURCE_MASK) | action_hv::ENABLE;
    Ok(layout
        .physical_writes(stage, LogicalControl::ActionBusByte { byte, value })?
        .into_iter()
        .collect())
}

/// Stop driving action bus byte `byte`.
pub fn ctl_byte_disable(
    layout: &dyn RevisionLayout,
    stage: usize,
    byte: usize,
) -> Result<Writes, RegisterError> {
    Ok(layout
        .physical_writes(stage, LogicalControl::ActionBusByte { byte, value: 0 })?
        .into_iter()
        .collect())
}

/// Route action-data half-word `source` onto action bus half-word `half`.
pub fn ctl_half(
    layout: &dyn RevisionLayout,
    stage: usize,
    half: usize,
    source: usize,
) -> Result<Writes, RegisterError> {
    let mut writes = Writes::new();
    for i in 0..2 {
        writes.extend(ctl_byte(layout, stage, half * 2 + i, source * 2 + i)?);
    }
    Ok(writes)
}

/// Route action-data word `source` onto action bus word `word`.
pub fn ctl_word(
    layout: &dyn RevisionLayout,
    stage: usize,
    word: usize,
    source: usize,
) -> Result<Writes, RegisterError> {
    let mut writes = Writes::new();
    for i in 0..4 {
        writes.extend(ctl_byte(layout, stage, word * 4 + i, source * 4 + i)?);
    }
    Ok(writes)
}

/// Feed PHV byte `container.byte` into exact crossbar lane `group.lane`.
pub fn exact_xbar_byte(
    stage: usize,
    group: usize,
    lane_index: usize,
    container: usize,
    byte: usize,
) -> Result<Writes, RegisterError> {
    let addr = RegClass::ExactXbarCtl.address(stage, &[group, lane_index])?;
    Ok(smallvec::smallvec![RegWrite::full(addr, lane_value(container, byte))])
}

/// Feed a whole container into consecutive exact crossbar lanes, LSB first.
pub fn exact_xbar_container(
    stage: usize,
    group: usize,
    first_lane: usize,
    container: usize,
    bytes: usize,
) -> Result<Writes, RegisterError> {
    let mut writes = Writes::new();
    for b in 0..bytes {
        writes.extend(exact_xbar_byte(stage, group, first_lane + b, container, b)?);
    }
    Ok(writes)
}

/// Feed PHV byte `container.byte` into ternary crossbar lane `group.lane`.
pub fn ternary_xbar_byte(
    stage: usize,
    group: usize,
    lane_index: usize,
    container: usize,
    byte: usize,
) -> Result<Writes, RegisterError> {
    let addr = RegClass::TernaryXbarCtl.address(stage, &[group, lane_index])?;
    Ok(smallvec::smallvec![RegWrite::full(addr, lane_value(container, byte))])
}

/// Select the shared mid byte for a pair of ternary groups.
pub fn ternary_mid_byte(
    stage: usize,
    mid: usize,
    container: usize,
    byte: usize,
    nibble_swap: bool,
) -> Result<Writes, RegisterError> {
    let addr = RegClass::TernaryMidByteCtl.address(stage, &[mid])?;
    let mut value = lane_value(container, byte);
    if nibble_swap {
        value |= lane::NIBBLE_SWAP;
    }
    Ok(smallvec::smallvec![RegWrite::full(addr, value)])
}

/// Feed a container's valid bit into a ternary valid lane.
pub fn ternary_valid_bit(
    stage: usize,
    group: usize,
    lane_index: usize,
    container: usize,
) -> Result<Writes, RegisterError> {
    let addr = RegClass::TcamValidbitXbarCtl.address(stage, &[group, lane_index])?;
    let value = (container as u64 & validbit::CONTAINER_MASK) | validbit::ENABLE;
    Ok(smallvec::smallvec![RegWrite::full(addr, value)])
}

/// Configure a TCAM unit.
pub fn tcam_unit(
    stage: usize,
    col: usize,
    row: usize,
    group: usize,
    chain_out: bool,
    priority: u8,
) -> Result<Writes, RegisterError> {
    let addr = RegClass::TcamMode.address(stage, &[col, row])?;
    let mut value = tcam_mode::ENABLE
        | ((group as u64 & tcam_mode::GROUP_MASK) << tcam_mode::GROUP_SHIFT)
        | ((priority as u64 & tcam_mode::PRIORITY_MASK) << tcam_mode::PRIORITY_SHIFT);
    if chain_out {
        value |= tcam_mode::CHAIN_OUT;
    }
    Ok(smallvec::smallvec![RegWrite::full(addr, value)])
}

/// Bind a logical TCAM table to its units, threads and logical table.
pub fn tcam_logical_table(
    stage: usize,
    tcam_table: usize,
    units: &[(usize, usize)],
    thread_mask: u8,
    logical_table: usize,
) -> Result<Writes, RegisterError> {
    check_index(RegClass::TcamHitOutputmap, logical_table, LOGICAL_TABLES)?;
    let mut map = 0u64;
    for &(col, row) in units {
        // Unit coordinates follow the tcam_mode layout
        RegClass::TcamMode.flatten(&[col, row])?;
        map |= 1 << (col * TCAM_ROWS + row);
    }
    Ok(smallvec::smallvec![
        RegWrite::full(RegClass::TcamTableMap.address(stage, &[tcam_table])?, map),
        RegWrite::full(
            RegClass::TcamOutputTableThread.address(stage, &[tcam_table])?,
            thread_mask as u64,
        ),
        RegWrite::full(
            RegClass::TcamHitOutputmap.address(stage, &[tcam_table])?,
            logical_table as u64 | tcam_outputmap::ENABLE,
        ),
    ])
}

/// Set or clear one Galois matrix coefficient.
pub fn galois_bit(
    stage: usize,
    function: usize,
    output_bit: usize,
    input_bit: usize,
    set: bool,
) -> Result<Writes, RegisterError> {
    let word = input_bit / 32;
    if word >= GALOIS_WORDS {
        return Err(RegisterError::IndexOutOfRange {
            class: RegClass::GaloisFieldMatrix.name(),
            index: input_bit as u64,
            size: GALOIS_WORDS * 32,
        });
    }
    let addr = RegClass::GaloisFieldMatrix.address(stage, &[function, output_bit, word])?;
    let bit = 1u64 << (input_bit % 32);
    Ok(smallvec::smallvec![RegWrite::masked(addr, bit, if set { bit } else { 0 })])
}

/// Configure a hash parity group.
pub fn hash_parity(
    stage: usize,
    function: usize,
    group: usize,
    dest_bit: usize,
    mask: u64,
) -> Result<Writes, RegisterError> {
    Ok(smallvec::smallvec![
        RegWrite::full(
            RegClass::HashParityCtl.address(stage, &[function, group])?,
            (dest_bit as u64 & hash_parity::DEST_MASK) | hash_parity::ENABLE,
        ),
        RegWrite::full(RegClass::HashParityMask.address(stage, &[function, group])?, mask),
    ])
}

/// Exact-match unit RAM placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitRamPlacement {
    /// Unit RAM row
    pub row: usize,
    /// Unit RAM column
    pub col: usize,
    /// Hash function feeding the unit
    pub hash_function: usize,
    /// Logical table the unit matches for
    pub logical_table: usize,
    /// Way index
    pub way: usize,
    /// First hash bit of the 10-bit line address
    pub line_start: usize,
    /// First hash bit of the RAM select field
    pub select_start: usize,
    /// RAM select width (0..=5)
    pub select_width: usize,
    /// RAM select value this unit answers to
    pub select_value: usize,
}

/// Configure an exact-match unit RAM. The row bank enable is a masked write
/// so units in the same row can be placed independently.
pub fn unit_ram(stage: usize, p: &UnitRamPlacement) -> Result<Writes, RegisterError> {
    let ctl_addr = RegClass::UnitramCtl.address(stage, &[p.row, p.col])?;
    check_index(RegClass::UnitramCtl, p.hash_function, HASH_FUNCTIONS)?;
    check_index(RegClass::UnitramCtl, p.logical_table, LOGICAL_TABLES)?;
    let ctl = unitram_ctl::MATCH_ENABLE
        | ((p.hash_function as u64 & unitram_ctl::HASH_MASK) << unitram_ctl::HASH_SHIFT)
        | ((p.logical_table as u64 & unitram_ctl::TABLE_MASK) << unitram_ctl::TABLE_SHIFT)
        | ((p.way as u64 & unitram_ctl::WAY_MASK) << unitram_ctl::WAY_SHIFT);
    let select = (p.select_start as u64 & mem_hash_adr::START_MASK)
        | ((p.select_width as u64 & mem_hash_adr::WIDTH_MASK) << mem_hash_adr::WIDTH_SHIFT)
        | ((p.select_value as u64 & mem_hash_adr::VALUE_MASK) << mem_hash_adr::VALUE_SHIFT);
    let bank_bit = 1u64 << p.col;

    Ok(smallvec::smallvec![
        RegWrite::full(ctl_addr, ctl),
        RegWrite::full(RegClass::RowHashAdrXbar.address(stage, &[p.row, p.col])?, p.line_start as u64),
        RegWrite::full(RegClass::MemHashAdrXbar.address(stage, &[p.row, p.col])?, select),
        RegWrite::masked(RegClass::ExactmatchBankEnable.address(stage, &[p.row])?, bank_bit, bank_bit),
    ])
}

/// Select the exact bus group and byte rotation feeding a unit RAM row.
pub fn row_search_bus(
    layout: &dyn RevisionLayout,
    stage: usize,
    row: usize,
    group: usize,
    rotate: usize,
) -> Result<Writes, RegisterError> {
    let value = (group as u64 & vh_xbar::GROUP_MASK)
        | vh_xbar::ENABLE
        | ((rotate as u64 & vh_xbar::ROTATE_MASK) << vh_xbar::ROTATE_SHIFT);
    Ok(layout
        .physical_writes(stage, LogicalControl::RowVhXbar { row, value })?
        .into_iter()
        .collect())
}

/// Action addressing for a logical table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableAddressing {
    /// Hit address shift for the instruction address
    pub instr_shift: u32,
    /// Instruction address mask
    pub instr_mask: u64,
    /// Instruction address on miss
    pub instr_default: u64,
    /// Hit address shift for the action-data address
    pub adata_shift: u32,
    /// Action-data address mask
    pub adata_mask: u64,
    /// Action-data address on miss
    pub adata_default: u64,
    /// Next table on hit
    pub next_hit: u8,
    /// Next table on miss
    pub next_miss: u8,
}

/// Configure a logical table's result sources, precedence and addressing.
pub fn logical_table(
    stage: usize,
    table: usize,
    exact: bool,
    tcam: bool,
    exact_first: bool,
    addressing: &TableAddressing,
) -> Result<Writes, RegisterError> {
    let mut ctl = 0;
    if exact {
        ctl |= logical_table_ctl::EXACT;
    }
    if tcam {
        ctl |= logical_table_ctl::TCAM;
    }
    if exact_first {
        ctl |= logical_table_ctl::EXACT_FIRST;
    }
    let next = addressing.next_hit as u64 | ((addressing.next_miss as u64) << next_table_format::MISS_SHIFT);
    let a = addressing;

    let mut writes = Writes::new();
    for (class, value) in [
        (RegClass::LogicalTableCtl, ctl),
        (RegClass::InstrAdrShiftcount, a.instr_shift as u64),
        (RegClass::InstrAdrMask, a.instr_mask),
        (RegClass::InstrAdrDefault, a.instr_default),
        (RegClass::ActiondataAdrShiftcount, a.adata_shift as u64),
        (RegClass::ActiondataAdrMask, a.adata_mask),
        (RegClass::ActiondataAdrDefault, a.adata_default),
        (RegClass::NextTableFormatData, next),
    ] {
        writes.push(RegWrite::full(class.address(stage, &[table])?, value));
    }
    Ok(writes)
}

/// Enable or disable a logical table for a thread.
pub fn predicate(stage: usize, thread: usize, table: usize, enable: bool) -> Result<Writes, RegisterError> {
    let addr = RegClass::PredicationCtl.address(stage, &[thread])?;
    check_index(RegClass::PredicationCtl, table, LOGICAL_TABLES)?;
    let bit = 1u64 << table;
    Ok(smallvec::smallvec![RegWrite::masked(addr, bit, if enable { bit } else { 0 })])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::layout::{RevA0, RevB0};
    use crate::device::registers::RegisterAddress;

    #[test]
    fn test_lane_value() {
        let v = lane_value(130, 1);
        assert_eq!(v & lane::CONTAINER_MASK, 130);
        assert_eq!((v >> lane::BYTE_SHIFT) & lane::BYTE_MASK, 1);
        assert_ne!(v & lane::ENABLE, 0);
    }

    #[test]
    fn test_ctl_half_expands_to_bytes() {
        let a0 = ctl_half(&RevA0, 0, 1, 3).unwrap();
        assert_eq!(a0.len(), 2);
        let first = RegisterAddress::decode(a0[0].address).unwrap();
        assert_eq!(first.class, RegClass::ActionHvXbarCtlByte);
        assert_eq!(first.index, 2);
        assert_eq!(a0[0].value & action_hv::SOURCE_MASK, 6);
        assert_eq!(a0[1].value & action_hv::SOURCE_MASK, 7);

        // B0 adds a half-enable write per byte
        let b0 = ctl_half(&RevB0, 0, 1, 3).unwrap();
        assert_eq!(b0.len(), 4);
    }

    #[test]
    fn test_ctl_word() {
        let writes = ctl_word(&RevA0, 2, 3, 0).unwrap();
        let bytes: Vec<u32> = writes
            .iter()
            .map(|w| RegisterAddress::decode(w.address).unwrap().index)
            .collect();
        assert_eq!(bytes, vec![12, 13, 14, 15]);
        assert!(writes.iter().all(|w| RegisterAddress::decode(w.address).unwrap().stage == 2));
    }

    #[test]
    fn test_exact_xbar_container() {
        let writes = exact_xbar_container(0, 1, 4, 7, 4).unwrap();
        assert_eq!(writes.len(), 4);
        assert_eq!(writes[3].value, lane_value(7, 3));
        assert_eq!(
            writes[3].address,
            RegClass::ExactXbarCtl.address(0, &[1, 7]).unwrap()
        );
    }

    #[test]
    fn test_tcam_logical_table_map() {
        let writes = tcam_logical_table(0, 2, &[(0, 0), (1, 2)], 1, 5).unwrap();
        assert_eq!(writes[0].value, 1 | 1 << 14);
        assert_eq!(writes[1].value, 1);
        assert_eq!(writes[2].value, 5 | tcam_outputmap::ENABLE);
    }

    #[test]
    fn test_galois_bit_masked() {
        let writes = galois_bit(0, 1, 2, 70, true).unwrap();
        assert_eq!(writes[0].mask, 1 << 6);
        assert_eq!(writes[0].value, 1 << 6);
        let reg = RegisterAddress::decode(writes[0].address).unwrap();
        assert_eq!(reg.class.unflatten(reg.index).as_slice(), &[1, 2, 2]);

        assert!(galois_bit(0, 0, 0, 1024, true).is_err());
    }

    #[test]
    fn test_unit_ram_fields() {
        let p = UnitRamPlacement {
            row: 2,
            col: 5,
            hash_function: 3,
            logical_table: 9,
            way: 1,
            line_start: 10,
            select_start: 40,
            select_width: 2,
            select_value: 3,
        };
        let writes = unit_ram(0, &p).unwrap();
        assert_eq!(writes.len(), 4);
        assert_eq!(writes[0].value, 1 | 3 << 1 | 9 << 4 | 1 << 8);
        assert_eq!(writes[1].value, 10);
        assert_eq!(writes[2].value, 40 | 2 << 6 | 3 << 9);
        assert_eq!(writes[3].mask, 1 << 5);
    }

    #[test]
    fn test_predicate_masked() {
        let writes = predicate(0, 1, 4, true).unwrap();
        assert_eq!(writes[0].mask, 1 << 4);
        assert_eq!(writes[0].value, 1 << 4);
        let writes = predicate(0, 1, 4, false).unwrap();
        assert_eq!(writes[0].value, 0);
    }

    #[test]
    fn test_predicate_rejects_table_out_of_range() {
        assert!(predicate(0, 0, LOGICAL_TABLES - 1, true).is_ok());
        for table in [LOGICAL_TABLES, 64, 1000] {
            assert!(matches!(
                predicate(0, 0, table, true),
                Err(RegisterError::IndexOutOfRange { class: "predication_ctl", .. })
            ));
        }
    }

    #[test]
    fn test_tcam_logical_table_rejects_bad_units() {
        for unit in [(2, 0), (0, 12), (64, 0), (0, 64)] {
            assert!(matches!(
                tcam_logical_table(0, 0, &[(0, 0), unit], 1, 0),
                Err(RegisterError::IndexOutOfRange { class: "tcam_mode", .. })
            ));
        }
        assert!(tcam_logical_table(0, 0, &[(1, 11)], 1, LOGICAL_TABLES).is_err());
    }

    #[test]
    fn test_unit_ram_rejects_out_of_range() {
        let base = UnitRamPlacement {
            row: 0,
            col: 11,
            hash_function: 7,
            logical_table: 15,
            way: 0,
            line_start: 0,
            select_start: 0,
            select_width: 0,
            select_value: 0,
        };
        let writes = unit_ram(0, &base).unwrap();
        assert_eq!(writes[3].mask, 1 << 11);

        for p in [
            UnitRamPlacement { col: 12, ..base },
            UnitRamPlacement { col: 64, ..base },
            UnitRamPlacement { row: 8, ..base },
            UnitRamPlacement { hash_function: 8, ..base },
            UnitRamPlacement { logical_table: 16, ..base },
        ] {
            assert!(matches!(unit_ram(0, &p), Err(RegisterError::IndexOutOfRange { .. })));
        }
    }
}
