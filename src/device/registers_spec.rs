//! MAU register and memory geometry.
//!
//! Centralizes address encodings, array dimensions and register bit field
//! layouts so the rest of the model never carries magic numbers.

// ============================================================================
// Address Space Layout
// ============================================================================

/// Stage shift for register and table addresses (bits 47:40)
pub const STAGE_SHIFT: u32 = 40;

/// Class/kind shift for register and table addresses (bits 39:32)
pub const CLASS_SHIFT: u32 = 32;

/// Flattened index mask (bits 31:0)
pub const INDEX_MASK: u64 = 0xFFFF_FFFF;

/// Width of the register and table address spaces
pub const ADDRESS_BITS: u32 = 48;

/// Bits an address may use; anything above is outside the address space
pub const ADDRESS_MASK: u64 = (1 << ADDRESS_BITS) - 1;

/// Maximum number of stages (global next-table ids are `stage * 16 + table` in 8 bits).
///
/// Id 0xFF is reserved for [`NEXT_TABLE_END`], so table 15 of stage 15 cannot
/// be named as a next table. It still runs when the pipe enters stage 15
/// through a lower id.
pub const MAX_STAGES: usize = 16;

/// Default number of stages in a chip
pub const DEFAULT_STAGES: usize = 12;

// ============================================================================
// PHV
// ============================================================================

/// Total number of PHV containers
pub const PHV_WORDS: usize = 224;

/// First 8-bit container (containers below are 32-bit)
pub const PHV_8BIT_BASE: usize = 64;

/// First 16-bit container
pub const PHV_16BIT_BASE: usize = 128;

// ============================================================================
// Crossbars
// ============================================================================

/// Exact-match crossbar groups
pub const EXACT_GROUPS: usize = 8;

/// Bytes per exact-match group
pub const EXACT_GROUP_BYTES: usize = 16;

/// Total exact-match bus width in bytes
pub const EXACT_BUS_BYTES: usize = EXACT_GROUPS * EXACT_GROUP_BYTES;

/// Ternary crossbar groups
pub const TERNARY_GROUPS: usize = 12;

/// Bytes per ternary group
pub const TERNARY_GROUP_BYTES: usize = 5;

/// Shared ternary mid bytes (one per pair of groups)
pub const TERNARY_MID_BYTES: usize = TERNARY_GROUPS / 2;

/// Valid-bit lanes per ternary group
pub const TERNARY_VALID_LANES: usize = 2;

pub mod lane {
    //! PHV lane selector encoding shared by every byte crossbar.

    /// Container index [7:0]
    pub const CONTAINER_MASK: u64 = 0xFF;

    /// Byte within container [9:8]
    pub const BYTE_SHIFT: u32 = 8;
    pub const BYTE_MASK: u64 = 0x3;

    /// Lane enable [10]
    pub const ENABLE: u64 = 1 << 10;

    /// Mid-byte only: take the high nibble for the odd group [11]
    pub const NIBBLE_SWAP: u64 = 1 << 11;

    /// Selector register width
    pub const WIDTH: u32 = 12;
}

pub mod validbit {
    //! Valid-bit lane encoding.

    /// Container index [7:0]
    pub const CONTAINER_MASK: u64 = 0xFF;

    /// Enable [8]
    pub const ENABLE: u64 = 1 << 8;
}

// ============================================================================
// Hash
// ============================================================================

/// Independent hash functions per stage
pub const HASH_FUNCTIONS: usize = 8;

/// Output bits per hash function
pub const HASH_OUTPUT_BITS: usize = 52;

/// Mask of valid hash output bits
pub const HASH_OUTPUT_MASK: u64 = (1 << HASH_OUTPUT_BITS) - 1;

/// Hash input width in bits (the whole exact-match bus)
pub const HASH_INPUT_BITS: usize = EXACT_BUS_BYTES * 8;

/// 32-bit Galois matrix words per output bit
pub const GALOIS_WORDS: usize = HASH_INPUT_BITS / 32;

/// Parity groups per hash function
pub const HASH_PARITY_GROUPS: usize = 4;

pub mod hash_parity {
    //! `hash_parity_ctl` fields.

    /// Destination output bit [5:0]
    pub const DEST_MASK: u64 = 0x3F;

    /// Enable [6]
    pub const ENABLE: u64 = 1 << 6;
}

// ============================================================================
// TCAM
// ============================================================================

/// TCAM unit rows per column
pub const TCAM_ROWS: usize = 12;

/// TCAM unit columns
pub const TCAM_COLS: usize = 2;

/// Total TCAM units
pub const TCAM_UNITS: usize = TCAM_ROWS * TCAM_COLS;

/// Entries per TCAM unit
pub const TCAM_DEPTH: usize = 512;

/// Entry index bits within a unit
pub const TCAM_DEPTH_BITS: u32 = 9;

/// Search key width in bits
pub const TCAM_KEY_BITS: u32 = 46;

/// Mask of valid search key bits
pub const TCAM_KEY_MASK: u64 = (1 << TCAM_KEY_BITS) - 1;

/// Logical TCAM tables per stage
pub const LOGICAL_TCAM_TABLES: usize = 8;

pub mod tcam_mode {
    //! `tcam_mode` fields.

    /// Unit enable [0]
    pub const ENABLE: u64 = 1 << 0;

    /// Ternary input group [4:1]
    pub const GROUP_SHIFT: u32 = 1;
    pub const GROUP_MASK: u64 = 0xF;

    /// Chain match vector into the next row of the same column [5]
    pub const CHAIN_OUT: u64 = 1 << 5;

    /// Priority [11:8], lower wins
    pub const PRIORITY_SHIFT: u32 = 8;
    pub const PRIORITY_MASK: u64 = 0xF;
}

pub mod tcam_outputmap {
    //! `tcam_hit_to_logical_table_ixbar_outputmap` fields.

    /// Logical table [3:0]
    pub const TABLE_MASK: u64 = 0xF;

    /// Enable [4]
    pub const ENABLE: u64 = 1 << 4;
}

// ============================================================================
// SRAM / exact match
// ============================================================================

/// Unit RAM rows
pub const SRAM_ROWS: usize = 8;

/// Unit RAM columns per row
pub const SRAM_COLS: usize = 12;

/// Lines per unit RAM
pub const SRAM_DEPTH: usize = 1024;

/// Line address bits
pub const SRAM_LINE_BITS: u32 = 10;

pub mod unitram_ctl {
    //! `unitram_ctl` fields.

    /// Unit is a match RAM [0]
    pub const MATCH_ENABLE: u64 = 1 << 0;

    /// Hash function feeding the unit [3:1]
    pub const HASH_SHIFT: u32 = 1;
    pub const HASH_MASK: u64 = 0x7;

    /// Logical table [7:4]
    pub const TABLE_SHIFT: u32 = 4;
    pub const TABLE_MASK: u64 = 0xF;

    /// Way index [10:8]
    pub const WAY_SHIFT: u32 = 8;
    pub const WAY_MASK: u64 = 0x7;
}

pub mod mem_hash_adr {
    //! `mem_hash_adr_xbar` fields (RAM select carve-out).

    /// Select start bit [5:0]
    pub const START_MASK: u64 = 0x3F;

    /// Select width [8:6], 0..=5
    pub const WIDTH_SHIFT: u32 = 6;
    pub const WIDTH_MASK: u64 = 0x7;

    /// Expected select value [13:9]
    pub const VALUE_SHIFT: u32 = 9;
    pub const VALUE_MASK: u64 = 0x1F;

    /// Widest select field
    pub const MAX_WIDTH: u32 = 5;
}

pub mod vh_xbar {
    //! `exactmatch_row_vh_xbar_ctl` fields.

    /// Exact bus group feeding the row [2:0]
    pub const GROUP_MASK: u64 = 0x7;

    /// Enable [3]
    pub const ENABLE: u64 = 1 << 3;

    /// Byte rotation [7:4]
    pub const ROTATE_SHIFT: u32 = 4;
    pub const ROTATE_MASK: u64 = 0xF;
}

pub mod match_word {
    //! Exact-match entry layout inside a 128-bit unit RAM word.

    /// word1 valid [63]
    pub const VALID: u64 = 1 << 63;

    /// word1 tag [62:20]
    pub const TAG_SHIFT: u32 = 20;
    pub const TAG_BITS: u32 = 43;
    pub const TAG_MASK: u64 = (1 << TAG_BITS) - 1;

    /// word1 payload [19:0]
    pub const PAYLOAD_MASK: u64 = 0xF_FFFF;
}

// ============================================================================
// Address distribution / action
// ============================================================================

/// Logical tables per stage
pub const LOGICAL_TABLES: usize = 16;

/// Threads (ingress, egress)
pub const THREADS: usize = 2;

/// Next-table id meaning "end of pipe"
pub const NEXT_TABLE_END: u8 = 0xFF;

/// Instruction memory depth
pub const IMEM_DEPTH: usize = 64;

/// VLIW slots per instruction
pub const IMEM_SLOTS: usize = 8;

/// Action-data memory depth (128-bit entries)
pub const ACTION_DATA_DEPTH: usize = 4096;

/// Action-data bus width in bytes
pub const ACTION_BUS_BYTES: usize = 16;

pub mod logical_table_ctl {
    //! `logical_table_ctl` fields.

    /// Exact-match results feed this table [0]
    pub const EXACT: u64 = 1 << 0;

    /// TCAM results feed this table [1]
    pub const TCAM: u64 = 1 << 1;

    /// Prefer the exact-match hit over the TCAM hit [2]
    pub const EXACT_FIRST: u64 = 1 << 2;
}

pub mod next_table_format {
    //! `next_table_format_data` fields.

    /// Next table on hit [7:0]
    pub const HIT_MASK: u64 = 0xFF;

    /// Next table on miss [15:8]
    pub const MISS_SHIFT: u32 = 8;
}

pub mod action_hv {
    //! `action_hv_xbar_ctl_byte` fields.

    /// Source byte in the action-data entry [3:0]
    pub const SOURCE_MASK: u64 = 0xF;

    /// Enable [4]
    pub const ENABLE: u64 = 1 << 4;
}
