//! MAU stage model.
//!
//! The five combinational blocks of a match-action stage, each a read-only
//! view over the stage's registers and table memories:
//!
//! - [`xbar`]: PHV bytes into the exact-match bus and ternary keys
//! - [`hash`]: Galois-field hash functions over the exact-match bus
//! - [`tcam`]: ternary match with chaining and priority
//! - [`exact`]: hash-addressed unit RAM lookup with tag and key check
//! - [`adist`] and [`action`]: result merge, addressing and VLIW execution
//!
//! [`stage`] composes them into a single evaluation pass.

pub mod phv;
pub mod xbar;
pub mod hash;
pub mod tcam;
pub mod exact;
pub mod adist;
pub mod action;
pub mod stage;

pub use action::{ActionDecodeError, ActionSlot, Instruction, Opcode, Operand};
pub use adist::{HitSource, ResolvedAction, TableConfig, TableState};
pub use exact::{ExactEntry, ExactHit};
pub use hash::{compute_hash, HashFunction};
pub use phv::{ContainerSize, Gress, Phv};
pub use stage::{MauStage, StageOutput, TableOutcome};
pub use tcam::{TcamEntry, TcamHit};
pub use xbar::{Crossbar, LaneSpec, PhvLaneRef};
