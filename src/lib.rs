//! mau-model library
//!
//! Functional model of a match-action unit pipeline: register space,
//! crossbars, hash, TCAM and exact-match lookup, address distribution and
//! VLIW action execution.

pub mod config;
pub mod device;
pub mod mau;
pub mod parser;
