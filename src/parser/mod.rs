//! Input file parsers
//!
//! - [`image`] - Binary configuration images (register and table writes)
//! - [`phv_file`] - TOML packet header vectors

pub mod image;
pub mod phv_file;

pub use image::{ConfigImage, ImageBuilder, ImageCommand};
pub use phv_file::PhvFile;
