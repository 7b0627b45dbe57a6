//! PHV input files.
//!
//! A PHV file lists the valid containers of one packet; every container not
//! listed starts invalid.
//!
//! ```toml
//! gress = "ingress"
//!
//! [[container]]
//! index = 32
//! value = 0x12345674
//!
//! [[container]]
//! index = 64
//! value = 0xAB
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::mau::{ContainerSize, Gress, Phv};

/// One container assignment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerValue {
    /// Container index
    pub index: usize,
    /// Value, must fit the container width
    pub value: u32,
}

/// On-disk PHV description.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PhvFile {
    /// Thread the packet belongs to
    pub gress: Gress,
    /// Valid containers
    pub container: Vec<ContainerValue>,
}

impl PhvFile {
    /// Parse from TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse PHV file")
    }

    /// Load from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Build the PHV, rejecting unknown containers and over-wide values.
    pub fn to_phv(&self) -> Result<Phv> {
        let mut phv = Phv::new(self.gress);
        for c in &self.container {
            let Some(size) = ContainerSize::of(c.index) else {
                bail!("Container {} does not exist", c.index);
            };
            if c.value & !size.mask() != 0 {
                bail!(
                    "Value 0x{:X} does not fit {}-bit container {}",
                    c.value,
                    size.bits(),
                    c.index
                );
            }
            phv.set(c.index, c.value);
        }
        Ok(phv)
    }

    /// Describe the valid containers of a PHV.
    pub fn from_phv(phv: &Phv) -> Self {
        Self {
            gress: phv.gress(),
            container: phv
                .iter_valid()
                .map(|(index, value)| ContainerValue { index, value })
                .collect(),
        }
    }
}
