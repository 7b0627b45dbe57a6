//! Packet header vector.
//!
//! The PHV is a fixed set of containers of three widths. Each container
//! carries its own valid bit; an invalid container reads as zero through
//! every crossbar.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::registers_spec::{PHV_16BIT_BASE, PHV_8BIT_BASE, PHV_WORDS};

/// Thread a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gress {
    /// Ingress pipeline (thread 0)
    #[default]
    Ingress,
    /// Egress pipeline (thread 1)
    Egress,
}

impl Gress {
    /// Thread index used by the per-thread registers.
    #[inline]
    pub fn thread(self) -> usize {
        match self {
            Gress::Ingress => 0,
            Gress::Egress => 1,
        }
    }
}

impl fmt::Display for Gress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gress::Ingress => write!(f, "ingress"),
            Gress::Egress => write!(f, "egress"),
        }
    }
}

/// Container width class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerSize {
    /// 8-bit container
    B8,
    /// 16-bit container
    B16,
    /// 32-bit container
    B32,
}

impl ContainerSize {
    /// Size of container `index`, `None` past the end of the PHV.
    pub fn of(index: usize) -> Option<Self> {
        match index {
            i if i < PHV_8BIT_BASE => Some(ContainerSize::B32),
            i if i < PHV_16BIT_BASE => Some(ContainerSize::B8),
            i if i < PHV_WORDS => Some(ContainerSize::B16),
            _ => None,
        }
    }

    /// Width in bits.
    #[inline]
    pub fn bits(self) -> u32 {
        match self {
            ContainerSize::B8 => 8,
            ContainerSize::B16 => 16,
            ContainerSize::B32 => 32,
        }
    }

    /// Width in bytes.
    #[inline]
    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }

    /// Mask of the container's bits.
    #[inline]
    pub fn mask(self) -> u32 {
        match self {
            ContainerSize::B8 => 0xFF,
            ContainerSize::B16 => 0xFFFF,
            ContainerSize::B32 => 0xFFFF_FFFF,
        }
    }
}

/// Packet header vector.
#[derive(Clone, PartialEq, Eq)]
pub struct Phv {
    words: [u32; PHV_WORDS],
    valid: [bool; PHV_WORDS],
    gress: Gress,
}

impl Phv {
    /// Create an empty PHV (every container invalid and zero).
    pub fn new(gress: Gress) -> Self {
        Self {
            words: [0; PHV_WORDS],
            valid: [false; PHV_WORDS],
            gress,
        }
    }

    /// Thread this PHV travels on.
    #[inline]
    pub fn gress(&self) -> Gress {
        self.gress
    }

    /// Container value; invalid or out-of-range containers read 0.
    #[inline]
    pub fn get(&self, index: usize) -> u32 {
        match self.valid.get(index) {
            Some(true) => self.words[index],
            _ => 0,
        }
    }

    /// Whether a container is valid.
    #[inline]
    pub fn is_valid(&self, index: usize) -> bool {
        self.valid.get(index).copied().unwrap_or(false)
    }

    /// Set a container (masked to its width) and mark it valid.
    /// Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize, value: u32) {
        if let Some(size) = ContainerSize::of(index) {
            self.words[index] = value & size.mask();
            self.valid[index] = true;
        }
    }

    /// Clear a container and its valid bit.
    pub fn invalidate(&mut self, index: usize) {
        if index < PHV_WORDS {
            self.words[index] = 0;
            self.valid[index] = false;
        }
    }

    /// Byte `byte` of a container (0 = least significant). Bytes past the
    /// container width read 0.
    #[inline]
    pub fn byte(&self, index: usize, byte: usize) -> u8 {
        match ContainerSize::of(index) {
            Some(size) if byte < size.bytes() => (self.get(index) >> (byte * 8)) as u8,
            _ => 0,
        }
    }

    /// Containers whose value or validity differs from `other`.
    pub fn diff(&self, other: &Phv) -> Vec<usize> {
        (0..PHV_WORDS)
            .filter(|&i| self.valid[i] != other.valid[i] || self.get(i) != other.get(i))
            .collect()
    }

    /// Iterate over valid containers.
    pub fn iter_valid(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        (0..PHV_WORDS).filter(|&i| self.valid[i]).map(|i| (i, self.words[i]))
    }
}

impl Default for Phv {
    fn default() -> Self {
        Self::new(Gress::Ingress)
    }
}

impl fmt::Debug for Phv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (i, v) in self.iter_valid() {
            map.entry(&i, &format_args!("0x{:X}", v));
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_sizes() {
        assert_eq!(ContainerSize::of(0), Some(ContainerSize::B32));
        assert_eq!(ContainerSize::of(63), Some(ContainerSize::B32));
        assert_eq!(ContainerSize::of(64), Some(ContainerSize::B8));
        assert_eq!(ContainerSize::of(128), Some(ContainerSize::B16));
        assert_eq!(ContainerSize::of(223), Some(ContainerSize::B16));
        assert_eq!(ContainerSize::of(224), None);
    }

    #[test]
    fn test_set_masks_to_width() {
        let mut phv = Phv::default();
        phv.set(64, 0x1234);
        phv.set(128, 0xABCD_EF01);
        assert_eq!(phv.get(64), 0x34);
        assert_eq!(phv.get(128), 0xEF01);
        assert!(phv.is_valid(64));
    }

    #[test]
    fn test_invalid_reads_zero() {
        let mut phv = Phv::default();
        phv.set(5, 0xDEAD_BEEF);
        phv.invalidate(5);
        assert_eq!(phv.get(5), 0);
        assert_eq!(phv.byte(5, 0), 0);
        assert_eq!(phv.get(500), 0);
    }

    #[test]
    fn test_bytes() {
        let mut phv = Phv::default();
        phv.set(1, 0x1122_3344);
        phv.set(130, 0xAABB);
        assert_eq!(phv.byte(1, 0), 0x44);
        assert_eq!(phv.byte(1, 3), 0x11);
        assert_eq!(phv.byte(130, 1), 0xAA);
        assert_eq!(phv.byte(130, 2), 0);
    }

    #[test]
    fn test_diff() {
        let mut a = Phv::default();
        a.set(3, 7);
        let mut b = a.clone();
        assert!(a.diff(&b).is_empty());
        b.set(3, 8);
        b.set(70, 0);
        assert_eq!(a.diff(&b), vec![3, 70]);
    }

    #[test]
    fn test_gress_thread() {
        assert_eq!(Gress::Ingress.thread(), 0);
        assert_eq!(Gress::Egress.thread(), 1);
        assert_eq!(Gress::Egress.to_string(), "egress");
    }
}
