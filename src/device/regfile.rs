//! Per-stage register storage.
//!
//! One dense array per register class, keyed by the flattened index. The
//! power-on value of every register is zero, so reading a register that was
//! never written is always defined.

use super::registers::RegClass;

/// Register storage for one MAU stage.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    /// values[class id] = registers of that class
    values: Vec<Vec<u64>>,
}

impl RegisterFile {
    /// Create a register file with every register at its power-on value.
    pub fn new() -> Self {
        let slots = RegClass::ALL.iter().map(|&c| c as usize).max().unwrap_or(0) + 1;
        let mut values = vec![Vec::new(); slots];
        for &class in RegClass::ALL {
            values[class as usize] = vec![0; class.len()];
        }
        Self { values }
    }

    /// Read a register by flat index. Out-of-range indices read 0.
    #[inline]
    pub fn read(&self, class: RegClass, index: usize) -> u64 {
        self.values[class as usize].get(index).copied().unwrap_or(0)
    }

    /// Read a register by coordinates. Invalid coordinates read 0.
    #[inline]
    pub fn get(&self, class: RegClass, coords: &[usize]) -> u64 {
        match class.flatten(coords) {
            Ok(index) => self.read(class, index as usize),
            Err(_) => 0,
        }
    }

    /// Replace a register value. The caller has validated the index and width.
    #[inline]
    pub fn write(&mut self, class: RegClass, index: usize, value: u64) {
        if let Some(slot) = self.values[class as usize].get_mut(index) {
            *slot = value;
        }
    }

    /// Return every register to its power-on value.
    pub fn reset(&mut self) {
        for bank in &mut self.values {
            bank.iter_mut().for_each(|v| *v = 0);
        }
    }

    /// Iterate over registers holding a non-zero value.
    pub fn non_zero(&self) -> impl Iterator<Item = (RegClass, usize, u64)> + '_ {
        RegClass::ALL.iter().flat_map(move |&class| {
            self.values[class as usize]
                .iter()
                .enumerate()
                .filter(|&(_, &v)| v != 0)
                .map(move |(i, &v)| (class, i, v))
        })
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}
