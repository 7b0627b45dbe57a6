//! Galois-field hash engine.
//!
//! Each hash function is a 52 x 1024 bit matrix over GF(2) applied to the
//! exact-match bus, XORed with a seed. Up to four parity groups then
//! overwrite a chosen output bit with the parity of a masked subset of the
//! pre-parity result.
//!
//! The whole transform is affine: for any inputs `a` and `b`,
//! `hash(a ^ b) == hash(a) ^ hash(b) ^ hash(0)`.

use log::trace;

use crate::device::registers_spec::{
    hash_parity, EXACT_GROUPS, EXACT_GROUP_BYTES, GALOIS_WORDS, HASH_FUNCTIONS, HASH_OUTPUT_BITS,
    HASH_OUTPUT_MASK, HASH_PARITY_GROUPS,
};
use crate::device::{RegClass, RegisterFile};

use super::xbar::ExactBus;

/// Parity group: output bit `dest` becomes the parity of `pre & mask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParityGroup {
    /// Destination output bit
    pub dest: usize,
    /// Source bits (the destination bit itself is excluded)
    pub mask: u64,
}

/// One hash function, as programmed into a stage.
#[derive(Debug, Clone)]
pub struct HashFunction {
    /// matrix[out_bit][word] = coefficients of input bits word*32..word*32+31
    matrix: Box<[[u32; GALOIS_WORDS]; HASH_OUTPUT_BITS]>,
    seed: u64,
    group_enable: u8,
    parity: [Option<ParityGroup>; HASH_PARITY_GROUPS],
}

impl HashFunction {
    /// Descriptor with an all-zero matrix and no parity groups.
    pub fn new(seed: u64, group_enable: u8) -> Self {
        Self {
            matrix: Box::new([[0; GALOIS_WORDS]; HASH_OUTPUT_BITS]),
            seed: seed & HASH_OUTPUT_MASK,
            group_enable,
            parity: [None; HASH_PARITY_GROUPS],
        }
    }

    /// Read hash function `function` from a stage's registers.
    pub fn from_registers(regs: &RegisterFile, function: usize) -> Self {
        let mut hf = Self::new(
            regs.get(RegClass::HashSeed, &[function]),
            regs.get(RegClass::HashGroupEnable, &[function]) as u8,
        );
        for (bit, row) in hf.matrix.iter_mut().enumerate() {
            for (word, slot) in row.iter_mut().enumerate() {
                *slot = regs.get(RegClass::GaloisFieldMatrix, &[function, bit, word]) as u32;
            }
        }
        for (group, slot) in hf.parity.iter_mut().enumerate() {
            let ctl = regs.get(RegClass::HashParityCtl, &[function, group]);
            if ctl & hash_parity::ENABLE != 0 {
                let dest = (ctl & hash_parity::DEST_MASK) as usize;
                if dest < HASH_OUTPUT_BITS {
                    *slot = Some(ParityGroup {
                        dest,
                        mask: regs.get(RegClass::HashParityMask, &[function, group]),
                    });
                }
            }
        }
        hf
    }

    /// Set one matrix coefficient.
    pub fn set_coefficient(&mut self, out_bit: usize, in_bit: usize, on: bool) {
        if let Some(word) = self.matrix.get_mut(out_bit).and_then(|r| r.get_mut(in_bit / 32)) {
            let bit = 1u32 << (in_bit % 32);
            if on {
                *word |= bit;
            } else {
                *word &= !bit;
            }
        }
    }

    /// Install a parity group.
    pub fn set_parity(&mut self, group: usize, parity: ParityGroup) {
        if let Some(slot) = self.parity.get_mut(group) {
            *slot = Some(parity);
        }
    }

    /// Seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Hash the exact-match bus.
    pub fn compute(&self, bus: &ExactBus) -> u64 {
        let input = self.gated_words(bus);

        let mut pre = 0u64;
        for (bit, row) in self.matrix.iter().enumerate() {
            let ones: u32 = row.iter().zip(&input).map(|(&m, &x)| (m & x).count_ones()).sum();
            pre |= ((ones & 1) as u64) << bit;
        }
        pre ^= self.seed;

        let mut out = pre;
        for group in self.parity.iter().flatten() {
            let bit = (pre & group.mask & !(1u64 << group.dest) & HASH_OUTPUT_MASK).count_ones() & 1;
            out = (out & !(1u64 << group.dest)) | ((bit as u64) << group.dest);
        }
        out
    }

    /// Bus as 32-bit words with disabled groups zeroed.
    fn gated_words(&self, bus: &ExactBus) -> [u32; GALOIS_WORDS] {
        let mut words = [0u32; GALOIS_WORDS];
        for group in 0..EXACT_GROUPS {
            if self.group_enable & (1 << group) == 0 {
                continue;
            }
            let per_group = EXACT_GROUP_BYTES / 4;
            for w in 0..per_group {
                let base = group * EXACT_GROUP_BYTES + w * 4;
                words[group * per_group + w] =
                    u32::from_le_bytes([bus[base], bus[base + 1], bus[base + 2], bus[base + 3]]);
            }
        }
        words
    }
}

/// Compute hash function `function` over the bus.
pub fn compute_hash(regs: &RegisterFile, function: usize, bus: &ExactBus) -> u64 {
    HashFunction::from_registers(regs, function).compute(bus)
}

/// Compute every hash function of a stage.
pub fn compute_all(regs: &RegisterFile, bus: &ExactBus) -> [u64; HASH_FUNCTIONS] {
    let mut out = [0u64; HASH_FUNCTIONS];
    for (f, slot) in out.iter_mut().enumerate() {
        *slot = compute_hash(regs, f, bus);
        trace!("hash[{}] = 0x{:013X}", f, *slot);
    }
    out
}
