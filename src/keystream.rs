//! Combined-LFSR keystream generator.
//!
//! Several linear feedback shift registers are clocked together; their
//! top bits are XORed into an S-box address and the S-box output is
//! emitted bit by bit, least-significant first.

use std::collections::VecDeque;

use sha2::{Digest, Sha256};

const REFERENCE_SBOX: [u8; 64] = [
    7, 6, 5, 10, 8, 1, 12, 13, 6, 11, 15, 11, 1, 6, 2, 7, 0, 2, 8, 12, 3, 2, 15, 0, 1, 15, 9, 7,
    13, 6, 7, 5, 9, 11, 3, 3, 12, 12, 5, 10, 14, 14, 1, 4, 13, 3, 5, 10, 4, 9, 11, 15, 10, 14, 8,
    13, 14, 2, 4, 0, 0, 4, 9, 8,
];

const REFERENCE_SBOX_OUTPUT_BITS: u32 = 4;

const REFERENCE_TAPS: [&[u32]; 5] = [
    &[0x0, 0x1, 0x2, 0x3, 0x6, 0x9, 0xa],
    &[0x0, 0x1, 0x2, 0x3, 0x6, 0x7, 0x9, 0xa, 0xb],
    &[0x0, 0x2, 0x7, 0x8, 0xa, 0xb, 0xc],
    &[0x0, 0x1, 0x3, 0x7, 0xa, 0xb, 0xd],
    &[0x0, 0x3, 0x4, 0xa, 0xb, 0xc, 0xe],
];

/// Fixed-width shift register with a feedback polynomial given as tap positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lfsr {
    poly: u64,
    width: u32,
    mask: u64,
    state: u64,
}

impl Lfsr {
    // Taps must not exceed `width`, and `width` must stay below 64.
    fn new(taps: &[u32], width: u32) -> Self {
        let poly = taps.iter().fold(0u64, |poly, &tap| poly | (1u64 << tap));
        Self {
            poly,
            width,
            mask: (1u64 << width) - 1,
            state: 1,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn state(&self) -> u64 {
        self.state
    }

    pub fn set_state(&mut self, state: u64) {
        self.state = state & self.mask;
    }

    /// Returns the top bit and advances the register by one shift.
    pub fn next(&mut self) -> u8 {
        let bit = (self.state >> (self.width - 1)) & 1;
        self.state <<= 1;
        if bit == 1 {
            self.state ^= self.poly;
        }
        self.state &= self.mask;
        bit as u8
    }
}

/// Nonlinear combiner: a power-of-two lookup table of small output groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sbox {
    table: Vec<u8>,
    input_bits: u32,
    output_bits: u32,
}

impl Sbox {
    // `table.len()` is a power of two; each entry holds `output_bits` bits.
    fn new(table: &[u8], output_bits: u32) -> Self {
        Self {
            input_bits: table.len().trailing_zeros(),
            table: table.to_vec(),
            output_bits,
        }
    }

    pub fn input_bits(&self) -> u32 {
        self.input_bits
    }

    pub fn output_bits(&self) -> u32 {
        self.output_bits
    }

    pub fn get(&self, address: usize) -> u8 {
        self.table[address]
    }
}

/// Deterministic bit source built from LFSRs and one S-box.
#[derive(Debug, Clone)]
pub struct KeystreamGenerator {
    lfsrs: Vec<Lfsr>,
    sbox: Sbox,
    queue: VecDeque<u8>,
}

impl KeystreamGenerator {
    fn new(lfsrs: Vec<Lfsr>, sbox: Sbox) -> Self {
        Self {
            lfsrs,
            sbox,
            queue: VecDeque::new(),
        }
    }

    /// Five registers of widths 10..=14 combined through a 6-bit-in, 4-bit-out S-box.
    pub fn reference() -> Self {
        let lfsrs = REFERENCE_TAPS
            .iter()
            .map(|taps| {
                let width = taps.iter().copied().max().unwrap_or(1);
                Lfsr::new(taps, width)
            })
            .collect();
        Self::new(lfsrs, Sbox::new(&REFERENCE_SBOX, REFERENCE_SBOX_OUTPUT_BITS))
    }

    /// Total register bits the seed has to cover.
    pub fn seed_demand(&self) -> usize {
        self.lfsrs.iter().map(|l| l.width() as usize).sum()
    }

    /// Expands `(secret, iv)` into initial register states.
    ///
    /// The material is a chain of SHA-256 digests over `secret#iv` followed by
    /// the decimal bit demand. It is read as one big-endian integer, and each
    /// register takes its width from the low end in enumeration order.
    pub fn seed(&mut self, secret: &[u8], iv: u64) {
        let demand = self.seed_demand();
        let demand_tag = demand.to_string();

        let mut cur = Vec::with_capacity(secret.len() + 21);
        cur.extend_from_slice(secret);
        cur.push(b'#');
        cur.extend_from_slice(iv.to_string().as_bytes());

        let mut material = Vec::new();
        while material.len() * 8 < demand {
            let mut hasher = Sha256::new();
            hasher.update(&cur);
            hasher.update(demand_tag.as_bytes());
            cur = hasher.finalize().to_vec();
            material.extend_from_slice(&cur);
        }

        let mut offset = 0;
        for lfsr in &mut self.lfsrs {
            let mut state = 0u64;
            for j in 0..lfsr.width() as usize {
                state |= u64::from(low_bit(&material, offset + j)) << j;
            }
            lfsr.set_state(state);
            offset += lfsr.width() as usize;
        }
        self.queue.clear();
    }

    pub fn next_bit(&mut self) -> u8 {
        if self.queue.is_empty() {
            let mut address = 0usize;
            for j in 0..self.sbox.input_bits() {
                let bit = self.lfsrs.iter_mut().fold(0u8, |acc, lfsr| acc ^ lfsr.next());
                address |= usize::from(bit) << j;
            }
            let group = self.sbox.get(address);
            for i in 0..self.sbox.output_bits() {
                self.queue.push_back((group >> i) & 1);
            }
        }
        self.queue.pop_front().unwrap_or(0)
    }

    /// Register contents as a `0`/`1` string, each register low bit first.
    pub fn snapshot_state(&self) -> String {
        let mut out = String::with_capacity(self.seed_demand());
        for lfsr in &self.lfsrs {
            for j in 0..lfsr.width() {
                out.push(if (lfsr.state() >> j) & 1 == 1 { '1' } else { '0' });
            }
        }
        out
    }
}

// Bit `index` counted from the least-significant end of a big-endian byte string.
fn low_bit(bytes: &[u8], index: usize) -> u8 {
    let byte = bytes[bytes.len() - 1 - index / 8];
    (byte >> (index % 8)) & 1
}
