//! The BCH codec proper: generator polynomial, encoding, and syndrome decoding.

use super::gf::GaloisField;
use super::{BchConfig, BchError, Codec, Verdict};

/// A BCH codec instance for one [BchConfig]
///
/// The ECC register is held in a `u128`, with the coefficient of x^k in bit k, which limits the
/// code to 128 ECC bits.
#[derive(Debug, Clone)]
pub struct Bch {
    config: BchConfig,
    gf: GaloisField,

    /// Degree of the generator polynomial, and thus number of ECC bits
    ecc_bits: u32,

    /// Generator polynomial, without its leading x^ecc_bits term
    gen: u128,

    /// Remainders of `b(x) * x^ecc_bits mod g(x)` for every byte value `b`
    mod8: Box<[u128; 256]>,
}

impl Bch {
    pub fn new(config: BchConfig) -> Result<Self, BchError> {
        let gf = GaloisField::new(config.m, config.prim_poly)?;

        if config.t == 0 || config.m * config.t >= gf.n() {
            return Err(BchError::InvalidCapacity(config.t));
        }

        let (ecc_bits, gen) = generator_polynomial(&gf, config.t)?;

        let mut bch = Self {
            config,
            gf,
            ecc_bits,
            gen,
            mod8: Box::new([0; 256]),
        };

        let mut mod8 = Box::new([0u128; 256]);
        for (byte, entry) in mod8.iter_mut().enumerate() {
            *entry = bch.remainder_bitwise((byte as u128) << (ecc_bits - 8), 8);
        }
        bch.mod8 = mod8;

        Ok(bch)
    }

    pub fn config(&self) -> BchConfig {
        self.config
    }

    fn mask(&self) -> u128 {
        u128::MAX >> (128 - self.ecc_bits)
    }

    /// Shift `reg` left by `shifts` zero bits, reducing modulo g(x) as we go
    fn remainder_bitwise(&self, mut reg: u128, shifts: u32) -> u128 {
        let top = 1u128 << (self.ecc_bits - 1);
        for _ in 0..shifts {
            let feedback = reg & top != 0;
            reg = (reg << 1) & self.mask();
            if feedback {
                reg ^= self.gen;
            }
        }
        reg
    }

    fn check_len(&self, data: &[u8]) -> Result<(), BchError> {
        if data.len() > self.max_data_len() {
            return Err(BchError::DataTooLong {
                len: data.len(),
                max: self.max_data_len(),
            });
        }
        Ok(())
    }

    fn swap(&self, byte: u8) -> u8 {
        if self.config.swap_bits {
            byte.reverse_bits()
        } else {
            byte
        }
    }

    /// Run `data` through the encoder LFSR a byte at a time
    fn remainder(&self, data: &[u8]) -> u128 {
        let shift = self.ecc_bits - 8;
        data.iter().fold(0u128, |reg, &byte| {
            let index = ((reg >> shift) as u8) ^ self.swap(byte);
            ((reg << 8) & self.mask()) ^ self.mod8[index as usize]
        })
    }

    /// Unpack left-justified ECC bytes into a register
    fn load_ecc(&self, ecc: &[u8]) -> Result<u128, BchError> {
        if ecc.len() != self.ecc_bytes() {
            return Err(BchError::EccLength {
                len: ecc.len(),
                expected: self.ecc_bytes(),
            });
        }

        let packed = ecc
            .iter()
            .fold(0u128, |acc, &byte| (acc << 8) | u128::from(self.swap(byte)));

        // Bits past ecc_bits in the final byte are padding
        Ok(packed >> (8 * self.ecc_bytes() as u32 - self.ecc_bits))
    }

    fn store_ecc(&self, reg: u128) -> Vec<u8> {
        let reg = reg << (8 * self.ecc_bytes() as u32 - self.ecc_bits);
        (0..self.ecc_bytes())
            .rev()
            .map(|i| self.swap((reg >> (8 * i)) as u8))
            .collect()
    }

    /// Evaluate the received-minus-expected remainder at α^1 .. α^2t
    fn syndromes(&self, residue: u128) -> Vec<u32> {
        let t = self.config.t as usize;
        let mut syn = vec![0u32; 2 * t];

        let mut bits = residue;
        while bits != 0 {
            let degree = bits.trailing_zeros();
            for j in (0..2 * t).step_by(2) {
                syn[j] ^= self.gf.pow((j as u32 + 1) * degree);
            }
            bits &= bits - 1;
        }

        // S(2j) = S(j)^2 over a binary field
        for j in 0..t {
            syn[2 * j + 1] = self.gf.sqr(syn[j]);
        }

        syn
    }

    /// Simplified binary Berlekamp-Massey: returns the error locator polynomial, lowest degree
    /// coefficient first, or None if its degree exceeds t
    fn error_locator(&self, syn: &[u32]) -> Option<Vec<u32>> {
        let gf = &self.gf;
        let t = self.config.t as usize;
        let n = gf.n();

        // Room for every term a (t+1)-degree-bounded update can touch
        let size = 4 * t + 2;
        let mut elp = vec![0u32; size];
        let mut pelp = vec![0u32; size];
        let (mut elp_deg, mut pelp_deg) = (0usize, 0usize);
        elp[0] = 1;
        pelp[0] = 1;

        let mut d = syn[0];
        let mut pd = 1u32;
        let mut pp: isize = -1;

        let mut i = 0;
        while i < t && elp_deg <= t {
            if d != 0 {
                let k = (2 * i as isize - pp) as usize;
                let elp_copy = elp.clone();
                let elp_copy_deg = elp_deg;

                // elp(x) += (d / pd) * x^k * pelp(x)
                let scale = gf.log(d) + n - gf.log(pd);
                for j in 0..=pelp_deg {
                    if pelp[j] != 0 {
                        elp[j + k] ^= gf.pow(scale + gf.log(pelp[j]));
                    }
                }

                let deg = pelp_deg + k;
                if deg > elp_deg {
                    elp_deg = deg;
                    pelp = elp_copy;
                    pelp_deg = elp_copy_deg;
                    pd = d;
                    pp = 2 * i as isize;
                }
            }

            // Discrepancy for the next odd syndrome
            if i + 1 < t {
                d = syn[2 * i + 2];
                for j in 1..=elp_deg.min(2 * i + 2) {
                    d ^= gf.mul(elp[j], syn[2 * i + 2 - j]);
                }
            }

            i += 1;
        }

        if elp_deg > t {
            return None;
        }

        elp.truncate(elp_deg + 1);
        Some(elp)
    }

    /// Chien search: find every codeword degree `p < nbits` where α^-p is a root of `elp`
    fn locate(&self, elp: &[u32], nbits: u32) -> Vec<u32> {
        let gf = &self.gf;
        let n = gf.n();

        let logs: Vec<Option<u32>> = elp
            .iter()
            .map(|&c| (c != 0).then(|| gf.log(c)))
            .collect();

        (0..nbits)
            .filter(|&p| {
                let x = n - p % n;
                let sum = logs
                    .iter()
                    .enumerate()
                    .filter_map(|(j, log)| log.map(|l| gf.pow(l + (j as u32 * x) % n)))
                    .fold(0, |acc, term| acc ^ term);
                sum == 0
            })
            .collect()
    }
}

/// Build g(x) as the product of (x - β) over the cyclotomic cosets of α^1, α^3, ..., α^(2t-1).
///
/// Returns the degree and the coefficients below the leading term.
fn generator_polynomial(gf: &GaloisField, t: u32) -> Result<(u32, u128), BchError> {
    let n = gf.n();

    let mut is_root = vec![false; n as usize];
    for i in 0..t {
        let mut r = 2 * i + 1;
        for _ in 0..gf.m() {
            is_root[r as usize] = true;
            r = (2 * r) % n;
        }
    }

    // Coefficients in GF(2^m), lowest degree first
    let mut g = vec![1u32];
    for (root, _) in is_root.iter().enumerate().filter(|&(_, &r)| r) {
        let beta = gf.pow(root as u32);
        let mut next = vec![0u32; g.len() + 1];
        for (k, &coeff) in g.iter().enumerate() {
            next[k + 1] ^= coeff;
            next[k] ^= gf.mul(coeff, beta);
        }
        g = next;
    }

    let degree = (g.len() - 1) as u32;
    if !(8..=128).contains(&degree) {
        return Err(BchError::UnsupportedEccSize(degree));
    }

    // Minimal polynomials have binary coefficients, so this is lossless
    debug_assert!(g.iter().all(|&c| c <= 1));
    let gen = g[..degree as usize]
        .iter()
        .enumerate()
        .fold(0u128, |acc, (k, &c)| acc | (u128::from(c & 1) << k));

    Ok((degree, gen))
}

impl Codec for Bch {
    fn ecc_bytes(&self) -> usize {
        self.ecc_bits.div_ceil(8) as usize
    }

    fn max_data_len(&self) -> usize {
        ((self.gf.n() - self.ecc_bits) / 8) as usize
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, BchError> {
        self.check_len(data)?;
        Ok(self.store_ecc(self.remainder(data)))
    }

    fn decode(&self, data: &[u8], ecc: &[u8]) -> Result<Verdict, BchError> {
        self.check_len(data)?;

        let residue = self.remainder(data) ^ self.load_ecc(ecc)?;
        if residue == 0 {
            return Ok(Verdict::Clean);
        }

        let syn = self.syndromes(residue);
        let Some(elp) = self.error_locator(&syn) else {
            return Ok(Verdict::Uncorrectable);
        };

        // A nonzero residue with a trivial locator cannot be explained by <= t errors
        let errors = elp.len() - 1;
        if errors == 0 {
            return Ok(Verdict::Uncorrectable);
        }

        let nbits = 8 * data.len() as u32 + self.ecc_bits;
        let roots = self.locate(&elp, nbits);
        if roots.len() != errors {
            return Ok(Verdict::Uncorrectable);
        }

        let positions = roots
            .into_iter()
            .map(|degree| {
                // Stream position counts from the first (highest-degree) bit
                let pos = (nbits - 1 - degree) as usize;
                if self.config.swap_bits {
                    pos
                } else {
                    (pos & !7) | (7 - (pos & 7))
                }
            })
            .collect();

        Ok(Verdict::Corrected(positions))
    }
}

#[cfg(test)]
fn flip(buf: &mut [u8], pos: usize) {
    buf[pos / 8] ^= 1 << (pos % 8);
}

#[test]
fn test_default_geometry() -> anyhow::Result<()> {
    let bch = Bch::new(BchConfig::NAND_8BIT)?;
    assert_eq!(bch.ecc_bits, 112);
    assert_eq!(bch.ecc_bytes(), 14);
    assert!(bch.max_data_len() >= 514);
    Ok(())
}

#[test]
fn test_erased_data_has_zero_ecc() -> anyhow::Result<()> {
    // In codec polarity, erased flash is all zeroes, and so is its ECC
    let bch = Bch::new(BchConfig::NAND_8BIT)?;
    assert_eq!(bch.encode(&[0u8; 514])?, vec![0u8; 14]);
    assert_eq!(bch.decode(&[0u8; 514], &[0u8; 14])?, Verdict::Clean);
    Ok(())
}

#[test]
fn test_bytewise_matches_bitwise() -> anyhow::Result<()> {
    let bch = Bch::new(BchConfig::NAND_8BIT)?;
    let data: Vec<u8> = (0..64u32).map(|i| (i * 37 + 11) as u8).collect();

    let mut reg = 0u128;
    for &byte in &data {
        for bit in (0..8).rev() {
            let feedback = ((reg >> (bch.ecc_bits - 1)) & 1) as u8 ^ ((byte >> bit) & 1);
            reg = (reg << 1) & bch.mask();
            if feedback != 0 {
                reg ^= bch.gen;
            }
        }
    }

    assert_eq!(bch.remainder(&data), reg);
    Ok(())
}

#[test]
fn test_correct_up_to_t() -> anyhow::Result<()> {
    use rand::{rngs::StdRng, seq::index::sample, Rng, SeedableRng};

    let bch = Bch::new(BchConfig::NAND_8BIT)?;
    let mut rng = StdRng::seed_from_u64(0x402b);

    for errors in 1..=8 {
        let mut data = vec![0u8; 514];
        rng.fill(&mut data[..]);
        let ecc = bch.encode(&data)?;

        let mut block = [data.clone(), ecc.clone()].concat();
        let mut injected = sample(&mut rng, block.len() * 8, errors).into_vec();
        for &pos in &injected {
            flip(&mut block, pos);
        }

        let (bad_data, bad_ecc) = block.split_at(data.len());
        let Verdict::Corrected(mut found) = bch.decode(bad_data, bad_ecc)? else {
            panic!("{errors} errors not corrected");
        };

        found.sort_unstable();
        injected.sort_unstable();
        assert_eq!(found, injected);

        for &pos in &found {
            flip(&mut block, pos);
        }
        assert_eq!(block, [data, ecc].concat());
    }

    Ok(())
}

#[test]
fn test_too_many_errors() -> anyhow::Result<()> {
    let bch = Bch::new(BchConfig::NAND_8BIT)?;
    let mut data: Vec<u8> = (0..514u32).map(|i| (i * 7) as u8).collect();
    let ecc = bch.encode(&data)?;

    // Fill the first 5 bytes with errors: 40 flipped bits is far past t=8
    for byte in &mut data[..5] {
        *byte ^= 0xFF;
    }
    assert_eq!(bch.decode(&data, &ecc)?, Verdict::Uncorrectable);

    Ok(())
}

#[test]
fn test_swap_bits() -> anyhow::Result<()> {
    let bch = Bch::new(BchConfig {
        swap_bits: true,
        ..BchConfig::NAND_8BIT
    })?;

    let data = vec![0xC3u8; 100];
    let ecc = bch.encode(&data)?;

    let mut block = [data.clone(), ecc].concat();
    flip(&mut block, 17);
    flip(&mut block, 805);

    let (bad_data, bad_ecc) = block.split_at(data.len());
    let Verdict::Corrected(mut found) = bch.decode(bad_data, bad_ecc)? else {
        panic!("not corrected");
    };
    found.sort_unstable();
    assert_eq!(found, [17, 805]);

    Ok(())
}

#[test]
fn test_rejects_bad_lengths() -> anyhow::Result<()> {
    let bch = Bch::new(BchConfig::NAND_8BIT)?;
    assert!(matches!(
        bch.encode(&vec![0u8; bch.max_data_len() + 1]),
        Err(BchError::DataTooLong { .. })
    ));
    assert!(matches!(
        bch.decode(&[0u8; 16], &[0u8; 13]),
        Err(BchError::EccLength { len: 13, .. })
    ));
    assert!(matches!(
        Bch::new(BchConfig {
            t: 0,
            ..BchConfig::NAND_8BIT
        }),
        Err(BchError::InvalidCapacity(0))
    ));
    Ok(())
}
