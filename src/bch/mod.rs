//! Binary BCH error correction, as used to protect NAND pages.
//!
//! The scanning code only ever talks to a [Codec]; [Bch] is the real implementation, which
//! follows the conventions of the Linux kernel's `lib/bch.c` so that it can check and repair dumps
//! of flash written by controllers using that library:
//!
//! ```text
//! | data[0] | data[1] | ... | data[len-1] | ecc[0] | ... | ecc[ecc_bytes-1] |
//!  7......0  7......0                      7....0
//!  ^ highest-degree coefficient of the codeword          lowest-degree ^
//! ```
//!
//! The ECC is the remainder of `d(x) * x^ecc_bits` divided by the generator polynomial,
//! left-justified in the ECC bytes. Error positions are reported as `byte * 8 + bit`, where `bit`
//! counts from the least-significant end, so that a caller may fix bit `pos` by doing
//! `buf[pos / 8] ^= 1 << (pos % 8)` on the concatenated data+ECC buffer.

mod codec;
mod gf;

pub use codec::Bch;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BchError {
    #[error("unsupported Galois field order m={0} (must be 5..=15)")]
    UnsupportedOrder(u32),

    #[error("polynomial {0:#x} is not primitive")]
    NotPrimitive(u32),

    #[error("invalid correction capacity t={0}")]
    InvalidCapacity(u32),

    #[error("unsupported ECC size of {0} bits")]
    UnsupportedEccSize(u32),

    #[error("{len} data bytes exceed the code's maximum of {max}")]
    DataTooLong { len: usize, max: usize },

    #[error("ECC buffer has {len} bytes, expected {expected}")]
    EccLength { len: usize, expected: usize },
}

/// The outcome of decoding one codeword
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Data and ECC are consistent
    Clean,

    /// This many bits are in error, at these positions (see the module docs for the numbering)
    Corrected(Vec<usize>),

    /// Too many bits are in error to locate them
    Uncorrectable,
}

impl Verdict {
    /// Number of bit errors, where this is known
    pub fn bit_errors(&self) -> Option<usize> {
        match self {
            Self::Clean => Some(0),
            Self::Corrected(positions) => Some(positions.len()),
            Self::Uncorrectable => None,
        }
    }
}

/// Encode/decode capability over one fixed code configuration
///
/// Implementations operate in the codec's native polarity; see
/// [crate::nand::polarity::Inverted] for the adapter that handles NAND storage polarity.
pub trait Codec {
    /// How many ECC bytes protect each block?
    fn ecc_bytes(&self) -> usize;

    /// Longest data buffer (in bytes) that fits in one codeword
    fn max_data_len(&self) -> usize;

    /// Check `data` against `ecc`, locating errors if possible
    fn decode(&self, data: &[u8], ecc: &[u8]) -> Result<Verdict, BchError>;

    /// Compute the ECC for `data`
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, BchError>;
}

impl<C: Codec + ?Sized> Codec for &C {
    fn ecc_bytes(&self) -> usize {
        (**self).ecc_bytes()
    }
    fn max_data_len(&self) -> usize {
        (**self).max_data_len()
    }
    fn decode(&self, data: &[u8], ecc: &[u8]) -> Result<Verdict, BchError> {
        (**self).decode(data, ecc)
    }
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, BchError> {
        (**self).encode(data)
    }
}

/// A pub-fields struct describing a BCH code
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BchConfig {
    /// Galois field order; the field is GF(2^m)
    pub m: u32,

    /// Correction capacity, in bits per codeword
    pub t: u32,

    /// Primitive polynomial of the field, including the x^m term
    pub prim_poly: u32,

    /// Bit-reverse every data and ECC byte at the boundary
    pub swap_bits: bool,
}

impl BchConfig {
    /// BCH-8 over GF(2^14): 14 ECC bytes per block, as used by the dumps this tool targets
    pub const NAND_8BIT: Self = Self {
        m: 14,
        t: 8,
        prim_poly: 0x402b,
        swap_bits: false,
    };
}

impl Default for BchConfig {
    fn default() -> Self {
        Self::NAND_8BIT
    }
}

/// A [Codec] returning scripted verdicts, for testing code that drives a codec
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    #[derive(Debug, Default)]
    pub struct MockCodec {
        pub ecc_bytes: usize,

        /// Verdicts handed out by `decode`, in order; `Clean` once exhausted
        pub verdicts: RefCell<VecDeque<Verdict>>,

        /// What `encode` returns
        pub encoded: Vec<u8>,

        /// Every (data, ecc) pair passed to `decode`
        pub decoded: RefCell<Vec<(Vec<u8>, Vec<u8>)>>,

        /// Every data buffer passed to `encode`
        pub encode_calls: RefCell<Vec<Vec<u8>>>,
    }

    impl MockCodec {
        pub fn new(ecc_bytes: usize) -> Self {
            Self {
                ecc_bytes,
                encoded: vec![0x5A; ecc_bytes],
                ..Default::default()
            }
        }

        pub fn script(self, verdicts: impl IntoIterator<Item = Verdict>) -> Self {
            self.verdicts.borrow_mut().extend(verdicts);
            self
        }
    }

    impl Codec for MockCodec {
        fn ecc_bytes(&self) -> usize {
            self.ecc_bytes
        }

        fn max_data_len(&self) -> usize {
            usize::MAX
        }

        fn decode(&self, data: &[u8], ecc: &[u8]) -> Result<Verdict, BchError> {
            self.decoded.borrow_mut().push((data.to_vec(), ecc.to_vec()));
            Ok(self
                .verdicts
                .borrow_mut()
                .pop_front()
                .unwrap_or(Verdict::Clean))
        }

        fn encode(&self, data: &[u8]) -> Result<Vec<u8>, BchError> {
            self.encode_calls.borrow_mut().push(data.to_vec());
            Ok(self.encoded.clone())
        }
    }
}

#[test]
fn test_verdict_bit_errors() {
    assert_eq!(Verdict::Clean.bit_errors(), Some(0));
    assert_eq!(Verdict::Corrected(vec![3, 9]).bit_errors(), Some(2));
    assert_eq!(Verdict::Uncorrectable.bit_errors(), None);
}
