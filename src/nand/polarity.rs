//! NAND storage polarity.
//!
//! Erased flash reads back as all 1s, but an erased block should look like valid all-0 data with
//! all-0 ECC to the codec. So the bytes stored on flash are the complement of what the codec
//! sees, in both directions.

use super::PageUtil;
use crate::bch::{BchError, Codec, Verdict};

/// Adapts a [Codec] so that it can be fed raw bytes as stored on flash
///
/// Bit positions in a [Verdict] are unaffected by complementing, so a caller can flip them
/// directly in the stored bytes.
#[derive(Debug)]
pub struct Inverted<C> {
    codec: C,
}

impl<C: Codec> Inverted<C> {
    pub fn new(codec: C) -> Self {
        Self { codec }
    }

    pub fn ecc_bytes(&self) -> usize {
        self.codec.ecc_bytes()
    }

    /// Check stored `data` against stored `ecc`
    pub fn decode(&self, data: &[u8], ecc: &[u8]) -> Result<Verdict, BchError> {
        let mut data = data.to_vec();
        let mut ecc = ecc.to_vec();
        data.invert();
        ecc.invert();

        self.codec.decode(&data, &ecc)
    }

    /// Compute the ECC, as it should be stored, for stored `data`
    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>, BchError> {
        let mut data = data.to_vec();
        data.invert();

        let mut ecc = self.codec.encode(&data)?;
        ecc.invert();
        Ok(ecc)
    }

    pub fn into_inner(self) -> C {
        self.codec
    }
}

#[test]
fn test_inverts_both_ways() -> anyhow::Result<()> {
    use crate::bch::mock::MockCodec;

    let codec = Inverted::new(MockCodec::new(2));
    let ecc = codec.encode(&[0xFF, 0x0F])?;
    codec.decode(&[0xF0, 0x00], &[0xFF, 0xAA])?;

    let mock = codec.into_inner();
    assert_eq!(ecc, [0xA5, 0xA5]);
    assert_eq!(*mock.encode_calls.borrow(), [vec![0x00, 0xF0]]);
    assert_eq!(
        *mock.decoded.borrow(),
        [(vec![0x0F, 0xFF], vec![0x00, 0x55])]
    );

    Ok(())
}

#[test]
fn test_erased_block_is_clean() -> anyhow::Result<()> {
    use crate::bch::{Bch, BchConfig};

    let codec = Inverted::new(Bch::new(BchConfig::NAND_8BIT)?);
    assert_eq!(codec.decode(&[0xFF; 514], &[0xFF; 14])?, Verdict::Clean);
    assert!(codec.encode(&[0xFF; 514])?.is_erased());

    Ok(())
}
