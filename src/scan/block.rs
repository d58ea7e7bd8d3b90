//! Checking and repairing a single ECC-protected block.

use std::fmt;

use super::{Mode, Stats};
use crate::bch::{BchError, Codec, Verdict};
use crate::nand::{polarity::Inverted, PageUtil};

/// Where a block lives in the dump
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockPos {
    /// Absolute page index, counting skipped pages, from 0
    pub page: u64,

    /// Index of the block within its page
    pub block: usize,

    /// Absolute byte offset of the block's first data byte
    pub offset: u64,
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Pages are reported 1-based
        write!(
            f,
            "at offset {:#x} (page {}, block {})",
            self.offset,
            self.page + 1,
            self.block
        )
    }
}

/// Something noteworthy that happened to a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockEvent {
    /// `check` found this many correctable bit errors
    Correctable(BlockPos, usize),

    /// `check` found too many errors to correct
    Uncorrectable(BlockPos),

    /// `fixdata` corrected this many bit errors
    Corrected(BlockPos, usize),

    /// `fixdata` left an uncorrectable block alone
    LeftAsIs(BlockPos),

    /// `fixecc` rewrote the ECC of a block that had this many bit errors
    CorrectedEcc(BlockPos, usize),

    /// `fixecc` computed ECC for an uncorrectable block whose ECC was blank
    RecalculatedEcc(BlockPos),

    /// `fixecc` left an uncorrectable block alone
    WrittenUnchanged(BlockPos),
}

impl fmt::Display for BlockEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Correctable(pos, n) => write!(f, "Correctable {n} bit errors {pos}"),
            Self::Uncorrectable(pos) => write!(f, "Uncorrectable error {pos}"),
            Self::Corrected(pos, n) => write!(f, "Corrected {n} bit errors {pos}"),
            Self::LeftAsIs(pos) => write!(f, "Uncorrectable error {pos}, leaving as is"),
            Self::CorrectedEcc(pos, n) => write!(f, "Corrected {n} bit errors in ECC {pos}"),
            Self::RecalculatedEcc(pos) => write!(f, "Recalculated ECC (was all 0x00) {pos}"),
            Self::WrittenUnchanged(pos) => {
                write!(f, "Uncorrectable error {pos}, writing unchanged")
            }
        }
    }
}

/// Decode one block, record the outcome in `stats`, and append whatever `mode` says to write for
/// it to `out`.
pub fn process_block<C: Codec>(
    codec: &Inverted<C>,
    mode: Mode,
    pos: BlockPos,
    data: &[u8],
    ecc: &[u8],
    stats: &mut Stats,
    out: &mut Vec<u8>,
) -> Result<Option<BlockEvent>, BchError> {
    let verdict = codec.decode(data, ecc)?;
    stats.record(&verdict);

    let event = match mode {
        Mode::Check => match verdict {
            Verdict::Clean => None,
            Verdict::Corrected(positions) => Some(BlockEvent::Correctable(pos, positions.len())),
            Verdict::Uncorrectable => Some(BlockEvent::Uncorrectable(pos)),
        },

        Mode::FixData => match verdict {
            Verdict::Uncorrectable => {
                out.extend_from_slice(data);
                out.extend_from_slice(ecc);
                Some(BlockEvent::LeftAsIs(pos))
            }
            verdict => {
                let start = out.len();
                out.extend_from_slice(data);

                let fixed = &mut out[start..];
                let positions = match &verdict {
                    Verdict::Corrected(positions) => &positions[..],
                    _ => &[],
                };
                // Errors located in the ECC are not repaired; the ECC is written back as read
                for &bit in positions.iter().filter(|&&bit| bit < data.len() * 8) {
                    fixed[bit / 8] ^= 1 << (bit % 8);
                }

                out.extend_from_slice(ecc);
                (!positions.is_empty()).then(|| BlockEvent::Corrected(pos, positions.len()))
            }
        },

        Mode::FixEcc => match verdict {
            Verdict::Uncorrectable if !ecc.is_blank() => {
                out.extend_from_slice(data);
                out.extend_from_slice(ecc);
                Some(BlockEvent::WrittenUnchanged(pos))
            }
            Verdict::Uncorrectable => {
                out.extend_from_slice(data);
                out.extend_from_slice(&codec.encode(data)?);
                Some(BlockEvent::RecalculatedEcc(pos))
            }
            verdict => {
                out.extend_from_slice(data);
                out.extend_from_slice(&codec.encode(data)?);
                match verdict.bit_errors() {
                    Some(n) if n > 0 => Some(BlockEvent::CorrectedEcc(pos, n)),
                    _ => None,
                }
            }
        },
    };

    Ok(event)
}

#[cfg(test)]
const POS: BlockPos = BlockPos {
    page: 2,
    block: 1,
    offset: 0x2210,
};

#[cfg(test)]
fn run(
    mode: Mode,
    verdict: Verdict,
    data: &[u8],
    ecc: &[u8],
) -> anyhow::Result<(Option<BlockEvent>, Stats, Vec<u8>)> {
    use crate::bch::mock::MockCodec;

    let codec = Inverted::new(MockCodec::new(ecc.len()).script([verdict]));
    let mut stats = Stats::default();
    let mut out = Vec::new();
    let event = process_block(&codec, mode, POS, data, ecc, &mut stats, &mut out)?;
    Ok((event, stats, out))
}

#[test]
fn test_event_messages() {
    assert_eq!(
        BlockEvent::Correctable(POS, 3).to_string(),
        "Correctable 3 bit errors at offset 0x2210 (page 3, block 1)"
    );
    assert_eq!(
        BlockEvent::LeftAsIs(POS).to_string(),
        "Uncorrectable error at offset 0x2210 (page 3, block 1), leaving as is"
    );
    assert_eq!(
        BlockEvent::RecalculatedEcc(POS).to_string(),
        "Recalculated ECC (was all 0x00) at offset 0x2210 (page 3, block 1)"
    );
}

#[test]
fn test_check_writes_nothing() -> anyhow::Result<()> {
    let (event, stats, out) = run(Mode::Check, Verdict::Corrected(vec![1, 2, 3]), &[0; 4], &[0; 2])?;
    assert_eq!(event, Some(BlockEvent::Correctable(POS, 3)));
    assert!(out.is_empty());
    assert_eq!(
        (stats.erroneous_blocks, stats.erroneous_bits, stats.uncorrectable_blocks),
        (1, 3, 0)
    );

    let (event, stats, out) = run(Mode::Check, Verdict::Uncorrectable, &[0; 4], &[0; 2])?;
    assert_eq!(event, Some(BlockEvent::Uncorrectable(POS)));
    assert!(out.is_empty());
    assert_eq!(
        (stats.erroneous_blocks, stats.erroneous_bits, stats.uncorrectable_blocks),
        (1, 0, 1)
    );

    let (event, stats, _) = run(Mode::Check, Verdict::Clean, &[0; 4], &[0; 2])?;
    assert_eq!(event, None);
    assert_eq!(stats, Stats::default());

    Ok(())
}

#[test]
fn test_fixdata_flips_data_bits_only() -> anyhow::Result<()> {
    let data = [0x00, 0xFF, 0x10, 0x00];
    let ecc = [0xAB, 0xCD];

    // Bits 0 and 15 are in the data; bit 33 is in the ECC and must be left alone
    let (event, stats, out) = run(Mode::FixData, Verdict::Corrected(vec![0, 15, 33]), &data, &ecc)?;
    assert_eq!(out, [0x01, 0x7F, 0x10, 0x00, 0xAB, 0xCD]);
    assert_eq!(event, Some(BlockEvent::Corrected(POS, 3)));
    assert_eq!(stats.erroneous_bits, 3);

    let (event, _, out) = run(Mode::FixData, Verdict::Clean, &data, &ecc)?;
    assert_eq!(out, [data.as_slice(), &ecc].concat());
    assert_eq!(event, None);

    let (event, _, out) = run(Mode::FixData, Verdict::Uncorrectable, &data, &ecc)?;
    assert_eq!(out, [data.as_slice(), &ecc].concat());
    assert_eq!(event, Some(BlockEvent::LeftAsIs(POS)));

    Ok(())
}

#[test]
fn test_fixecc_regenerates() -> anyhow::Result<()> {
    let data = [0x12, 0x34, 0x56, 0x78];

    // The mock encodes to 0x5A.., which is stored inverted
    let (event, _, out) = run(Mode::FixEcc, Verdict::Clean, &data, &[0x11, 0x22])?;
    assert_eq!(out, [0x12, 0x34, 0x56, 0x78, 0xA5, 0xA5]);
    assert_eq!(event, None);

    // Data is passed through as read, even when the errors were located in it
    let (event, _, out) = run(Mode::FixEcc, Verdict::Corrected(vec![0, 1]), &data, &[0x11, 0x22])?;
    assert_eq!(out, [0x12, 0x34, 0x56, 0x78, 0xA5, 0xA5]);
    assert_eq!(event, Some(BlockEvent::CorrectedEcc(POS, 2)));

    Ok(())
}

#[test]
fn test_fixecc_uncorrectable() -> anyhow::Result<()> {
    let data = [0x12, 0x34, 0x56, 0x78];

    let (event, stats, out) = run(Mode::FixEcc, Verdict::Uncorrectable, &data, &[0x00, 0x00])?;
    assert_eq!(out, [0x12, 0x34, 0x56, 0x78, 0xA5, 0xA5]);
    assert_eq!(event, Some(BlockEvent::RecalculatedEcc(POS)));
    assert_eq!(stats.uncorrectable_blocks, 1);

    let (event, _, out) = run(Mode::FixEcc, Verdict::Uncorrectable, &data, &[0x00, 0x01])?;
    assert_eq!(out, [0x12, 0x34, 0x56, 0x78, 0x00, 0x01]);
    assert_eq!(event, Some(BlockEvent::WrittenUnchanged(POS)));

    Ok(())
}
