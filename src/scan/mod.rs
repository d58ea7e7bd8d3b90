//! This module scans a raw NAND dump page by page, checking every ECC-protected block and, in
//! the fixing modes, writing out a repaired copy of the dump.
//!
//! Each page is read whole, split into blocks (see [PageGeometry]), and each block is decoded in
//! storage polarity (see [crate::nand::polarity]). What happens next depends on the [Mode]:
//!
//! - [Mode::Check] writes nothing, and only counts errors.
//! - [Mode::FixData] flips the located bits in the data area, keeping the ECC as read.
//!   Uncorrectable blocks are written unchanged.
//! - [Mode::FixEcc] keeps the data as read and writes freshly-computed ECC after it.
//!   Uncorrectable blocks are written unchanged, unless their ECC is blank (all 0x00), in which
//!   case the ECC is computed for them too.
//!
//! The spare area that follows the blocks is copied verbatim whenever there is an output.

mod block;
mod page;

pub use block::{process_block, BlockEvent, BlockPos};
pub use page::PageScanner;

use std::fmt;
use std::io::{self, Read, Write};

use thiserror::Error;

use crate::bch::{BchError, Codec, Verdict};
use crate::nand::{polarity::Inverted, PageGeometry};
use crate::util::ReadExt;

/// What to do with each block
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mode {
    Check,
    FixData,
    FixEcc,
}

impl Mode {
    /// Does this mode produce an output dump?
    pub fn is_writing(self) -> bool {
        !matches!(self, Self::Check)
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("geometry has {geometry} ECC bytes per block, but the codec produces {codec}")]
    EccSize { geometry: usize, codec: usize },

    #[error("failed to read page {page} for skipping")]
    SkipFailed { page: u64 },

    #[error(transparent)]
    Codec(#[from] BchError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Running totals over a scan
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Stats {
    /// Blocks with at least one bit error, correctable or not
    pub erroneous_blocks: u64,

    /// Sum of the bit errors in correctable blocks
    pub erroneous_bits: u64,

    pub uncorrectable_blocks: u64,

    /// Pages passed over by the skip
    pub pages_skipped: u64,

    /// Whole pages that were scanned
    pub pages_scanned: u64,
}

impl Stats {
    /// Fold the outcome of decoding one block into the totals
    pub fn record(&mut self, verdict: &Verdict) {
        match verdict {
            Verdict::Clean => (),
            Verdict::Corrected(positions) => {
                self.erroneous_blocks += 1;
                self.erroneous_bits += positions.len() as u64;
            }
            Verdict::Uncorrectable => {
                self.erroneous_blocks += 1;
                self.uncorrectable_blocks += 1;
            }
        }
    }
}

/// The final report, as printed at the end of a run
impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Number of erroneous blocks: {}", self.erroneous_blocks)?;
        writeln!(f, "Number of erroneous bits: {}", self.erroneous_bits)?;
        write!(
            f,
            "Number of uncorrectable blocks: {}",
            self.uncorrectable_blocks
        )
    }
}

/// Drives a whole scan: the optional skip, then every page until end of input
#[derive(Debug)]
pub struct Scanner<C> {
    pages: PageScanner<C>,
    skip_pages: u64,

    /// Total input size, if known, for progress reporting
    input_len: Option<u64>,
}

impl<C: Codec> Scanner<C> {
    pub fn new(codec: C, mode: Mode, geometry: PageGeometry) -> Result<Self, ScanError> {
        if codec.ecc_bytes() != geometry.ecc_bytes {
            return Err(ScanError::EccSize {
                geometry: geometry.ecc_bytes,
                codec: codec.ecc_bytes(),
            });
        }

        if geometry.data_bytes > codec.max_data_len() {
            return Err(BchError::DataTooLong {
                len: geometry.data_bytes,
                max: codec.max_data_len(),
            }
            .into());
        }

        Ok(Self {
            pages: PageScanner {
                codec: Inverted::new(codec),
                geometry,
                mode,
            },
            skip_pages: 0,
            input_len: None,
        })
    }

    /// Pass over this many whole pages before scanning
    pub fn skip_pages(mut self, pages: u64) -> Self {
        self.skip_pages = pages;
        self
    }

    pub fn input_len(mut self, len: u64) -> Self {
        self.input_len = Some(len);
        self
    }

    /// Scan `input` to its end, writing the repaired dump to `output` if given.
    ///
    /// A partial page at the end of the input ends the scan; it is neither processed nor written.
    pub fn run<R: Read, W: Write>(
        &self,
        mut input: R,
        mut output: Option<W>,
    ) -> Result<Stats, ScanError> {
        let geometry = self.pages.geometry;
        let mode = self.pages.mode;
        let page_size = geometry.page_size();

        tracing::debug!(?mode, ?geometry, skip = self.skip_pages, "starting scan");

        let mut stats = Stats::default();
        let mut page = vec![0u8; page_size];

        if self.skip_pages > 0 {
            let rpt = howudoin::new()
                .label("Skipping pages")
                .set_len(self.skip_pages);

            for i in 0..self.skip_pages {
                if input.read_fill(&mut page)? != page_size {
                    return Err(ScanError::SkipFailed { page: i + 1 });
                }

                if let Some(out) = output.as_mut().filter(|_| mode.is_writing()) {
                    out.write_all(&page)?;
                }

                stats.pages_skipped += 1;
                rpt.inc();
            }

            rpt.close();
        }

        let rpt = howudoin::new().label("Scanning pages").set_len(
            self.input_len
                .map(|len| (len / page_size as u64).saturating_sub(self.skip_pages)),
        );

        let mut page_out = Vec::with_capacity(page_size);
        let mut page_index = self.skip_pages;
        loop {
            let read = input.read_fill(&mut page)?;
            if read == 0 {
                break;
            }
            if read != page_size {
                tracing::warn!(
                    page = page_index + 1,
                    bytes = read,
                    "Incomplete page at end of file, ignoring"
                );
                break;
            }

            page_out.clear();
            let events = self.pages.scan_page(
                page_index,
                &page,
                &mut stats,
                output.is_some().then_some(&mut page_out),
            )?;

            for event in events {
                tracing::info!("{event}");
            }

            if let Some(out) = output.as_mut() {
                out.write_all(&page_out)?;
            }

            stats.pages_scanned += 1;
            page_index += 1;
            rpt.inc();
        }

        rpt.close();

        if let Some(out) = output.as_mut() {
            out.flush()?;
        }

        tracing::debug!(?stats, "scan complete");
        Ok(stats)
    }
}

#[cfg(test)]
mod test_support {
    //! Builders for dumps that are valid under the real codec

    use super::*;
    use crate::bch::{Bch, BchConfig};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    pub fn real_codec() -> Bch {
        Bch::new(BchConfig::NAND_8BIT).unwrap()
    }

    /// A page of random data, with correct ECC on every block
    pub fn valid_page(seed: u64) -> Vec<u8> {
        let geometry = PageGeometry::DEFAULT;
        let codec = Inverted::new(real_codec());
        let mut rng = StdRng::seed_from_u64(seed);

        let mut page = Vec::with_capacity(geometry.page_size());
        for _ in 0..geometry.blocks_per_page {
            let mut data = vec![0u8; geometry.data_bytes];
            rng.fill(&mut data[..]);
            page.extend_from_slice(&data);
            page.extend_from_slice(&codec.encode(&data).unwrap());
        }
        page.resize(geometry.page_size(), 0xC5);
        page
    }

    /// Flip bit `bit` of the data area of block `block`
    pub fn flip(page: &mut [u8], block: usize, bit: usize) {
        let offset = block * PageGeometry::DEFAULT.block_size() + bit / 8;
        page[offset] ^= 1 << (bit % 8);
    }

    pub fn run(mode: Mode, skip: u64, input: &[u8]) -> (Stats, Vec<u8>) {
        let scanner = Scanner::new(real_codec(), mode, PageGeometry::DEFAULT)
            .unwrap()
            .skip_pages(skip);
        let mut out = Vec::new();
        let stats = scanner.run(input, Some(&mut out)).unwrap();
        (stats, out)
    }
}

#[test]
fn test_ecc_size_mismatch() {
    use crate::bch::mock::MockCodec;

    let result = Scanner::new(MockCodec::new(13), Mode::Check, PageGeometry::DEFAULT);
    assert!(matches!(
        result,
        Err(ScanError::EccSize {
            geometry: 14,
            codec: 13
        })
    ));
}

#[test]
fn test_data_too_long() {
    let geometry: PageGeometry = "1x3000+14+0".parse().unwrap();
    let result = Scanner::new(test_support::real_codec(), Mode::Check, geometry);
    assert!(matches!(
        result,
        Err(ScanError::Codec(BchError::DataTooLong { len: 3000, .. }))
    ));

    // Rejected before anything is sized from the geometry
    let geometry: PageGeometry = "1x1000000000000+14+0".parse().unwrap();
    let result = Scanner::new(test_support::real_codec(), Mode::Check, geometry);
    assert!(matches!(
        result,
        Err(ScanError::Codec(BchError::DataTooLong { .. }))
    ));
}

#[test]
fn test_skip_copies_pages() -> anyhow::Result<()> {
    use crate::bch::mock::MockCodec;
    use crate::nand::TEST_GEOMETRY;

    let input: Vec<u8> = (0..TEST_GEOMETRY.page_size() as u8 * 3).collect();

    let codec = MockCodec::new(TEST_GEOMETRY.ecc_bytes);
    let scanner = Scanner::new(&codec, Mode::FixData, TEST_GEOMETRY)?.skip_pages(1);
    let mut out = Vec::new();
    let stats = scanner.run(&input[..], Some(&mut out))?;

    assert_eq!(out, input);
    assert_eq!((stats.pages_skipped, stats.pages_scanned), (1, 2));

    // Only the unskipped pages' blocks were decoded
    assert_eq!(codec.decoded.borrow().len(), 4);

    Ok(())
}

#[test]
fn test_skip_check_mode_writes_nothing() -> anyhow::Result<()> {
    use crate::bch::mock::MockCodec;
    use crate::nand::TEST_GEOMETRY;

    let input = vec![0xFFu8; TEST_GEOMETRY.page_size() * 2];
    let scanner = Scanner::new(MockCodec::new(2), Mode::Check, TEST_GEOMETRY)?.skip_pages(1);
    let mut out = Vec::new();
    scanner.run(&input[..], Some(&mut out))?;

    // Check mode with an output still carries the spare areas of scanned pages
    assert_eq!(out, [0xFF; 4]);

    Ok(())
}

#[test]
fn test_skip_past_end() -> anyhow::Result<()> {
    use crate::bch::mock::MockCodec;
    use crate::nand::TEST_GEOMETRY;

    let input = vec![0xFFu8; TEST_GEOMETRY.page_size() * 2 + 3];
    let scanner = Scanner::new(MockCodec::new(2), Mode::FixEcc, TEST_GEOMETRY)?.skip_pages(3);
    let result = scanner.run(&input[..], Some(Vec::new()));
    assert!(matches!(result, Err(ScanError::SkipFailed { page: 3 })));

    Ok(())
}

#[test]
fn test_truncated_trailing_page() -> anyhow::Result<()> {
    use crate::bch::mock::MockCodec;
    use crate::nand::TEST_GEOMETRY;

    let mut input = vec![0xFFu8; TEST_GEOMETRY.page_size() * 2];
    input.extend_from_slice(&[0x00; 7]);

    let codec = MockCodec::new(2).script([Verdict::Uncorrectable]);
    let scanner = Scanner::new(codec, Mode::FixData, TEST_GEOMETRY)?;
    let mut out = Vec::new();
    let stats = scanner.run(&input[..], Some(&mut out))?;

    assert_eq!(out, input[..TEST_GEOMETRY.page_size() * 2]);
    assert_eq!(stats.pages_scanned, 2);
    assert_eq!(stats.uncorrectable_blocks, 1);

    Ok(())
}

#[test]
fn test_empty_input() -> anyhow::Result<()> {
    use crate::bch::mock::MockCodec;

    let scanner = Scanner::new(MockCodec::new(14), Mode::Check, PageGeometry::DEFAULT)?;
    let stats = scanner.run(&[0u8; 0][..], None::<Vec<u8>>)?;
    assert_eq!(stats, Stats::default());

    Ok(())
}

#[test]
fn test_report() {
    let stats = Stats {
        erroneous_blocks: 1,
        erroneous_bits: 3,
        ..Default::default()
    };
    assert_eq!(
        stats.to_string(),
        "Number of erroneous blocks: 1\n\
         Number of erroneous bits: 3\n\
         Number of uncorrectable blocks: 0"
    );
}

#[test]
fn test_clean_dump_unchanged() {
    use test_support::*;

    let input = [valid_page(1), valid_page(2), vec![0xFF; 4352]].concat();

    for mode in [Mode::FixData, Mode::FixEcc] {
        let (stats, out) = run(mode, 0, &input);
        assert_eq!(out, input, "{mode:?}");
        assert_eq!(stats.erroneous_blocks, 0);
        assert_eq!(stats.pages_scanned, 3);
    }
}

#[test]
fn test_three_bit_errors() {
    use test_support::*;

    let original = valid_page(3);
    let mut input = original.clone();
    for bit in [5, 1000, 4111] {
        flip(&mut input, 6, bit);
    }

    let page = PageScanner {
        codec: Inverted::new(real_codec()),
        geometry: PageGeometry::DEFAULT,
        mode: Mode::Check,
    };
    let mut stats = Stats::default();
    let events = page.scan_page(0, &input, &mut stats, None).unwrap();
    assert_eq!(
        events,
        [BlockEvent::Correctable(
            BlockPos {
                page: 0,
                block: 6,
                offset: 6 * 528,
            },
            3
        )]
    );
    assert_eq!(
        (stats.erroneous_blocks, stats.erroneous_bits, stats.uncorrectable_blocks),
        (1, 3, 0)
    );

    let (stats, out) = run(Mode::FixData, 0, &input);
    assert_eq!(out, original);
    assert_eq!(stats.erroneous_bits, 3);
}

#[test]
fn test_fixdata_keeps_ecc_errors() {
    use test_support::*;

    let original = valid_page(4);
    let mut input = original.clone();
    // One error in the data, one in the ECC of block 2
    flip(&mut input, 2, 77);
    flip(&mut input, 2, 514 * 8 + 3);

    let (stats, out) = run(Mode::FixData, 0, &input);
    assert_eq!(stats.erroneous_bits, 2);

    let mut expected = original;
    flip(&mut expected, 2, 514 * 8 + 3);
    assert_eq!(out, expected);
}

#[test]
fn test_uncorrectable_passthrough() {
    use test_support::*;

    let mut input = valid_page(5);
    for bit in 0..12 {
        flip(&mut input, 0, bit * 31);
    }

    let (stats, out) = run(Mode::FixData, 0, &input);
    assert_eq!(out, input);
    assert_eq!(stats.uncorrectable_blocks, 1);

    let (stats, out) = run(Mode::FixEcc, 0, &input);
    assert_eq!(out, input);
    assert_eq!(stats.uncorrectable_blocks, 1);
}

#[test]
fn test_blank_ecc_regenerated() {
    use test_support::*;

    let original = valid_page(6);
    let mut input = original.clone();
    input[514..528].fill(0x00);

    let (stats, _) = run(Mode::Check, 0, &input);
    assert_eq!(stats.uncorrectable_blocks, 1);

    let (_, out) = run(Mode::FixEcc, 0, &input);
    assert_eq!(out, original);
}

#[test]
fn test_fixecc_idempotent() {
    use test_support::*;

    let mut input = [valid_page(7), valid_page(8)].concat();
    flip(&mut input, 1, 9);
    flip(&mut input, 1, 4000);
    input[4352 + 3 * 528 + 514..][..14].fill(0x00);

    let (stats, first) = run(Mode::FixEcc, 0, &input);
    assert_eq!(stats.erroneous_blocks, 2);
    assert_eq!(stats.erroneous_bits, 2);

    let (stats, second) = run(Mode::FixEcc, 0, &first);
    assert_eq!(second, first);
    assert_eq!(stats.erroneous_blocks, 0);
}

#[test]
fn test_skip_with_real_codec() {
    use test_support::*;

    let mut skipped = valid_page(9);
    // Errors in a skipped page are neither counted nor repaired
    flip(&mut skipped, 0, 0);
    let input = [skipped, valid_page(10), valid_page(11)].concat();

    let (stats, out) = run(Mode::FixData, 1, &input);
    assert_eq!(out, input);
    assert_eq!(stats.erroneous_blocks, 0);
    assert_eq!((stats.pages_skipped, stats.pages_scanned), (1, 2));
}
