//! Splitting pages into blocks and reassembling the output page.

use super::block::{process_block, BlockEvent, BlockPos};
use super::{Mode, Stats};
use crate::bch::{BchError, Codec};
use crate::nand::{polarity::Inverted, PageGeometry};

/// Runs every block of a page through [process_block]
#[derive(Debug)]
pub struct PageScanner<C> {
    pub(super) codec: Inverted<C>,
    pub(super) geometry: PageGeometry,
    pub(super) mode: Mode,
}

impl<C: Codec> PageScanner<C> {
    /// Process the page at absolute index `page_index`.
    ///
    /// If `out` is given, the page's output (blocks as the mode dictates, then the spare area
    /// verbatim) is appended to it. Returns the events of any noteworthy blocks, in order.
    pub fn scan_page(
        &self,
        page_index: u64,
        page: &[u8],
        stats: &mut Stats,
        out: Option<&mut Vec<u8>>,
    ) -> Result<Vec<BlockEvent>, BchError> {
        let page_offset = page_index * self.geometry.page_size() as u64;

        // Modes that don't write still need somewhere to put nothing
        let mut discard = Vec::new();
        let writing = out.is_some();
        let out = out.unwrap_or(&mut discard);

        let mut events = Vec::new();
        for (block, (data, ecc)) in self.geometry.blocks(page).enumerate() {
            let pos = BlockPos {
                page: page_index,
                block,
                offset: page_offset + (block * self.geometry.block_size()) as u64,
            };

            if let Some(event) = process_block(&self.codec, self.mode, pos, data, ecc, stats, out)? {
                events.push(event);
            }
        }

        if writing {
            out.extend_from_slice(self.geometry.spare(page));
        }

        Ok(events)
    }
}

#[cfg(test)]
fn test_scanner(
    mode: Mode,
    verdicts: Vec<crate::bch::Verdict>,
) -> PageScanner<crate::bch::mock::MockCodec> {
    use crate::bch::mock::MockCodec;
    use crate::nand::TEST_GEOMETRY;

    PageScanner {
        codec: Inverted::new(MockCodec::new(TEST_GEOMETRY.ecc_bytes).script(verdicts)),
        geometry: TEST_GEOMETRY,
        mode,
    }
}

#[test]
fn test_block_offsets() -> anyhow::Result<()> {
    use crate::bch::Verdict;

    let scanner = test_scanner(
        Mode::Check,
        vec![Verdict::Uncorrectable, Verdict::Corrected(vec![4])],
    );
    let page = vec![0xFFu8; scanner.geometry.page_size()];
    let mut stats = Stats::default();

    let events = scanner.scan_page(3, &page, &mut stats, None)?;

    // 20-byte pages of 8-byte blocks
    let pos = |block, offset| BlockPos {
        page: 3,
        block,
        offset,
    };
    assert_eq!(
        events,
        [
            BlockEvent::Uncorrectable(pos(0, 60)),
            BlockEvent::Correctable(pos(1, 68), 1),
        ]
    );
    assert_eq!(stats.erroneous_blocks, 2);

    Ok(())
}

#[test]
fn test_spare_copied() -> anyhow::Result<()> {
    let scanner = test_scanner(Mode::FixData, vec![]);
    let page: Vec<u8> = (0..scanner.geometry.page_size() as u8).collect();
    let mut stats = Stats::default();
    let mut out = vec![0xEE];

    let events = scanner.scan_page(0, &page, &mut stats, Some(&mut out))?;

    assert!(events.is_empty());
    assert_eq!(out[0], 0xEE);
    assert_eq!(out[1..], page[..]);

    Ok(())
}

#[test]
fn test_check_with_output_copies_spare_only() -> anyhow::Result<()> {
    let scanner = test_scanner(Mode::Check, vec![]);
    let page: Vec<u8> = (0..scanner.geometry.page_size() as u8).collect();
    let mut stats = Stats::default();
    let mut out = Vec::new();

    scanner.scan_page(0, &page, &mut stats, Some(&mut out))?;
    assert_eq!(out, [16, 17, 18, 19]);

    Ok(())
}
