//! Abstractions for the layout and contents of raw NAND page dumps

use std::str::FromStr;

pub mod polarity;

/// Convenience methods for operating on `[u8]`s that represent page contents
pub trait PageUtil {
    /// Does this page contain the all-1s bit pattern?
    fn is_erased(&self) -> bool;

    /// Does this page contain the all-0s bit pattern?
    fn is_blank(&self) -> bool;

    /// Complement every bit in place
    fn invert(&mut self);
}

impl PageUtil for [u8] {
    fn is_erased(&self) -> bool {
        self.iter().all(|&x| x == 0xFF)
    }

    fn is_blank(&self) -> bool {
        self.iter().all(|&x| x == 0x00)
    }

    fn invert(&mut self) {
        self.iter_mut().for_each(|x| *x = !*x);
    }
}

/// A pub-fields struct describing how a raw page is split into ECC-protected blocks
///
/// ```text
/// | data 0 | ecc 0 | data 1 | ecc 1 | ... | data N-1 | ecc N-1 | spare |
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PageGeometry {
    pub blocks_per_page: usize,
    pub data_bytes: usize,
    pub ecc_bytes: usize,
    pub spare_bytes: usize,
}

impl PageGeometry {
    /// 8 blocks of 514 data bytes + 14 ECC bytes, then 128 spare bytes: 4352 bytes per page
    pub const DEFAULT: Self = Self {
        blocks_per_page: 8,
        data_bytes: 514,
        ecc_bytes: 14,
        spare_bytes: 128,
    };

    /// Bytes in one data+ECC block
    pub fn block_size(&self) -> usize {
        self.data_bytes + self.ecc_bytes
    }

    /// Bytes in one whole page, including the spare area
    pub fn page_size(&self) -> usize {
        self.blocks_per_page * self.block_size() + self.spare_bytes
    }

    /// Split a page into its blocks, each as a `(data, ecc)` pair, in position order
    pub fn blocks<'a>(&self, page: &'a [u8]) -> impl Iterator<Item = (&'a [u8], &'a [u8])> {
        assert_eq!(page.len(), self.page_size(), "buffer not page-sized");

        let data_bytes = self.data_bytes;
        page[..self.blocks_per_page * self.block_size()]
            .chunks_exact(self.block_size())
            .map(move |block| block.split_at(data_bytes))
    }

    /// The unprotected spare area at the end of a page
    pub fn spare<'a>(&self, page: &'a [u8]) -> &'a [u8] {
        &page[self.blocks_per_page * self.block_size()..]
    }
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Parse strings like "BLOCKSxDATA+ECC+SPARE"
impl FromStr for PageGeometry {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let (blocks, sizes) = s
            .split_once('x')
            .ok_or(anyhow::anyhow!("expected #x#+#+#"))?;
        let [data, ecc, spare]: [&str; 3] = sizes
            .split('+')
            .collect::<Vec<_>>()
            .try_into()
            .map_err(|_| anyhow::anyhow!("expected #x#+#+#"))?;

        let geometry = PageGeometry {
            blocks_per_page: blocks.parse()?,
            data_bytes: data.parse()?,
            ecc_bytes: ecc.parse()?,
            spare_bytes: spare.parse()?,
        };

        anyhow::ensure!(geometry.blocks_per_page > 0, "pages need at least one block");
        anyhow::ensure!(
            geometry.data_bytes > 0 && geometry.ecc_bytes > 0,
            "blocks need both data and ECC"
        );
        geometry
            .data_bytes
            .checked_add(geometry.ecc_bytes)
            .and_then(|block| block.checked_mul(geometry.blocks_per_page))
            .and_then(|blocks| blocks.checked_add(geometry.spare_bytes))
            .ok_or(anyhow::anyhow!("page size overflows"))?;

        Ok(geometry)
    }
}

#[cfg(test)]
pub(crate) const TEST_GEOMETRY: PageGeometry = PageGeometry {
    blocks_per_page: 2,
    data_bytes: 6,
    ecc_bytes: 2,
    spare_bytes: 4,
};

#[test]
fn test_default_page_size() {
    assert_eq!(PageGeometry::DEFAULT.block_size(), 528);
    assert_eq!(PageGeometry::DEFAULT.page_size(), 4352);
}

#[test]
fn test_parse_geometry() -> anyhow::Result<()> {
    assert_eq!("8x514+14+128".parse::<PageGeometry>()?, PageGeometry::DEFAULT);
    assert_eq!("2x6+2+4".parse::<PageGeometry>()?, TEST_GEOMETRY);

    assert!("8x514+14".parse::<PageGeometry>().is_err());
    assert!("8x514+14+128+1".parse::<PageGeometry>().is_err());
    assert!("514+14+128".parse::<PageGeometry>().is_err());
    assert!("0x514+14+128".parse::<PageGeometry>().is_err());
    assert!("8x514+0+128".parse::<PageGeometry>().is_err());
    assert!("8xA+14+128".parse::<PageGeometry>().is_err());

    let huge = usize::MAX / 2;
    assert!(format!("3x{huge}+14+0").parse::<PageGeometry>().is_err());
    assert!(format!("1x514+14+{}", usize::MAX).parse::<PageGeometry>().is_err());

    Ok(())
}

#[test]
fn test_split_page() {
    let page: Vec<u8> = (0..TEST_GEOMETRY.page_size() as u8).collect();
    let blocks: Vec<_> = TEST_GEOMETRY.blocks(&page).collect();

    assert_eq!(
        blocks,
        [
            (&[0u8, 1, 2, 3, 4, 5][..], &[6u8, 7][..]),
            (&[8u8, 9, 10, 11, 12, 13][..], &[14u8, 15][..]),
        ]
    );
    assert_eq!(TEST_GEOMETRY.spare(&page), [16, 17, 18, 19]);
}

#[test]
fn test_page_util() {
    let mut buf = [0xFFu8; 4];
    assert!(buf.is_erased());
    assert!(!buf.is_blank());

    buf.invert();
    assert!(buf.is_blank());

    buf[2] = 0x0F;
    buf.invert();
    assert_eq!(buf, [0xFF, 0xFF, 0xF0, 0xFF]);
    assert!(!buf.is_erased());
}
