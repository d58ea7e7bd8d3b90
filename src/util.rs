//! Useful traits and other utilities that don't really belong anywhere else.

use std::io::{self, Read};

pub trait ReadExt {
    /// Tries to fill `buf` completely, like `read_exact`, but unlike `read_exact`, is forgiving of
    /// unexpected EOF.
    ///
    /// Returns how many bytes were read: `buf.len()`, unless an EOF was encountered first.
    fn read_fill(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<T: Read> ReadExt for T {
    fn read_fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut cursor = 0;
        while cursor < buf.len() {
            cursor += match self.read(&mut buf[cursor..]) {
                // This is an EOF; it means the final read size is `cursor`
                Ok(0) => break,

                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => 0,
                Err(x) => return Err(x),
            };
        }

        Ok(cursor)
    }
}

#[test]
fn test_read_fill() -> io::Result<()> {
    let mut buf = [0u8; 4];
    assert_eq!(io::repeat(0xAA).read_fill(&mut buf)?, 4);
    assert_eq!(buf, [0xAA; 4]);

    let mut short = &[1u8, 2, 3][..];
    assert_eq!(short.read_fill(&mut buf)?, 3);
    assert_eq!(buf, [1, 2, 3, 0xAA]);
    assert_eq!(short.read_fill(&mut buf)?, 0);

    // Reads that come back in pieces are stitched together
    let mut chained = (&[1u8, 2][..]).chain(&[3u8, 4, 5][..]);
    assert_eq!(chained.read_fill(&mut buf)?, 4);
    assert_eq!(buf, [1, 2, 3, 4]);

    Ok(())
}
