//! Arithmetic over GF(2^m), using exponent/logarithm tables.

use super::BchError;

/// A binary extension field GF(2^m), defined by a primitive polynomial
#[derive(Debug, Clone)]
pub struct GaloisField {
    m: u32,

    /// `pow[i]` is α^i, for `0 <= i <= n` (so `pow[n] == pow[0] == 1`)
    pow: Box<[u16]>,

    /// `log[x]` is the `i` for which α^i == x; `log[0]` is meaningless
    log: Box<[u16]>,
}

impl GaloisField {
    /// Build the field tables for GF(2^m) from a primitive polynomial (given with its x^m term).
    pub fn new(m: u32, prim_poly: u32) -> Result<Self, BchError> {
        if !(5..=15).contains(&m) {
            return Err(BchError::UnsupportedOrder(m));
        }
        if prim_poly >> m != 1 {
            return Err(BchError::NotPrimitive(prim_poly));
        }

        let n = (1usize << m) - 1;
        let mut pow = vec![0u16; n + 1];
        let mut log = vec![0u16; n + 1];

        let mut x: u32 = 1;
        for i in 0..n {
            // Hitting 1 again before n steps means α has a smaller order than 2^m-1
            if x == 1 && i != 0 {
                return Err(BchError::NotPrimitive(prim_poly));
            }
            pow[i] = x as u16;
            log[x as usize] = i as u16;

            x <<= 1;
            if x & (1 << m) != 0 {
                x ^= prim_poly;
            }
        }
        if x != 1 {
            return Err(BchError::NotPrimitive(prim_poly));
        }
        pow[n] = 1;

        Ok(Self {
            m,
            pow: pow.into(),
            log: log.into(),
        })
    }

    /// The field's extension degree
    pub fn m(&self) -> u32 {
        self.m
    }

    /// The multiplicative order of the field, 2^m - 1
    pub fn n(&self) -> u32 {
        (1 << self.m) - 1
    }

    /// α^i, for any `i`
    pub fn pow(&self, i: u32) -> u32 {
        self.pow[(i % self.n()) as usize].into()
    }

    /// log_α(x); `x` must be nonzero
    pub fn log(&self, x: u32) -> u32 {
        debug_assert_ne!(x, 0);
        self.log[x as usize].into()
    }

    pub fn mul(&self, a: u32, b: u32) -> u32 {
        if a == 0 || b == 0 {
            0
        } else {
            self.pow(self.log(a) + self.log(b))
        }
    }

    pub fn sqr(&self, a: u32) -> u32 {
        if a == 0 {
            0
        } else {
            self.pow(2 * self.log(a))
        }
    }
}

#[test]
fn test_gf_tables() -> anyhow::Result<()> {
    let gf = GaloisField::new(14, 0x402b)?;
    assert_eq!(gf.n(), 16383);
    assert_eq!(gf.pow(0), 1);
    assert_eq!(gf.pow(1), 2);
    assert_eq!(gf.pow(14), 0x402b ^ (1 << 14));
    assert_eq!(gf.pow(gf.n()), 1);

    for x in [1u32, 2, 3, 0x1234, 0x3fff] {
        assert_eq!(gf.pow(gf.log(x)), x);
        assert_eq!(gf.mul(gf.mul(x, 0x55), gf.pow(gf.n() - gf.log(0x55))), x);
        assert_eq!(gf.sqr(x), gf.mul(x, x));
    }
    assert_eq!(gf.mul(0, 7), 0);

    Ok(())
}

#[test]
fn test_gf_rejects_bad_polynomials() {
    // x^14 + 1 is reducible
    assert!(matches!(
        GaloisField::new(14, 0x4001),
        Err(BchError::NotPrimitive(_))
    ));
    // Wrong degree
    assert!(matches!(
        GaloisField::new(14, 0x2b),
        Err(BchError::NotPrimitive(_))
    ));
    assert!(matches!(
        GaloisField::new(4, 0x13),
        Err(BchError::UnsupportedOrder(4))
    ));
}
