//! Checking and repair of raw NAND page dumps protected by BCH ECC.
//!
//! - [bch]: the BCH codec, behind the [bch::Codec] trait
//! - [nand]: page geometry and storage polarity
//! - [scan]: the page/block scanning engine

pub mod bch;
pub mod nand;
pub mod scan;
pub mod util;
