#![doc = include_str!("../README.md")]

use core::fmt::{self, Display};

use serde::{Deserialize, Serialize};

pub mod ifd;
pub mod layout;
pub mod region;

pub use ifd::{IFD, Location, locate};
pub use layout::{Layout, LayoutRow, SizeUnit, build};
pub use region::{RegionInfo, RegionTable, RegionType, decode, name_of};

// An empty byte in a NOR flash is all-1's.
pub const EMPTY: u8 = 0xff;

/// Anything that can go wrong when looking for the descriptor and its regions.
/// There is no partial result: each of these ends the parse of an image.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// No descriptor signature on any 4-byte boundary.
    SignatureNotFound,
    /// The window `offset..offset + size` does not fit in `len` bytes.
    OutOfBounds { offset: usize, size: usize, len: usize },
    /// Region index outside of the known region types.
    InvalidRegionType(usize),
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignatureNotFound => write!(f, "no flash descriptor found in this image"),
            Self::OutOfBounds { offset, size, len } => write!(
                f,
                "0x{size:x} bytes @ 0x{offset:08x} exceed image size 0x{len:08x}"
            ),
            Self::InvalidRegionType(t) => write!(f, "invalid region type: {t}"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Get `size` bytes at `offset`, or fail if they are not all within `data`.
pub(crate) fn window(data: &[u8], offset: usize, size: usize) -> Result<&[u8], ParseError> {
    let len = data.len();
    offset
        .checked_add(size)
        .and_then(|end| data.get(offset..end))
        .ok_or(ParseError::OutOfBounds { offset, size, len })
}

/// Build a flash image of `size` bytes with a descriptor at offset 0x10 whose
/// region table sits at `frba` and holds the given FLREG words.
#[cfg(test)]
pub(crate) fn synthetic_image(size: usize, frba: usize, flregs: &[u32]) -> Vec<u8> {
    let mut data = vec![EMPTY; size];
    data[0x10..0x14].copy_from_slice(&ifd::MAGIC.to_le_bytes());
    let flmap0: u32 = ((frba as u32 >> 4) & 0xff) << 16;
    data[0x14..0x18].copy_from_slice(&flmap0.to_le_bytes());
    for (i, w) in flregs.iter().enumerate() {
        let o = frba + i * 4;
        data[o..o + 4].copy_from_slice(&w.to_le_bytes());
    }
    data
}

#[test]
fn window_in_bounds() {
    let data = [1u8, 2, 3, 4, 5];
    assert_eq!(window(&data, 1, 3), Ok(&data[1..4]));
    assert_eq!(window(&data, 5, 0), Ok(&data[5..5]));
}

#[test]
fn window_out_of_bounds() {
    let data = [0u8; 8];
    let e = ParseError::OutOfBounds {
        offset: 6,
        size: 4,
        len: 8,
    };
    assert_eq!(window(&data, 6, 4), Err(e));
    // must not overflow
    assert!(window(&data, usize::MAX, 2).is_err());
}
