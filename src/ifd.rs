//! Intel Flash Descriptor (IFD)
//!
//! For reference, see
//! <https://www.intel.com/content/dam/www/public/us/en/documents/datasheets/io-controller-hub-8-datasheet.pdf>
//! and coreboot `util/ifdtool/`.
//!
//! The descriptor starts with the signature `0x0ff0a55a`, followed by the
//! Descriptor Map, which tells where the other sections are, via compact base
//! addresses (xxBA). Only the first map word, FLMAP0, is needed to find the
//! flash regions.
//!
//! | Section                      | Meaning                                |
//! | ---------------------------- | -------------------------------------- |
//! | Signature + Descriptor Map   | Offsets of other sections              |
//! | Components                   | Flash parts and their parameters       |
//! | Regions                      | Flash partitions as offsets            |
//! | Masters                      | Access control for regions             |
//!
//! In a full image, the signature is at offset 0x10, while very old (ICH8)
//! images have it at offset 0. We do not rely on either and scan for it.
//! NOTE: The base addresses are compact values and really mean bits 4..11
//! of 25-bit values, so we need to expand them to get the real offsets.

// We retain the all-uppercase acronyms in the struct definitions.
// Lowercase helpers are provided through implementations.
#![allow(non_snake_case)]

use std::fmt::{self, Display};

use bitfield_struct::bitfield;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use zerocopy::FromBytes;
use zerocopy_derive::{FromBytes, Immutable, IntoBytes};

use crate::{
    ParseError,
    layout::Layout,
    region::{REGION_TABLE_SIZE, RegionInfo, RegionTable, decode},
    window,
};

// NOTE: This is the LE representation.
pub const MAGIC: u32 = 0x0ff0_a55a;
const MAGIC_SIZE: usize = size_of::<u32>();
// Where the signature sits in a full image
const OFFSET: usize = 16;

#[bitfield(u32)]
#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize)]
pub struct FLMAP0 {
    FCBA: u8,
    #[bits(2)]
    NC: u8,
    #[bits(6)]
    _0: u8,
    FRBA: u8,
    #[bits(3)]
    NR: u8,
    #[bits(5)]
    _1: u8,
}

impl FLMAP0 {
    pub fn fcba(self) -> usize {
        (self.FCBA() as usize) << 4
    }
    pub fn nc(self) -> usize {
        self.NC() as usize + 1
    }

    pub fn frba(self) -> usize {
        (self.FRBA() as usize) << 4
    }
    pub fn nr(self) -> usize {
        self.NR() as usize + 1
    }
}

impl Display for FLMAP0 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fcba = self.fcba();
        let nc = self.nc();
        let frba = self.frba();
        let nr = self.nr();
        let c = format!("        components:  {nc}, base: 0x{fcba:08x}");
        let r = format!("           regions:  {nr}, base: 0x{frba:08x}");
        write!(f, "{c}\n{r}")
    }
}

// NOTE: Fields are read in host order, while they are LE on flash, so this
// only matches the signature scan on LE hosts.
#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug)]
#[repr(C)]
pub struct Header {
    pub magic: u32,
    pub flmap0: FLMAP0,
}

const HEADER_SIZE: usize = size_of::<Header>();

impl Header {
    /// Read the header at `offset`, which must lie within `data` as a whole.
    pub fn read(data: &[u8], offset: usize) -> Result<Self, ParseError> {
        let slice = window(data, offset, HEADER_SIZE)?;
        Self::read_from_bytes(slice).map_err(|_| ParseError::OutOfBounds {
            offset,
            size: HEADER_SIZE,
            len: data.len(),
        })
    }
}

/// Where the descriptor and its region table are within an image
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    pub header_offset: usize,
    pub region_table_offset: usize,
}

/// Find the first descriptor signature on a 4-byte boundary.
/// The last word of the image is not considered.
pub fn find_signature(data: &[u8]) -> Option<usize> {
    (0..data.len().saturating_sub(MAGIC_SIZE))
        .step_by(MAGIC_SIZE)
        .find(|&o| {
            data.get(o..o + MAGIC_SIZE)
                .and_then(|b| <[u8; MAGIC_SIZE]>::try_from(b).ok())
                .map(u32::from_le_bytes)
                == Some(MAGIC)
        })
}

fn find(data: &[u8]) -> Result<(Location, Header), ParseError> {
    let header_offset = find_signature(data).ok_or(ParseError::SignatureNotFound)?;
    debug!("IFD signature @ {header_offset:08x}");
    if header_offset != OFFSET && header_offset != 0 {
        warn!("IFD signature at unusual offset {header_offset:08x}, expected {OFFSET:08x}");
    }
    let header = Header::read(data, header_offset)?;
    let region_table_offset = header.flmap0.frba();
    debug!("IFD region table @ {region_table_offset:08x}");
    window(data, region_table_offset, REGION_TABLE_SIZE)?;
    let location = Location {
        header_offset,
        region_table_offset,
    };
    Ok((location, header))
}

/// Locate the descriptor and its region table, checking that both fit in the
/// image.
pub fn locate(data: &[u8]) -> Result<Location, ParseError> {
    find(data).map(|(location, _)| location)
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct IFD {
    pub location: Location,
    pub header: Header,
    pub regions: RegionTable,
}

impl IFD {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let (location, header) = find(data)?;
        let regions = RegionTable::read(data, location.region_table_offset)?;
        Ok(Self {
            location,
            header,
            regions,
        })
    }

    pub fn region(&self, region_type: usize) -> Result<RegionInfo, ParseError> {
        decode(&self.regions, region_type)
    }

    pub fn layout(&self) -> Result<Layout, ParseError> {
        Layout::from_table(&self.regions)
    }
}

impl Display for IFD {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.location.header_offset;
        writeln!(f, "== Descriptor Map @ 0x{o:08x} ==")?;
        writeln!(f, "{}", self.header.flmap0)?;
        writeln!(f, "== Regions ==")?;
        write!(f, "{}", self.regions)
    }
}

#[cfg(test)]
static IFD_SAMPLE: &[u8] = include_bytes!("../tests/sample.ifd");

#[cfg(test)]
use crate::{EMPTY, synthetic_image};

#[test]
fn locate_sample() {
    let l = locate(IFD_SAMPLE).unwrap();
    assert_eq!(l.header_offset, 0x10);
    assert_eq!(l.region_table_offset, 0x40);
}

#[test]
fn parse_sample() {
    let ifd = IFD::parse(IFD_SAMPLE).unwrap();
    let m = ifd.header.flmap0;
    assert_eq!(m.fcba(), 0x30);
    assert_eq!(m.nc(), 1);
    assert_eq!(m.frba(), 0x40);
    assert_eq!(m.nr(), 5);
    let bios = ifd.region(1).unwrap();
    assert_eq!((bios.base, bios.limit), (0x0050_0000, 0x007f_ffff));
    assert_eq!(ifd.region(9), Err(ParseError::InvalidRegionType(9)));
}

#[test]
fn display_sample() {
    let ifd = IFD::parse(IFD_SAMPLE).unwrap();
    let s = ifd.to_string();
    assert!(s.starts_with("== Descriptor Map @ 0x00000010 ==\n"));
    assert!(s.contains("           regions:  5, base: 0x00000040\n"));
    assert!(s.contains("   BIOS (BIOS):               00500000 - 007fffff\n"));
    assert!(s.contains("   EC (EC):                   07fff000 - 00000fff (unused)\n"));
}

#[test]
fn short_images_have_no_signature() {
    for len in 0..=4 {
        let mut data = vec![0u8; len];
        // even a complete signature in the only word is not considered
        if len == 4 {
            data.copy_from_slice(&MAGIC.to_le_bytes());
        }
        assert_eq!(locate(&data), Err(ParseError::SignatureNotFound));
    }
}

#[test]
fn no_signature() {
    let data = vec![EMPTY; 0x1000];
    assert_eq!(locate(&data), Err(ParseError::SignatureNotFound));
    assert!(IFD::parse(&data).is_err());
}

#[test]
fn unaligned_signature_is_ignored() {
    let mut data = vec![EMPTY; 0x100];
    data[0x12..0x16].copy_from_slice(&MAGIC.to_le_bytes());
    assert_eq!(locate(&data), Err(ParseError::SignatureNotFound));
}

#[test]
fn first_signature_wins() {
    let mut data = synthetic_image(0x200, 0x40, &[0; 9]);
    // A second descriptor pointing elsewhere
    data[0x80..0x84].copy_from_slice(&MAGIC.to_le_bytes());
    data[0x84..0x88].copy_from_slice(&(0x10u32 << 16).to_le_bytes());
    let l = locate(&data).unwrap();
    assert_eq!(l.header_offset, 0x10);
    assert_eq!(l.region_table_offset, 0x40);
}

#[test]
fn signature_at_start() {
    let mut data = vec![EMPTY; 0x100];
    data[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    data[4..8].copy_from_slice(&(0x02u32 << 16).to_le_bytes());
    let l = locate(&data).unwrap();
    assert_eq!(l.header_offset, 0);
    assert_eq!(l.region_table_offset, 0x20);
}

#[test]
fn header_out_of_bounds() {
    // The signature is within the scanned range, FLMAP0 is cut off.
    let mut data = vec![EMPTY; 0x16];
    data[0x10..0x14].copy_from_slice(&MAGIC.to_le_bytes());
    let e = ParseError::OutOfBounds {
        offset: 0x10,
        size: HEADER_SIZE,
        len: 0x16,
    };
    assert_eq!(locate(&data), Err(e));
}

#[test]
fn region_table_out_of_bounds() {
    // FRBA 0xf0 needs 0xf0 + 36 bytes
    let mut data = synthetic_image(0x100, 0x40, &[]);
    data[0x14..0x18].copy_from_slice(&(0x0fu32 << 16).to_le_bytes());
    let e = ParseError::OutOfBounds {
        offset: 0xf0,
        size: REGION_TABLE_SIZE,
        len: 0x100,
    };
    assert_eq!(locate(&data), Err(e));

    // exactly fits
    let data = synthetic_image(0xf0 + REGION_TABLE_SIZE, 0xf0, &[]);
    assert!(locate(&data).is_ok());
}
