//! Flash regions
//!
//! The flash region table (pointed to by FRBA) holds one FLREG word per
//! region. Each word carries a base and a limit of 15 bits each, in units of
//! 4K. The base maps to address bits 12..27, the limit likewise, with the
//! lower 12 bits of the limit all set, so that it is the last byte of the
//! region. An unused region has its limit below its base; typically the base
//! is 0x7fff and the limit 0.
//!
//! NOTE: Descriptors from the ICH8 era only define 13 bits per field. Those
//! decode the same as long as the upper bits are clear, which they are in
//! practice.

use std::fmt::{self, Display};

use bitfield_struct::bitfield;
use serde::{Deserialize, Serialize};
use strum::{Display as StrDisplay, EnumCount, EnumIter, FromRepr, IntoEnumIterator, IntoStaticStr};
use zerocopy::FromBytes;
use zerocopy_derive::{FromBytes, Immutable, IntoBytes};

use crate::{ParseError, window};

/// Region types in the order of the region table
#[derive(
    StrDisplay,
    IntoStaticStr,
    EnumCount,
    EnumIter,
    FromRepr,
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
)]
#[repr(usize)]
pub enum RegionType {
    #[strum(serialize = "Flash Descriptor")]
    Descriptor = 0,
    #[strum(serialize = "BIOS")]
    Bios = 1,
    #[strum(serialize = "Intel ME")]
    Me = 2,
    #[strum(serialize = "GbE")]
    Gbe = 3,
    #[strum(serialize = "Platform Data")]
    PlatformData = 4,
    #[strum(serialize = "Reserved_1")]
    Reserved1 = 5,
    #[strum(serialize = "Reserved_2")]
    Reserved2 = 6,
    #[strum(serialize = "Reserved_3")]
    Reserved3 = 7,
    #[strum(serialize = "EC")]
    Ec = 8,
}

pub const MAX_REGIONS: usize = RegionType::COUNT;
pub const REGION_TABLE_SIZE: usize = MAX_REGIONS * size_of::<u32>();

impl RegionType {
    pub fn from_index(index: usize) -> Result<Self, ParseError> {
        Self::from_repr(index).ok_or(ParseError::InvalidRegionType(index))
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Self::Descriptor => "FD",
            Self::Bios => "BIOS",
            Self::Me => "ME",
            Self::Gbe => "GbE",
            Self::PlatformData => "PD",
            Self::Reserved1 => "RES1",
            Self::Reserved2 => "RES2",
            Self::Reserved3 => "RES3",
            Self::Ec => "EC",
        }
    }
}

/// Full and short display name of a region type, given by its table index.
pub fn name_of(region_type: usize) -> Result<(&'static str, &'static str), ParseError> {
    let t = RegionType::from_index(region_type)?;
    Ok((t.name(), t.short_name()))
}

#[bitfield(u32)]
#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize)]
pub struct FlashRegion {
    #[bits(15)]
    base: u32,
    #[bits(1)]
    _0: u8,
    #[bits(15)]
    limit: u32,
    #[bits(1)]
    _1: u8,
}

impl FlashRegion {
    /// Base address
    pub fn ba(self) -> u32 {
        self.base() << 12
    }

    /// Limit address, i.e., the last byte of the region
    pub fn la(self) -> u32 {
        (self.limit() << 12) | 0xfff
    }

    /// Size in bytes, 0 if the region is unused
    pub fn size(self) -> u32 {
        let b = self.ba();
        let l = self.la();
        if l < b { 0 } else { l - b + 1 }
    }
}

impl Display for FlashRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.ba();
        let l = self.la();
        let u = if b > l { " (unused)" } else { "" };
        write!(f, "{b:08x} - {l:08x}{u}")
    }
}

// NOTE: FLREG words are read in host order; they are LE on flash.
#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug)]
#[repr(C)]
pub struct RegionTable {
    pub flreg: [FlashRegion; MAX_REGIONS],
}

impl RegionTable {
    /// Read the region table at `offset`, which must lie within `data` as a
    /// whole.
    pub fn read(data: &[u8], offset: usize) -> Result<Self, ParseError> {
        let slice = window(data, offset, REGION_TABLE_SIZE)?;
        Self::read_from_bytes(slice).map_err(|_| ParseError::OutOfBounds {
            offset,
            size: REGION_TABLE_SIZE,
            len: data.len(),
        })
    }

    pub fn region(&self, region_type: RegionType) -> RegionInfo {
        RegionInfo::new(region_type, self.flreg[region_type.index()])
    }

    /// All regions in table order, including unused ones.
    pub fn regions(&self) -> impl Iterator<Item = RegionInfo> + '_ {
        RegionType::iter().map(|t| self.region(t))
    }
}

impl Display for RegionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for t in RegionType::iter() {
            let r = self.flreg[t.index()];
            let n = format!("{t} ({}):", t.short_name());
            writeln!(f, "   {n:26} {r}")?;
        }
        Ok(())
    }
}

/// Decode the region of the given type from the region table.
pub fn decode(table: &RegionTable, region_type: usize) -> Result<RegionInfo, ParseError> {
    let t = RegionType::from_index(region_type)?;
    Ok(table.region(t))
}

/// Decoded view of a single flash region
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionInfo {
    pub region_type: RegionType,
    pub base: u32,
    pub limit: u32,
    pub size: u32,
}

impl RegionInfo {
    pub fn new(region_type: RegionType, flreg: FlashRegion) -> Self {
        Self {
            region_type,
            base: flreg.ba(),
            limit: flreg.la(),
            size: flreg.size(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.region_type.name()
    }

    pub fn short_name(&self) -> &'static str {
        self.region_type.short_name()
    }

    pub fn is_present(&self) -> bool {
        self.size >= 1
    }
}

// This is the flashrom layout file format.
impl Display for RegionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.base;
        let l = self.limit;
        let n = self.short_name();
        write!(f, "{b:08x}:{l:08x} {n}")
    }
}

#[cfg(test)]
static IFD_SAMPLE: &[u8] = include_bytes!("../tests/sample.ifd");

#[cfg(test)]
const UNUSED: u32 = 0x0000_7fff;

#[cfg(test)]
fn table(words: [u32; MAX_REGIONS]) -> RegionTable {
    RegionTable {
        flreg: words.map(FlashRegion::from_bits),
    }
}

#[test]
fn catalog_names() {
    let expected = [
        ("Flash Descriptor", "FD"),
        ("BIOS", "BIOS"),
        ("Intel ME", "ME"),
        ("GbE", "GbE"),
        ("Platform Data", "PD"),
        ("Reserved_1", "RES1"),
        ("Reserved_2", "RES2"),
        ("Reserved_3", "RES3"),
        ("EC", "EC"),
    ];
    assert_eq!(MAX_REGIONS, expected.len());
    for (i, names) in expected.iter().enumerate() {
        assert_eq!(name_of(i), Ok(*names));
    }
    assert_eq!(RegionType::Me.to_string(), "Intel ME");
}

#[test]
fn catalog_invalid_type() {
    assert_eq!(name_of(9), Err(ParseError::InvalidRegionType(9)));
    assert_eq!(
        name_of(usize::MAX),
        Err(ParseError::InvalidRegionType(usize::MAX))
    );
}

#[test]
fn catalog_order() {
    let indices: Vec<usize> = RegionType::iter().map(RegionType::index).collect();
    assert_eq!(indices, (0..MAX_REGIONS).collect::<Vec<_>>());
}

#[test]
fn decode_used_region() {
    let r = FlashRegion::from_bits(0x07ff_0500);
    assert_eq!(r.ba(), 0x0050_0000);
    assert_eq!(r.la(), 0x007f_ffff);
    assert_eq!(r.size(), 0x0030_0000);
}

#[test]
fn decode_single_page() {
    let r = FlashRegion::from_bits(0);
    assert_eq!((r.ba(), r.la(), r.size()), (0, 0xfff, 0x1000));
}

#[test]
fn decode_unused_region() {
    let r = FlashRegion::from_bits(UNUSED);
    assert_eq!(r.ba(), 0x07ff_f000);
    assert_eq!(r.la(), 0x0000_0fff);
    assert_eq!(r.size(), 0);
    assert_eq!(format!("{r}"), "07fff000 - 00000fff (unused)");
}

#[test]
fn decode_ignores_reserved_bits() {
    let r = FlashRegion::from_bits(0x8001_8002);
    assert_eq!(r.ba(), 0x2000);
    assert_eq!(r.la(), 0x1fff);
    assert_eq!(r.size(), 0);
}

#[test]
fn decode_bit_math() {
    for w in (0..=u32::MAX).step_by(65_521) {
        let r = FlashRegion::from_bits(w);
        let b = r.ba();
        let l = r.la();
        assert_eq!(b, (w & 0x7fff) << 12);
        assert_eq!(l, ((w & (0x7fff << 16)) >> 4) | 0xfff);
        assert_eq!(b % 4096, 0);
        assert_eq!(l & 0xfff, 0xfff);
        let s = r.size();
        if s >= 1 {
            assert_eq!(l - b + 1, s);
        } else {
            assert!(l < b);
        }
    }
}

#[test]
fn decode_by_index() {
    let t = table([0, 0x07ff_0500, 0x04ff_0003, 0, 0, 0, 0, 0, UNUSED]);
    let bios = decode(&t, 1).unwrap();
    assert_eq!(bios.region_type, RegionType::Bios);
    assert_eq!(bios.name(), "BIOS");
    assert_eq!(bios.base, 0x0050_0000);
    assert_eq!(bios.limit, 0x007f_ffff);
    assert_eq!(bios.size, 0x0030_0000);
    assert!(bios.is_present());

    let ec = decode(&t, 8).unwrap();
    assert_eq!(ec.short_name(), "EC");
    assert!(!ec.is_present());
}

#[test]
fn decode_is_pure() {
    let t = table([0x04ff_0003; MAX_REGIONS]);
    assert_eq!(decode(&t, 2), decode(&t, 2));
}

#[test]
fn decode_invalid_type() {
    let t = table([0; MAX_REGIONS]);
    assert_eq!(decode(&t, 9), Err(ParseError::InvalidRegionType(9)));
}

#[test]
fn read_region_table() {
    let t = RegionTable::read(IFD_SAMPLE, 0x40).unwrap();
    let me = t.region(RegionType::Me);
    assert_eq!((me.base, me.limit), (0x3000, 0x004f_ffff));
    let gbe = t.region(RegionType::Gbe);
    assert_eq!((gbe.base, gbe.limit), (0x1000, 0x2fff));
    assert_eq!(t.regions().filter(RegionInfo::is_present).count(), 4);
}

#[test]
fn read_region_table_out_of_bounds() {
    let data = [0u8; 0x40];
    let e = ParseError::OutOfBounds {
        offset: 0x20,
        size: REGION_TABLE_SIZE,
        len: 0x40,
    };
    assert_eq!(RegionTable::read(&data, 0x20).err(), Some(e));
    assert!(RegionTable::read(&data, 0x04).is_ok());
}

#[test]
fn flashrom_line() {
    let r = RegionInfo::new(RegionType::Bios, FlashRegion::from_bits(0x07ff_0500));
    assert_eq!(r.to_string(), "00500000:007fffff BIOS");
}
