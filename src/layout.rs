//! Flash layout report
//!
//! The layout lists all regions in use, ordered by their base address. Regions
//! sharing a base address stay in region table order.

use std::fmt::{self, Display};

use log::debug;
use serde::{Deserialize, Serialize};
use strum::Display as StrDisplay;

use crate::{
    ParseError,
    ifd::locate,
    region::{MAX_REGIONS, RegionInfo, RegionTable, RegionType, decode},
};

// Sizes below this many bytes are given in KiB, otherwise in MiB.
const KB_THRESHOLD: u32 = 10000;

#[derive(StrDisplay, Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
pub enum SizeUnit {
    Kb,
    MB,
}

impl SizeUnit {
    /// Scale a size in bytes, rounding down.
    pub fn scale(size: u32) -> (u32, Self) {
        if size < KB_THRESHOLD {
            (size / 1024, Self::Kb)
        } else {
            (size / 1024 / 1024, Self::MB)
        }
    }
}

/// One region of the report
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
pub struct LayoutRow {
    pub region_type: RegionType,
    pub base: u32,
    pub limit: u32,
    pub size_value: u32,
    pub size_unit: SizeUnit,
}

impl LayoutRow {
    pub fn short_name(&self) -> &'static str {
        self.region_type.short_name()
    }
}

impl From<&RegionInfo> for LayoutRow {
    fn from(r: &RegionInfo) -> Self {
        let (size_value, size_unit) = SizeUnit::scale(r.size);
        Self {
            region_type: r.region_type,
            base: r.base,
            limit: r.limit,
            size_value,
            size_unit,
        }
    }
}

// NOTE: The size is in hex as well, as it always has been in this report.
impl Display for LayoutRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.base;
        let l = self.limit;
        let n = self.short_name();
        let s = self.size_value;
        let u = self.size_unit;
        writeln!(f, "-------------- 0x{b:x}")?;
        writeln!(f, "{n} = {s:x}{u}")?;
        write!(f, "-------------- 0x{l:x}")
    }
}

/// Regions in use, sorted by base address, then by region table order.
fn regions_in_use(table: &RegionTable) -> Result<Vec<RegionInfo>, ParseError> {
    let mut regions = Vec::with_capacity(MAX_REGIONS);
    for t in 0..MAX_REGIONS {
        let r = decode(table, t)?;
        if !r.is_present() {
            debug!("{} unused", r.short_name());
            continue;
        }
        regions.push(r);
    }
    regions.sort_by_key(|r| (r.base, r.region_type));
    Ok(regions)
}

/// Locate the descriptor in an image and get the rows of its layout report.
pub fn build(data: &[u8]) -> Result<Vec<LayoutRow>, ParseError> {
    Layout::parse(data).map(|l| l.rows)
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Layout {
    pub regions: Vec<RegionInfo>,
    pub rows: Vec<LayoutRow>,
}

impl Layout {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let location = locate(data)?;
        let table = RegionTable::read(data, location.region_table_offset)?;
        Self::from_table(&table)
    }

    pub fn from_table(table: &RegionTable) -> Result<Self, ParseError> {
        let regions = regions_in_use(table)?;
        let rows = regions.iter().map(LayoutRow::from).collect();
        Ok(Self { regions, rows })
    }

    /// The layout in flashrom's layout file format, one region per line.
    pub fn flashrom(&self) -> String {
        self.regions.iter().map(|r| format!("{r}\n")).collect()
    }
}

impl Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in &self.rows {
            write!(f, "{r}\n\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
static IFD_SAMPLE: &[u8] = include_bytes!("../tests/sample.ifd");

#[cfg(test)]
const UNUSED: u32 = 0x0000_7fff;

#[cfg(test)]
use crate::{EMPTY, synthetic_image};

#[test]
fn report_sample() {
    let layout = Layout::parse(IFD_SAMPLE).unwrap();
    let expected = "\
-------------- 0x0
FD = 4Kb
-------------- 0xfff

-------------- 0x1000
GbE = 8Kb
-------------- 0x2fff

-------------- 0x3000
ME = 4MB
-------------- 0x4fffff

-------------- 0x500000
BIOS = 3MB
-------------- 0x7fffff

";
    assert_eq!(layout.to_string(), expected);
}

#[test]
fn flashrom_sample() {
    let layout = Layout::parse(IFD_SAMPLE).unwrap();
    let expected = "\
00000000:00000fff FD
00001000:00002fff GbE
00003000:004fffff ME
00500000:007fffff BIOS
";
    assert_eq!(layout.flashrom(), expected);
}

#[test]
fn build_without_signature() {
    let data = vec![EMPTY; 0x1000];
    assert_eq!(build(&data), Err(ParseError::SignatureNotFound));
    assert_eq!(build(&[]), Err(ParseError::SignatureNotFound));
}

#[test]
fn build_propagates_out_of_bounds() {
    let mut data = synthetic_image(0x100, 0x40, &[]);
    data[0x14..0x18].copy_from_slice(&(0x0fu32 << 16).to_le_bytes());
    assert!(matches!(
        build(&data),
        Err(ParseError::OutOfBounds { offset: 0xf0, .. })
    ));
}

#[test]
fn bios_single_page() {
    let mut flregs = [UNUSED; MAX_REGIONS];
    flregs[RegionType::Bios.index()] = 0;
    let data = synthetic_image(0x100, 0x40, &flregs);
    let rows = build(&data).unwrap();
    assert_eq!(rows.len(), 1);
    let bios = rows[0];
    assert_eq!(bios.region_type, RegionType::Bios);
    assert_eq!((bios.base, bios.limit), (0, 0xfff));
    assert_eq!((bios.size_value, bios.size_unit), (4, SizeUnit::Kb));
    assert_eq!(
        bios.to_string(),
        "-------------- 0x0\nBIOS = 4Kb\n-------------- 0xfff"
    );
}

#[test]
fn same_base_in_table_order() {
    let mut flregs = [UNUSED; MAX_REGIONS];
    flregs[RegionType::Ec.index()] = 0x0002_0000;
    flregs[RegionType::Descriptor.index()] = 0x0001_0000;
    flregs[RegionType::Bios.index()] = 0;
    let data = synthetic_image(0x100, 0x40, &flregs);
    let rows = build(&data).unwrap();
    let types: Vec<RegionType> = rows.iter().map(|r| r.region_type).collect();
    assert_eq!(
        types,
        [RegionType::Descriptor, RegionType::Bios, RegionType::Ec]
    );
    assert!(rows.iter().all(|r| r.base == 0));
}

#[test]
fn sorted_and_in_use_only() {
    let flregs = [
        0x07ff_0500, // FD at the top, unusual but valid
        0x04ff_0003,
        UNUSED,
        0x0002_0001,
        0x0000_0001, // limit below base
        0x0fff_0800,
        UNUSED,
        0x8000_0000, // reserved bit only, single page at 0
        UNUSED,
    ];
    let data = synthetic_image(0x100, 0x40, &flregs);
    let layout = Layout::parse(&data).unwrap();
    let bases: Vec<u32> = layout.rows.iter().map(|r| r.base).collect();
    assert_eq!(bases, [0, 0x1000, 0x3000, 0x0050_0000, 0x0080_0000]);
    assert!(layout.regions.iter().all(RegionInfo::is_present));
    assert_eq!(layout.rows[0].region_type, RegionType::Reserved3);
}

#[test]
fn size_units() {
    assert_eq!(SizeUnit::scale(0x1000), (4, SizeUnit::Kb));
    assert_eq!(SizeUnit::scale(0x2000), (8, SizeUnit::Kb));
    assert_eq!(SizeUnit::scale(9999), (9, SizeUnit::Kb));
    // Not quite a MiB is still given in MiB.
    assert_eq!(SizeUnit::scale(10000), (0, SizeUnit::MB));
    assert_eq!(SizeUnit::scale(0x3000), (0, SizeUnit::MB));
    assert_eq!(SizeUnit::scale(0x0200_0000), (32, SizeUnit::MB));
}

#[test]
fn size_in_hex() {
    let mut flregs = [UNUSED; MAX_REGIONS];
    // 0x0000000 - 0x1ffffff
    flregs[RegionType::Bios.index()] = 0x1fff_0000;
    let data = synthetic_image(0x100, 0x40, &flregs);
    let layout = Layout::parse(&data).unwrap();
    assert_eq!(
        layout.to_string(),
        "-------------- 0x0\nBIOS = 20MB\n-------------- 0x1ffffff\n\n"
    );
}

#[test]
fn layout_from_ifd() {
    let ifd = crate::IFD::parse(IFD_SAMPLE).unwrap();
    let layout = ifd.layout().unwrap();
    assert_eq!(layout.rows, build(IFD_SAMPLE).unwrap());
}

#[test]
fn sorted_for_any_table() {
    // xorshift32, fixed seed
    let mut x: u32 = 0x2545_f491;
    let mut next = move || {
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        x
    };
    for _ in 0..2000 {
        let flregs: Vec<u32> = (0..MAX_REGIONS).map(|_| next()).collect();
        let data = synthetic_image(0x100, 0x40, &flregs);
        let layout = Layout::parse(&data).unwrap();
        assert_eq!(layout.rows, build(&data).unwrap());
        let keys: Vec<(u32, RegionType)> =
            layout.rows.iter().map(|r| (r.base, r.region_type)).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert!(layout.rows.iter().all(|r| r.limit >= r.base));
        let in_use = flregs
            .iter()
            .filter(|&&w| crate::region::FlashRegion::from_bits(w).size() >= 1)
            .count();
        assert_eq!(layout.rows.len(), in_use);
    }
}
