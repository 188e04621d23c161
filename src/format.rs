//! Byte-level layout of zone table files.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`read`] and [`write`] modules.
//! All integers are little-endian.
//!
//! Tiled tables (`.zlt`):
//!
//! ```text
//! magic                      4 bytes  "ZLT" 0x01
//! flags                      2 bytes  bit 0: body is DEFLATE-compressed
//! degree pixels              2 bytes
//! built (unix seconds)       8 bytes  signed
//! zone count                 2 bytes
//! reserved                   2 bytes
//! leaf count                 4 bytes
//! tile count, levels 0..=5   6 x 4 bytes
//! body length (as stored)    4 bytes
//! body CRC-32 (uncompressed) 4 bytes
//!
//! zone names                 zone count NUL-terminated UTF-8 strings
//! leaves                     'S' u16 | '2' u16 u16 u64 | 'P' 64 x u16
//! tiles, levels 0..=5        tile count x (u32 key, u16 leaf index)
//! ```
//!
//! Raster tables (`.zlr`):
//!
//! ```text
//! magic                      4 bytes  "ZLR" 0x01
//! degree pixels              2 bytes
//! zone count                 2 bytes
//! rows                       4 bytes
//! columns                    4 bytes
//! built (unix seconds)       8 bytes  signed
//! body CRC-32                4 bytes
//!
//! zone names                 zone count NUL-terminated UTF-8 strings
//! cells                      rows x columns u16, row-major
//! ```
//!
//! [`read`]: ../read/index.html
//! [`write`]: ../write/index.html

use chrono::{DateTime, Utc};
use memchr::memchr;

use crate::arch::usize;
use crate::result::*;
use crate::tile::{Leaf, TileEntry};

/// Tiled table magic number
pub const TILED_MAGIC: [u8; 4] = [b'Z', b'L', b'T', 1];
/// Raster table magic number
pub const RASTER_MAGIC: [u8; 4] = [b'Z', b'L', b'R', 1];

/// The zone value meaning "nobody's here" (ocean, unclaimed land, ...)
pub const NO_ZONE: u16 = 0xFFFF;

/// Number of tile sizes in a tiled table, from 8 pixels square (level 0)
/// to 256 (level 5).
pub const LEVELS: usize = 6;

/// Longest zone name a table can hold, in bytes
pub const MAX_ZONE_NAME_LENGTH: usize = 255;

/// Set in a tiled table's flags if its body is DEFLATE-compressed.
pub const FLAG_DEFLATE: u16 = 1;

/// Which layout a table's bytes are in
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Format {
    Tiled,
    Raster,
}

impl Format {
    /// Determines the format from the magic number up front.
    pub fn sniff(bytes: &[u8]) -> ZoneResult<Self> {
        match bytes.get(..4) {
            Some(m) if m == TILED_MAGIC => Ok(Format::Tiled),
            Some(m) if m == RASTER_MAGIC => Ok(Format::Raster),
            Some(m) if m[..3] == TILED_MAGIC[..3] || m[..3] == RASTER_MAGIC[..3] => {
                Err(ZoneError::UnsupportedTable(format!(
                    "Unknown table format version {}",
                    m[3]
                )))
            }
            Some(_) => Err(ZoneError::CorruptData("Bad magic number")),
            None => Err(ZoneError::CorruptData("Too small for a table header")),
        }
    }

    /// The file extension tables of this format are stored with
    pub fn extension(self) -> &'static str {
        match self {
            Format::Tiled => "zlt",
            Format::Raster => "zlr",
        }
    }
}

/// Splits `n` bytes off the front of `input`, shrinking it.
pub fn take<'a>(input: &mut &'a [u8], n: usize) -> ZoneResult<&'a [u8]> {
    if input.len() < n {
        return Err(ZoneError::CorruptData("Unexpected end of table data"));
    }
    let (front, rest) = input.split_at(n);
    *input = rest;
    Ok(front)
}

pub fn read_u8(input: &mut &[u8]) -> ZoneResult<u8> {
    Ok(take(input, 1)?[0])
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
pub fn read_u16(input: &mut &[u8]) -> ZoneResult<u16> {
    let bytes = take(input, std::mem::size_of::<u16>())?;
    Ok(u16::from_le_bytes(bytes.try_into().expect("took two bytes")))
}

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
pub fn read_u32(input: &mut &[u8]) -> ZoneResult<u32> {
    let bytes = take(input, std::mem::size_of::<u32>())?;
    Ok(u32::from_le_bytes(bytes.try_into().expect("took four bytes")))
}

/// Reads a little-endian u64 from the front of the provided slice, shrinking it.
pub fn read_u64(input: &mut &[u8]) -> ZoneResult<u64> {
    let bytes = take(input, std::mem::size_of::<u64>())?;
    Ok(u64::from_le_bytes(bytes.try_into().expect("took eight bytes")))
}

pub fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Converts a header's build time to a timestamp.
pub fn timestamp(unix_seconds: i64) -> ZoneResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(unix_seconds, 0)
        .ok_or(ZoneError::CorruptData("Build time out of range"))
}

/// Header of a tiled table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TiledHeader {
    pub flags: u16,
    pub degree_pixels: u16,
    pub built: i64,
    pub zone_count: u16,
    pub reserved: u16,
    pub leaf_count: u32,
    pub tile_counts: [u32; LEVELS],
    pub body_length: u32,
    pub body_crc32: u32,
}

impl TiledHeader {
    pub const SIZE: usize = 56;

    pub fn parse_and_consume(input: &mut &[u8]) -> ZoneResult<Self> {
        if input.len() < Self::SIZE {
            return Err(ZoneError::CorruptData("Too small for a table header"));
        }
        if take(input, 4)? != TILED_MAGIC {
            return Err(ZoneError::CorruptData("Bad magic number"));
        }
        let flags = read_u16(input)?;
        let degree_pixels = read_u16(input)?;
        let built = read_u64(input)? as i64;
        let zone_count = read_u16(input)?;
        let reserved = read_u16(input)?;
        let leaf_count = read_u32(input)?;
        let mut tile_counts = [0; LEVELS];
        for count in &mut tile_counts {
            *count = read_u32(input)?;
        }
        let body_length = read_u32(input)?;
        let body_crc32 = read_u32(input)?;

        Ok(Self {
            flags,
            degree_pixels,
            built,
            zone_count,
            reserved,
            leaf_count,
            tile_counts,
            body_length,
            body_crc32,
        })
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_DEFLATE != 0
    }

    /// The most (uncompressed) body the header's counts leave room for:
    /// every name as long as can be, and every leaf a pixmap.
    pub fn max_body_size(&self) -> ZoneResult<usize> {
        let names = self.zone_count as u64 * (MAX_ZONE_NAME_LENGTH as u64 + 1);
        let leaves = self.leaf_count as u64 * Leaf::MAX_SIZE_IN_FILE as u64;
        let tiles = self.tile_counts.iter().map(|c| *c as u64).sum::<u64>()
            * TileEntry::SIZE_IN_FILE as u64;
        usize(names + leaves + tiles)
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&TILED_MAGIC);
        put_u16(out, self.flags);
        put_u16(out, self.degree_pixels);
        put_u64(out, self.built as u64);
        put_u16(out, self.zone_count);
        put_u16(out, self.reserved);
        put_u32(out, self.leaf_count);
        for count in &self.tile_counts {
            put_u32(out, *count);
        }
        put_u32(out, self.body_length);
        put_u32(out, self.body_crc32);
    }
}

/// Header of a raster table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterHeader {
    pub degree_pixels: u16,
    pub zone_count: u16,
    pub rows: u32,
    pub columns: u32,
    pub built: i64,
    pub body_crc32: u32,
}

impl RasterHeader {
    pub const SIZE: usize = 28;

    pub fn parse_and_consume(input: &mut &[u8]) -> ZoneResult<Self> {
        if input.len() < Self::SIZE {
            return Err(ZoneError::CorruptData("Too small for a table header"));
        }
        if take(input, 4)? != RASTER_MAGIC {
            return Err(ZoneError::CorruptData("Bad magic number"));
        }
        let degree_pixels = read_u16(input)?;
        let zone_count = read_u16(input)?;
        let rows = read_u32(input)?;
        let columns = read_u32(input)?;
        let built = read_u64(input)? as i64;
        let body_crc32 = read_u32(input)?;

        Ok(Self {
            degree_pixels,
            zone_count,
            rows,
            columns,
            built,
            body_crc32,
        })
    }

    /// Size of the cell array following the zone names, in bytes
    pub fn cells_size(&self) -> ZoneResult<usize> {
        usize(self.rows as u64 * self.columns as u64 * 2)
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&RASTER_MAGIC);
        put_u16(out, self.degree_pixels);
        put_u16(out, self.zone_count);
        put_u32(out, self.rows);
        put_u32(out, self.columns);
        put_u64(out, self.built as u64);
        put_u32(out, self.body_crc32);
    }
}

/// Parses `count` NUL-terminated zone names off the front of `input`.
pub fn parse_zone_names(input: &mut &[u8], count: u16) -> ZoneResult<Vec<String>> {
    let mut names = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let end = memchr(0, *input).ok_or(ZoneError::CorruptData("Unterminated zone name"))?;
        if end > MAX_ZONE_NAME_LENGTH {
            return Err(ZoneError::CorruptData("Zone name too long"));
        }
        let name = std::str::from_utf8(&input[..end])?;
        if name.is_empty() {
            return Err(ZoneError::CorruptData("Empty zone name"));
        }
        names.push(name.to_owned());
        *input = &input[end + 1..];
    }
    Ok(names)
}

pub fn write_zone_names<S: AsRef<str>>(out: &mut Vec<u8>, names: &[S]) {
    for name in names {
        out.extend_from_slice(name.as_ref().as_bytes());
        out.push(0);
    }
}

/// Checks that a zone name can be stored in a table.
pub fn check_zone_name(name: &str) -> ZoneResult<()> {
    if name.is_empty() {
        return Err(ZoneError::InvalidInput(String::from("Empty zone name")));
    }
    if name.len() > MAX_ZONE_NAME_LENGTH {
        return Err(ZoneError::InvalidInput(format!(
            "Zone name {:?}... is longer than {} bytes",
            name.chars().take(16).collect::<String>(),
            MAX_ZONE_NAME_LENGTH
        )));
    }
    if memchr(0, name.as_bytes()).is_some() {
        return Err(ZoneError::InvalidInput(format!(
            "Zone name {:?} contains a NUL byte",
            name
        )));
    }
    Ok(())
}
