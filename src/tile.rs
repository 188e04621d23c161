//! The tile index behind tiled tables.
//!
//! The grid is carved into square tiles at six zoom levels,
//! from 256 pixels a side (level 5) down to 8 (level 0).
//! A tile that's entirely one zone is stored at the coarsest level it fits,
//! and only the 8x8 tiles along zone borders need per-pixel data.
//! So, to find the zone at a pixel, check the tile containing it at each level,
//! largest first, until one turns up.
//!
//! Each level is a sorted array of `(tile key, leaf index)` pairs,
//! and leaves are shared between tiles: every all-France tile points at the
//! same static leaf, and identical 8x8 border tiles share one bitmap or pixmap.

use log::*;

use crate::arch::usize;
use crate::coord;
use crate::format::{self, read_u16, read_u32, read_u64, read_u8, LEVELS, NO_ZONE};
use crate::result::*;

const STATIC_TAG: u8 = b'S';
const BITMAP_TAG: u8 = b'2';
const PIXMAP_TAG: u8 = b'P';

const TILE_COORD_MASK: u32 = (1 << 14) - 1;

/// Identifies a tile: its level and its column and row at that level.
///
/// ```text
/// bits 28..31  level
/// bits 14..27  tile row
/// bits  0..13  tile column
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileKey(pub u32);

impl TileKey {
    pub fn new(level: u8, tile_x: u32, tile_y: u32) -> Self {
        let level = level as u32 & 7;
        TileKey(level << 28 | (tile_y & TILE_COORD_MASK) << 14 | (tile_x & TILE_COORD_MASK))
    }

    /// The key of the tile at `level` containing the given pixel
    pub fn containing(level: u8, x: u32, y: u32) -> Self {
        let shift = 3 + level as u32;
        Self::new(level, x >> shift, y >> shift)
    }

    pub fn level(self) -> u8 {
        (self.0 >> 28) as u8
    }
}

/// Width (and height) in pixels of a tile at the given level
pub fn tile_size(level: u8) -> u32 {
    8 << level
}

/// How many tiles of the given level cover a grid at `degree_pixels`,
/// counting the clipped ones along its edges
pub fn tiles_in_grid(degree_pixels: u16, level: u8) -> u64 {
    let size = tile_size(level);
    let across = coord::columns(degree_pixels).div_ceil(size);
    let down = coord::rows(degree_pixels).div_ceil(size);
    across as u64 * down as u64
}

/// What a tile resolves to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Leaf {
    /// The whole tile is one zone.
    Static(u16),
    /// An 8x8 tile with two values.
    /// A set bit at `8 * (y % 8) + (x % 8)` picks the second.
    Bitmap([u16; 2], u64),
    /// An 8x8 tile with a value per pixel, row-major.
    Pixmap(Box<[u16; 64]>),
}

impl Leaf {
    /// Size of the largest leaf (a pixmap) in a table body
    pub const MAX_SIZE_IN_FILE: usize = 1 + 64 * 2;

    /// The value (zone ID or `NO_ZONE`) this leaf gives the given pixel
    pub fn value_at(&self, x: u32, y: u32) -> u16 {
        let offset = 8 * (y & 7) + (x & 7);
        match self {
            Leaf::Static(zone) => *zone,
            Leaf::Bitmap(values, bits) => values[(bits >> offset) as usize & 1],
            Leaf::Pixmap(values) => values[offset as usize],
        }
    }

    fn values(&self) -> &[u16] {
        match self {
            Leaf::Static(zone) => std::slice::from_ref(zone),
            Leaf::Bitmap(values, _) => values,
            Leaf::Pixmap(values) => &values[..],
        }
    }

    pub fn parse_and_consume(input: &mut &[u8]) -> ZoneResult<Self> {
        match read_u8(input)? {
            STATIC_TAG => Ok(Leaf::Static(read_u16(input)?)),
            BITMAP_TAG => {
                let first = read_u16(input)?;
                let second = read_u16(input)?;
                let bits = read_u64(input)?;
                Ok(Leaf::Bitmap([first, second], bits))
            }
            PIXMAP_TAG => {
                let mut values = Box::new([0u16; 64]);
                for value in values.iter_mut() {
                    *value = read_u16(input)?;
                }
                Ok(Leaf::Pixmap(values))
            }
            _ => Err(ZoneError::CorruptData("Unknown leaf type")),
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Leaf::Static(zone) => {
                out.push(STATIC_TAG);
                format::put_u16(out, *zone);
            }
            Leaf::Bitmap([first, second], bits) => {
                out.push(BITMAP_TAG);
                format::put_u16(out, *first);
                format::put_u16(out, *second);
                format::put_u64(out, *bits);
            }
            Leaf::Pixmap(values) => {
                out.push(PIXMAP_TAG);
                for value in values.iter() {
                    format::put_u16(out, *value);
                }
            }
        }
    }
}

/// One entry in a level: a tile and the leaf it resolves through
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TileEntry {
    pub key: TileKey,
    pub leaf: u16,
}

impl TileEntry {
    pub const SIZE_IN_FILE: usize = 6;

    pub fn parse_and_consume(input: &mut &[u8]) -> ZoneResult<Self> {
        let key = TileKey(read_u32(input)?);
        let leaf = read_u16(input)?;
        Ok(Self { key, leaf })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        format::put_u32(out, self.key.0);
        format::put_u16(out, self.leaf);
    }
}

/// All the tiles of a table, sorted by level and key, and the leaves they use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileIndex {
    levels: [Vec<TileEntry>; LEVELS],
    leaves: Vec<Leaf>,
}

impl TileIndex {
    /// Builds an index, checking everything a lookup will rely on:
    /// keys are sorted and belong to their level,
    /// tiles point at real leaves, and leaves point at real zones.
    pub fn new(
        levels: [Vec<TileEntry>; LEVELS],
        leaves: Vec<Leaf>,
        zone_count: u16,
    ) -> ZoneResult<Self> {
        // Leaf indices are u16s, and NO_ZONE isn't one.
        if leaves.len() > NO_ZONE as usize {
            return Err(ZoneError::CorruptData("Too many leaves"));
        }
        for leaf in &leaves {
            if leaf
                .values()
                .iter()
                .any(|v| *v != NO_ZONE && *v >= zone_count)
            {
                return Err(ZoneError::CorruptData("Leaf refers to a nonexistent zone"));
            }
        }
        for (level, entries) in levels.iter().enumerate() {
            if entries.iter().any(|e| e.key.level() as usize != level) {
                return Err(ZoneError::CorruptData("Tile key in the wrong level"));
            }
            if entries.windows(2).any(|pair| pair[0].key >= pair[1].key) {
                return Err(ZoneError::CorruptData("Tile keys out of order"));
            }
            if entries.iter().any(|e| e.leaf as usize >= leaves.len()) {
                return Err(ZoneError::CorruptData("Tile refers to a nonexistent leaf"));
            }
        }
        Ok(Self { levels, leaves })
    }

    /// Parses the leaves and tiles of a tiled table's body.
    pub fn parse_and_consume(
        input: &mut &[u8],
        leaf_count: u32,
        tile_counts: &[u32; LEVELS],
        zone_count: u16,
    ) -> ZoneResult<Self> {
        // Leaves are at least three bytes apiece;
        // don't let a bogus count make us allocate the world.
        let leaf_count = usize(leaf_count)?;
        if leaf_count > input.len() / 3 {
            return Err(ZoneError::CorruptData("Leaf count exceeds table size"));
        }
        let mut leaves = Vec::with_capacity(leaf_count);
        for _ in 0..leaf_count {
            leaves.push(Leaf::parse_and_consume(input)?);
        }

        let mut levels: [Vec<TileEntry>; LEVELS] = Default::default();
        for (entries, count) in levels.iter_mut().zip(tile_counts) {
            let count = usize(*count)?;
            if count > input.len() / TileEntry::SIZE_IN_FILE {
                return Err(ZoneError::CorruptData("Tile count exceeds table size"));
            }
            entries.reserve_exact(count);
            for _ in 0..count {
                entries.push(TileEntry::parse_and_consume(input)?);
            }
        }
        trace!(
            "{} leaves, tiles per level: {:?}",
            leaves.len(),
            levels.iter().map(Vec::len).collect::<Vec<_>>()
        );

        Self::new(levels, leaves, zone_count)
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        for leaf in &self.leaves {
            leaf.write_to(out);
        }
        for entries in &self.levels {
            for entry in entries {
                entry.write_to(out);
            }
        }
    }

    pub fn leaves(&self) -> &[Leaf] {
        &self.leaves
    }

    pub fn tile_counts(&self) -> [u32; LEVELS] {
        let mut counts = [0; LEVELS];
        for (count, entries) in counts.iter_mut().zip(&self.levels) {
            // Keys only have 28 bits, so that's as many tiles as a level can hold.
            *count = entries.len() as u32;
        }
        counts
    }

    /// Looks up the zone at the given pixel, coarsest level first.
    ///
    /// Returns `None` for no-zone pixels and pixels no tile covers.
    pub fn lookup(&self, x: u32, y: u32) -> Option<u16> {
        for level in (0..LEVELS as u8).rev() {
            if let Some(zone) = self.lookup_level(level, x, y) {
                return (zone != NO_ZONE).then_some(zone);
            }
        }
        None
    }

    /// Returns the value the tile at `level` gives the pixel,
    /// or `None` if there's no such tile.
    fn lookup_level(&self, level: u8, x: u32, y: u32) -> Option<u16> {
        let key = TileKey::containing(level, x, y);
        let entries = &self.levels[level as usize];
        let i = entries.binary_search_by_key(&key, |e| e.key).ok()?;
        let leaf = &self.leaves[entries[i].leaf as usize];
        Some(leaf.value_at(x, y))
    }
}
