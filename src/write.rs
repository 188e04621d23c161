//! Compiling rasters into tiled tables.
//!
//! [`TableBuilder`] walks a [`Raster`] from the biggest tiles to the smallest.
//! Any tile that's entirely one zone becomes an entry pointing at that zone's
//! static leaf, and everything under it is considered done.
//! Any tile that's entirely empty is also done, but needs no entry at all.
//! Whatever's left by the time we reach 8x8 tiles is a border,
//! and gets a bitmap (two values) or pixmap (more) leaf.
//! Borders repeat a lot (think of every tile along a straight east-west
//! boundary), so identical leaves are shared.
//!
//! [`TableBuilder`]: struct.TableBuilder.html
//! [`Raster`]: ../raster/struct.Raster.html

use std::collections::HashMap;
use std::io::Write;

use chrono::{DateTime, Utc};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::*;

use crate::coord::Pixel;
use crate::format::{self, TiledHeader, FLAG_DEFLATE, LEVELS, NO_ZONE};
use crate::raster::Raster;
use crate::result::*;
use crate::tile::{tile_size, Leaf, TileEntry, TileIndex, TileKey};

/// What the builder made
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildStats {
    /// Tile entries at each level, from 8x8 (level 0) to 256x256 (level 5)
    pub tiles: [usize; LEVELS],
    pub static_leaves: usize,
    pub bitmap_leaves: usize,
    pub pixmap_leaves: usize,
    /// Border tiles that reused an existing leaf
    pub shared_leaves: usize,
    /// Size of the table, in bytes
    pub size: usize,
}

/// Compiles a [`Raster`] into a tiled table.
///
/// ```no_run
/// # use std::fs;
/// # use zonelooker::*;
/// let raster = Raster::from_bytes(&fs::read("countries.zlr")?)?;
/// let table = TableBuilder::new(&raster).coastal_fill(true).build()?;
/// fs::write("countries.zlt", table)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
///
/// [`Raster`]: ../raster/struct.Raster.html
pub struct TableBuilder<'r> {
    raster: &'r Raster,
    coastal_fill: bool,
    compress: bool,
    built: DateTime<Utc>,
}

impl<'r> TableBuilder<'r> {
    pub fn new(raster: &'r Raster) -> Self {
        Self {
            raster,
            coastal_fill: false,
            compress: true,
            built: raster.built(),
        }
    }

    /// If set, empty cells don't count against a tile
    /// that otherwise holds a single zone:
    /// the whole tile resolves to that zone.
    ///
    /// This makes for much smaller tables and lets points just off the coast
    /// resolve to the land next to them, at the cost of no longer matching
    /// the raster exactly. Off by default.
    pub fn coastal_fill(mut self, fill: bool) -> Self {
        self.coastal_fill = fill;
        self
    }

    /// DEFLATE the table body. On by default.
    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Overrides the build time recorded in the table
    /// (which defaults to the raster's).
    pub fn built(mut self, built: DateTime<Utc>) -> Self {
        self.built = built;
        self
    }

    /// Builds the table into a buffer.
    pub fn build(&self) -> ZoneResult<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }

    /// Builds the table and writes it to `sink`.
    pub fn write_to<W: Write>(&self, mut sink: W) -> ZoneResult<BuildStats> {
        let (index, mut stats) = self.build_index()?;

        let mut body = Vec::new();
        format::write_zone_names(&mut body, self.raster.zones());
        index.write_to(&mut body);
        let body_crc32 = crc32fast::hash(&body);

        let stored = if self.compress {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
            encoder.write_all(&body)?;
            encoder.finish()?
        } else {
            body
        };
        let body_length = u32::try_from(stored.len()).map_err(|_| {
            ZoneError::InvalidInput(String::from("Table body exceeds 4 GB"))
        })?;

        let header = TiledHeader {
            flags: if self.compress { FLAG_DEFLATE } else { 0 },
            degree_pixels: self.raster.degree_pixels(),
            built: self.built.timestamp(),
            zone_count: self.raster.zones().len() as u16,
            reserved: 0,
            leaf_count: index.leaves().len() as u32,
            tile_counts: index.tile_counts(),
            body_length,
            body_crc32,
        };
        let mut head = Vec::with_capacity(TiledHeader::SIZE);
        header.write_to(&mut head);
        sink.write_all(&head)?;
        sink.write_all(&stored)?;
        sink.flush()?;

        stats.size = head.len() + stored.len();
        info!(
            "Built table: {} bytes, {} static, {} bitmap and {} pixmap leaves ({} shared)",
            stats.size,
            stats.static_leaves,
            stats.bitmap_leaves,
            stats.pixmap_leaves,
            stats.shared_leaves
        );
        Ok(stats)
    }

    fn build_index(&self) -> ZoneResult<(TileIndex, BuildStats)> {
        let raster = self.raster;
        let mut stats = BuildStats::default();
        let mut leaves = Leaves::new(raster.zones().len());
        stats.static_leaves = raster.zones().len();
        let mut levels: [Vec<TileEntry>; LEVELS] = Default::default();
        let mut done = Coverage::new(raster.columns(), raster.rows());

        for level in (0..LEVELS as u8).rev() {
            let size = tile_size(level);
            let x_tiles = raster.columns().div_ceil(size);
            let y_tiles = raster.rows().div_ceil(size);
            let entries = &mut levels[level as usize];

            // Row-major order, so keys come out sorted.
            for tile_y in 0..y_tiles {
                for tile_x in 0..x_tiles {
                    let tile = Tile {
                        level,
                        x0: tile_x * size,
                        y0: tile_y * size,
                        x1: ((tile_x + 1) * size).min(raster.columns()),
                        y1: ((tile_y + 1) * size).min(raster.rows()),
                    };
                    if done.is_covered(&tile) {
                        continue;
                    }
                    let key = TileKey::new(level, tile_x, tile_y);

                    match self.survey(&tile) {
                        Survey::Empty => done.cover(&tile),
                        Survey::Solid(zone) => {
                            entries.push(TileEntry { key, leaf: zone });
                            done.cover(&tile);
                        }
                        Survey::Mixed if level == 0 => {
                            let (leaf, shared) = leaves.add(self.border_leaf(&tile))?;
                            if shared {
                                stats.shared_leaves += 1;
                            }
                            entries.push(TileEntry { key, leaf });
                            done.cover(&tile);
                        }
                        Survey::Mixed => {}
                    }
                }
            }
            stats.tiles[level as usize] = entries.len();
            debug!(
                "Level {} ({}x{} tiles): {} entries",
                level,
                size,
                size,
                entries.len()
            );
        }

        let leaves = leaves.finish();
        for leaf in &leaves {
            match leaf {
                Leaf::Static(_) => {}
                Leaf::Bitmap(..) => stats.bitmap_leaves += 1,
                Leaf::Pixmap(_) => stats.pixmap_leaves += 1,
            }
        }
        let index = TileIndex::new(levels, leaves, raster.zones().len() as u16)?;
        Ok((index, stats))
    }

    /// Figures out what's in a tile.
    fn survey(&self, tile: &Tile) -> Survey {
        let mut first_zone = None;
        let mut saw_empty = false;
        for y in tile.y0..tile.y1 {
            for x in tile.x0..tile.x1 {
                let value = self.raster.value_at(Pixel { x, y });
                if value == NO_ZONE {
                    saw_empty = true;
                    if !self.coastal_fill && first_zone.is_some() {
                        return Survey::Mixed;
                    }
                    continue;
                }
                match first_zone {
                    None => {
                        if saw_empty && !self.coastal_fill {
                            return Survey::Mixed;
                        }
                        first_zone = Some(value);
                    }
                    Some(z) if z != value => return Survey::Mixed,
                    Some(_) => {}
                }
            }
        }
        match first_zone {
            None => Survey::Empty,
            Some(zone) => Survey::Solid(zone),
        }
    }

    /// Makes the leaf for an 8x8 tile that isn't all one zone.
    fn border_leaf(&self, tile: &Tile) -> Leaf {
        debug_assert_eq!(tile.level, 0);
        // Pixels past the edge of the grid can never be looked up
        // (lookups clamp onto the grid), so repeat the nearest edge pixel.
        // That way a clipped tile matches the full tiles beside it.
        let mut values = [NO_ZONE; 64];
        for dy in 0..8 {
            for dx in 0..8 {
                let x = (tile.x0 + dx).min(tile.x1 - 1);
                let y = (tile.y0 + dy).min(tile.y1 - 1);
                values[(8 * dy + dx) as usize] = self.raster.value_at(Pixel { x, y });
            }
        }

        let first = values[0];
        let mut second = None;
        let mut bits = 0u64;
        for (i, value) in values.iter().enumerate() {
            if *value == first {
                continue;
            }
            match second {
                None => second = Some(*value),
                Some(s) if s != *value => return Leaf::Pixmap(Box::new(values)),
                Some(_) => {}
            }
            bits |= 1 << i;
        }
        match second {
            Some(second) => Leaf::Bitmap([first, second], bits),
            // Mixed tiles have at least two values, but just in case.
            None => Leaf::Static(first),
        }
    }
}

/// A tile's pixel bounds, clipped to the grid
struct Tile {
    level: u8,
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

enum Survey {
    /// No zones at all
    Empty,
    /// One zone (plus empty cells, with coastal fill on)
    Solid(u16),
    /// Needs a closer look
    Mixed,
}

/// Tracks which 8x8 blocks of the grid a coarser level already took care of.
struct Coverage {
    blocks_wide: u32,
    blocks: Vec<bool>,
}

impl Coverage {
    fn new(columns: u32, rows: u32) -> Self {
        let blocks_wide = columns.div_ceil(8);
        let blocks_high = rows.div_ceil(8);
        Self {
            blocks_wide,
            blocks: vec![false; blocks_wide as usize * blocks_high as usize],
        }
    }

    fn block(&self, x: u32, y: u32) -> usize {
        (y / 8) as usize * self.blocks_wide as usize + (x / 8) as usize
    }

    /// Tiles nest, so if a coarser tile covered this one,
    /// it covered its top-left block.
    fn is_covered(&self, tile: &Tile) -> bool {
        self.blocks[self.block(tile.x0, tile.y0)]
    }

    fn cover(&mut self, tile: &Tile) {
        for y in (tile.y0..tile.y1).step_by(8) {
            for x in (tile.x0..tile.x1).step_by(8) {
                let block = self.block(x, y);
                self.blocks[block] = true;
            }
        }
    }
}

/// Deduplicating leaf storage.
/// Leaf `i` for `i` < zone count is the static leaf for zone `i`,
/// so solid tiles can point straight at their zone's ID.
struct Leaves {
    list: Vec<Leaf>,
    seen: HashMap<Leaf, u16>,
}

impl Leaves {
    fn new(zone_count: usize) -> Self {
        let list: Vec<Leaf> = (0..zone_count as u16).map(Leaf::Static).collect();
        let seen = list
            .iter()
            .enumerate()
            .map(|(i, leaf)| (leaf.clone(), i as u16))
            .collect();
        Self { list, seen }
    }

    /// Returns the leaf's index and whether it was already there.
    fn add(&mut self, leaf: Leaf) -> ZoneResult<(u16, bool)> {
        if let Some(i) = self.seen.get(&leaf) {
            return Ok((*i, true));
        }
        // Leaf indices stop short of NO_ZONE.
        if self.list.len() >= NO_ZONE as usize {
            return Err(ZoneError::InvalidInput(format!(
                "Raster needs more than {} unique leaves",
                NO_ZONE
            )));
        }
        let i = self.list.len() as u16;
        self.list.push(leaf.clone());
        self.seen.insert(leaf, i);
        Ok((i, false))
    }

    fn finish(self) -> Vec<Leaf> {
        self.list
    }
}
