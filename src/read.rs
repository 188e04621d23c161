//! Tools for reading zone tables and looking points up in them.
//!
//! To start, open a [`ZoneTable`] from bytes or a file,
//! or by name through a [`Catalog`].
//!
//! [`ZoneTable`]: struct.ZoneTable.html
//! [`Catalog`]: ../catalog/struct.Catalog.html

use std::fmt;
use std::fs::File;
use std::io;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use flate2::read::DeflateDecoder;
use log::*;
use memmap2::Mmap;

use crate::arch::usize;
use crate::coord::{self, Pixel};
use crate::crc_reader;
use crate::format::{self, Format, TiledHeader, FLAG_DEFLATE, NO_ZONE};
use crate::raster::Raster;
use crate::result::*;
use crate::tile::{self, TileIndex};

/// Identifies a zone within a table: an index into its list of zone names.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ZoneId(pub u16);

/// The result of a successful lookup: a zone and its name
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Zone<'a> {
    pub id: ZoneId,
    pub name: &'a str,
}

impl Zone<'_> {
    pub fn as_str(&self) -> &str {
        self.name
    }
}

impl fmt::Display for Zone<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl PartialEq<str> for Zone<'_> {
    fn eq(&self, other: &str) -> bool {
        self.name == other
    }
}

impl PartialEq<&str> for Zone<'_> {
    fn eq(&self, other: &&str) -> bool {
        self.name == *other
    }
}

/// How a table stores its grid
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TableKind {
    /// One zone ID per pixel
    Raster,
    /// Tiles at several zoom levels
    Tiled,
}

#[derive(Debug)]
enum Grid {
    Raster(Vec<u16>),
    Tiled(TileIndex),
}

/// A loaded, immutable table mapping coordinates to zones.
///
/// Lookups don't allocate, lock, or touch the disk,
/// so share the table (say, in an `Arc`) and query it from as many
/// threads as you'd like.
#[derive(Debug)]
pub struct ZoneTable {
    name: String,
    degree_pixels: u16,
    built: DateTime<Utc>,
    zones: Vec<String>,
    grid: Grid,
}

impl ZoneTable {
    /// Reads a table (of either format) from a byte slice.
    ///
    /// ```no_run
    /// # use std::fs;
    /// # use zonelooker::*;
    /// let bytes = fs::read("countries.zlt")?;
    /// let table = ZoneTable::from_bytes("countries", &bytes)?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_bytes(name: &str, bytes: &[u8]) -> ZoneResult<Self> {
        match Format::sniff(bytes)? {
            Format::Tiled => Self::from_tiled(name, bytes),
            Format::Raster => Ok(Self::from_raster(name, Raster::from_bytes(bytes)?)),
        }
    }

    /// Memory maps the table at the given path and reads it.
    /// The table is named after the file's stem.
    ///
    /// ```no_run
    /// # use zonelooker::*;
    /// let table = ZoneTable::open("tables/countries.zlt")?;
    /// assert_eq!(table.name(), "countries");
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open<P: AsRef<Utf8Path>>(path: P) -> ZoneResult<Self> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .ok_or_else(|| ZoneError::InvalidName(path.to_string()))?;
        info!("Memory mapping {}", path);
        let file = File::open(path)?;
        // Safety: tables are read-only once written,
        // and we copy everything we need out of the mapping before returning.
        let mapping = unsafe { Mmap::map(&file)? };
        Self::from_bytes(name, &mapping)
    }

    /// Wraps a raster in a table, so it can be looked up in directly.
    pub fn from_raster(name: &str, raster: Raster) -> Self {
        let degree_pixels = raster.degree_pixels();
        let built = raster.built();
        let (zones, cells) = raster.into_parts();
        Self {
            name: name.to_owned(),
            degree_pixels,
            built,
            zones,
            grid: Grid::Raster(cells),
        }
    }

    fn from_tiled(name: &str, mut bytes: &[u8]) -> ZoneResult<Self> {
        let header = TiledHeader::parse_and_consume(&mut bytes)?;
        trace!("{:?}", header);

        coord::check_degree_pixels(header.degree_pixels)?;
        if header.flags & !FLAG_DEFLATE != 0 {
            return Err(ZoneError::UnsupportedTable(format!(
                "Unknown flags {:#06x}",
                header.flags
            )));
        }
        if header.reserved != 0 {
            warn!("Table {} has nonzero reserved header field", name);
        }
        let built = format::timestamp(header.built)?;
        check_counts(&header)?;

        let stored = bytes
            .get(..usize(header.body_length)?)
            .ok_or(ZoneError::CorruptData("Table body is truncated"))?;
        if stored.len() != bytes.len() {
            return Err(ZoneError::CorruptData("Trailing data after table body"));
        }

        let body = read_body(&header, stored)?;
        let mut body = &body[..];
        let zones = format::parse_zone_names(&mut body, header.zone_count)?;
        let index = TileIndex::parse_and_consume(
            &mut body,
            header.leaf_count,
            &header.tile_counts,
            header.zone_count,
        )?;
        if !body.is_empty() {
            return Err(ZoneError::CorruptData("Trailing data in table body"));
        }

        info!(
            "Loaded table {} ({} pixels per degree, {} zones, {} leaves)",
            name,
            header.degree_pixels,
            zones.len(),
            index.leaves().len()
        );
        Ok(Self {
            name: name.to_owned(),
            degree_pixels: header.degree_pixels,
            built,
            zones,
            grid: Grid::Tiled(index),
        })
    }

    /// The name the table was loaded under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pixels per degree: the table's angular resolution.
    /// Fixed for the lifetime of the table.
    pub fn resolution(&self) -> u32 {
        self.degree_pixels as u32
    }

    /// Number of rows in the grid: always `180 * resolution()`
    pub fn rows(&self) -> u32 {
        coord::rows(self.degree_pixels)
    }

    /// Number of columns in the grid: always `360 * resolution()`
    pub fn columns(&self) -> u32 {
        coord::columns(self.degree_pixels)
    }

    /// When the table was generated
    pub fn built(&self) -> DateTime<Utc> {
        self.built
    }

    /// Whether lookups go through a tile index or a flat raster
    pub fn kind(&self) -> TableKind {
        match self.grid {
            Grid::Raster(_) => TableKind::Raster,
            Grid::Tiled(_) => TableKind::Tiled,
        }
    }

    /// All zones the table can return, in ID order
    pub fn zones(&self) -> impl Iterator<Item = Zone<'_>> {
        self.zones.iter().enumerate().map(|(i, name)| Zone {
            id: ZoneId(i as u16),
            name,
        })
    }

    /// Gets a zone by its ID.
    pub fn zone(&self, id: ZoneId) -> Option<Zone<'_>> {
        self.zones.get(id.0 as usize).map(|name| Zone { id, name })
    }

    /// The grid cell the given coordinates fall in.
    ///
    /// Longitudes outside [-180, 180] wrap around;
    /// latitudes outside [-90, 90] are clamped to the poles.
    pub fn pixel(&self, lat: f64, lon: f64) -> Pixel {
        coord::pixel_for(lat, lon, self.degree_pixels)
    }

    /// Finds the zone containing the given coordinates,
    /// or `None` if nobody's there.
    ///
    /// Never fails: out-of-range coordinates are normalized
    /// (see [`pixel()`](#method.pixel)).
    pub fn lookup(&self, lat: f64, lon: f64) -> Option<Zone<'_>> {
        let pixel = self.pixel(lat, lon);
        self.lookup_pixel(pixel.x, pixel.y)
    }

    /// Like [`lookup()`](#method.lookup), but reports coordinates
    /// outside of latitude [-90, 90] and longitude [-180, 180]
    /// (or NaNs) instead of normalizing them.
    pub fn try_lookup(&self, lat: f64, lon: f64) -> ZoneResult<Option<Zone<'_>>> {
        coord::check_range(lat, lon)?;
        Ok(self.lookup(lat, lon))
    }

    /// Finds the zone of the grid cell at column `x`, row `y`
    /// (clamped onto the grid).
    pub fn lookup_pixel(&self, x: u32, y: u32) -> Option<Zone<'_>> {
        let x = x.min(self.columns() - 1);
        let y = y.min(self.rows() - 1);
        let value = match &self.grid {
            Grid::Raster(cells) => {
                let value = cells[y as usize * self.columns() as usize + x as usize];
                (value != NO_ZONE).then_some(value)
            }
            Grid::Tiled(index) => index.lookup(x, y),
        }?;
        self.zone(ZoneId(value))
    }
}

/// Checks the header's counts against what a table at its resolution can hold,
/// since they bound how much body we're willing to inflate.
fn check_counts(header: &TiledHeader) -> ZoneResult<()> {
    if header.leaf_count > NO_ZONE as u32 {
        return Err(ZoneError::CorruptData("Too many leaves"));
    }
    for (level, count) in header.tile_counts.iter().enumerate() {
        if *count as u64 > tile::tiles_in_grid(header.degree_pixels, level as u8) {
            return Err(ZoneError::CorruptData("More tiles than the grid holds"));
        }
    }
    Ok(())
}

/// Reads out (and maybe inflates) a tiled table's body,
/// checking it against the header's CRC.
fn read_body(header: &TiledHeader, stored: &[u8]) -> ZoneResult<Vec<u8>> {
    let limit = header.max_body_size()?;
    let reader: Box<dyn io::Read + '_> = if header.is_compressed() {
        Box::new(DeflateDecoder::new(stored))
    } else {
        Box::new(stored)
    };
    // Compressed tables usually shrink about fourfold.
    let size_hint = stored.len() * if header.is_compressed() { 4 } else { 1 };
    crc_reader::read_checked(reader, header.body_crc32, size_hint, limit).map_err(|e| {
        if crc_reader::is_too_large(&e) {
            ZoneError::CorruptData("Table body larger than its header allows")
        } else if crc_reader::is_mismatch(&e) {
            ZoneError::CorruptData("Table body checksum mismatch")
        } else if header.is_compressed() {
            debug!("Inflating table body failed: {}", e);
            ZoneError::CorruptData("Table body failed to inflate")
        } else {
            ZoneError::Io(e)
        }
    })
}
