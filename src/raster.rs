//! Flat, full-resolution grids of zones.
//!
//! A [`Raster`] stores one zone ID per pixel, which makes it easy to author
//! (paint regions, poke at cells) and trivial to look up in,
//! but it's big: 132 MB at 32 pixels per degree.
//! The [`write`] module compiles rasters into much smaller tiled tables.
//!
//! [`Raster`]: struct.Raster.html
//! [`write`]: ../write/index.html

use chrono::{DateTime, SubsecRound, Utc};
use log::*;

use crate::arch::usize;
use crate::coord::{self, Pixel};
use crate::crc_reader;
use crate::format::{self, RasterHeader, NO_ZONE};
use crate::read::ZoneId;
use crate::result::*;

/// A grid of `180 * resolution` rows by `360 * resolution` columns,
/// each holding a zone (or nothing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    degree_pixels: u16,
    zones: Vec<String>,
    cells: Vec<u16>,
    built: DateTime<Utc>,
}

impl Raster {
    /// Creates a raster where every cell has no zone.
    pub fn new(degree_pixels: u16) -> ZoneResult<Self> {
        coord::check_degree_pixels(degree_pixels)?;
        let cell_count =
            usize(coord::rows(degree_pixels) as u64 * coord::columns(degree_pixels) as u64)?;
        Ok(Self {
            degree_pixels,
            zones: Vec::new(),
            cells: vec![NO_ZONE; cell_count],
            // Files store whole seconds.
            built: Utc::now().trunc_subsecs(0),
        })
    }

    pub fn degree_pixels(&self) -> u16 {
        self.degree_pixels
    }

    pub fn rows(&self) -> u32 {
        coord::rows(self.degree_pixels)
    }

    pub fn columns(&self) -> u32 {
        coord::columns(self.degree_pixels)
    }

    pub fn zones(&self) -> &[String] {
        &self.zones
    }

    /// When the raster was created (or the time stored in the file it was read from)
    pub fn built(&self) -> DateTime<Utc> {
        self.built
    }

    pub(crate) fn into_parts(self) -> (Vec<String>, Vec<u16>) {
        (self.zones, self.cells)
    }

    /// Adds a zone (if it isn't there already) and returns its ID.
    pub fn add_zone(&mut self, name: &str) -> ZoneResult<ZoneId> {
        if let Some(i) = self.zones.iter().position(|z| z == name) {
            return Ok(ZoneId(i as u16));
        }
        format::check_zone_name(name)?;
        // NO_ZONE is reserved, so the last usable ID is one below it.
        if self.zones.len() >= NO_ZONE as usize {
            return Err(ZoneError::InvalidInput(format!(
                "Can't add {}: a table holds at most {} zones",
                name, NO_ZONE
            )));
        }
        self.zones.push(name.to_owned());
        Ok(ZoneId(self.zones.len() as u16 - 1))
    }

    fn offset(&self, x: u32, y: u32) -> ZoneResult<usize> {
        if x >= self.columns() || y >= self.rows() {
            return Err(ZoneError::InvalidInput(format!(
                "({}, {}) is outside of a {}x{} raster",
                x,
                y,
                self.columns(),
                self.rows()
            )));
        }
        Ok(y as usize * self.columns() as usize + x as usize)
    }

    fn check_zone(&self, zone: Option<ZoneId>) -> ZoneResult<u16> {
        match zone {
            None => Ok(NO_ZONE),
            Some(ZoneId(id)) if (id as usize) < self.zones.len() => Ok(id),
            Some(ZoneId(id)) => Err(ZoneError::InvalidInput(format!(
                "Zone {} hasn't been added to the raster",
                id
            ))),
        }
    }

    /// Sets the zone of the cell at column `x`, row `y`.
    pub fn set(&mut self, x: u32, y: u32, zone: Option<ZoneId>) -> ZoneResult<()> {
        let value = self.check_zone(zone)?;
        let offset = self.offset(x, y)?;
        self.cells[offset] = value;
        Ok(())
    }

    /// Gets the zone of the cell at column `x`, row `y`.
    pub fn get(&self, x: u32, y: u32) -> ZoneResult<Option<ZoneId>> {
        let value = self.cells[self.offset(x, y)?];
        Ok((value != NO_ZONE).then_some(ZoneId(value)))
    }

    /// Gets the raw cell value at a pixel already known to be on the grid.
    pub(crate) fn value_at(&self, pixel: Pixel) -> u16 {
        self.cells[pixel.y as usize * self.columns() as usize + pixel.x as usize]
    }

    /// Sets every cell whose north-west corner lies within the given box
    /// (edges included) to `zone`. Returns how many cells were set.
    ///
    /// Boxes crossing the antimeridian aren't supported;
    /// paint each side separately.
    pub fn fill_region(
        &mut self,
        north: f64,
        west: f64,
        south: f64,
        east: f64,
        zone: Option<ZoneId>,
    ) -> ZoneResult<usize> {
        let value = self.check_zone(zone)?;
        if !(north >= south && east >= west) {
            return Err(ZoneError::InvalidInput(format!(
                "Region N {} W {} S {} E {} is empty or inside out",
                north, west, south, east
            )));
        }
        coord::check_range(north, west)?;
        coord::check_range(south, east)?;

        let scale = self.degree_pixels as f64;
        let last_x = self.columns() as f64 - 1.0;
        let last_y = self.rows() as f64 - 1.0;
        let x0 = ((west + 180.0) * scale).ceil().min(last_x) as u32;
        let x1 = ((east + 180.0) * scale).floor().min(last_x) as u32;
        let y0 = ((90.0 - north) * scale).ceil().min(last_y) as u32;
        let y1 = ((90.0 - south) * scale).floor().min(last_y) as u32;
        if x0 > x1 || y0 > y1 {
            return Ok(0);
        }

        let columns = self.columns() as usize;
        for y in y0..=y1 {
            let row = y as usize * columns;
            self.cells[row + x0 as usize..=row + x1 as usize].fill(value);
        }
        let count = (x1 - x0 + 1) as usize * (y1 - y0 + 1) as usize;
        debug!(
            "Filled {} cells (x {}..={}, y {}..={}) with {:?}",
            count, x0, x1, y0, y1, zone
        );
        Ok(count)
    }

    /// Overrides the build time recorded in the raster, to the second.
    pub fn set_built(&mut self, built: DateTime<Utc>) {
        self.built = built.trunc_subsecs(0);
    }

    /// Serializes the raster into the raster table format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.cells.len() * 2 + self.zones.len() * 8);
        format::write_zone_names(&mut body, &self.zones);
        for cell in &self.cells {
            format::put_u16(&mut body, *cell);
        }

        let header = RasterHeader {
            degree_pixels: self.degree_pixels,
            zone_count: self.zones.len() as u16,
            rows: self.rows(),
            columns: self.columns(),
            built: self.built.timestamp(),
            body_crc32: crc32fast::hash(&body),
        };
        let mut out = Vec::with_capacity(RasterHeader::SIZE + body.len());
        header.write_to(&mut out);
        out.extend_from_slice(&body);
        out
    }

    /// Reads a raster out of the raster table format.
    pub fn from_bytes(mut bytes: &[u8]) -> ZoneResult<Self> {
        let header = RasterHeader::parse_and_consume(&mut bytes)?;
        trace!("{:?}", header);
        coord::check_degree_pixels(header.degree_pixels)?;
        if header.rows != coord::rows(header.degree_pixels)
            || header.columns != coord::columns(header.degree_pixels)
        {
            return Err(ZoneError::CorruptData(
                "Raster dimensions don't match its resolution",
            ));
        }
        let built = format::timestamp(header.built)?;

        let body = crc_reader::read_checked(bytes, header.body_crc32, bytes.len(), bytes.len())
            .map_err(|e| {
                if crc_reader::is_mismatch(&e) {
                    ZoneError::CorruptData("Raster checksum mismatch")
                } else {
                    ZoneError::Io(e)
                }
            })?;
        let mut body = &body[..];

        let zones = format::parse_zone_names(&mut body, header.zone_count)?;
        let cells_size = header.cells_size()?;
        if body.len() != cells_size {
            return Err(ZoneError::CorruptData("Raster cell data is the wrong size"));
        }
        let cells: Vec<u16> = body
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        if cells
            .iter()
            .any(|c| *c != NO_ZONE && *c >= header.zone_count)
        {
            return Err(ZoneError::CorruptData("Cell refers to a nonexistent zone"));
        }
        debug!(
            "Read {}x{} raster with {} zones",
            header.columns,
            header.rows,
            zones.len()
        );

        Ok(Self {
            degree_pixels: header.degree_pixels,
            zones,
            cells,
            built,
        })
    }
}
