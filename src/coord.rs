//! Mapping latitude/longitude onto a table's grid of pixels.
//!
//! Row 0 is the band just south of the north pole and column 0 the band just
//! east of the antimeridian, so for a table with `r` pixels per degree,
//!
//! ```text
//! row    = floor((90 - lat) * r)
//! column = floor((lon + 180) * r)
//! ```
//!
//! Both are clamped onto the grid, which puts latitude -90 on the last row
//! and longitude +180 on the last column (right next to -180 on the first).
//! Longitudes past ±180 wrap around the globe;
//! latitudes past the poles are clamped to them.

use crate::result::*;

/// The largest resolution we can index: level-0 tiles are 8 pixels wide,
/// and the tile key only has 14 bits for the tile's column.
pub const MAX_DEGREE_PIXELS: u16 = 364;

/// A cell in a table's grid. `x` is the column, `y` the row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Pixel {
    pub x: u32,
    pub y: u32,
}

/// Rows in a grid with the given resolution
pub fn rows(degree_pixels: u16) -> u32 {
    180 * degree_pixels as u32
}

/// Columns in a grid with the given resolution
pub fn columns(degree_pixels: u16) -> u32 {
    360 * degree_pixels as u32
}

/// Checks that a resolution is something we can build a grid for.
pub fn check_degree_pixels(degree_pixels: u16) -> ZoneResult<()> {
    if degree_pixels == 0 || degree_pixels > MAX_DEGREE_PIXELS {
        return Err(ZoneError::UnsupportedTable(format!(
            "Resolution of {} pixels per degree isn't in 1..={}",
            degree_pixels, MAX_DEGREE_PIXELS
        )));
    }
    Ok(())
}

/// Wraps a longitude outside of [-180, 180] back around the globe.
///
/// Values already in range (including both ends) are left alone
/// so that +180 and -180 stay on opposite edges of the grid.
pub fn normalize_longitude(lon: f64) -> f64 {
    if (-180.0..=180.0).contains(&lon) {
        lon
    } else {
        (lon + 180.0).rem_euclid(360.0) - 180.0
    }
}

/// Clamps a latitude to the poles.
pub fn normalize_latitude(lat: f64) -> f64 {
    lat.clamp(-90.0, 90.0)
}

/// Errors if the given coordinates aren't finite and within
/// latitude [-90, 90], longitude [-180, 180].
pub fn check_range(lat: f64, lon: f64) -> ZoneResult<()> {
    if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
        Ok(())
    } else {
        Err(ZoneError::OutOfRange { lat, lon })
    }
}

/// Maps coordinates onto the grid of a table with the given resolution.
///
/// Total: every input, including NaN and infinities, lands on exactly one pixel.
/// (Float-to-int casts saturate, and NaN casts to 0.)
pub fn pixel_for(lat: f64, lon: f64, degree_pixels: u16) -> Pixel {
    let scale = degree_pixels as f64;
    let lat = normalize_latitude(lat);
    let lon = normalize_longitude(lon);

    let x = ((lon + 180.0) * scale).floor() as i64;
    let y = ((90.0 - lat) * scale).floor() as i64;
    Pixel {
        x: clamp_to(x, columns(degree_pixels)),
        y: clamp_to(y, rows(degree_pixels)),
    }
}

fn clamp_to(i: i64, len: u32) -> u32 {
    i.clamp(0, len as i64 - 1) as u32
}

/// The latitude/longitude of a pixel's north-west corner
pub fn corner_of(pixel: Pixel, degree_pixels: u16) -> (f64, f64) {
    let scale = degree_pixels as f64;
    let lat = 90.0 - pixel.y as f64 / scale;
    let lon = pixel.x as f64 / scale - 180.0;
    (lat, lon)
}
