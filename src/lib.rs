//! zonelooker maps latitude/longitude pairs to zones
//! (countries, time zones, whatever a table was built from)
//! using precomputed lookup tables:
//!
//! ```no_run
//! # use zonelooker::*;
//! // Tables are found by name in the directories listed in $ZONELOOKER_PATH...
//! let countries = open_table("countries")?;
//! assert_eq!(countries.lookup(48.8566, 2.3522).unwrap(), "FR");
//!
//! // ...and points in the middle of nowhere have no zone.
//! assert!(countries.lookup(-40.0, -120.0).is_none());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//! Tables are immutable once loaded, so look up as many points
//! from as many threads as you'd like:
//! ```no_run
//! # use rayon::prelude::*;
//! # use zonelooker::*;
//! #
//! let table = ZoneTable::open("tables/countries.zlt")?;
//! let points = vec![(35.68, 139.69), (-33.87, 151.21), (40.71, -74.01)];
//! let zones: Vec<Option<String>> = points
//!     .par_iter()
//!     .map(|(lat, lon)| table.lookup(*lat, *lon).map(|z| z.to_string()))
//!     .collect();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! A table is a grid covering the globe at some number of pixels per degree,
//! where each pixel holds a zone (or nothing).
//! Stored naively, that's a lot of pixels: 66 million at 32 pixels per degree.
//! But most of the world is big, boring swaths of the same zone,
//! so tiled tables store a hierarchy of square tiles instead,
//! and only the tiles along borders need per-pixel data.
//! Flat [`Raster`]s are still around for authoring tables;
//! compile them to tiles with a [`TableBuilder`].
//!
//! [`Raster`]: raster/struct.Raster.html
//! [`TableBuilder`]: write/struct.TableBuilder.html

pub mod catalog;
pub mod coord;
pub mod raster;
pub mod read;
pub mod result;
pub mod write;

pub use catalog::{default_catalog, open_table, Catalog};
pub use raster::Raster;
pub use read::{TableKind, Zone, ZoneId, ZoneTable};
pub use result::{ZoneError, ZoneResult};
pub use write::{BuildStats, TableBuilder};

mod arch;
mod crc_reader;
mod format;
mod tile;
