//! Finding tables by name.
//!
//! A [`Catalog`] maps names like `"countries"` to table data:
//! blobs compiled into the program, or files in a list of search directories.
//! Each table is loaded the first time it's asked for and shared from then on.
//!
//! [`Catalog`]: struct.Catalog.html

use std::collections::HashMap;
use std::env;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use log::*;

use crate::format::Format;
use crate::read::ZoneTable;
use crate::result::*;

/// Environment variable holding the default catalog's search path,
/// formatted like `PATH`.
pub const SEARCH_PATH_ENV: &str = "ZONELOOKER_PATH";

/// Where a table's data lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Embedded(&'static [u8]),
    File(Utf8PathBuf),
}

/// A set of places to find tables, and a cache of the ones we've loaded.
#[derive(Debug, Default)]
pub struct Catalog {
    search_path: Vec<Utf8PathBuf>,
    embedded: HashMap<String, &'static [u8]>,
    loaded: Mutex<HashMap<String, Arc<ZoneTable>>>,
}

impl Catalog {
    /// Creates an empty catalog: no search directories, no embedded tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog that searches the directories in `$ZONELOOKER_PATH`.
    pub fn from_env() -> Self {
        let mut catalog = Self::new();
        if let Some(paths) = env::var_os(SEARCH_PATH_ENV) {
            for dir in env::split_paths(&paths) {
                match Utf8PathBuf::from_path_buf(dir) {
                    Ok(dir) if dir.as_str().is_empty() => {}
                    Ok(dir) => catalog.search_path.push(dir),
                    Err(dir) => warn!(
                        "Skipping non-UTF-8 directory {} in {}",
                        dir.display(),
                        SEARCH_PATH_ENV
                    ),
                }
            }
        }
        debug!("Catalog search path: {:?}", catalog.search_path);
        catalog
    }

    /// Adds a directory to search (after those already added).
    pub fn with_search_dir<P: Into<Utf8PathBuf>>(mut self, dir: P) -> Self {
        self.search_path.push(dir.into());
        self
    }

    /// Adds a table compiled into the program, say with `include_bytes!()`.
    /// Embedded tables take precedence over files.
    ///
    /// The name follows the same rules as names passed to [`open()`](#method.open),
    /// so a table that's added can always be opened.
    pub fn with_embedded(mut self, name: &str, bytes: &'static [u8]) -> ZoneResult<Self> {
        check_name(name)?;
        self.embedded.insert(name.to_owned(), bytes);
        Ok(self)
    }

    pub fn search_path(&self) -> &[Utf8PathBuf] {
        &self.search_path
    }

    /// Finds where the named table lives without loading it.
    ///
    /// Embedded tables come first, then each search directory in order,
    /// where `<name>.zlt` is preferred over `<name>.zlr`.
    pub fn resolve(&self, name: &str) -> ZoneResult<Source> {
        check_name(name)?;
        if let Some(bytes) = self.embedded.get(name) {
            return Ok(Source::Embedded(*bytes));
        }
        for dir in &self.search_path {
            for format in [Format::Tiled, Format::Raster] {
                let candidate = dir.join(name).with_extension(format.extension());
                trace!("Looking for {} at {}", name, candidate);
                if candidate.is_file() {
                    return Ok(Source::File(candidate));
                }
            }
        }
        Err(ZoneError::DatasetNotFound(name.to_owned()))
    }

    /// Gets the named table, loading it if this is the first time it's asked for.
    ///
    /// ```no_run
    /// # use zonelooker::*;
    /// let catalog = Catalog::new().with_search_dir("/usr/share/zonelooker");
    /// let countries = catalog.open("countries")?;
    /// if let Some(zone) = countries.lookup(48.85, 2.35) {
    ///     println!("Paris is in {}", zone);
    /// }
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(&self, name: &str) -> ZoneResult<Arc<ZoneTable>> {
        // Hold the lock while loading so two threads asking for the same
        // table at once don't both load it.
        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(table) = loaded.get(name) {
            return Ok(Arc::clone(table));
        }

        let table = match self.resolve(name)? {
            Source::Embedded(bytes) => {
                info!("Loading embedded table {}", name);
                ZoneTable::from_bytes(name, bytes)?
            }
            // Files are found as <name>.<ext>, so the table gets named after the stem.
            Source::File(path) => ZoneTable::open(&path)?,
        };
        let table = Arc::new(table);
        loaded.insert(name.to_owned(), Arc::clone(&table));
        Ok(table)
    }

    /// Names of the tables loaded so far
    pub fn loaded(&self) -> Vec<String> {
        let loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = loaded.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Table names become file names, so they can't go wandering around the filesystem.
/// They can't hold dots either: `<name>.zlt` should have only one extension.
fn check_name(name: &str) -> ZoneResult<()> {
    let mut components = Utf8Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Utf8Component::Normal(n)), None) if n == name && !n.contains('.') => Ok(()),
        _ => Err(ZoneError::InvalidName(name.to_owned())),
    }
}

static DEFAULT_CATALOG: OnceLock<Catalog> = OnceLock::new();

/// The process-wide catalog used by [`open_table()`],
/// built from `$ZONELOOKER_PATH` the first time it's needed.
///
/// [`open_table()`]: fn.open_table.html
pub fn default_catalog() -> &'static Catalog {
    DEFAULT_CATALOG.get_or_init(Catalog::from_env)
}

/// Opens the named table from the default catalog.
///
/// ```no_run
/// # use zonelooker::*;
/// // With ZONELOOKER_PATH=/usr/share/zonelooker
/// let table = open_table("countries")?;
/// assert_eq!(table.lookup(35.68, 139.69).unwrap(), "JP");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn open_table(name: &str) -> ZoneResult<Arc<ZoneTable>> {
    default_catalog().open(name)
}
