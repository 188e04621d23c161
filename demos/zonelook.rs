use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::*;
use camino::Utf8PathBuf;
use log::*;
use memmap2::Mmap;
use rayon::prelude::*;
use structopt::*;

use zonelooker::*;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "zonelook",
    about = "Looks up, inspects, renders, and compiles zone tables"
)]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Prints the zone of each point, or "-" if it has none.
    Lookup {
        /// A table file, or the name of a table in $ZONELOOKER_PATH
        table: String,

        /// Points as <latitude>,<longitude>
        #[structopt(name("LAT,LON"), required = true)]
        points: Vec<String>,
    },

    /// Prints a table's resolution, build time, and zones.
    Info {
        /// A table file, or the name of a table in $ZONELOOKER_PATH
        table: String,
    },

    /// Draws a table as a PNG, one color per zone.
    Render {
        /// Draw every Nth pixel, to keep fine tables to a sane size.
        #[structopt(long, default_value = "1")]
        step: u32,

        /// Also write a CSV of each zone's color.
        #[structopt(long)]
        legend: Option<PathBuf>,

        /// A table file, or the name of a table in $ZONELOOKER_PATH
        table: String,

        #[structopt(name("output"))]
        output_path: PathBuf,
    },

    /// Compiles a raster (.zlr) into a tiled table (.zlt).
    Compile {
        /// Let empty cells take the zone of the tile around them.
        #[structopt(long)]
        coastal_fill: bool,

        /// Store the table body uncompressed.
        #[structopt(long)]
        no_compress: bool,

        #[structopt(name("raster"))]
        raster_path: PathBuf,

        #[structopt(name("output"))]
        output_path: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    match args.command {
        Command::Lookup { table, points } => lookup(&*open(&table)?, &points),
        Command::Info { table } => info(&*open(&table)?),
        Command::Render {
            step,
            legend,
            table,
            output_path,
        } => render(&*open(&table)?, step, &output_path, legend.as_deref()),
        Command::Compile {
            coastal_fill,
            no_compress,
            raster_path,
            output_path,
        } => compile(&raster_path, &output_path, coastal_fill, !no_compress),
    }
}

/// Opens a table from a file if there's one at the given path,
/// and from the default catalog otherwise.
fn open(table: &str) -> Result<Arc<ZoneTable>> {
    let path = Utf8PathBuf::from(table);
    if path.is_file() {
        let table = ZoneTable::open(&path).with_context(|| format!("Couldn't load {}", path))?;
        return Ok(Arc::new(table));
    }
    open_table(table).with_context(|| format!("Couldn't load table {}", table))
}

fn parse_point(point: &str) -> Result<(f64, f64)> {
    let (lat, lon) = point
        .split_once(',')
        .ok_or_else(|| anyhow!("Expected <latitude>,<longitude>, got {}", point))?;
    let lat = lat
        .trim()
        .parse()
        .with_context(|| format!("Bad latitude in {}", point))?;
    let lon = lon
        .trim()
        .parse()
        .with_context(|| format!("Bad longitude in {}", point))?;
    Ok((lat, lon))
}

fn lookup(table: &ZoneTable, points: &[String]) -> Result<()> {
    let points = points
        .iter()
        .map(|p| parse_point(p))
        .collect::<Result<Vec<_>>>()?;

    let zones: Vec<Option<Zone>> = points
        .par_iter()
        .map(|(lat, lon)| table.lookup(*lat, *lon))
        .collect();

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for ((lat, lon), zone) in points.iter().zip(zones) {
        match zone {
            Some(z) => writeln!(out, "{},{}\t{}", lat, lon, z)?,
            None => writeln!(out, "{},{}\t-", lat, lon)?,
        }
    }
    out.flush()?;
    Ok(())
}

fn info(table: &ZoneTable) -> Result<()> {
    println!("name: {}", table.name());
    println!("kind: {:?}", table.kind());
    println!("resolution: {} pixels per degree", table.resolution());
    println!("grid: {} x {}", table.columns(), table.rows());
    println!("built: {}", table.built().to_rfc3339());
    println!("zones: {}", table.zones().count());
    for zone in table.zones() {
        println!("  {:5} {}", zone.id.0, zone);
    }
    Ok(())
}

/// A zone's color: the top three bytes of its name's CRC-32,
/// so a zone keeps its color from table to table.
fn zone_color(name: &str) -> [u8; 3] {
    let hash = crc32fast::hash(name.as_bytes());
    [(hash >> 24) as u8, (hash >> 16) as u8, (hash >> 8) as u8]
}

fn render(table: &ZoneTable, step: u32, output_path: &Path, legend: Option<&Path>) -> Result<()> {
    ensure!(step > 0, "--step must be positive");
    let colors: Vec<[u8; 3]> = table.zones().map(|z| zone_color(z.name)).collect();
    let width = table.columns().div_ceil(step);
    let height = table.rows().div_ceil(step);
    info!("Rendering {} at {}x{}", table.name(), width, height);

    // No zone is black.
    let rows: Vec<Vec<u8>> = (0..height)
        .into_par_iter()
        .map(|row| {
            (0..width)
                .flat_map(|col| match table.lookup_pixel(col * step, row * step) {
                    Some(zone) => colors[zone.id.0 as usize],
                    None => [0; 3],
                })
                .collect()
        })
        .collect();
    let image = image::RgbImage::from_raw(width, height, rows.concat())
        .ok_or_else(|| anyhow!("Rendered image is the wrong size"))?;
    image
        .save_with_format(output_path, image::ImageFormat::Png)
        .with_context(|| format!("Couldn't write {}", output_path.display()))?;

    if let Some(legend) = legend {
        let mut out = BufWriter::new(
            File::create(legend)
                .with_context(|| format!("Couldn't create {}", legend.display()))?,
        );
        writeln!(out, "zone,color")?;
        for (zone, [r, g, b]) in table.zones().zip(&colors) {
            writeln!(out, "{},#{:02x}{:02x}{:02x}", zone, r, g, b)?;
        }
        out.flush()?;
    }
    Ok(())
}

fn compile(
    raster_path: &Path,
    output_path: &Path,
    coastal_fill: bool,
    compress: bool,
) -> Result<()> {
    info!("Memory mapping {:#?}", raster_path);
    let raster_file = File::open(raster_path).context("Couldn't open raster file")?;
    let mapping = unsafe { Mmap::map(&raster_file).context("Couldn't mmap raster file")? };
    let raster = Raster::from_bytes(&mapping).context("Couldn't load raster")?;

    let table = TableBuilder::new(&raster)
        .coastal_fill(coastal_fill)
        .compress(compress);
    let mut sink = Vec::new();
    let stats = table.write_to(&mut sink)?;
    fs::write(output_path, &sink)
        .with_context(|| format!("Couldn't write {}", output_path.display()))?;

    println!(
        "{}: {} bytes, {} tiles ({} static, {} bitmap, {} pixmap leaves; {} shared)",
        output_path.display(),
        stats.size,
        stats.tiles.iter().sum::<usize>(),
        stats.static_leaves,
        stats.bitmap_leaves,
        stats.pixmap_leaves,
        stats.shared_leaves
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn colors_are_stable() {
        assert_eq!(zone_color("FR"), zone_color("FR"));
        assert_ne!(zone_color("FR"), zone_color("DE"));
        let hash = crc32fast::hash(b"JP");
        assert_eq!(zone_color("JP")[0], (hash >> 24) as u8);
    }

    #[test]
    fn render_a_table() -> Result<()> {
        let mut raster = Raster::new(1)?;
        let land = raster.add_zone("LAND")?;
        raster.fill_region(60.0, -10.0, 30.0, 40.0, Some(land))?;
        let table = ZoneTable::from_raster("land", raster);

        let dir = tempfile::tempdir()?;
        let png = dir.path().join("land.png");
        let csv = dir.path().join("land.csv");
        render(&table, 2, &png, Some(&csv))?;

        let image = image::open(&png)?.to_rgb8();
        assert_eq!(image.dimensions(), (180, 90));
        // (45N, 0E) is pixel (180, 45) at full size.
        assert_eq!(image.get_pixel(90, 22).0, zone_color("LAND"));
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0]);

        let legend = fs::read_to_string(&csv)?;
        let [r, g, b] = zone_color("LAND");
        assert_eq!(
            legend,
            format!("zone,color\nLAND,#{:02x}{:02x}{:02x}\n", r, g, b)
        );
        assert!(render(&table, 0, &png, None).is_err());
        Ok(())
    }
}
