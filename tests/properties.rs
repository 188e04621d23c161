use std::sync::OnceLock;

use proptest::prelude::*;

use zonelooker::*;

/// Generate valid latitude values
fn latitude_strategy() -> impl Strategy<Value = f64> {
    -90.0..=90.0
}

/// Generate valid longitude values
fn longitude_strategy() -> impl Strategy<Value = f64> {
    -180.0..=180.0
}

/// Longitudes strictly inside (-180, 180) that survive wrapping exactly
fn exact_longitude_strategy() -> impl Strategy<Value = f64> {
    (-11519i32..=11519).prop_map(|i| i as f64 / 64.0)
}

/// A 4 pixel per degree world: a few overlapping blocks,
/// a ragged diagonal coast, and a zone hugging the antimeridian.
fn world() -> &'static Raster {
    static WORLD: OnceLock<Raster> = OnceLock::new();
    WORLD.get_or_init(|| {
        let mut raster = Raster::new(4).unwrap();
        let land = raster.add_zone("LAND").unwrap();
        let isle = raster.add_zone("ISLE").unwrap();
        let date = raster.add_zone("DATE").unwrap();
        let steps = raster.add_zone("STEPS").unwrap();

        raster.fill_region(72.0, -30.0, -40.0, 60.0, Some(land)).unwrap();
        raster.fill_region(10.25, 5.5, 8.0, 7.75, Some(isle)).unwrap();
        raster.fill_region(30.0, 20.0, 20.0, 30.0, None).unwrap();
        raster.fill_region(60.0, 177.5, -60.0, 180.0, Some(date)).unwrap();
        raster.fill_region(60.0, -180.0, -60.0, -178.25, Some(date)).unwrap();
        for step in 0..40 {
            let north = -10.0 - step as f64;
            let east = 100.0 + step as f64 * 1.25;
            raster
                .fill_region(north, 90.0, north - 0.75, east, Some(steps))
                .unwrap();
        }
        raster
    })
}

fn raster_table() -> &'static ZoneTable {
    static TABLE: OnceLock<ZoneTable> = OnceLock::new();
    TABLE.get_or_init(|| ZoneTable::from_bytes("world", &world().to_bytes()).unwrap())
}

fn tiled_table() -> &'static ZoneTable {
    static TABLE: OnceLock<ZoneTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        let bytes = TableBuilder::new(world()).build().unwrap();
        ZoneTable::from_bytes("world", &bytes).unwrap()
    })
}

fn tables() -> [&'static ZoneTable; 2] {
    [raster_table(), tiled_table()]
}

proptest! {
    /// The same point always lands in the same zone.
    #[test]
    fn deterministic(lat in latitude_strategy(), lon in longitude_strategy()) {
        for table in tables() {
            prop_assert_eq!(table.lookup(lat, lon), table.lookup(lat, lon));
        }
    }

    /// Every in-range point maps to exactly one cell,
    /// and looks up whatever that cell holds.
    #[test]
    fn total_coverage(lat in latitude_strategy(), lon in longitude_strategy()) {
        for table in tables() {
            let pixel = table.pixel(lat, lon);
            prop_assert!(pixel.x < table.columns());
            prop_assert!(pixel.y < table.rows());
            prop_assert_eq!(table.lookup(lat, lon), table.lookup_pixel(pixel.x, pixel.y));
            prop_assert!(table.try_lookup(lat, lon).is_ok());
        }
    }

    /// Nothing panics, whatever garbage comes in.
    #[test]
    fn any_input(lat in any::<f64>(), lon in any::<f64>()) {
        for table in tables() {
            let pixel = table.pixel(lat, lon);
            prop_assert!(pixel.x < table.columns());
            prop_assert!(pixel.y < table.rows());
            let _ = table.lookup(lat, lon);
        }
    }

    /// Tiling doesn't lose anything.
    #[test]
    fn tiles_match_raster(lat in latitude_strategy(), lon in longitude_strategy()) {
        prop_assert_eq!(raster_table().lookup(lat, lon), tiled_table().lookup(lat, lon));
    }

    /// +180 is the last column and -180 is the first, at any latitude.
    #[test]
    fn antimeridian(lat in latitude_strategy()) {
        for table in tables() {
            let y = table.pixel(lat, 0.0).y;
            prop_assert_eq!(table.pixel(lat, 180.0).x, table.columns() - 1);
            prop_assert_eq!(table.pixel(lat, -180.0).x, 0);
            prop_assert_eq!(table.lookup(lat, 180.0), table.lookup_pixel(table.columns() - 1, y));
            prop_assert_eq!(table.lookup(lat, -180.0), table.lookup_pixel(0, y));
        }
    }

    /// Going all the way around the world gets you back where you started.
    #[test]
    fn longitude_wraps(lat in latitude_strategy(), lon in exact_longitude_strategy()) {
        for table in tables() {
            prop_assert_eq!(table.lookup(lat, lon + 360.0), table.lookup(lat, lon));
            prop_assert_eq!(table.lookup(lat, lon - 720.0), table.lookup(lat, lon));
            prop_assert!(table.try_lookup(lat, lon + 360.0).is_err());
        }
    }

    /// Past the poles is the poles.
    #[test]
    fn latitude_clamps(past in 0.0..1000.0f64, lon in longitude_strategy()) {
        for table in tables() {
            prop_assert_eq!(table.lookup(90.0 + past, lon), table.lookup(90.0, lon));
            prop_assert_eq!(table.lookup(-90.0 - past, lon), table.lookup(-90.0, lon));
        }
    }
}

proptest! {
    // Every case builds a whole world, so don't make too many.
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Dimensions follow from resolution, and resolution survives a trip to disk.
    #[test]
    fn resolution_invariant(degree_pixels in 1u16..=8) {
        let raster = Raster::new(degree_pixels).unwrap();
        let bytes = TableBuilder::new(&raster).build().unwrap();
        let table = ZoneTable::from_bytes("empty", &bytes).unwrap();
        prop_assert_eq!(table.resolution(), degree_pixels as u32);
        prop_assert_eq!(table.rows(), 180 * table.resolution());
        prop_assert_eq!(table.columns(), 360 * table.resolution());
        prop_assert_eq!(table.lookup(0.0, 0.0), None);
    }
}

#[test]
fn antimeridian_zone() {
    for table in tables() {
        assert_eq!(table.lookup(0.0, 180.0).unwrap(), "DATE");
        assert_eq!(table.lookup(0.0, -180.0).unwrap(), "DATE");
        assert_eq!(table.lookup(0.0, 179.9).unwrap(), "DATE");
        assert!(table.lookup(0.0, 170.0).is_none());
    }
}
