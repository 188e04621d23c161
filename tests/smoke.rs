use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use log::*;
use rayon::prelude::*;

use zonelooker::*;

/// A 1 pixel per degree world with a zone tagged at the cell
/// (45.4, -179.6) falls in, and a few blocks of land.
fn example_world() -> Result<Raster> {
    let mut raster = Raster::new(1)?;
    let a = raster.add_zone("ZONE_A")?;
    let b = raster.add_zone("ZONE_B")?;
    let c = raster.add_zone("ZONE_C")?;

    let tagged = ZoneTable::from_raster("scratch", Raster::new(1)?).pixel(45.4, -179.6);
    raster.set(tagged.x, tagged.y, Some(a))?;

    raster.fill_region(70.0, -10.0, 35.0, 40.0, Some(b))?;
    raster.fill_region(35.0, -20.0, 0.0, 50.0, Some(c))?;
    // A lake in the middle of B
    raster.fill_region(55.0, 10.0, 52.0, 14.0, None)?;
    Ok(raster)
}

fn write_tables(raster: &Raster, dir: &Utf8Path) -> Result<()> {
    fs::write(dir.join("world.zlr"), raster.to_bytes()).context("Couldn't write raster")?;
    let mut sink = fs::File::create(dir.join("world.zlt")).context("Couldn't create table")?;
    let stats = TableBuilder::new(raster).write_to(&mut sink)?;
    info!("Built world.zlt: {:?}", stats);
    Ok(())
}

fn temp_dir() -> Result<(tempfile::TempDir, Utf8PathBuf)> {
    let tempdir = tempfile::tempdir()?;
    let path = Utf8PathBuf::from_path_buf(tempdir.path().to_owned())
        .map_err(|p| anyhow::anyhow!("Temp dir {} isn't UTF-8", p.display()))?;
    Ok((tempdir, path))
}

#[test]
fn smoke() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let (tempdir, dir) = temp_dir()?;
    write_tables(&example_world()?, &dir)?;

    for file in ["world.zlr", "world.zlt"] {
        let table = ZoneTable::open(dir.join(file)).context("Couldn't open table")?;
        assert_eq!(table.name(), "world");
        assert_eq!(table.resolution(), 1);
        assert_eq!(table.rows(), 180);
        assert_eq!(table.columns(), 360);

        assert_eq!(table.lookup(45.4, -179.6).unwrap(), "ZONE_A");
        assert!(table.lookup(-10.0, 50.0).is_none());
        assert_eq!(table.lookup(50.0, 0.0).unwrap(), "ZONE_B");
        assert_eq!(table.lookup(20.0, 0.0).unwrap(), "ZONE_C");
        assert!(table.lookup(53.5, 12.5).is_none());

        let names: Vec<&str> = table.zones().map(|z| z.name).collect();
        assert_eq!(names, ["ZONE_A", "ZONE_B", "ZONE_C"]);
    }
    tempdir.close()?;
    Ok(())
}

#[test]
fn formats_agree() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let (tempdir, dir) = temp_dir()?;
    write_tables(&example_world()?, &dir)?;
    let raster = ZoneTable::open(dir.join("world.zlr"))?;
    let tiled = ZoneTable::open(dir.join("world.zlt"))?;
    assert_eq!(raster.kind(), TableKind::Raster);
    assert_eq!(tiled.kind(), TableKind::Tiled);
    assert_eq!(raster.built(), tiled.built());

    for y in 0..raster.rows() {
        for x in 0..raster.columns() {
            assert_eq!(
                raster.lookup_pixel(x, y),
                tiled.lookup_pixel(x, y),
                "Tables disagree at x {}, y {}",
                x,
                y
            );
        }
    }
    tempdir.close()?;
    Ok(())
}

#[test]
fn by_name() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let (tempdir, dir) = temp_dir()?;
    write_tables(&example_world()?, &dir)?;

    let catalog = Catalog::new()
        .with_search_dir(dir.join("nope"))
        .with_search_dir(&dir);
    assert_eq!(
        catalog.resolve("world")?,
        catalog::Source::File(dir.join("world.zlt"))
    );

    let first = catalog.open("world")?;
    let second = catalog.open("world")?;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.kind(), TableKind::Tiled);
    assert_eq!(first.lookup(45.4, -179.6).unwrap(), "ZONE_A");
    assert_eq!(catalog.loaded(), ["world"]);

    match catalog.open("nonexistent-dataset") {
        Err(ZoneError::DatasetNotFound(name)) => assert_eq!(name, "nonexistent-dataset"),
        Err(other) => panic!("Got incorrect error for a missing table: {:?}", other),
        Ok(_) => panic!("Got a table back for a name with no table"),
    };
    match catalog.open("../world") {
        Err(ZoneError::InvalidName(_)) => { /* Cool. */ }
        Err(other) => panic!("Got incorrect error from invalid name: {:?}", other),
        Ok(_) => panic!("Got a table back from an invalid name"),
    };

    // Only rasters? Those work too.
    fs::remove_file(dir.join("world.zlt"))?;
    let rasters = Catalog::new().with_search_dir(&dir);
    assert_eq!(rasters.open("world")?.kind(), TableKind::Raster);

    tempdir.close()?;
    Ok(())
}

#[test]
fn embedded() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let bytes: &'static [u8] = TableBuilder::new(&example_world()?).build()?.leak();
    let (tempdir, dir) = temp_dir()?;
    fs::write(dir.join("world.zlr"), Raster::new(1)?.to_bytes())?;

    // Embedded tables win over files of the same name.
    let catalog = Catalog::new()
        .with_search_dir(&dir)
        .with_embedded("world", bytes)?;
    assert_eq!(catalog.resolve("world")?, catalog::Source::Embedded(bytes));
    let table = catalog.open("world")?;
    assert_eq!(table.name(), "world");
    assert_eq!(table.lookup(45.4, -179.6).unwrap(), "ZONE_A");

    // A name that could never be opened can't be added, either.
    assert!(matches!(
        Catalog::new().with_embedded("world.v2", bytes),
        Err(ZoneError::InvalidName(_))
    ));

    tempdir.close()?;
    Ok(())
}

#[test]
fn corruption() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let world = example_world()?;
    for good in [
        TableBuilder::new(&world).build()?,
        TableBuilder::new(&world).compress(false).build()?,
        world.to_bytes(),
    ] {
        assert!(ZoneTable::from_bytes("good", &good).is_ok());

        for cut in [0, 3, 20, good.len() / 2, good.len() - 1] {
            match ZoneTable::from_bytes("truncated", &good[..cut]) {
                Err(ZoneError::CorruptData(_)) => {}
                other => panic!("Truncated at {} gave {:?}", cut, other.map(|_| ())),
            }
        }

        let mut bad_magic = good.clone();
        bad_magic[0] = b'Q';
        assert!(matches!(
            ZoneTable::from_bytes("bad magic", &bad_magic),
            Err(ZoneError::CorruptData(_))
        ));

        let mut trailing = good.clone();
        trailing.push(0);
        assert!(matches!(
            ZoneTable::from_bytes("trailing", &trailing),
            Err(ZoneError::CorruptData(_))
        ));
    }

    // Flip a bit in the last cell of the raster, which the CRC should catch.
    let mut flipped = world.to_bytes();
    let last = flipped.len() - 1;
    flipped[last] ^= 0x01;
    assert!(matches!(
        ZoneTable::from_bytes("flipped", &flipped),
        Err(ZoneError::CorruptData(_))
    ));
    Ok(())
}

#[test]
fn concurrent_lookups() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    // Finer than the example, to give the tiles something to chew on.
    let mut raster = Raster::new(8)?;
    let a = raster.add_zone("ZONE_A")?;
    let b = raster.add_zone("ZONE_B")?;
    raster.fill_region(70.0, -10.0, 35.0, 40.0, Some(a))?;
    raster.fill_region(35.0, -20.0, 0.0, 50.0, Some(b))?;
    raster.fill_region(12.3, 5.1, 10.9, 7.7, Some(a))?;
    let table = Arc::new(ZoneTable::from_bytes(
        "fine",
        &TableBuilder::new(&raster).build()?,
    )?);

    let points: Vec<(f64, f64)> = (0..20_000)
        .map(|i| {
            let i = i as f64;
            ((i * 0.0137) % 180.0 - 90.0, (i * 0.0419) % 360.0 - 180.0)
        })
        .collect();
    let sequential: Vec<Option<ZoneId>> = points
        .iter()
        .map(|(lat, lon)| table.lookup(*lat, *lon).map(|z| z.id))
        .collect();
    let parallel: Vec<Option<ZoneId>> = points
        .par_iter()
        .map(|(lat, lon)| table.lookup(*lat, *lon).map(|z| z.id))
        .collect();
    assert_eq!(sequential, parallel);
    assert!(sequential.iter().any(Option::is_some));
    assert!(sequential.iter().any(Option::is_none));
    Ok(())
}
