use aod_max::config::{Config, DisplayRange, TierGrids};
use aod_max::filename_date::DateScheme;
use aod_max::render::ImageRenderer;
use aod_max::sink::{ExportSink, FrameSource};
use aod_max::types::{AodError, GeoReference, GridShape, RasterFrame, Tier};
use aod_max::Orchestrator;
use approx::assert_relative_eq;
use ndarray::{array, Array2};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const NAN: f32 = f32::NAN;
const FILL: f32 = -32768.0;

/// Frames and exports kept in memory; exported rasters are also touched on
/// disk so the next tier finds them by listing.
struct MemoryStore {
    frames: Mutex<HashMap<PathBuf, Array2<f32>>>,
    counts: Mutex<HashMap<PathBuf, Array2<u32>>>,
    titles: Mutex<HashMap<PathBuf, String>>,
    /// Image paths whose export fails.
    failing_images: Mutex<HashSet<PathBuf>>,
    reference: GeoReference,
}

impl MemoryStore {
    fn new(rows: usize, cols: usize) -> Self {
        Self {
            frames: Mutex::new(HashMap::new()),
            counts: Mutex::new(HashMap::new()),
            titles: Mutex::new(HashMap::new()),
            failing_images: Mutex::new(HashSet::new()),
            reference: GeoReference {
                transform: [500000.0, 2000.0, 0.0, 2900000.0, 0.0, -2000.0],
                projection: "EPSG:32614".to_string(),
                size: (rows, cols),
            },
        }
    }

    fn add_input(&self, path: PathBuf, frame: Array2<f32>) {
        touch(&path);
        self.frames.lock().unwrap().insert(path, frame);
    }

    fn fail_image_at(&self, path: PathBuf) {
        self.failing_images.lock().unwrap().insert(path);
    }

    fn grid(&self, path: &Path) -> Array2<f32> {
        self.frames
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_else(|| panic!("nothing written at {}", path.display()))
    }

    fn count(&self, path: &Path) -> Array2<u32> {
        self.counts.lock().unwrap()[path].clone()
    }
}

fn touch(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"").unwrap();
}

impl FrameSource for MemoryStore {
    fn read_frame(&self, path: &Path) -> Result<RasterFrame, AodError> {
        self.frames.lock().unwrap().get(path).cloned().ok_or_else(|| {
            AodError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{} is not a raster", path.display()),
            ))
        })
    }

    fn read_reference(&self, _path: &Path) -> Result<GeoReference, AodError> {
        Ok(self.reference.clone())
    }
}

impl ExportSink for MemoryStore {
    fn write_raster(
        &self,
        grid: &Array2<f32>,
        _reference: &GeoReference,
        path: &Path,
    ) -> Result<(), AodError> {
        touch(path);
        self.frames
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), grid.clone());
        Ok(())
    }

    fn write_count_raster(
        &self,
        count: &Array2<u32>,
        _reference: &GeoReference,
        path: &Path,
    ) -> Result<(), AodError> {
        self.counts
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), count.clone());
        Ok(())
    }

    fn write_image(
        &self,
        grid: &Array2<f32>,
        range: DisplayRange,
        title: &str,
        path: &Path,
    ) -> Result<(), AodError> {
        if self.failing_images.lock().unwrap().contains(path) {
            return Err(AodError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("cannot write {}", path.display()),
            )));
        }
        ImageRenderer::with_font(1, None).write_png(grid, range, title, path)?;
        self.titles
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), title.to_string());
        Ok(())
    }
}

fn test_config(root: &Path) -> Config {
    let shape = GridShape::new(2, 2);
    Config {
        input_root: root.join("in"),
        output_root: root.join("out"),
        temp_root: root.join("tmp"),
        years: vec![2020],
        day_input_scheme: DateScheme::NetcdfStart,
        grids: TierGrids {
            day: shape,
            month: shape,
            year: shape,
        },
        progress: false,
        write_counts: true,
        ..Config::default()
    }
}

/// Raw scene name for day-of-year `day` at `hhmm`.
fn scene(config: &Config, year: i32, day: u32, hhmm: &str) -> PathBuf {
    config.input_root.join(year.to_string()).join(format!(
        "OR_ABI-L2-AODC-M6_G16_s{}{:03}{}000_e0_c0.tif",
        year, day, hhmm
    ))
}

fn assert_grid(actual: &Array2<f32>, expected: &Array2<f32>) {
    assert_eq!(actual.dim(), expected.dim());
    for (a, e) in actual.iter().zip(expected.iter()) {
        if e.is_nan() {
            assert!(a.is_nan(), "expected missing, got {}", a);
        } else {
            assert_relative_eq!(*a, *e);
        }
    }
}

#[test]
fn day_month_year_chain() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = MemoryStore::new(2, 2);

    store.add_input(scene(&config, 2020, 100, "1200"), array![[1.0, NAN], [2.0, 3.0]]);
    store.add_input(scene(&config, 2020, 100, "1810"), array![[NAN, 5.0], [4.0, 1.0]]);
    store.add_input(scene(&config, 2020, 100, "2350"), array![[0.0, 0.0], [FILL, FILL]]);
    store.add_input(scene(&config, 2020, 102, "2359"), array![[0.5, 0.5], [0.5, 9.0]]);
    store.add_input(scene(&config, 2020, 130, "1500"), array![[7.0, FILL], [NAN, NAN]]);

    let summary = Orchestrator::new(&config, &store, &store).run();
    assert!(!summary.has_failures(), "{:?}", summary.failed_combinations());

    let day = summary.outcome(Tier::Day, 2020).unwrap();
    assert_eq!(day.written, vec!["100", "102", "130"]);

    let day_100 = config.raster_path(Tier::Day, 2020, "100");
    assert_grid(&store.grid(&day_100), &array![[1.0, 5.0], [4.0, 3.0]]);
    assert_eq!(
        store.count(&config.count_path(Tier::Day, 2020, "100")),
        array![[2u32, 2], [2, 2]]
    );

    let month = summary.outcome(Tier::Month, 2020).unwrap();
    assert_eq!(month.written, vec!["04", "05"]);
    assert_grid(
        &store.grid(&config.raster_path(Tier::Month, 2020, "04")),
        &array![[1.0, 5.0], [4.0, 9.0]],
    );
    assert_grid(
        &store.grid(&config.raster_path(Tier::Month, 2020, "05")),
        &array![[7.0, NAN], [NAN, NAN]],
    );

    let year_path = config.raster_path(Tier::Year, 2020, "2020");
    assert_grid(&store.grid(&year_path), &array![[7.0, 5.0], [4.0, 9.0]]);
    assert_eq!(
        store.count(&config.count_path(Tier::Year, 2020, "2020")),
        array![[2u32, 1], [1, 1]]
    );

    let year_png = config.image_path(Tier::Year, 2020, "2020");
    assert!(year_png.exists());
    assert_eq!(store.titles.lock().unwrap()[&year_png], "Maximum AOD 2020");
    assert_eq!(summary.buckets_written(), 6);
}

#[test]
fn malformed_name_is_reported_and_excluded() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        tiers: vec![Tier::Day],
        ..test_config(dir.path())
    };
    let store = MemoryStore::new(2, 2);
    for hhmm in ["1200", "1300", "1400", "1500"] {
        store.add_input(scene(&config, 2020, 45, hhmm), Array2::from_elem((2, 2), 0.3));
    }
    let broken = config.input_root.join("2020").join("OR_ABI-L2-AODC-M6_G16_broken.tif");
    store.add_input(broken.clone(), Array2::from_elem((2, 2), 99.0));

    let summary = Orchestrator::new(&config, &store, &store).run();
    let day = summary.outcome(Tier::Day, 2020).unwrap();

    assert_eq!(day.written, vec!["045"]);
    assert_eq!(day.file_failures.len(), 1);
    assert_eq!(day.file_failures[0].path, broken);
    assert_eq!(
        store.count(&config.count_path(Tier::Day, 2020, "045")),
        Array2::from_elem((2, 2), 4u32)
    );
    assert_grid(
        &store.grid(&config.raster_path(Tier::Day, 2020, "045")),
        &Array2::from_elem((2, 2), 0.3),
    );
    assert!(summary.has_failures());
}

#[test]
fn year_tier_without_month_exports_reports_no_data() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        tiers: vec![Tier::Year],
        ..test_config(dir.path())
    };
    let store = MemoryStore::new(2, 2);

    let summary = Orchestrator::new(&config, &store, &store).run();
    let year = summary.outcome(Tier::Year, 2020).unwrap();

    match &year.error {
        Some(AodError::MissingPrerequisite {
            tier,
            prerequisite,
            year,
            ..
        }) => {
            assert_eq!((*tier, *prerequisite, *year), (Tier::Year, Tier::Month, 2020));
        }
        other => panic!("expected missing prerequisite, got {:?}", other),
    }
    assert!(year.written.is_empty());
    assert!(!config.raster_path(Tier::Year, 2020, "2020").exists());
    assert!(summary.has_failures());
}

#[test]
fn failed_bucket_does_not_stop_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        tiers: vec![Tier::Day, Tier::Month],
        ..test_config(dir.path())
    };
    let store = MemoryStore::new(2, 2);
    store.add_input(scene(&config, 2020, 10, "1200"), Array2::from_elem((2, 2), 1.0));
    store.add_input(scene(&config, 2020, 10, "1300"), Array2::from_elem((3, 2), 2.0));
    store.add_input(scene(&config, 2020, 11, "1200"), Array2::from_elem((2, 2), 1.5));
    // listed but unreadable
    touch(&scene(&config, 2020, 12, "1200"));

    let summary = Orchestrator::new(&config, &store, &store).run();
    let day = summary.outcome(Tier::Day, 2020).unwrap();

    assert_eq!(day.written, vec!["011"]);
    let mut failed: Vec<&str> = day.bucket_failures.iter().map(|f| f.key.as_str()).collect();
    failed.sort();
    assert_eq!(failed, vec!["010", "012"]);
    assert!(!config.raster_path(Tier::Day, 2020, "010").exists());

    // the month only sees what the day tier produced
    let month = summary.outcome(Tier::Month, 2020).unwrap();
    assert_eq!(month.written, vec!["01"]);
    assert_eq!(
        store.count(&config.count_path(Tier::Month, 2020, "01")),
        Array2::from_elem((2, 2), 1u32)
    );
}

#[test]
fn failed_image_export_withdraws_the_day_raster() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        tiers: vec![Tier::Day, Tier::Month],
        ..test_config(dir.path())
    };
    let store = MemoryStore::new(2, 2);
    store.add_input(scene(&config, 2020, 100, "1200"), Array2::from_elem((2, 2), 8.0));
    store.add_input(scene(&config, 2020, 102, "1200"), array![[0.5, NAN], [1.5, 2.5]]);
    store.fail_image_at(config.image_path(Tier::Day, 2020, "100"));

    let summary = Orchestrator::new(&config, &store, &store).run();
    let day = summary.outcome(Tier::Day, 2020).unwrap();

    assert_eq!(day.written, vec!["102"]);
    let failed: Vec<&str> = day.bucket_failures.iter().map(|f| f.key.as_str()).collect();
    assert_eq!(failed, vec!["100"]);
    assert!(!config.raster_path(Tier::Day, 2020, "100").exists());
    assert!(!config.count_path(Tier::Day, 2020, "100").exists());
    assert!(config.raster_path(Tier::Day, 2020, "102").exists());

    let month = summary.outcome(Tier::Month, 2020).unwrap();
    assert_eq!(month.written, vec!["04"]);
    assert_grid(
        &store.grid(&config.raster_path(Tier::Month, 2020, "04")),
        &array![[0.5, NAN], [1.5, 2.5]],
    );
    assert_eq!(
        store.count(&config.count_path(Tier::Month, 2020, "04")),
        array![[1u32, 0], [1, 1]]
    );
    assert!(summary.has_failures());
}

#[test]
fn files_from_another_year_are_excluded() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        tiers: vec![Tier::Day],
        ..test_config(dir.path())
    };
    let store = MemoryStore::new(2, 2);
    store.add_input(scene(&config, 2020, 200, "1200"), Array2::from_elem((2, 2), 1.0));
    let stray = config
        .input_root
        .join("2020")
        .join("OR_ABI-L2-AODC-M6_G16_s20192001200000_e0_c0.tif");
    store.add_input(stray.clone(), Array2::from_elem((2, 2), 3.0));

    let summary = Orchestrator::new(&config, &store, &store).run();
    let day = summary.outcome(Tier::Day, 2020).unwrap();

    assert_eq!(day.written, vec!["200"]);
    assert_eq!(day.file_failures.len(), 1);
    assert!(day.file_failures[0].reason.contains("2019"));
    assert_grid(
        &store.grid(&config.raster_path(Tier::Day, 2020, "200")),
        &Array2::from_elem((2, 2), 1.0),
    );
}

#[test]
fn day_tier_with_no_inputs_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        tiers: vec![Tier::Day],
        years: vec![2021],
        ..test_config(dir.path())
    };
    let store = MemoryStore::new(2, 2);

    let summary = Orchestrator::new(&config, &store, &store).run();
    let day = summary.outcome(Tier::Day, 2021).unwrap();
    assert!(matches!(day.error, Some(AodError::NoInput { year: 2021, .. })));
}
