use log::*;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use structopt::StructOpt;
use vloc_align::{
    AlignerSettings, CameraFrame, CameraIntrinsics, EngineFix, FrameSource, GeoPoseFix,
    LocalizationEngine, LocalizationEvent, LocalizationServer, Localizer, MapOffset,
    ScenePlacement, ServerFix,
};
use vloc_core::nalgebra::{IsometryMatrix3, Point2, Point3, Rotation3, UnitQuaternion, Vector2, Vector3};
use vloc_core::{CapturePose, FramePose, MapId};
use vloc_geodesy::MapToEcef;

#[derive(StructOpt, Clone)]
#[structopt(
    name = "vloc-sandbox",
    about = "A tool for exercising the alignment pipeline against a simulated localization engine"
)]
struct Opt {
    /// The file where settings are specified.
    ///
    /// This is in the format of `vloc_align::AlignerSettings`.
    #[structopt(short, long, default_value = "aligner-settings.json")]
    settings: PathBuf,
    /// Output JSON file for the session report.
    #[structopt(short, long)]
    report: Option<PathBuf>,
    /// Number of simulated update ticks.
    #[structopt(long, default_value = "600")]
    ticks: usize,
    /// Simulated update rate in Hz.
    #[structopt(long, default_value = "30.0")]
    tick_rate: f64,
    /// Standard spread of localization noise in meters.
    #[structopt(long, default_value = "0.02")]
    noise: f64,
    /// Fraction of successful results that are wild outliers.
    #[structopt(long, default_value = "0.05")]
    outlier_rate: f64,
    /// Translation error of an outlier result in meters.
    #[structopt(long, default_value = "50.0")]
    outlier_distance: f64,
    /// Fraction of attempts that fail outright.
    #[structopt(long, default_value = "0.2")]
    failure_rate: f64,
    /// Tick at which the simulated user walks into the second map's area.
    #[structopt(long)]
    switch_tick: Option<usize>,
    /// Random seed.
    #[structopt(long, default_value = "5")]
    seed: u64,
}

/// Ground truth shared between the simulated engine (background threads) and
/// the main loop.
struct SimWorld {
    rng: Xoshiro256PlusPlus,
    /// True map-to-tracker translation per map; rotation is identity so the
    /// report's error metric stays easy to read.
    truths: Vec<(MapId, Vector3<f64>)>,
    active: usize,
    noise: f64,
    outlier_rate: f64,
    outlier_distance: f64,
    failure_rate: f64,
}

impl SimWorld {
    fn sample(&mut self) -> Option<EngineFix> {
        if self.rng.gen_bool(self.failure_rate) {
            return None;
        }
        let (map, truth) = self.truths[self.active];
        let magnitude = if self.rng.gen_bool(self.outlier_rate) {
            self.outlier_distance
        } else if self.noise > 0.0 {
            self.rng.gen_range(0.0..self.noise)
        } else {
            0.0
        };
        let error = random_direction(&mut self.rng) * magnitude;
        // The camera sits at the tracker origin, so the map-frame camera
        // pose is the inverse alignment translation plus the error.
        Some(EngineFix {
            map,
            map_pose: IsometryMatrix3::from_parts(
                (-truth + error).into(),
                Rotation3::identity(),
            ),
        })
    }
}

fn random_direction(rng: &mut Xoshiro256PlusPlus) -> Vector3<f64> {
    loop {
        let v = Vector3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        let n = v.norm();
        if n > 1e-3 && n <= 1.0 {
            return v / n;
        }
    }
}

struct SimEngine(Arc<Mutex<SimWorld>>);

impl LocalizationEngine for SimEngine {
    fn localize(&self, _: &CameraFrame, _: CameraIntrinsics) -> Option<EngineFix> {
        self.0.lock().expect("sim world poisoned").sample()
    }
}

struct OfflineServer;

impl LocalizationServer for OfflineServer {
    fn localize(&self, _: &CameraFrame, _: CameraIntrinsics, _: &[MapId]) -> Option<ServerFix> {
        None
    }
    fn localize_geopose(
        &self,
        _: &CameraFrame,
        _: CameraIntrinsics,
        _: &[MapId],
    ) -> Option<GeoPoseFix> {
        None
    }
    fn map_to_ecef(&self, _: MapId) -> Option<MapToEcef> {
        None
    }
}

struct SimCamera;

impl FrameSource for SimCamera {
    fn acquire_frame(&mut self) -> Option<CameraFrame> {
        Some(CameraFrame {
            width: 16,
            height: 16,
            pixels: Arc::from(vec![0u8; 256]),
        })
    }
    fn intrinsics(&self) -> CameraIntrinsics {
        CameraIntrinsics {
            focal_length: Vector2::new(984.2439, 980.8141),
            principal_point: Point2::new(8.0, 8.0),
        }
    }
    fn tracker_pose(&self) -> CapturePose {
        CapturePose::new(Point3::origin(), UnitQuaternion::identity())
    }
    fn tracking_quality(&self) -> i32 {
        3
    }
}

/// Records the most recent pose placed for each map.
#[derive(Default)]
struct LatestPlacement(Vec<(MapId, Point3<f64>, UnitQuaternion<f64>)>);

impl ScenePlacement for LatestPlacement {
    fn place(&mut self, map: MapId, position: Point3<f64>, rotation: UnitQuaternion<f64>) {
        self.0.retain(|(m, _, _)| *m != map);
        self.0.push((map, position, rotation));
    }
}

#[derive(Serialize)]
struct MapReport {
    id: i32,
    samples: usize,
    /// Distance from the filter estimate to the simulated ground truth.
    estimate_error: Option<f64>,
    /// Distance from the last placed scene pose to the ground truth.
    placement_error: Option<f64>,
}

#[derive(Serialize)]
struct Report {
    attempts: u64,
    successes: u64,
    has_pose: bool,
    map_changes: usize,
    maps: Vec<MapReport>,
}

fn main() {
    pretty_env_logger::init_timed();
    let opt = Opt::from_args();

    let settings = std::fs::File::open(&opt.settings)
        .ok()
        .and_then(|file| serde_json::from_reader(file).ok());
    if settings.is_some() {
        info!("loaded existing settings");
    } else {
        info!("used default settings");
    }
    let settings: AlignerSettings = settings.unwrap_or_default();

    let truths = vec![
        (MapId(1), Vector3::new(-5.0, 0.2, 10.0)),
        (MapId(2), Vector3::new(42.0, -1.0, -7.5)),
    ];
    let world = Arc::new(Mutex::new(SimWorld {
        rng: Xoshiro256PlusPlus::seed_from_u64(opt.seed),
        truths: truths.clone(),
        active: 0,
        noise: opt.noise,
        outlier_rate: opt.outlier_rate,
        outlier_distance: opt.outlier_distance,
        failure_rate: opt.failure_rate,
    }));

    let mut localizer = Localizer::new(
        Arc::new(SimEngine(Arc::clone(&world))),
        Arc::new(OfflineServer),
        LatestPlacement::default(),
        settings,
    );
    for (map, _) in &truths {
        localizer.register_map(*map, MapOffset::default(), None);
    }

    let mut camera = SimCamera;
    let dt = 1.0 / opt.tick_rate;
    let mut now = 0.0;
    let mut map_changes = 0;
    for tick in 0..opt.ticks {
        if Some(tick) == opt.switch_tick {
            info!("simulated walk into the second map's area");
            world.lock().expect("sim world poisoned").active = 1;
        }

        localizer.update(&camera, now, dt);
        if localizer.should_localize(now) {
            localizer.localize(&mut camera, now);
        }
        localizer.pump();
        while let Some(event) = localizer.poll_event() {
            match event {
                LocalizationEvent::MapChanged(map) => {
                    map_changes += 1;
                    info!("map changed to {}", map.0);
                }
                LocalizationEvent::Localized(pose) => {
                    debug!(
                        "localized against map {} at ({:.3}, {:.3}, {:.3})",
                        pose.map.0, pose.position.x, pose.position.y, pose.position.z
                    );
                }
                LocalizationEvent::PoseFound => info!("pose found"),
                LocalizationEvent::PoseLost => warn!("pose lost"),
            }
        }
        now += dt;
    }
    // Let the last attempts resolve so the report counts them.
    while localizer.is_localizing() {
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    localizer.pump();

    let stats = localizer.stats();
    let placement_errors: Vec<(MapId, f64)> = {
        let placed = &localizer.placement().0;
        truths
            .iter()
            .filter_map(|(map, truth)| {
                placed
                    .iter()
                    .find(|(m, _, _)| m == map)
                    .map(|(_, p, _)| (*map, (p.coords - truth).norm()))
            })
            .collect()
    };
    let maps = truths
        .iter()
        .map(|(map, truth)| {
            let space = localizer.registry().get(*map);
            let estimate_error = space
                .and_then(|s| s.filter.pose())
                .map(|pose| (pose.isometry().translation.vector - truth).norm());
            MapReport {
                id: map.0,
                samples: space.map(|s| s.filter.sample_count()).unwrap_or(0),
                estimate_error,
                placement_error: placement_errors
                    .iter()
                    .find(|(m, _)| m == map)
                    .map(|(_, e)| *e),
            }
        })
        .collect();
    let report = Report {
        attempts: stats.attempts,
        successes: stats.successes,
        has_pose: localizer.has_pose(),
        map_changes,
        maps,
    };

    info!(
        "session finished: {}/{} attempts succeeded, pose {}",
        report.successes,
        report.attempts,
        if report.has_pose { "held" } else { "not held" }
    );
    for map in &report.maps {
        match map.estimate_error {
            Some(error) => info!("map {}: estimate error {:.3} m", map.id, error),
            None => info!("map {}: never localized", map.id),
        }
    }

    if let Some(path) = &opt.report {
        let file = std::fs::File::create(path).expect("failed to create report file");
        serde_json::to_writer_pretty(file, &report).expect("failed to write report");
        info!("report written to {}", path.display());
    }
}
