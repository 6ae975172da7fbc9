use crate::worker::Funnel;
use crate::{
    AlignerSettings, LocalizationEvent, LocalizerPose, MapOffset, MapSpace, SpaceRegistry,
    TrackingQuality,
};
use log::{debug, info, warn};
use nalgebra::{IsometryMatrix3, Matrix3, Point2, Point3, UnitQuaternion, Vector2, Vector3};
use std::collections::VecDeque;
use std::sync::Arc;
use vloc_core::{CapturePose, FramePose, MapId, MapPoint, MapToTracker, RawLocalizationResult};
use vloc_geodesy::{geo_rotation_to_map, map_to_wgs84, wgs84_to_map, MapToEcef, Wgs84};

/// One camera image handed to a localization attempt.
///
/// Pixel data is shared rather than copied, since attempts run on background
/// threads while the capture pipeline keeps producing frames.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed 8-bit grayscale pixels, row-major.
    pub pixels: Arc<[u8]>,
}

/// Pinhole intrinsics of the capturing camera, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub focal_length: Vector2<f64>,
    pub principal_point: Point2<f64>,
}

/// The live device platform: camera frames and the tracking (SLAM) state.
/// Always called on the owning thread; the pose and frame are snapshotted
/// before an attempt is offloaded.
pub trait FrameSource {
    /// The latest camera image, if one is available this frame.
    fn acquire_frame(&mut self) -> Option<CameraFrame>;
    fn intrinsics(&self) -> CameraIntrinsics;
    /// The device pose in the tracking frame right now.
    fn tracker_pose(&self) -> CapturePose;
    /// The platform's own tracking quality, 0 (lost) to 3 (full tracking).
    fn tracking_quality(&self) -> i32;
}

/// A successful on-device localization: the matched map and the camera pose
/// in that map's local frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineFix {
    pub map: MapId,
    pub map_pose: IsometryMatrix3<f64>,
}

/// The on-device localization engine. Localizes an image against every
/// loaded map; blocking, called on a background thread.
pub trait LocalizationEngine: Send + Sync {
    fn localize(&self, frame: &CameraFrame, intrinsics: CameraIntrinsics) -> Option<EngineFix>;
}

/// A successful on-server localization, in the service's wire shape: the
/// map-frame camera pose as a rotation matrix and a translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerFix {
    pub map: MapId,
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

/// A successful on-server GeoPose localization: an absolute geodetic camera
/// pose rather than a map-relative one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoseFix {
    pub map: MapId,
    pub geo: Wgs84,
    pub ecef_rotation: UnitQuaternion<f64>,
}

/// The cloud localization service. All methods are blocking and called on a
/// background thread.
pub trait LocalizationServer: Send + Sync {
    fn localize(
        &self,
        frame: &CameraFrame,
        intrinsics: CameraIntrinsics,
        maps: &[MapId],
    ) -> Option<ServerFix>;

    fn localize_geopose(
        &self,
        frame: &CameraFrame,
        intrinsics: CameraIntrinsics,
        maps: &[MapId],
    ) -> Option<GeoPoseFix>;

    /// Fetches a map's ECEF placement, for GeoPose results against maps
    /// whose geo-reference is not cached locally yet.
    fn map_to_ecef(&self, map: MapId) -> Option<MapToEcef>;
}

/// Receives the smoothed scene pose of each map, once per update tick per
/// map that has an alignment. This is the seam to the rendering side.
pub trait ScenePlacement {
    fn place(&mut self, map: MapId, position: Point3<f64>, rotation: UnitQuaternion<f64>);
}

/// What a completed localization attempt resolved to, delivered through the
/// completion funnel back onto the owning thread.
#[derive(Debug, Clone)]
pub enum LocalizationOutcome {
    /// The image could not be localized against any map.
    Failure,
    /// A map-relative fix, already normalized.
    Fix(RawLocalizationResult),
    /// A geodetic fix; converted into the map frame at ingestion, once the
    /// map's geo-reference is known.
    GeoFix {
        map: MapId,
        geo: Wgs84,
        ecef_rotation: UnitQuaternion<f64>,
        capture: CapturePose,
    },
}

/// Cumulative attempt/success counters since construction or the last
/// [`Localizer::restart`]. Failures are the difference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalizerStats {
    pub attempts: u64,
    pub successes: u64,
}

/// The orchestrator: issues localization attempts against the pluggable
/// engine and server, funnels completions back onto its owning thread,
/// routes each result to the right map's pose filter, and eases the smoothed
/// alignments out to the scene.
///
/// All methods must be called from the same logical thread; the background
/// work inside never touches this state directly.
pub struct Localizer<P: ScenePlacement> {
    settings: AlignerSettings,
    registry: SpaceRegistry,
    stats: LocalizerStats,
    quality: TrackingQuality,
    events: VecDeque<LocalizationEvent>,
    funnel: Funnel<LocalizationOutcome>,
    engine: Arc<dyn LocalizationEngine>,
    server: Arc<dyn LocalizationServer>,
    placement: P,
    last_localized_map: Option<MapId>,
    last_attempt_time: f64,
    burst_active: bool,
    burst_start_time: f64,
    was_tracking: bool,
}

impl<P: ScenePlacement> Localizer<P> {
    pub fn new(
        engine: Arc<dyn LocalizationEngine>,
        server: Arc<dyn LocalizationServer>,
        placement: P,
        settings: AlignerSettings,
    ) -> Self {
        Self {
            quality: TrackingQuality::new(settings.pose_decay_seconds),
            burst_active: settings.burst_mode,
            settings,
            registry: SpaceRegistry::new(),
            stats: LocalizerStats::default(),
            events: VecDeque::new(),
            funnel: Funnel::new(),
            engine,
            server,
            placement,
            last_localized_map: None,
            last_attempt_time: f64::NEG_INFINITY,
            burst_start_time: 0.0,
            was_tracking: false,
        }
    }

    pub fn settings(&self) -> &AlignerSettings {
        &self.settings
    }

    pub fn stats(&self) -> LocalizerStats {
        self.stats
    }

    /// Whether the session currently holds a pose per the quality hysteresis.
    pub fn has_pose(&self) -> bool {
        self.quality.has_pose()
    }

    /// Number of attempts currently running on background threads.
    pub fn is_localizing(&self) -> bool {
        self.funnel.in_flight() > 0
    }

    pub fn registry(&self) -> &SpaceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SpaceRegistry {
        &mut self.registry
    }

    pub fn placement(&self) -> &P {
        &self.placement
    }

    /// Registers a newly loaded map with its authored scene offset and, when
    /// already known, its geo-reference.
    pub fn register_map(&mut self, id: MapId, offset: MapOffset, map_to_ecef: Option<MapToEcef>) {
        info!("registering map {}", id.0);
        self.registry.register(id, offset, map_to_ecef, &self.settings);
    }

    /// Removes an unloaded map. Attempts already in flight may still resolve
    /// to this id; their results are then discarded as unknown.
    pub fn unregister_map(&mut self, id: MapId) {
        info!("unregistering map {}", id.0);
        self.registry.unregister(id);
        if self.last_localized_map == Some(id) {
            self.last_localized_map = None;
        }
    }

    /// Next queued notification, in emission order.
    pub fn poll_event(&mut self) -> Option<LocalizationEvent> {
        self.events.pop_front()
    }

    /// Whether the cadence (burst or interval) calls for a new attempt now.
    /// The caller remains free to attempt at any other rhythm it likes.
    pub fn should_localize(&self, now: f64) -> bool {
        if self.registry.is_empty() || !self.was_tracking {
            return false;
        }
        if self.burst_active {
            return true;
        }
        now - self.last_attempt_time >= self.settings.localization_interval_seconds
    }

    /// Issues an on-device localization attempt. The frame, intrinsics and
    /// tracker pose are snapshotted here, on the owning thread; the engine
    /// call runs in the background and its result arrives via [`Self::pump`].
    ///
    /// Returns `false` when no camera frame was available, which does not
    /// count as an attempt.
    pub fn localize(&mut self, source: &mut impl FrameSource, now: f64) -> bool {
        let Some(frame) = source.acquire_frame() else {
            debug!("no camera frame available for localization");
            return false;
        };
        let intrinsics = source.intrinsics();
        let capture = source.tracker_pose();
        self.note_attempt(now);
        let engine = Arc::clone(&self.engine);
        self.funnel.submit(move || {
            match engine.localize(&frame, intrinsics) {
                Some(fix) if fix.map.is_valid() => {
                    LocalizationOutcome::Fix(RawLocalizationResult::new(
                        fix.map,
                        fix.map_pose,
                        capture,
                    ))
                }
                _ => LocalizationOutcome::Failure,
            }
        });
        true
    }

    /// Issues an on-server localization attempt against every registered map.
    pub fn localize_on_server(&mut self, source: &mut impl FrameSource, now: f64) -> bool {
        let Some(frame) = source.acquire_frame() else {
            debug!("no camera frame available for localization");
            return false;
        };
        let intrinsics = source.intrinsics();
        let capture = source.tracker_pose();
        let maps: Vec<MapId> = self.registry.iter().map(|s| s.id).collect();
        self.note_attempt(now);
        let server = Arc::clone(&self.server);
        self.funnel.submit(move || {
            let fix = match server.localize(&frame, intrinsics, &maps) {
                Some(fix) => fix,
                None => return LocalizationOutcome::Failure,
            };
            match RawLocalizationResult::from_rotation_matrix(
                fix.map,
                fix.rotation,
                fix.translation,
                capture,
            ) {
                Some(result) => LocalizationOutcome::Fix(result),
                None => {
                    warn!("server returned a non-finite pose for map {}", fix.map.0);
                    LocalizationOutcome::Failure
                }
            }
        });
        true
    }

    /// Issues an on-server GeoPose localization attempt. The geodetic result
    /// is converted into the matched map's frame at ingestion.
    pub fn localize_geopose(&mut self, source: &mut impl FrameSource, now: f64) -> bool {
        let Some(frame) = source.acquire_frame() else {
            debug!("no camera frame available for localization");
            return false;
        };
        let intrinsics = source.intrinsics();
        let capture = source.tracker_pose();
        let maps: Vec<MapId> = self.registry.iter().map(|s| s.id).collect();
        self.note_attempt(now);
        let server = Arc::clone(&self.server);
        self.funnel.submit(move || {
            match server.localize_geopose(&frame, intrinsics, &maps) {
                Some(fix) => LocalizationOutcome::GeoFix {
                    map: fix.map,
                    geo: fix.geo,
                    ecef_rotation: fix.ecef_rotation,
                    capture,
                },
                None => LocalizationOutcome::Failure,
            }
        });
        true
    }

    /// Drains every completed attempt, in resume order, and applies each to
    /// the registry. Call once per update tick on the owning thread.
    pub fn pump(&mut self) {
        while let Some(outcome) = self.funnel.try_recv() {
            self.on_localization_result(outcome);
        }
    }

    /// Applies one completed attempt. Exposed so platforms with their own
    /// completion delivery can feed results directly; must be called on the
    /// owning thread.
    pub fn on_localization_result(&mut self, outcome: LocalizationOutcome) {
        match outcome {
            LocalizationOutcome::Failure => {
                debug!("localization attempt failed");
            }
            LocalizationOutcome::Fix(result) => self.ingest(result),
            LocalizationOutcome::GeoFix {
                map,
                geo,
                ecef_rotation,
                capture,
            } => self.ingest_geo(map, geo, ecef_rotation, capture),
        }
    }

    /// Per-tick upkeep: tracking-loss edge detection, easing the placed
    /// poses toward the filter estimates, quality scoring and burst
    /// bookkeeping. `now` is seconds on any monotonic clock, `dt` the time
    /// since the previous tick.
    pub fn update(&mut self, source: &impl FrameSource, now: f64, dt: f64) {
        let native = source.tracking_quality();
        let tracking = native > 0;
        if self.was_tracking && !tracking {
            info!("device tracking lost; invalidating filter histories");
            for space in self.registry.iter_mut() {
                space.filter.invalidate_history();
            }
        }
        self.was_tracking = tracking;

        for space in self.registry.iter_mut() {
            Self::sync_placement(space, &self.settings, dt, &mut self.placement);
        }

        // The quality score is undefined until something has been attempted.
        if self.stats.attempts > 0 {
            self.quality
                .update(self.stats.successes, native, now, &mut self.events);
        }

        if self.burst_active {
            if self.registry.is_empty() {
                // Nothing loaded yet; hold the burst window open.
                self.burst_start_time = now;
            } else if self.stats.successes >= u64::from(self.settings.burst_success_target)
                || now - self.burst_start_time >= self.settings.burst_window_seconds
            {
                debug!("burst localization finished");
                self.burst_active = false;
            }
        }
    }

    /// Forgets all session state: counters, quality, every filter and the
    /// placed poses. Maps stay registered. Used on an explicit relocalization
    /// request or when the app resumes from the background.
    pub fn restart(&mut self, now: f64) {
        info!("restarting localization");
        self.stats = LocalizerStats::default();
        self.quality.reset();
        self.events.clear();
        self.last_localized_map = None;
        self.last_attempt_time = f64::NEG_INFINITY;
        self.burst_active = self.settings.burst_mode;
        self.burst_start_time = now;
        for space in self.registry.iter_mut() {
            space.filter.reset();
            space.target = None;
        }
    }

    fn note_attempt(&mut self, now: f64) {
        self.stats.attempts += 1;
        self.last_attempt_time = now;
    }

    fn ingest(&mut self, result: RawLocalizationResult) {
        if !self.registry.contains(result.map) {
            debug!("discarding result for unknown map {}", result.map.0);
            return;
        }
        if !result.alignment().is_finite() {
            warn!("discarding non-finite result for map {}", result.map.0);
            return;
        }

        if self.last_localized_map != Some(result.map) {
            if self.settings.reset_on_map_change {
                if let Some(previous) = self.last_localized_map {
                    if let Some(space) = self.registry.get_mut(previous) {
                        debug!("map changed; resetting filter of map {}", previous.0);
                        space.filter.reset();
                        space.target = None;
                    }
                }
            }
            self.last_localized_map = Some(result.map);
            self.events.push_back(LocalizationEvent::MapChanged(result.map));
        }

        let use_filtering = self.settings.use_filtering;
        let Some(space) = self.registry.get_mut(result.map) else {
            return;
        };

        // Compose the map pose with the authored scene offset. Scale applies
        // to the map-frame position only; the alignment itself stays rigid.
        let scaled = result
            .map_pose
            .translation
            .vector
            .component_mul(&space.offset.scale);
        let offset_pose = space.offset.isometry_no_scale()
            * IsometryMatrix3::from_parts(scaled.into(), result.map_pose.rotation);
        let alignment = MapToTracker::from_capture(result.capture.isometry(), offset_pose);

        if use_filtering {
            space.filter.refine_pose(alignment);
        } else {
            space.filter.overwrite(alignment);
        }
        let Some(estimate) = space.filter.pose() else {
            return;
        };
        self.stats.successes += 1;

        let map_position: Point3<f64> = result.map_pose.translation.vector.into();
        let wgs84 = space
            .map_to_ecef
            .as_ref()
            .and_then(|m| map_to_wgs84(MapPoint(map_position), m).ok());
        self.events
            .push_back(LocalizationEvent::Localized(LocalizerPose {
                map: result.map,
                position: map_position,
                rotation: UnitQuaternion::from_rotation_matrix(&result.map_pose.rotation),
                tracker_to_map: estimate.inverse(),
                wgs84,
                map_to_ecef: space.map_to_ecef,
            }));
        debug!("localized against map {}", result.map.0);
    }

    fn ingest_geo(
        &mut self,
        map: MapId,
        geo: Wgs84,
        ecef_rotation: UnitQuaternion<f64>,
        capture: CapturePose,
    ) {
        if !self.registry.contains(map) {
            debug!("discarding geopose result for unknown map {}", map.0);
            return;
        }
        let map_to_ecef = match self.registry.get(map).and_then(|s| s.map_to_ecef) {
            Some(m) => m,
            None => match self.server.map_to_ecef(map) {
                Some(m) => {
                    debug!("caching fetched geo-reference for map {}", map.0);
                    if let Some(space) = self.registry.get_mut(map) {
                        space.map_to_ecef = Some(m);
                    }
                    m
                }
                None => {
                    warn!(
                        "geopose result for map {} without a known geo-reference",
                        map.0
                    );
                    return;
                }
            },
        };

        let position = wgs84_to_map(geo, &map_to_ecef);
        let rotation = geo_rotation_to_map(ecef_rotation, &map_to_ecef);
        let map_pose =
            IsometryMatrix3::from_parts(position.0.coords.into(), rotation.to_rotation_matrix());
        self.ingest(RawLocalizationResult::new(map, map_pose, capture));
    }

    /// Eases the pose handed to the scene toward the filter estimate, or
    /// snaps when they disagree by more than the warp thresholds. Snapping
    /// covers the first estimate and genuine relocations; easing hides the
    /// small per-sample corrections in between.
    fn sync_placement(
        space: &mut MapSpace,
        settings: &AlignerSettings,
        dt: f64,
        placement: &mut P,
    ) {
        let Some(estimate) = space.filter.pose() else {
            return;
        };
        let position = estimate.position();
        let rotation = UnitQuaternion::from_rotation_matrix(&estimate.rotation());

        let next = match space.target {
            None => (position, rotation),
            Some((held_position, held_rotation)) => {
                let agreement = held_rotation.coords.dot(&rotation.coords).abs();
                // A single held sample means the filter just adopted a pose
                // outright (cold start, post-invalidate relocation, or the
                // filtering-disabled overwrite); the scene follows it
                // directly instead of easing.
                let snap = space.filter.sample_count() == 1
                    || (position - held_position).norm() > settings.warp_threshold_distance
                    || agreement < settings.warp_threshold_cos_angle;
                if snap {
                    (position, rotation)
                } else {
                    // Frame-rate independent easing, expressed for a 60 Hz step.
                    let steps = (dt * 60.0).clamp(1.0, 6.0);
                    let alpha = 1.0 - (1.0 - settings.placement_smoothing).powf(steps);
                    (
                        held_position + (position - held_position) * alpha,
                        held_rotation.slerp(&rotation, alpha),
                    )
                }
            }
        };
        space.target = Some(next);
        placement.place(space.id, next.0, next.1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MapOffset;
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, Vector3};

    struct NullEngine;
    impl LocalizationEngine for NullEngine {
        fn localize(&self, _: &CameraFrame, _: CameraIntrinsics) -> Option<EngineFix> {
            None
        }
    }

    struct NullServer;
    impl LocalizationServer for NullServer {
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

    struct GeoServer(MapToEcef);
    impl LocalizationServer for GeoServer {
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
            Some(self.0)
        }
    }

    #[derive(Default)]
    struct RecordingPlacement {
        placed: Vec<(MapId, Point3<f64>, UnitQuaternion<f64>)>,
    }
    impl ScenePlacement for RecordingPlacement {
        fn place(&mut self, map: MapId, position: Point3<f64>, rotation: UnitQuaternion<f64>) {
            self.placed.push((map, position, rotation));
        }
    }

    struct StaticSource {
        quality: i32,
    }
    impl FrameSource for StaticSource {
        fn acquire_frame(&mut self) -> Option<CameraFrame> {
            Some(CameraFrame {
                width: 4,
                height: 4,
                pixels: Arc::from(vec![0u8; 16]),
            })
        }
        fn intrinsics(&self) -> CameraIntrinsics {
            CameraIntrinsics {
                focal_length: Vector2::new(500.0, 500.0),
                principal_point: Point2::new(2.0, 2.0),
            }
        }
        fn tracker_pose(&self) -> CapturePose {
            CapturePose::new(Point3::origin(), UnitQuaternion::identity())
        }
        fn tracking_quality(&self) -> i32 {
            self.quality
        }
    }

    fn localizer(settings: AlignerSettings) -> Localizer<RecordingPlacement> {
        Localizer::new(
            Arc::new(NullEngine),
            Arc::new(NullServer),
            RecordingPlacement::default(),
            settings,
        )
    }

    fn fix(map: i32, x: f64) -> LocalizationOutcome {
        LocalizationOutcome::Fix(RawLocalizationResult::new(
            MapId(map),
            IsometryMatrix3::from_parts(Vector3::new(x, 0.0, 0.0).into(), Rotation3::identity()),
            CapturePose::new(Point3::origin(), UnitQuaternion::identity()),
        ))
    }

    fn drain_events(l: &mut Localizer<RecordingPlacement>) -> Vec<LocalizationEvent> {
        std::iter::from_fn(|| l.poll_event()).collect()
    }

    #[test]
    fn unknown_map_result_is_silently_discarded() {
        let mut l = localizer(AlignerSettings::default());
        l.register_map(MapId(1), MapOffset::default(), None);
        let stats_before = l.stats();

        l.on_localization_result(fix(9, 1.0));

        assert_eq!(l.stats(), stats_before);
        assert_eq!(l.registry().get(MapId(1)).unwrap().filter.sample_count(), 0);
        assert!(drain_events(&mut l).is_empty());
    }

    #[test]
    fn successful_result_updates_alignment_and_counters() {
        let mut l = localizer(AlignerSettings::default());
        l.register_map(MapId(1), MapOffset::default(), None);

        l.on_localization_result(fix(1, 2.0));

        assert_eq!(l.stats().successes, 1);
        let estimate = l.registry().get(MapId(1)).unwrap().filter.pose().unwrap();
        // Camera at map (2,0,0), tracker at origin: the map frame sits at
        // tracker (-2,0,0).
        assert_relative_eq!(
            estimate.isometry().translation.vector,
            Vector3::new(-2.0, 0.0, 0.0),
            epsilon = 1e-12
        );
        let events = drain_events(&mut l);
        assert!(events.contains(&LocalizationEvent::MapChanged(MapId(1))));
        assert!(matches!(
            events.last(),
            Some(LocalizationEvent::Localized(_))
        ));
    }

    #[test]
    fn map_offset_scale_applies_to_map_positions() {
        let mut l = localizer(AlignerSettings::default());
        let offset = MapOffset {
            position: Point3::new(10.0, 0.0, 0.0),
            rotation: UnitQuaternion::identity(),
            scale: Vector3::new(2.0, 2.0, 2.0),
        };
        l.register_map(MapId(1), offset, None);

        l.on_localization_result(fix(1, 3.0));

        let estimate = l.registry().get(MapId(1)).unwrap().filter.pose().unwrap();
        // Offset camera pose is 10 + 2*3 = 16; tracker is at the origin.
        assert_relative_eq!(
            estimate.isometry().translation.vector,
            Vector3::new(-16.0, 0.0, 0.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn map_switch_resets_previous_filter_when_configured() {
        let settings = AlignerSettings {
            reset_on_map_change: true,
            ..AlignerSettings::default()
        };
        let mut l = localizer(settings);
        l.register_map(MapId(1), MapOffset::default(), None);
        l.register_map(MapId(2), MapOffset::default(), None);

        for _ in 0..3 {
            l.on_localization_result(fix(1, 1.0));
        }
        assert_eq!(l.registry().get(MapId(1)).unwrap().filter.sample_count(), 3);
        drain_events(&mut l);

        l.on_localization_result(fix(2, 5.0));

        let events = drain_events(&mut l);
        assert!(events.contains(&LocalizationEvent::MapChanged(MapId(2))));
        assert_eq!(l.registry().get(MapId(1)).unwrap().filter.sample_count(), 0);
        assert!(l.registry().get(MapId(1)).unwrap().filter.pose().is_none());
        assert_eq!(l.registry().get(MapId(2)).unwrap().filter.sample_count(), 1);
    }

    #[test]
    fn map_switch_preserves_previous_filter_by_default() {
        let mut l = localizer(AlignerSettings::default());
        l.register_map(MapId(1), MapOffset::default(), None);
        l.register_map(MapId(2), MapOffset::default(), None);

        for _ in 0..3 {
            l.on_localization_result(fix(1, 1.0));
        }
        l.on_localization_result(fix(2, 5.0));

        assert_eq!(l.registry().get(MapId(1)).unwrap().filter.sample_count(), 3);
        assert!(l.registry().get(MapId(1)).unwrap().filter.pose().is_some());
    }

    #[test]
    fn filtering_disabled_overwrites_directly() {
        let settings = AlignerSettings {
            use_filtering: false,
            ..AlignerSettings::default()
        };
        let mut l = localizer(settings);
        l.register_map(MapId(1), MapOffset::default(), None);

        l.on_localization_result(fix(1, 1.0));
        l.on_localization_result(fix(1, 100.0));

        let estimate = l.registry().get(MapId(1)).unwrap().filter.pose().unwrap();
        assert_relative_eq!(
            estimate.isometry().translation.vector,
            Vector3::new(-100.0, 0.0, 0.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn geopose_result_fetches_and_caches_geo_reference() {
        let map_to_ecef =
            MapToEcef::from_parts(Rotation3::identity(), Vector3::zeros(), 1.0).unwrap();
        let mut l = Localizer::new(
            Arc::new(NullEngine),
            Arc::new(GeoServer(map_to_ecef)),
            RecordingPlacement::default(),
            AlignerSettings::default(),
        );
        l.register_map(MapId(1), MapOffset::default(), None);

        let geo = Wgs84::new(0.0, 0.0, 0.0).unwrap();
        let expected = wgs84_to_map(geo, &map_to_ecef);
        l.on_localization_result(LocalizationOutcome::GeoFix {
            map: MapId(1),
            geo,
            ecef_rotation: UnitQuaternion::identity(),
            capture: CapturePose::new(expected.0, UnitQuaternion::identity()),
        });

        assert_eq!(l.stats().successes, 1);
        let space = l.registry().get(MapId(1)).unwrap();
        assert!(space.map_to_ecef.is_some(), "geo-reference was not cached");
        // Capture pose placed exactly at the converted map position, so the
        // alignment is the identity.
        let estimate = space.filter.pose().unwrap();
        assert!(estimate.isometry().translation.vector.norm() < 1e-6);
    }

    #[test]
    fn tracking_loss_invalidates_every_filter() {
        let mut l = localizer(AlignerSettings::default());
        l.register_map(MapId(1), MapOffset::default(), None);
        l.on_localization_result(fix(1, 1.0));

        l.update(&StaticSource { quality: 3 }, 0.0, 1.0 / 60.0);
        l.update(&StaticSource { quality: 0 }, 0.1, 1.0 / 60.0);

        assert_eq!(
            l.registry().get(MapId(1)).unwrap().filter.phase(),
            crate::FilterPhase::Invalidated
        );
        // The estimate is retained for display through the loss.
        assert!(l.registry().get(MapId(1)).unwrap().filter.pose().is_some());
    }

    #[test]
    fn placement_receives_one_pose_per_map_per_tick() {
        let mut l = localizer(AlignerSettings::default());
        l.register_map(MapId(1), MapOffset::default(), None);
        l.register_map(MapId(2), MapOffset::default(), None);
        l.on_localization_result(fix(1, 1.0));
        l.on_localization_result(fix(2, 2.0));

        l.update(&StaticSource { quality: 3 }, 0.0, 1.0 / 60.0);

        let placed = &l.placement().placed;
        assert_eq!(placed.len(), 2);
        let maps: Vec<MapId> = placed.iter().map(|(m, _, _)| *m).collect();
        assert!(maps.contains(&MapId(1)) && maps.contains(&MapId(2)));
    }

    #[test]
    fn placement_snaps_first_then_eases() {
        let mut l = localizer(AlignerSettings::default());
        l.register_map(MapId(1), MapOffset::default(), None);
        l.on_localization_result(fix(1, 1.0));
        let source = StaticSource { quality: 3 };

        l.update(&source, 0.0, 1.0 / 60.0);
        let first = l.placement().placed[0].1;
        assert_relative_eq!(first.coords, Vector3::new(-1.0, 0.0, 0.0), epsilon = 1e-12);

        // A small estimate shift eases in rather than jumping.
        for _ in 0..7 {
            l.on_localization_result(fix(1, 2.0));
        }
        let estimate = l.registry().get(MapId(1)).unwrap().filter.pose().unwrap();
        l.update(&source, 0.1, 1.0 / 60.0);
        let second = l.placement().placed[1].1;
        let full_step = (estimate.position() - first).norm();
        let taken = (second - first).norm();
        assert!(taken > 0.0 && taken < full_step, "placement did not ease");
    }

    #[test]
    fn placement_follows_direct_overwrite_without_easing() {
        let settings = AlignerSettings {
            use_filtering: false,
            ..AlignerSettings::default()
        };
        let mut l = localizer(settings);
        l.register_map(MapId(1), MapOffset::default(), None);
        let source = StaticSource { quality: 3 };

        l.on_localization_result(fix(1, 1.0));
        l.update(&source, 0.0, 1.0 / 60.0);
        // A correction below the warp distance still lands immediately.
        l.on_localization_result(fix(1, 3.0));
        l.update(&source, 0.1, 1.0 / 60.0);

        let placed = l.placement().placed.last().unwrap().1;
        assert_relative_eq!(
            placed.coords,
            Vector3::new(-3.0, 0.0, 0.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn placement_snaps_after_invalidate_reset() {
        let mut l = localizer(AlignerSettings::default());
        l.register_map(MapId(1), MapOffset::default(), None);
        for _ in 0..5 {
            l.on_localization_result(fix(1, 1.0));
        }
        l.update(&StaticSource { quality: 3 }, 0.0, 1.0 / 60.0);

        // Tracking drops, then the next sample resets the filter with a
        // relocation smaller than the warp distance.
        l.update(&StaticSource { quality: 0 }, 0.1, 1.0 / 60.0);
        l.on_localization_result(fix(1, 3.0));
        l.update(&StaticSource { quality: 3 }, 0.2, 1.0 / 60.0);

        let placed = l.placement().placed.last().unwrap().1;
        assert_relative_eq!(
            placed.coords,
            Vector3::new(-3.0, 0.0, 0.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn burst_mode_drives_cadence_until_target_met() {
        let mut l = localizer(AlignerSettings::default());
        let mut source = StaticSource { quality: 3 };
        l.update(&source, 0.0, 1.0 / 60.0);
        // No maps: never localize, and the burst window does not burn down.
        assert!(!l.should_localize(0.0));

        l.register_map(MapId(1), MapOffset::default(), None);
        l.update(&source, 1.0, 1.0 / 60.0);
        assert!(l.should_localize(1.0));

        // Reaching the success target ends the burst.
        for _ in 0..l.settings().burst_success_target {
            l.on_localization_result(fix(1, 1.0));
        }
        l.update(&source, 2.0, 1.0 / 60.0);

        // Interval cadence takes over from the last attempt.
        assert!(l.localize(&mut source, 2.0));
        assert!(!l.should_localize(2.5), "burst should have ended");
        assert!(l.should_localize(2.0 + l.settings().localization_interval_seconds));
    }

    #[test]
    fn restart_clears_counters_and_filters() {
        let mut l = localizer(AlignerSettings::default());
        l.register_map(MapId(1), MapOffset::default(), None);
        l.on_localization_result(fix(1, 1.0));
        assert_eq!(l.stats().successes, 1);

        l.restart(5.0);

        assert_eq!(l.stats(), LocalizerStats::default());
        assert!(!l.has_pose());
        assert!(l.registry().contains(MapId(1)));
        assert!(l.registry().get(MapId(1)).unwrap().filter.pose().is_none());
        assert!(drain_events(&mut l).is_empty());
    }

    #[test]
    fn background_attempt_flows_through_pump() {
        let mut l = localizer(AlignerSettings::default());
        l.register_map(MapId(1), MapOffset::default(), None);
        let mut source = StaticSource { quality: 3 };

        // The null engine fails every attempt; the failure must still flow
        // back and count against the attempt.
        assert!(l.localize(&mut source, 0.0));
        assert_eq!(l.stats().attempts, 1);
        while l.is_localizing() {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        l.pump();
        assert_eq!(l.stats().successes, 0);
        assert!(drain_events(&mut l).is_empty());
    }
}
