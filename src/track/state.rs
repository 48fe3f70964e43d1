//! Detection/tracking state machine for one crop session.
//!
//! ```text
//! Uninitialized --detect ok--> Tracking --update fails--> Lost
//!       ^  |                      ^                         |
//!       +--+ detect fails         +------ redetect ok ------+
//! ```
//!
//! A failing tracker or detector is never fatal: the session falls back to the
//! last known box, or to the static window before any subject was found.

use image::imageops;
use image::RgbImage;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{SubjectTracker, TrackerFactory};
use crate::config::TrackingConfig;
use crate::detect::SubjectDetector;
use crate::geometry::BoundingBox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Uninitialized,
    Tracking,
    Lost,
}

impl fmt::Display for TrackerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackerState::Uninitialized => "uninitialized",
            TrackerState::Tracking => "tracking",
            TrackerState::Lost => "lost",
        };
        f.write_str(name)
    }
}

/// Where the box of an [`Observation`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoxSource {
    /// Tracker update on this frame
    Tracker,
    /// Fresh detection on this frame
    Detection,
    /// Last box seen before the subject was lost
    LastKnown,
    /// Static crop window, no subject known
    StaticWindow,
}

/// Outcome of one frame, with the box in full-frame space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub state: TrackerState,
    pub bbox: BoundingBox,
    pub source: BoxSource,
}

pub struct TrackingSession {
    detector: SubjectDetector,
    factory: Arc<dyn TrackerFactory>,
    tracker: Option<Box<dyn SubjectTracker>>,
    state: TrackerState,
    last_bbox: Option<BoundingBox>,
    static_window: BoundingBox,
    search_region: BoundingBox,
    max_lost_frames: Option<u32>,
    init_retry_interval: u32,
    frames_since_attempt: u32,
    consecutive_lost: u32,
    redetect_exhausted: bool,
}

impl TrackingSession {
    /// `static_window` is used whenever no subject position is known.
    pub fn new(
        detector: SubjectDetector,
        factory: Arc<dyn TrackerFactory>,
        static_window: BoundingBox,
        config: &TrackingConfig,
    ) -> Self {
        Self {
            detector,
            factory,
            tracker: None,
            state: TrackerState::Uninitialized,
            last_bbox: None,
            static_window,
            search_region: static_window,
            max_lost_frames: config.max_lost_frames,
            init_retry_interval: config.init_retry_interval.max(1),
            frames_since_attempt: 0,
            consecutive_lost: 0,
            redetect_exhausted: false,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn last_bbox(&self) -> Option<BoundingBox> {
        self.last_bbox
    }

    /// Detect the subject inside `search_region` of the first frame.
    ///
    /// The region is remembered for detection retries while still uninitialized.
    pub fn initialize(&mut self, frame: &RgbImage, search_region: BoundingBox) -> Observation {
        let (frame_width, frame_height) = frame.dimensions();
        self.search_region = search_region.clamp_to(frame_width, frame_height);
        self.frames_since_attempt = 0;
        self.detect_in_region(frame)
    }

    /// Process the next frame.
    pub fn advance(&mut self, frame: &RgbImage) -> Observation {
        match self.state {
            TrackerState::Uninitialized => {
                self.frames_since_attempt += 1;
                if self.frames_since_attempt >= self.init_retry_interval {
                    self.frames_since_attempt = 0;
                    self.detect_in_region(frame)
                } else {
                    self.static_observation()
                }
            }
            TrackerState::Tracking => self.update_tracker(frame),
            TrackerState::Lost => self.redetect(frame),
        }
    }

    fn detect_in_region(&mut self, frame: &RgbImage) -> Observation {
        let region = self.search_region;
        if region.is_empty() {
            return self.static_observation();
        }

        let roi = imageops::crop_imm(frame, region.x, region.y, region.width, region.height).to_image();
        let found = self
            .detector
            .detect(&roi)
            .map(|b| b.offset_by(region.x, region.y).clamp_to(frame.width(), frame.height()));

        match found {
            Some(bbox) if self.start_tracking(frame, bbox) => {
                info!("Subject found at {}, tracking", bbox);
                self.observe(BoxSource::Detection)
            }
            _ => {
                debug!("No subject in search region {}", region);
                self.static_observation()
            }
        }
    }

    fn update_tracker(&mut self, frame: &RgbImage) -> Observation {
        let result = match self.tracker.as_mut() {
            Some(tracker) => tracker.update(frame),
            None => Ok(None),
        };

        match result {
            Ok(Some(bbox)) => {
                self.last_bbox = Some(bbox.clamp_to(frame.width(), frame.height()));
                self.observe(BoxSource::Tracker)
            }
            Ok(None) => {
                debug!("Tracker lost the subject");
                self.mark_lost();
                self.redetect(frame)
            }
            Err(e) => {
                warn!("Tracker update failed: {}", e);
                self.mark_lost();
                self.redetect(frame)
            }
        }
    }

    /// Full-frame detection while lost.
    fn redetect(&mut self, frame: &RgbImage) -> Observation {
        if self.redetect_exhausted {
            return self.static_observation();
        }

        if let Some(bbox) = self.detector.detect(frame) {
            if self.start_tracking(frame, bbox) {
                info!("Subject re-acquired at {}", bbox);
                return self.observe(BoxSource::Detection);
            }
        }

        self.consecutive_lost += 1;
        if let Some(max) = self.max_lost_frames {
            if self.consecutive_lost > max {
                info!(
                    "Subject lost for {} frames, holding static window {}",
                    self.consecutive_lost, self.static_window
                );
                self.redetect_exhausted = true;
                return self.static_observation();
            }
        }

        match self.last_bbox {
            Some(bbox) => Observation {
                state: self.state,
                bbox,
                source: BoxSource::LastKnown,
            },
            None => self.static_observation(),
        }
    }

    /// Start a fresh tracker at `bbox`; the previous tracker is discarded.
    fn start_tracking(&mut self, frame: &RgbImage, bbox: BoundingBox) -> bool {
        let mut tracker = self.factory.create();
        match tracker.init(frame, bbox) {
            Ok(true) => {
                self.tracker = Some(tracker);
                self.last_bbox = Some(bbox);
                self.state = TrackerState::Tracking;
                self.consecutive_lost = 0;
                true
            }
            Ok(false) => {
                debug!("Tracker refused box {}", bbox);
                false
            }
            Err(e) => {
                warn!("Tracker init failed: {}", e);
                false
            }
        }
    }

    fn mark_lost(&mut self) {
        self.state = TrackerState::Lost;
        self.tracker = None;
    }

    fn observe(&self, source: BoxSource) -> Observation {
        Observation {
            state: self.state,
            bbox: self.last_bbox.unwrap_or(self.static_window),
            source,
        }
    }

    fn static_observation(&self) -> Observation {
        Observation {
            state: self.state,
            bbox: self.static_window,
            source: BoxSource::StaticWindow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::testing::{person, ScriptedDetector};
    use crate::detect::{ObjectDetector, PERSON_CLASS};
    use crate::error::ReframeError;
    use crate::track::testing::ScriptedTrackerFactory;

    const STATIC: BoundingBox = BoundingBox {
        x: 528,
        y: 108,
        width: 864,
        height: 864,
    };

    fn frame() -> RgbImage {
        RgbImage::new(1920, 1080)
    }

    fn session_with(
        detector: ScriptedDetector,
        factory: ScriptedTrackerFactory,
        config: TrackingConfig,
    ) -> TrackingSession {
        let detector: Arc<dyn ObjectDetector> = Arc::new(detector);
        TrackingSession::new(
            SubjectDetector::new(detector, PERSON_CLASS, 4096),
            Arc::new(factory),
            STATIC,
            &config,
        )
    }

    fn found(bbox: BoundingBox) -> crate::error::Result<Vec<crate::detect::Detection>> {
        Ok(vec![person(bbox, 0.9)])
    }

    fn nothing() -> crate::error::Result<Vec<crate::detect::Detection>> {
        Ok(Vec::new())
    }

    #[test]
    fn test_stays_uninitialized_until_detection() {
        let detector = ScriptedDetector::new(
            vec![nothing(), nothing(), nothing(), found(BoundingBox::new(10, 20, 100, 200))],
            Vec::new(),
        );
        let factory = ScriptedTrackerFactory::default();
        let mut session = session_with(detector, factory.clone(), TrackingConfig::default());

        let obs = session.initialize(&frame(), STATIC);
        assert_eq!(obs.state, TrackerState::Uninitialized);
        assert_eq!(obs.bbox, STATIC);
        assert_eq!(obs.source, BoxSource::StaticWindow);

        for _ in 0..2 {
            let obs = session.advance(&frame());
            assert_eq!(obs.state, TrackerState::Uninitialized);
            assert_eq!(obs.bbox, STATIC);
        }
        assert_eq!(factory.created(), 0);

        // Region-local detection lands in full-frame space
        let obs = session.advance(&frame());
        let expected = BoundingBox::new(538, 128, 100, 200);
        assert_eq!(obs.state, TrackerState::Tracking);
        assert_eq!(obs.source, BoxSource::Detection);
        assert_eq!(obs.bbox, expected);
        assert_eq!(factory.inits.lock().unwrap().as_slice(), &[expected]);
    }

    #[test]
    fn test_retry_interval_spaces_out_detection() {
        let detector = Arc::new(ScriptedDetector::never());
        let config = TrackingConfig {
            init_retry_interval: 3,
            ..TrackingConfig::default()
        };
        let mut session = TrackingSession::new(
            SubjectDetector::new(detector.clone(), PERSON_CLASS, 4096),
            Arc::new(ScriptedTrackerFactory::default()),
            STATIC,
            &config,
        );

        session.initialize(&frame(), STATIC);
        for _ in 0..6 {
            assert_eq!(session.advance(&frame()).source, BoxSource::StaticWindow);
        }
        // Frame 0, then every third frame
        assert_eq!(detector.seen_sizes.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_update_failure_goes_lost_then_recovers() {
        let first = BoundingBox::new(900, 400, 100, 200);
        let moved = BoundingBox::new(910, 400, 100, 200);
        let second = BoundingBox::new(100, 300, 120, 240);

        let detector = ScriptedDetector::new(vec![found(first), nothing(), found(second)], Vec::new());
        let factory = ScriptedTrackerFactory::new(vec![Ok(Some(moved)), Ok(None)]);
        let mut session = session_with(detector, factory.clone(), TrackingConfig::default());

        let start = session.initialize(&frame(), BoundingBox::new(0, 0, 1920, 1080));
        assert_eq!(start.state, TrackerState::Tracking);
        assert_eq!(start.bbox, first);

        let obs = session.advance(&frame());
        assert_eq!(obs.state, TrackerState::Tracking);
        assert_eq!(obs.source, BoxSource::Tracker);
        assert_eq!(obs.bbox, moved);

        // Update fails and the same-frame redetection finds nothing
        let obs = session.advance(&frame());
        assert_eq!(obs.state, TrackerState::Lost);
        assert_eq!(obs.source, BoxSource::LastKnown);
        assert_eq!(obs.bbox, moved);

        let obs = session.advance(&frame());
        assert_eq!(obs.state, TrackerState::Tracking);
        assert_eq!(obs.source, BoxSource::Detection);
        assert_eq!(session.last_bbox(), Some(second));
        // One tracker per (re)initialization
        assert_eq!(factory.created(), 2);
    }

    #[test]
    fn test_tracker_errors_are_not_fatal() {
        let bbox = BoundingBox::new(0, 0, 50, 50);
        let detector = ScriptedDetector::new(vec![found(bbox)], Vec::new());
        let factory = ScriptedTrackerFactory::new(vec![Err(ReframeError::Tracker("boom".to_string()))]);
        let mut session = session_with(detector, factory, TrackingConfig::default());

        session.initialize(&frame(), BoundingBox::new(0, 0, 1920, 1080));
        let obs = session.advance(&frame());
        assert_eq!(obs.state, TrackerState::Lost);
        assert_eq!(obs.bbox, bbox);
    }

    #[test]
    fn test_max_lost_frames_holds_static_window() {
        let bbox = BoundingBox::new(0, 0, 50, 50);
        let detector = Arc::new(ScriptedDetector::new(vec![found(bbox)], Vec::new()));
        let config = TrackingConfig {
            max_lost_frames: Some(2),
            ..TrackingConfig::default()
        };
        let mut session = TrackingSession::new(
            SubjectDetector::new(detector.clone(), PERSON_CLASS, 4096),
            Arc::new(ScriptedTrackerFactory::new(vec![Ok(None)])),
            STATIC,
            &config,
        );

        session.initialize(&frame(), BoundingBox::new(0, 0, 1920, 1080));
        assert_eq!(session.advance(&frame()).source, BoxSource::LastKnown);
        assert_eq!(session.advance(&frame()).source, BoxSource::LastKnown);

        let obs = session.advance(&frame());
        assert_eq!(obs.state, TrackerState::Lost);
        assert_eq!(obs.source, BoxSource::StaticWindow);
        assert_eq!(obs.bbox, STATIC);

        let calls = detector.seen_sizes.lock().unwrap().len();
        session.advance(&frame());
        session.advance(&frame());
        assert_eq!(detector.seen_sizes.lock().unwrap().len(), calls);
    }
}
