// Subject tracking
//
// - template: frame-to-frame tracker primitive
// - state: detection/tracking state machine for one crop session

pub mod state;
pub mod template;

use image::RgbImage;

use crate::config::TrackingConfig;
use crate::error::Result;
use crate::geometry::BoundingBox;

pub use state::{BoxSource, Observation, TrackerState, TrackingSession};
pub use template::TemplateTracker;

/// Follows one subject from frame to frame. Boxes are in full-frame space.
pub trait SubjectTracker: Send {
    /// Start tracking `bbox`. `Ok(false)` means the box cannot be tracked.
    fn init(&mut self, frame: &RgbImage, bbox: BoundingBox) -> Result<bool>;

    /// Locate the subject in the next frame, `None` when it was lost.
    fn update(&mut self, frame: &RgbImage) -> Result<Option<BoundingBox>>;
}

/// Creates fresh trackers; a tracker is never reused after it loses its subject.
pub trait TrackerFactory: Send + Sync {
    fn create(&self) -> Box<dyn SubjectTracker>;
}

/// Factory for [`TemplateTracker`]s
pub struct TemplateTrackerFactory {
    config: TrackingConfig,
}

impl TemplateTrackerFactory {
    pub fn new(config: TrackingConfig) -> Self {
        Self { config }
    }
}

impl TrackerFactory for TemplateTrackerFactory {
    fn create(&self) -> Box<dyn SubjectTracker> {
        Box::new(TemplateTracker::new(&self.config))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Update results shared by every tracker the factory creates.
    #[derive(Clone, Default)]
    pub struct ScriptedTrackerFactory {
        pub updates: Arc<Mutex<VecDeque<Result<Option<BoundingBox>>>>>,
        pub inits: Arc<Mutex<Vec<BoundingBox>>>,
    }

    impl ScriptedTrackerFactory {
        pub fn new(updates: Vec<Result<Option<BoundingBox>>>) -> Self {
            Self {
                updates: Arc::new(Mutex::new(updates.into())),
                inits: Arc::default(),
            }
        }

        pub fn created(&self) -> usize {
            self.inits.lock().unwrap().len()
        }
    }

    struct ScriptedTracker {
        factory: ScriptedTrackerFactory,
        current: Option<BoundingBox>,
    }

    impl SubjectTracker for ScriptedTracker {
        fn init(&mut self, _frame: &RgbImage, bbox: BoundingBox) -> Result<bool> {
            self.factory.inits.lock().unwrap().push(bbox);
            self.current = Some(bbox);
            Ok(true)
        }

        /// Pops the next scripted result; holds the current box once the script runs out.
        fn update(&mut self, _frame: &RgbImage) -> Result<Option<BoundingBox>> {
            match self.factory.updates.lock().unwrap().pop_front() {
                Some(result) => result,
                None => Ok(self.current),
            }
        }
    }

    impl TrackerFactory for ScriptedTrackerFactory {
        fn create(&self) -> Box<dyn SubjectTracker> {
            Box::new(ScriptedTracker {
                factory: self.clone(),
                current: None,
            })
        }
    }
}
