mod backend;
pub mod backends;
pub mod ids;
mod registry;
mod result;

pub use backend::{Detector, RawDetection, RawLabel};
pub use backends::StubDetector;
pub use ids::{IdGenerator, RandomIds, SequentialIds};
pub use registry::{DetectorRegistry, DetectorSlot};
pub use result::{BoundingBox, Detection, DetectionBatch, DetectionType, FinalizedBatch};
