mod backend;
mod backends;
mod result;

pub use backend::{run_detector, shared, DetectorBackend, SharedDetector};
pub use backends::{ScriptedBackend, ScriptedResponse, StubBackend};
pub use result::{BoundingBox, Detection};
