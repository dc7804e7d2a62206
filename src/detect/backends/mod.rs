pub mod scripted;
pub mod stub;

pub use scripted::{ScriptedBackend, ScriptedResponse};
pub use stub::StubBackend;
