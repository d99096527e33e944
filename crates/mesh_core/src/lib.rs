//! Mesh Core: the process-local side of the mesh.
//!
//! Holds the structured [`Value`] model, the provenance-tagged [`Sample`]
//! delivered to subscribers, the in-process [`Messenger`] pub/sub core the
//! bridge plugs into, and logging setup shared by the binaries.

pub mod logging;
pub mod messenger;
pub mod sample;
pub mod value;

pub use messenger::{HookId, Messenger, Publisher, Subscriber, TopicInfo, WeakMessenger};
pub use sample::{Origin, Sample};
pub use value::Value;
