//! Log producers.
//!
//! Remote tail workers turn a streaming command's byte output into lines,
//! the delta watcher turns appends to local files into lines, and the
//! archive persists what the publisher delivered.

pub mod archive;
pub mod delta;
pub mod lines;
pub mod tail;
pub mod watcher;

pub use archive::{ArchiveConfig, LogArchive, spawn_archiver};
pub use delta::WatchTarget;
pub use lines::LineScanner;
pub use tail::{TailConfig, TailExit, TailHandle, spawn_tail};
pub use watcher::{DeltaWatcher, WatchError};
