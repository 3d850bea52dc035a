//! Live log tailing core for podtail
//!
//! This crate provides the capped line buffer, the filter/highlight engine,
//! the observer protocol and the session that ties them to a log source.

mod buffer;
mod error;
mod filter;
mod observer;
mod session;
mod source;

pub use buffer::{ArcLogLine, LineBuffer};
pub use error::{LogError, Result, SourceError};
pub use filter::{FUZZY_MARKER, FilterSpec, HIGHLIGHT_COLOR, INVERT_MARKER, MatchMode, apply, highlight};
pub use observer::{LogObserver, Termination};
pub use session::{LogSession, SessionState};
pub use source::{LineStream, LogSource};

// Re-export types used in our public API
pub use podtail_types::{ContainerInfo, LogLine, LogRequest, ResourcePath, SessionOptions};
