//! File-backed collaborators for the control engine.
//!
//! These stand in for the production time-series database, realtime push
//! tree and command bus when the engine runs from the CLI or in tests.

pub mod directory;
pub mod error;
pub mod fixture;
pub mod sink;
pub mod util;

pub use directory::StaticDirectory;
pub use error::AdapterError;
pub use fixture::JsonFixtureStore;
pub use sink::{LineProtocolSink, format_line};
