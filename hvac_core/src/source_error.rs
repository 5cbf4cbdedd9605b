//! Maps `Box<dyn Error>` from collaborator boundaries to typed `EngineError`.
//!
//! The traits in `hvac_traits` use `Box<dyn Error + Send + Sync>`; this module
//! converts those to our typed error enum, with an optional feature-gated path
//! for `hvac_adapters::AdapterError` downcasting.

use crate::error::EngineError;

/// Map a metrics/realtime/directory error to a typed `EngineError`.
///
/// Attempts to downcast known adapter error types first, then falls back
/// to string-based heuristics.
pub fn map_source_error(e: &(dyn std::error::Error + 'static)) -> EngineError {
    #[cfg(feature = "adapter-errors")]
    {
        if let Some(ae) = e.downcast_ref::<hvac_adapters::AdapterError>() {
            return match ae {
                hvac_adapters::AdapterError::Timeout => EngineError::SourceTimeout,
                hvac_adapters::AdapterError::Io(_) => EngineError::Io(ae.to_string()),
                other => EngineError::Source(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") || s.to_lowercase().contains("timed out") {
        EngineError::SourceTimeout
    } else {
        EngineError::Source(s)
    }
}

/// Map a command-sink error to a typed `EngineError`.
pub fn map_sink_error(e: &(dyn std::error::Error + 'static)) -> EngineError {
    #[cfg(feature = "adapter-errors")]
    {
        if let Some(ae) = e.downcast_ref::<hvac_adapters::AdapterError>() {
            return match ae {
                hvac_adapters::AdapterError::Io(_) => EngineError::Io(ae.to_string()),
                other => EngineError::Sink(other.to_string()),
            };
        }
    }
    EngineError::Sink(e.to_string())
}
