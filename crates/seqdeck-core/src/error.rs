//! Error types for the performance engine.
//!
//! Nothing in here is fatal: every variant describes an operation that was
//! rejected and left engine state untouched.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors returned by engine operations and the command router.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// The target slot already holds a pattern.
    #[error("slot {0} is occupied")]
    SlotOccupied(usize),

    /// The target slot holds no pattern.
    #[error("slot {0} is empty")]
    SlotEmpty(usize),

    /// A slot, screen set or grid index outside its valid range.
    #[error("{what} index {index} out of range (limit {limit})")]
    OutOfRange {
        what: &'static str,
        index: i64,
        limit: usize,
    },

    /// Paste without a prior copy or cut.
    #[error("clipboard is empty")]
    ClipboardEmpty,

    /// An address or verb the router does not know.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A transport command arrived while the transport is starting or stopping.
    #[error("transport is busy changing state")]
    TransportBusy,

    /// Arguments of the wrong type or shape for a known command.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl EngineError {
    pub(crate) fn slot_range(index: usize, limit: usize) -> Self {
        Self::OutOfRange {
            what: "slot",
            index: index as i64,
            limit,
        }
    }

    pub(crate) fn screen_set_range(index: i64, limit: usize) -> Self {
        Self::OutOfRange {
            what: "screen set",
            index,
            limit,
        }
    }
}

/// Errors raised while loading or writing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file or directory problem.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(EngineError::SlotOccupied(3).to_string(), "slot 3 is occupied");
        assert_eq!(
            EngineError::screen_set_range(40, 32).to_string(),
            "screen set index 40 out of range (limit 32)"
        );
        assert_eq!(
            EngineError::UnknownCommand("/nope".into()).to_string(),
            "unknown command: /nope"
        );
    }
}
