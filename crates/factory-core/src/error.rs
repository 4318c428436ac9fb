//! Typed errors for the simulation core (§7).

use crate::id::{AgvId, LineId};

/// Why a command was rejected at dispatch time. Not a Rust error in the
/// panicking sense — every variant becomes a failed [`crate::command::CommandResponse`],
/// never a propagated `Err` that aborts the simulation.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("malformed command: {0}")]
    Malformed(String),
    #[error("unknown AGV target on {line:?}")]
    UnknownAgv { line: LineId },
    #[error("AGV {agv:?} on {line:?} is in FAULT")]
    AgvFaulted { line: LineId, agv: AgvId },
    #[error("invalid path point {0}")]
    InvalidPathPoint(String),
    #[error("device at current point is not in {agv:?}'s corridor")]
    WrongCorridor { agv: AgvId },
    #[error("product_id is required when loading at the raw material warehouse")]
    MissingProductId,
    #[error("product {0} not found in raw material warehouse")]
    UnknownRawProduct(String),
    #[error("nothing ready to load at current device")]
    NothingToLoad,
    #[error("payload is empty, nothing to unload")]
    PayloadEmpty,
    #[error("payload is full")]
    PayloadFull,
    #[error("destination buffer is full or faulted")]
    DestinationUnavailable,
    #[error("target_level must be greater than current battery and at most 100")]
    InvalidChargeTarget,
}

/// Configuration load/validation failures (§4.12/§7).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
