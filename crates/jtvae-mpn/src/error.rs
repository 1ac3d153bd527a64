//! Error types for the message-passing encoder.

use candle_core::DeviceLocation;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MpnError>;

#[derive(Error, Debug)]
pub enum MpnError {
    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("Candidate batch is empty")]
    EmptyBatch,

    #[error("Candidate {candidate} has no atoms")]
    EmptyMolecule { candidate: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Candidate {candidate}: atom {atom} has map number {map_num} but only {nodes} tree nodes were given")]
    AtomMapOutOfRange {
        candidate: usize,
        atom: usize,
        map_num: u32,
        nodes: usize,
    },

    #[error("{kind} {index} has {count} incoming messages, more than the fan-in bound of {max}")]
    FanInExceeded {
        kind: &'static str,
        index: usize,
        count: usize,
        max: usize,
    },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Device mismatch: model lives on {expected:?}, input on {found:?}")]
    DeviceMismatch {
        expected: DeviceLocation,
        found: DeviceLocation,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}
