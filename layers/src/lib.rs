//! Return Link Layers Library
//!
//! This crate implements the DVB-RCS2 return link: waveform and frame
//! configuration on the PHY side and demand assigned multiple access on
//! the MAC side.

pub mod phy;
pub mod mac;

use common::types::{BeamId, TerminalAddress};
use thiserror::Error;

/// Admission control failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Minimum rate of {requested} bytes exceeds the carrier payload of {carrier_payload} bytes")]
    ExceedsCarrierPayload { requested: u64, carrier_payload: u32 },

    #[error("Minimum rate of {requested} bytes exceeds the {remaining} bytes left")]
    BudgetExhausted { requested: u64, remaining: u64 },
}

/// Common errors for protocol layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Unknown terminal {0}")]
    UnknownTerminal(TerminalAddress),

    #[error("Unknown beam {0}")]
    UnknownBeam(BeamId),

    #[error("Terminal {0} already registered")]
    DuplicateTerminal(TerminalAddress),

    #[error("Invalid RC index {0}")]
    InvalidRcIndex(u8),

    #[error("Admission rejected: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Transport error: {0}")]
    Transport(String),
}
