//! ZMQ Communication Interfaces Library
//!
//! This crate provides the ZeroMQ transport of the hub: terminal reports in,
//! TBTP publications out.

pub mod zmq_handler;
pub mod message_types;

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("ZMQ error: {0}")]
    ZmqError(#[from] zmq::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    EncodingError(#[from] bincode::Error),

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Interface not initialized")]
    NotInitialized,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
