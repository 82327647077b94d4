//! ZeroMQ Handler Implementation
//!
//! Manages the ZeroMQ sockets of the hub: a PULL socket collecting terminal
//! reports and a PUB socket publishing TBTPs.

use crate::{InterfaceError, message_types::{TbtpPublication, TerminalReport, FRAME_HEADER_SIZE}};
use common::utils::bytes_to_hex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};
use zmq::Context;
use std::sync::Arc;
use tokio::sync::Mutex;

/// ZMQ socket types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketType {
    /// Push-Pull pattern (hub collects reports)
    Pull,
    /// Publish-Subscribe pattern (hub as publisher)
    Pub,
}

/// ZMQ handler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZmqConfig {
    /// Socket type
    pub socket_type: SocketType,
    /// Bind address for incoming connections
    pub bind_address: String,
    /// High water mark
    #[serde(default = "default_hwm")]
    pub hwm: i32,
}

fn default_hwm() -> i32 {
    1000
}

/// ZMQ handler for terminal communication
pub struct ZmqHandler {
    config: ZmqConfig,
    context: Context,
    socket: Option<zmq::Socket>,
}

impl ZmqHandler {
    /// Create a new ZMQ handler
    pub fn new(config: ZmqConfig) -> Result<Self, InterfaceError> {
        if config.bind_address.is_empty() {
            return Err(InterfaceError::InvalidConfig("Empty bind address".into()));
        }

        Ok(Self {
            config,
            context: Context::new(),
            socket: None,
        })
    }

    pub fn socket_type(&self) -> SocketType {
        self.config.socket_type
    }

    pub fn is_initialized(&self) -> bool {
        self.socket.is_some()
    }

    /// Bind the socket
    pub fn initialize(&mut self) -> Result<(), InterfaceError> {
        info!("Initializing ZMQ handler");

        let socket = match self.config.socket_type {
            SocketType::Pull => {
                let sock = self.context.socket(zmq::PULL)?;
                sock.set_rcvhwm(self.config.hwm)?;
                sock.bind(&self.config.bind_address)?;
                info!("ZMQ PULL socket bound to {}", self.config.bind_address);
                sock
            }
            SocketType::Pub => {
                let sock = self.context.socket(zmq::PUB)?;
                sock.set_sndhwm(self.config.hwm)?;
                sock.bind(&self.config.bind_address)?;
                info!("ZMQ PUB socket bound to {}", self.config.bind_address);
                sock
            }
        };

        self.socket = Some(socket);
        Ok(())
    }

    fn socket(&self, expected: SocketType) -> Result<&zmq::Socket, InterfaceError> {
        if self.config.socket_type != expected {
            return Err(InterfaceError::InvalidConfig(format!(
                "{:?} socket used as {:?}", self.config.socket_type, expected
            )));
        }
        self.socket.as_ref().ok_or(InterfaceError::NotInitialized)
    }

    /// Next pending terminal report, `None` when nothing is queued
    pub fn try_receive_report(&self) -> Result<Option<TerminalReport>, InterfaceError> {
        let socket = self.socket(SocketType::Pull)?;

        let msg = match socket.recv_bytes(zmq::DONTWAIT) {
            Ok(msg) => msg,
            Err(zmq::Error::EAGAIN) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        debug!("Received {} bytes from terminal", msg.len());

        match TerminalReport::from_json(&msg) {
            Ok(report) => Ok(Some(report)),
            Err(e) => {
                warn!("Dropping malformed terminal report: {}", e);
                Err(e)
            }
        }
    }

    /// Publish one TBTP
    pub fn publish(&self, publication: &TbtpPublication) -> Result<(), InterfaceError> {
        let socket = self.socket(SocketType::Pub)?;

        let frame = publication.encode()?;
        trace!("TBTP frame header: {}", bytes_to_hex(&frame[..FRAME_HEADER_SIZE]));
        socket.send(frame.as_ref(), 0)?;
        debug!("Published TBTP of beam {} superframe {}: {} bytes",
               publication.beam_id, publication.superframe_counter, frame.len());
        Ok(())
    }

    /// Shutdown the handler
    pub fn shutdown(&mut self) -> Result<(), InterfaceError> {
        info!("Shutting down ZMQ handler");
        self.socket.take();
        Ok(())
    }
}

/// Async wrapper for ZMQ handler
#[derive(Clone)]
pub struct AsyncZmqHandler {
    inner: Arc<Mutex<ZmqHandler>>,
}

impl AsyncZmqHandler {
    /// Create new async ZMQ handler
    pub fn new(config: ZmqConfig) -> Result<Self, InterfaceError> {
        let handler = ZmqHandler::new(config)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(handler)),
        })
    }

    pub async fn initialize(&self) -> Result<(), InterfaceError> {
        self.inner.lock().await.initialize()
    }

    /// Drain every queued terminal report, skipping malformed ones
    pub async fn drain_reports(&self) -> Result<Vec<TerminalReport>, InterfaceError> {
        let handler = self.inner.lock().await;
        let mut reports = Vec::new();
        loop {
            match handler.try_receive_report() {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => break,
                Err(InterfaceError::SerializationError(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(reports)
    }

    pub async fn publish(&self, publication: &TbtpPublication) -> Result<(), InterfaceError> {
        self.inner.lock().await.publish(publication)
    }

    pub async fn shutdown(&self) -> Result<(), InterfaceError> {
        self.inner.lock().await.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::BeamId;

    fn config(socket_type: SocketType, name: &str) -> ZmqConfig {
        ZmqConfig {
            socket_type,
            bind_address: format!("inproc://{}", name),
            hwm: 100,
        }
    }

    #[test]
    fn test_zmq_handler_creation() {
        let handler = ZmqHandler::new(config(SocketType::Pull, "reports-creation"));
        assert!(handler.is_ok());
        assert!(!handler.unwrap().is_initialized());

        let empty = ZmqConfig { bind_address: String::new(), ..config(SocketType::Pub, "") };
        assert!(matches!(ZmqHandler::new(empty), Err(InterfaceError::InvalidConfig(_))));
    }

    #[test]
    fn test_uninitialized_handler() {
        let handler = ZmqHandler::new(config(SocketType::Pull, "reports-uninitialized")).unwrap();
        assert!(matches!(handler.try_receive_report(), Err(InterfaceError::NotInitialized)));
    }

    #[test]
    fn test_pull_socket_without_reports() {
        let mut handler = ZmqHandler::new(config(SocketType::Pull, "reports-empty")).unwrap();
        handler.initialize().unwrap();
        assert!(handler.try_receive_report().unwrap().is_none());

        let publication = TbtpPublication {
            beam_id: BeamId(1),
            superframe_seq_id: 0,
            superframe_counter: 0,
            assignment_format: 0,
            assignments: Vec::new(),
            ra_channels: Vec::new(),
        };
        assert!(matches!(handler.publish(&publication), Err(InterfaceError::InvalidConfig(_))));
        handler.shutdown().unwrap();
        assert!(!handler.is_initialized());
    }

    #[tokio::test]
    async fn test_async_publish_without_subscribers() {
        let handler = AsyncZmqHandler::new(config(SocketType::Pub, "tbtp-async")).unwrap();
        handler.initialize().await.unwrap();

        let publication = TbtpPublication {
            beam_id: BeamId(1),
            superframe_seq_id: 0,
            superframe_counter: 9,
            assignment_format: 1,
            assignments: Vec::new(),
            ra_channels: Vec::new(),
        };
        assert!(handler.publish(&publication).await.is_ok());
        handler.shutdown().await.unwrap();
    }
}
