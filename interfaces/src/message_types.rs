//! Message Types for Hub-Terminal Communication
//!
//! Terminal reports arrive as JSON. TBTP publications leave the hub as
//! length-prefixed bincode frames.

use crate::InterfaceError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use common::types::{BeamId, CapacityRequestItem, TerminalAddress};
use serde::{Deserialize, Serialize};

/// Size of the frame length prefix
pub const FRAME_HEADER_SIZE: usize = 4;

/// Report sent by a terminal, or on its behalf, to the hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalReport {
    /// Terminal joins a beam
    Logon { address: TerminalAddress, beam_id: BeamId },
    /// Terminal leaves the network
    Logoff { address: TerminalAddress },
    /// Capacity request message
    CapacityRequest { address: TerminalAddress, items: Vec<CapacityRequestItem> },
    /// Return link C/N0 measured at the hub, dBHz
    CnoSample { address: TerminalAddress, cno_db: f64 },
    /// Feeder link C/N0 of a beam, dBHz
    FeederCno { beam_id: BeamId, cno_db: f64 },
    /// Terminal moves to another beam
    Handover { address: TerminalAddress, beam_id: BeamId },
}

impl TerminalReport {
    /// Parse a JSON report
    pub fn from_json(data: &[u8]) -> Result<Self, InterfaceError> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, InterfaceError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Time slots of one terminal in one frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalAssignment {
    pub address: TerminalAddress,
    pub frame_id: u8,
    /// Slot ids in assignment order
    pub time_slot_ids: Vec<u16>,
}

/// Random access channel of the superframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaChannelAssignment {
    pub channel_index: u8,
    pub frame_id: u8,
    pub slot_count: u16,
}

/// One TBTP message as published by the hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TbtpPublication {
    pub beam_id: BeamId,
    pub superframe_seq_id: u8,
    pub superframe_counter: u64,
    /// Assignment format code, selects the slot id size
    pub assignment_format: u8,
    pub assignments: Vec<TerminalAssignment>,
    pub ra_channels: Vec<RaChannelAssignment>,
}

impl TbtpPublication {
    /// Encode into a length-prefixed frame
    pub fn encode(&self) -> Result<Bytes, InterfaceError> {
        let payload = bincode::serialize(self)?;
        let length = u32::try_from(payload.len())
            .map_err(|_| InterfaceError::Framing(format!("Payload of {} bytes too large", payload.len())))?;

        let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.put_u32(length);
        frame.put_slice(&payload);
        Ok(frame.freeze())
    }

    /// Decode a length-prefixed frame
    pub fn decode(mut frame: Bytes) -> Result<Self, InterfaceError> {
        if frame.len() < FRAME_HEADER_SIZE {
            return Err(InterfaceError::Framing(format!("Frame of {} bytes has no header", frame.len())));
        }
        let length = frame.get_u32() as usize;
        if frame.remaining() != length {
            return Err(InterfaceError::Framing(format!(
                "Header announces {} bytes, {} received", length, frame.remaining()
            )));
        }
        Ok(bincode::deserialize(&frame)?)
    }

    pub fn slot_count(&self) -> usize {
        self.assignments.iter().map(|a| a.time_slot_ids.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::CapacityCategory;

    fn publication() -> TbtpPublication {
        TbtpPublication {
            beam_id: BeamId(2),
            superframe_seq_id: 0,
            superframe_counter: 1234,
            assignment_format: 1,
            assignments: vec![TerminalAssignment {
                address: TerminalAddress::from_index(7),
                frame_id: 1,
                time_slot_ids: vec![4, 5, 6],
            }],
            ra_channels: vec![RaChannelAssignment { channel_index: 0, frame_id: 0, slot_count: 155 }],
        }
    }

    #[test]
    fn test_report_json() {
        let json = br#"{"type":"capacity_request","address":[2,0,0,0,0,1],
                        "items":[{"rc_index":0,"category":"rbdc","value":256}]}"#;
        let report = TerminalReport::from_json(json).unwrap();
        assert_eq!(report, TerminalReport::CapacityRequest {
            address: TerminalAddress::from_index(1),
            items: vec![CapacityRequestItem { rc_index: 0, category: CapacityCategory::Rbdc, value: 256 }],
        });

        assert!(TerminalReport::from_json(br#"{"type":"reboot"}"#).is_err());
    }

    #[test]
    fn test_publication_framing() {
        let frame = publication().encode().unwrap();
        let length = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(length, frame.len() - FRAME_HEADER_SIZE);

        let decoded = TbtpPublication::decode(frame).unwrap();
        assert_eq!(decoded.slot_count(), 3);
        assert_eq!(decoded.superframe_counter, 1234);
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let frame = publication().encode().unwrap();
        let truncated = frame.slice(..frame.len() - 1);
        assert!(matches!(TbtpPublication::decode(truncated), Err(InterfaceError::Framing(_))));
        assert!(matches!(TbtpPublication::decode(Bytes::from_static(&[0, 0])), Err(InterfaceError::Framing(_))));
    }
}
