//! Terminal Burst Time Plan
//!
//! Size-bounded TBTP messages carrying dedicated access slot assignments and
//! random access channel descriptors for one superframe.

use crate::phy::frame_structure::TimeSlotConf;
use crate::LayerError;
use common::types::TerminalAddress;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/// Fixed TBTP body size in bytes
pub const TBTP_BODY_SIZE_BYTES: u32 = 6;

/// Size of one frame descriptor in bytes
pub const TBTP_FRAME_BODY_SIZE_BYTES: u32 = 5;

/// Encoding of time slot assignments
///
/// Configured and carried as its wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum AssignmentFormat {
    OneByte = 0,
    TwoBytes = 1,
    ThreeBytes = 2,
    SixBytes = 3,
}

impl AssignmentFormat {
    /// Format from its wire code
    pub fn from_code(code: u8) -> Result<Self, LayerError> {
        Self::from_u8(code).ok_or_else(|| {
            LayerError::InvalidConfiguration(format!("Unsupported assignment format code {}", code))
        })
    }

    /// Bytes of one assignment id
    pub fn id_size(&self) -> u32 {
        match self {
            AssignmentFormat::OneByte => 1,
            AssignmentFormat::TwoBytes => 2,
            AssignmentFormat::ThreeBytes => 3,
            AssignmentFormat::SixBytes => 6,
        }
    }

    /// Largest time slot id the format can carry
    pub fn max_assignment_id(&self) -> u64 {
        (1u64 << (8 * self.id_size())) - 1
    }
}

impl Default for AssignmentFormat {
    fn default() -> Self {
        AssignmentFormat::TwoBytes
    }
}

impl TryFrom<u8> for AssignmentFormat {
    type Error = LayerError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

impl From<AssignmentFormat> for u8 {
    fn from(format: AssignmentFormat) -> u8 {
        format as u8
    }
}

/// Dedicated access slot given to a terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaTimeSlot {
    pub frame_id: u8,
    pub time_slot_id: u16,
    pub slot: TimeSlotConf,
}

/// Random access channel descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaChannelInfo {
    pub channel_index: u8,
    pub frame_id: u8,
    pub slot_count: u16,
}

/// One TBTP message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TbtpMessage {
    superframe_seq_id: u8,
    superframe_counter: u64,
    assignment_format: AssignmentFormat,
    da_slots: BTreeMap<TerminalAddress, Vec<DaTimeSlot>>,
    ra_channels: Vec<RaChannelInfo>,
    frame_ids: BTreeSet<u8>,
}

impl TbtpMessage {
    pub fn new(superframe_seq_id: u8, superframe_counter: u64, assignment_format: AssignmentFormat) -> Self {
        Self {
            superframe_seq_id,
            superframe_counter,
            assignment_format,
            da_slots: BTreeMap::new(),
            ra_channels: Vec::new(),
            frame_ids: BTreeSet::new(),
        }
    }

    /// Empty message for the same superframe
    pub fn continuation(&self) -> Self {
        Self::new(self.superframe_seq_id, self.superframe_counter, self.assignment_format)
    }

    pub fn superframe_seq_id(&self) -> u8 {
        self.superframe_seq_id
    }

    pub fn superframe_counter(&self) -> u64 {
        self.superframe_counter
    }

    pub fn assignment_format(&self) -> AssignmentFormat {
        self.assignment_format
    }

    /// Encoded message size
    pub fn size_in_bytes(&self) -> u32 {
        let id_size = self.assignment_format.id_size();
        let da_slots: u32 = self.da_slots.values().map(|slots| slots.len() as u32).sum();
        let ra_slots: u32 = self.ra_channels.iter().map(|ra| ra.slot_count as u32).sum();

        TBTP_BODY_SIZE_BYTES
            + self.frame_ids.len() as u32 * TBTP_FRAME_BODY_SIZE_BYTES
            + da_slots * id_size
            + ra_slots * id_size
    }

    fn frame_overhead(&self, frame_id: u8) -> u32 {
        if self.frame_ids.contains(&frame_id) { 0 } else { TBTP_FRAME_BODY_SIZE_BYTES }
    }

    /// Size once a dedicated slot of the frame is added
    pub fn size_with_da_slot(&self, frame_id: u8) -> u32 {
        self.size_in_bytes() + self.frame_overhead(frame_id) + self.assignment_format.id_size()
    }

    /// Size once a random access channel is added
    pub fn size_with_ra_channel(&self, frame_id: u8, slot_count: u16) -> u32 {
        self.size_in_bytes() + self.frame_overhead(frame_id)
            + slot_count as u32 * self.assignment_format.id_size()
    }

    pub fn add_da_slot(&mut self, address: TerminalAddress, slot: DaTimeSlot) {
        trace!("TBTP {}: {} gets slot {} in frame {}",
               self.superframe_counter, address, slot.time_slot_id, slot.frame_id);
        self.frame_ids.insert(slot.frame_id);
        self.da_slots.entry(address).or_default().push(slot);
    }

    pub fn add_ra_channel(&mut self, channel: RaChannelInfo) {
        self.frame_ids.insert(channel.frame_id);
        self.ra_channels.push(channel);
    }

    pub fn da_slots(&self) -> &BTreeMap<TerminalAddress, Vec<DaTimeSlot>> {
        &self.da_slots
    }

    pub fn terminal_slots(&self, address: &TerminalAddress) -> &[DaTimeSlot] {
        self.da_slots.get(address).map_or(&[], |slots| slots.as_slice())
    }

    pub fn da_slot_count(&self) -> usize {
        self.da_slots.values().map(Vec::len).sum()
    }

    pub fn ra_channels(&self) -> &[RaChannelInfo] {
        &self.ra_channels
    }

    pub fn frame_ids(&self) -> &BTreeSet<u8> {
        &self.frame_ids
    }

    pub fn is_empty(&self) -> bool {
        self.da_slots.is_empty() && self.ra_channels.is_empty()
    }
}

fn last_message(tbtps: &mut Vec<TbtpMessage>) -> Result<&mut TbtpMessage, LayerError> {
    tbtps.last_mut().ok_or_else(|| LayerError::InvalidState("No TBTP to fill".into()))
}

fn open_continuation(tbtps: &mut Vec<TbtpMessage>, needed: u32, max_size_bytes: u32) -> Result<(), LayerError> {
    let next = last_message(tbtps)?.continuation();
    if next.size_in_bytes() + needed > max_size_bytes {
        return Err(LayerError::InvalidConfiguration(format!(
            "Maximum TBTP size {} bytes cannot hold a single entry of {} bytes", max_size_bytes, needed
        )));
    }
    debug!("TBTP {} full, opening continuation message {}", next.superframe_counter, tbtps.len());
    tbtps.push(next);
    Ok(())
}

/// Add a slot to the last message, opening a continuation when it would overflow
pub fn push_da_slot(
    tbtps: &mut Vec<TbtpMessage>,
    max_size_bytes: u32,
    address: TerminalAddress,
    slot: DaTimeSlot,
) -> Result<(), LayerError> {
    if last_message(tbtps)?.size_with_da_slot(slot.frame_id) > max_size_bytes {
        let needed = TBTP_FRAME_BODY_SIZE_BYTES + last_message(tbtps)?.assignment_format.id_size();
        open_continuation(tbtps, needed, max_size_bytes)?;
    }
    last_message(tbtps)?.add_da_slot(address, slot);
    Ok(())
}

/// Add a random access channel to the last message, opening a continuation when needed
pub fn push_ra_channel(
    tbtps: &mut Vec<TbtpMessage>,
    max_size_bytes: u32,
    channel: RaChannelInfo,
) -> Result<(), LayerError> {
    if last_message(tbtps)?.size_with_ra_channel(channel.frame_id, channel.slot_count) > max_size_bytes {
        let id_size = last_message(tbtps)?.assignment_format.id_size();
        let needed = TBTP_FRAME_BODY_SIZE_BYTES + channel.slot_count as u32 * id_size;
        open_continuation(tbtps, needed, max_size_bytes)?;
    }
    last_message(tbtps)?.add_ra_channel(channel);
    Ok(())
}
