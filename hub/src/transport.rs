//! ZeroMQ glue between the NCC and the terminals
//!
//! Converts cycle outcomes to TBTP publications and applies terminal
//! reports to the NCC.

use async_trait::async_trait;
use common::types::BeamId;
use interfaces::message_types::{RaChannelAssignment, TbtpPublication, TerminalAssignment, TerminalReport};
use interfaces::zmq_handler::AsyncZmqHandler;
use layers::mac::{CycleOutcome, LoggingSink, LowerLayerService, Ncc, TbtpMessage, TbtpSink};
use layers::LayerError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Wire view of one TBTP
pub fn to_publication(beam_id: BeamId, tbtp: &TbtpMessage) -> TbtpPublication {
    let mut assignments: Vec<TerminalAssignment> = Vec::new();
    for (address, slots) in tbtp.da_slots() {
        for slot in slots {
            match assignments.last_mut() {
                Some(last) if last.address == *address && last.frame_id == slot.frame_id => {
                    last.time_slot_ids.push(slot.time_slot_id);
                }
                _ => assignments.push(TerminalAssignment {
                    address: *address,
                    frame_id: slot.frame_id,
                    time_slot_ids: vec![slot.time_slot_id],
                }),
            }
        }
    }

    let ra_channels = tbtp.ra_channels().iter()
        .map(|ra| RaChannelAssignment {
            channel_index: ra.channel_index,
            frame_id: ra.frame_id,
            slot_count: ra.slot_count,
        })
        .collect();

    TbtpPublication {
        beam_id,
        superframe_seq_id: tbtp.superframe_seq_id(),
        superframe_counter: tbtp.superframe_counter(),
        assignment_format: tbtp.assignment_format() as u8,
        assignments,
        ra_channels,
    }
}

/// Sink logging every cycle and publishing its TBTPs when a PUB socket is set
pub struct HubSink {
    logger: LoggingSink,
    publisher: Option<AsyncZmqHandler>,
}

impl HubSink {
    pub fn new(publisher: Option<AsyncZmqHandler>) -> Self {
        Self { logger: LoggingSink, publisher }
    }
}

#[async_trait]
impl TbtpSink for HubSink {
    async fn publish(&self, outcome: &CycleOutcome) -> Result<(), LayerError> {
        self.logger.publish(outcome).await?;

        let Some(publisher) = &self.publisher else {
            return Ok(());
        };
        for tbtp in &outcome.tbtps {
            let publication = to_publication(outcome.beam_id, tbtp);
            publisher.publish(&publication).await
                .map_err(|e| LayerError::Transport(e.to_string()))?;
        }
        Ok(())
    }
}

/// Apply one terminal report to the NCC
pub fn apply_report(
    ncc: &mut Ncc,
    report: TerminalReport,
    now: Duration,
    lls: &Arc<LowerLayerService>,
) -> Result<(), LayerError> {
    match report {
        TerminalReport::Logon { address, beam_id } => {
            ncc.add_terminal(beam_id, address, lls.clone())?;
            info!("Terminal {} logged on in beam {}", address, beam_id);
        }
        TerminalReport::Logoff { address } => {
            ncc.remove_terminal(&address)?;
            info!("Terminal {} logged off", address);
        }
        TerminalReport::CapacityRequest { address, items } => {
            ncc.receive_capacity_request(&address, items)?;
        }
        TerminalReport::CnoSample { address, cno_db } => {
            ncc.update_terminal_cno(&address, now, cno_db)?;
        }
        TerminalReport::FeederCno { beam_id, cno_db } => {
            ncc.update_feeder_cno(beam_id, now, cno_db)?;
        }
        TerminalReport::Handover { address, beam_id } => {
            ncc.move_terminal(&address, beam_id)?;
            debug!("Terminal {} handed over to beam {}", address, beam_id);
        }
    }
    Ok(())
}
