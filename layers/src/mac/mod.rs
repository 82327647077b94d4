//! Medium Access Control (MAC) Layer Implementation
//!
//! Return link DAMA: terminal demand bookkeeping, admission control, frame
//! and superframe capacity allocation and TBTP generation per beam.

pub mod beam_scheduler;
pub mod cno_estimator;
pub mod context;
pub mod dama;
pub mod frame_allocator;
pub mod lower_layer_service;
pub mod ncc;
pub mod superframe_allocator;
pub mod tbtp;

use crate::LayerError;
use async_trait::async_trait;
use tracing::{debug, info};

pub use beam_scheduler::{BeamScheduler, BeamSchedulerConfig, CapacityReport, CycleOutcome};
pub use cno_estimator::CnoEstimator;
pub use context::RtnLinkContext;
pub use dama::DamaEntry;
pub use frame_allocator::{AllocationRequest, AllocationRequestItem, FrameAllocator, UtAllocContainer, UtAllocInfo};
pub use lower_layer_service::{DaServiceConfig, LowerLayerService, LowerLayerServiceConfig};
pub use ncc::{run_superframe_loop, Ncc};
pub use superframe_allocator::{SuperframeAllocator, SuperframeAllocatorConfig};
pub use tbtp::{AssignmentFormat, DaTimeSlot, RaChannelInfo, TbtpMessage};

/// Destination of the TBTPs produced by every cycle
#[async_trait]
pub trait TbtpSink: Send + Sync {
    /// Deliver the outcome of one beam cycle
    async fn publish(&self, outcome: &CycleOutcome) -> Result<(), LayerError>;
}

/// Sink that only logs the capacity counters
#[derive(Debug, Default)]
pub struct LoggingSink;

#[async_trait]
impl TbtpSink for LoggingSink {
    async fn publish(&self, outcome: &CycleOutcome) -> Result<(), LayerError> {
        let report = &outcome.report;
        if outcome.tbtps.is_empty() {
            debug!("Beam {} superframe {}: idle", outcome.beam_id.0, outcome.superframe_counter);
            return Ok(());
        }

        let slots: usize = outcome.tbtps.iter().map(TbtpMessage::da_slot_count).sum();
        info!("Beam {} superframe {}: {} TBTP(s), {} slots, requested {:.1} kbps, offered {:.1} kbps, \
               unmet {:.1} kbps, exceeding {:.1} kbps, {} unserved",
              outcome.beam_id.0, outcome.superframe_counter, outcome.tbtps.len(), slots,
              report.requested_kbps, report.offered_kbps, report.unmet_kbps,
              report.exceeding_kbps, report.unserved);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::BeamId;

    #[tokio::test]
    async fn test_logging_sink_accepts_idle_and_busy_cycles() {
        let sink = LoggingSink;
        let mut outcome = CycleOutcome {
            beam_id: BeamId(1),
            superframe_counter: 3,
            tbtps: Vec::new(),
            allocations: UtAllocContainer::new(),
            report: CapacityReport::default(),
        };
        assert!(sink.publish(&outcome).await.is_ok());

        outcome.tbtps.push(TbtpMessage::new(0, 3, AssignmentFormat::default()));
        assert!(sink.publish(&outcome).await.is_ok());
    }
}
