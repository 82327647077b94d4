//! Beam Scheduler
//!
//! DAMA cycle of one beam. Each cycle merges the capacity requests received
//! since the previous one, turns the terminal demand into allocation
//! requests, runs the superframe allocator and returns the TBTPs of the
//! superframe together with the capacity counters of the cycle.

use super::cno_estimator::CnoEstimator;
use super::context::RtnLinkContext;
use super::dama::DamaEntry;
use super::frame_allocator::{AllocationRequest, AllocationRequestItem, UtAllocContainer, UtAllocInfo};
use super::lower_layer_service::LowerLayerService;
use super::superframe_allocator::{SuperframeAllocator, SuperframeAllocatorConfig};
use super::tbtp::{
    push_ra_channel, AssignmentFormat, RaChannelInfo, TbtpMessage, TBTP_BODY_SIZE_BYTES, TBTP_FRAME_BODY_SIZE_BYTES,
};
use crate::LayerError;
use common::types::{BeamId, CapacityRequestItem, CnoEstimationMode, GatewayId, HandoverStrategy, TerminalAddress};
use common::utils::{bytes_to_kbps, db_to_linear, kbps_to_bytes};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Beam scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeamSchedulerConfig {
    /// Superframe sequence scheduled by the beam
    #[serde(default)]
    pub superframe_seq_id: u8,
    /// Give terminals periodic control slots
    #[serde(default)]
    pub control_slots_enabled: bool,
    /// Minimum time between two control slots of a terminal
    #[serde(default = "default_control_slot_interval_ms")]
    pub control_slot_interval_ms: u64,
    /// Upper bound of one TBTP message
    #[serde(default = "default_max_tbtp_size_bytes")]
    pub max_tbtp_size_bytes: u32,
    /// Time slot assignment encoding
    #[serde(default)]
    pub assignment_format: AssignmentFormat,
    /// C/N0 estimation of terminal and feeder links
    #[serde(default = "default_cno_estimation_mode")]
    pub cno_estimation_mode: CnoEstimationMode,
    /// C/N0 estimation window
    #[serde(default = "default_cno_estimation_window_ms")]
    pub cno_estimation_window_ms: u64,
    /// Superframe allocator settings
    #[serde(default)]
    pub allocator: SuperframeAllocatorConfig,
}

fn default_control_slot_interval_ms() -> u64 {
    1000
}

fn default_max_tbtp_size_bytes() -> u32 {
    1000
}

fn default_cno_estimation_mode() -> CnoEstimationMode {
    CnoEstimationMode::Last
}

fn default_cno_estimation_window_ms() -> u64 {
    2000
}

impl Default for BeamSchedulerConfig {
    fn default() -> Self {
        Self {
            superframe_seq_id: 0,
            control_slots_enabled: false,
            control_slot_interval_ms: default_control_slot_interval_ms(),
            max_tbtp_size_bytes: default_max_tbtp_size_bytes(),
            assignment_format: AssignmentFormat::default(),
            cno_estimation_mode: default_cno_estimation_mode(),
            cno_estimation_window_ms: default_cno_estimation_window_ms(),
            allocator: SuperframeAllocatorConfig::default(),
        }
    }
}

impl BeamSchedulerConfig {
    fn cno_window(&self) -> Duration {
        Duration::from_millis(self.cno_estimation_window_ms)
    }

    fn control_slot_interval(&self) -> Duration {
        Duration::from_millis(self.control_slot_interval_ms)
    }
}

/// Capacity counters of one cycle, kbps over the superframe
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacityReport {
    pub requested_kbps: f64,
    pub offered_kbps: f64,
    pub unmet_kbps: f64,
    pub exceeding_kbps: f64,
    /// Terminals that got nothing at any capacity category level
    pub unserved: usize,
    /// Feeder link C/N0 estimate in dBHz
    pub feeder_cno_db: Option<f64>,
}

/// Result of one scheduling cycle
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub beam_id: BeamId,
    pub superframe_counter: u64,
    /// Empty when the beam has no terminals
    pub tbtps: Vec<TbtpMessage>,
    pub allocations: UtAllocContainer,
    pub report: CapacityReport,
}

#[derive(Debug, Clone)]
struct TerminalInfo {
    dama: DamaEntry,
    cno: CnoEstimator,
    pending_requests: Vec<Vec<CapacityRequestItem>>,
    last_control_slot: Option<Duration>,
}

impl TerminalInfo {
    fn allocation_request(
        &mut self,
        address: TerminalAddress,
        duration: Duration,
        generate_control_slot: bool,
        now: Duration,
    ) -> Result<AllocationRequest, LayerError> {
        let dama = &self.dama;
        let mut items = Vec::with_capacity(dama.rc_count());

        for rc_index in 0..dama.rc_count() as u8 {
            let cra_kbps = dama.cra_kbps(rc_index)?;
            let rbdc_kbps = if dama.is_dynamic_rate_stale() { 0 } else { dama.rbdc_kbps(rc_index)? };
            let vbdc_bytes = if dama.is_volume_backlog_stale() { 0 } else { dama.vbdc_bytes(rc_index)? };

            items.push(AllocationRequestItem {
                cra_bytes: kbps_to_bytes(cra_kbps, duration),
                min_rbdc_bytes: kbps_to_bytes(dama.min_rbdc_kbps(rc_index)?.saturating_sub(cra_kbps), duration),
                rbdc_bytes: kbps_to_bytes(rbdc_kbps, duration),
                vbdc_bytes,
            });
        }

        let cno = db_to_linear(self.cno.estimate(now));
        Ok(AllocationRequest::new(address, cno, items, generate_control_slot))
    }
}

/// Descending C/N0, unknown values last
fn cno_order(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// Scheduler of one beam
#[derive(Debug)]
pub struct BeamScheduler {
    beam_id: BeamId,
    gateway_id: GatewayId,
    config: BeamSchedulerConfig,
    context: Arc<RtnLinkContext>,
    allocator: SuperframeAllocator,
    superframe_duration: Duration,
    terminals: BTreeMap<TerminalAddress, TerminalInfo>,
    feeder_cno: CnoEstimator,
    superframe_counter: u64,
    rng: StdRng,
}

impl BeamScheduler {
    pub fn new(
        beam_id: BeamId,
        gateway_id: GatewayId,
        config: BeamSchedulerConfig,
        context: Arc<RtnLinkContext>,
        seed: u64,
    ) -> Result<Self, LayerError> {
        let min_tbtp_size = TBTP_BODY_SIZE_BYTES + TBTP_FRAME_BODY_SIZE_BYTES
            + config.assignment_format.id_size();
        if config.max_tbtp_size_bytes < min_tbtp_size {
            return Err(LayerError::InvalidConfiguration(format!(
                "Beam {}: maximum TBTP size {} bytes, at least {} needed",
                beam_id.0, config.max_tbtp_size_bytes, min_tbtp_size
            )));
        }

        let seq_id = config.superframe_seq_id;
        let max_id = config.assignment_format.max_assignment_id().min(u16::MAX as u64);
        let largest_frame = context.superframe(seq_id)?.frames().iter()
            .filter(|frame| !frame.is_random_access())
            .map(|frame| frame.time_slot_count())
            .max()
            .unwrap_or(0);
        if largest_frame as u64 > max_id + 1 {
            return Err(LayerError::InvalidConfiguration(format!(
                "Beam {}: frame of {} time slots, assignment format {:?} addresses {}",
                beam_id.0, largest_frame, config.assignment_format, max_id + 1
            )));
        }

        let allocator =SuperframeAllocator::new(config.allocator.clone(), context.clone(), seq_id)?;
        let superframe_duration = context.superframe_duration(seq_id)?;
        let feeder_cno = CnoEstimator::new(config.cno_estimation_mode, config.cno_window());

        info!("Beam {} on gateway {}: superframe sequence {}, period {:?}",
              beam_id.0, gateway_id.0, seq_id, superframe_duration);

        Ok(Self {
            beam_id,
            gateway_id,
            config,
            context,
            allocator,
            superframe_duration,
            terminals: BTreeMap::new(),
            feeder_cno,
            superframe_counter: 0,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn beam_id(&self) -> BeamId {
        self.beam_id
    }

    pub fn gateway_id(&self) -> GatewayId {
        self.gateway_id
    }

    pub fn config(&self) -> &BeamSchedulerConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<RtnLinkContext> {
        &self.context
    }

    pub fn allocator(&self) -> &SuperframeAllocator {
        &self.allocator
    }

    pub fn superframe_duration(&self) -> Duration {
        self.superframe_duration
    }

    /// Counter of the next superframe to schedule
    pub fn superframe_counter(&self) -> u64 {
        self.superframe_counter
    }

    pub fn terminal_count(&self) -> usize {
        self.terminals.len()
    }

    pub fn has_terminal(&self, address: &TerminalAddress) -> bool {
        self.terminals.contains_key(address)
    }

    pub fn terminals(&self) -> impl Iterator<Item = &TerminalAddress> {
        self.terminals.keys()
    }

    pub fn terminal_dama(&self, address: &TerminalAddress) -> Option<&DamaEntry> {
        self.terminals.get(address).map(|t| &t.dama)
    }

    /// Capacity request messages waiting for the next cycle
    pub fn pending_request_count(&self, address: &TerminalAddress) -> Option<usize> {
        self.terminals.get(address).map(|t| t.pending_requests.len())
    }

    fn terminal_mut(&mut self, address: &TerminalAddress) -> Result<&mut TerminalInfo, LayerError> {
        self.terminals.get_mut(address).ok_or(LayerError::UnknownTerminal(*address))
    }

    /// Admit a terminal, reserving its minimum rate
    pub fn add_terminal(&mut self, address: TerminalAddress, lls: Arc<LowerLayerService>) -> Result<(), LayerError> {
        if self.terminals.contains_key(&address) {
            return Err(LayerError::DuplicateTerminal(address));
        }

        let dama = DamaEntry::new(lls);
        let minimum_rate_bytes = dama.min_rate_based_bytes(self.superframe_duration)?;
        self.allocator
            .reserve_minimum_rate(minimum_rate_bytes, self.config.control_slots_enabled)
            .inspect_err(|e| warn!("Beam {}: terminal {} rejected: {}", self.beam_id.0, address, e))?;

        self.terminals.insert(address, TerminalInfo {
            dama,
            cno: CnoEstimator::new(self.config.cno_estimation_mode, self.config.cno_window()),
            pending_requests: Vec::new(),
            last_control_slot: None,
        });

        info!("Beam {}: terminal {} added, {} minimum rate bytes reserved",
              self.beam_id.0, address, minimum_rate_bytes);
        Ok(())
    }

    fn detach(&mut self, address: &TerminalAddress) -> Result<TerminalInfo, LayerError> {
        let info = self.terminals.get(address).ok_or(LayerError::UnknownTerminal(*address))?;
        let minimum_rate_bytes = info.dama.min_rate_based_bytes(self.superframe_duration)?;
        self.allocator.release_minimum_rate(minimum_rate_bytes, self.config.control_slots_enabled)?;
        self.terminals.remove(address).ok_or(LayerError::UnknownTerminal(*address))
    }

    pub fn remove_terminal(&mut self, address: &TerminalAddress) -> Result<(), LayerError> {
        self.detach(address)?;
        info!("Beam {}: terminal {} removed", self.beam_id.0, address);
        Ok(())
    }

    /// Move a terminal with its DAMA state to another beam.
    ///
    /// Either the terminal ends up in `destination` or both beams are left
    /// untouched.
    pub fn transfer_terminal_to(
        &mut self,
        address: &TerminalAddress,
        destination: &mut BeamScheduler,
        strategy: HandoverStrategy,
    ) -> Result<(), LayerError> {
        let info = self.terminals.get(address).ok_or(LayerError::UnknownTerminal(*address))?;
        if destination.terminals.contains_key(address) {
            return Err(LayerError::DuplicateTerminal(*address));
        }

        let destination_bytes = info.dama.min_rate_based_bytes(destination.superframe_duration)?;
        let destination_control = destination.config.control_slots_enabled;
        destination.allocator.reserve_minimum_rate(destination_bytes, destination_control)?;

        let mut info = match self.detach(address) {
            Ok(info) => info,
            Err(e) => {
                destination.allocator.release_minimum_rate(destination_bytes, destination_control)?;
                return Err(e);
            }
        };

        let clear = match strategy {
            HandoverStrategy::AlwaysClear => true,
            HandoverStrategy::ClearIfDifferentGateway => self.gateway_id != destination.gateway_id,
        };
        if clear {
            debug!("Terminal {}: {} pending requests dropped on handover",
                   address, info.pending_requests.len());
            info.pending_requests.clear();
        }

        destination.terminals.insert(*address, info);
        info!("Terminal {} handed over from beam {} to beam {}",
              address, self.beam_id.0, destination.beam_id.0);
        Ok(())
    }

    /// Queue a capacity request message for the next cycle
    pub fn receive_capacity_request(&mut self, address: &TerminalAddress, items: Vec<CapacityRequestItem>) -> Result<(), LayerError> {
        let info = self.terminal_mut(address)?;
        let rc_count = info.dama.rc_count();
        if let Some(item) = items.iter().find(|i| i.rc_index as usize >= rc_count) {
            return Err(LayerError::InvalidRcIndex(item.rc_index));
        }
        trace!("Terminal {}: capacity request with {} items", address, items.len());
        info.pending_requests.push(items);
        Ok(())
    }

    /// Record a terminal C/N0 sample in dBHz
    pub fn update_terminal_cno(&mut self, address: &TerminalAddress, now: Duration, cno_db: f64) -> Result<(), LayerError> {
        self.terminal_mut(address)?.cno.add_sample(now, cno_db);
        Ok(())
    }

    /// Record a feeder link C/N0 sample in dBHz
    pub fn update_feeder_cno(&mut self, now: Duration, cno_db: f64) {
        self.feeder_cno.add_sample(now, cno_db);
    }

    /// Run one DAMA cycle at `now` and produce the TBTPs of the next superframe
    pub fn schedule_cycle(&mut self, now: Duration) -> Result<CycleOutcome, LayerError> {
        let superframe_counter = self.superframe_counter;
        self.superframe_counter += 1;

        let feeder_cno = self.feeder_cno.estimate(now);
        let mut report = CapacityReport {
            feeder_cno_db: (!feeder_cno.is_nan()).then_some(feeder_cno),
            ..Default::default()
        };

        if self.terminals.is_empty() {
            trace!("Beam {}: no terminals in superframe {}", self.beam_id.0, superframe_counter);
            return Ok(CycleOutcome {
                beam_id: self.beam_id,
                superframe_counter,
                tbtps: Vec::new(),
                allocations: UtAllocContainer::new(),
                report,
            });
        }

        let duration = self.superframe_duration;
        let control_enabled = self.config.control_slots_enabled;
        let control_interval = self.config.control_slot_interval();

        let mut requests = Vec::with_capacity(self.terminals.len());
        for (address, info) in self.terminals.iter_mut() {
            info.dama.decrement_dynamic_rate_persistence();
            info.dama.decrement_volume_backlog_persistence();
            if !info.pending_requests.is_empty() {
                let pending = std::mem::take(&mut info.pending_requests);
                info.dama.apply_requests(pending.iter().map(Vec::as_slice))?;
            }

            let control = control_enabled
                && info.last_control_slot.map_or(true, |last| now.saturating_sub(last) >= control_interval);
            requests.push(info.allocation_request(*address, duration, control, now)?);
        }
        requests.sort_by(|a, b| cno_order(a.cno(), b.cno()));

        report.unserved = self.allocator.pre_allocate_symbols(&requests)?;

        let seq_id = self.config.superframe_seq_id;
        let max_size = self.config.max_tbtp_size_bytes;
        let mut tbtps = vec![TbtpMessage::new(seq_id, superframe_counter, self.config.assignment_format)];
        let mut allocations = UtAllocContainer::new();
        self.allocator.generate_time_slots(&mut tbtps, max_size, &mut allocations, &mut self.rng)?;

        for (index, channel) in self.allocator.superframe().ra_channels().iter().enumerate() {
            push_ra_channel(&mut tbtps, max_size, RaChannelInfo {
                channel_index: index as u8,
                frame_id: channel.frame_id,
                slot_count: channel.slot_count,
            })?;
        }

        for request in &requests {
            let address = request.address();
            let granted = allocations.get(&address);
            let requested_bytes = request.total_bytes();
            let offered_bytes = granted.map_or(0, UtAllocInfo::traffic_bytes);

            report.requested_kbps += bytes_to_kbps(requested_bytes, duration);
            report.offered_kbps += bytes_to_kbps(offered_bytes, duration);
            report.unmet_kbps += bytes_to_kbps(requested_bytes.saturating_sub(offered_bytes), duration);
            report.exceeding_kbps += bytes_to_kbps(offered_bytes.saturating_sub(requested_bytes), duration);

            let (Some(info), Some(granted)) = (self.terminals.get_mut(&address), granted) else {
                continue;
            };
            if granted.control_slot {
                info.last_control_slot = Some(now);
            }
            // Bytes beyond the rate based share serve the volume backlog
            for (rc_index, item) in request.items().iter().enumerate() {
                let guaranteed = item.cra_bytes.saturating_add(item.rbdc_bytes);
                let extra = granted.bytes_per_rc.get(rc_index).copied().unwrap_or(0).saturating_sub(guaranteed);
                if extra > 0 {
                    info.dama.decrease_vbdc_bytes(rc_index as u8, extra)?;
                }
            }
        }

        debug!("Beam {} superframe {}: {} terminals, {} TBTP(s), requested {:.1} kbps, offered {:.1} kbps, \
                {} unserved",
               self.beam_id.0, superframe_counter, requests.len(), tbtps.len(),
               report.requested_kbps, report.offered_kbps, report.unserved);

        Ok(CycleOutcome {
            beam_id: self.beam_id,
            superframe_counter,
            tbtps,
            allocations,
            report,
        })
    }
}
