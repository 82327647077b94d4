//! Superframe Allocator
//!
//! Drives the frame allocators of one superframe sequence. Guards the
//! minimum rate budget used by admission control, selects carriers for
//! subdivided frames, places every request in a frame and hands slot
//! generation to the frames.

use super::context::RtnLinkContext;
use super::frame_allocator::{AllocationRequest, FrameAllocator, UtAllocContainer};
use super::tbtp::TbtpMessage;
use crate::phy::frame_structure::CarrierBandwidthType;
use crate::phy::superframe::SuperframeConf;
use crate::{AdmissionError, LayerError};
use common::types::{CcLevel, ConfigType};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Superframe allocator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuperframeAllocatorConfig {
    /// Upper bound of the used share of frame symbols
    #[serde(default = "default_target_load")]
    pub target_load: f64,
    /// Free capacity allocation
    #[serde(default)]
    pub fca_enabled: bool,
    /// Dedicate time slots to reservation categories
    #[serde(default)]
    pub rc_based_allocation: bool,
}

fn default_target_load() -> f64 {
    0.9
}

impl Default for SuperframeAllocatorConfig {
    fn default() -> Self {
        Self {
            target_load: default_target_load(),
            fca_enabled: false,
            rc_based_allocation: false,
        }
    }
}

/// Allocator of one superframe sequence
#[derive(Debug, Clone)]
pub struct SuperframeAllocator {
    config: SuperframeAllocatorConfig,
    context: Arc<RtnLinkContext>,
    superframe: Arc<SuperframeConf>,
    frames: Vec<FrameAllocator>,
    parents: Vec<Option<usize>>,
    min_carrier_payload_bytes: u32,
    most_robust_slot_payload_bytes: u32,
    minimum_rate_budget_bytes: u64,
    minimum_rate_bytes_left: u64,
}

impl SuperframeAllocator {
    pub fn new(config: SuperframeAllocatorConfig, context: Arc<RtnLinkContext>, seq_id: u8) -> Result<Self, LayerError> {
        if !(0.0..=1.0).contains(&config.target_load) {
            return Err(LayerError::InvalidConfiguration(
                format!("Target load {} outside [0, 1]", config.target_load)
            ));
        }

        let waveforms = context.waveforms().clone();
        if waveforms.acm_enabled() && !waveforms.cno_requirements_initialized() {
            return Err(LayerError::InvalidConfiguration(
                "ACM enabled but waveform C/N0 requirements are not initialized".into()
            ));
        }

        let superframe = context.superframe(seq_id)?.clone();
        let mut frames = Vec::new();
        let mut allocator_of_frame: HashMap<usize, usize> = HashMap::new();

        for (index, frame) in superframe.frames().iter().enumerate() {
            if frame.is_random_access() {
                continue;
            }
            allocator_of_frame.insert(index, frames.len());
            frames.push(FrameAllocator::new(superframe.clone(), waveforms.clone(), index as u8)?);
        }

        let parents: Vec<Option<usize>> = frames
            .iter()
            .map(|f| f.parent_frame().and_then(|p| allocator_of_frame.get(&p).copied()))
            .collect();

        let min_carrier_payload_bytes = frames
            .iter()
            .map(FrameAllocator::min_payload_per_carrier_bytes)
            .min()
            .unwrap_or(0);

        let default_burst = waveforms.default_waveform()?.burst_length();
        let most_robust_slot_payload_bytes = match waveforms.get_most_robust_waveform_id(default_burst) {
            Some(id) => waveforms.get_waveform(id)?.payload_bytes(),
            None => 0,
        };

        let minimum_rate_budget_bytes: u64 = frames
            .iter()
            .zip(&parents)
            .filter(|(_, parent)| parent.is_none())
            .map(|(f, _)| f.carrier_count() as u64 * min_carrier_payload_bytes as u64)
            .sum();

        info!("Superframe allocator for sequence {}: {} frames, minimum carrier payload {} bytes, \
               minimum rate budget {} bytes",
              seq_id, frames.len(), min_carrier_payload_bytes, minimum_rate_budget_bytes);

        Ok(Self {
            config,
            context,
            superframe,
            frames,
            parents,
            min_carrier_payload_bytes,
            most_robust_slot_payload_bytes,
            minimum_rate_budget_bytes,
            minimum_rate_bytes_left: minimum_rate_budget_bytes,
        })
    }

    pub fn config(&self) -> &SuperframeAllocatorConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<RtnLinkContext> {
        &self.context
    }

    pub fn superframe(&self) -> &Arc<SuperframeConf> {
        &self.superframe
    }

    pub fn frame_allocators(&self) -> &[FrameAllocator] {
        &self.frames
    }

    /// Smallest payload a single carrier of any frame guarantees
    pub fn min_carrier_payload_bytes(&self) -> u32 {
        self.min_carrier_payload_bytes
    }

    /// Payload of one control slot
    pub fn most_robust_slot_payload_bytes(&self) -> u32 {
        self.most_robust_slot_payload_bytes
    }

    pub fn minimum_rate_bytes_left(&self) -> u64 {
        self.minimum_rate_bytes_left
    }

    fn minimum_rate_check_bytes(&self, minimum_rate_bytes: u32, control_slots_enabled: bool) -> u64 {
        let control = if control_slots_enabled { self.most_robust_slot_payload_bytes } else { 0 };
        minimum_rate_bytes as u64 + control as u64
    }

    /// Reserve the guaranteed bytes of a joining terminal
    pub fn reserve_minimum_rate(&mut self, minimum_rate_bytes: u32, control_slots_enabled: bool) -> Result<(), AdmissionError> {
        let check = self.minimum_rate_check_bytes(minimum_rate_bytes, control_slots_enabled);

        if check > self.min_carrier_payload_bytes as u64 {
            return Err(AdmissionError::ExceedsCarrierPayload {
                requested: check,
                carrier_payload: self.min_carrier_payload_bytes,
            });
        }
        if check > self.minimum_rate_bytes_left {
            return Err(AdmissionError::BudgetExhausted {
                requested: check,
                remaining: self.minimum_rate_bytes_left,
            });
        }

        self.minimum_rate_bytes_left -= check;
        debug!("Reserved {} minimum rate bytes, {} left", check, self.minimum_rate_bytes_left);
        Ok(())
    }

    /// Give back the guaranteed bytes of a leaving terminal
    pub fn release_minimum_rate(&mut self, minimum_rate_bytes: u32, control_slots_enabled: bool) -> Result<(), AdmissionError> {
        let check = self.minimum_rate_check_bytes(minimum_rate_bytes, control_slots_enabled);

        if check > self.min_carrier_payload_bytes as u64 {
            return Err(AdmissionError::ExceedsCarrierPayload {
                requested: check,
                carrier_payload: self.min_carrier_payload_bytes,
            });
        }

        self.minimum_rate_bytes_left = (self.minimum_rate_bytes_left + check).min(self.minimum_rate_budget_bytes);
        debug!("Released {} minimum rate bytes, {} left", check, self.minimum_rate_bytes_left);
        Ok(())
    }

    /// Reset every frame for a new cycle
    pub fn remove_allocations(&mut self) {
        for frame in &mut self.frames {
            frame.reset();
        }
    }

    /// Waveform the frame would use for a C/N0, none if it cannot serve it
    fn frame_waveform(&self, frame: &FrameAllocator, cno: f64) -> Option<(u32, f64)> {
        let waveforms = self.context.waveforms();
        if !frame.config_type().uses_acm() {
            return Some((waveforms.default_waveform_id(), f64::NAN));
        }
        waveforms
            .get_best_waveform_id(cno, frame.symbol_rate_baud(), frame.default_burst_length())
            .map(|selection| (selection.id, selection.cno_threshold))
    }

    /// Place requests in frames and share the frame budgets.
    ///
    /// Returns the number of terminals that could not be served at any level.
    pub fn pre_allocate_symbols(&mut self, requests: &[AllocationRequest]) -> Result<usize, LayerError> {
        if self.superframe.config_type() == ConfigType::Type3 {
            self.select_carriers(requests)?;
        }

        self.remove_allocations();

        let mut unserved = 0;
        for request in requests {
            if !self.allocate_to_frame(request)? {
                debug!("Terminal {} not served this cycle", request.address());
                unserved += 1;
            }
        }

        for frame in &mut self.frames {
            frame.pre_allocate_symbols(self.config.target_load, self.config.fca_enabled)?;
        }
        Ok(unserved)
    }

    /// Allocate a request in the least loaded frame able to serve it,
    /// relaxing the capacity category level until one accepts it
    fn allocate_to_frame(&mut self, request: &AllocationRequest) -> Result<bool, LayerError> {
        let supported: Vec<(usize, u32)> = self.frames
            .iter()
            .enumerate()
            .filter(|(_, frame)| frame.selected_carrier_count() > 0)
            .filter_map(|(index, frame)| self.frame_waveform(frame, request.cno()).map(|(id, _)| (index, id)))
            .collect();

        if supported.is_empty() {
            debug!("No frame supports terminal {} at C/N0 {:.1}", request.address(), request.cno());
            return Ok(false);
        }

        for level in CcLevel::LADDER {
            let mut selected: Option<(usize, u32, f64)> = None;
            for &(index, waveform_id) in &supported {
                let load = self.frames[index].cc_load(level);
                if selected.map_or(true, |(_, _, best)| load < best) {
                    selected = Some((index, waveform_id, load));
                }
            }

            if let Some((index, waveform_id, _)) = selected {
                if self.frames[index].allocate(level, request, waveform_id)? {
                    trace!("Terminal {} allocated to frame {} at {:?}",
                           request.address(), self.frames[index].frame_id(), level);
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Split subdivided bandwidth between subdivision levels by demand
    fn select_carriers(&mut self, requests: &[AllocationRequest]) -> Result<(), LayerError> {
        let waveforms = self.context.waveforms().clone();
        let mut demand_symbols = vec![0.0f64; self.frames.len()];

        for request in requests {
            let mut chosen: Option<(usize, u32, f64)> = None;
            for (index, frame) in self.frames.iter().enumerate() {
                if let Some((waveform_id, threshold)) = self.frame_waveform(frame, request.cno()) {
                    let margin = request.cno() - threshold;
                    if chosen.is_none() || chosen.is_some_and(|(_, _, best)| margin < best) {
                        chosen = Some((index, waveform_id, margin));
                    }
                }
            }

            let Some((index, waveform_id, _)) = chosen else {
                warn!("No frame fits terminal {} in carrier selection", request.address());
                continue;
            };

            let waveform = waveforms.get_waveform(waveform_id)?;
            let bytes: u64 = request.items()
                .iter()
                .map(|i| i.cra_bytes as u64 + i.min_rbdc_bytes.max(i.rbdc_bytes) as u64 + i.vbdc_bytes as u64)
                .sum();
            demand_symbols[index] += bytes as f64 * waveform.symbols_per_byte();

            if request.generate_control_slot() {
                if let Some(robust) = waveforms.get_most_robust_waveform_id(self.frames[index].default_burst_length()) {
                    demand_symbols[index] += waveforms.get_waveform(robust)?.burst_length() as f64;
                }
            }
        }

        let carrier_bandwidth = |frame: &FrameAllocator| {
            self.superframe
                .carrier_bandwidth_hz(frame.frame_id(), CarrierBandwidthType::Allocated)
                .unwrap_or(0.0)
        };

        let carriers_needed: Vec<f64> = self.frames
            .iter()
            .zip(&demand_symbols)
            .map(|(frame, demand)| demand / frame.max_symbols_per_carrier())
            .collect();

        let requested_bandwidth: f64 = self.frames
            .iter()
            .zip(&carriers_needed)
            .map(|(frame, needed)| needed * carrier_bandwidth(frame))
            .sum();

        let available_bandwidth: f64 = self.frames
            .iter()
            .zip(&self.parents)
            .filter(|(_, parent)| parent.is_none())
            .map(|(frame, _)| frame.carrier_count() as f64 * carrier_bandwidth(frame))
            .sum();

        let load_coefficient = if requested_bandwidth > 0.0 {
            (available_bandwidth / requested_bandwidth).clamp(0.1, 10.0)
        } else {
            1.0
        };
        debug!("Carrier selection: requested {:.0} Hz of {:.0} Hz, load coefficient {:.2}",
               requested_bandwidth, available_bandwidth, load_coefficient);

        for root in 0..self.frames.len() {
            if self.parents[root].is_some() {
                continue;
            }

            let mut chain = vec![root];
            while let Some(child) = self.parents
                .iter()
                .position(|parent| *parent == chain.last().copied())
            {
                chain.push(child);
            }

            let mut offset: u16 = 0;
            for &index in chain.iter().skip(1).rev() {
                let count = if demand_symbols[index] > 0.0 {
                    let wanted = (load_coefficient * carriers_needed[index]).floor() + 1.0;
                    wanted.min(u16::MAX as f64) as u16
                } else {
                    0
                };
                let end = self.frames[index].select_carriers(count, offset);
                offset = end.div_ceil(2);
            }

            let root_carriers = self.frames[root].carrier_count();
            self.frames[root].select_carriers(root_carriers, offset);
        }

        Ok(())
    }

    /// Generate the time slots of every frame into the TBTP messages
    pub fn generate_time_slots<R: Rng + ?Sized>(
        &mut self,
        tbtps: &mut Vec<TbtpMessage>,
        max_size_bytes: u32,
        ut_allocs: &mut UtAllocContainer,
        rng: &mut R,
    ) -> Result<(), LayerError> {
        if tbtps.is_empty() {
            return Err(LayerError::InvalidState("TBTP container must hold at least one message".into()));
        }
        let rc_based = self.config.rc_based_allocation;
        for frame in &mut self.frames {
            frame.generate_time_slots(tbtps, max_size_bytes, ut_allocs, rc_based, rng)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::frame_allocator::AllocationRequestItem;
    use crate::mac::tbtp::AssignmentFormat;
    use crate::phy::superframe::SuperframeParams;
    use crate::phy::waveform::{WaveformCatalog, WaveformCatalogConfig, DVB_RCS2_WAVEFORMS};
    use common::types::TerminalAddress;
    use common::utils::db_to_linear;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn context(preset: u8, acm_enabled: bool) -> Arc<RtnLinkContext> {
        let config = WaveformCatalogConfig { acm_enabled, ..Default::default() };
        let waveforms = WaveformCatalog::dvb_rcs2(config).unwrap();
        let params = SuperframeParams::preset(preset).unwrap();
        let superframe = SuperframeConf::configure(&params, params.used_bandwidth_hz(), &waveforms).unwrap();
        Arc::new(RtnLinkContext::new(vec![superframe], waveforms).unwrap())
    }

    fn allocator(preset: u8, acm_enabled: bool) -> SuperframeAllocator {
        SuperframeAllocator::new(SuperframeAllocatorConfig::default(), context(preset, acm_enabled), 0).unwrap()
    }

    fn cra_request(index: u32, cno: f64, cra_bytes: u32) -> AllocationRequest {
        let item = AllocationRequestItem { cra_bytes, ..Default::default() };
        AllocationRequest::new(TerminalAddress::from_index(index), cno, vec![item], false)
    }

    #[test]
    fn test_budget_from_root_frames() {
        let sf = allocator(0, false);
        // Two dedicated frames of four carriers
        assert_eq!(sf.frame_allocators().len(), 2);
        let carrier_payload = sf.min_carrier_payload_bytes();
        assert_eq!(carrier_payload, sf.frame_allocators()[0].min_payload_per_carrier_bytes());
        assert_eq!(sf.minimum_rate_bytes_left(), 8 * carrier_payload as u64);
        assert_eq!(sf.most_robust_slot_payload_bytes(), 14);
    }

    #[test]
    fn test_admission_control() {
        let mut sf = allocator(0, false);
        let carrier_payload = sf.min_carrier_payload_bytes();

        sf.reserve_minimum_rate(carrier_payload, false).unwrap();
        let err = sf.reserve_minimum_rate(carrier_payload - 10, true).unwrap_err();
        assert!(matches!(err, AdmissionError::ExceedsCarrierPayload { .. }));
        sf.release_minimum_rate(carrier_payload, false).unwrap();

        let budget = sf.minimum_rate_bytes_left();
        let per_terminal = carrier_payload - 100;
        let mut admitted = 0;
        while sf.reserve_minimum_rate(per_terminal, false).is_ok() {
            admitted += 1;
        }
        assert_eq!(admitted as u64, budget / per_terminal as u64);
        let err = sf.reserve_minimum_rate(per_terminal, false).unwrap_err();
        assert!(matches!(err, AdmissionError::BudgetExhausted { .. }));

        for _ in 0..admitted + 3 {
            sf.release_minimum_rate(per_terminal, false).unwrap();
        }
        assert_eq!(sf.minimum_rate_bytes_left(), budget);
    }

    #[test]
    fn test_acm_requires_cno_requirements() {
        let config = WaveformCatalogConfig { acm_enabled: true, ..Default::default() };
        let waveforms = WaveformCatalog::from_table(DVB_RCS2_WAVEFORMS, config).unwrap();
        let params = SuperframeParams::preset(1).unwrap();
        let superframe = SuperframeConf::configure(&params, params.used_bandwidth_hz(), &waveforms).unwrap();
        let ctx = Arc::new(RtnLinkContext::new(vec![superframe], waveforms).unwrap());
        assert!(SuperframeAllocator::new(SuperframeAllocatorConfig::default(), ctx.clone(), 0).is_err());

        let bad_load = SuperframeAllocatorConfig { target_load: 1.2, ..Default::default() };
        assert!(SuperframeAllocator::new(bad_load, context(1, false), 0).is_err());
    }

    #[test]
    fn test_requests_spread_over_least_loaded_frames() {
        let mut sf = allocator(0, false);
        let carrier_payload = sf.min_carrier_payload_bytes();
        let requests: Vec<AllocationRequest> = (0..4)
            .map(|i| cra_request(i, f64::NAN, carrier_payload / 2))
            .collect();

        assert_eq!(sf.pre_allocate_symbols(&requests).unwrap(), 0);
        let counts: Vec<usize> = sf.frame_allocators().iter().map(|f| f.terminal_count()).collect();
        assert_eq!(counts, vec![2, 2]);

        let mut tbtps = vec![TbtpMessage::new(0, 1, AssignmentFormat::TwoBytes)];
        let mut ut_allocs = UtAllocContainer::new();
        let mut rng = StdRng::seed_from_u64(11);
        sf.generate_time_slots(&mut tbtps, 1024, &mut ut_allocs, &mut rng).unwrap();

        assert_eq!(ut_allocs.len(), 4);
        for request in &requests {
            assert!(ut_allocs[&request.address()].total_bytes() >= (carrier_payload / 2) as u64);
        }
        assert!(tbtps.iter().all(|t| t.size_in_bytes() <= 1024));
    }

    #[test]
    fn test_unserved_terminal_counted() {
        let mut sf = allocator(0, false);
        let carrier_payload = sf.min_carrier_payload_bytes();
        let requests = vec![cra_request(1, f64::NAN, carrier_payload + 1)];
        assert_eq!(sf.pre_allocate_symbols(&requests).unwrap(), 1);

        let mut tbtps = Vec::new();
        let mut ut_allocs = UtAllocContainer::new();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(sf.generate_time_slots(&mut tbtps, 1024, &mut ut_allocs, &mut rng).is_err());
    }

    #[test]
    fn test_acm_skips_frames_that_cannot_serve() {
        let mut sf = allocator(1, true);
        // Below every waveform threshold of the 125 kHz carriers
        let requests = vec![cra_request(1, db_to_linear(40.0), 100)];
        assert_eq!(sf.pre_allocate_symbols(&requests).unwrap(), 1);

        let requests = vec![cra_request(1, db_to_linear(70.0), 100)];
        assert_eq!(sf.pre_allocate_symbols(&requests).unwrap(), 0);
        let frame = sf.frame_allocators().iter().find(|f| f.terminal_count() == 1).unwrap();
        let allocation = frame.terminal_allocation(&requests[0].address()).unwrap();
        // Most efficient short waveform at a strong link
        assert_eq!(allocation.waveform_id(), 3);
    }

    #[test]
    fn test_carrier_selection_without_demand() {
        let mut sf = allocator(3, true);
        sf.pre_allocate_symbols(&[]).unwrap();
        let selected: Vec<u16> = sf.frame_allocators().iter().map(|f| f.selected_carrier_count()).collect();
        // Root frame keeps every carrier
        assert_eq!(selected, vec![4, 0, 0]);
    }

    #[test]
    fn test_carrier_selection_follows_demand() {
        let mut sf = allocator(3, true);
        // Only the quarter width carriers can close the link at 54 dBHz
        let requests = vec![cra_request(1, db_to_linear(54.0), 500)];
        assert_eq!(sf.pre_allocate_symbols(&requests).unwrap(), 0);

        let frames = sf.frame_allocators();
        let quarter = &frames[2];
        assert_eq!(quarter.subdivision_level(), 2);
        assert_eq!(quarter.selected_carrier_count(), 10);
        assert_eq!(quarter.terminal_count(), 1);
        assert_eq!(frames[1].selected_carrier_count(), 0);
        assert_eq!(frames[0].selected_carrier_count(), 1);

        let used: f64 = frames
            .iter()
            .map(|f| {
                f.selected_carrier_count() as f64
                    * sf.superframe().carrier_bandwidth_hz(f.frame_id(), CarrierBandwidthType::Allocated).unwrap()
            })
            .sum();
        assert!(used <= 5e6 + 1e-3);
    }
}
