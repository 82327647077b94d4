//! Frame Allocator
//!
//! Symbol bookkeeping of one dedicated access frame for one superframe cycle.
//! Requests are accepted at a capacity category level, the frame budget is
//! shared between accepted terminals and finally turned into time slots.
//!
//! Cycle: `Empty` -> `Accepting` (allocate) -> `PreAllocated`
//! (pre_allocate_symbols) -> `SlotsGenerated` (generate_time_slots) and back
//! to `Empty` through `reset`.

use super::tbtp::{push_da_slot, DaTimeSlot, TbtpMessage};
use crate::phy::frame_structure::{FrameConf, TimeSlotConf};
use crate::phy::superframe::SuperframeConf;
use crate::phy::waveform::{Waveform, WaveformCatalog};
use crate::LayerError;
use common::types::{CcLevel, ConfigType, SlotType, TerminalAddress};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Tolerance for symbol comparisons
const SYMBOL_EPSILON: f64 = 1e-6;

/// Byte request of one reservation category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationRequestItem {
    pub cra_bytes: u32,
    pub min_rbdc_bytes: u32,
    pub rbdc_bytes: u32,
    pub vbdc_bytes: u32,
}

/// Request of one terminal for one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationRequest {
    address: TerminalAddress,
    cno: f64,
    items: Vec<AllocationRequestItem>,
    generate_control_slot: bool,
}

impl AllocationRequest {
    /// Create a request; RBDC is raised to at least the minimum RBDC of each category
    pub fn new(
        address: TerminalAddress,
        cno: f64,
        mut items: Vec<AllocationRequestItem>,
        generate_control_slot: bool,
    ) -> Self {
        for item in &mut items {
            item.rbdc_bytes = item.rbdc_bytes.max(item.min_rbdc_bytes);
        }
        Self { address, cno, items, generate_control_slot }
    }

    pub fn address(&self) -> TerminalAddress {
        self.address
    }

    /// Linear C/N0 estimate, NaN when unknown
    pub fn cno(&self) -> f64 {
        self.cno
    }

    pub fn items(&self) -> &[AllocationRequestItem] {
        &self.items
    }

    pub fn generate_control_slot(&self) -> bool {
        self.generate_control_slot
    }

    /// CRA + RBDC + VBDC bytes of all categories
    pub fn total_bytes(&self) -> u64 {
        self.items
            .iter()
            .map(|i| i.cra_bytes as u64 + i.rbdc_bytes as u64 + i.vbdc_bytes as u64)
            .sum()
    }
}

/// Symbols of one reservation category. RBDC includes the minimum RBDC.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RcAllocation {
    pub cra: f64,
    pub min_rbdc: f64,
    pub rbdc: f64,
    pub vbdc: f64,
}

impl RcAllocation {
    /// Symbols counted at a capacity category level
    pub fn at_level(&self, level: CcLevel) -> f64 {
        match level {
            CcLevel::Cra => self.cra,
            CcLevel::CraMinRbdc => self.cra + self.min_rbdc,
            CcLevel::CraRbdc => self.cra + self.rbdc,
            CcLevel::CraRbdcVbdc => self.cra + self.rbdc + self.vbdc,
        }
    }

    pub fn total(&self) -> f64 {
        self.at_level(CcLevel::CraRbdcVbdc)
    }

    /// Part of the request granted at a level
    fn masked(&self, level: CcLevel) -> Self {
        match level {
            CcLevel::Cra => Self { cra: self.cra, ..Self::default() },
            CcLevel::CraMinRbdc => Self {
                cra: self.cra,
                min_rbdc: self.min_rbdc,
                rbdc: self.min_rbdc,
                vbdc: 0.0,
            },
            CcLevel::CraRbdc => Self { vbdc: 0.0, ..*self },
            CcLevel::CraRbdcVbdc => *self,
        }
    }

    fn add(&mut self, other: &RcAllocation) {
        self.cra += other.cra;
        self.min_rbdc += other.min_rbdc;
        self.rbdc += other.rbdc;
        self.vbdc += other.vbdc;
    }
}

/// Request and grant of one terminal in a frame, in symbols
#[derive(Debug, Clone)]
pub struct TerminalAllocation {
    request: Vec<RcAllocation>,
    allocation: Vec<RcAllocation>,
    control_symbols: f64,
    allocated_control_symbols: f64,
    waveform_id: u32,
    cno: f64,
    generate_control_slot: bool,
}

impl TerminalAllocation {
    pub fn request(&self) -> &[RcAllocation] {
        &self.request
    }

    pub fn allocation(&self) -> &[RcAllocation] {
        &self.allocation
    }

    pub fn waveform_id(&self) -> u32 {
        self.waveform_id
    }

    pub fn control_symbols(&self) -> f64 {
        self.control_symbols
    }

    /// Requested symbols at a level, control slot included
    pub fn requested_symbols(&self, level: CcLevel) -> f64 {
        self.control_symbols + self.request.iter().map(|rc| rc.at_level(level)).sum::<f64>()
    }

    /// Granted symbols, control slot included
    pub fn allocated_symbols(&self) -> f64 {
        self.allocated_control_symbols + self.allocation.iter().map(RcAllocation::total).sum::<f64>()
    }
}

/// Bytes granted to a terminal by slot generation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtAllocInfo {
    /// Traffic bytes per reservation category
    pub bytes_per_rc: Vec<u32>,
    pub control_slot: bool,
    /// Payload of the control slot, not part of any category
    pub control_bytes: u32,
}

impl UtAllocInfo {
    pub fn new(rc_count: usize) -> Self {
        Self { bytes_per_rc: vec![0; rc_count], control_slot: false, control_bytes: 0 }
    }

    pub fn traffic_bytes(&self) -> u64 {
        self.bytes_per_rc.iter().map(|&b| b as u64).sum()
    }

    /// Payload of every slot granted, control slot included
    pub fn total_bytes(&self) -> u64 {
        self.traffic_bytes() + self.control_bytes as u64
    }
}

/// Grants of every terminal of a cycle
pub type UtAllocContainer = BTreeMap<TerminalAddress, UtAllocInfo>;

/// Cycle state of a frame allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorState {
    Empty,
    Accepting,
    PreAllocated,
    SlotsGenerated,
}

/// Which request is topped up when leftover symbols are shared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShareKind {
    /// Free capacity, not limited by the request
    FreeVbdc,
    Vbdc,
    Rbdc,
    MinRbdc,
}

/// Carriers visited during slot generation
struct CarrierCursor {
    carriers: Vec<u16>,
    index: usize,
    used_symbols: f64,
}

impl CarrierCursor {
    fn current(&self) -> Option<u16> {
        self.carriers.get(self.index).copied()
    }

    fn advance(&mut self) {
        self.index += 1;
        self.used_symbols = 0.0;
    }
}

/// Allocator of one dedicated access frame
#[derive(Debug, Clone)]
pub struct FrameAllocator {
    superframe: Arc<SuperframeConf>,
    waveforms: Arc<WaveformCatalog>,
    frame_id: u8,
    burst_lengths: Vec<u32>,
    most_robust_waveform_id: u32,
    selected_carriers: Vec<u16>,
    total_symbols: f64,
    available_symbols: f64,
    pre_allocated: RcAllocation,
    terminals: BTreeMap<TerminalAddress, TerminalAllocation>,
    rc_allocs: Vec<(TerminalAddress, usize)>,
    state: AllocatorState,
}

impl FrameAllocator {
    pub fn new(
        superframe: Arc<SuperframeConf>,
        waveforms: Arc<WaveformCatalog>,
        frame_id: u8,
    ) -> Result<Self, LayerError> {
        let frame = superframe.frame(frame_id)?;
        if frame.is_random_access() {
            return Err(LayerError::InvalidConfiguration(
                format!("Frame {} is a random access frame", frame_id)
            ));
        }

        let burst_lengths = if superframe.config_type().uses_variable_burst_length() {
            waveforms.supported_burst_lengths()
        } else {
            vec![frame.default_burst_length()]
        };

        let most_robust_waveform_id = waveforms
            .get_most_robust_waveform_id(frame.default_burst_length())
            .ok_or_else(|| LayerError::InvalidConfiguration(format!(
                "No waveform with burst length {}", frame.default_burst_length()
            )))?;

        let carrier_count = frame.carrier_count();
        let mut allocator = Self {
            frame_id,
            burst_lengths,
            most_robust_waveform_id,
            selected_carriers: Vec::new(),
            total_symbols: 0.0,
            available_symbols: 0.0,
            pre_allocated: RcAllocation::default(),
            terminals: BTreeMap::new(),
            rc_allocs: Vec::new(),
            state: AllocatorState::Empty,
            superframe,
            waveforms,
        };
        allocator.select_carriers(carrier_count, 0);
        Ok(allocator)
    }

    fn frame(&self) -> &FrameConf {
        &self.superframe.frames()[self.frame_id as usize]
    }

    pub fn frame_id(&self) -> u8 {
        self.frame_id
    }

    pub fn config_type(&self) -> ConfigType {
        self.superframe.config_type()
    }

    /// Arena index of the frame this one was subdivided from
    pub fn parent_frame(&self) -> Option<usize> {
        self.frame().parent()
    }

    pub fn subdivision_level(&self) -> u8 {
        self.frame().subdivision_level()
    }

    pub fn symbol_rate_baud(&self) -> f64 {
        self.frame().symbol_rate_baud()
    }

    pub fn default_burst_length(&self) -> u32 {
        self.frame().default_burst_length()
    }

    pub fn carrier_count(&self) -> u16 {
        self.frame().carrier_count()
    }

    pub fn max_symbols_per_carrier(&self) -> f64 {
        self.frame().max_symbols_per_carrier() as f64
    }

    pub fn min_payload_per_carrier_bytes(&self) -> u32 {
        self.frame().min_payload_per_carrier_bytes()
    }

    pub fn selected_carrier_count(&self) -> u16 {
        self.selected_carriers.len() as u16
    }

    pub fn total_symbols(&self) -> f64 {
        self.total_symbols
    }

    pub fn state(&self) -> AllocatorState {
        self.state
    }

    pub fn terminal_allocation(&self, address: &TerminalAddress) -> Option<&TerminalAllocation> {
        self.terminals.get(address)
    }

    pub fn terminal_count(&self) -> usize {
        self.terminals.len()
    }

    /// Symbols granted to all terminals
    pub fn accepted_symbols(&self) -> f64 {
        self.terminals.values().map(TerminalAllocation::allocated_symbols).sum()
    }

    /// Use carriers `[offset, offset + count)`, clipped to the frame; returns the end
    pub fn select_carriers(&mut self, count: u16, offset: u16) -> u16 {
        let end = offset.saturating_add(count).min(self.carrier_count());
        self.selected_carriers = (offset.min(end)..end).collect();
        self.total_symbols = self.selected_carriers.len() as f64 * self.max_symbols_per_carrier();
        trace!("Frame {}: carriers {}..{} selected", self.frame_id, offset, end);
        end
    }

    pub fn clear_carrier_selection(&mut self) {
        self.selected_carriers.clear();
        self.total_symbols = 0.0;
    }

    /// Drop every allocation of the cycle; the carrier selection is kept
    pub fn reset(&mut self) {
        self.pre_allocated = RcAllocation::default();
        self.available_symbols = 0.0;
        self.terminals.clear();
        self.rc_allocs.clear();
        self.state = AllocatorState::Empty;
    }

    /// Load at a level: pre-allocated minus total symbols, lower is emptier
    pub fn cc_load(&self, level: CcLevel) -> f64 {
        self.pre_allocated.at_level(level) - self.total_symbols
    }

    fn bytes_to_symbols(bytes: u32, waveform: &Waveform) -> f64 {
        bytes as f64 * waveform.burst_length() as f64 / waveform.payload_bytes() as f64
    }

    /// Try to accept a request at a capacity category level.
    ///
    /// Returns `Ok(false)` without touching any state when the request does
    /// not fit the frame or a single carrier at that level.
    pub fn allocate(&mut self, level: CcLevel, request: &AllocationRequest, waveform_id: u32) -> Result<bool, LayerError> {
        match self.state {
            AllocatorState::Empty | AllocatorState::Accepting => {}
            state => return Err(LayerError::InvalidState(
                format!("Frame {} cannot accept requests in state {:?}", self.frame_id, state)
            )),
        }
        if self.terminals.contains_key(&request.address()) {
            return Err(LayerError::InvalidState(
                format!("Terminal {} already allocated in frame {}", request.address(), self.frame_id)
            ));
        }

        let waveform = self.waveforms.get_waveform(waveform_id)?;
        let mut symbols: Vec<RcAllocation> = request.items()
            .iter()
            .map(|item| RcAllocation {
                cra: Self::bytes_to_symbols(item.cra_bytes, waveform),
                min_rbdc: Self::bytes_to_symbols(item.min_rbdc_bytes, waveform),
                rbdc: Self::bytes_to_symbols(item.rbdc_bytes, waveform),
                vbdc: Self::bytes_to_symbols(item.vbdc_bytes, waveform),
            })
            .collect();

        let control_symbols = if request.generate_control_slot() {
            self.waveforms.get_waveform(self.most_robust_waveform_id)?.burst_length() as f64
        } else {
            0.0
        };

        let requested = control_symbols + symbols.iter().map(|rc| rc.at_level(level)).sum::<f64>();
        let frame_left = self.total_symbols - self.pre_allocated.at_level(level);
        let room = frame_left.min(self.max_symbols_per_carrier());

        if requested > room + SYMBOL_EPSILON {
            trace!("Frame {}: {} needs {:.1} symbols at {:?}, {:.1} available",
                   self.frame_id, request.address(), requested, level, room);
            return Ok(false);
        }

        self.update_alloc_req(&mut symbols, control_symbols)?;
        self.state = AllocatorState::Accepting;

        self.pre_allocated.cra += control_symbols;
        for rc in &symbols {
            self.pre_allocated.add(rc);
        }

        let rc_count = symbols.len();
        self.terminals.insert(request.address(), TerminalAllocation {
            allocation: vec![RcAllocation::default(); rc_count],
            request: symbols,
            control_symbols,
            allocated_control_symbols: 0.0,
            waveform_id,
            cno: request.cno(),
            generate_control_slot: request.generate_control_slot(),
        });
        self.rc_allocs.extend((0..rc_count).map(|rc| (request.address(), rc)));

        debug!("Frame {}: {} accepted at {:?} with waveform {}", self.frame_id, request.address(), level, waveform_id);
        Ok(true)
    }

    /// Scale a request down so that it fits one carrier.
    ///
    /// The first category that overflows is shared between reservation
    /// categories in proportion to their request; higher categories drop.
    fn update_alloc_req(&self, req: &mut [RcAllocation], control_symbols: f64) -> Result<(), LayerError> {
        let max = self.max_symbols_per_carrier();
        let cra = control_symbols + req.iter().map(|rc| rc.cra).sum::<f64>();
        let min_rbdc: f64 = req.iter().map(|rc| rc.min_rbdc).sum();
        let rbdc: f64 = req.iter().map(|rc| rc.rbdc).sum();
        let vbdc: f64 = req.iter().map(|rc| rc.vbdc).sum();

        if cra > max + SYMBOL_EPSILON {
            return Err(LayerError::InvalidState(format!(
                "CRA of {:.1} symbols does not fit a carrier of {:.1} symbols in frame {}",
                cra, max, self.frame_id
            )));
        }

        if cra + min_rbdc > max + SYMBOL_EPSILON {
            let left = max - cra;
            for rc in req.iter_mut() {
                rc.min_rbdc = rc.min_rbdc / min_rbdc * left;
                rc.rbdc = rc.min_rbdc;
                rc.vbdc = 0.0;
            }
        } else if cra + rbdc > max + SYMBOL_EPSILON {
            let left = max - cra - min_rbdc;
            let over_min = rbdc - min_rbdc;
            for rc in req.iter_mut() {
                let rc_over_min = (rc.rbdc - rc.min_rbdc).max(0.0);
                rc.rbdc = rc.min_rbdc + rc_over_min / over_min * left;
                rc.vbdc = 0.0;
            }
        } else if cra + rbdc + vbdc > max + SYMBOL_EPSILON {
            let left = max - cra - rbdc;
            for rc in req.iter_mut() {
                rc.vbdc = rc.vbdc / vbdc * left;
            }
        } else {
            return Ok(());
        }

        debug!("Frame {}: request scaled to one carrier of {:.1} symbols", self.frame_id, max);
        Ok(())
    }

    /// Grant symbols to the accepted terminals within `target_load` of the frame
    pub fn pre_allocate_symbols(&mut self, target_load: f64, fca_enabled: bool) -> Result<(), LayerError> {
        if !(0.0..=1.0).contains(&target_load) {
            return Err(LayerError::InvalidConfiguration(
                format!("Target load {} outside [0, 1]", target_load)
            ));
        }
        match self.state {
            AllocatorState::Empty | AllocatorState::Accepting => {}
            state => return Err(LayerError::InvalidState(
                format!("Frame {} already pre-allocated ({:?})", self.frame_id, state)
            )),
        }

        self.available_symbols = target_load * self.total_symbols;
        self.share_symbols(fca_enabled);
        self.state = AllocatorState::PreAllocated;

        debug!("Frame {}: {} terminals, {:.1} of {:.1} available symbols granted",
               self.frame_id, self.terminals.len(), self.accepted_symbols(), self.available_symbols);
        Ok(())
    }

    fn share_symbols(&mut self, fca_enabled: bool) {
        let available = self.available_symbols;
        let pre_allocated = self.pre_allocated;
        let fits = |level: CcLevel| pre_allocated.at_level(level) <= available + SYMBOL_EPSILON;

        if fits(CcLevel::CraRbdcVbdc) {
            self.accept_requests(CcLevel::CraRbdcVbdc);
            if fca_enabled {
                let left = available - self.pre_allocated.at_level(CcLevel::CraRbdcVbdc);
                self.share_leftover(ShareKind::FreeVbdc, left);
            }
        } else if fits(CcLevel::CraRbdc) {
            self.accept_requests(CcLevel::CraRbdc);
            let left = available - self.pre_allocated.at_level(CcLevel::CraRbdc);
            self.share_leftover(ShareKind::Vbdc, left);
        } else if fits(CcLevel::CraMinRbdc) {
            self.accept_requests(CcLevel::CraMinRbdc);
            let left = available - self.pre_allocated.at_level(CcLevel::CraMinRbdc);
            self.share_leftover(ShareKind::Rbdc, left);
        } else if fits(CcLevel::Cra) {
            self.accept_requests(CcLevel::Cra);
            let left = available - self.pre_allocated.at_level(CcLevel::Cra);
            self.share_leftover(ShareKind::MinRbdc, left);
        } else {
            let factor = available / self.pre_allocated.cra;
            warn!("Frame {}: CRA of {:.1} symbols exceeds {:.1} available, scaling by {:.3}",
                  self.frame_id, self.pre_allocated.cra, available, factor);
            self.accept_requests(CcLevel::Cra);
            for terminal in self.terminals.values_mut() {
                terminal.allocated_control_symbols *= factor;
                for rc in &mut terminal.allocation {
                    rc.cra *= factor;
                }
            }
        }
    }

    /// Grant every accepted request at a level
    fn accept_requests(&mut self, level: CcLevel) {
        trace!("Frame {}: accepting requests at {:?}", self.frame_id, level);
        for terminal in self.terminals.values_mut() {
            terminal.allocated_control_symbols = terminal.control_symbols;
            terminal.allocation = terminal.request.iter().map(|rc| rc.masked(level)).collect();
        }
    }

    /// Water-fill leftover symbols over reservation categories, smallest request first
    fn share_leftover(&mut self, kind: ShareKind, leftover: f64) {
        let request_of = |terminals: &BTreeMap<TerminalAddress, TerminalAllocation>, (address, rc): &(TerminalAddress, usize)| {
            let request = terminals.get(address).map(|t| t.request[*rc]).unwrap_or_default();
            match kind {
                ShareKind::FreeVbdc | ShareKind::Vbdc => request.vbdc,
                ShareKind::Rbdc => request.rbdc,
                ShareKind::MinRbdc => request.min_rbdc,
            }
        };

        let mut order = self.rc_allocs.clone();
        order.sort_by(|a, b| request_of(&self.terminals, a).total_cmp(&request_of(&self.terminals, b)));

        let max_per_carrier = self.max_symbols_per_carrier();
        let mut left = leftover;
        let mut remaining = order.len();

        for (address, rc) in order {
            if left <= SYMBOL_EPSILON {
                break;
            }
            let Some(terminal) = self.terminals.get_mut(&address) else {
                continue;
            };

            let room = (max_per_carrier - terminal.allocated_symbols()).max(0.0);
            let request = terminal.request[rc];
            let share = (left / remaining as f64).min(room);
            let add = match kind {
                ShareKind::FreeVbdc => share,
                ShareKind::Vbdc => share.min(request.vbdc),
                ShareKind::Rbdc => share.min((request.rbdc - request.min_rbdc).max(0.0)),
                ShareKind::MinRbdc => share.min(request.min_rbdc),
            };

            let allocation = &mut terminal.allocation[rc];
            match kind {
                ShareKind::FreeVbdc | ShareKind::Vbdc => allocation.vbdc += add,
                ShareKind::Rbdc => allocation.rbdc += add,
                ShareKind::MinRbdc => {
                    allocation.min_rbdc += add;
                    allocation.rbdc += add;
                }
            }

            left -= add;
            remaining -= 1;
        }

        trace!("Frame {}: {:?} share left {:.1} of {:.1} symbols", self.frame_id, kind, left, leftover);
    }

    /// Burst length for the next slot.
    ///
    /// The longest burst fitting both the carrier and the symbols left, else
    /// the shortest burst fitting the carrier, else none.
    fn optimal_burst_length(&self, carrier_symbols_left: f64, symbols_left: f64) -> Option<u32> {
        let fitting = self.burst_lengths
            .iter()
            .copied()
            .filter(|&b| b as f64 <= carrier_symbols_left + SYMBOL_EPSILON);

        fitting.clone()
            .filter(|&b| b as f64 <= symbols_left + SYMBOL_EPSILON)
            .max()
            .or_else(|| fitting.min())
    }

    /// Waveform of a slot, always one of `burst_length` symbols
    fn slot_waveform_id(&self, terminal: &TerminalAllocation, burst_length: u32) -> u32 {
        if !self.config_type().uses_acm() {
            return self.frame().default_waveform_id();
        }
        let has_length = |id: u32| {
            self.waveforms.get_waveform(id).is_ok_and(|w| w.burst_length() == burst_length)
        };
        self.waveforms
            .get_best_waveform_id(terminal.cno, self.symbol_rate_baud(), burst_length)
            .map(|selection| selection.id)
            .filter(|&id| has_length(id))
            .or_else(|| self.waveforms.get_most_robust_waveform_id(burst_length))
            .unwrap_or(terminal.waveform_id)
    }

    fn create_slot(
        &self,
        carrier_id: u16,
        offset_symbols: f64,
        waveform_id: u32,
        slot_type: SlotType,
    ) -> Result<(u16, TimeSlotConf), LayerError> {
        let frame = self.frame();
        let index = (offset_symbols / frame.default_burst_length() as f64 + SYMBOL_EPSILON).floor() as u32;
        let time_slot_id = frame.time_slot_id(carrier_id, index);

        let mut slot = if frame.default_waveform_in_use() {
            frame.time_slot(carrier_id, index).cloned().ok_or_else(|| LayerError::InvalidState(
                format!("Frame {} has no slot {} on carrier {}", self.frame_id, index, carrier_id)
            ))?
        } else {
            let start = Duration::from_secs_f64(offset_symbols / frame.symbol_rate_baud());
            TimeSlotConf::new(start, waveform_id, carrier_id, slot_type)
        };
        slot.waveform_id = waveform_id;
        slot.slot_type = slot_type;
        Ok((time_slot_id, slot))
    }

    /// Turn the granted symbols into time slots.
    ///
    /// Terminals, carriers and reservation categories are visited in random
    /// order. With `rc_based` every slot is dedicated to one reservation
    /// category, otherwise the categories of a terminal share its slots.
    pub fn generate_time_slots<R: Rng + ?Sized>(
        &mut self,
        tbtps: &mut Vec<TbtpMessage>,
        max_size_bytes: u32,
        ut_allocs: &mut UtAllocContainer,
        rc_based: bool,
        rng: &mut R,
    ) -> Result<(), LayerError> {
        match self.state {
            AllocatorState::PreAllocated | AllocatorState::SlotsGenerated => {}
            state => return Err(LayerError::InvalidState(
                format!("Frame {} cannot generate slots in state {:?}", self.frame_id, state)
            )),
        }
        self.state = AllocatorState::SlotsGenerated;

        if self.terminals.is_empty() {
            return Ok(());
        }
        if tbtps.is_empty() {
            return Err(LayerError::InvalidState("No TBTP to fill".into()));
        }

        let mut uts: Vec<TerminalAddress> = self.terminals.keys().copied().collect();
        uts.shuffle(rng);
        let mut carriers = self.selected_carriers.clone();
        carriers.shuffle(rng);
        let mut cursor = CarrierCursor { carriers, index: 0, used_symbols: 0.0 };

        let max_per_carrier = self.max_symbols_per_carrier();
        let control_waveform = self.waveforms.get_waveform(self.most_robust_waveform_id)?;

        'terminals: for address in uts {
            let Some(terminal) = self.terminals.get(&address) else {
                continue;
            };
            let mut rc_order: Vec<usize> = (0..terminal.allocation.len()).collect();
            rc_order.shuffle(rng);

            let info = ut_allocs
                .entry(address)
                .or_insert_with(|| UtAllocInfo::new(terminal.allocation.len()));

            if terminal.generate_control_slot
                && terminal.allocated_control_symbols + SYMBOL_EPSILON >= control_waveform.burst_length() as f64
            {
                let burst = control_waveform.burst_length() as f64;
                while cursor.current().is_some()
                    && max_per_carrier - cursor.used_symbols + SYMBOL_EPSILON < burst
                {
                    cursor.advance();
                }
                let Some(carrier_id) = cursor.current() else { break 'terminals };

                let (time_slot_id, slot) = self.create_slot(
                    carrier_id, cursor.used_symbols, control_waveform.id(), SlotType::Control,
                )?;
                push_da_slot(tbtps, max_size_bytes, address, DaTimeSlot {
                    frame_id: self.frame_id,
                    time_slot_id,
                    slot,
                })?;
                info.control_bytes += control_waveform.payload_bytes();
                info.control_slot = true;
                cursor.used_symbols += burst;
            }

            // Symbol pools: one per category, or one per terminal
            let pools: Vec<Vec<(usize, f64)>> = if rc_based {
                rc_order.iter().map(|&rc| vec![(rc, terminal.allocation[rc].total())]).collect()
            } else {
                vec![rc_order.iter().map(|&rc| (rc, terminal.allocation[rc].total())).collect()]
            };

            for mut pool in pools {
                let mut left: f64 = pool.iter().map(|(_, s)| s).sum();
                let mut position = 0;

                while left > SYMBOL_EPSILON {
                    let Some(carrier_id) = cursor.current() else { break 'terminals };
                    let carrier_left = max_per_carrier - cursor.used_symbols;
                    let Some(burst) = self.optimal_burst_length(carrier_left, left) else {
                        cursor.advance();
                        continue;
                    };

                    while position + 1 < pool.len() && pool[position].1 <= SYMBOL_EPSILON {
                        position += 1;
                    }
                    let rc = pool[position].0;

                    let waveform_id = self.slot_waveform_id(terminal, burst);
                    let payload = self.waveforms.get_waveform(waveform_id)?.payload_bytes();
                    let (time_slot_id, mut slot) = self.create_slot(
                        carrier_id, cursor.used_symbols, waveform_id, SlotType::Traffic,
                    )?;
                    if rc_based {
                        slot.rc_index = Some(rc as u8);
                    }
                    push_da_slot(tbtps, max_size_bytes, address, DaTimeSlot {
                        frame_id: self.frame_id,
                        time_slot_id,
                        slot,
                    })?;
                    info.bytes_per_rc[rc] += payload;

                    // Consume the burst from the categories in pool order
                    let mut consume = burst as f64;
                    let mut index = position;
                    while consume > 0.0 && index < pool.len() {
                        let take = pool[index].1.min(consume);
                        pool[index].1 -= take;
                        consume -= take;
                        index += 1;
                    }

                    cursor.used_symbols += burst as f64;
                    left -= burst as f64;
                }
            }
        }

        debug!("Frame {}: slots generated for {} terminals into {} TBTP(s)",
               self.frame_id, self.terminals.len(), tbtps.len());
        Ok(())
    }
}
