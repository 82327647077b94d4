//! Return Link Frame Structure
//!
//! Bandwidth-time units, time slots and the slot geometry of one frame.

use super::waveform::WaveformCatalog;
use crate::LayerError;
use common::types::{SlotType, MAX_TIME_SLOT_ID};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

/// Kind of carrier bandwidth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarrierBandwidthType {
    /// Bandwidth reserved for the carrier
    Allocated,
    /// Bandwidth occupied by the signal (roll-off removed)
    Occupied,
    /// Bandwidth usable for symbols (roll-off and spacing removed)
    Effective,
}

/// Bandwidth-time unit: one carrier of a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BtuConf {
    allocated_bandwidth_hz: f64,
    occupied_bandwidth_hz: f64,
    effective_bandwidth_hz: f64,
    symbol_rate_baud: f64,
    spreading_factor: u32,
}

impl BtuConf {
    /// Create a BTU from the allocated carrier bandwidth
    pub fn new(bandwidth_hz: f64, roll_off: f64, spacing: f64, spreading_factor: u32) -> Result<Self, LayerError> {
        if bandwidth_hz <= 0.0 || roll_off < 0.0 || spacing < 0.0 || spreading_factor == 0 {
            return Err(LayerError::InvalidConfiguration(format!(
                "Invalid BTU: bandwidth {} Hz, roll-off {}, spacing {}, spreading factor {}",
                bandwidth_hz, roll_off, spacing, spreading_factor
            )));
        }

        let occupied = bandwidth_hz / (1.0 + roll_off);
        let effective = bandwidth_hz / ((1.0 + spacing) * (1.0 + roll_off));

        Ok(Self {
            allocated_bandwidth_hz: bandwidth_hz,
            occupied_bandwidth_hz: occupied,
            effective_bandwidth_hz: effective,
            symbol_rate_baud: effective / spreading_factor as f64,
            spreading_factor,
        })
    }

    pub fn bandwidth_hz(&self, kind: CarrierBandwidthType) -> f64 {
        match kind {
            CarrierBandwidthType::Allocated => self.allocated_bandwidth_hz,
            CarrierBandwidthType::Occupied => self.occupied_bandwidth_hz,
            CarrierBandwidthType::Effective => self.effective_bandwidth_hz,
        }
    }

    pub fn symbol_rate_baud(&self) -> f64 {
        self.symbol_rate_baud
    }

    pub fn spreading_factor(&self) -> u32 {
        self.spreading_factor
    }
}

/// One time slot of a carrier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSlotConf {
    /// Start offset from the beginning of the frame
    pub start_time: Duration,
    /// Waveform of the burst
    pub waveform_id: u32,
    /// In-frame carrier id
    pub carrier_id: u16,
    /// Slot usage
    pub slot_type: SlotType,
    /// Reservation category the slot is dedicated to
    pub rc_index: Option<u8>,
}

impl TimeSlotConf {
    pub fn new(start_time: Duration, waveform_id: u32, carrier_id: u16, slot_type: SlotType) -> Self {
        Self {
            start_time,
            waveform_id,
            carrier_id,
            slot_type,
            rc_index: None,
        }
    }
}

/// Parameters for building one frame
#[derive(Debug, Clone)]
pub struct FrameConfParams {
    /// Total frame bandwidth
    pub bandwidth_hz: f64,
    /// Target frame duration
    pub target_duration: Duration,
    /// Carrier BTU
    pub btu: BtuConf,
    /// Random access frame
    pub random_access: bool,
    /// Logon frame
    pub logon: bool,
    /// Guard time appended to every burst
    pub guard_time: Duration,
    /// Every slot uses the default waveform
    pub default_waveform_in_use: bool,
    /// Reject layouts whose slot ids do not fit a TBTP
    pub check_slot_limit: bool,
    /// Arena index of the frame this one was subdivided from
    pub parent: Option<usize>,
    /// Subdivision depth, 0 for a top-level frame
    pub subdivision_level: u8,
}

/// Slot geometry of one frame
#[derive(Debug, Clone)]
pub struct FrameConf {
    params: FrameConfParams,
    carrier_count: u16,
    slots_per_carrier: u32,
    slot_duration: Duration,
    duration: Duration,
    default_waveform_id: u32,
    default_burst_length: u32,
    max_symbols_per_carrier: u32,
    min_payload_per_carrier_bytes: u32,
    time_slots: Vec<TimeSlotConf>,
}

impl FrameConf {
    /// Lay out the carriers and time slots of a frame
    pub fn new(params: FrameConfParams, waveforms: &WaveformCatalog) -> Result<Self, LayerError> {
        let carrier_bandwidth = params.btu.bandwidth_hz(CarrierBandwidthType::Allocated);
        let carrier_count = (params.bandwidth_hz / carrier_bandwidth + 1e-9).floor() as u32;
        if carrier_count == 0 || carrier_count > u16::MAX as u32 {
            return Err(LayerError::InvalidConfiguration(format!(
                "Frame bandwidth {} Hz holds {} carriers of {} Hz",
                params.bandwidth_hz, carrier_count, carrier_bandwidth
            )));
        }

        let waveform = waveforms.default_waveform()?;
        let symbol_rate = params.btu.symbol_rate_baud();
        let slot_duration = waveform.burst_duration(symbol_rate) + params.guard_time;

        let slots_per_carrier =
            (params.target_duration.as_secs_f64() / slot_duration.as_secs_f64() + 1e-9).floor() as u32;
        if slots_per_carrier == 0 {
            return Err(LayerError::InvalidConfiguration(format!(
                "Target frame duration {:?} is shorter than one time slot ({:?})",
                params.target_duration, slot_duration
            )));
        }

        let total_slots = slots_per_carrier * carrier_count;
        if params.check_slot_limit && total_slots > MAX_TIME_SLOT_ID as u32 + 1 {
            return Err(LayerError::InvalidConfiguration(format!(
                "Frame has {} time slots, ids are limited to {}; reduce carriers or frame duration",
                total_slots, MAX_TIME_SLOT_ID
            )));
        }

        let min_payload_waveform = if params.default_waveform_in_use {
            waveform
        } else {
            let id = waveforms
                .get_most_robust_waveform_id(waveform.burst_length())
                .ok_or_else(|| LayerError::InvalidConfiguration(format!(
                    "No waveform with burst length {}", waveform.burst_length()
                )))?;
            waveforms.get_waveform(id)?
        };

        let mut time_slots = Vec::with_capacity(total_slots as usize);
        for carrier in 0..carrier_count {
            for index in 0..slots_per_carrier {
                time_slots.push(TimeSlotConf::new(
                    slot_duration * index,
                    waveform.id(),
                    carrier as u16,
                    SlotType::ControlOrTraffic,
                ));
            }
        }

        let frame = Self {
            carrier_count: carrier_count as u16,
            slots_per_carrier,
            slot_duration,
            duration: slot_duration * slots_per_carrier,
            default_waveform_id: waveform.id(),
            default_burst_length: waveform.burst_length(),
            max_symbols_per_carrier: slots_per_carrier * waveform.burst_length(),
            min_payload_per_carrier_bytes: slots_per_carrier * min_payload_waveform.payload_bytes(),
            time_slots,
            params,
        };

        debug!("Frame: {} carriers of {} Hz, {} slots per carrier, duration {:?}, {} symbols per carrier",
               frame.carrier_count, carrier_bandwidth, frame.slots_per_carrier,
               frame.duration, frame.max_symbols_per_carrier);
        Ok(frame)
    }

    pub fn bandwidth_hz(&self) -> f64 {
        self.params.bandwidth_hz
    }

    pub fn btu(&self) -> &BtuConf {
        &self.params.btu
    }

    pub fn carrier_bandwidth_hz(&self, kind: CarrierBandwidthType) -> f64 {
        self.params.btu.bandwidth_hz(kind)
    }

    pub fn symbol_rate_baud(&self) -> f64 {
        self.params.btu.symbol_rate_baud()
    }

    pub fn carrier_count(&self) -> u16 {
        self.carrier_count
    }

    /// Centre frequency of a carrier relative to the frame start
    pub fn carrier_frequency_hz(&self, carrier_id: u16) -> f64 {
        let bandwidth = self.carrier_bandwidth_hz(CarrierBandwidthType::Allocated);
        bandwidth * carrier_id as f64 + bandwidth / 2.0
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn slot_duration(&self) -> Duration {
        self.slot_duration
    }

    pub fn slots_per_carrier(&self) -> u32 {
        self.slots_per_carrier
    }

    pub fn time_slot_count(&self) -> u32 {
        self.time_slots.len() as u32
    }

    pub fn default_waveform_id(&self) -> u32 {
        self.default_waveform_id
    }

    pub fn default_burst_length(&self) -> u32 {
        self.default_burst_length
    }

    pub fn default_waveform_in_use(&self) -> bool {
        self.params.default_waveform_in_use
    }

    pub fn max_symbols_per_carrier(&self) -> u32 {
        self.max_symbols_per_carrier
    }

    /// Payload one carrier carries with the most robust waveform
    pub fn min_payload_per_carrier_bytes(&self) -> u32 {
        self.min_payload_per_carrier_bytes
    }

    pub fn is_random_access(&self) -> bool {
        self.params.random_access
    }

    pub fn is_logon(&self) -> bool {
        self.params.logon
    }

    pub fn guard_time(&self) -> Duration {
        self.params.guard_time
    }

    pub fn parent(&self) -> Option<usize> {
        self.params.parent
    }

    pub fn subdivision_level(&self) -> u8 {
        self.params.subdivision_level
    }

    /// Frame-wide time slot id of a carrier slot
    pub fn time_slot_id(&self, carrier_id: u16, index: u32) -> u16 {
        (carrier_id as u32 * self.slots_per_carrier + index) as u16
    }

    pub fn time_slot(&self, carrier_id: u16, index: u32) -> Option<&TimeSlotConf> {
        if carrier_id >= self.carrier_count || index >= self.slots_per_carrier {
            return None;
        }
        self.time_slots.get(self.time_slot_id(carrier_id, index) as usize)
    }

    /// All slots of one carrier, in time order
    pub fn carrier_time_slots(&self, carrier_id: u16) -> &[TimeSlotConf] {
        if carrier_id >= self.carrier_count {
            return &[];
        }
        let start = (carrier_id as u32 * self.slots_per_carrier) as usize;
        let slots = &self.time_slots[start..start + self.slots_per_carrier as usize];
        trace!("Carrier {} has {} slots", carrier_id, slots.len());
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::waveform::WaveformCatalogConfig;

    fn catalog() -> WaveformCatalog {
        WaveformCatalog::dvb_rcs2(WaveformCatalogConfig::default()).unwrap()
    }

    fn params(bandwidth_hz: f64, carrier_hz: f64, target: Duration) -> FrameConfParams {
        FrameConfParams {
            bandwidth_hz,
            target_duration: target,
            btu: BtuConf::new(carrier_hz, 0.2, 0.3, 1).unwrap(),
            random_access: false,
            logon: false,
            guard_time: Duration::ZERO,
            default_waveform_in_use: false,
            check_slot_limit: true,
            parent: None,
            subdivision_level: 0,
        }
    }

    #[test]
    fn test_btu_bandwidths() {
        let btu = BtuConf::new(1.25e6, 0.2, 0.3, 1).unwrap();
        assert!((btu.bandwidth_hz(CarrierBandwidthType::Occupied) - 1.25e6 / 1.2).abs() < 1e-6);
        let effective = 1.25e6 / (1.3 * 1.2);
        assert!((btu.bandwidth_hz(CarrierBandwidthType::Effective) - effective).abs() < 1e-6);
        assert!((btu.symbol_rate_baud() - effective).abs() < 1e-6);

        let spread = BtuConf::new(1.25e6, 0.2, 0.3, 4).unwrap();
        assert!((spread.symbol_rate_baud() - effective / 4.0).abs() < 1e-6);
        assert!(BtuConf::new(0.0, 0.2, 0.3, 1).is_err());
    }

    #[test]
    fn test_frame_slot_layout() {
        let waveforms = catalog();
        let frame = FrameConf::new(params(1.25e6, 125e3, Duration::from_millis(104)), &waveforms).unwrap();

        assert_eq!(frame.carrier_count(), 10);
        let slot = 536.0 / frame.symbol_rate_baud();
        let expected_slots = (0.104 / slot).floor() as u32;
        assert_eq!(frame.slots_per_carrier(), expected_slots);
        assert_eq!(frame.time_slot_count(), expected_slots * 10);
        assert_eq!(frame.max_symbols_per_carrier(), expected_slots * 536);
        // Most robust short waveform carries 14 bytes
        assert_eq!(frame.min_payload_per_carrier_bytes(), expected_slots * 14);
        assert!(frame.duration() <= Duration::from_millis(104));

        let second = frame.time_slot(3, 1).unwrap();
        assert_eq!(second.carrier_id, 3);
        assert_eq!(second.start_time, frame.slot_duration());
        assert_eq!(frame.time_slot_id(3, 1) as u32, 3 * expected_slots + 1);
        assert!(frame.time_slot(10, 0).is_none());
        assert_eq!(frame.carrier_time_slots(9).len(), expected_slots as usize);
        assert!((frame.carrier_frequency_hz(2) - 312.5e3).abs() < 1e-6);
    }

    #[test]
    fn test_frame_too_short_for_a_slot() {
        let waveforms = catalog();
        let result = FrameConf::new(params(1.25e6, 125e3, Duration::from_millis(1)), &waveforms);
        assert!(result.is_err());
    }

    #[test]
    fn test_slot_limit_check() {
        let waveforms = catalog();
        // 40 narrow carriers of a long frame exceed 2048 slot ids
        let mut p = params(5e6, 125e3, Duration::from_millis(500));
        assert!(FrameConf::new(p.clone(), &waveforms).is_err());

        p.check_slot_limit = false;
        assert!(FrameConf::new(p, &waveforms).is_ok());
    }

    #[test]
    fn test_guard_time_lengthens_slots() {
        let waveforms = catalog();
        let plain = FrameConf::new(params(1.25e6, 125e3, Duration::from_millis(104)), &waveforms).unwrap();
        let mut guarded = params(1.25e6, 125e3, Duration::from_millis(104));
        guarded.guard_time = Duration::from_micros(500);
        let guarded = FrameConf::new(guarded, &waveforms).unwrap();
        assert!(guarded.slots_per_carrier() < plain.slots_per_carrier());
    }
}
