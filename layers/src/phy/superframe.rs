//! Superframe Configuration
//!
//! A superframe is an arena of frames. Subdivided frames point at the
//! coarser frame they were carved from by arena index. Named presets
//! produce the classic layouts from plain data.

use super::frame_structure::{BtuConf, CarrierBandwidthType, FrameConf, FrameConfParams};
use super::waveform::WaveformCatalog;
use crate::LayerError;
use common::types::ConfigType;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Maximum number of configured frames in a superframe
pub const MAX_FRAME_COUNT: usize = 10;

/// Maximum number of random access channels
pub const MAX_RA_CHANNELS: usize = 255;

/// Description of one configured frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSpec {
    /// Frame bandwidth in Hz
    pub bandwidth_hz: f64,
    /// Carrier bandwidth in Hz
    pub carrier_bandwidth_hz: f64,
    /// Roll-off factor
    #[serde(default = "default_roll_off")]
    pub roll_off: f64,
    /// Carrier spacing factor
    #[serde(default = "default_spacing")]
    pub spacing: f64,
    /// Spreading factor
    #[serde(default = "default_spreading_factor")]
    pub spreading_factor: u32,
    /// Random access frame
    #[serde(default)]
    pub random_access: bool,
    /// Logon frame
    #[serde(default)]
    pub logon: bool,
    /// Guard time per burst in microseconds
    #[serde(default)]
    pub guard_time_us: u64,
}

fn default_roll_off() -> f64 {
    0.2
}

fn default_spacing() -> f64 {
    0.3
}

fn default_spreading_factor() -> u32 {
    1
}

impl FrameSpec {
    /// Frame with default roll-off, spacing and no guard time
    pub fn new(bandwidth_hz: f64, carrier_bandwidth_hz: f64, random_access: bool) -> Self {
        Self {
            bandwidth_hz,
            carrier_bandwidth_hz,
            roll_off: default_roll_off(),
            spacing: default_spacing(),
            spreading_factor: default_spreading_factor(),
            random_access,
            logon: false,
            guard_time_us: 0,
        }
    }
}

/// Superframe parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuperframeParams {
    /// Allocation policy
    pub config_type: ConfigType,
    /// Target duration of every frame in milliseconds
    #[serde(default = "default_target_duration_ms")]
    pub target_duration_ms: u64,
    /// Configured frames
    pub frames: Vec<FrameSpec>,
    /// Maximum carrier subdivision level, configuration type 3 only
    #[serde(default)]
    pub max_subdivision_level: u8,
    /// Reject frames whose slots do not fit TBTP slot ids
    #[serde(default = "default_check_slot_limit")]
    pub check_slot_limit: bool,
}

fn default_target_duration_ms() -> u64 {
    104
}

fn default_check_slot_limit() -> bool {
    true
}

impl SuperframeParams {
    /// Named superframe layouts, one per configuration type
    pub fn preset(index: u8) -> Result<Self, LayerError> {
        let ra = FrameSpec::new(1.25e6, 1.25e6, true);
        let (config_type, frames, max_subdivision_level) = match index {
            0 => (
                ConfigType::Type0,
                vec![ra, FrameSpec::new(5e6, 1.25e6, false), FrameSpec::new(5e6, 1.25e6, false)],
                0,
            ),
            1 => (
                ConfigType::Type1,
                vec![ra, FrameSpec::new(1.25e6, 125e3, false), FrameSpec::new(1.25e6, 125e3, false)],
                0,
            ),
            2 => (
                ConfigType::Type2,
                vec![ra, FrameSpec::new(1.25e6, 125e3, false), FrameSpec::new(1.25e6, 125e3, false)],
                0,
            ),
            3 => (
                ConfigType::Type3,
                vec![ra, FrameSpec::new(5e6, 1.25e6, false)],
                2,
            ),
            4 => {
                let mut logon = ra;
                logon.logon = true;
                (ConfigType::Type4, vec![logon], 0)
            }
            _ => return Err(LayerError::InvalidConfiguration(
                format!("Unknown superframe preset: {}", index)
            )),
        };

        Ok(Self {
            config_type,
            target_duration_ms: default_target_duration_ms(),
            frames,
            max_subdivision_level,
            check_slot_limit: true,
        })
    }

    /// Bandwidth used by the configured frames
    pub fn used_bandwidth_hz(&self) -> f64 {
        self.frames.iter().map(|f| f.bandwidth_hz).sum()
    }
}

/// Random access channel: one carrier of a random access frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaChannel {
    /// Frame id
    pub frame_id: u8,
    /// In-frame carrier id
    pub carrier_id: u16,
    /// Slots in the channel per frame
    pub slot_count: u16,
    /// Bytes the channel carries with the default waveform
    pub payload_bytes: u32,
}

/// Built superframe: frame arena plus random access channels
#[derive(Debug, Clone)]
pub struct SuperframeConf {
    config_type: ConfigType,
    allocated_bandwidth_hz: f64,
    frames: Vec<FrameConf>,
    ra_channels: Vec<RaChannel>,
    duration: Duration,
}

impl SuperframeConf {
    /// Build every frame of the superframe
    pub fn configure(
        params: &SuperframeParams,
        allocated_bandwidth_hz: f64,
        waveforms: &WaveformCatalog,
    ) -> Result<Self, LayerError> {
        if params.frames.is_empty() || params.frames.len() > MAX_FRAME_COUNT {
            return Err(LayerError::InvalidConfiguration(format!(
                "Superframe needs 1..={} frames, got {}", MAX_FRAME_COUNT, params.frames.len()
            )));
        }

        let used = params.used_bandwidth_hz();
        if used > allocated_bandwidth_hz * (1.0 + 1e-9) {
            return Err(LayerError::InvalidConfiguration(format!(
                "Frames use {} Hz, more than the allocated {} Hz", used, allocated_bandwidth_hz
            )));
        }

        if params.max_subdivision_level > 0 && params.config_type != ConfigType::Type3 {
            return Err(LayerError::InvalidConfiguration(
                "Carrier subdivision requires configuration type 3".into()
            ));
        }

        if params.config_type == ConfigType::Type4 && params.frames.iter().any(|f| !f.random_access) {
            return Err(LayerError::InvalidConfiguration(
                "Configuration type 4 allows random access frames only".into()
            ));
        }

        let target_duration = Duration::from_millis(params.target_duration_ms);
        let default_waveform_in_use = params.config_type == ConfigType::Type0;
        let mut frames: Vec<FrameConf> = Vec::new();

        for (index, spec) in params.frames.iter().enumerate() {
            let base = FrameConfParams {
                bandwidth_hz: spec.bandwidth_hz,
                target_duration,
                btu: BtuConf::new(spec.carrier_bandwidth_hz, spec.roll_off, spec.spacing, spec.spreading_factor)?,
                random_access: spec.random_access,
                logon: spec.logon,
                guard_time: Duration::from_micros(spec.guard_time_us),
                default_waveform_in_use,
                check_slot_limit: params.check_slot_limit,
                parent: None,
                subdivision_level: 0,
            };

            let mut parent = frames.len();
            frames.push(FrameConf::new(base.clone(), waveforms).map_err(|e| {
                LayerError::InvalidConfiguration(format!("Frame {}: {}", index, e))
            })?);

            if spec.random_access {
                continue;
            }

            for level in 1..=params.max_subdivision_level {
                let divisor = (1u32 << level) as f64;
                let child = FrameConfParams {
                    btu: BtuConf::new(spec.carrier_bandwidth_hz / divisor, spec.roll_off,
                                      spec.spacing, spec.spreading_factor)?,
                    parent: Some(parent),
                    subdivision_level: level,
                    ..base.clone()
                };
                parent = frames.len();
                frames.push(FrameConf::new(child, waveforms).map_err(|e| {
                    LayerError::InvalidConfiguration(format!("Frame {} subdivision {}: {}", index, level, e))
                })?);
            }
        }

        if frames.len() > u8::MAX as usize + 1 {
            return Err(LayerError::InvalidConfiguration(
                format!("{} frames do not fit 8-bit frame ids", frames.len())
            ));
        }

        let mut ra_channels = Vec::new();
        for (frame_id, frame) in frames.iter().enumerate() {
            if !frame.is_random_access() {
                continue;
            }
            let payload = waveforms.get_waveform(frame.default_waveform_id())?.payload_bytes();
            for carrier_id in 0..frame.carrier_count() {
                ra_channels.push(RaChannel {
                    frame_id: frame_id as u8,
                    carrier_id,
                    slot_count: frame.slots_per_carrier() as u16,
                    payload_bytes: payload * frame.slots_per_carrier(),
                });
            }
        }
        if ra_channels.len() > MAX_RA_CHANNELS {
            return Err(LayerError::InvalidConfiguration(format!(
                "{} random access channels, at most {} supported", ra_channels.len(), MAX_RA_CHANNELS
            )));
        }

        let duration = frames.iter().map(|f| f.duration()).max().unwrap_or_default();

        info!("Superframe {:?}: {} frames, {} RA channels, duration {:?}",
              params.config_type, frames.len(), ra_channels.len(), duration);

        Ok(Self {
            config_type: params.config_type,
            allocated_bandwidth_hz,
            frames,
            ra_channels,
            duration,
        })
    }

    pub fn config_type(&self) -> ConfigType {
        self.config_type
    }

    pub fn allocated_bandwidth_hz(&self) -> f64 {
        self.allocated_bandwidth_hz
    }

    /// Superframe duration: the longest frame
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[FrameConf] {
        &self.frames
    }

    pub fn frame(&self, frame_id: u8) -> Result<&FrameConf, LayerError> {
        self.frames.get(frame_id as usize).ok_or_else(|| LayerError::InvalidConfiguration(
            format!("Frame id {} not configured", frame_id)
        ))
    }

    /// Carriers in the whole superframe
    pub fn carrier_count(&self) -> u32 {
        self.frames.iter().map(|f| f.carrier_count() as u32).sum()
    }

    /// Superframe-wide carrier id of an in-frame carrier
    pub fn carrier_id(&self, frame_id: u8, carrier_id: u16) -> Result<u32, LayerError> {
        let frame = self.frame(frame_id)?;
        if carrier_id >= frame.carrier_count() {
            return Err(LayerError::InvalidConfiguration(
                format!("Carrier {} not in frame {}", carrier_id, frame_id)
            ));
        }
        let preceding: u32 = self.frames[..frame_id as usize]
            .iter()
            .map(|f| f.carrier_count() as u32)
            .sum();
        Ok(preceding + carrier_id as u32)
    }

    /// Frame and in-frame carrier of a superframe-wide carrier id
    pub fn carrier_frame(&self, global_carrier_id: u32) -> Option<(u8, u16)> {
        let mut first = 0u32;
        for (frame_id, frame) in self.frames.iter().enumerate() {
            let count = frame.carrier_count() as u32;
            if global_carrier_id < first + count {
                return Some((frame_id as u8, (global_carrier_id - first) as u16));
            }
            first += count;
        }
        debug!("Carrier {} outside superframe", global_carrier_id);
        None
    }

    /// Carrier bandwidth of a frame
    pub fn carrier_bandwidth_hz(&self, frame_id: u8, kind: CarrierBandwidthType) -> Result<f64, LayerError> {
        Ok(self.frame(frame_id)?.carrier_bandwidth_hz(kind))
    }

    pub fn ra_channels(&self) -> &[RaChannel] {
        &self.ra_channels
    }

    pub fn ra_channel_count(&self) -> usize {
        self.ra_channels.len()
    }

    pub fn ra_channel(&self, index: u8) -> Result<&RaChannel, LayerError> {
        self.ra_channels.get(index as usize).ok_or_else(|| LayerError::InvalidConfiguration(
            format!("Random access channel {} not configured", index)
        ))
    }

    pub fn ra_slot_count(&self, index: u8) -> Result<u16, LayerError> {
        Ok(self.ra_channel(index)?.slot_count)
    }

    pub fn ra_channel_payload_bytes(&self, index: u8) -> Result<u32, LayerError> {
        Ok(self.ra_channel(index)?.payload_bytes)
    }
}
