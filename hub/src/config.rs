//! TOML Configuration of the Hub
//!
//! One file describes the waveforms, the superframe, the beams and the
//! synthetic terminals driven by the simulator.

use anyhow::{bail, Context, Result};
use common::types::{BeamId, CapacityRequestItem, GatewayId, HandoverStrategy, TerminalAddress};
use interfaces::zmq_handler::{SocketType, ZmqConfig};
use layers::mac::{BeamScheduler, BeamSchedulerConfig, LowerLayerService, LowerLayerServiceConfig, Ncc, RtnLinkContext};
use layers::phy::superframe::{SuperframeConf, SuperframeParams};
use layers::phy::waveform::{BlerCurveLinkResults, StaticLinkResults, WaveformCatalog, WaveformCatalogConfig, DVB_RCS2_WAVEFORMS};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HubConfig {
    /// Seed of the slot shuffles
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Cycles to run, forever when absent
    #[serde(default)]
    pub cycles: Option<u64>,
    /// Pending request handling on handover
    #[serde(default = "default_handover_strategy")]
    pub handover_strategy: HandoverStrategy,
    #[serde(default)]
    pub waveforms: WaveformSection,
    pub superframe: SuperframeSection,
    /// Service of every terminal
    #[serde(default)]
    pub lower_layer_service: LowerLayerServiceConfig,
    pub beams: Vec<BeamConfig>,
    #[serde(default)]
    pub terminals: Vec<TerminalProfile>,
    /// ZeroMQ endpoints, no transport when absent
    #[serde(default)]
    pub zmq: Option<ZmqSection>,
}

fn default_seed() -> u64 {
    1
}

fn default_handover_strategy() -> HandoverStrategy {
    HandoverStrategy::ClearIfDifferentGateway
}

/// Waveform catalog source
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WaveformSection {
    #[serde(flatten)]
    pub catalog: WaveformCatalogConfig,
    /// Waveform table, the built-in table when absent
    #[serde(default)]
    pub table_file: Option<PathBuf>,
    /// BLER curves used to derive the C/N0 requirements
    #[serde(default)]
    pub link_results_file: Option<PathBuf>,
}

/// Superframe layout, a preset or explicit frames
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SuperframeSection {
    #[serde(default)]
    pub preset: Option<u8>,
    #[serde(default)]
    pub params: Option<SuperframeParams>,
    /// Bandwidth of the return link, the used bandwidth when absent
    #[serde(default)]
    pub allocated_bandwidth_hz: Option<f64>,
}

/// One beam and its scheduler
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BeamConfig {
    pub beam_id: u32,
    pub gateway_id: u32,
    #[serde(default)]
    pub scheduler: BeamSchedulerConfig,
    /// Steady feeder link C/N0 in dBHz
    #[serde(default)]
    pub feeder_cno_db: Option<f64>,
}

/// Synthetic terminal with a steady demand
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TerminalProfile {
    /// Index the terminal address is derived from
    pub index: u32,
    pub beam_id: u32,
    /// Return link C/N0 in dBHz
    pub cno_db: f64,
    /// Request sent every superframe
    #[serde(default)]
    pub requests: Vec<CapacityRequestItem>,
}

impl TerminalProfile {
    pub fn address(&self) -> TerminalAddress {
        TerminalAddress::from_index(self.index)
    }
}

/// ZeroMQ endpoints
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ZmqSection {
    /// PULL socket receiving terminal reports
    pub report_address: String,
    /// PUB socket publishing TBTPs
    pub tbtp_address: String,
    #[serde(default = "default_hwm")]
    pub hwm: i32,
}

fn default_hwm() -> i32 {
    1000
}

impl ZmqSection {
    pub fn report_config(&self) -> ZmqConfig {
        ZmqConfig {
            socket_type: SocketType::Pull,
            bind_address: self.report_address.clone(),
            hwm: self.hwm,
        }
    }

    pub fn tbtp_config(&self) -> ZmqConfig {
        ZmqConfig {
            socket_type: SocketType::Pub,
            bind_address: self.tbtp_address.clone(),
            hwm: self.hwm,
        }
    }
}

impl SuperframeSection {
    /// Frame layout selected by the section
    pub fn params(&self) -> Result<SuperframeParams> {
        match (self.preset, &self.params) {
            (Some(preset), None) => Ok(SuperframeParams::preset(preset)?),
            (None, Some(params)) => Ok(params.clone()),
            (Some(_), Some(_)) => bail!("Superframe has both a preset and explicit params"),
            (None, None) => bail!("Superframe needs a preset or explicit params"),
        }
    }
}

impl HubConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::from_toml(&text)
            .with_context(|| format!("Invalid configuration {}", path.display()))?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.beams.is_empty() {
            bail!("At least one beam is required");
        }

        let mut beams = HashSet::new();
        for beam in &self.beams {
            if !beams.insert(beam.beam_id) {
                bail!("Beam {} configured twice", beam.beam_id);
            }
        }

        let mut terminals = HashSet::new();
        for terminal in &self.terminals {
            if !terminals.insert(terminal.index) {
                bail!("Terminal {} configured twice", terminal.index);
            }
            if !beams.contains(&terminal.beam_id) {
                bail!("Terminal {} refers to unknown beam {}", terminal.index, terminal.beam_id);
            }
        }
        Ok(())
    }

    fn waveform_catalog(&self) -> Result<WaveformCatalog> {
        let section = &self.waveforms;
        let table = match &section.table_file {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read waveform table {}", path.display()))?,
            None => DVB_RCS2_WAVEFORMS.to_string(),
        };

        let mut catalog = WaveformCatalog::from_table(&table, section.catalog.clone())?;
        match &section.link_results_file {
            Some(path) => {
                let curves = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read link results {}", path.display()))?;
                catalog.initialize_cno_requirements(&BlerCurveLinkResults::parse(&curves)?)?;
            }
            None => catalog.initialize_cno_requirements(&StaticLinkResults::dvb_rcs2())?,
        }
        Ok(catalog)
    }

    /// Waveforms and superframe shared by every beam
    pub fn build_context(&self) -> Result<Arc<RtnLinkContext>> {
        let waveforms = self.waveform_catalog()?;
        let params = self.superframe.params()?;
        let allocated = self.superframe.allocated_bandwidth_hz.unwrap_or_else(|| params.used_bandwidth_hz());
        let superframe = SuperframeConf::configure(&params, allocated, &waveforms)?;

        Ok(Arc::new(RtnLinkContext::new(vec![superframe], waveforms)?))
    }

    /// Beams with the configured terminals logged on
    pub fn build_ncc(&self, context: &Arc<RtnLinkContext>) -> Result<(Ncc, Arc<LowerLayerService>)> {
        let lls = Arc::new(LowerLayerService::new(&self.lower_layer_service)?);
        let mut ncc = Ncc::new(self.handover_strategy);

        for (index, beam) in self.beams.iter().enumerate() {
            let scheduler = BeamScheduler::new(
                BeamId(beam.beam_id),
                GatewayId(beam.gateway_id),
                beam.scheduler.clone(),
                context.clone(),
                self.seed.wrapping_add(index as u64),
            )?;
            ncc.add_beam(scheduler)?;
        }

        for terminal in &self.terminals {
            ncc.add_terminal(BeamId(terminal.beam_id), terminal.address(), lls.clone())
                .with_context(|| format!("Terminal {} rejected by beam {}", terminal.index, terminal.beam_id))?;
        }

        info!("{} beams, {} terminals logged on", ncc.beam_count(), ncc.terminal_count());
        Ok((ncc, lls))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::CapacityCategory;
    use layers::mac::AssignmentFormat;
    use std::time::Duration;

    const MINIMAL: &str = r#"
        [superframe]
        preset = 0

        [[beams]]
        beam_id = 7
        gateway_id = 1
    "#;

    #[test]
    fn test_sample_configuration() {
        let config = HubConfig::from_toml(include_str!("../hub.toml")).unwrap();
        assert_eq!(config.beams.len(), 2);
        assert_eq!(config.terminals.len(), 5);
        assert_eq!(config.lower_layer_service.da_services.len(), 2);
        assert!(config.beams[0].scheduler.allocator.fca_enabled);
        assert_eq!(config.terminals[1].requests[1].category, CapacityCategory::Vbdc);

        let context = config.build_context().unwrap();
        let (ncc, _) = config.build_ncc(&context).unwrap();
        assert_eq!(ncc.beam_count(), 2);
        assert_eq!(ncc.terminal_count(), 5);
        assert_eq!(ncc.terminal_beam(&TerminalAddress::from_index(4)), Some(BeamId(2)));
    }

    #[test]
    fn test_defaults() {
        let config = HubConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.seed, 1);
        assert!(config.cycles.is_none());
        assert!(config.zmq.is_none());
        assert!(!config.waveforms.catalog.acm_enabled);
        assert_eq!(config.handover_strategy, HandoverStrategy::ClearIfDifferentGateway);
        assert_eq!(config.beams[0].scheduler.max_tbtp_size_bytes, 1000);
        assert_eq!(config.beams[0].scheduler.assignment_format, AssignmentFormat::TwoBytes);

        let context = config.build_context().unwrap();
        assert!(context.superframe_duration(0).unwrap() > Duration::ZERO);
    }

    #[test]
    fn test_invalid_configurations() {
        let unknown_beam = format!("{}\n[[terminals]]\nindex = 1\nbeam_id = 3\ncno_db = 70.0\n", MINIMAL);
        assert!(HubConfig::from_toml(&unknown_beam).is_err());

        let no_beams = "beams = []\n[superframe]\npreset = 0\n";
        assert!(HubConfig::from_toml(no_beams).is_err());

        let both = MINIMAL.replace("preset = 0", "preset = 0\n[superframe.params]\nconfig_type = \"Type0\"\ntarget_duration_ms = 100\nframes = []");
        let config = HubConfig::from_toml(&both).unwrap();
        assert!(config.build_context().is_err());

        let unknown_preset = MINIMAL.replace("preset = 0", "preset = 9");
        assert!(HubConfig::from_toml(&unknown_preset).unwrap().build_context().is_err());

        let unknown_format = format!("{}
[beams.scheduler]
assignment_format = 9
", MINIMAL);
        assert!(HubConfig::from_toml(&unknown_format).is_err());

        let narrow_format = format!("{}
[beams.scheduler]
assignment_format = 0
", MINIMAL);
        let config = HubConfig::from_toml(&narrow_format).unwrap();
        let context = config.build_context().unwrap();
        assert!(config.build_ncc(&context).is_err());
    }

    #[test]
    fn test_admission_failure_is_fatal() {
        let mut config = HubConfig::from_toml(MINIMAL).unwrap();
        config.lower_layer_service.da_services[0].constant_service_rate_kbps = 100_000;
        config.terminals.push(TerminalProfile { index: 1, beam_id: 7, cno_db: 70.0, requests: Vec::new() });

        let context = config.build_context().unwrap();
        assert!(config.build_ncc(&context).is_err());
    }
}
