//! Lower Layer Service Configuration
//!
//! Per terminal DA service (reservation category) settings: which capacity
//! categories a category may use and its rate limits.

use crate::LayerError;
use bitflags::bitflags;
use common::types::MAX_DA_SERVICES;
use serde::{Deserialize, Serialize};
use tracing::debug;

bitflags! {
    /// Capacity categories enabled for a DA service
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DaServiceFlags: u8 {
        /// Constant rate assignment
        const CONSTANT_ASSIGNMENT = 0b001;
        /// Rate based dynamic capacity
        const RBDC = 0b010;
        /// Volume based dynamic capacity
        const VOLUME = 0b100;
    }
}

/// DA service settings as configured
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaServiceConfig {
    /// Constant rate assignment provided
    #[serde(default)]
    pub constant_assignment_provided: bool,
    /// RBDC requests allowed
    #[serde(default)]
    pub rbdc_allowed: bool,
    /// VBDC requests allowed
    #[serde(default)]
    pub volume_allowed: bool,
    /// Constant service rate (CRA) in kbps
    #[serde(default)]
    pub constant_service_rate_kbps: u32,
    /// Maximum service rate in kbps
    #[serde(default)]
    pub maximum_service_rate_kbps: u32,
    /// Minimum service rate in kbps
    #[serde(default)]
    pub minimum_service_rate_kbps: u32,
    /// Maximum volume backlog in kbytes
    #[serde(default)]
    pub maximum_backlog_kbytes: u32,
}

/// Validated DA service
#[derive(Debug, Clone, PartialEq)]
pub struct DaService {
    flags: DaServiceFlags,
    constant_rate_kbps: u32,
    maximum_rate_kbps: u32,
    minimum_rate_kbps: u32,
    maximum_backlog_kbytes: u32,
}

impl DaService {
    pub fn from_config(config: &DaServiceConfig) -> Result<Self, LayerError> {
        if config.minimum_service_rate_kbps > config.maximum_service_rate_kbps {
            return Err(LayerError::InvalidConfiguration(format!(
                "DA service minimum rate {} kbps above maximum {} kbps",
                config.minimum_service_rate_kbps, config.maximum_service_rate_kbps
            )));
        }

        let mut flags = DaServiceFlags::empty();
        flags.set(DaServiceFlags::CONSTANT_ASSIGNMENT, config.constant_assignment_provided);
        flags.set(DaServiceFlags::RBDC, config.rbdc_allowed);
        flags.set(DaServiceFlags::VOLUME, config.volume_allowed);

        Ok(Self {
            flags,
            constant_rate_kbps: config.constant_service_rate_kbps,
            maximum_rate_kbps: config.maximum_service_rate_kbps,
            minimum_rate_kbps: config.minimum_service_rate_kbps,
            maximum_backlog_kbytes: config.maximum_backlog_kbytes,
        })
    }

    pub fn flags(&self) -> DaServiceFlags {
        self.flags
    }

    pub fn constant_assignment_provided(&self) -> bool {
        self.flags.contains(DaServiceFlags::CONSTANT_ASSIGNMENT)
    }

    pub fn rbdc_allowed(&self) -> bool {
        self.flags.contains(DaServiceFlags::RBDC)
    }

    pub fn volume_allowed(&self) -> bool {
        self.flags.contains(DaServiceFlags::VOLUME)
    }

    pub fn constant_rate_kbps(&self) -> u32 {
        self.constant_rate_kbps
    }

    pub fn maximum_rate_kbps(&self) -> u32 {
        self.maximum_rate_kbps
    }

    pub fn minimum_rate_kbps(&self) -> u32 {
        self.minimum_rate_kbps
    }

    pub fn maximum_backlog_kbytes(&self) -> u32 {
        self.maximum_backlog_kbytes
    }
}

/// Lower layer service settings as configured
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LowerLayerServiceConfig {
    /// DA services in RC index order
    pub da_services: Vec<DaServiceConfig>,
    /// Cycles a dynamic rate request stays fresh
    #[serde(default = "default_persistence")]
    pub dynamic_rate_persistence: u8,
    /// Cycles a volume backlog request stays fresh
    #[serde(default = "default_persistence")]
    pub volume_backlog_persistence: u8,
}

fn default_persistence() -> u8 {
    5
}

impl Default for LowerLayerServiceConfig {
    /// Two services: a 50 kbps CRA service and a VBDC service
    fn default() -> Self {
        Self {
            da_services: vec![
                DaServiceConfig {
                    constant_assignment_provided: true,
                    rbdc_allowed: false,
                    volume_allowed: false,
                    constant_service_rate_kbps: 50,
                    maximum_service_rate_kbps: 200,
                    minimum_service_rate_kbps: 50,
                    maximum_backlog_kbytes: 100,
                },
                DaServiceConfig {
                    constant_assignment_provided: false,
                    rbdc_allowed: false,
                    volume_allowed: true,
                    constant_service_rate_kbps: 50,
                    maximum_service_rate_kbps: 512,
                    minimum_service_rate_kbps: 100,
                    maximum_backlog_kbytes: 100,
                },
            ],
            dynamic_rate_persistence: default_persistence(),
            volume_backlog_persistence: default_persistence(),
        }
    }
}

/// Validated lower layer service of a terminal
#[derive(Debug, Clone, PartialEq)]
pub struct LowerLayerService {
    da_services: Vec<DaService>,
    dynamic_rate_persistence: u8,
    volume_backlog_persistence: u8,
}

impl LowerLayerService {
    pub fn new(config: &LowerLayerServiceConfig) -> Result<Self, LayerError> {
        let count = config.da_services.len();
        if count == 0 || count > MAX_DA_SERVICES {
            return Err(LayerError::InvalidConfiguration(format!(
                "{} DA services configured, 1..={} supported", count, MAX_DA_SERVICES
            )));
        }

        let da_services = config.da_services
            .iter()
            .map(DaService::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Lower layer service with {} DA services", da_services.len());
        Ok(Self {
            da_services,
            dynamic_rate_persistence: config.dynamic_rate_persistence,
            volume_backlog_persistence: config.volume_backlog_persistence,
        })
    }

    pub fn da_service_count(&self) -> usize {
        self.da_services.len()
    }

    pub fn da_service(&self, rc_index: u8) -> Result<&DaService, LayerError> {
        self.da_services
            .get(rc_index as usize)
            .ok_or(LayerError::InvalidRcIndex(rc_index))
    }

    pub fn dynamic_rate_persistence(&self) -> u8 {
        self.dynamic_rate_persistence
    }

    pub fn volume_backlog_persistence(&self) -> u8 {
        self.volume_backlog_persistence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_service() {
        let lls = LowerLayerService::new(&LowerLayerServiceConfig::default()).unwrap();
        assert_eq!(lls.da_service_count(), 2);
        assert_eq!(lls.dynamic_rate_persistence(), 5);

        let cra = lls.da_service(0).unwrap();
        assert!(cra.constant_assignment_provided());
        assert!(!cra.rbdc_allowed());
        assert_eq!(cra.constant_rate_kbps(), 50);

        let vbdc = lls.da_service(1).unwrap();
        assert_eq!(vbdc.flags(), DaServiceFlags::VOLUME);
        assert!(lls.da_service(2).is_err());
    }

    #[test]
    fn test_service_count_limits() {
        let mut config = LowerLayerServiceConfig::default();
        config.da_services.clear();
        assert!(LowerLayerService::new(&config).is_err());

        let service = LowerLayerServiceConfig::default().da_services[0].clone();
        config.da_services = vec![service; MAX_DA_SERVICES + 1];
        assert!(LowerLayerService::new(&config).is_err());
    }

    #[test]
    fn test_rate_limits_validated() {
        let mut config = LowerLayerServiceConfig::default();
        config.da_services[0].minimum_service_rate_kbps = 300;
        assert!(LowerLayerService::new(&config).is_err());
    }
}
