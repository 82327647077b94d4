//! DAMA Entry
//!
//! Capacity demand of one terminal per reservation category, with the
//! persistence counters that age dynamic requests.

use super::lower_layer_service::LowerLayerService;
use crate::LayerError;
use common::types::{CapacityCategory, CapacityRequestItem};
use common::utils::{kbps_to_bytes, BYTES_IN_KBYTE};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Demand state of one terminal
#[derive(Debug, Clone)]
pub struct DamaEntry {
    lls: Arc<LowerLayerService>,
    dynamic_rate_persistence: u8,
    volume_backlog_persistence: u8,
    rbdc_kbps: Vec<u32>,
    vbdc_bytes: Vec<u32>,
}

impl DamaEntry {
    pub fn new(lls: Arc<LowerLayerService>) -> Self {
        let count = lls.da_service_count();
        Self {
            lls,
            dynamic_rate_persistence: 0,
            volume_backlog_persistence: 0,
            rbdc_kbps: vec![0; count],
            vbdc_bytes: vec![0; count],
        }
    }

    pub fn lower_layer_service(&self) -> &LowerLayerService {
        &self.lls
    }

    pub fn rc_count(&self) -> usize {
        self.lls.da_service_count()
    }

    /// CRA rate of a category, zero when not provided
    pub fn cra_kbps(&self, rc_index: u8) -> Result<u32, LayerError> {
        let service = self.lls.da_service(rc_index)?;
        Ok(if service.constant_assignment_provided() { service.constant_rate_kbps() } else { 0 })
    }

    /// Minimum RBDC rate, only while the dynamic rate is fresh
    pub fn min_rbdc_kbps(&self, rc_index: u8) -> Result<u32, LayerError> {
        let service = self.lls.da_service(rc_index)?;
        if service.rbdc_allowed() && self.dynamic_rate_persistence > 0 {
            Ok(service.minimum_rate_kbps().max(self.cra_kbps(rc_index)?))
        } else {
            Ok(0)
        }
    }

    pub fn rbdc_kbps(&self, rc_index: u8) -> Result<u32, LayerError> {
        self.rbdc_kbps
            .get(rc_index as usize)
            .copied()
            .ok_or(LayerError::InvalidRcIndex(rc_index))
    }

    /// Store a requested rate, keeping CRA + RBDC within the service limits
    pub fn update_rbdc_kbps(&mut self, rc_index: u8, rate_kbps: u32) -> Result<(), LayerError> {
        let service = self.lls.da_service(rc_index)?;
        if !service.rbdc_allowed() {
            trace!("RBDC not allowed for RC {}", rc_index);
            return Ok(());
        }

        let cra = self.cra_kbps(rc_index)?;
        let min_rbdc = self.min_rbdc_kbps(rc_index)?;
        let sum = cra.saturating_add(rate_kbps);
        let rate = if sum < min_rbdc {
            min_rbdc.saturating_sub(cra)
        } else if sum > service.maximum_rate_kbps() {
            service.maximum_rate_kbps().saturating_sub(cra)
        } else {
            rate_kbps
        };

        self.rbdc_kbps[rc_index as usize] = rate;
        Ok(())
    }

    pub fn vbdc_bytes(&self, rc_index: u8) -> Result<u32, LayerError> {
        self.vbdc_bytes
            .get(rc_index as usize)
            .copied()
            .ok_or(LayerError::InvalidRcIndex(rc_index))
    }

    /// Add to the volume backlog
    pub fn update_vbdc_bytes(&mut self, rc_index: u8, bytes: u32) -> Result<(), LayerError> {
        let current = self.vbdc_bytes(rc_index)?;
        self.set_vbdc_bytes(rc_index, current.saturating_add(bytes))
    }

    /// Replace the volume backlog, clamped to the service maximum
    pub fn set_vbdc_bytes(&mut self, rc_index: u8, bytes: u32) -> Result<(), LayerError> {
        let service = self.lls.da_service(rc_index)?;
        if !service.volume_allowed() {
            trace!("VBDC not allowed for RC {}", rc_index);
            return Ok(());
        }

        let max_backlog = BYTES_IN_KBYTE.saturating_mul(service.maximum_backlog_kbytes());
        if bytes > max_backlog {
            debug!("Max volume backlog reached for RC {}: {} bytes", rc_index, max_backlog);
        }
        self.vbdc_bytes[rc_index as usize] = bytes.min(max_backlog);
        Ok(())
    }

    /// Remove served bytes from the backlog
    pub fn decrease_vbdc_bytes(&mut self, rc_index: u8, served_bytes: u32) -> Result<(), LayerError> {
        let current = self.vbdc_bytes(rc_index)?;
        self.vbdc_bytes[rc_index as usize] = current.saturating_sub(served_bytes);
        Ok(())
    }

    /// Apply one capacity request item and refresh its persistence
    pub fn apply_request(&mut self, item: &CapacityRequestItem) -> Result<(), LayerError> {
        match item.category {
            CapacityCategory::Rbdc => {
                self.reset_dynamic_rate_persistence();
                self.update_rbdc_kbps(item.rc_index, item.value)
            }
            CapacityCategory::Vbdc => {
                self.reset_volume_backlog_persistence();
                self.update_vbdc_bytes(item.rc_index, item.value)
            }
            CapacityCategory::Avbdc => {
                self.reset_volume_backlog_persistence();
                self.set_vbdc_bytes(item.rc_index, item.value)
            }
        }
    }

    /// Merge every request received during a cycle.
    ///
    /// RBDC values for one category are summed before being applied, VBDC
    /// adds to the backlog and AVBDC replaces it, in arrival order.
    pub fn apply_requests<'a, I>(&mut self, requests: I) -> Result<(), LayerError>
    where
        I: IntoIterator<Item = &'a [CapacityRequestItem]>,
    {
        let mut rbdc_sum: Vec<Option<u32>> = vec![None; self.rc_count()];

        for items in requests {
            for item in items {
                match item.category {
                    CapacityCategory::Rbdc => {
                        let slot = rbdc_sum
                            .get_mut(item.rc_index as usize)
                            .ok_or(LayerError::InvalidRcIndex(item.rc_index))?;
                        *slot = Some(slot.unwrap_or(0).saturating_add(item.value));
                    }
                    _ => self.apply_request(item)?,
                }
            }
        }

        for (rc_index, sum) in rbdc_sum.into_iter().enumerate() {
            if let Some(rate) = sum {
                self.apply_request(&CapacityRequestItem {
                    rc_index: rc_index as u8,
                    category: CapacityCategory::Rbdc,
                    value: rate,
                })?;
            }
        }
        Ok(())
    }

    pub fn dynamic_rate_persistence(&self) -> u8 {
        self.dynamic_rate_persistence
    }

    pub fn volume_backlog_persistence(&self) -> u8 {
        self.volume_backlog_persistence
    }

    pub fn reset_dynamic_rate_persistence(&mut self) {
        self.dynamic_rate_persistence = self.lls.dynamic_rate_persistence();
    }

    /// Age the dynamic rate by one cycle; a zero counter marks it stale
    pub fn decrement_dynamic_rate_persistence(&mut self) {
        self.dynamic_rate_persistence = self.dynamic_rate_persistence.saturating_sub(1);
    }

    pub fn reset_volume_backlog_persistence(&mut self) {
        self.volume_backlog_persistence = self.lls.volume_backlog_persistence();
    }

    pub fn decrement_volume_backlog_persistence(&mut self) {
        self.volume_backlog_persistence = self.volume_backlog_persistence.saturating_sub(1);
    }

    pub fn is_dynamic_rate_stale(&self) -> bool {
        self.dynamic_rate_persistence == 0
    }

    pub fn is_volume_backlog_stale(&self) -> bool {
        self.volume_backlog_persistence == 0
    }

    /// CRA bytes of all categories over a duration
    pub fn cra_based_bytes(&self, duration: Duration) -> Result<u32, LayerError> {
        let mut total = 0;
        for rc_index in 0..self.rc_count() as u8 {
            total += kbps_to_bytes(self.cra_kbps(rc_index)?, duration);
        }
        Ok(total)
    }

    /// Guaranteed bytes of all categories over a duration, used for admission
    pub fn min_rate_based_bytes(&self, duration: Duration) -> Result<u32, LayerError> {
        let mut total = 0;
        for rc_index in 0..self.rc_count() as u8 {
            let service = self.lls.da_service(rc_index)?;
            let rate = match (service.constant_assignment_provided(), service.rbdc_allowed()) {
                (true, true) => service.minimum_rate_kbps().max(service.constant_rate_kbps()),
                (true, false) => service.constant_rate_kbps(),
                (false, true) => service.minimum_rate_kbps(),
                (false, false) => 0,
            };
            total += kbps_to_bytes(rate, duration);
        }
        Ok(total)
    }

    /// Requested RBDC bytes of all categories over a duration
    pub fn rbdc_based_bytes(&self, duration: Duration) -> u32 {
        self.rbdc_kbps.iter().map(|&rate| kbps_to_bytes(rate, duration)).sum()
    }

    /// Total volume backlog
    pub fn vbdc_based_bytes(&self) -> u32 {
        self.vbdc_bytes.iter().fold(0u32, |total, &bytes| total.saturating_add(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::lower_layer_service::{DaServiceConfig, LowerLayerServiceConfig};

    fn lls() -> Arc<LowerLayerService> {
        let config = LowerLayerServiceConfig {
            da_services: vec![
                DaServiceConfig {
                    constant_assignment_provided: true,
                    rbdc_allowed: true,
                    volume_allowed: false,
                    constant_service_rate_kbps: 20,
                    maximum_service_rate_kbps: 200,
                    minimum_service_rate_kbps: 50,
                    maximum_backlog_kbytes: 0,
                },
                DaServiceConfig {
                    constant_assignment_provided: false,
                    rbdc_allowed: false,
                    volume_allowed: true,
                    constant_service_rate_kbps: 0,
                    maximum_service_rate_kbps: 100,
                    minimum_service_rate_kbps: 0,
                    maximum_backlog_kbytes: 10,
                },
            ],
            dynamic_rate_persistence: 3,
            volume_backlog_persistence: 2,
        };
        Arc::new(LowerLayerService::new(&config).unwrap())
    }

    fn item(rc_index: u8, category: CapacityCategory, value: u32) -> CapacityRequestItem {
        CapacityRequestItem { rc_index, category, value }
    }

    #[test]
    fn test_rbdc_clamped_to_service_limits() {
        let mut entry = DamaEntry::new(lls());
        entry.reset_dynamic_rate_persistence();

        entry.update_rbdc_kbps(0, 10).unwrap();
        // CRA 20 + 10 is below the 50 kbps minimum
        assert_eq!(entry.rbdc_kbps(0).unwrap(), 30);

        entry.update_rbdc_kbps(0, 500).unwrap();
        assert_eq!(entry.rbdc_kbps(0).unwrap(), 180);

        entry.update_rbdc_kbps(0, 100).unwrap();
        assert_eq!(entry.rbdc_kbps(0).unwrap(), 100);

        // RBDC not allowed on RC 1
        entry.update_rbdc_kbps(1, 100).unwrap();
        assert_eq!(entry.rbdc_kbps(1).unwrap(), 0);
        assert!(entry.update_rbdc_kbps(4, 1).is_err());
    }

    #[test]
    fn test_huge_rbdc_request_saturates() {
        let mut entry = DamaEntry::new(lls());
        let huge = [item(0, CapacityCategory::Rbdc, u32::MAX)];
        entry.apply_requests([&huge[..], &huge[..]]).unwrap();
        // Maximum 200 less CRA 20
        assert_eq!(entry.rbdc_kbps(0).unwrap(), 180);
    }

    #[test]
    fn test_rbdc_ceiling_ignores_unprovided_constant_rate() {
        let config = LowerLayerServiceConfig {
            da_services: vec![DaServiceConfig {
                constant_assignment_provided: false,
                rbdc_allowed: true,
                volume_allowed: false,
                constant_service_rate_kbps: 60,
                maximum_service_rate_kbps: 200,
                minimum_service_rate_kbps: 0,
                maximum_backlog_kbytes: 0,
            }],
            ..Default::default()
        };
        let mut entry = DamaEntry::new(Arc::new(LowerLayerService::new(&config).unwrap()));
        entry.reset_dynamic_rate_persistence();
        entry.update_rbdc_kbps(0, 500).unwrap();
        assert_eq!(entry.rbdc_kbps(0).unwrap(), 200);
    }

    #[test]
    fn test_vbdc_backlog() {
        let mut entry = DamaEntry::new(lls());
        entry.update_vbdc_bytes(1, 4000).unwrap();
        entry.update_vbdc_bytes(1, 3000).unwrap();
        assert_eq!(entry.vbdc_bytes(1).unwrap(), 7000);

        entry.update_vbdc_bytes(1, 9000).unwrap();
        assert_eq!(entry.vbdc_bytes(1).unwrap(), 10_000);

        entry.set_vbdc_bytes(1, 1500).unwrap();
        assert_eq!(entry.vbdc_bytes(1).unwrap(), 1500);

        entry.decrease_vbdc_bytes(1, 2000).unwrap();
        assert_eq!(entry.vbdc_bytes(1).unwrap(), 0);

        // Volume not allowed on RC 0
        entry.set_vbdc_bytes(0, 100).unwrap();
        assert_eq!(entry.vbdc_bytes(0).unwrap(), 0);
    }

    #[test]
    fn test_persistence_is_a_staleness_signal() {
        let mut entry = DamaEntry::new(lls());
        assert!(entry.is_dynamic_rate_stale());
        assert_eq!(entry.min_rbdc_kbps(0).unwrap(), 0);

        entry.apply_request(&item(0, CapacityCategory::Rbdc, 100)).unwrap();
        assert_eq!(entry.dynamic_rate_persistence(), 3);
        assert_eq!(entry.min_rbdc_kbps(0).unwrap(), 50);

        for _ in 0..3 {
            entry.decrement_dynamic_rate_persistence();
        }
        assert!(entry.is_dynamic_rate_stale());
        // The stored rate survives
        assert_eq!(entry.rbdc_kbps(0).unwrap(), 100);
        assert_eq!(entry.min_rbdc_kbps(0).unwrap(), 0);

        entry.decrement_dynamic_rate_persistence();
        assert_eq!(entry.dynamic_rate_persistence(), 0);
    }

    #[test]
    fn test_cycle_merge_rules() {
        let mut entry = DamaEntry::new(lls());
        let first = [item(0, CapacityCategory::Rbdc, 40), item(1, CapacityCategory::Vbdc, 1000)];
        let second = [item(0, CapacityCategory::Rbdc, 30), item(1, CapacityCategory::Avbdc, 2500)];
        let third = [item(1, CapacityCategory::Vbdc, 500)];

        entry.apply_requests([&first[..], &second[..], &third[..]]).unwrap();

        // RBDC values sum, AVBDC replaces, VBDC adds
        assert_eq!(entry.rbdc_kbps(0).unwrap(), 70);
        assert_eq!(entry.vbdc_bytes(1).unwrap(), 3000);
        assert_eq!(entry.volume_backlog_persistence(), 2);
    }

    #[test]
    fn test_byte_conversions() {
        let mut entry = DamaEntry::new(lls());
        let duration = Duration::from_millis(100);

        assert_eq!(entry.cra_based_bytes(duration).unwrap(), 250);
        // max(min 50, CRA 20) on RC 0, nothing on RC 1
        assert_eq!(entry.min_rate_based_bytes(duration).unwrap(), 625);

        entry.reset_dynamic_rate_persistence();
        entry.update_rbdc_kbps(0, 80).unwrap();
        assert_eq!(entry.rbdc_based_bytes(duration), 1000);

        entry.set_vbdc_bytes(1, 1234).unwrap();
        assert_eq!(entry.vbdc_based_bytes(), 1234);
    }
}
