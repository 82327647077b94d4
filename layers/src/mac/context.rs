//! Return Link Context
//!
//! Shared, read-only configuration of the return link: the superframe
//! sequences and the waveform catalog, plus superframe timing helpers.

use crate::phy::superframe::SuperframeConf;
use crate::phy::waveform::WaveformCatalog;
use crate::LayerError;
use std::sync::Arc;
use std::time::Duration;

/// Return link configuration shared by every scheduler of the hub
#[derive(Debug, Clone)]
pub struct RtnLinkContext {
    superframes: Vec<Arc<SuperframeConf>>,
    waveforms: Arc<WaveformCatalog>,
}

impl RtnLinkContext {
    /// Build a context, one superframe configuration per sequence id
    pub fn new(superframes: Vec<SuperframeConf>, waveforms: WaveformCatalog) -> Result<Self, LayerError> {
        if superframes.is_empty() {
            return Err(LayerError::InvalidConfiguration(
                "at least one superframe sequence is required".to_string(),
            ));
        }
        if superframes.iter().any(|sf| sf.duration().is_zero()) {
            return Err(LayerError::InvalidConfiguration(
                "superframe duration must be positive".to_string(),
            ));
        }

        Ok(Self {
            superframes: superframes.into_iter().map(Arc::new).collect(),
            waveforms: Arc::new(waveforms),
        })
    }

    pub fn superframe_sequence_count(&self) -> usize {
        self.superframes.len()
    }

    pub fn superframe(&self, seq_id: u8) -> Result<&Arc<SuperframeConf>, LayerError> {
        self.superframes.get(seq_id as usize).ok_or_else(|| {
            LayerError::InvalidConfiguration(format!("unknown superframe sequence {}", seq_id))
        })
    }

    pub fn waveforms(&self) -> &Arc<WaveformCatalog> {
        &self.waveforms
    }

    pub fn superframe_duration(&self, seq_id: u8) -> Result<Duration, LayerError> {
        Ok(self.superframe(seq_id)?.duration())
    }

    /// Superframe counter running at `elapsed` since the epoch
    pub fn superframe_count(&self, seq_id: u8, elapsed: Duration) -> Result<u64, LayerError> {
        let duration = self.superframe_duration(seq_id)?;
        Ok((elapsed.as_nanos() / duration.as_nanos()) as u64)
    }

    /// Counter of the first superframe starting after `elapsed`
    pub fn next_superframe_count(&self, seq_id: u8, elapsed: Duration) -> Result<u64, LayerError> {
        Ok(self.superframe_count(seq_id, elapsed)? + 1)
    }

    pub fn superframe_start_time(&self, seq_id: u8, count: u64) -> Result<Duration, LayerError> {
        let duration = self.superframe_duration(seq_id)?;
        let nanos = duration.as_nanos().saturating_mul(count as u128);
        Ok(Duration::from_nanos(nanos.min(u64::MAX as u128) as u64))
    }

    pub fn next_superframe_start_time(&self, seq_id: u8, elapsed: Duration) -> Result<Duration, LayerError> {
        let count = self.next_superframe_count(seq_id, elapsed)?;
        self.superframe_start_time(seq_id, count)
    }

    /// Time a terminal starts transmitting superframe `count`
    pub fn superframe_tx_time(&self, seq_id: u8, count: u64, timing_advance: Duration) -> Result<Duration, LayerError> {
        Ok(self.superframe_start_time(seq_id, count)?.saturating_sub(timing_advance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::superframe::SuperframeParams;
    use crate::phy::waveform::WaveformCatalogConfig;

    fn context() -> RtnLinkContext {
        let waveforms = WaveformCatalog::dvb_rcs2(WaveformCatalogConfig::default()).unwrap();
        let params = SuperframeParams::preset(0).unwrap();
        let superframe = SuperframeConf::configure(&params, params.used_bandwidth_hz(), &waveforms).unwrap();
        RtnLinkContext::new(vec![superframe], waveforms).unwrap()
    }

    #[test]
    fn test_superframe_timing() {
        let ctx = context();
        let duration = ctx.superframe_duration(0).unwrap();
        assert!(!duration.is_zero());

        assert_eq!(ctx.superframe_count(0, Duration::ZERO).unwrap(), 0);
        assert_eq!(ctx.superframe_count(0, duration * 3 + duration / 2).unwrap(), 3);
        assert_eq!(ctx.next_superframe_count(0, duration * 3).unwrap(), 4);
        assert_eq!(ctx.superframe_start_time(0, 4).unwrap(), duration * 4);
        assert_eq!(ctx.next_superframe_start_time(0, duration / 2).unwrap(), duration);
    }

    #[test]
    fn test_tx_time_saturates() {
        let ctx = context();
        let duration = ctx.superframe_duration(0).unwrap();
        let advance = Duration::from_millis(5);
        assert_eq!(ctx.superframe_tx_time(0, 2, advance).unwrap(), duration * 2 - advance);
        assert_eq!(ctx.superframe_tx_time(0, 0, advance).unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_unknown_sequence() {
        let ctx = context();
        assert_eq!(ctx.superframe_sequence_count(), 1);
        assert!(ctx.superframe(1).is_err());
        assert!(ctx.superframe_duration(3).is_err());
    }
}
