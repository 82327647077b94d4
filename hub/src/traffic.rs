//! Synthetic terminal traffic
//!
//! Feeds the configured demand profiles and the reports received over
//! ZeroMQ into the NCC once per superframe.

use crate::config::{BeamConfig, TerminalProfile};
use crate::transport::apply_report;
use common::types::BeamId;
use interfaces::zmq_handler::AsyncZmqHandler;
use layers::mac::{LowerLayerService, Ncc};
use layers::LayerError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Steady demand of the configured terminals and beams
#[derive(Debug, Clone, Default)]
pub struct TrafficProfile {
    pub terminals: Vec<TerminalProfile>,
    /// Feeder link C/N0 per beam, dBHz
    pub feeder_cno: Vec<(BeamId, f64)>,
}

impl TrafficProfile {
    pub fn new(terminals: &[TerminalProfile], beams: &[BeamConfig]) -> Self {
        Self {
            terminals: terminals.to_vec(),
            feeder_cno: beams.iter()
                .filter_map(|b| b.feeder_cno_db.map(|cno| (BeamId(b.beam_id), cno)))
                .collect(),
        }
    }

    /// Send one superframe worth of requests and C/N0 samples.
    ///
    /// Terminals no longer logged on are skipped.
    pub fn inject(&self, ncc: &mut Ncc, now: Duration) {
        for terminal in &self.terminals {
            let address = terminal.address();
            if ncc.terminal_beam(&address).is_none() {
                continue;
            }
            if let Err(e) = ncc.update_terminal_cno(&address, now, terminal.cno_db) {
                warn!("Terminal {}: C/N0 sample rejected: {}", address, e);
            }
            if terminal.requests.is_empty() {
                continue;
            }
            if let Err(e) = ncc.receive_capacity_request(&address, terminal.requests.clone()) {
                warn!("Terminal {}: capacity request rejected: {}", address, e);
            }
        }

        for (beam_id, cno_db) in &self.feeder_cno {
            if let Err(e) = ncc.update_feeder_cno(*beam_id, now, *cno_db) {
                warn!("Beam {}: feeder C/N0 rejected: {}", beam_id, e);
            }
        }
    }
}

/// Drive the terminals every `period` until shutdown
pub async fn drive_terminals(
    ncc: Arc<Mutex<Ncc>>,
    profile: TrafficProfile,
    reports: Option<AsyncZmqHandler>,
    lls: Arc<LowerLayerService>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), LayerError> {
    if period.is_zero() {
        return Err(LayerError::InvalidConfiguration("Traffic period must be positive".into()));
    }

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let start = Instant::now();

    info!("Traffic driver started: {} terminal profiles", profile.terminals.len());

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let received = match &reports {
                    Some(handler) => handler.drain_reports().await.unwrap_or_else(|e| {
                        warn!("Failed to read terminal reports: {}", e);
                        Vec::new()
                    }),
                    None => Vec::new(),
                };

                let now = start.elapsed();
                let mut ncc = ncc.lock().await;
                profile.inject(&mut ncc, now);
                for report in received {
                    debug!("Terminal report: {:?}", report);
                    if let Err(e) = apply_report(&mut ncc, report, now, &lls) {
                        warn!("Terminal report rejected: {}", e);
                    }
                }
            }
        }
    }

    info!("Traffic driver stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use common::types::TerminalAddress;

    const CONFIG: &str = r#"
        [superframe]
        preset = 0

        [[beams]]
        beam_id = 1
        gateway_id = 1
        feeder_cno_db = 90.0

        [[terminals]]
        index = 1
        beam_id = 1
        cno_db = 70.0
        requests = [{ rc_index = 1, category = "vbdc", value = 3000 }]

        [[terminals]]
        index = 2
        beam_id = 1
        cno_db = 65.0
    "#;

    fn setup() -> (HubConfig, Ncc, Arc<LowerLayerService>) {
        let config = HubConfig::from_toml(CONFIG).unwrap();
        let context = config.build_context().unwrap();
        let (ncc, lls) = config.build_ncc(&context).unwrap();
        (config, ncc, lls)
    }

    #[test]
    fn test_injected_demand_is_served() {
        let (config, mut ncc, _) = setup();
        let profile = TrafficProfile::new(&config.terminals, &config.beams);
        assert_eq!(profile.feeder_cno, vec![(BeamId(1), 90.0)]);

        profile.inject(&mut ncc, Duration::ZERO);
        let beam = ncc.beam(BeamId(1)).unwrap();
        assert_eq!(beam.pending_request_count(&TerminalAddress::from_index(1)), Some(1));
        assert_eq!(beam.pending_request_count(&TerminalAddress::from_index(2)), Some(0));

        let outcomes = ncc.run_cycle(Duration::ZERO).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].report.feeder_cno_db, Some(90.0));
        assert!(outcomes[0].report.requested_kbps > 0.0);
    }

    #[test]
    fn test_departed_terminals_skipped() {
        let (config, mut ncc, _) = setup();
        ncc.remove_terminal(&TerminalAddress::from_index(1)).unwrap();

        let profile = TrafficProfile::new(&config.terminals, &config.beams);
        profile.inject(&mut ncc, Duration::ZERO);
        assert!(ncc.beam(BeamId(1)).unwrap().pending_request_count(&TerminalAddress::from_index(1)).is_none());
    }

    #[tokio::test]
    async fn test_driver_stops_on_shutdown() {
        let (config, ncc, lls) = setup();
        let ncc = Arc::new(Mutex::new(ncc));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(drive_terminals(
            ncc.clone(),
            TrafficProfile::new(&config.terminals, &config.beams),
            None,
            lls,
            Duration::from_millis(5),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        assert!(handle.await.unwrap().is_ok());

        let ncc = ncc.lock().await;
        let pending = ncc.beam(BeamId(1)).unwrap().pending_request_count(&TerminalAddress::from_index(1));
        assert!(pending.unwrap() >= 1);
    }
}
