//! Network Control Center
//!
//! Owns the beam schedulers of the hub, routes terminal events to the beam
//! serving the terminal and drives the periodic superframe cycle.

use super::beam_scheduler::{BeamScheduler, CycleOutcome};
use super::lower_layer_service::LowerLayerService;
use super::TbtpSink;
use crate::LayerError;
use common::types::{BeamId, CapacityRequestItem, HandoverStrategy, TerminalAddress};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Beam schedulers of one hub
#[derive(Debug)]
pub struct Ncc {
    beams: BTreeMap<BeamId, BeamScheduler>,
    terminal_beams: HashMap<TerminalAddress, BeamId>,
    handover_strategy: HandoverStrategy,
}

impl Ncc {
    pub fn new(handover_strategy: HandoverStrategy) -> Self {
        Self {
            beams: BTreeMap::new(),
            terminal_beams: HashMap::new(),
            handover_strategy,
        }
    }

    pub fn handover_strategy(&self) -> HandoverStrategy {
        self.handover_strategy
    }

    pub fn add_beam(&mut self, scheduler: BeamScheduler) -> Result<(), LayerError> {
        let beam_id = scheduler.beam_id();
        if self.beams.contains_key(&beam_id) {
            return Err(LayerError::InvalidConfiguration(format!("Beam {} configured twice", beam_id.0)));
        }
        info!("NCC: beam {} added", beam_id.0);
        self.beams.insert(beam_id, scheduler);
        Ok(())
    }

    pub fn beam(&self, beam_id: BeamId) -> Option<&BeamScheduler> {
        self.beams.get(&beam_id)
    }

    pub fn beam_count(&self) -> usize {
        self.beams.len()
    }

    pub fn terminal_count(&self) -> usize {
        self.terminal_beams.len()
    }

    /// Beam currently serving a terminal
    pub fn terminal_beam(&self, address: &TerminalAddress) -> Option<BeamId> {
        self.terminal_beams.get(address).copied()
    }

    fn beam_mut(&mut self, beam_id: BeamId) -> Result<&mut BeamScheduler, LayerError> {
        self.beams.get_mut(&beam_id).ok_or(LayerError::UnknownBeam(beam_id))
    }

    fn serving_beam_mut(&mut self, address: &TerminalAddress) -> Result<&mut BeamScheduler, LayerError> {
        let beam_id = self.terminal_beam(address).ok_or(LayerError::UnknownTerminal(*address))?;
        self.beam_mut(beam_id)
    }

    pub fn add_terminal(&mut self, beam_id: BeamId, address: TerminalAddress, lls: Arc<LowerLayerService>) -> Result<(), LayerError> {
        if self.terminal_beams.contains_key(&address) {
            return Err(LayerError::DuplicateTerminal(address));
        }
        self.beam_mut(beam_id)?.add_terminal(address, lls)?;
        self.terminal_beams.insert(address, beam_id);
        Ok(())
    }

    pub fn remove_terminal(&mut self, address: &TerminalAddress) -> Result<(), LayerError> {
        self.serving_beam_mut(address)?.remove_terminal(address)?;
        self.terminal_beams.remove(address);
        Ok(())
    }

    pub fn receive_capacity_request(&mut self, address: &TerminalAddress, items: Vec<CapacityRequestItem>) -> Result<(), LayerError> {
        self.serving_beam_mut(address)?.receive_capacity_request(address, items)
    }

    pub fn update_terminal_cno(&mut self, address: &TerminalAddress, now: Duration, cno_db: f64) -> Result<(), LayerError> {
        self.serving_beam_mut(address)?.update_terminal_cno(address, now, cno_db)
    }

    pub fn update_feeder_cno(&mut self, beam_id: BeamId, now: Duration, cno_db: f64) -> Result<(), LayerError> {
        self.beam_mut(beam_id)?.update_feeder_cno(now, cno_db);
        Ok(())
    }

    /// Hand a terminal over to another beam
    pub fn move_terminal(&mut self, address: &TerminalAddress, destination: BeamId) -> Result<(), LayerError> {
        let source = self.terminal_beam(address).ok_or(LayerError::UnknownTerminal(*address))?;
        if source == destination {
            debug!("Terminal {} already in beam {}", address, destination.0);
            return Ok(());
        }
        if !self.beams.contains_key(&destination) {
            return Err(LayerError::UnknownBeam(destination));
        }

        let mut source_beam = self.beams.remove(&source).ok_or(LayerError::UnknownBeam(source))?;
        let strategy = self.handover_strategy;
        let result = match self.beams.get_mut(&destination) {
            Some(destination_beam) => source_beam.transfer_terminal_to(address, destination_beam, strategy),
            None => Err(LayerError::UnknownBeam(destination)),
        };
        self.beams.insert(source, source_beam);

        result?;
        self.terminal_beams.insert(*address, destination);
        Ok(())
    }

    /// Schedule the next superframe of every beam.
    ///
    /// A beam whose cycle fails is logged and skipped. The cycle only fails
    /// when no beam could be scheduled.
    pub fn run_cycle(&mut self, now: Duration) -> Result<Vec<CycleOutcome>, LayerError> {
        let mut outcomes = Vec::with_capacity(self.beams.len());
        let mut last_error = None;

        for (beam_id, beam) in self.beams.iter_mut() {
            match beam.schedule_cycle(now) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!("Beam {} cycle failed: {}", beam_id.0, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if outcomes.is_empty() => Err(e),
            _ => Ok(outcomes),
        }
    }
}

/// Run superframe cycles every `period` until shutdown or `max_cycles`.
///
/// Returns the number of cycles run.
pub async fn run_superframe_loop(
    ncc: Arc<Mutex<Ncc>>,
    sink: Arc<dyn TbtpSink>,
    period: Duration,
    max_cycles: Option<u64>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<u64, LayerError> {
    if period.is_zero() {
        return Err(LayerError::InvalidConfiguration("Superframe period must be positive".into()));
    }

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let start = Instant::now();
    let mut cycles = 0u64;

    info!("Superframe loop started, period {:?}", period);

    loop {
        if *shutdown.borrow() || max_cycles.is_some_and(|max| cycles >= max) {
            break;
        }

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() {
                    debug!("Shutdown channel closed");
                    break;
                }
            }
            _ = ticker.tick() => {
                let outcomes = {
                    let mut ncc = ncc.lock().await;
                    ncc.run_cycle(start.elapsed())?
                };
                for outcome in &outcomes {
                    if let Err(e) = sink.publish(outcome).await {
                        error!("Failed to publish beam {} superframe {}: {}",
                               outcome.beam_id.0, outcome.superframe_counter, e);
                        return Err(e);
                    }
                }
                cycles += 1;
            }
        }
    }

    info!("Superframe loop stopped after {} cycles", cycles);
    Ok(cycles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::beam_scheduler::BeamSchedulerConfig;
    use crate::mac::context::RtnLinkContext;
    use crate::mac::lower_layer_service::LowerLayerServiceConfig;
    use crate::phy::superframe::{SuperframeConf, SuperframeParams};
    use crate::phy::waveform::{WaveformCatalog, WaveformCatalogConfig};
    use async_trait::async_trait;
    use common::types::{CapacityCategory, GatewayId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ncc(strategy: HandoverStrategy) -> Ncc {
        let waveforms = WaveformCatalog::dvb_rcs2(WaveformCatalogConfig::default()).unwrap();
        let params = SuperframeParams::preset(0).unwrap();
        let superframe = SuperframeConf::configure(&params, params.used_bandwidth_hz(), &waveforms).unwrap();
        let ctx = Arc::new(RtnLinkContext::new(vec![superframe], waveforms).unwrap());

        let mut ncc = Ncc::new(strategy);
        for (beam, gateway) in [(1, 1), (2, 1), (3, 2)] {
            let scheduler = BeamScheduler::new(
                BeamId(beam), GatewayId(gateway), BeamSchedulerConfig::default(), ctx.clone(), beam as u64,
            ).unwrap();
            ncc.add_beam(scheduler).unwrap();
        }
        ncc
    }

    fn lls() -> Arc<LowerLayerService> {
        Arc::new(LowerLayerService::new(&LowerLayerServiceConfig::default()).unwrap())
    }

    fn vbdc(bytes: u32) -> Vec<CapacityRequestItem> {
        vec![CapacityRequestItem { rc_index: 1, category: CapacityCategory::Vbdc, value: bytes }]
    }

    #[test]
    fn test_terminal_routing() {
        let mut ncc = ncc(HandoverStrategy::AlwaysClear);
        let ut = TerminalAddress::from_index(1);

        assert!(matches!(ncc.add_terminal(BeamId(9), ut, lls()), Err(LayerError::UnknownBeam(_))));
        ncc.add_terminal(BeamId(1), ut, lls()).unwrap();
        assert!(matches!(ncc.add_terminal(BeamId(2), ut, lls()), Err(LayerError::DuplicateTerminal(_))));
        assert_eq!(ncc.terminal_beam(&ut), Some(BeamId(1)));

        ncc.receive_capacity_request(&ut, vbdc(500)).unwrap();
        ncc.update_terminal_cno(&ut, Duration::ZERO, 65.0).unwrap();
        ncc.update_feeder_cno(BeamId(1), Duration::ZERO, 80.0).unwrap();
        assert_eq!(ncc.beam(BeamId(1)).unwrap().pending_request_count(&ut), Some(1));

        let outcomes = ncc.run_cycle(Duration::ZERO).unwrap();
        assert_eq!(outcomes.len(), 3);
        let served = outcomes.iter().find(|o| o.beam_id == BeamId(1)).unwrap();
        assert!(served.allocations[&ut].total_bytes() >= 500);
        assert!(outcomes.iter().filter(|o| o.beam_id != BeamId(1)).all(|o| o.tbtps.is_empty()));

        ncc.remove_terminal(&ut).unwrap();
        assert_eq!(ncc.terminal_count(), 0);
        assert!(ncc.receive_capacity_request(&ut, vbdc(1)).is_err());
    }

    #[test]
    fn test_move_terminal() {
        let mut ncc = ncc(HandoverStrategy::ClearIfDifferentGateway);
        let ut = TerminalAddress::from_index(4);
        ncc.add_terminal(BeamId(1), ut, lls()).unwrap();
        ncc.receive_capacity_request(&ut, vbdc(100)).unwrap();

        ncc.move_terminal(&ut, BeamId(2)).unwrap();
        assert_eq!(ncc.terminal_beam(&ut), Some(BeamId(2)));
        assert!(!ncc.beam(BeamId(1)).unwrap().has_terminal(&ut));
        assert_eq!(ncc.beam(BeamId(2)).unwrap().pending_request_count(&ut), Some(1));

        ncc.move_terminal(&ut, BeamId(3)).unwrap();
        assert_eq!(ncc.beam(BeamId(3)).unwrap().pending_request_count(&ut), Some(0));

        assert!(matches!(ncc.move_terminal(&ut, BeamId(7)), Err(LayerError::UnknownBeam(_))));
        assert_eq!(ncc.terminal_beam(&ut), Some(BeamId(3)));
        assert_eq!(ncc.beam_count(), 3);
    }

    #[test]
    fn test_failing_beam_does_not_stop_others() {
        let mut ncc = ncc(HandoverStrategy::AlwaysClear);
        let ctx = ncc.beam(BeamId(1)).unwrap().context().clone();
        // Large enough for one slot, too small for the random access channel
        let config = BeamSchedulerConfig { max_tbtp_size_bytes: 20, ..Default::default() };
        let broken = BeamScheduler::new(BeamId(4), GatewayId(2), config, ctx, 4).unwrap();
        ncc.add_beam(broken).unwrap();

        let served = TerminalAddress::from_index(1);
        let stuck = TerminalAddress::from_index(2);
        ncc.add_terminal(BeamId(1), served, lls()).unwrap();
        ncc.add_terminal(BeamId(4), stuck, lls()).unwrap();
        ncc.receive_capacity_request(&served, vbdc(500)).unwrap();
        ncc.receive_capacity_request(&stuck, vbdc(500)).unwrap();

        let outcomes = ncc.run_cycle(Duration::ZERO).unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.beam_id != BeamId(4)));
        let beam1 = outcomes.iter().find(|o| o.beam_id == BeamId(1)).unwrap();
        assert!(beam1.allocations[&served].total_bytes() >= 500);

        // Only the failing beam left
        for beam in [1, 2, 3] {
            ncc.beams.remove(&BeamId(beam));
        }
        assert!(ncc.run_cycle(Duration::from_millis(100)).is_err());
    }

    struct CountingSink {
        published: AtomicUsize,
    }

    #[async_trait]
    impl TbtpSink for CountingSink {
        async fn publish(&self, _outcome: &CycleOutcome) -> Result<(), LayerError> {
            self.published.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_superframe_loop_stops_after_max_cycles() {
        let ncc = Arc::new(Mutex::new(ncc(HandoverStrategy::AlwaysClear)));
        let sink = Arc::new(CountingSink { published: AtomicUsize::new(0) });
        let (_tx, rx) = watch::channel(false);

        let cycles = run_superframe_loop(ncc, sink.clone(), Duration::from_millis(1), Some(3), rx)
            .await
            .unwrap();
        assert_eq!(cycles, 3);
        // One outcome per beam and cycle
        assert_eq!(sink.published.load(Ordering::SeqCst), 9);
    }

    #[tokio::test]
    async fn test_superframe_loop_shutdown() {
        let ncc = Arc::new(Mutex::new(ncc(HandoverStrategy::AlwaysClear)));
        let sink = Arc::new(CountingSink { published: AtomicUsize::new(0) });
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_superframe_loop(ncc, sink, Duration::from_millis(1), None, rx));
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();

        let cycles = handle.await.unwrap().unwrap();
        assert!(cycles >= 1);
    }
}
