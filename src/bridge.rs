//! Actuation bridge
//!
//! Mirrors the phase state onto the signal hardware and feeds sensor
//! read-backs to the decision loop. Runs on its own task; link failures
//! degrade the hardware-sync status and never reach the decision loop.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::schema::HardwareConfig;
use crate::controller::ControlCommand;
use crate::error::{SensorFrameError, TransportError};
use crate::observability::events::{Event, EventEmitter};
use crate::observability::metrics;
use crate::phase::{Phase, PhaseState};
use crate::transport::{SensorFrame, SerialLink, WireCommand};

/// Whether the hardware shows what the controller decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareSync {
    /// The last command write succeeded
    Synced,
    /// The last write or read failed
    Degraded,
    /// Software-only mode, no link attached
    Disabled,
}

impl std::fmt::Display for HardwareSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Synced => "synced",
            Self::Degraded => "degraded",
            Self::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

/// Drives the signal link from the phase watch channel.
pub struct ActuationBridge {
    link: Option<Box<dyn SerialLink>>,
    config: HardwareConfig,
    phase: watch::Receiver<PhaseState>,
    sensors: mpsc::Sender<ControlCommand>,
    status: watch::Sender<HardwareSync>,
    events: Arc<EventEmitter>,
    last_sent: Option<WireCommand>,
}

impl std::fmt::Debug for ActuationBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActuationBridge")
            .field("link", &self.link.as_ref().map(|l| l.link_type()))
            .field("status", &*self.status.borrow())
            .field("last_sent", &self.last_sent)
            .finish_non_exhaustive()
    }
}

impl ActuationBridge {
    /// Creates a bridge. With no link the status is
    /// [`HardwareSync::Disabled`] for the life of the bridge.
    #[must_use]
    pub fn new(
        link: Option<Box<dyn SerialLink>>,
        config: &HardwareConfig,
        phase: watch::Receiver<PhaseState>,
        sensors: mpsc::Sender<ControlCommand>,
        events: Arc<EventEmitter>,
    ) -> Self {
        let initial = if link.is_some() {
            HardwareSync::Synced
        } else {
            HardwareSync::Disabled
        };
        let (status, _) = watch::channel(initial);
        metrics::set_hardware_sync(initial);
        Self {
            link,
            config: config.clone(),
            phase,
            sensors,
            status,
            events,
            last_sent: None,
        }
    }

    /// Subscribes to hardware-sync changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<HardwareSync> {
        self.status.subscribe()
    }

    /// Current hardware-sync status.
    #[must_use]
    pub fn status(&self) -> HardwareSync {
        *self.status.borrow()
    }

    /// Last command the link accepted.
    #[must_use]
    pub const fn last_sent(&self) -> Option<WireCommand> {
        self.last_sent
    }

    /// Runs until cancelled or the phase channel closes, then writes
    /// all-red as a best effort.
    pub async fn run(mut self, cancel: CancellationToken) {
        if self.link.is_none() {
            info!("no signal link; running software-only");
            cancel.cancelled().await;
            return;
        }

        let mut ticker = tokio::time::interval(self.config.actuation_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let start = Instant::now();
        let mut next_resend = self.config.resend_interval.map(|d| start + d);
        let mut next_poll = self.config.sensor_poll_interval.map(|d| start + d);

        let initial = self.phase.borrow_and_update().current;
        self.sync_phase(initial).await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                changed = self.phase.changed() => {
                    if changed.is_err() {
                        debug!("phase channel closed; stopping bridge");
                        break;
                    }
                    let current = self.phase.borrow_and_update().current;
                    self.sync_phase(current).await;
                }
                now = ticker.tick() => {
                    if let (Some(at), Some(every)) = (next_resend, self.config.resend_interval) {
                        if now >= at {
                            let current = self.phase.borrow().current;
                            self.resend(current).await;
                            next_resend = Some(now + every);
                        }
                    }
                    if let (Some(at), Some(every)) = (next_poll, self.config.sensor_poll_interval) {
                        if now >= at {
                            self.poll_sensors().await;
                            next_poll = Some(now + every);
                        }
                    }
                }
            }
        }

        self.write(WireCommand::AllRed).await;
        info!(status = %self.status(), "signal link left at all red");
    }

    /// Brings the link to `phase`, writing any clearance the heads have
    /// not shown yet, and skips the write if the link already shows it.
    ///
    /// The phase watch keeps only the latest value, so a busy bridge can
    /// see NS green followed directly by EW green. The heads still get
    /// yellow and all-red in between.
    pub async fn sync_phase(&mut self, phase: Phase) {
        let command = WireCommand::for_phase(phase);
        if self.last_sent == Some(command) && self.status() == HardwareSync::Synced {
            trace!(%command, "hardware already shows phase");
            return;
        }

        let shown = self.last_sent.and_then(WireCommand::phase);
        for step in clearance_path(shown, phase) {
            if step != phase {
                debug!(%step, target = %phase, "writing skipped clearance phase");
            }
            self.write(WireCommand::for_phase(step)).await;
            if self.status() != HardwareSync::Synced {
                return;
            }
        }
    }

    /// Re-sends the command for `phase`, which the device treats as a
    /// no-op. A phase the link has not accepted yet goes through
    /// [`sync_phase`](Self::sync_phase) instead.
    pub async fn resend(&mut self, phase: Phase) {
        let command = WireCommand::for_phase(phase);
        if self.last_sent != Some(command) {
            // A change the select loop has not handled yet
            self.sync_phase(phase).await;
            return;
        }
        trace!(%command, "idempotent re-send");
        self.write(command).await;
    }

    /// Requests one sensor read-back and forwards the parsed frame.
    pub async fn poll_sensors(&mut self) {
        let Some(link) = self.link.as_ref() else {
            return;
        };
        let write_timeout = self.config.write_timeout;
        let read_timeout = self.config.read_timeout;

        let stale = link.discard_input().await;
        if stale > 0 {
            debug!(stale, "discarded sensor input received before request");
        }

        let request = link.write_command(WireCommand::RequestSensors);
        let requested = match tokio::time::timeout(write_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(write_timeout)),
        };
        if let Err(error) = requested {
            self.degrade(&error);
            return;
        }

        let line = match tokio::time::timeout(read_timeout, link.read_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                self.degrade(&TransportError::ConnectionClosed("sensor read-back".into()));
                return;
            }
            Ok(Err(error)) => {
                self.degrade(&error);
                return;
            }
            Err(_) => {
                // The device may not implement read-back; commands are still in sync
                let error = TransportError::Timeout(read_timeout);
                metrics::record_transport_fault(&error);
                debug!(%error, "no sensor read-back");
                return;
            }
        };

        self.handle_sensor_line(&line);
    }

    fn handle_sensor_line(&self, line: &str) {
        match SensorFrame::parse(line) {
            Ok(frame) => {
                metrics::record_sensor_frame(true);
                trace!(flags = ?frame.flags(), "sensor frame");
                if self.sensors.try_send(ControlCommand::Sensors(frame)).is_err() {
                    debug!("decision loop busy; sensor frame dropped");
                }
            }
            Err(SensorFrameError::Malformed { line, reason }) => {
                metrics::record_sensor_frame(false);
                warn!(%line, %reason, "malformed sensor frame discarded");
                self.events.emit(Event::SensorFrameRejected {
                    timestamp: Utc::now(),
                    line,
                    reason,
                });
            }
        }
    }

    async fn write(&mut self, command: WireCommand) {
        let Some(link) = self.link.as_ref() else {
            return;
        };
        let limit = self.config.write_timeout;
        let result = match tokio::time::timeout(limit, link.write_command(command)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(limit)),
        };

        match result {
            Ok(()) => {
                debug!(%command, "command written");
                self.last_sent = Some(command);
                self.restore();
            }
            Err(error) => self.degrade(&error),
        }
    }

    fn restore(&self) {
        if self.status() == HardwareSync::Synced {
            return;
        }
        info!("signal link back in sync");
        self.publish(HardwareSync::Synced, None);
    }

    fn degrade(&self, error: &TransportError) {
        metrics::record_transport_fault(error);
        if self.status() == HardwareSync::Degraded {
            debug!(%error, "signal link still degraded");
            return;
        }
        warn!(%error, "signal link degraded");
        self.publish(HardwareSync::Degraded, Some(error.to_string()));
    }

    fn publish(&self, status: HardwareSync, error: Option<String>) {
        self.status.send_replace(status);
        metrics::set_hardware_sync(status);
        self.events.emit(Event::HardwareSyncChanged {
            timestamp: Utc::now(),
            status,
            error,
        });
    }
}

/// Phases to write, in order, to take the heads from `shown` to `target`.
///
/// A green only ever leaves through yellow then all-red. With nothing
/// shown yet the target is written directly.
fn clearance_path(shown: Option<Phase>, target: Phase) -> Vec<Phase> {
    let Some(shown) = shown else {
        return vec![target];
    };
    match (shown, target) {
        (from, to) if from == to => vec![to],
        (Phase::AllYellow, to) if !to.is_clearance() => vec![Phase::AllRed, to],
        (from, Phase::AllRed) if !from.is_clearance() => vec![Phase::AllYellow, Phase::AllRed],
        (from, to) if !from.is_clearance() && !to.is_clearance() => {
            vec![Phase::AllYellow, Phase::AllRed, to]
        }
        (_, to) => vec![to],
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use tokio::time::Instant as TokioInstant;

    use super::*;
    use crate::intersection::Direction;
    use crate::transport::emulator::LampState;
    use crate::transport::{LinkType, SignalHeadEmulator};

    fn phase_state(current: Phase) -> PhaseState {
        PhaseState {
            current,
            entered_at: TokioInstant::now(),
            time_in_phase: Duration::ZERO,
            pending: None,
            transitions: 0,
        }
    }

    fn bridge_with(
        link: Option<Box<dyn SerialLink>>,
    ) -> (ActuationBridge, watch::Sender<PhaseState>, mpsc::Receiver<ControlCommand>) {
        let (phase_tx, phase_rx) = watch::channel(phase_state(Phase::AllRed));
        let (tx, rx) = mpsc::channel(4);
        let bridge = ActuationBridge::new(
            link,
            &HardwareConfig::default(),
            phase_rx,
            tx,
            Arc::new(EventEmitter::noop()),
        );
        (bridge, phase_tx, rx)
    }

    /// Link whose writes fail while `broken` is set.
    struct FlakyLink {
        broken: Arc<AtomicBool>,
        inner: SignalHeadEmulator,
    }

    #[async_trait::async_trait]
    impl SerialLink for FlakyLink {
        async fn write_command(&self, command: WireCommand) -> crate::transport::Result<()> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(TransportError::ConnectionClosed("unplugged".into()));
            }
            self.inner.write_command(command).await
        }

        async fn read_line(&self) -> crate::transport::Result<Option<String>> {
            self.inner.read_line().await
        }

        fn link_type(&self) -> LinkType {
            LinkType::Emulated
        }
    }

    #[tokio::test]
    async fn test_ns_to_ew_writes_yellow_red_green() {
        let emulator = SignalHeadEmulator::new(500);
        let (mut bridge, _phase, _rx) = bridge_with(Some(Box::new(emulator.clone())));

        for phase in [Phase::NsGreen, Phase::AllYellow, Phase::AllRed, Phase::EwGreen] {
            bridge.sync_phase(phase).await;
        }

        assert_eq!(emulator.received(), b"0231");
        assert_eq!(bridge.status(), HardwareSync::Synced);
    }

    #[test]
    fn test_clearance_path_never_skips_yellow_or_red() {
        use Phase::{AllRed, AllYellow, EwGreen, NsGreen};

        assert_eq!(clearance_path(None, EwGreen), vec![EwGreen]);
        assert_eq!(clearance_path(Some(NsGreen), AllYellow), vec![AllYellow]);
        assert_eq!(clearance_path(Some(NsGreen), AllRed), vec![AllYellow, AllRed]);
        assert_eq!(
            clearance_path(Some(NsGreen), EwGreen),
            vec![AllYellow, AllRed, EwGreen]
        );
        assert_eq!(clearance_path(Some(AllYellow), NsGreen), vec![AllRed, NsGreen]);
        assert_eq!(clearance_path(Some(AllRed), NsGreen), vec![NsGreen]);
        assert_eq!(clearance_path(Some(EwGreen), EwGreen), vec![EwGreen]);
    }

    #[tokio::test]
    async fn test_green_to_opposite_green_writes_clearance() {
        let emulator = SignalHeadEmulator::new(500);
        let (mut bridge, _phase, _rx) = bridge_with(Some(Box::new(emulator.clone())));

        bridge.sync_phase(Phase::NsGreen).await;
        bridge.sync_phase(Phase::EwGreen).await;

        assert_eq!(emulator.received(), b"0231");
    }

    #[tokio::test]
    async fn test_resend_of_unwritten_phase_goes_through_clearance() {
        let emulator = SignalHeadEmulator::new(500);
        let (mut bridge, _phase, _rx) = bridge_with(Some(Box::new(emulator.clone())));

        bridge.sync_phase(Phase::EwGreen).await;
        bridge.resend(Phase::NsGreen).await;

        assert_eq!(emulator.received(), b"1230");
    }

    #[tokio::test]
    async fn test_unchanged_phase_is_not_rewritten() {
        let emulator = SignalHeadEmulator::new(500);
        let (mut bridge, _phase, _rx) = bridge_with(Some(Box::new(emulator.clone())));
        bridge.sync_phase(Phase::NsGreen).await;
        bridge.sync_phase(Phase::NsGreen).await;
        assert_eq!(emulator.received(), b"0");

        bridge.resend(Phase::NsGreen).await;
        assert_eq!(emulator.received(), b"00");
    }

    #[tokio::test]
    async fn test_sensor_poll_forwards_frame() {
        let emulator = SignalHeadEmulator::new(500);
        emulator.set_reading(Direction::North, 900);
        let (mut bridge, _phase, mut rx) = bridge_with(Some(Box::new(emulator.clone())));

        bridge.poll_sensors().await;

        let Some(ControlCommand::Sensors(frame)) = rx.recv().await else {
            panic!("expected sensor frame");
        };
        assert!(frame.is_present(Direction::North));
        assert!(!frame.is_present(Direction::South));
        assert_eq!(emulator.received(), b"9");
    }

    #[tokio::test]
    async fn test_poll_ignores_reply_to_earlier_request() {
        let emulator = SignalHeadEmulator::new(500);
        // Answer to a request whose read timed out
        emulator.receive_byte(b'9');
        emulator.set_reading(Direction::East, 900);
        let (mut bridge, _phase, mut rx) = bridge_with(Some(Box::new(emulator.clone())));

        bridge.poll_sensors().await;

        let Some(ControlCommand::Sensors(frame)) = rx.recv().await else {
            panic!("expected sensor frame");
        };
        assert!(frame.is_present(Direction::East));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_discarded() {
        let (bridge, _phase, mut rx) = bridge_with(None);
        bridge.handle_sensor_line("N:1,S:0\n");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_write_failure_degrades_then_recovers() {
        let broken = Arc::new(AtomicBool::new(true));
        let link = FlakyLink {
            broken: Arc::clone(&broken),
            inner: SignalHeadEmulator::new(500),
        };
        let (mut bridge, _phase, _rx) = bridge_with(Some(Box::new(link)));
        let mut status = bridge.subscribe();

        bridge.sync_phase(Phase::NsGreen).await;
        assert_eq!(bridge.status(), HardwareSync::Degraded);
        assert!(status.has_changed().unwrap());
        assert_eq!(*status.borrow_and_update(), HardwareSync::Degraded);
        assert_eq!(bridge.last_sent(), None);

        broken.store(false, Ordering::SeqCst);
        bridge.sync_phase(Phase::NsGreen).await;
        assert_eq!(bridge.status(), HardwareSync::Synced);
        assert_eq!(bridge.last_sent(), Some(WireCommand::NsGreen));
    }

    #[tokio::test]
    async fn test_without_link_is_disabled() {
        let (mut bridge, _phase, _rx) = bridge_with(None);
        bridge.sync_phase(Phase::EwGreen).await;
        assert_eq!(bridge.status(), HardwareSync::Disabled);
    }

    /// Link whose sensor read-back answers slower than clearance lasts.
    struct SlowReadback {
        inner: SignalHeadEmulator,
    }

    #[async_trait::async_trait]
    impl SerialLink for SlowReadback {
        async fn write_command(&self, command: WireCommand) -> crate::transport::Result<()> {
            self.inner.write_command(command).await
        }

        async fn read_line(&self) -> crate::transport::Result<Option<String>> {
            tokio::time::sleep(Duration::from_millis(150)).await;
            self.inner.read_line().await
        }

        fn link_type(&self) -> LinkType {
            LinkType::Stream
        }
    }

    #[tokio::test]
    async fn test_slow_readback_still_writes_every_clearance_phase() {
        let emulator = SignalHeadEmulator::new(500);
        let link = SlowReadback {
            inner: emulator.clone(),
        };
        let config = HardwareConfig {
            actuation_interval: Duration::from_millis(5),
            sensor_poll_interval: Some(Duration::from_millis(10)),
            resend_interval: None,
            ..HardwareConfig::default()
        };
        let (phase_tx, phase_rx) = watch::channel(phase_state(Phase::NsGreen));
        let (tx, _rx) = mpsc::channel(16);
        let bridge = ActuationBridge::new(
            Some(Box::new(link)),
            &config,
            phase_rx,
            tx,
            Arc::new(EventEmitter::noop()),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(bridge.run(cancel.clone()));

        for phase in [Phase::AllYellow, Phase::AllRed, Phase::EwGreen] {
            tokio::time::sleep(Duration::from_millis(50)).await;
            phase_tx.send_replace(phase_state(phase));
        }
        for _ in 0..100 {
            if emulator.lamps() == LampState::for_phase(Phase::EwGreen) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        task.await.unwrap();

        let phases: String = emulator
            .received()
            .into_iter()
            .filter(|&b| b != b'9')
            .map(char::from)
            .collect();
        assert!(phases.starts_with("0231"), "wire carried {phases:?}");
        assert!(phases.ends_with('3'));
    }

    #[tokio::test]
    async fn test_run_follows_phase_and_ends_all_red() {
        let emulator = SignalHeadEmulator::new(500);
        let (bridge, phase_tx, _rx) = bridge_with(Some(Box::new(emulator.clone())));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(bridge.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        phase_tx.send_replace(phase_state(Phase::NsGreen));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        task.await.unwrap();

        let received = emulator.received();
        assert_eq!(received.first(), Some(&b'3'));
        assert!(received.contains(&b'0'));
        assert_eq!(received.last(), Some(&b'3'));
    }
}
