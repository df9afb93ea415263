//! Decision loop
//!
//! The [`Controller`] owns every piece of mutable control state and is the
//! only code that calls into the phase machine. Each tick it drains pending
//! commands, runs the clearance sequence, updates the emergency override,
//! asks the supervisor for a decision and submits it to the phase machine.
//!
//! Everything outside the loop talks to it through a [`ControllerHandle`]:
//! commands go in over a bounded `mpsc`, state comes out over `watch`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::HardwareSync;
use crate::config::schema::ControllerConfig;
use crate::error::ControlError;
use crate::intersection::{ApproachObservation, Direction, IntersectionState};
use crate::observability::events::{Event, EventEmitter, RunSummary};
use crate::observability::metrics;
use crate::phase::{Phase, PhaseMachine, PhaseState, PhaseTimings, PhaseTransition, RequestOutcome};
use crate::strategy::{Decision, StrategyKind, TickSnapshot};
use crate::supervisor::{EmergencyOverride, EmergencyStatus, SafetySupervisor};
use crate::transport::SensorFrame;

/// Capacity of the command channel into the decision loop.
pub const COMMAND_CAPACITY: usize = 64;

/// Message into the decision loop. Applied at the start of the next tick.
#[derive(Debug)]
pub enum ControlCommand {
    /// Replace the upstream observations, in [`Direction::ALL`] order
    Observations([ApproachObservation; 4]),
    /// Select a strategy; the outcome is sent on `reply` if present
    SelectStrategy {
        /// Strategy to select
        kind: StrategyKind,
        /// Where to report the outcome
        reply: Option<oneshot::Sender<Result<(), ControlError>>>,
    },
    /// Clear a fallback demotion
    ResetFallback,
    /// Sensor presence flags read back from the hardware
    Sensors(SensorFrame),
}

/// Externally visible controller state, published after every tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    /// Ticks executed
    pub tick: u64,
    /// Phase currently shown
    pub phase: Phase,
    /// Last applied decision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    /// Strategy chosen by the operator
    pub selected: StrategyKind,
    /// Strategy actually running
    pub active: StrategyKind,
    /// Whether a fault demoted the supervisor to the timer
    pub demoted: bool,
    /// Direction served by an active emergency override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_direction: Option<Direction>,
    /// Hardware link status
    pub hardware: HardwareSync,
}

/// The decision loop.
pub struct Controller {
    config: Arc<ControllerConfig>,
    intersection: IntersectionState,
    machine: PhaseMachine,
    supervisor: SafetySupervisor,
    emergency: EmergencyOverride,
    events: Arc<EventEmitter>,
    commands: mpsc::Receiver<ControlCommand>,
    status_tx: watch::Sender<ControllerStatus>,
    phase_tx: watch::Sender<PhaseState>,
    hardware: Option<watch::Receiver<HardwareSync>>,
    tick: u64,
    last_decision: Option<Decision>,
    started: Instant,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("tick", &self.tick)
            .field("phase", &self.machine.current())
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a controller in the initial all-red state, entered at `now`.
    #[must_use]
    pub fn new(
        config: Arc<ControllerConfig>,
        supervisor: SafetySupervisor,
        events: Arc<EventEmitter>,
        now: Instant,
    ) -> (Self, ControllerHandle) {
        let machine = PhaseMachine::new(PhaseTimings::from(&config.timing), now);
        let (command_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (phase_tx, phase_rx) = watch::channel(machine.state(now));
        let (status_tx, status_rx) = watch::channel(ControllerStatus {
            tick: 0,
            phase: machine.current(),
            decision: None,
            selected: supervisor.selected(),
            active: supervisor.active(),
            demoted: supervisor.is_demoted(),
            override_direction: None,
            hardware: HardwareSync::Disabled,
        });
        metrics::set_current_phase(machine.current());

        let controller = Self {
            emergency: EmergencyOverride::new(&config.emergency),
            config,
            intersection: IntersectionState::new(),
            machine,
            supervisor,
            events,
            commands,
            status_tx,
            phase_tx,
            hardware: None,
            tick: 0,
            last_decision: None,
            started: now,
        };
        let handle = ControllerHandle {
            commands: command_tx,
            status: status_rx,
            phase: phase_rx,
        };
        (controller, handle)
    }

    /// Reports hardware status from the bridge in [`ControllerStatus`].
    pub fn attach_hardware(&mut self, status: watch::Receiver<HardwareSync>) {
        self.hardware = Some(status);
    }

    /// Phase currently shown.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.machine.current()
    }

    /// Supervisor state, for inspection.
    #[must_use]
    pub const fn supervisor(&self) -> &SafetySupervisor {
        &self.supervisor
    }

    /// Runs one decision tick at `now` and returns the applied decision.
    pub async fn tick(&mut self, now: Instant) -> Decision {
        let started = Instant::now();
        self.tick += 1;

        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }

        if let Some(transition) = self.machine.advance(now) {
            self.on_transition(transition);
        }

        let observations = self.intersection.snapshot();
        let emergency = self.emergency.update(&observations);
        self.on_emergency(emergency);

        let snapshot = TickSnapshot {
            tick: self.tick,
            at: now,
            observations,
            phase: self.machine.state(now),
        };
        let decision = self.supervisor.supervise(&snapshot, emergency.axis()).await;

        match self.machine.request_phase(decision.target, decision.force, now) {
            Ok(RequestOutcome::Started(transition)) => self.on_transition(transition),
            Ok(outcome) => {
                debug!(tick = self.tick, target = %decision.target, ?outcome, "phase request");
            }
            Err(rejected) => {
                debug!(
                    tick = self.tick,
                    target = %decision.target,
                    %rejected,
                    "phase request rejected"
                );
            }
        }

        self.record_decision(decision);
        self.publish(now, emergency);
        metrics::record_tick(started.elapsed());
        decision
    }

    /// Ticks every `timing.tick` until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) -> RunSummary {
        let mut interval = tokio::time::interval(self.config.timing.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            strategy = %self.supervisor.selected(),
            tick = ?self.config.timing.tick,
            "controller started"
        );
        self.events.emit(Event::ControllerStarted {
            timestamp: Utc::now(),
            strategy: self.supervisor.selected(),
            tick_ms: u64::try_from(self.config.timing.tick.as_millis()).unwrap_or(u64::MAX),
            hardware: self.hardware.is_some(),
        });

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                at = interval.tick() => {
                    self.tick(at).await;
                }
            }
        }

        let summary = self.summary(Instant::now());
        info!(%summary, "controller stopped");
        summary
    }

    /// Statistics for the run so far.
    #[must_use]
    pub fn summary(&self, now: Instant) -> RunSummary {
        RunSummary {
            ticks: self.tick,
            phase_transitions: self.machine.state(now).transitions,
            strategy_faults: self.supervisor.faults(),
            overrides: self.emergency.activations(),
            uptime_secs: now.saturating_duration_since(self.started).as_secs_f64(),
        }
    }

    fn apply(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Observations(observations) => {
                self.intersection.update_all(observations);
            }
            ControlCommand::SelectStrategy { kind, reply } => {
                let result = self.supervisor.select(kind);
                if let Err(error) = &result {
                    warn!(strategy = %kind, %error, "strategy selection refused");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            ControlCommand::ResetFallback => {
                self.supervisor.reset();
            }
            ControlCommand::Sensors(frame) => {
                self.intersection.apply_sensor_frame(&frame);
            }
        }
    }

    fn on_transition(&self, transition: PhaseTransition) {
        metrics::record_phase_transition(transition.from, transition.to);
        self.events.emit(Event::PhaseEntered {
            timestamp: Utc::now(),
            tick: self.tick,
            from: transition.from,
            to: transition.to,
            reason: transition.reason,
        });
    }

    fn on_emergency(&self, status: EmergencyStatus) {
        match status {
            EmergencyStatus::Activated { direction } => {
                metrics::set_override_active(true);
                self.events.emit(Event::OverrideActivated {
                    timestamp: Utc::now(),
                    tick: self.tick,
                    direction,
                    axis: direction.axis(),
                });
            }
            EmergencyStatus::Cleared {
                direction,
                quiet_ticks,
            } => {
                metrics::set_override_active(false);
                self.events.emit(Event::OverrideCleared {
                    timestamp: Utc::now(),
                    tick: self.tick,
                    direction,
                    quiet_ticks,
                });
            }
            EmergencyStatus::Inactive | EmergencyStatus::Active { .. } => {}
        }
    }

    fn record_decision(&mut self, decision: Decision) {
        metrics::record_decision(decision.source);
        let changed = self
            .last_decision
            .is_none_or(|last| last.target != decision.target || last.source != decision.source);
        if changed {
            debug!(
                tick = self.tick,
                target = %decision.target,
                source = %decision.source,
                confidence = decision.confidence,
                "decision changed"
            );
            self.events.emit(Event::DecisionChanged {
                timestamp: Utc::now(),
                tick: self.tick,
                target: decision.target,
                source: decision.source,
                confidence: decision.confidence,
            });
        }
        self.last_decision = Some(decision);
    }

    fn publish(&self, now: Instant, emergency: EmergencyStatus) {
        let state = self.machine.state(now);
        // Time in phase changes every tick; only wake the bridge on a transition
        self.phase_tx.send_if_modified(|previous| {
            let transitioned =
                previous.current != state.current || previous.transitions != state.transitions;
            *previous = state;
            transitioned
        });

        self.status_tx.send_replace(ControllerStatus {
            tick: self.tick,
            phase: state.current,
            decision: self.last_decision,
            selected: self.supervisor.selected(),
            active: self.supervisor.active(),
            demoted: self.supervisor.is_demoted(),
            override_direction: emergency.direction(),
            hardware: self
                .hardware
                .as_ref()
                .map_or(HardwareSync::Disabled, |rx| *rx.borrow()),
        });
    }
}

/// Cloneable handle to a running [`Controller`].
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<ControlCommand>,
    status: watch::Receiver<ControllerStatus>,
    phase: watch::Receiver<PhaseState>,
}

impl ControllerHandle {
    /// Selects a strategy, effective from the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::StrategyUnavailable`] if the strategy is not
    /// configured, or [`ControlError::ControllerStopped`] if the loop is gone.
    pub async fn select_strategy(&self, kind: StrategyKind) -> Result<(), ControlError> {
        let (reply, outcome) = oneshot::channel();
        self.send(ControlCommand::SelectStrategy {
            kind,
            reply: Some(reply),
        })
        .await?;
        outcome.await.map_err(|_| ControlError::ControllerStopped)?
    }

    /// Clears a fallback demotion on the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::ControllerStopped`] if the loop is gone.
    pub async fn reset_fallback(&self) -> Result<(), ControlError> {
        self.send(ControlCommand::ResetFallback).await
    }

    /// Replaces the upstream observations on the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::ControllerStopped`] if the loop is gone.
    pub async fn update_observations(
        &self,
        observations: [ApproachObservation; 4],
    ) -> Result<(), ControlError> {
        self.send(ControlCommand::Observations(observations)).await
    }

    /// Latest published status.
    #[must_use]
    pub fn status(&self) -> ControllerStatus {
        self.status.borrow().clone()
    }

    /// Subscribes to status updates.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<ControllerStatus> {
        self.status.clone()
    }

    /// Subscribes to phase changes, as the actuation bridge does.
    #[must_use]
    pub fn subscribe_phase(&self) -> watch::Receiver<PhaseState> {
        self.phase.clone()
    }

    /// Raw command sender, for the feed and the bridge.
    #[must_use]
    pub fn commands(&self) -> mpsc::Sender<ControlCommand> {
        self.commands.clone()
    }

    /// Waits until the status satisfies `predicate`, up to `limit`.
    ///
    /// Returns the matching status, or `None` on timeout or shutdown.
    pub async fn wait_for<F>(&self, limit: Duration, mut predicate: F) -> Option<ControllerStatus>
    where
        F: FnMut(&ControllerStatus) -> bool,
    {
        let mut rx = self.status.clone();
        tokio::time::timeout(limit, async move {
            rx.wait_for(|status| predicate(status))
                .await
                .ok()
                .map(|status| status.clone())
        })
        .await
        .ok()
        .flatten()
    }

    async fn send(&self, command: ControlCommand) -> Result<(), ControlError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ControlError::ControllerStopped)
    }
}
