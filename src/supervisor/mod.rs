//! Safety supervisor
//!
//! Wraps every strategy call in the per-tick budget. A strategy that errors
//! or overruns is demoted to the timer strategy until an operator reset,
//! and the timer's decision is used for the faulting tick. The emergency
//! override, when active, replaces whatever the strategy decided.

pub mod emergency;

pub use emergency::{EmergencyOverride, EmergencyStatus};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::schema::ControllerConfig;
use crate::error::{ControlError, StrategyError, TrafficMindError};
use crate::intersection::Axis;
use crate::observability::events::{Event, EventEmitter};
use crate::observability::metrics;
use crate::strategy::{
    Decision, DecisionStrategy, LearnedPolicyStrategy, RuleBasedStrategy, StrategyKind,
    TickSnapshot, TimerStrategy,
};

/// Runs the selected strategy inside its budget and owns the fallback.
pub struct SafetySupervisor {
    budget: Duration,
    timer: TimerStrategy,
    strategies: HashMap<StrategyKind, Box<dyn DecisionStrategy>>,
    selected: StrategyKind,
    demoted: bool,
    faults: u64,
    events: Arc<EventEmitter>,
}

impl std::fmt::Debug for SafetySupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetySupervisor")
            .field("budget", &self.budget)
            .field("selected", &self.selected)
            .field("demoted", &self.demoted)
            .field("faults", &self.faults)
            .finish_non_exhaustive()
    }
}

impl SafetySupervisor {
    /// Creates a supervisor with only the built-in timer, selected.
    ///
    /// The timer's cycle starts at `epoch`.
    #[must_use]
    pub fn new(config: &ControllerConfig, epoch: Instant, events: Arc<EventEmitter>) -> Self {
        Self {
            budget: config.supervisor.budget,
            timer: TimerStrategy::new(&config.timing, epoch),
            strategies: HashMap::new(),
            selected: StrategyKind::Timer,
            demoted: false,
            faults: 0,
            events,
        }
    }

    /// Creates a supervisor with every configured strategy registered and
    /// the initial strategy selected.
    ///
    /// # Errors
    ///
    /// Returns an error if the policy model cannot be loaded, or if the
    /// initial strategy is not available.
    pub fn from_config(
        config: &ControllerConfig,
        epoch: Instant,
        events: Arc<EventEmitter>,
    ) -> Result<Self, TrafficMindError> {
        let mut supervisor = Self::new(config, epoch, events);
        supervisor.register(Box::new(RuleBasedStrategy::new(
            &config.rule_based,
            &config.timing,
        )));
        if let Some(learned) =
            LearnedPolicyStrategy::from_config(&config.learned, &config.timing)?
        {
            supervisor.register(Box::new(learned));
        }
        supervisor.select(config.supervisor.initial_strategy)?;
        Ok(supervisor)
    }

    /// Makes a strategy selectable, replacing any with the same kind.
    ///
    /// The timer is built in; registering another timer has no effect.
    pub fn register(&mut self, strategy: Box<dyn DecisionStrategy>) {
        let kind = strategy.kind();
        if kind == StrategyKind::Timer {
            debug!("timer strategy is built in; ignoring registration");
            return;
        }
        debug!(strategy = %kind, "strategy registered");
        self.strategies.insert(kind, strategy);
    }

    /// Whether `kind` can be selected.
    #[must_use]
    pub fn is_available(&self, kind: StrategyKind) -> bool {
        kind == StrategyKind::Timer || self.strategies.contains_key(&kind)
    }

    /// Selects the strategy used from the next call on.
    ///
    /// While demoted the selection is recorded but the timer keeps running
    /// until [`reset`](Self::reset).
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::StrategyUnavailable`] if `kind` is not
    /// registered (e.g. no policy model configured).
    pub fn select(&mut self, kind: StrategyKind) -> Result<(), ControlError> {
        if !self.is_available(kind) {
            return Err(ControlError::StrategyUnavailable(kind));
        }
        self.selected = kind;
        let active = self.active();
        info!(strategy = %kind, %active, demoted = self.demoted, "strategy selected");
        self.events.emit(Event::StrategySelected {
            timestamp: Utc::now(),
            strategy: kind,
            active,
        });
        Ok(())
    }

    /// Clears a demotion. Returns `false` if there was none.
    pub fn reset(&mut self) -> bool {
        if !self.demoted {
            debug!("fallback reset requested while not demoted");
            return false;
        }
        self.demoted = false;
        info!(strategy = %self.selected, "fallback cleared; resuming selected strategy");
        self.events.emit(Event::FallbackReset {
            timestamp: Utc::now(),
            strategy: self.selected,
        });
        true
    }

    /// Strategy chosen by the operator.
    #[must_use]
    pub const fn selected(&self) -> StrategyKind {
        self.selected
    }

    /// Strategy actually running: the timer while demoted.
    #[must_use]
    pub const fn active(&self) -> StrategyKind {
        if self.demoted {
            StrategyKind::Timer
        } else {
            self.selected
        }
    }

    /// Whether a fault has demoted the supervisor to the timer.
    #[must_use]
    pub const fn is_demoted(&self) -> bool {
        self.demoted
    }

    /// Faults handled since start.
    #[must_use]
    pub const fn faults(&self) -> u64 {
        self.faults
    }

    /// Produces this tick's decision.
    ///
    /// `emergency` is the axis the override forces, if active.
    pub async fn supervise(
        &mut self,
        snapshot: &TickSnapshot,
        emergency: Option<Axis>,
    ) -> Decision {
        let decision = match self.active() {
            StrategyKind::Timer => {
                let decision = self.timer.decide_now(snapshot);
                if self.demoted {
                    decision.into_fallback()
                } else {
                    decision
                }
            }
            kind => self.call(kind, snapshot).await,
        };

        emergency.map_or(decision, Decision::emergency)
    }

    async fn call(&mut self, kind: StrategyKind, snapshot: &TickSnapshot) -> Decision {
        let Some(strategy) = self.strategies.get(&kind) else {
            // select() only accepts registered kinds
            return self.timer.decide_now(snapshot).into_fallback();
        };

        let started = Instant::now();
        let result = tokio::time::timeout(self.budget, strategy.decide(snapshot))
            .await
            .unwrap_or(Err(StrategyError::Timeout {
                budget: self.budget,
            }));
        metrics::record_strategy_latency(kind, started.elapsed());

        match result {
            Ok(decision) => decision,
            Err(error) => self.demote(kind, snapshot, &error),
        }
    }

    fn demote(
        &mut self,
        kind: StrategyKind,
        snapshot: &TickSnapshot,
        error: &StrategyError,
    ) -> Decision {
        warn!(
            tick = snapshot.tick,
            strategy = %kind,
            error = %error,
            "strategy fault; falling back to timer"
        );
        self.faults += 1;
        self.demoted = true;
        metrics::record_strategy_fault(kind, error);

        let now = Utc::now();
        self.events.emit(Event::StrategyFault {
            timestamp: now,
            tick: snapshot.tick,
            strategy: kind,
            error: error.to_string(),
        });
        self.events.emit(Event::StrategyDemoted {
            timestamp: now,
            tick: snapshot.tick,
            from: kind,
            to: StrategyKind::Timer,
        });

        self.timer.decide_now(snapshot).into_fallback()
    }
}
