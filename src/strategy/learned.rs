//! Learned-policy strategy.
//!
//! Wraps an opaque [`PolicyModel`]. Inference runs on a blocking thread via
//! `spawn_blocking`; if the supervisor's budget expires first the future is
//! dropped and the blocking task finishes on its own, its result discarded.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::schema::{LearnedPolicyConfig, TimingConfig};
use crate::error::{PolicyError, StrategyError};

use super::model::{FeatureScales, FeatureVector, MlpPolicy, PolicyModel, PolicyOutput};
use super::{Decision, DecisionStrategy, StrategyKind, TickSnapshot, max_green_override};

/// Strategy backed by a policy model.
#[derive(Clone)]
pub struct LearnedPolicyStrategy {
    model: Arc<dyn PolicyModel>,
    scales: FeatureScales,
    max_green: Duration,
}

impl LearnedPolicyStrategy {
    /// Wraps an already-built model.
    #[must_use]
    pub fn new(
        model: Arc<dyn PolicyModel>,
        config: &LearnedPolicyConfig,
        timing: &TimingConfig,
    ) -> Self {
        Self {
            model,
            scales: FeatureScales::from(config),
            max_green: timing.max_green,
        }
    }

    /// Wraps a hand-written policy function.
    #[must_use]
    pub fn from_fn<F>(model: F, config: &LearnedPolicyConfig, timing: &TimingConfig) -> Self
    where
        F: Fn(&FeatureVector) -> Result<PolicyOutput, PolicyError> + Send + Sync + 'static,
    {
        Self::new(Arc::new(model), config, timing)
    }

    /// Loads the configured MLP model, if any.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] if a model path is configured but the file
    /// cannot be loaded.
    pub fn from_config(
        config: &LearnedPolicyConfig,
        timing: &TimingConfig,
    ) -> Result<Option<Self>, PolicyError> {
        let Some(path) = &config.model else {
            return Ok(None);
        };
        let model = MlpPolicy::load(path)?;
        debug!(path = %path.display(), layers = model.depth(), "policy model loaded");
        Ok(Some(Self::new(Arc::new(model), config, timing)))
    }
}

impl std::fmt::Debug for LearnedPolicyStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearnedPolicyStrategy")
            .field("scales", &self.scales)
            .field("max_green", &self.max_green)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl DecisionStrategy for LearnedPolicyStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LearnedPolicy
    }

    async fn decide(&self, snapshot: &TickSnapshot) -> Result<Decision, StrategyError> {
        let features = FeatureVector::from_observations(&snapshot.observations, &self.scales);
        let model = Arc::clone(&self.model);

        let output = tokio::task::spawn_blocking(move || model.infer(&features))
            .await
            .map_err(|e| StrategyError::TaskAborted(e.to_string()))??;

        if !output.confidence.is_finite() {
            return Err(StrategyError::Inference(format!(
                "confidence {} is not finite",
                output.confidence
            )));
        }

        let target = max_green_override(&snapshot.phase, self.max_green)
            .unwrap_or_else(|| output.action.axis());

        Ok(Decision::new(target, StrategyKind::LearnedPolicy, output.confidence))
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::intersection::Axis;
    use crate::phase::Phase;
    use crate::strategy::model::tests::queue_model;
    use crate::strategy::test_support::{obs, snapshot_with};
    use crate::strategy::{DecisionSource, PolicyAction};

    fn snapshot(queues: [u32; 4], current: Phase, held: Duration) -> TickSnapshot {
        snapshot_with(Instant::now(), queues.map(|q| obs(q, 0)), current, held, None)
    }

    fn strategy(model: Arc<dyn PolicyModel>) -> LearnedPolicyStrategy {
        LearnedPolicyStrategy::new(model, &LearnedPolicyConfig::default(), &TimingConfig::default())
    }

    #[tokio::test]
    async fn test_decides_from_model_output() {
        let s = strategy(Arc::new(queue_model()));
        let decision = s
            .decide(&snapshot([0, 1, 12, 7], Phase::NsGreen, Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(decision.target, Axis::EastWest);
        assert_eq!(decision.source, DecisionSource::Strategy(StrategyKind::LearnedPolicy));
        assert!(!decision.force);
    }

    #[tokio::test]
    async fn test_model_fault_becomes_inference_error() {
        let s = LearnedPolicyStrategy::from_fn(
            |_: &FeatureVector| Err(PolicyError::Fault("diverged".into())),
            &LearnedPolicyConfig::default(),
            &TimingConfig::default(),
        );
        let err = s
            .decide(&snapshot([0; 4], Phase::NsGreen, Duration::ZERO))
            .await
            .unwrap_err();
        assert_eq!(err, StrategyError::Inference("diverged".into()));
    }

    #[tokio::test]
    async fn test_panicking_model_is_task_aborted() {
        let s = LearnedPolicyStrategy::from_fn(
            |_: &FeatureVector| -> Result<PolicyOutput, PolicyError> { panic!("model exploded") },
            &LearnedPolicyConfig::default(),
            &TimingConfig::default(),
        );
        let err = s
            .decide(&snapshot([0; 4], Phase::NsGreen, Duration::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, StrategyError::TaskAborted(_)));
    }

    #[tokio::test]
    async fn test_non_finite_confidence_is_a_fault() {
        let s = LearnedPolicyStrategy::from_fn(
            |_: &FeatureVector| {
                Ok(PolicyOutput {
                    action: PolicyAction::FavorNorthSouth,
                    confidence: f32::NAN,
                })
            },
            &LearnedPolicyConfig::default(),
            &TimingConfig::default(),
        );
        let result = s.decide(&snapshot([0; 4], Phase::NsGreen, Duration::ZERO)).await;
        assert!(matches!(result, Err(StrategyError::Inference(_))));
    }

    #[tokio::test]
    async fn test_max_green_guard_applies() {
        let s = strategy(Arc::new(queue_model()));
        let max_green = TimingConfig::default().max_green;
        let decision = s
            .decide(&snapshot([30, 30, 0, 0], Phase::NsGreen, max_green))
            .await
            .unwrap();
        assert_eq!(decision.target, Axis::EastWest);
    }

    #[test]
    fn test_from_config_without_model() {
        let loaded = LearnedPolicyStrategy::from_config(
            &LearnedPolicyConfig::default(),
            &TimingConfig::default(),
        )
        .unwrap();
        assert!(loaded.is_none());
    }
}
