//! Policy models for the learned strategy.
//!
//! A [`PolicyModel`] is an opaque, synchronous function from a fixed-shape
//! [`FeatureVector`] to one of two actions. Training is out of scope; any
//! trained network or hand-written closure that fits the contract plugs in.
//!
//! The shipped model is [`MlpPolicy`], a small dense network loaded from a
//! JSON weights file:
//!
//! ```json
//! {"layers": [{"weights": [[0.1, ...], ...], "bias": [0.0, ...]}, ...]}
//! ```
//!
//! `weights[j]` holds the input weights of output unit `j`. Hidden layers
//! use ReLU; the output layer has two units (North/South, East/West).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::schema::LearnedPolicyConfig;
use crate::error::PolicyError;
use crate::intersection::{ApproachObservation, Axis};

/// Features per approach: queue, wait, passed.
pub const FEATURES_PER_APPROACH: usize = 3;

/// Width of the model input.
pub const FEATURE_LEN: usize = 4 * FEATURES_PER_APPROACH;

/// Width of the model output.
pub const ACTION_COUNT: usize = 2;

/// Normalization constants for feature extraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureScales {
    /// Queue length mapping to 1.0
    pub queue: f32,
    /// Cumulative wait mapping to 1.0
    pub wait: Duration,
    /// Vehicles passed mapping to 1.0
    pub passed: f32,
}

impl From<&LearnedPolicyConfig> for FeatureScales {
    fn from(cfg: &LearnedPolicyConfig) -> Self {
        Self {
            queue: cfg.queue_scale,
            wait: cfg.wait_scale,
            passed: cfg.passed_scale,
        }
    }
}

/// Model input: `[queue, wait, passed]` for N, S, E, W, normalized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector(pub [f32; FEATURE_LEN]);

impl FeatureVector {
    /// Extracts features from observations in `Direction::ALL` order.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // counts far below f32 precision limits
    pub fn from_observations(
        observations: &[ApproachObservation; 4],
        scales: &FeatureScales,
    ) -> Self {
        let wait_scale = scales.wait.as_secs_f32();
        let mut features = [0.0; FEATURE_LEN];
        for (chunk, obs) in features.chunks_exact_mut(FEATURES_PER_APPROACH).zip(observations) {
            chunk[0] = normalize(obs.queue_length as f32, scales.queue);
            chunk[1] = normalize(obs.wait_time.as_secs_f32(), wait_scale);
            chunk[2] = normalize(obs.vehicles_passed as f32, scales.passed);
        }
        Self(features)
    }

    /// The raw feature values.
    #[must_use]
    pub const fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

fn normalize(value: f32, scale: f32) -> f32 {
    if scale > 0.0 { value / scale } else { value }
}

/// What the model wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    /// Give green to North/South
    FavorNorthSouth,
    /// Give green to East/West
    FavorEastWest,
}

impl PolicyAction {
    /// The axis this action requests.
    #[must_use]
    pub const fn axis(self) -> Axis {
        match self {
            Self::FavorNorthSouth => Axis::NorthSouth,
            Self::FavorEastWest => Axis::EastWest,
        }
    }
}

/// Model output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyOutput {
    /// Chosen action
    pub action: PolicyAction,
    /// Confidence in `[0, 1]`
    pub confidence: f32,
}

/// Opaque policy contract.
///
/// `infer` runs on a blocking thread and may take arbitrarily long; the
/// supervisor abandons calls that outlive its budget.
pub trait PolicyModel: Send + Sync {
    /// Maps features to an action.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] if inference fails.
    fn infer(&self, features: &FeatureVector) -> Result<PolicyOutput, PolicyError>;
}

impl<F> PolicyModel for F
where
    F: Fn(&FeatureVector) -> Result<PolicyOutput, PolicyError> + Send + Sync,
{
    fn infer(&self, features: &FeatureVector) -> Result<PolicyOutput, PolicyError> {
        self(features)
    }
}

// ============================================================================
// MLP Policy
// ============================================================================

/// One dense layer as stored in the weights file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DenseLayer {
    /// `weights[out][in]`
    pub weights: Vec<Vec<f32>>,
    /// One bias per output unit
    pub bias: Vec<f32>,
}

impl DenseLayer {
    fn inputs(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    fn outputs(&self) -> usize {
        self.weights.len()
    }

    fn forward(&self, input: &[f32], relu: bool) -> Vec<f32> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, bias)| {
                let sum = row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>() + bias;
                if relu { sum.max(0.0) } else { sum }
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelFile {
    layers: Vec<DenseLayer>,
}

/// Dense feed-forward policy with ReLU hidden layers and argmax output.
#[derive(Debug, Clone)]
pub struct MlpPolicy {
    layers: Vec<DenseLayer>,
}

impl MlpPolicy {
    /// Loads a model from a JSON weights file.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Read`] or [`PolicyError::Format`] if the file
    /// cannot be read or decoded, and [`PolicyError::Shape`] if the layers
    /// do not chain from 12 inputs to 2 outputs.
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let raw = std::fs::read_to_string(path).map_err(|source| PolicyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ModelFile =
            serde_json::from_str(&raw).map_err(|source| PolicyError::Format {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_layers(file.layers)
    }

    /// Builds a model from in-memory layers.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Shape`] if the dimensions are inconsistent or
    /// any parameter is not finite.
    pub fn from_layers(layers: Vec<DenseLayer>) -> Result<Self, PolicyError> {
        if layers.is_empty() {
            return Err(PolicyError::Shape("model has no layers".to_string()));
        }

        let mut expected_inputs = FEATURE_LEN;
        for (i, layer) in layers.iter().enumerate() {
            if layer.outputs() == 0 {
                return Err(PolicyError::Shape(format!("layer {i} has no units")));
            }
            if layer.bias.len() != layer.outputs() {
                return Err(PolicyError::Shape(format!(
                    "layer {i}: {} units but {} biases",
                    layer.outputs(),
                    layer.bias.len()
                )));
            }
            if let Some(row) = layer.weights.iter().position(|r| r.len() != expected_inputs) {
                return Err(PolicyError::Shape(format!(
                    "layer {i} row {row}: expected {expected_inputs} inputs, got {}",
                    layer.weights[row].len()
                )));
            }
            let finite = layer.weights.iter().flatten().chain(&layer.bias).all(|v| v.is_finite());
            if !finite {
                return Err(PolicyError::Shape(format!("layer {i} has non-finite parameters")));
            }
            expected_inputs = layer.outputs();
        }

        if expected_inputs != ACTION_COUNT {
            return Err(PolicyError::Shape(format!(
                "output layer has {expected_inputs} units, expected {ACTION_COUNT}"
            )));
        }

        Ok(Self { layers })
    }

    /// Input width of the first layer.
    #[must_use]
    pub fn input_len(&self) -> usize {
        self.layers.first().map_or(0, DenseLayer::inputs)
    }

    /// Number of layers.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.layers.len()
    }
}

impl PolicyModel for MlpPolicy {
    fn infer(&self, features: &FeatureVector) -> Result<PolicyOutput, PolicyError> {
        let last = self.layers.len() - 1;
        let mut activations = features.as_slice().to_vec();
        for (i, layer) in self.layers.iter().enumerate() {
            activations = layer.forward(&activations, i != last);
        }

        let (ns, ew) = match activations.as_slice() {
            [ns, ew] if ns.is_finite() && ew.is_finite() => (*ns, *ew),
            other => {
                return Err(PolicyError::Fault(format!("non-finite policy output {other:?}")));
            }
        };

        // Softmax probability of the winning action
        let (action, winner, loser) = if ew > ns {
            (PolicyAction::FavorEastWest, ew, ns)
        } else {
            (PolicyAction::FavorNorthSouth, ns, ew)
        };
        let confidence = 1.0 / (1.0 + (loser - winner).exp());

        Ok(PolicyOutput { action, confidence })
    }
}
