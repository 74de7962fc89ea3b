//! Turns a preprocessed image into a TB verdict, either through the model or
//! through the brightness heuristic, and records which one answered

use crate::config::{Mode, Settings};
use crate::heuristic;
use crate::preprocess::ImageTensor;
use crate::torch::{InferenceError, TorchModel};
use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Output class index meaning "TB detected"
pub const POSITIVE_CLASS: usize = 1;

/// Number of classes the model head produces
pub const NUM_CLASSES: usize = 2;

/// Anything that maps an image to class probabilities. The loaded torch model
/// is one; tests substitute their own.
pub trait Classifier: fmt::Debug + Send + Sync {
    /// Softmax probabilities, one per class
    fn classify(&self, image: &ImageTensor) -> Result<Vec<f64>, InferenceError>;
}

/// Why the heuristic answered instead of the model
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReason {
    /// The heuristic policy is configured
    HeuristicMode,

    /// Model mode, but no classifier was provided
    NoModel,

    /// The forward pass failed
    Inference(String),

    /// The classifier returned something other than two finite probabilities
    BadOutput(Vec<f64>),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::HeuristicMode => write!(f, "heuristic mode"),
            FallbackReason::NoModel => write!(f, "no model loaded"),
            FallbackReason::Inference(e) => write!(f, "inference failed: {e}"),
            FallbackReason::BadOutput(p) => write!(f, "unexpected model output {p:?}"),
        }
    }
}

/// Which path produced a prediction
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Model,
    Heuristic(FallbackReason),
}

impl Source {
    /// Short name, used in the `x-prediction-source` response header
    pub fn label(&self) -> &'static str {
        match self {
            Source::Model => "model",
            Source::Heuristic(_) => "heuristic",
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Source::Heuristic(reason) if *reason != FallbackReason::HeuristicMode)
    }
}

/// The user-facing verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    #[serde(rename = "TB Detected")]
    Detected,
    #[serde(rename = "TB Not Detected")]
    NotDetected,
}

impl From<bool> for Verdict {
    fn from(detected: bool) -> Self {
        if detected {
            Verdict::Detected
        } else {
            Verdict::NotDetected
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Detected => write!(f, "TB Detected"),
            Verdict::NotDetected => write!(f, "TB Not Detected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub verdict: Verdict,
    /// Probability of the reported class, in `[0, 1]`
    pub confidence: f64,
    pub source: Source,
}

/// Holds the prediction policy and, in model mode, the classifier. Built once
/// at startup and shared read-only between requests.
#[derive(Debug, Clone)]
pub struct Predictor {
    mode: Mode,
    classifier: Option<Arc<dyn Classifier>>,
}

impl Predictor {
    /// Always answer with the heuristic
    pub fn heuristic() -> Self {
        Predictor {
            mode: Mode::Heuristic,
            classifier: None,
        }
    }

    /// Try `classifier` first and fall back to the heuristic when it fails
    pub fn model_first(classifier: Arc<dyn Classifier>) -> Self {
        Predictor {
            mode: Mode::Model,
            classifier: Some(classifier),
        }
    }

    /// Build the predictor for `settings`. The model is only constructed in
    /// model mode; any failure doing so is returned to the caller.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        match settings.predictor.mode {
            Mode::Heuristic => {
                info!("predictor running in heuristic mode, no model loaded");
                Ok(Self::heuristic())
            }
            Mode::Model => {
                let model = TorchModel::load(&settings.model)?;
                info!("predictor running in model mode with {model:?}");
                Ok(Self::model_first(Arc::new(model)))
            }
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn predict(&self, image: &ImageTensor) -> Prediction {
        let reason = match self.mode {
            Mode::Heuristic => FallbackReason::HeuristicMode,
            Mode::Model => match &self.classifier {
                None => FallbackReason::NoModel,
                Some(classifier) => match classifier.classify(image) {
                    Ok(probabilities) => match from_probabilities(&probabilities) {
                        Some(prediction) => {
                            debug!("model prediction: {prediction:?}");
                            return prediction;
                        }
                        None => FallbackReason::BadOutput(probabilities),
                    },
                    Err(e) => FallbackReason::Inference(e.to_string()),
                },
            },
        };

        let guess = heuristic::guess(image);
        let source = Source::Heuristic(reason);
        if source.is_fallback() {
            warn!("falling back to heuristic prediction: {source:?}");
        }
        let prediction = Prediction {
            verdict: guess.detected.into(),
            confidence: guess.confidence,
            source,
        };
        debug!("heuristic prediction (seed {}): {prediction:?}", guess.seed);
        prediction
    }
}

/// Arg-max over two finite probabilities
fn from_probabilities(probabilities: &[f64]) -> Option<Prediction> {
    if probabilities.len() != NUM_CLASSES || probabilities.iter().any(|p| !p.is_finite()) {
        return None;
    }
    let (class, confidence) = probabilities
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best });
    Some(Prediction {
        verdict: (class == POSITIVE_CLASS).into(),
        confidence,
        source: Source::Model,
    })
}
