use crate::predictor::{Prediction, Verdict};
use serde::{Deserialize, Serialize};

/// A base 64 image, optionally prefixed with a `data:image/...;base64,` URI
/// marker
#[derive(Deserialize)]
pub struct PredictRequest {
    pub image: Option<String>,
}

impl std::fmt::Debug for PredictRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.image {
            Some(image) => write!(f, "PredictRequest {{ image: <{} bytes> }}", image.len()),
            None => write!(f, "PredictRequest {{ image: None }}"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub prediction: Verdict,
    pub confidence: f64,
}

impl From<&Prediction> for PredictResponse {
    fn from(prediction: &Prediction) -> Self {
        PredictResponse {
            prediction: prediction.verdict,
            confidence: prediction.confidence,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
