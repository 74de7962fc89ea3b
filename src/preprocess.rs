//! Turn a base64 image payload into the normalized `1x3x224x224` tensor the
//! classifier and the heuristic both consume

use base64::{
    alphabet,
    engine::{GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use image::imageops::{self, FilterType};
use tch::{Device, Tensor};
use thiserror::Error;

/// Side length of the square model input
pub const INPUT_SIZE: u32 = 224;

/// Number of color channels fed to the model
pub const CHANNELS: usize = 3;

/// Batch x channels x height x width
pub const SHAPE: [i64; 4] = [1, CHANNELS as i64, INPUT_SIZE as i64, INPUT_SIZE as i64];

/// Per-channel ImageNet mean
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel ImageNet standard deviation
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

const DATA_URI_MARKER: &str = "base64,";

/// Standard alphabet, padding required, non-zero trailing bits accepted
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

fn is_base64_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=')
}

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("{0}")]
    Base64(#[from] base64::DecodeError),

    #[error("{0}")]
    Image(#[from] image::ImageError),
}

/// A normalized image in CHW order with an implicit leading batch dimension
#[derive(Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
}

impl std::fmt::Debug for ImageTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ImageTensor {{ shape: {:?}, mean: {:.4} }}", SHAPE, self.mean())
    }
}

impl ImageTensor {
    /// Wrap raw CHW values. Returns `None` unless there are exactly
    /// `3 * 224 * 224` of them.
    pub fn from_vec(data: Vec<f32>) -> Option<Self> {
        (data.len() == Self::len()).then_some(ImageTensor { data })
    }

    /// Number of elements in one image
    pub const fn len() -> usize {
        CHANNELS * (INPUT_SIZE * INPUT_SIZE) as usize
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Mean over every element, across all channels
    pub fn mean(&self) -> f64 {
        let sum: f64 = self.data.iter().map(|v| *v as f64).sum();
        sum / self.data.len() as f64
    }

    /// Copy into a torch tensor of shape `SHAPE` on `device`
    pub fn to_tensor(&self, device: Device) -> Tensor {
        Tensor::from_slice(&self.data).view(SHAPE).to_device(device)
    }
}

/// Drop a data-URI scheme marker such as `data:image/png;base64,`. Only the
/// segment between the first and any second marker is kept.
pub fn strip_data_uri(payload: &str) -> &str {
    match payload.split(DATA_URI_MARKER).nth(1) {
        Some(data) => data,
        None => payload,
    }
}

/// Decode a (possibly data-URI prefixed) base64 payload into raw bytes.
/// Characters outside the base64 alphabet, e.g. line wrapping, are dropped.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, PreprocessError> {
    let data: String = strip_data_uri(payload)
        .chars()
        .filter(|c| is_base64_char(*c))
        .collect();
    Ok(LENIENT.decode(data)?)
}

/// Decode image bytes, force RGB, stretch to 224x224 and normalize each
/// channel
pub fn preprocess(bytes: &[u8]) -> Result<ImageTensor, PreprocessError> {
    let image = image::load_from_memory(bytes)?.to_rgb8();
    let image = imageops::resize(&image, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut data = vec![0f32; ImageTensor::len()];
    for (i, pixel) in image.pixels().enumerate() {
        for c in 0..CHANNELS {
            let value = pixel.0[c] as f32 / 255.;
            data[c * plane + i] = (value - MEAN[c]) / STD[c];
        }
    }

    Ok(ImageTensor { data })
}

/// Base64 payload straight to tensor
pub fn load_b64_image(payload: &str) -> Result<ImageTensor, PreprocessError> {
    preprocess(&decode_base64(payload)?)
}
