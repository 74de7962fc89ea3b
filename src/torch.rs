//! Code for building and running the 2-class TB classifier: either a ResNet-50
//! backbone with a fresh 2-class head, or a trained TorchScript module

use crate::config::ModelSettings;
use crate::predictor::{Classifier, NUM_CLASSES};
use crate::preprocess::ImageTensor;
use anyhow::Result;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tch::nn::{self, ModuleT, VarStore};
use tch::vision::resnet;
use tch::{no_grad, Device, Kind, Tensor};
use tracing::info;

/// Width of the ResNet-50 feature vector feeding the head
pub const FEATURES: i64 = 2048;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("{0}")]
    Torch(#[from] tch::TchError),

    #[error("forward pass panicked: {0}")]
    Panicked(String),

    #[error("model lock poisoned")]
    Poisoned,
}

enum Backend {
    /// Backbone plus head, run in eval mode
    ResNet(nn::SequentialT),
    /// A trained TorchScript module
    Script(tch::CModule),
}

impl Backend {
    fn forward(&self, input: &Tensor) -> Result<Tensor, InferenceError> {
        match self {
            Backend::ResNet(net) => Ok(net.forward_t(input, false)),
            Backend::Script(module) => Ok(module.forward_ts(&[input])?),
        }
    }
}

/// The loaded torch model. Torch modules are not `Sync`, so forward passes
/// are serialized behind a mutex.
pub struct TorchModel {
    backend: Mutex<Backend>,
    device: Device,
    description: String,

    // Keep the variable stores alive for the lifetime of the model
    _stores: Vec<VarStore>,
}

impl std::fmt::Debug for TorchModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TorchModel {{ {}, device: {:?} }}",
            self.description, self.device
        )
    }
}

impl TorchModel {
    /// Load the model described by `settings`. A TorchScript path takes
    /// precedence over the ResNet-50 weights.
    pub fn load(settings: &ModelSettings) -> Result<Self> {
        let device = if settings.cuda {
            Device::cuda_if_available()
        } else {
            Device::Cpu
        };

        match &settings.torchscript {
            Some(path) => Self::torchscript(path, device),
            None => Self::resnet50(
                settings.backbone_weights.as_deref(),
                settings.head_weights.as_deref(),
                device,
            ),
        }
    }

    /// ResNet-50 without its final layer, followed by a `2048 -> 2` linear
    /// head named `fc`. Without `head_weights` the head is randomly
    /// initialized and its output meaningless.
    pub fn resnet50(
        backbone_weights: Option<&Path>,
        head_weights: Option<&Path>,
        device: Device,
    ) -> Result<Self> {
        let mut backbone_vs = VarStore::new(device);
        let backbone = resnet::resnet50_no_final_layer(&backbone_vs.root());
        if let Some(path) = backbone_weights {
            info!("loading backbone weights from {path:?}");
            backbone_vs.load(path)?;
        }

        let mut head_vs = VarStore::new(device);
        let head = nn::linear(
            head_vs.root() / "fc",
            FEATURES,
            NUM_CLASSES as i64,
            Default::default(),
        );
        if let Some(path) = head_weights {
            info!("loading head weights from {path:?}");
            head_vs.load(path)?;
        }

        let net = nn::seq_t().add(backbone).add(head);
        let description = format!(
            "resnet50 (backbone: {}, head: {})",
            backbone_weights.map_or(String::from("untrained"), |p| p.display().to_string()),
            head_weights.map_or(String::from("random"), |p| p.display().to_string()),
        );

        Ok(TorchModel {
            backend: Mutex::new(Backend::ResNet(net)),
            device,
            description,
            _stores: vec![backbone_vs, head_vs],
        })
    }

    /// Load a trained TorchScript classifier with two output classes
    pub fn torchscript(path: &Path, device: Device) -> Result<Self> {
        info!("loading torchscript model from {path:?}");
        let mut module = tch::CModule::load_on_device(path, device)?;
        module.set_eval();
        Ok(TorchModel {
            backend: Mutex::new(Backend::Script(module)),
            device,
            description: format!("torchscript {}", path.display()),
            _stores: vec![],
        })
    }

    /// Run the forward pass and return softmax probabilities
    fn run(&self, image: &ImageTensor) -> Result<Vec<f64>, InferenceError> {
        let input = image.to_tensor(self.device);
        let backend = self.backend.lock().map_err(|_| InferenceError::Poisoned)?;

        // The non-fallible tch calls panic on libtorch errors
        let output = panic::catch_unwind(AssertUnwindSafe(|| {
            no_grad(|| backend.forward(&input))
                .map(|logits| logits.softmax(-1, Kind::Float).view([-1]).to_kind(Kind::Double))
        }))
        .map_err(|e| InferenceError::Panicked(panic_message(e)))??;

        Ok(Vec::<f64>::try_from(&output)?)
    }
}

impl Classifier for TorchModel {
    fn classify(&self, image: &ImageTensor) -> Result<Vec<f64>, InferenceError> {
        self.run(image)
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
