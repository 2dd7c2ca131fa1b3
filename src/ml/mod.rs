pub mod error;
pub mod ml_model;
pub mod inference;
pub mod export;
#[cfg(test)]
pub(crate) mod testing;

pub use error::ClassifyError;
pub use ml_model::{
    ModelConfig, ResNet18, top_class, load_and_normalize_image, normalize_image, image_tensor,
    preprocess,
};
pub use inference::{Classification, Classifier, ModelLoader, ModelPaths};
pub use export::export_model;
