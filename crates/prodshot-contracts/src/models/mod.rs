mod registry;

pub use registry::{ModelClass, ModelRegistry, ModelSpec, DEFAULT_MODEL_ID};
