use std::fmt;
use std::path::Path;

use anyhow::Result;
use prodshot_contracts::events::{map_object, Diagnostics};
use prodshot_contracts::models::{ModelClass, DEFAULT_MODEL_ID};
use serde_json::json;

use crate::device::DeviceInfo;
use crate::error::{error_chain_text, EngineError};
use crate::pipeline::{ImagePipeline, LoadRequest, Optimization, PipelineFactory, Precision};

const LOAD_ERROR_CHARS: usize = 1024;

/// The loaded model and the device it lives on. One per process, shared by
/// every session through `&mut` access.
pub struct Backend {
    device: DeviceInfo,
    model_id: String,
    is_large_class: bool,
    precision: Precision,
    optimizations: Vec<Optimization>,
    pipeline: Box<dyn ImagePipeline>,
    diagnostics: Diagnostics,
    cleaned_up: bool,
}

impl Backend {
    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn is_large_class(&self) -> bool {
        self.is_large_class
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Optimizations that were actually enabled, in application order.
    pub fn optimizations(&self) -> &[Optimization] {
        &self.optimizations
    }

    pub fn pipeline_mut(&mut self) -> &mut dyn ImagePipeline {
        self.pipeline.as_mut()
    }

    /// No-op on the CPU device.
    pub fn release_device_cache(&mut self) {
        if !self.device.is_accelerated() {
            return;
        }
        self.pipeline.release_cache();
        self.diagnostics.debug(
            "device_cache_released",
            map_object(json!({ "device": self.device.id() })),
        );
    }

    pub fn cleanup(&mut self) {
        if self.device.is_accelerated() {
            self.pipeline.release_cache();
        }
        if !self.cleaned_up {
            self.cleaned_up = true;
            self.diagnostics.info(
                "backend_cleanup",
                map_object(json!({
                    "device": self.device.id(),
                    "model_id": self.model_id,
                })),
            );
        }
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("device", &self.device)
            .field("model_id", &self.model_id)
            .field("is_large_class", &self.is_large_class)
            .field("precision", &self.precision)
            .field("optimizations", &self.optimizations)
            .finish()
    }
}

/// Loads `model_id`, falling back once to the default standard model on the
/// same device. Fails only when both loads fail.
pub fn load_backend(
    factory: &dyn PipelineFactory,
    device: &DeviceInfo,
    model_id: &str,
    cache_dir: &Path,
    diagnostics: &Diagnostics,
) -> Result<Backend> {
    let precision = Precision::for_device(device);
    let class = ModelClass::of(model_id);
    diagnostics.info(
        "model_loading",
        map_object(json!({
            "model_id": model_id,
            "class": class.label(),
            "device": device.id(),
            "precision": precision,
        })),
    );

    let request = LoadRequest {
        model_id: model_id.to_string(),
        class,
        device: device.clone(),
        precision,
        safety_checker: !device.is_accelerated(),
        cache_dir: cache_dir.to_path_buf(),
    };

    let (pipeline, loaded_id, loaded_class, optimizations) = match factory.load(&request) {
        Ok(mut pipeline) => {
            let optimizations = if device.is_accelerated() {
                apply_optimizations(pipeline.as_mut(), class, diagnostics)
            } else {
                Vec::new()
            };
            (pipeline, model_id, class, optimizations)
        }
        Err(requested_err) => {
            let requested_error = error_chain_text(&requested_err, LOAD_ERROR_CHARS);
            diagnostics.warn(
                "model_load_failed",
                map_object(json!({
                    "model_id": model_id,
                    "error": requested_error,
                })),
            );
            diagnostics.warn(
                "model_fallback",
                map_object(json!({
                    "requested": model_id,
                    "fallback": DEFAULT_MODEL_ID,
                    "device": device.id(),
                })),
            );
            let fallback = LoadRequest {
                model_id: DEFAULT_MODEL_ID.to_string(),
                class: ModelClass::Standard,
                ..request
            };
            match factory.load(&fallback) {
                Ok(pipeline) => (pipeline, DEFAULT_MODEL_ID, ModelClass::Standard, Vec::new()),
                Err(fallback_err) => {
                    return Err(EngineError::BackendInit {
                        requested: model_id.to_string(),
                        requested_error,
                        fallback: DEFAULT_MODEL_ID.to_string(),
                        fallback_error: error_chain_text(&fallback_err, LOAD_ERROR_CHARS),
                    }
                    .into());
                }
            }
        }
    };

    let backend = Backend {
        device: device.clone(),
        model_id: loaded_id.to_string(),
        is_large_class: loaded_class.is_large(),
        precision,
        optimizations,
        pipeline,
        diagnostics: diagnostics.clone(),
        cleaned_up: false,
    };
    diagnostics.info(
        "model_loaded",
        map_object(json!({
            "model_id": backend.model_id,
            "is_large_class": backend.is_large_class,
            "device": device.id(),
            "optimizations": backend.optimizations,
        })),
    );
    Ok(backend)
}

/// Each step is best-effort; a refusal is logged and the chain continues.
fn apply_optimizations(
    pipeline: &mut dyn ImagePipeline,
    class: ModelClass,
    diagnostics: &Diagnostics,
) -> Vec<Optimization> {
    let mut applied = Vec::new();
    for optimization in Optimization::chain(class) {
        match optimization.apply(pipeline) {
            Ok(()) => {
                diagnostics.debug(
                    "optimization_applied",
                    map_object(json!({ "optimization": optimization.name() })),
                );
                applied.push(optimization);
            }
            Err(err) => diagnostics.warn(
                "optimization_skipped",
                map_object(json!({
                    "optimization": optimization.name(),
                    "error": format!("{err:#}"),
                })),
            ),
        }
    }
    applied
}
