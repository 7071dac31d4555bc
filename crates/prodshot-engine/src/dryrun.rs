use anyhow::{bail, Result};
use prodshot_contracts::models::ModelRegistry;
use prodshot_contracts::products::DIMENSION_MULTIPLE;
use sha2::{Digest, Sha256};

use crate::pipeline::{
    ImagePipeline, InferenceRequest, LoadRequest, PipelineFactory, Precision, RawImage,
};

/// Loads catalogue models as deterministic gradient renderers. Identifiers
/// missing from the catalogue fail to load, like an unreachable checkpoint.
#[derive(Debug, Clone, Default)]
pub struct DryrunFactory {
    registry: ModelRegistry,
}

impl DryrunFactory {
    pub fn new(registry: ModelRegistry) -> Self {
        Self { registry }
    }
}

impl PipelineFactory for DryrunFactory {
    fn load(&self, request: &LoadRequest) -> Result<Box<dyn ImagePipeline>> {
        if !self.registry.contains(&request.model_id) {
            bail!(
                "model '{}' is not available in {}",
                request.model_id,
                request.cache_dir.display()
            );
        }
        Ok(Box::new(DryrunPipeline {
            model_id: request.model_id.clone(),
            precision: request.precision,
            calls: 0,
        }))
    }
}

/// Renders a two-colour diagonal gradient seeded by the request and a call
/// counter, so repeated attempts differ.
#[derive(Debug)]
pub struct DryrunPipeline {
    model_id: String,
    precision: Precision,
    calls: u64,
}

impl ImagePipeline for DryrunPipeline {
    fn infer(&mut self, request: &InferenceRequest) -> Result<RawImage> {
        if request.width == 0 || request.height == 0 {
            bail!("image dimensions must be positive");
        }
        if request.width % DIMENSION_MULTIPLE != 0 || request.height % DIMENSION_MULTIPLE != 0 {
            bail!(
                "`height` and `width` have to be divisible by {DIMENSION_MULTIPLE} but are {} and {}",
                request.height,
                request.width
            );
        }
        if request.steps == 0 {
            bail!("num_inference_steps must be positive");
        }

        self.calls += 1;
        let digest = {
            let mut hasher = Sha256::new();
            hasher.update(self.model_id.as_bytes());
            hasher.update(request.prompt.as_bytes());
            hasher.update(request.negative_prompt.as_bytes());
            hasher.update(request.steps.to_be_bytes());
            hasher.update(request.guidance_scale.to_be_bytes());
            hasher.update(self.calls.to_be_bytes());
            hasher.finalize()
        };
        let start = channel_triplet(&digest[0..3]);
        let end = channel_triplet(&digest[3..6]);
        let span = (request.width + request.height).max(1) as f32;
        let image = RawImage::from_fn(request.width, request.height, |x, y| {
            let t = (x + y) as f32 / span;
            [
                lerp(start[0], end[0], t),
                lerp(start[1], end[1], t),
                lerp(start[2], end[2], t),
            ]
        });
        Ok(image)
    }

    fn enable_attention_slicing(&mut self) -> Result<()> {
        Ok(())
    }

    fn enable_memory_efficient_attention(&mut self) -> Result<()> {
        if self.precision != Precision::Float16 {
            bail!("memory-efficient attention requires float16 weights");
        }
        Ok(())
    }

    fn enable_model_cpu_offload(&mut self) -> Result<()> {
        Ok(())
    }
}

fn channel_triplet(bytes: &[u8]) -> [f32; 3] {
    [
        f32::from(bytes[0]) / 255.0,
        f32::from(bytes[1]) / 255.0,
        f32::from(bytes[2]) / 255.0,
    ]
}

fn lerp(from: f32, to: f32, t: f32) -> f32 {
    from + (to - from) * t
}
