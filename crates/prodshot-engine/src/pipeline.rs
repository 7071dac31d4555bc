use std::path::PathBuf;

use anyhow::{bail, Result};
use image::{Rgb, RgbImage};
use prodshot_contracts::models::ModelClass;
use prodshot_contracts::products::ProductSpec;
use prodshot_contracts::prompts::{self, Prompts};
use serde::Serialize;

use crate::device::DeviceInfo;

pub const CONSERVATIVE_WIDTH: u32 = 512;
pub const CONSERVATIVE_HEIGHT: u32 = 512;
pub const CONSERVATIVE_STEPS: u32 = 10;
pub const CONSERVATIVE_GUIDANCE: f32 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance_scale: f32,
}

impl InferenceRequest {
    pub fn for_product(product: &ProductSpec, prompts: &Prompts) -> Self {
        Self {
            prompt: prompts.positive.clone(),
            negative_prompt: prompts.negative.clone(),
            width: product.width,
            height: product.height,
            steps: product.steps,
            guidance_scale: product.guidance_scale,
        }
    }

    /// Smaller, faster, low-guidance request used after invalid output.
    pub fn conservative(product: &ProductSpec) -> Self {
        let prompts = prompts::conservative(&product.name, &product.description);
        Self {
            prompt: prompts.positive,
            negative_prompt: prompts.negative,
            width: CONSERVATIVE_WIDTH,
            height: CONSERVATIVE_HEIGHT,
            steps: CONSERVATIVE_STEPS,
            guidance_scale: CONSERVATIVE_GUIDANCE,
        }
    }
}

/// RGB pixel grid, row-major, three float channels nominally in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    width: u32,
    height: u32,
    pixels: Vec<f32>,
}

impl RawImage {
    pub const CHANNELS: usize = 3;

    pub fn new(width: u32, height: u32, pixels: Vec<f32>) -> Result<Self> {
        let expected = width as usize * height as usize * Self::CHANNELS;
        if pixels.len() != expected {
            bail!(
                "pixel buffer holds {} values, expected {expected} for {width}x{height}",
                pixels.len()
            );
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn from_fn(width: u32, height: u32, mut pixel: impl FnMut(u32, u32) -> [f32; 3]) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * Self::CHANNELS);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&pixel(x, y));
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels_mut(&mut self) -> &mut [f32] {
        &mut self.pixels
    }

    /// Low-precision inference occasionally yields NaN or infinite channels.
    pub fn has_non_finite(&self) -> bool {
        self.pixels.iter().any(|value| !value.is_finite())
    }

    pub fn to_rgb8(&self) -> RgbImage {
        let mut out = RgbImage::new(self.width, self.height);
        for (pixel, chunk) in out
            .pixels_mut()
            .zip(self.pixels.chunks_exact(Self::CHANNELS))
        {
            *pixel = Rgb([
                quantize(chunk[0]),
                quantize(chunk[1]),
                quantize(chunk[2]),
            ]);
        }
        out
    }
}

fn quantize(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Float16,
    Float32,
}

impl Precision {
    pub fn for_device(device: &DeviceInfo) -> Self {
        if device.is_accelerated() {
            Precision::Float16
        } else {
            Precision::Float32
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub model_id: String,
    pub class: ModelClass,
    pub device: DeviceInfo,
    pub precision: Precision,
    pub safety_checker: bool,
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Optimization {
    AttentionSlicing,
    MemoryEfficientAttention,
    ModelCpuOffload,
}

impl Optimization {
    /// Chain applied on accelerated devices, in order.
    pub fn chain(class: ModelClass) -> Vec<Optimization> {
        let mut chain = vec![
            Optimization::AttentionSlicing,
            Optimization::MemoryEfficientAttention,
        ];
        if class.is_large() {
            chain.push(Optimization::ModelCpuOffload);
        }
        chain
    }

    pub fn name(&self) -> &'static str {
        match self {
            Optimization::AttentionSlicing => "attention_slicing",
            Optimization::MemoryEfficientAttention => "memory_efficient_attention",
            Optimization::ModelCpuOffload => "model_cpu_offload",
        }
    }

    pub fn apply(&self, pipeline: &mut dyn ImagePipeline) -> Result<()> {
        match self {
            Optimization::AttentionSlicing => pipeline.enable_attention_slicing(),
            Optimization::MemoryEfficientAttention => {
                pipeline.enable_memory_efficient_attention()
            }
            Optimization::ModelCpuOffload => pipeline.enable_model_cpu_offload(),
        }
    }
}

/// A loaded, device-placed text-to-image model.
///
/// Calls take `&mut self`: the pipeline owns device state and is never
/// invoked concurrently.
pub trait ImagePipeline {
    fn infer(&mut self, request: &InferenceRequest) -> Result<RawImage>;

    fn enable_attention_slicing(&mut self) -> Result<()> {
        bail!("attention slicing is not supported by this pipeline")
    }

    fn enable_memory_efficient_attention(&mut self) -> Result<()> {
        bail!("memory-efficient attention is not supported by this pipeline")
    }

    fn enable_model_cpu_offload(&mut self) -> Result<()> {
        bail!("model CPU offload is not supported by this pipeline")
    }

    /// Drops transient device buffers between attempts.
    fn release_cache(&mut self) {}
}

pub trait PipelineFactory {
    fn load(&self, request: &LoadRequest) -> Result<Box<dyn ImagePipeline>>;
}
