//! Scripted collaborators shared by the engine tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use prodshot_contracts::events::{DiagnosticSink, EventPayload, Level};

use crate::device::{AcceleratorInfo, DeviceInfo, DeviceProbe};
use crate::pipeline::{
    ImagePipeline, InferenceRequest, LoadRequest, Optimization, PipelineFactory, RawImage,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Step {
    Image,
    NonFinite,
    Fail(&'static str),
}

#[derive(Clone, Default)]
pub(crate) struct RecordingSink {
    events: Arc<Mutex<Vec<(Level, String, EventPayload)>>>,
}

impl RecordingSink {
    pub(crate) fn types(&self) -> Vec<String> {
        self.events
            .lock()
            .map(|events| events.iter().map(|(_, kind, _)| kind.clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn count(&self, event_type: &str) -> usize {
        self.types().iter().filter(|kind| *kind == event_type).count()
    }

    pub(crate) fn payloads(&self, event_type: &str) -> Vec<EventPayload> {
        self.events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .filter(|(_, kind, _)| kind == event_type)
                    .map(|(_, _, payload)| payload.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl DiagnosticSink for RecordingSink {
    fn emit(&self, level: Level, event_type: &str, payload: &EventPayload) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("recording sink poisoned"))?
            .push((level, event_type.to_string(), payload.clone()));
        Ok(())
    }
}

pub(crate) struct FixedProbe(pub(crate) Option<AcceleratorInfo>);

impl DeviceProbe for FixedProbe {
    fn probe(&self) -> Option<AcceleratorInfo> {
        self.0.clone()
    }
}

pub(crate) fn gpu() -> AcceleratorInfo {
    AcceleratorInfo {
        name: "NVIDIA L4".to_string(),
        memory_total_mib: Some(23034),
    }
}

pub(crate) fn gpu_device() -> DeviceInfo {
    DeviceInfo::accelerated(gpu())
}

#[derive(Clone, Default)]
pub(crate) struct ScriptedFactory {
    failing_models: Vec<String>,
    refused: Vec<Optimization>,
    script: Arc<Mutex<VecDeque<Step>>>,
    loads: Arc<Mutex<Vec<LoadRequest>>>,
    requests: Arc<Mutex<Vec<InferenceRequest>>>,
    releases: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub(crate) fn failing(mut self, model_id: &str) -> Self {
        self.failing_models.push(model_id.to_string());
        self
    }

    pub(crate) fn refusing(mut self, optimization: Optimization) -> Self {
        self.refused.push(optimization);
        self
    }

    /// Steps are consumed one per inference call; an empty script renders.
    pub(crate) fn with_script(self, steps: &[Step]) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.extend(steps.iter().cloned());
        }
        self
    }

    pub(crate) fn loads(&self) -> Vec<LoadRequest> {
        self.loads.lock().map(|rows| rows.clone()).unwrap_or_default()
    }

    pub(crate) fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().map(|rows| rows.clone()).unwrap_or_default()
    }

    pub(crate) fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl PipelineFactory for ScriptedFactory {
    fn load(&self, request: &LoadRequest) -> Result<Box<dyn ImagePipeline>> {
        if let Ok(mut loads) = self.loads.lock() {
            loads.push(request.clone());
        }
        if self.failing_models.contains(&request.model_id) {
            bail!("repository not found: {}", request.model_id);
        }
        Ok(Box::new(ScriptedPipeline {
            factory: self.clone(),
        }))
    }
}

struct ScriptedPipeline {
    factory: ScriptedFactory,
}

impl ScriptedPipeline {
    fn optimize(&self, optimization: Optimization) -> Result<()> {
        if self.factory.refused.contains(&optimization) {
            bail!("{} unavailable", optimization.name());
        }
        Ok(())
    }
}

impl ImagePipeline for ScriptedPipeline {
    fn infer(&mut self, request: &InferenceRequest) -> Result<RawImage> {
        if let Ok(mut requests) = self.factory.requests.lock() {
            requests.push(request.clone());
        }
        let step = self
            .factory
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or(Step::Image);
        match step {
            Step::Image => Ok(RawImage::from_fn(request.width, request.height, |x, _| {
                [x as f32 / request.width as f32, 0.25, 0.75]
            })),
            Step::NonFinite => Ok(RawImage::from_fn(request.width, request.height, |_, _| {
                [f32::NAN, 0.0, 0.0]
            })),
            Step::Fail(message) => bail!("{message}"),
        }
    }

    fn enable_attention_slicing(&mut self) -> Result<()> {
        self.optimize(Optimization::AttentionSlicing)
    }

    fn enable_memory_efficient_attention(&mut self) -> Result<()> {
        self.optimize(Optimization::MemoryEfficientAttention)
    }

    fn enable_model_cpu_offload(&mut self) -> Result<()> {
        self.optimize(Optimization::ModelCpuOffload)
    }

    fn release_cache(&mut self) {
        self.factory.releases.fetch_add(1, Ordering::SeqCst);
    }
}
