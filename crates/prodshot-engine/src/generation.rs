use anyhow::Result;
use prodshot_contracts::events::{map_object, Diagnostics};
use prodshot_contracts::products::ProductSpec;
use prodshot_contracts::prompts;
use prodshot_contracts::runs::session::{
    artifact_file_name, ArtifactRecord, Session, SessionRecorder,
};
use serde_json::json;

use crate::artifacts::ArtifactStore;
use crate::error::{error_chain_text, EngineError};
use crate::interrupt::InterruptFlag;
use crate::loader::Backend;
use crate::pipeline::{ImagePipeline, InferenceRequest, RawImage};

pub const ATTEMPT_ERROR_CHARS: usize = 2048;

const STILL_INVALID: &str =
    "generated image contains non-finite pixel values after conservative retry";

/// What one attempt produced before persistence.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceOutcome {
    Success(RawImage),
    /// The first image was invalid; this one came from the conservative retry.
    InvalidRetried(RawImage),
    Failed(String),
}

/// Runs `request`; on non-finite output runs `retry` exactly once and
/// reports that result instead.
pub fn run_inference(
    pipeline: &mut dyn ImagePipeline,
    request: &InferenceRequest,
    retry: &InferenceRequest,
    index: u32,
    diagnostics: &Diagnostics,
) -> InferenceOutcome {
    let image = match pipeline.infer(request) {
        Ok(image) => image,
        Err(err) => return InferenceOutcome::Failed(error_chain_text(&err, ATTEMPT_ERROR_CHARS)),
    };
    if !image.has_non_finite() {
        return InferenceOutcome::Success(image);
    }

    diagnostics.warn(
        "attempt_invalid_output",
        map_object(json!({
            "attempt": index,
            "retry_width": retry.width,
            "retry_height": retry.height,
            "retry_steps": retry.steps,
            "retry_guidance_scale": retry.guidance_scale,
        })),
    );
    match pipeline.infer(retry) {
        Ok(image) if image.has_non_finite() => InferenceOutcome::Failed(STILL_INVALID.to_string()),
        Ok(image) => InferenceOutcome::InvalidRetried(image),
        Err(err) => InferenceOutcome::Failed(error_chain_text(&err, ATTEMPT_ERROR_CHARS)),
    }
}

/// Generates `product.count` images strictly in sequence. Attempt failures
/// are recorded and the loop moves on; only interruption ends it early.
pub fn run_session(
    backend: &mut Backend,
    store: &ArtifactStore,
    product: &ProductSpec,
    diagnostics: &Diagnostics,
    interrupt: &InterruptFlag,
) -> Result<Session> {
    product.validate().map_err(EngineError::InvalidProduct)?;

    let prompts = prompts::synthesize(&product.name, &product.description, &product.style);
    let request = InferenceRequest::for_product(product, &prompts);
    let retry = InferenceRequest::conservative(product);
    let mut recorder = SessionRecorder::start(
        product,
        prompts,
        backend.device().id(),
        backend.model_id(),
    );
    diagnostics.info(
        "session_started",
        map_object(json!({
            "session_id": recorder.session_id(),
            "product": product.name,
            "style": product.style,
            "count": product.count,
            "width": product.width,
            "height": product.height,
        })),
    );

    for _ in 0..product.count {
        if interrupt.is_raised() {
            diagnostics.warn(
                "session_interrupted",
                map_object(json!({
                    "session_id": recorder.session_id(),
                    "completed": recorder.next_index() - 1,
                })),
            );
            return Err(EngineError::Interrupted.into());
        }

        let index = recorder.next_index();
        diagnostics.debug(
            "attempt_started",
            map_object(json!({
                "session_id": recorder.session_id(),
                "attempt": index,
                "total": product.count,
            })),
        );

        let outcome = run_inference(backend.pipeline_mut(), &request, &retry, index, diagnostics);
        let persisted = match outcome {
            InferenceOutcome::Success(image) => persist(store, product, &recorder, &image, false),
            InferenceOutcome::InvalidRetried(image) => {
                persist(store, product, &recorder, &image, true)
            }
            InferenceOutcome::Failed(error) => Err(error),
        };
        match persisted {
            Ok(artifact) => {
                diagnostics.info(
                    "attempt_succeeded",
                    map_object(json!({
                        "session_id": recorder.session_id(),
                        "attempt": index,
                        "file_name": artifact.file_name,
                        "sha256": artifact.sha256,
                        "size_bytes": artifact.size_bytes,
                        "retried": artifact.retried,
                    })),
                );
                recorder.record_success(artifact);
            }
            Err(error) => {
                diagnostics.error(
                    "attempt_failed",
                    map_object(json!({
                        "session_id": recorder.session_id(),
                        "attempt": index,
                        "error": error,
                    })),
                );
                recorder.record_failure(error);
            }
        }

        backend.release_device_cache();
    }

    Ok(recorder.finish())
}

fn persist(
    store: &ArtifactStore,
    product: &ProductSpec,
    recorder: &SessionRecorder,
    image: &RawImage,
    retried: bool,
) -> std::result::Result<ArtifactRecord, String> {
    let file_name = artifact_file_name(
        &product.name,
        &product.style,
        recorder.session_id(),
        recorder.next_index(),
    );
    store
        .persist(image, &file_name, retried)
        .map_err(|err| error_chain_text(&err, ATTEMPT_ERROR_CHARS))
}
