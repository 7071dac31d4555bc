use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use prodshot_contracts::now_utc_iso;
use prodshot_contracts::runs::batch::Batch;
use prodshot_contracts::runs::session::{ArtifactRecord, ArtifactRef, AttemptOutcome, Session};
use prodshot_engine::error::EngineError;
use serde::Serialize;
use serde_json::{json, Value};

pub const VALIDATION_ERROR: &str = "ValidationError";
pub const BACKEND_INIT_ERROR: &str = "BackendInitError";
pub const INTERRUPTED_ERROR: &str = "InterruptedError";
pub const INTERNAL_ERROR: &str = "InternalError";

/// The single JSON document written to stdout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub success: bool,
    pub message: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Response {
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            timestamp: now_utc_iso(),
            data: Some(data),
            error: None,
            errors: None,
            detail: None,
        }
    }

    pub fn validation(errors: BTreeMap<String, String>) -> Self {
        Self {
            errors: Some(errors),
            ..Self::failure(VALIDATION_ERROR, "invalid arguments")
        }
    }

    pub fn failure(tag: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            timestamp: now_utc_iso(),
            data: None,
            error: Some(tag.to_string()),
            errors: None,
            detail: None,
        }
    }

    /// Classifies an engine error. Unclassified errors carry the full chain
    /// as `detail` unless `quiet`.
    pub fn from_error(err: &anyhow::Error, quiet: bool) -> Self {
        match err.downcast_ref::<EngineError>() {
            Some(EngineError::InvalidProduct(errors)) => Self::validation(errors.fields().clone()),
            Some(EngineError::Interrupted) => {
                Self::failure(INTERRUPTED_ERROR, "generation interrupted by the user")
            }
            Some(backend @ EngineError::BackendInit { .. }) => {
                Self::failure(BACKEND_INIT_ERROR, backend.to_string())
            }
            None => Self {
                detail: (!quiet).then(|| format!("{err:?}")),
                ..Self::failure(INTERNAL_ERROR, err.to_string())
            },
        }
    }

    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            1
        }
    }

    /// Pretty JSON normally, one compact line in quiet mode.
    pub fn render(&self, quiet: bool) -> Result<String> {
        if quiet {
            Ok(serde_json::to_string(self)?)
        } else {
            Ok(serde_json::to_string_pretty(self)?)
        }
    }
}

pub fn session_data(session: &Session, images_dir: &Path, metadata_file: &Path) -> Value {
    let mut images = Vec::new();
    let mut failures = Vec::new();
    for attempt in &session.attempts {
        match &attempt.outcome {
            AttemptOutcome::Success(artifact) => {
                images.push(image_entry(&session.session_id, attempt.index, artifact));
            }
            AttemptOutcome::Failure { error, failed_at } => failures.push(json!({
                "variation": attempt.index,
                "error": error,
                "failed_at": failed_at,
            })),
        }
    }

    json!({
        "session_id": session.session_id,
        "product": session.product,
        "configuration": {
            "style": session.parameters.style,
            "variations_requested": session.parameters.count_requested,
            "dimensions": session.parameters.dimensions,
            "steps": session.parameters.steps,
            "guidance_scale": session.parameters.guidance_scale,
            "device": session.device,
            "model_id": session.model_id,
        },
        "statistics": session.summary,
        "images": images,
        "failures": failures,
        "files": {
            "images_dir": images_dir.to_string_lossy(),
            "metadata_file": metadata_file.to_string_lossy(),
        },
    })
}

fn image_entry(session_id: &str, variation: u32, artifact: &ArtifactRecord) -> Value {
    let metadata = json!({
        "sha256": artifact.sha256,
        "size_bytes": artifact.size_bytes,
        "dimensions": artifact.dimensions,
        "generated_at": artifact.generated_at,
        "retried": artifact.retried,
    });
    let id = format!("{session_id}_{variation:02}");
    match &artifact.reference {
        ArtifactRef::Inline {
            mime_type,
            base64_data,
        } => json!({
            "id": id,
            "variation": variation,
            "file_name": artifact.file_name,
            "format": "inline",
            "mime_type": mime_type,
            "base64_data": base64_data,
            "metadata": metadata,
        }),
        ArtifactRef::File {
            absolute_path,
            relative_path,
        } => json!({
            "id": id,
            "variation": variation,
            "file_name": artifact.file_name,
            "format": "file",
            "absolute_path": absolute_path,
            "relative_path": relative_path,
            "file_url": format!("file://{absolute_path}"),
            "metadata": metadata,
        }),
    }
}

pub fn batch_data(batch: &Batch, metadata_file: &Path) -> Result<Value> {
    let mut data = serde_json::to_value(batch)?;
    if let Some(object) = data.as_object_mut() {
        object.insert(
            "metadata_file".to_string(),
            Value::String(metadata_file.to_string_lossy().to_string()),
        );
    }
    Ok(data)
}
