use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::summary::Summary;
use super::{sanitize_payload, write_pretty_json};
use crate::now_utc_iso;
use crate::products::ProductSpec;
use crate::prompts::{Prompts, Style};

pub const PRODUCT_KIND: &str = "consumable";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub name: String,
    pub description: String,
    pub kind: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub style: String,
    pub count_requested: u32,
    pub dimensions: Dimensions,
    pub steps: u32,
    pub guidance_scale: f32,
}

impl From<&ProductSpec> for GenerationParams {
    fn from(product: &ProductSpec) -> Self {
        Self {
            style: product.style.clone(),
            count_requested: product.count,
            dimensions: Dimensions {
                width: product.width,
                height: product.height,
            },
            steps: product.steps,
            guidance_scale: product.guidance_scale,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ArtifactRef {
    File {
        absolute_path: String,
        relative_path: String,
    },
    Inline {
        mime_type: String,
        base64_data: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub file_name: String,
    #[serde(flatten)]
    pub reference: ArtifactRef,
    pub sha256: String,
    pub size_bytes: u64,
    pub dimensions: Dimensions,
    pub generated_at: String,
    /// True when the stored image came from the conservative retry.
    #[serde(default)]
    pub retried: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success(ArtifactRecord),
    Failure { error: String, failed_at: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub index: u32,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

impl Attempt {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success(_))
    }

    pub fn artifact(&self) -> Option<&ArtifactRecord> {
        match &self.outcome {
            AttemptOutcome::Success(artifact) => Some(artifact),
            AttemptOutcome::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            AttemptOutcome::Success(_) => None,
            AttemptOutcome::Failure { error, .. } => Some(error.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: String,
    pub finished_at: String,
    pub product: ProductInfo,
    pub parameters: GenerationParams,
    pub prompts: Prompts,
    pub device: String,
    pub model_id: String,
    pub attempts: Vec<Attempt>,
    pub summary: Summary,
}

/// Accumulates attempts for one session. Indices are assigned here, so they
/// stay dense and 1-based whatever the outcome.
#[derive(Debug)]
pub struct SessionRecorder {
    session_id: String,
    created_at: String,
    product: ProductInfo,
    parameters: GenerationParams,
    prompts: Prompts,
    device: String,
    model_id: String,
    attempts: Vec<Attempt>,
}

impl SessionRecorder {
    pub fn start(product: &ProductSpec, prompts: Prompts, device: &str, model_id: &str) -> Self {
        let created = Utc::now();
        Self {
            session_id: new_session_id(&product.name, created),
            created_at: created.to_rfc3339_opts(SecondsFormat::Micros, false),
            product: ProductInfo {
                name: product.name.clone(),
                description: product.description.clone(),
                kind: PRODUCT_KIND.to_string(),
            },
            parameters: GenerationParams::from(product),
            prompts,
            device: device.to_string(),
            model_id: model_id.to_string(),
            attempts: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn next_index(&self) -> u32 {
        self.attempts.len() as u32 + 1
    }

    pub fn record_success(&mut self, artifact: ArtifactRecord) -> u32 {
        self.push(AttemptOutcome::Success(artifact))
    }

    pub fn record_failure(&mut self, error: impl Into<String>) -> u32 {
        self.push(AttemptOutcome::Failure {
            error: error.into(),
            failed_at: now_utc_iso(),
        })
    }

    pub fn finish(self) -> Session {
        let summary = Summary::from_attempts(self.parameters.count_requested, &self.attempts);
        Session {
            session_id: self.session_id,
            created_at: self.created_at,
            finished_at: now_utc_iso(),
            product: self.product,
            parameters: self.parameters,
            prompts: self.prompts,
            device: self.device,
            model_id: self.model_id,
            attempts: self.attempts,
            summary,
        }
    }

    fn push(&mut self, outcome: AttemptOutcome) -> u32 {
        let index = self.next_index();
        self.attempts.push(Attempt { index, outcome });
        index
    }
}

/// Eight hex chars from the product name and creation instant.
pub fn new_session_id(product_name: &str, created: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(product_name.as_bytes());
    hasher.update(b"_");
    hasher.update(
        created
            .to_rfc3339_opts(SecondsFormat::Nanos, true)
            .as_bytes(),
    );
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}

/// The style segment is always a catalogue name, so unknown styles land under
/// the fallback style and never contribute path separators.
pub fn artifact_file_name(product_name: &str, style: &str, session_id: &str, index: u32) -> String {
    let stem: String = product_name
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_whitespace() || ch == '/' || ch == '\\' {
                '_'
            } else {
                ch
            }
        })
        .collect();
    let style = Style::from_name(style).unwrap_or(Style::FALLBACK).name();
    format!("{stem}_{style}_{session_id}_{index:02}.png")
}

pub fn session_metadata_path(metadata_dir: &Path, session_id: &str) -> PathBuf {
    metadata_dir.join(format!("session_{session_id}.json"))
}

/// Writes the session document; inline image payloads are omitted.
pub fn write_session(metadata_dir: &Path, session: &Session) -> anyhow::Result<PathBuf> {
    let path = session_metadata_path(metadata_dir, &session.session_id);
    let payload = serde_json::to_value(session)?;
    write_pretty_json(&path, &sanitize_payload(&payload))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    use super::{
        artifact_file_name, new_session_id, write_session, ArtifactRecord, ArtifactRef,
        Dimensions, SessionRecorder,
    };
    use crate::products::ProductSpec;
    use crate::prompts::synthesize;

    fn inline_artifact(file_name: &str) -> ArtifactRecord {
        ArtifactRecord {
            file_name: file_name.to_string(),
            reference: ArtifactRef::Inline {
                mime_type: "image/png".to_string(),
                base64_data: "iVBORw0KGgo=".to_string(),
            },
            sha256: "0123456789abcdef".to_string(),
            size_bytes: 8,
            dimensions: Dimensions {
                width: 512,
                height: 512,
            },
            generated_at: "2026-10-19T00:00:00+00:00".to_string(),
            retried: true,
        }
    }

    #[test]
    fn recorder_assigns_dense_indices_and_summary() {
        let product = ProductSpec::new("Dark Bar", "70% cacao");
        let prompts = synthesize(&product.name, &product.description, &product.style);
        let mut recorder = SessionRecorder::start(&product, prompts, "cpu", "model-a");

        assert_eq!(recorder.record_success(inline_artifact("a.png")), 1);
        assert_eq!(recorder.record_failure("CUDA out of memory"), 2);
        assert_eq!(recorder.record_success(inline_artifact("c.png")), 3);
        let session = recorder.finish();

        let indices: Vec<u32> = session.attempts.iter().map(|attempt| attempt.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(session.attempts[1].error(), Some("CUDA out of memory"));
        assert_eq!(session.summary.succeeded, 2);
        assert_eq!(session.summary.failed, 1);
        assert!((session.summary.success_rate - 66.666).abs() < 0.01);
        assert_eq!(session.session_id.len(), 8);
        assert_eq!(session.product.kind, "consumable");
    }

    #[test]
    fn session_id_depends_on_name_and_instant() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let later = at + chrono::Duration::nanoseconds(1);
        assert_eq!(new_session_id("Bar", at), new_session_id("Bar", at));
        assert_ne!(new_session_id("Bar", at), new_session_id("Bar", later));
        assert_ne!(new_session_id("Bar", at), new_session_id("Gum", at));
    }

    #[test]
    fn artifact_file_name_is_deterministic() {
        assert_eq!(
            artifact_file_name("Chocolate Premium 70/30", "premium", "ab12cd34", 3),
            "Chocolate_Premium_70_30_premium_ab12cd34_03.png"
        );
        assert_eq!(
            artifact_file_name("Bar", "Catalogo", "ab12cd34", 1),
            "Bar_catalog_ab12cd34_01.png"
        );
        assert_eq!(
            artifact_file_name("Bar", "promo/../v2", "ab12cd34", 1),
            "Bar_promotional_ab12cd34_01.png"
        );
    }

    #[test]
    fn write_session_embeds_attempts_without_inline_payloads() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut product = ProductSpec::new("Gummies", "forest fruit");
        product.count = 2;
        let prompts = synthesize(&product.name, &product.description, &product.style);
        let mut recorder = SessionRecorder::start(&product, prompts, "cuda", "model-b");
        recorder.record_success(inline_artifact("g_01.png"));
        recorder.record_failure("boom");
        let session = recorder.finish();

        let path = write_session(temp.path(), &session)?;
        assert_eq!(
            path.file_name().and_then(|name| name.to_str()),
            Some(format!("session_{}.json", session.session_id).as_str())
        );

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["device"], json!("cuda"));
        assert_eq!(parsed["parameters"]["count_requested"], json!(2));
        assert_eq!(parsed["prompts"]["negative"], json!(session.prompts.negative));
        assert_eq!(parsed["attempts"][0]["status"], json!("success"));
        assert_eq!(parsed["attempts"][0]["format"], json!("inline"));
        assert_eq!(parsed["attempts"][0]["base64_data"], json!("<omitted>"));
        assert_eq!(parsed["attempts"][0]["retried"], json!(true));
        assert_eq!(parsed["attempts"][1]["status"], json!("failure"));
        assert_eq!(parsed["attempts"][1]["error"], json!("boom"));
        assert_eq!(parsed["summary"]["succeeded"], json!(1));
        assert_eq!(parsed["summary"]["failed"], json!(1));
        Ok(())
    }
}
