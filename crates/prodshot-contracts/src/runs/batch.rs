use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::session::Session;
use super::{sanitize_payload, write_pretty_json};
use crate::now_utc_iso;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub products_succeeded: u32,
    pub images_succeeded: u32,
    pub images_failed: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchEntry {
    Completed {
        metadata_file: String,
        #[serde(flatten)]
        session: Session,
    },
    /// The product's session never started; `product` is the raw input.
    Failed {
        product: Value,
        error: String,
        failed_at: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub total_products: u32,
    pub entries: Vec<BatchEntry>,
    pub stats: BatchStats,
    #[serde(default)]
    pub interrupted: bool,
}

impl Batch {
    pub fn start(total_products: usize) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            batch_id: id.chars().take(8).collect(),
            started_at: now_utc_iso(),
            finished_at: None,
            total_products: total_products as u32,
            entries: Vec::new(),
            stats: BatchStats::default(),
            interrupted: false,
        }
    }

    pub fn record_session(&mut self, session: Session, metadata_file: &Path) {
        if session.summary.succeeded > 0 {
            self.stats.products_succeeded += 1;
        }
        self.stats.images_succeeded += session.summary.succeeded;
        self.stats.images_failed += session.summary.failed;
        self.entries.push(BatchEntry::Completed {
            metadata_file: metadata_file.to_string_lossy().to_string(),
            session,
        });
    }

    pub fn record_failure(&mut self, product: Value, error: impl Into<String>) {
        self.entries.push(BatchEntry::Failed {
            product,
            error: error.into(),
            failed_at: now_utc_iso(),
        });
    }

    pub fn finish(&mut self, interrupted: bool) {
        self.interrupted = interrupted;
        self.finished_at = Some(now_utc_iso());
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.entries.iter().filter_map(|entry| match entry {
            BatchEntry::Completed { session, .. } => Some(session),
            BatchEntry::Failed { .. } => None,
        })
    }
}

pub fn write_batch(metadata_dir: &Path, batch: &Batch) -> anyhow::Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let path = metadata_dir.join(format!("batch_{stamp}_{}.json", batch.batch_id));
    let payload = serde_json::to_value(batch)?;
    write_pretty_json(&path, &sanitize_payload(&payload))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::{json, Value};

    use super::{write_batch, Batch};
    use crate::products::ProductSpec;
    use crate::prompts::synthesize;
    use crate::runs::session::{Session, SessionRecorder};

    fn failed_session(name: &str, count: u32) -> Session {
        let mut product = ProductSpec::new(name, "desc");
        product.count = count;
        let prompts = synthesize(&product.name, &product.description, &product.style);
        let mut recorder = SessionRecorder::start(&product, prompts, "cpu", "model");
        for _ in 0..count {
            recorder.record_failure("boom");
        }
        recorder.finish()
    }

    #[test]
    fn stats_only_count_real_images() {
        let mut batch = Batch::start(3);
        batch.record_session(failed_session("A", 2), Path::new("metadata/session_a.json"));
        batch.record_failure(json!({ "name": "" }), "invalid product spec");
        batch.finish(false);

        assert_eq!(batch.stats.products_succeeded, 0);
        assert_eq!(batch.stats.images_succeeded, 0);
        assert_eq!(batch.stats.images_failed, 2);
        assert_eq!(batch.entries.len(), 2);
        assert_eq!(batch.sessions().count(), 1);
        assert!(batch.finished_at.is_some());
        assert_eq!(batch.batch_id.len(), 8);
    }

    #[test]
    fn write_batch_tags_entries() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut batch = Batch::start(2);
        batch.record_session(failed_session("A", 1), Path::new("session_a.json"));
        batch.record_failure(json!({ "name": "B" }), "missing field `description`");
        batch.finish(true);

        let path = write_batch(temp.path(), &batch)?;
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or_default()
            .to_string();
        assert!(name.starts_with("batch_"));
        assert!(name.ends_with(&format!("_{}.json", batch.batch_id)));

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["interrupted"], json!(true));
        assert_eq!(parsed["total_products"], json!(2));
        assert_eq!(parsed["entries"][0]["status"], json!("completed"));
        assert_eq!(parsed["entries"][0]["metadata_file"], json!("session_a.json"));
        assert_eq!(parsed["entries"][0]["attempts"][0]["status"], json!("failure"));
        assert_eq!(parsed["entries"][1]["status"], json!("failed"));
        assert_eq!(parsed["entries"][1]["product"]["name"], json!("B"));
        Ok(())
    }
}
