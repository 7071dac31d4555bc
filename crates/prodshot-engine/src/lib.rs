pub mod artifacts;
pub mod device;
pub mod dryrun;
pub mod error;
pub mod generation;
pub mod interrupt;
pub mod loader;
pub mod pipeline;

#[cfg(test)]
mod testing;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use prodshot_contracts::events::{map_object, Diagnostics};
use prodshot_contracts::models::DEFAULT_MODEL_ID;
use prodshot_contracts::products::ProductSpec;
use prodshot_contracts::runs::batch::{write_batch, Batch};
use prodshot_contracts::runs::session::{write_session, Session};
use serde_json::{json, Value};

use crate::artifacts::{ArtifactStore, OutputMode};
use crate::device::{DeviceInfo, DevicePreference, DeviceSelector};
use crate::dryrun::DryrunFactory;
use crate::error::{error_chain_text, EngineError};
use crate::interrupt::InterruptFlag;
use crate::loader::{load_backend, Backend};
use crate::pipeline::PipelineFactory;

const BATCH_ERROR_CHARS: usize = 2048;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub model_id: String,
    pub images_dir: PathBuf,
    pub metadata_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub output_mode: OutputMode,
    pub device: DevicePreference,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            images_dir: PathBuf::from("images"),
            metadata_dir: PathBuf::from("metadata"),
            cache_dir: PathBuf::from("models"),
            output_mode: OutputMode::default(),
            device: DevicePreference::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session: Session,
    pub metadata_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch: Batch,
    pub metadata_path: PathBuf,
}

/// Owns the process-wide backend and runs sessions and batches against it.
#[derive(Debug)]
pub struct Orchestrator {
    config: EngineConfig,
    backend: Backend,
    store: ArtifactStore,
    diagnostics: Diagnostics,
    interrupt: InterruptFlag,
}

impl Orchestrator {
    /// Probes the device per `config.device` and loads through the built-in
    /// dryrun factory.
    pub fn new(
        config: EngineConfig,
        diagnostics: Diagnostics,
        interrupt: InterruptFlag,
    ) -> Result<Self> {
        let selector = DeviceSelector::for_preference(config.device);
        let factory = DryrunFactory::default();
        Self::with_components(config, &selector, &factory, diagnostics, interrupt)
    }

    pub fn with_components(
        config: EngineConfig,
        selector: &DeviceSelector,
        factory: &dyn PipelineFactory,
        diagnostics: Diagnostics,
        interrupt: InterruptFlag,
    ) -> Result<Self> {
        for dir in [&config.images_dir, &config.metadata_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let device = selector.select(&diagnostics);
        let backend = load_backend(
            factory,
            &device,
            &config.model_id,
            &config.cache_dir,
            &diagnostics,
        )?;
        let store = ArtifactStore::new(config.output_mode, &config.images_dir);
        Ok(Self {
            config,
            backend,
            store,
            diagnostics,
            interrupt,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn device(&self) -> &DeviceInfo {
        self.backend.device()
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn images_dir(&self) -> &Path {
        self.store.images_dir()
    }

    /// Runs one session and persists it. An interrupted session is not
    /// written.
    pub fn generate_images(&mut self, product: &ProductSpec) -> Result<SessionReport> {
        let session = generation::run_session(
            &mut self.backend,
            &self.store,
            product,
            &self.diagnostics,
            &self.interrupt,
        )?;
        let metadata_path = write_session(&self.config.metadata_dir, &session)
            .with_context(|| format!("failed to write session {}", session.session_id))?;
        self.diagnostics.info(
            "session_finished",
            map_object(json!({
                "session_id": session.session_id,
                "succeeded": session.summary.succeeded,
                "failed": session.summary.failed,
                "success_rate": session.summary.success_rate,
                "metadata_file": metadata_path.to_string_lossy().to_string(),
            })),
        );
        Ok(SessionReport {
            session,
            metadata_path,
        })
    }

    /// Runs every product in order. A product whose session cannot start is
    /// recorded as a failed entry and the batch moves on.
    pub fn generate_batch(&mut self, products: Vec<Value>) -> Result<BatchReport> {
        let mut batch = Batch::start(products.len());
        self.diagnostics.info(
            "batch_started",
            map_object(json!({
                "batch_id": batch.batch_id,
                "total_products": batch.total_products,
            })),
        );

        for (position, raw) in products.into_iter().enumerate() {
            if self.interrupt.is_raised() {
                return Err(self.abort_batch(batch));
            }
            let result = serde_json::from_value::<ProductSpec>(raw.clone())
                .context("invalid product entry")
                .and_then(|product| self.generate_images(&product));
            match result {
                Ok(report) => batch.record_session(report.session, &report.metadata_path),
                Err(err) if EngineError::is_interrupted(&err) => {
                    return Err(self.abort_batch(batch));
                }
                Err(err) => {
                    let error = error_chain_text(&err, BATCH_ERROR_CHARS);
                    self.diagnostics.error(
                        "batch_product_failed",
                        map_object(json!({
                            "batch_id": batch.batch_id,
                            "position": position + 1,
                            "error": error,
                        })),
                    );
                    batch.record_failure(raw, error);
                }
            }
        }

        batch.finish(false);
        let metadata_path = write_batch(&self.config.metadata_dir, &batch)?;
        self.emit_batch_finished(&batch, &metadata_path);
        Ok(BatchReport {
            batch,
            metadata_path,
        })
    }

    pub fn cleanup(&mut self) {
        self.backend.cleanup();
    }

    /// Persists the partial batch flagged as interrupted and returns the
    /// error to propagate.
    fn abort_batch(&self, mut batch: Batch) -> anyhow::Error {
        batch.finish(true);
        match write_batch(&self.config.metadata_dir, &batch) {
            Ok(path) => self.emit_batch_finished(&batch, &path),
            Err(err) => self.diagnostics.error(
                "batch_write_failed",
                map_object(json!({
                    "batch_id": batch.batch_id,
                    "error": format!("{err:#}"),
                })),
            ),
        }
        EngineError::Interrupted.into()
    }

    fn emit_batch_finished(&self, batch: &Batch, metadata_path: &Path) {
        self.diagnostics.info(
            "batch_finished",
            map_object(json!({
                "batch_id": batch.batch_id,
                "products_succeeded": batch.stats.products_succeeded,
                "images_succeeded": batch.stats.images_succeeded,
                "images_failed": batch.stats.images_failed,
                "interrupted": batch.interrupted,
                "metadata_file": metadata_path.to_string_lossy().to_string(),
            })),
        );
    }
}
