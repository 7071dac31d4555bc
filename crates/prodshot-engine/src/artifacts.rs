use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;
use prodshot_contracts::now_utc_iso;
use prodshot_contracts::runs::session::{ArtifactRecord, ArtifactRef, Dimensions};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::pipeline::RawImage;

pub const PNG_MIME: &str = "image/png";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Base64 PNG embedded in the attempt record.
    #[default]
    Inline,
    /// PNG written under the images directory.
    File,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    mode: OutputMode,
    images_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(mode: OutputMode, images_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            images_dir: images_dir.into(),
        }
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn persist(&self, image: &RawImage, file_name: &str, retried: bool) -> Result<ArtifactRecord> {
        let bytes = encode_png(image)?;
        let reference = match self.mode {
            OutputMode::Inline => ArtifactRef::Inline {
                mime_type: PNG_MIME.to_string(),
                base64_data: BASE64.encode(&bytes),
            },
            OutputMode::File => {
                std::fs::create_dir_all(&self.images_dir).with_context(|| {
                    format!("failed to create {}", self.images_dir.display())
                })?;
                let relative = self.images_dir.join(file_name);
                std::fs::write(&relative, &bytes)
                    .with_context(|| format!("failed to save {}", relative.display()))?;
                ArtifactRef::File {
                    absolute_path: absolute_path(&relative)?.to_string_lossy().to_string(),
                    relative_path: relative.to_string_lossy().to_string(),
                }
            }
        };
        Ok(ArtifactRecord {
            file_name: file_name.to_string(),
            reference,
            sha256: content_hash(&bytes),
            size_bytes: bytes.len() as u64,
            dimensions: Dimensions {
                width: image.width(),
                height: image.height(),
            },
            generated_at: now_utc_iso(),
            retried,
        })
    }
}

pub fn encode_png(image: &RawImage) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    image
        .to_rgb8()
        .write_to(&mut cursor, ImageFormat::Png)
        .context("PNG encode failed")?;
    Ok(cursor.into_inner())
}

/// Sixteen hex chars of the SHA-256 digest.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("failed to resolve working directory")?;
    Ok(cwd.join(path))
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use prodshot_contracts::runs::session::ArtifactRef;

    use super::{content_hash, ArtifactStore, OutputMode};
    use crate::pipeline::RawImage;

    fn sample() -> RawImage {
        RawImage::from_fn(16, 8, |x, y| [x as f32 / 16.0, y as f32 / 8.0, 0.5])
    }

    #[test]
    fn inline_artifacts_embed_png_bytes() -> anyhow::Result<()> {
        let store = ArtifactStore::new(OutputMode::Inline, "unused");
        let record = store.persist(&sample(), "bar_premium_ab12cd34_01.png", false)?;

        let ArtifactRef::Inline {
            mime_type,
            base64_data,
        } = &record.reference
        else {
            panic!("expected inline artifact");
        };
        assert_eq!(mime_type, "image/png");
        let bytes = BASE64.decode(base64_data)?;
        assert_eq!(&bytes[1..4], b"PNG");
        assert_eq!(record.size_bytes, bytes.len() as u64);
        assert_eq!(record.sha256, content_hash(&bytes));
        assert_eq!(record.sha256.len(), 16);
        assert_eq!((record.dimensions.width, record.dimensions.height), (16, 8));

        let decoded = image::load_from_memory(&bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
        Ok(())
    }

    #[test]
    fn file_artifacts_are_written_under_images_dir() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let images_dir = temp.path().join("images");
        let store = ArtifactStore::new(OutputMode::File, &images_dir);
        let record = store.persist(&sample(), "bar_premium_ab12cd34_02.png", true)?;

        let ArtifactRef::File {
            absolute_path,
            relative_path,
        } = &record.reference
        else {
            panic!("expected file artifact");
        };
        let written = std::fs::read(images_dir.join("bar_premium_ab12cd34_02.png"))?;
        assert_eq!(record.size_bytes, written.len() as u64);
        assert_eq!(record.sha256, content_hash(&written));
        assert!(std::path::Path::new(absolute_path).is_absolute());
        assert!(relative_path.ends_with("bar_premium_ab12cd34_02.png"));
        assert!(record.retried);
        Ok(())
    }
}
