use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

pub const COUNT_RANGE: RangeInclusive<u32> = 1..=20;
pub const DIMENSION_RANGE: RangeInclusive<u32> = 256..=2048;
/// Latent-space models downsample by 8, so both dimensions must divide by it.
pub const DIMENSION_MULTIPLE: u32 = 8;
pub const STEPS_RANGE: RangeInclusive<u32> = 10..=100;
pub const GUIDANCE_RANGE: RangeInclusive<f32> = 1.0..=20.0;

pub const DEFAULT_STYLE: &str = "professional";
pub const DEFAULT_COUNT: u32 = 3;
pub const DEFAULT_DIMENSION: u32 = 768;
pub const DEFAULT_STEPS: u32 = 25;
pub const DEFAULT_GUIDANCE: f32 = 7.5;

/// One product to render, with its generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSpec {
    pub name: String,
    pub description: String,
    #[serde(default = "default_style")]
    pub style: String,
    #[serde(default = "default_count", alias = "variations")]
    pub count: u32,
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default = "default_dimension")]
    pub height: u32,
    #[serde(default = "default_steps", alias = "inference_steps")]
    pub steps: u32,
    #[serde(default = "default_guidance", alias = "guidance")]
    pub guidance_scale: f32,
}

impl ProductSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            style: default_style(),
            count: DEFAULT_COUNT,
            width: DEFAULT_DIMENSION,
            height: DEFAULT_DIMENSION,
            steps: DEFAULT_STEPS,
            guidance_scale: DEFAULT_GUIDANCE,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        if self.name.trim().is_empty() {
            errors.insert("name", "product name is required and cannot be empty");
        }
        if self.description.trim().is_empty() {
            errors.insert(
                "description",
                "product description is required and cannot be empty",
            );
        }
        if !COUNT_RANGE.contains(&self.count) {
            errors.insert(
                "count",
                format!(
                    "variation count must be between {} and {}",
                    COUNT_RANGE.start(),
                    COUNT_RANGE.end()
                ),
            );
        }
        for (field, value) in [("width", self.width), ("height", self.height)] {
            if !DIMENSION_RANGE.contains(&value) {
                errors.insert(
                    field,
                    format!(
                        "{field} must be between {} and {} pixels",
                        DIMENSION_RANGE.start(),
                        DIMENSION_RANGE.end()
                    ),
                );
            } else if value % DIMENSION_MULTIPLE != 0 {
                errors.insert(
                    field,
                    format!("{field} must be a multiple of {DIMENSION_MULTIPLE} pixels"),
                );
            }
        }
        if !STEPS_RANGE.contains(&self.steps) {
            errors.insert(
                "steps",
                format!(
                    "inference steps must be between {} and {}",
                    STEPS_RANGE.start(),
                    STEPS_RANGE.end()
                ),
            );
        }
        if !GUIDANCE_RANGE.contains(&self.guidance_scale) {
            errors.insert(
                "guidance_scale",
                format!(
                    "guidance scale must be between {:.1} and {:.1}",
                    GUIDANCE_RANGE.start(),
                    GUIDANCE_RANGE.end()
                ),
            );
        }
        errors.into_result()
    }
}

/// Field name to message, sorted by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    fields: BTreeMap<String, String>,
}

impl ValidationErrors {
    pub fn insert(&mut self, field: &str, message: impl Into<String>) {
        self.fields.insert(field.to_string(), message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self
            .fields
            .iter()
            .map(|(field, message)| format!("{field}: {message}"))
            .collect::<Vec<String>>();
        write!(f, "invalid product spec ({})", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

fn default_style() -> String {
    DEFAULT_STYLE.to_string()
}

fn default_count() -> u32 {
    DEFAULT_COUNT
}

fn default_dimension() -> u32 {
    DEFAULT_DIMENSION
}

fn default_steps() -> u32 {
    DEFAULT_STEPS
}

fn default_guidance() -> f32 {
    DEFAULT_GUIDANCE
}
