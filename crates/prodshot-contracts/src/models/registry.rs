use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Standard model every loader falls back to.
pub const DEFAULT_MODEL_ID: &str = "runwayml/stable-diffusion-v1-5";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelClass {
    Standard,
    Large,
}

impl ModelClass {
    /// Identifiers mentioning `xl` (any case) are large-class.
    pub fn of(model_id: &str) -> Self {
        if model_id.to_ascii_lowercase().contains("xl") {
            ModelClass::Large
        } else {
            ModelClass::Standard
        }
    }

    pub fn is_large(&self) -> bool {
        matches!(self, ModelClass::Large)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ModelClass::Standard => "SD 1.5/2.x",
            ModelClass::Large => "SDXL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    pub name: String,
    pub class: ModelClass,
    pub recommended_for: Vec<String>,
}

impl ModelSpec {
    pub fn is_recommended_for(&self, use_case: &str) -> bool {
        self.recommended_for
            .iter()
            .any(|item| item.eq_ignore_ascii_case(use_case.trim()))
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn recommended(&self, use_case: &str) -> Option<&ModelSpec> {
        self.models
            .values()
            .find(|model| model.is_recommended_for(use_case))
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, recommended_for: &[&str]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                class: ModelClass::of(name),
                recommended_for: recommended_for
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
            },
        );
    };

    insert(DEFAULT_MODEL_ID, &["realistic"]);
    insert("stabilityai/stable-diffusion-xl-base-1.0", &["promotional"]);
    insert("stabilityai/stable-diffusion-2-1", &["artistic"]);

    map
}

#[cfg(test)]
mod tests {
    use super::{ModelClass, ModelRegistry, DEFAULT_MODEL_ID};

    #[test]
    fn classification_follows_naming_convention() {
        assert_eq!(
            ModelClass::of("stabilityai/stable-diffusion-xl-base-1.0"),
            ModelClass::Large
        );
        assert_eq!(ModelClass::of("someone/SDXL-Turbo"), ModelClass::Large);
        assert_eq!(ModelClass::of(DEFAULT_MODEL_ID), ModelClass::Standard);
        assert_eq!(ModelClass::Large.label(), "SDXL");
    }

    #[test]
    fn default_registry_keeps_insertion_order_and_recommendations() {
        let registry = ModelRegistry::default();
        let names: Vec<&str> = registry.list().map(|model| model.name.as_str()).collect();
        assert_eq!(names[0], DEFAULT_MODEL_ID);
        assert_eq!(names.len(), 3);

        let promotional = registry.recommended("Promotional").map(|model| model.class);
        assert_eq!(promotional, Some(ModelClass::Large));
        assert_eq!(
            registry.recommended("artistic").map(|model| model.name.as_str()),
            Some("stabilityai/stable-diffusion-2-1")
        );
        assert!(registry.recommended("unknown").is_none());
        assert!(registry.contains(DEFAULT_MODEL_ID));
    }
}
