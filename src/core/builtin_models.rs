//! Built-in model catalog
//!
//! Providers and models are described in `builtin_models.toml`, embedded at
//! build time. The catalog maps a user-facing model id to the provider
//! endpoint and the model name the provider expects on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::model_policy::{ModelId, ModelSelectionPolicy};

const BUILTIN_CATALOG: &str = include_str!("../builtin_models.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    /// Environment variable consulted when no key is configured.
    pub api_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    pub id: String,
    pub api_model: String,
    pub provider: String,
    #[serde(default)]
    pub vision: bool,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    default_text_model: String,
    vision_model: String,
    providers: Vec<ProviderSpec>,
    models: Vec<ModelSpec>,
}

/// Where a request for one model has to go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRoute {
    pub provider_id: String,
    pub provider_name: String,
    pub base_url: String,
    pub api_model: String,
    pub api_key_env: String,
}

#[derive(Debug)]
pub enum CatalogError {
    Parse(toml::de::Error),
    UnknownModel(String),
    UnknownProvider { model: String, provider: String },
    NotVisionCapable(String),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::Parse(err) => write!(f, "Failed to parse model catalog: {err}"),
            CatalogError::UnknownModel(id) => {
                write!(f, "Unknown model: {id}. Run 'tutorchat models' to list models.")
            }
            CatalogError::UnknownProvider { model, provider } => {
                write!(f, "Model '{model}' refers to unknown provider '{provider}'")
            }
            CatalogError::NotVisionCapable(id) => {
                write!(f, "Configured vision model '{id}' cannot accept images")
            }
        }
    }
}

impl std::error::Error for CatalogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CatalogError::Parse(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelCatalog {
    default_text_model: ModelId,
    vision_model: ModelId,
    providers: Vec<ProviderSpec>,
    models: Vec<ModelSpec>,
}

impl ModelCatalog {
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_toml(BUILTIN_CATALOG)
    }

    pub fn from_toml(contents: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(contents).map_err(CatalogError::Parse)?;
        let catalog = Self {
            default_text_model: ModelId::new(file.default_text_model),
            vision_model: ModelId::new(file.vision_model),
            providers: file.providers,
            models: file.models,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        for model in &self.models {
            if self.find_provider(&model.provider).is_none() {
                return Err(CatalogError::UnknownProvider {
                    model: model.id.clone(),
                    provider: model.provider.clone(),
                });
            }
        }

        self.find_model(self.default_text_model.as_str())
            .ok_or_else(|| CatalogError::UnknownModel(self.default_text_model.to_string()))?;
        let vision = self
            .find_model(self.vision_model.as_str())
            .ok_or_else(|| CatalogError::UnknownModel(self.vision_model.to_string()))?;
        if !vision.vision {
            return Err(CatalogError::NotVisionCapable(vision.id.clone()));
        }
        Ok(())
    }

    pub fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    pub fn providers(&self) -> &[ProviderSpec] {
        &self.providers
    }

    pub fn default_text_model(&self) -> &ModelId {
        &self.default_text_model
    }

    pub fn vision_model(&self) -> &ModelId {
        &self.vision_model
    }

    /// Find a model by id (case-insensitive)
    pub fn find_model(&self, id: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.id.eq_ignore_ascii_case(id))
    }

    /// Find a provider by id (case-insensitive)
    pub fn find_provider(&self, id: &str) -> Option<&ProviderSpec> {
        self.providers.iter().find(|p| p.id.eq_ignore_ascii_case(id))
    }

    /// Canonical id for a user-typed model name.
    pub fn resolve(&self, id: &str) -> Result<ModelId, CatalogError> {
        self.find_model(id)
            .map(|model| ModelId::new(model.id.clone()))
            .ok_or_else(|| CatalogError::UnknownModel(id.to_string()))
    }

    pub fn route(&self, model: &ModelId) -> Result<ProviderRoute, CatalogError> {
        let spec = self
            .find_model(model.as_str())
            .ok_or_else(|| CatalogError::UnknownModel(model.to_string()))?;
        let provider =
            self.find_provider(&spec.provider)
                .ok_or_else(|| CatalogError::UnknownProvider {
                    model: spec.id.clone(),
                    provider: spec.provider.clone(),
                })?;

        Ok(ProviderRoute {
            provider_id: provider.id.clone(),
            provider_name: provider.display_name.clone(),
            base_url: provider.base_url.clone(),
            api_model: spec.api_model.clone(),
            api_key_env: provider.api_key_env.clone(),
        })
    }

    pub fn policy(&self) -> ModelSelectionPolicy {
        ModelSelectionPolicy::new(self.vision_model.clone(), self.default_text_model.clone())
    }
}
