//! Versioned model registry.
//!
//! Registration is append-only: a version can be registered once, activated,
//! and later retired, but never replaced. Retired versions stay listed for
//! reproducibility audits and stop serving `get_active`.

use crate::error::ModelError;
use crate::feature_extractor::FeatureVector;
use crate::models::RiskModel;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

struct Registration {
    model: Arc<dyn RiskModel>,
    registered_at: DateTime<Utc>,
    retired_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct RegistryState {
    models: BTreeMap<String, Registration>,
    active: Option<String>,
}

/// Listing entry for a registered model
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub version: String,
    pub kind: &'static str,
    pub features: Vec<String>,
    pub active: bool,
    pub registered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retired_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct ModelRegistry {
    state: RwLock<RegistryState>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new version. The first registered model becomes active.
    pub fn register(&self, model: Arc<dyn RiskModel>) -> Result<(), ModelError> {
        let version = model.version().to_string();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if state.models.contains_key(&version) {
            return Err(ModelError::DuplicateVersion(version));
        }

        info!(model = %version, kind = model.kind(), "Model registered");
        state.models.insert(
            version.clone(),
            Registration {
                model,
                registered_at: Utc::now(),
                retired_at: None,
            },
        );
        if state.active.is_none() {
            state.active = Some(version);
        }
        Ok(())
    }

    /// Make a registered, non-retired version the default for new requests
    pub fn activate(&self, version: &str) -> Result<(), ModelError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let servable = state
            .models
            .get(version)
            .is_some_and(|reg| reg.retired_at.is_none());
        if !servable {
            return Err(ModelError::Unavailable {
                version: Some(version.to_string()),
            });
        }

        state.active = Some(version.to_string());
        info!(model = %version, "Model activated");
        Ok(())
    }

    /// Stop serving a version. The active version cannot be retired.
    pub fn retire(&self, version: &str) -> Result<(), ModelError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.active.as_deref() == Some(version) {
            return Err(ModelError::RetireActive(version.to_string()));
        }
        let reg = state
            .models
            .get_mut(version)
            .ok_or_else(|| ModelError::Unavailable {
                version: Some(version.to_string()),
            })?;
        if reg.retired_at.is_none() {
            reg.retired_at = Some(Utc::now());
            info!(model = %version, "Model retired");
        }
        Ok(())
    }

    /// Resolve a pinned version, or the active one when `version` is `None`
    pub fn get_active(&self, version: Option<&str>) -> Result<Arc<dyn RiskModel>, ModelError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let wanted = version.or(state.active.as_deref());

        wanted
            .and_then(|v| state.models.get(v))
            .filter(|reg| reg.retired_at.is_none())
            .map(|reg| reg.model.clone())
            .ok_or_else(|| ModelError::Unavailable {
                version: version.map(str::to_string),
            })
    }

    /// Run a model on a vector built for it
    pub fn predict(&self, model: &dyn RiskModel, features: &FeatureVector) -> Result<f64, ModelError> {
        if features.model_version() != model.version() {
            return Err(ModelError::VersionMismatch {
                expected: model.version().to_string(),
                actual: features.model_version().to_string(),
            });
        }

        let raw = model.predict(features)?;
        if !raw.is_finite() {
            return Err(ModelError::InvalidOutput {
                version: model.version().to_string(),
                value: raw,
            });
        }
        Ok(raw)
    }

    pub fn active_version(&self) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .active
            .clone()
    }

    pub fn list(&self) -> Vec<ModelInfo> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .models
            .iter()
            .map(|(version, reg)| ModelInfo {
                version: version.clone(),
                kind: reg.model.kind(),
                features: reg.model.schema().feature_names().to_vec(),
                active: state.active.as_deref() == Some(version.as_str()),
                registered_at: reg.registered_at,
                retired_at: reg.retired_at,
            })
            .collect()
    }
}
