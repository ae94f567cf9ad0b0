use thiserror::Error;

use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("unknown model '{0}'")]
    UnknownModel(String),
    #[error("model '{model}' cannot do '{capability}' and {provider} has no model that can")]
    NoSubstitute {
        model: String,
        provider: String,
        capability: String,
    },
    #[error("no models available for capability '{0}'")]
    NoModels(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    /// Set when `model` is not the one asked for, with the reason.
    pub substitution: Option<String>,
}

/// Resolves a model by name for one capability.
///
/// Names are never guessed: an unknown name is an error. A known model that
/// lacks the capability is swapped for a model from the same provider.
#[derive(Debug, Clone)]
pub struct ModelSelector {
    registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, SelectionError> {
        let Some(name) = requested else {
            let model = self
                .registry
                .by_capability(capability)
                .into_iter()
                .next()
                .ok_or_else(|| SelectionError::NoModels(capability.to_string()))?;
            return Ok(ModelSelection {
                substitution: Some(format!("No model specified; using {}.", model.name)),
                model,
            });
        };

        let wanted = self
            .registry
            .get(name)
            .ok_or_else(|| SelectionError::UnknownModel(name.to_string()))?;
        if wanted.supports(capability) {
            return Ok(ModelSelection {
                model: wanted.clone(),
                substitution: None,
            });
        }

        let model = self
            .registry
            .by_capability(capability)
            .into_iter()
            .find(|candidate| candidate.provider == wanted.provider)
            .ok_or_else(|| SelectionError::NoSubstitute {
                model: wanted.name.clone(),
                provider: wanted.provider.clone(),
                capability: capability.to_string(),
            })?;
        Ok(ModelSelection {
            substitution: Some(format!(
                "{} does not support '{capability}'; using {} from {}.",
                wanted.name, model.name, model.provider
            )),
            model,
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::SelectionError;
    use crate::models::{ModelRegistry, ModelSelector, ModelSpec, StepRange};

    fn spec(name: &str, provider: &str, capabilities: &[&str]) -> ModelSpec {
        ModelSpec {
            name: name.to_string(),
            provider: provider.to_string(),
            capabilities: capabilities.iter().map(|item| (*item).to_string()).collect(),
            steps: StepRange::new(1, 4, 4),
        }
    }

    fn selector(models: &[ModelSpec]) -> ModelSelector {
        let map: IndexMap<String, ModelSpec> = models
            .iter()
            .map(|model| (model.name.clone(), model.clone()))
            .collect();
        ModelSelector::new(Some(ModelRegistry::new(Some(map))))
    }

    #[test]
    fn exact_match_has_no_substitution() -> anyhow::Result<()> {
        let selection = ModelSelector::new(None).select(Some("dryrun-image-1"), "image")?;
        assert_eq!(selection.model.provider, "dryrun");
        assert_eq!(selection.substitution, None);
        Ok(())
    }

    #[test]
    fn unknown_name_is_an_error_not_a_fallback() {
        let err = ModelSelector::new(None)
            .select(Some("black-forest-labs/FLUX.9"), "image")
            .err();
        assert_eq!(
            err,
            Some(SelectionError::UnknownModel(
                "black-forest-labs/FLUX.9".to_string()
            ))
        );
    }

    #[test]
    fn no_request_uses_first_capable_model() -> anyhow::Result<()> {
        let selection = selector(&[
            spec("text-only", "together", &["text"]),
            spec("flux", "together", &["image"]),
        ])
        .select(None, "image")?;
        assert_eq!(selection.model.name, "flux");
        assert_eq!(
            selection.substitution.as_deref(),
            Some("No model specified; using flux.")
        );
        Ok(())
    }

    #[test]
    fn incapable_model_falls_back_within_its_provider() -> anyhow::Result<()> {
        let selection = selector(&[
            spec("dryrun-flux", "dryrun", &["image"]),
            spec("together-chat", "together", &["text"]),
            spec("together-flux", "together", &["image"]),
        ])
        .select(Some("together-chat"), "image")?;
        assert_eq!(selection.model.name, "together-flux");
        assert_eq!(
            selection.substitution.as_deref(),
            Some("together-chat does not support 'image'; using together-flux from together.")
        );
        Ok(())
    }

    #[test]
    fn incapable_model_without_sibling_is_rejected() {
        let err = selector(&[
            spec("dryrun-flux", "dryrun", &["image"]),
            spec("together-chat", "together", &["text"]),
        ])
        .select(Some("together-chat"), "image")
        .err();
        assert!(matches!(
            err,
            Some(SelectionError::NoSubstitute { ref provider, .. }) if provider == "together"
        ));
    }

    #[test]
    fn empty_capability_set_is_reported() {
        let err = selector(&[spec("text-only", "dryrun", &["text"])])
            .select(None, "image")
            .err();
        assert_eq!(err, Some(SelectionError::NoModels("image".to_string())));
    }
}
