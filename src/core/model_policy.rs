use std::fmt;

use serde::{Deserialize, Serialize};

/// A user-selectable model id such as `glm-4.6` or `doubao-vision`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDecision {
    pub effective_model: ModelId,
    pub switched: bool,
}

/// Routes turns with images to the vision model and everything else away
/// from it.
#[derive(Debug, Clone)]
pub struct ModelSelectionPolicy {
    vision_model: ModelId,
    default_text_model: ModelId,
}

impl ModelSelectionPolicy {
    pub fn new(vision_model: ModelId, default_text_model: ModelId) -> Self {
        Self {
            vision_model,
            default_text_model,
        }
    }

    pub fn vision_model(&self) -> &ModelId {
        &self.vision_model
    }

    pub fn default_text_model(&self) -> &ModelId {
        &self.default_text_model
    }

    pub fn decide(&self, has_image_attachment: bool, current_selection: &ModelId) -> ModelDecision {
        let is_vision = *current_selection == self.vision_model;
        match (has_image_attachment, is_vision) {
            (true, false) => ModelDecision {
                effective_model: self.vision_model.clone(),
                switched: true,
            },
            (false, true) => ModelDecision {
                effective_model: self.default_text_model.clone(),
                switched: true,
            },
            _ => ModelDecision {
                effective_model: current_selection.clone(),
                switched: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ModelSelectionPolicy {
        ModelSelectionPolicy::new(ModelId::new("doubao-vision"), ModelId::new("glm-4.6"))
    }

    #[test]
    fn text_turn_on_text_model_passes_through() {
        let decision = policy().decide(false, &ModelId::new("glm-4.6"));
        assert_eq!(decision.effective_model, ModelId::new("glm-4.6"));
        assert!(!decision.switched);
    }

    #[test]
    fn image_turn_on_text_model_switches_to_vision() {
        let decision = policy().decide(true, &ModelId::new("glm-4.6"));
        assert_eq!(decision.effective_model, ModelId::new("doubao-vision"));
        assert!(decision.switched);
    }

    #[test]
    fn image_turn_on_vision_model_passes_through() {
        let decision = policy().decide(true, &ModelId::new("doubao-vision"));
        assert_eq!(decision.effective_model, ModelId::new("doubao-vision"));
        assert!(!decision.switched);
    }

    #[test]
    fn text_turn_on_vision_model_switches_back_to_default() {
        let decision = policy().decide(false, &ModelId::new("doubao-vision"));
        assert_eq!(decision.effective_model, ModelId::new("glm-4.6"));
        assert!(decision.switched);
    }

    #[test]
    fn non_default_text_model_is_kept_for_text_turns() {
        let decision = policy().decide(false, &ModelId::new("glm-4-flash"));
        assert_eq!(decision.effective_model, ModelId::new("glm-4-flash"));
        assert!(!decision.switched);
    }

    #[test]
    fn other_vision_capable_models_still_route_images_to_the_vision_model() {
        let decision = policy().decide(true, &ModelId::new("glm-4v-plus"));
        assert_eq!(decision.effective_model, ModelId::new("doubao-vision"));
        assert!(decision.switched);
    }
}
