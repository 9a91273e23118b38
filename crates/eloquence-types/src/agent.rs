use crate::emotion::Emotion;
use serde::{Deserialize, Serialize};

/// Static description of a coaching agent, loaded at session start and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    id: String,
    name: String,
    /// System prompt template; `{learner}` and scenario variables are
    /// substituted at prompt-assembly time.
    system_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_id: Option<String>,
    #[serde(default)]
    default_emotion: Emotion,
}

impl AgentProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            system_prompt: system_prompt.into(),
            voice_id: None,
            default_emotion: Emotion::Neutre,
        }
    }

    pub fn with_voice_id(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = Some(voice_id.into());
        self
    }

    pub fn with_default_emotion(mut self, emotion: Emotion) -> Self {
        self.default_emotion = emotion;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn voice_id(&self) -> Option<&str> {
        self.voice_id.as_deref()
    }

    pub fn default_emotion(&self) -> Emotion {
        self.default_emotion
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_deserialization_defaults() {
        let json = r#"{
            "id": "coach",
            "name": "Coach IA",
            "system_prompt": "Tu es un coach vocal interactif."
        }"#;
        let profile: AgentProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.id(), "coach");
        assert_eq!(profile.default_emotion(), Emotion::Neutre);
        assert!(profile.voice_id().is_none());
    }

    #[test]
    fn test_profile_builder() {
        let profile = AgentProfile::new("recruteur", "Recruteur", "Tu mènes un entretien.")
            .with_voice_id("p226")
            .with_default_emotion(Emotion::Curiosite);
        assert_eq!(profile.voice_id(), Some("p226"));
        assert_eq!(profile.default_emotion(), Emotion::Curiosite);
    }
}
