use crate::emotion::Emotion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Learner,
    Agent,
}

/// One committed speaker exchange within a session.
///
/// Turns are immutable once appended to the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    role: Role,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_response: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_response: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    emotion: Option<Emotion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scenario_step: Option<String>,
    #[serde(default)]
    degraded: bool,
}

impl Turn {
    pub fn learner(text: impl Into<String>) -> Self {
        Self::new(Role::Learner, text)
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self::new(Role::Agent, text)
    }

    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            audio_path: None,
            speech_start: None,
            speech_end: None,
            first_response: None,
            last_response: None,
            emotion: None,
            scenario_step: None,
            degraded: false,
        }
    }

    pub fn with_audio_path(mut self, path: impl Into<String>) -> Self {
        self.audio_path = Some(path.into());
        self
    }

    pub fn with_speech_window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.speech_start = Some(start);
        self.speech_end = Some(end);
        self
    }

    pub fn with_response_window(mut self, first: DateTime<Utc>, last: DateTime<Utc>) -> Self {
        self.first_response = Some(first);
        self.last_response = Some(last);
        self
    }

    pub fn with_emotion(mut self, emotion: Emotion) -> Self {
        self.emotion = Some(emotion);
        self
    }

    pub fn with_scenario_step(mut self, step: impl Into<String>) -> Self {
        self.scenario_step = Some(step.into());
        self
    }

    pub fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn audio_path(&self) -> Option<&str> {
        self.audio_path.as_deref()
    }

    pub fn speech_start(&self) -> Option<DateTime<Utc>> {
        self.speech_start
    }

    pub fn emotion(&self) -> Option<Emotion> {
        self.emotion
    }

    pub fn scenario_step(&self) -> Option<&str> {
        self.scenario_step.as_deref()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_builder() {
        let turn = Turn::agent("Enchanté Marie.")
            .with_emotion(Emotion::Encouragement)
            .with_scenario_step("presentation");

        assert_eq!(turn.role(), Role::Agent);
        assert_eq!(turn.emotion(), Some(Emotion::Encouragement));
        assert_eq!(turn.scenario_step(), Some("presentation"));
        assert!(!turn.is_degraded());
    }

    #[test]
    fn test_degraded_flag_survives_serialization() {
        let turn = Turn::agent("Pouvez-vous répéter ?").degraded();
        let json = serde_json::to_string(&turn).unwrap();
        let back: Turn = serde_json::from_str(&json).unwrap();
        assert!(back.is_degraded());
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::Learner).unwrap(), r#""learner""#);
    }
}
