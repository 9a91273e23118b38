use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Emotion labels attached to each agent turn to modulate TTS delivery.
///
/// The set is closed; unknown labels coming back from the LLM are rejected
/// at parse time and the caller falls back to a heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    #[default]
    Neutre,
    Encouragement,
    Empathie,
    EnthousiasmeModere,
    Curiosite,
    Reflexion,
}

impl Emotion {
    pub const ALL: [Emotion; 6] = [
        Emotion::Neutre,
        Emotion::Encouragement,
        Emotion::Empathie,
        Emotion::EnthousiasmeModere,
        Emotion::Curiosite,
        Emotion::Reflexion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Neutre => "neutre",
            Emotion::Encouragement => "encouragement",
            Emotion::Empathie => "empathie",
            Emotion::EnthousiasmeModere => "enthousiasme_modere",
            Emotion::Curiosite => "curiosite",
            Emotion::Reflexion => "reflexion",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown emotion label: {0}")]
pub struct UnknownEmotion(pub String);

impl FromStr for Emotion {
    type Err = UnknownEmotion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "neutre" => Ok(Emotion::Neutre),
            "encouragement" => Ok(Emotion::Encouragement),
            "empathie" => Ok(Emotion::Empathie),
            "enthousiasme_modere" => Ok(Emotion::EnthousiasmeModere),
            "curiosite" => Ok(Emotion::Curiosite),
            "reflexion" => Ok(Emotion::Reflexion),
            other => Err(UnknownEmotion(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_uses_snake_case() {
        let json = serde_json::to_string(&Emotion::EnthousiasmeModere).unwrap();
        assert_eq!(json, r#""enthousiasme_modere""#);
    }

    #[test]
    fn test_from_str_is_case_insensitive() {
        assert_eq!("Curiosite".parse::<Emotion>().unwrap(), Emotion::Curiosite);
        assert_eq!(" neutre ".parse::<Emotion>().unwrap(), Emotion::Neutre);
    }

    #[test]
    fn test_unknown_label_is_rejected() {
        assert!("joie".parse::<Emotion>().is_err());
    }

    #[test]
    fn test_all_labels_round_trip() {
        for emotion in Emotion::ALL {
            assert_eq!(emotion.as_str().parse::<Emotion>().unwrap(), emotion);
        }
    }
}
