//! Emotion extraction from generated agent text.
//!
//! The LLM is instructed to append a trailing `[EMOTION: label]` marker to
//! each response. When the marker is missing or names an unknown label, a
//! lexical heuristic decides instead.

use eloquence_types::Emotion;

/// Result of tagging one agent response.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedText {
    pub text: String,
    pub emotion: Emotion,
    /// Whether the label came from the structured marker.
    pub from_marker: bool,
}

const MARKERS: [&str; 2] = ["[EMOTION:", "[ÉMOTION:"];

/// Strips the trailing emotion marker and returns the cleaned text with its
/// label. Falls back to [`heuristic_emotion`] when no usable marker exists.
pub fn tag(text: &str) -> TaggedText {
    for marker in MARKERS {
        if let Some(start) = text.rfind(marker) {
            if let Some(rel_end) = text[start..].find(']') {
                let label = text[start + marker.len()..start + rel_end].trim();
                let mut cleaned = String::new();
                cleaned.push_str(text[..start].trim_end());
                let rest = text[start + rel_end + 1..].trim_start();
                if !rest.is_empty() {
                    cleaned.push(' ');
                    cleaned.push_str(rest);
                }

                if let Ok(emotion) = label.parse::<Emotion>() {
                    return TaggedText {
                        text: cleaned,
                        emotion,
                        from_marker: true,
                    };
                }
                // Unknown label: drop the marker, classify what remains.
                return TaggedText {
                    emotion: heuristic_emotion(&cleaned),
                    text: cleaned,
                    from_marker: false,
                };
            }
        }
    }

    TaggedText {
        emotion: heuristic_emotion(text),
        text: text.trim().to_string(),
        from_marker: false,
    }
}

/// Question mark → curiosite, exclamation → encouragement, else neutre.
pub fn heuristic_emotion(text: &str) -> Emotion {
    let trimmed = text.trim_end();
    if trimmed.ends_with('?') {
        Emotion::Curiosite
    } else if trimmed.ends_with('!') {
        Emotion::Encouragement
    } else {
        Emotion::Neutre
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_marker_is_extracted() {
        let tagged = tag("Parlez-moi de votre parcours. [EMOTION: encouragement]");
        assert_eq!(tagged.emotion, Emotion::Encouragement);
        assert_eq!(tagged.text, "Parlez-moi de votre parcours.");
        assert!(tagged.from_marker);
    }

    #[test]
    fn test_accented_marker_variant() {
        let tagged = tag("Je comprends. [ÉMOTION: empathie]");
        assert_eq!(tagged.emotion, Emotion::Empathie);
        assert_eq!(tagged.text, "Je comprends.");
    }

    #[test]
    fn test_unknown_label_falls_back_to_heuristic() {
        let tagged = tag("Continuez ! [EMOTION: joie]");
        assert_eq!(tagged.emotion, Emotion::Encouragement);
        assert_eq!(tagged.text, "Continuez !");
        assert!(!tagged.from_marker);
    }

    #[test]
    fn test_no_marker_question_is_curiosite() {
        let tagged = tag("Quel poste visez-vous ?");
        assert_eq!(tagged.emotion, Emotion::Curiosite);
        assert!(!tagged.from_marker);
    }

    #[test]
    fn test_no_marker_plain_text_is_neutre() {
        let tagged = tag("Je vous écoute.");
        assert_eq!(tagged.emotion, Emotion::Neutre);
    }
}
