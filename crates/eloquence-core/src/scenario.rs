//! Scenario engine: classifies learner transcripts against the current
//! step's expected variables, binds extracted values, and advances the step
//! graph. Advancement only ever lands on a declared successor of the
//! current step.

use eloquence_types::scenario::{ScenarioTemplate, VariableKind};
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Minimum fuzzy-match score for a choice option to count as mentioned.
const CHOICE_MATCH_THRESHOLD: i64 = 70;

/// Live scenario state carried by a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioState {
    pub current_step: String,
    pub completed_steps: Vec<String>,
    pub variables: BTreeMap<String, serde_json::Value>,
}

/// What one classification pass produced.
#[derive(Debug, Default)]
pub struct ClassifyOutcome {
    /// Variables newly bound from this transcript.
    pub extracted: Vec<String>,
    /// Whether the current step's expectations are now satisfied.
    pub satisfied: bool,
    /// Step advanced to, when satisfaction allowed it.
    pub advanced_to: Option<String>,
}

pub struct ScenarioEngine {
    template: Arc<ScenarioTemplate>,
    matcher: SkimMatcherV2,
}

impl ScenarioEngine {
    pub fn new(template: Arc<ScenarioTemplate>) -> Self {
        Self {
            template,
            matcher: SkimMatcherV2::default(),
        }
    }

    pub fn template(&self) -> &ScenarioTemplate {
        &self.template
    }

    /// Initial state: first step, variables bound to their defaults.
    pub fn initial_state(&self) -> ScenarioState {
        let variables = self
            .template
            .variables()
            .filter_map(|(name, spec)| {
                spec.default_value()
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect();
        ScenarioState {
            current_step: self.template.first_step().to_string(),
            completed_steps: Vec::new(),
            variables,
        }
    }

    /// Classifies `transcript` against the current step, binds any matched
    /// variables, and advances to a declared successor when the step is
    /// satisfied. State is only ever mutated toward completion.
    pub fn classify_and_advance(
        &self,
        state: &mut ScenarioState,
        transcript: &str,
    ) -> ClassifyOutcome {
        let mut outcome = ClassifyOutcome::default();
        let Some(step) = self.template.step(&state.current_step) else {
            tracing::warn!(step = %state.current_step, "scenario state points at unknown step");
            return outcome;
        };

        for name in step.expected_variables() {
            if state.variables.contains_key(name) {
                continue;
            }
            let Some(spec) = self.template.variable(name) else {
                continue;
            };
            if let Some(value) = self.extract(spec.kind(), transcript) {
                tracing::debug!(variable = %name, value = %value, "scenario variable bound");
                state.variables.insert(name.clone(), value);
                outcome.extracted.push(name.clone());
            }
        }

        outcome.satisfied = step.expected_variables().iter().all(|name| {
            let required = self
                .template
                .variable(name)
                .map(|spec| spec.is_required())
                .unwrap_or(false);
            !required || state.variables.contains_key(name)
        });

        if outcome.satisfied && !step.is_final() {
            if let Some(successor) = step.next_steps().first() {
                // The template is validated at load time, so the successor
                // is known to be declared.
                state.completed_steps.push(state.current_step.clone());
                state.current_step = successor.clone();
                outcome.advanced_to = Some(successor.clone());
                tracing::info!(step = %successor, "scenario advanced");
            }
        }

        outcome
    }

    fn extract(&self, kind: &VariableKind, transcript: &str) -> Option<serde_json::Value> {
        let trimmed = transcript.trim();
        if trimmed.is_empty() {
            return None;
        }
        match kind {
            VariableKind::Text => Some(serde_json::Value::String(trimmed.to_string())),
            VariableKind::Number => trimmed
                .split_whitespace()
                .find_map(|token| token.trim_matches(|c: char| !c.is_ascii_digit() && c != '.').parse::<f64>().ok())
                .and_then(|n| serde_json::Number::from_f64(n).map(serde_json::Value::Number)),
            VariableKind::Boolean => {
                let lower = trimmed.to_lowercase();
                if ["oui", "yes", "d'accord", "bien sûr"].iter().any(|t| lower.contains(t)) {
                    Some(serde_json::Value::Bool(true))
                } else if ["non", "no", "pas du tout"].iter().any(|t| lower.contains(t)) {
                    Some(serde_json::Value::Bool(false))
                } else {
                    None
                }
            }
            VariableKind::Choice { options } => {
                let lower = trimmed.to_lowercase();
                options
                    .iter()
                    .filter_map(|option| {
                        self.matcher
                            .fuzzy_match(&lower, &option.to_lowercase())
                            .filter(|score| *score > CHOICE_MATCH_THRESHOLD)
                            .map(|score| (score, option))
                    })
                    .max_by_key(|(score, _)| *score)
                    .map(|(_, option)| serde_json::Value::String(option.clone()))
            }
        }
    }

    /// Renders the current step's prompt template, substituting bound
    /// variables. Unbound placeholders are left intact for the LLM to see.
    pub fn render_prompt(&self, state: &ScenarioState) -> String {
        let Some(step) = self.template.step(&state.current_step) else {
            return String::new();
        };
        let mut rendered = step.prompt_template().to_string();
        for (name, value) in &state.variables {
            let placeholder = format!("{{{name}}}");
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&placeholder, &text);
        }
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ScenarioEngine {
        let template: ScenarioTemplate = serde_json::from_str(
            r#"{
            "id": "entretien_embauche",
            "name": "Entretien d'embauche",
            "language": "fr",
            "variables": {
                "prenom": {"kind": "text", "required": true},
                "poste": {"kind": "choice", "options": ["developpeur", "designer"]},
                "experience": {"kind": "number"},
                "disponible": {"kind": "boolean"}
            },
            "steps": {
                "presentation": {
                    "name": "Présentation",
                    "prompt_template": "Accueille {prenom} et demande-lui de se présenter.",
                    "expected_variables": ["prenom"],
                    "next_steps": ["parcours"]
                },
                "parcours": {
                    "name": "Parcours",
                    "prompt_template": "Interroge {prenom} sur ses {experience} années d'expérience.",
                    "expected_variables": ["experience", "poste", "disponible"],
                    "is_final": true
                }
            },
            "first_step": "presentation"
        }"#,
        )
        .unwrap();
        template.validate().unwrap();
        ScenarioEngine::new(Arc::new(template))
    }

    #[test]
    fn test_initial_state_starts_at_first_step() {
        let engine = engine();
        let state = engine.initial_state();
        assert_eq!(state.current_step, "presentation");
        assert!(state.completed_steps.is_empty());
    }

    #[test]
    fn test_text_variable_binds_and_step_advances() {
        let engine = engine();
        let mut state = engine.initial_state();

        let outcome =
            engine.classify_and_advance(&mut state, "Bonjour, je m'appelle Marie.");
        assert_eq!(outcome.extracted, vec!["prenom".to_string()]);
        assert!(outcome.satisfied);
        assert_eq!(outcome.advanced_to.as_deref(), Some("parcours"));
        assert_eq!(state.current_step, "parcours");
        assert_eq!(state.completed_steps, vec!["presentation".to_string()]);
    }

    #[test]
    fn test_unsatisfied_required_variable_stays_on_step() {
        let engine = engine();
        let mut state = engine.initial_state();
        // Empty transcript binds nothing.
        let outcome = engine.classify_and_advance(&mut state, "   ");
        assert!(!outcome.satisfied);
        assert_eq!(state.current_step, "presentation");
    }

    #[test]
    fn test_advancement_lands_on_declared_successor_only() {
        let engine = engine();
        let mut state = engine.initial_state();
        engine.classify_and_advance(&mut state, "Je suis Paul.");

        let declared: Vec<&str> = engine
            .template()
            .step("presentation")
            .unwrap()
            .next_steps()
            .iter()
            .map(|s| s.as_str())
            .collect();
        assert!(declared.contains(&state.current_step.as_str()));
    }

    #[test]
    fn test_number_choice_and_boolean_extraction() {
        let engine = engine();
        let mut state = engine.initial_state();
        engine.classify_and_advance(&mut state, "Je suis Paul.");

        engine.classify_and_advance(
            &mut state,
            "J'ai 5 ans d'expérience comme developpeur et oui je suis disponible.",
        );
        assert_eq!(state.variables["experience"], serde_json::json!(5.0));
        assert_eq!(state.variables["poste"], serde_json::json!("developpeur"));
        assert_eq!(state.variables["disponible"], serde_json::json!(true));
    }

    #[test]
    fn test_final_step_never_advances() {
        let engine = engine();
        let mut state = engine.initial_state();
        engine.classify_and_advance(&mut state, "Je suis Paul.");
        assert_eq!(state.current_step, "parcours");

        engine.classify_and_advance(&mut state, "J'ai 3 ans d'expérience, oui, developpeur.");
        assert_eq!(state.current_step, "parcours");
    }

    #[test]
    fn test_prompt_rendering_substitutes_bound_variables() {
        let engine = engine();
        let mut state = engine.initial_state();
        engine.classify_and_advance(&mut state, "Marie");

        let prompt = engine.render_prompt(&state);
        assert!(prompt.contains("Marie"), "prompt: {prompt}");
        // `experience` is not bound yet: the placeholder stays visible.
        assert!(prompt.contains("{experience}"));
    }
}
