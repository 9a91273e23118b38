//! Static scenario templates: a directed graph of prompt steps with typed
//! variables. Templates are loaded at session start and never mutated; the
//! live scenario state (current step + variable bindings) lives with the
//! session.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Semantic type of a scenario variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum VariableKind {
    Text,
    Number,
    Boolean,
    Choice { options: Vec<String> },
}

/// Declaration of one scenario variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableSpec {
    #[serde(flatten)]
    kind: VariableKind,
    #[serde(default)]
    required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    default: Option<serde_json::Value>,
}

impl VariableSpec {
    pub fn new(kind: VariableKind) -> Self {
        Self {
            kind,
            required: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn kind(&self) -> &VariableKind {
        &self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn default_value(&self) -> Option<&serde_json::Value> {
        self.default.as_ref()
    }
}

/// One node of the scenario graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    name: String,
    /// Prompt with `{variable}` placeholders.
    prompt_template: String,
    #[serde(default)]
    expected_variables: Vec<String>,
    #[serde(default)]
    next_steps: Vec<String>,
    #[serde(default)]
    is_final: bool,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, prompt_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt_template: prompt_template.into(),
            expected_variables: Vec::new(),
            next_steps: Vec::new(),
            is_final: false,
        }
    }

    pub fn with_expected_variables(mut self, vars: Vec<String>) -> Self {
        self.expected_variables = vars;
        self
    }

    pub fn with_next_steps(mut self, steps: Vec<String>) -> Self {
        self.next_steps = steps;
        self
    }

    pub fn terminal(mut self) -> Self {
        self.is_final = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prompt_template(&self) -> &str {
        &self.prompt_template
    }

    pub fn expected_variables(&self) -> &[String] {
        &self.expected_variables
    }

    pub fn next_steps(&self) -> &[String] {
        &self.next_steps
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("first step '{0}' is not declared")]
    UnknownFirstStep(String),
    #[error("step '{step}' references undeclared successor '{successor}'")]
    UnknownSuccessor { step: String, successor: String },
    #[error("step '{step}' expects undeclared variable '{variable}'")]
    UnknownVariable { step: String, variable: String },
}

/// A complete scenario template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioTemplate {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_language")]
    language: String,
    #[serde(default)]
    variables: BTreeMap<String, VariableSpec>,
    steps: BTreeMap<String, StepSpec>,
    first_step: String,
}

fn default_language() -> String {
    "fr".to_string()
}

impl ScenarioTemplate {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn first_step(&self) -> &str {
        &self.first_step
    }

    pub fn step(&self, id: &str) -> Option<&StepSpec> {
        self.steps.get(id)
    }

    pub fn variable(&self, name: &str) -> Option<&VariableSpec> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = (&String, &VariableSpec)> {
        self.variables.iter()
    }

    /// Checks graph consistency: the first step exists, every successor is
    /// declared, every expected variable is declared.
    pub fn validate(&self) -> Result<(), TemplateError> {
        if !self.steps.contains_key(&self.first_step) {
            return Err(TemplateError::UnknownFirstStep(self.first_step.clone()));
        }
        for (id, step) in &self.steps {
            for successor in step.next_steps() {
                if !self.steps.contains_key(successor) {
                    return Err(TemplateError::UnknownSuccessor {
                        step: id.clone(),
                        successor: successor.clone(),
                    });
                }
            }
            for variable in step.expected_variables() {
                if !self.variables.contains_key(variable) {
                    return Err(TemplateError::UnknownVariable {
                        step: id.clone(),
                        variable: variable.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interview_template() -> ScenarioTemplate {
        serde_json::from_str(
            r#"{
            "id": "entretien_embauche",
            "name": "Entretien d'embauche",
            "description": "Simulation d'un entretien d'embauche.",
            "language": "fr",
            "variables": {
                "prenom": {"kind": "text", "required": true},
                "poste": {"kind": "choice", "options": ["developpeur", "designer"], "default": "developpeur"}
            },
            "steps": {
                "presentation": {
                    "name": "Présentation",
                    "prompt_template": "Demande à {prenom} de se présenter pour le poste de {poste}.",
                    "expected_variables": ["prenom"],
                    "next_steps": ["parcours"]
                },
                "parcours": {
                    "name": "Parcours",
                    "prompt_template": "Interroge {prenom} sur son parcours.",
                    "is_final": true
                }
            },
            "first_step": "presentation"
        }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_template_passes_validation() {
        let template = interview_template();
        assert!(template.validate().is_ok());
        assert_eq!(template.first_step(), "presentation");
        assert_eq!(template.step("parcours").unwrap().name(), "Parcours");
    }

    #[test]
    fn test_unknown_successor_is_rejected() {
        let mut json: serde_json::Value = serde_json::to_value(interview_template()).unwrap();
        json["steps"]["presentation"]["next_steps"] = serde_json::json!(["inconnu"]);
        let template: ScenarioTemplate = serde_json::from_value(json).unwrap();
        assert!(matches!(
            template.validate(),
            Err(TemplateError::UnknownSuccessor { .. })
        ));
    }

    #[test]
    fn test_unknown_variable_is_rejected() {
        let mut json: serde_json::Value = serde_json::to_value(interview_template()).unwrap();
        json["steps"]["presentation"]["expected_variables"] = serde_json::json!(["age"]);
        let template: ScenarioTemplate = serde_json::from_value(json).unwrap();
        assert!(matches!(
            template.validate(),
            Err(TemplateError::UnknownVariable { .. })
        ));
    }

    #[test]
    fn test_choice_variable_deserialization() {
        let template = interview_template();
        match template.variable("poste").unwrap().kind() {
            VariableKind::Choice { options } => assert_eq!(options.len(), 2),
            other => panic!("expected choice, got {:?}", other),
        }
    }
}
