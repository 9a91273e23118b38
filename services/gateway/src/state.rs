//! Shared application state: configuration, the session registry, service
//! clients, and the static scenario/agent catalogs loaded at startup.

use crate::auth::ApiKeyAuth;
use crate::config::Config;
use dashmap::DashMap;
use eloquence_core::session::{SessionDeps, SessionRegistry};
use eloquence_types::scenario::ScenarioTemplate;
use eloquence_types::AgentProfile;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// A session created on the control plane, awaiting its transport connect.
pub struct PendingSession {
    pub token: String,
    pub learner_id: String,
    pub language: String,
    pub scenario: Option<Arc<ScenarioTemplate>>,
    pub agent: Arc<AgentProfile>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<ApiKeyAuth>,
    pub registry: Arc<SessionRegistry>,
    pub deps: SessionDeps,
    pub scenarios: Arc<HashMap<String, Arc<ScenarioTemplate>>>,
    pub agents: Arc<HashMap<String, Arc<AgentProfile>>>,
    pub pending: Arc<DashMap<String, PendingSession>>,
}

impl AppState {
    /// The default coach profile, used when a request names no agent.
    pub fn default_agent(&self) -> Arc<AgentProfile> {
        self.agents
            .get("coach")
            .cloned()
            .or_else(|| self.agents.values().next().cloned())
            .unwrap_or_else(|| {
                Arc::new(AgentProfile::new(
                    "coach",
                    "Coach IA",
                    "Tu es un coach vocal interactif. Aide l'utilisateur à \
                     améliorer son expression orale, avec des réponses courtes \
                     et bienveillantes.",
                ))
            })
    }
}

/// Loads every `scenario_*.json` under `dir`. Invalid documents are logged
/// and skipped.
pub fn load_scenarios(dir: &Path) -> HashMap<String, Arc<ScenarioTemplate>> {
    let mut scenarios = HashMap::new();
    for path in json_files(dir, "scenario_") {
        match std::fs::read(&path)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| Ok(serde_json::from_slice::<ScenarioTemplate>(&bytes)?))
        {
            Ok(template) => match template.validate() {
                Ok(()) => {
                    tracing::info!(id = %template.id(), path = %path.display(), "scenario loaded");
                    scenarios.insert(template.id().to_string(), Arc::new(template));
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "invalid scenario graph");
                }
            },
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "unreadable scenario file");
            }
        }
    }
    scenarios
}

/// Loads every `agent_*.json` under `dir`.
pub fn load_agents(dir: &Path) -> HashMap<String, Arc<AgentProfile>> {
    let mut agents = HashMap::new();
    for path in json_files(dir, "agent_") {
        match std::fs::read(&path)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| Ok(serde_json::from_slice::<AgentProfile>(&bytes)?))
        {
            Ok(profile) => {
                tracing::info!(id = %profile.id(), path = %path.display(), "agent profile loaded");
                agents.insert(profile.id().to_string(), Arc::new(profile));
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "unreadable agent profile");
            }
        }
    }
    agents
}

fn json_files(dir: &Path, prefix: &str) -> Vec<std::path::PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        tracing::warn!(dir = %dir.display(), "document directory missing");
        return Vec::new();
    };
    let mut files: Vec<_> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().is_some_and(|ext| ext == "json")
                && path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with(prefix))
        })
        .collect();
    files.sort();
    files
}
