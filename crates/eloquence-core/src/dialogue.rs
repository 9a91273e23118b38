//! Dialogue manager: conversation history, prompt assembly, streaming
//! consumption of the LLM response, and the degraded-turn fallbacks.
//!
//! History is strictly append-only. The prompt window keeps the system
//! prompt plus the last 8 turns or roughly 4 000 tokens, whichever is
//! smaller, truncating whole turns oldest-first.

use crate::clients::{ChatMessage, Generate, LlmEvent, LlmRequest};
use crate::emotion;
use crate::error::{CoreError, CoreResult};
use crate::scenario::{ScenarioEngine, ScenarioState};
use crate::transport::OutboundHandle;
use chrono::Utc;
use eloquence_types::{AgentProfile, Emotion, ServerFrame, Turn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Six canned coach phrases, one per emotion, used for degraded turns,
/// gentle re-prompts and cache pre-warming.
const CANNED_FR: [(Emotion, &str); 6] = [
    (Emotion::Neutre, "Je vous écoute, nous pouvons reprendre."),
    (Emotion::Encouragement, "Très bien, continuez !"),
    (Emotion::Empathie, "Je comprends, prenez votre temps."),
    (Emotion::EnthousiasmeModere, "C'est une très bonne piste !"),
    (Emotion::Curiosite, "Pouvez-vous m'en dire un peu plus ?"),
    (Emotion::Reflexion, "Prenons un instant pour y réfléchir."),
];

const CANNED_EN: [(Emotion, &str); 6] = [
    (Emotion::Neutre, "I'm listening, let's pick up where we left off."),
    (Emotion::Encouragement, "Great, keep going!"),
    (Emotion::Empathie, "I understand, take your time."),
    (Emotion::EnthousiasmeModere, "That sounds like a promising idea!"),
    (Emotion::Curiosite, "Could you tell me a little more?"),
    (Emotion::Reflexion, "Let's take a moment to think about it."),
];

/// The canned phrase set for a language tag.
pub fn canned_phrases(language: &str) -> &'static [(Emotion, &'static str); 6] {
    if language.starts_with("fr") {
        &CANNED_FR
    } else {
        &CANNED_EN
    }
}

/// The utterance used when the LLM fails or times out with no usable text.
pub fn fallback_utterance(language: &str) -> (&'static str, Emotion) {
    let (emotion, text) = canned_phrases(language)[0];
    (text, emotion)
}

/// Short encouraging phrase for the mid-turn silence re-prompt.
pub fn gentle_prompt(language: &str) -> (&'static str, Emotion) {
    let (emotion, text) = canned_phrases(language)[1];
    (text, emotion)
}

#[derive(Debug, Clone)]
pub struct DialogueConfig {
    pub max_window_turns: usize,
    pub max_window_tokens: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Partial re-emission interval when no sentence boundary shows up.
    pub partial_interval: Duration,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            max_window_turns: 8,
            max_window_tokens: 4000,
            temperature: 0.7,
            max_tokens: 150,
            partial_interval: Duration::from_millis(250),
        }
    }
}

/// The committed agent response for one turn.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub text: String,
    pub emotion: Emotion,
    pub degraded: bool,
}

pub struct DialogueManager {
    agent: Arc<AgentProfile>,
    language: String,
    llm: Arc<dyn Generate>,
    scenario: Option<(ScenarioEngine, ScenarioState)>,
    history: Vec<Turn>,
    config: DialogueConfig,
    /// Set after a barge-in; folded into the next system prompt.
    interrupted: bool,
}

impl DialogueManager {
    pub fn new(
        agent: Arc<AgentProfile>,
        language: impl Into<String>,
        llm: Arc<dyn Generate>,
        scenario: Option<ScenarioEngine>,
        config: DialogueConfig,
    ) -> Self {
        let scenario = scenario.map(|engine| {
            let state = engine.initial_state();
            (engine, state)
        });
        Self {
            agent,
            language: language.into(),
            llm,
            scenario,
            history: Vec::new(),
            config,
            interrupted: false,
        }
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn agent(&self) -> &AgentProfile {
        &self.agent
    }

    pub fn scenario_state(&self) -> Option<&ScenarioState> {
        self.scenario.as_ref().map(|(_, state)| state)
    }

    pub fn current_step_id(&self) -> Option<String> {
        self.scenario
            .as_ref()
            .map(|(_, state)| state.current_step.clone())
    }

    /// Marks the next turn as following a barge-in.
    pub fn note_interruption(&mut self) {
        self.interrupted = true;
    }

    /// Runs one conversational turn: commits the learner turn, drives the
    /// scenario, streams the LLM response as `agent_text_partial` frames,
    /// and commits the agent turn. Returns the committed reply.
    ///
    /// `Cancelled` propagates without committing an agent turn; the learner
    /// turn stays in history.
    pub async fn take_turn(
        &mut self,
        learner_turn: Turn,
        out: &OutboundHandle,
        cancel: CancellationToken,
    ) -> CoreResult<AgentReply> {
        let transcript = learner_turn.text().to_string();
        let step_before = self.current_step_id();

        if let Some((engine, state)) = self.scenario.as_mut() {
            engine.classify_and_advance(state, &transcript);
        }

        let learner_turn = match step_before {
            Some(step) => learner_turn.with_scenario_step(step),
            None => learner_turn,
        };
        self.history.push(learner_turn);

        let request = LlmRequest {
            messages: self.build_messages(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            language: self.language.clone(),
        };
        self.interrupted = false;

        let epoch = out.current_epoch();
        let first_response = Utc::now();
        let reply = match self.consume_stream(request, out, cancel, epoch).await? {
            StreamResult::Complete(text) => {
                let tagged = emotion::tag(&text);
                AgentReply {
                    text: tagged.text,
                    emotion: tagged.emotion,
                    degraded: false,
                }
            }
            StreamResult::Partial(text) => {
                tracing::warn!("llm stream ended early, keeping partial text as degraded turn");
                let tagged = emotion::tag(&text);
                AgentReply {
                    text: tagged.text,
                    emotion: tagged.emotion,
                    degraded: true,
                }
            }
            StreamResult::Failed => {
                let (text, emotion) = fallback_utterance(&self.language);
                AgentReply {
                    text: text.to_string(),
                    emotion,
                    degraded: true,
                }
            }
        };

        out.frame(ServerFrame::AgentTextFinal {
            epoch,
            text: reply.text.clone(),
        })
        .await?;

        let mut agent_turn = Turn::agent(&reply.text)
            .with_emotion(reply.emotion)
            .with_response_window(first_response, Utc::now());
        if let Some(step) = self.current_step_id() {
            agent_turn = agent_turn.with_scenario_step(step);
        }
        if reply.degraded {
            agent_turn = agent_turn.degraded();
        }
        self.history.push(agent_turn);

        Ok(reply)
    }

    async fn consume_stream(
        &self,
        request: LlmRequest,
        out: &OutboundHandle,
        cancel: CancellationToken,
        epoch: u64,
    ) -> CoreResult<StreamResult> {
        let mut rx = self.llm.generate(request, cancel).await?;

        let mut buffer = String::new();
        let mut last_emit = tokio::time::Instant::now();

        while let Some(event) = rx.recv().await {
            match event {
                LlmEvent::Delta(delta) => {
                    buffer.push_str(&delta);
                    let boundary = buffer
                        .trim_end()
                        .ends_with(['.', '!', '?', '…']);
                    if boundary || last_emit.elapsed() >= self.config.partial_interval {
                        out.frame(ServerFrame::AgentTextPartial {
                            epoch,
                            text: buffer.clone(),
                        })
                        .await?;
                        last_emit = tokio::time::Instant::now();
                    }
                }
                LlmEvent::Done(usage) => {
                    tracing::debug!(
                        prompt_tokens = usage.prompt_tokens,
                        completion_tokens = usage.completion_tokens,
                        "generation complete"
                    );
                    return Ok(StreamResult::Complete(buffer));
                }
                LlmEvent::Failed(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                LlmEvent::Failed(e) => {
                    tracing::warn!(error = %e, "llm stream failed");
                    if buffer.trim().is_empty() {
                        return Ok(StreamResult::Failed);
                    }
                    return Ok(StreamResult::Partial(buffer));
                }
            }
        }

        // Channel closed without a terminal event.
        if buffer.trim().is_empty() {
            Ok(StreamResult::Failed)
        } else {
            Ok(StreamResult::Partial(buffer))
        }
    }

    fn build_messages(&self) -> Vec<ChatMessage> {
        let mut system = String::from(self.agent.system_prompt());

        if let Some((engine, state)) = &self.scenario {
            let template = engine.template();
            let step_name = template
                .step(&state.current_step)
                .map(|s| s.name())
                .unwrap_or("");
            system.push_str(&format!(
                "\n\nContexte du scénario « {} » — étape actuelle : {} ({}).",
                template.name(),
                step_name,
                state.current_step,
            ));
            let rendered = engine.render_prompt(state);
            if !rendered.is_empty() {
                system.push_str(&format!("\nInstructions pour cette étape :\n{rendered}"));
            }
            if !state.variables.is_empty() {
                system.push_str(&format!(
                    "\nVariables connues : {}",
                    serde_json::to_string(&state.variables).unwrap_or_default()
                ));
            }
        }

        if self.interrupted {
            system.push_str(
                "\n\nL'utilisateur vient de t'interrompre. Reconnais brièvement \
                 l'interruption et laisse-le poursuivre. Sois concis.",
            );
        }

        system.push_str(&format!(
            "\n\nTermine chaque réponse par un marqueur d'émotion au format \
             [EMOTION: nom] choisi parmi : {}.",
            Emotion::ALL
                .iter()
                .map(|e| e.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));

        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(self.window());
        messages
    }

    /// Sliding window over history: whole turns, newest kept, bounded by
    /// both turn count and an approximate token budget (4 chars ≈ 1 token).
    fn window(&self) -> Vec<ChatMessage> {
        let mut selected: Vec<&Turn> = Vec::new();
        let mut token_estimate = 0usize;

        for turn in self.history.iter().rev() {
            let turn_tokens = turn.text().chars().count() / 4 + 1;
            if selected.len() >= self.config.max_window_turns
                || token_estimate + turn_tokens > self.config.max_window_tokens
            {
                break;
            }
            token_estimate += turn_tokens;
            selected.push(turn);
        }

        selected
            .into_iter()
            .rev()
            .map(|turn| match turn.role() {
                eloquence_types::Role::Learner => ChatMessage::user(turn.text()),
                eloquence_types::Role::Agent => ChatMessage::assistant(turn.text()),
            })
            .collect()
    }
}

enum StreamResult {
    Complete(String),
    Partial(String),
    Failed,
}
