//! Feedback sink: persists learner audio and enqueues pronunciation-scoring
//! jobs for the external worker.
//!
//! Writes are fire-and-forget with at-least-once semantics; the worker
//! de-duplicates on (session id, turn index). Layout on disk:
//! `{audio_root}/<session>/<turn>.wav` for segments,
//! `{feedback_root}/queue/<session>-<turn>.json` for pending jobs and
//! `{feedback_root}/<session>/<turn>.json` for completed artifacts.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One scoring work item handed to the external queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringJob {
    pub session_id: String,
    pub turn_index: usize,
    pub audio_path: String,
    pub reference_text: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario_step: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

pub struct FeedbackSink {
    audio_root: PathBuf,
    feedback_root: PathBuf,
}

impl FeedbackSink {
    pub fn new(audio_root: impl Into<PathBuf>, feedback_root: impl Into<PathBuf>) -> Self {
        Self {
            audio_root: audio_root.into(),
            feedback_root: feedback_root.into(),
        }
    }

    /// Persists one learner segment, returning the wav path.
    pub fn save_segment_audio(
        &self,
        session_id: &str,
        turn_index: usize,
        pcm: &[u8],
    ) -> CoreResult<PathBuf> {
        let path = self
            .audio_root
            .join(session_id)
            .join(format!("{turn_index}.wav"));
        eloquence_audio::wav::write_pcm16(&path, pcm, eloquence_types::audio::SAMPLE_RATE)
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        Ok(path)
    }

    /// Enqueues one scoring job. Errors are logged, never propagated: the
    /// conversational path must not stall on the scoring queue.
    pub fn submit(&self, job: &ScoringJob) {
        let queue_dir = self.feedback_root.join("queue");
        let path = queue_dir.join(format!("{}-{}.json", job.session_id, job.turn_index));

        let result = std::fs::create_dir_all(&queue_dir)
            .map_err(CoreError::from)
            .and_then(|_| serde_json::to_vec_pretty(job).map_err(CoreError::from))
            .and_then(|bytes| std::fs::write(&path, bytes).map_err(CoreError::from));

        match result {
            Ok(()) => tracing::debug!(
                session = %job.session_id,
                turn = job.turn_index,
                "scoring job enqueued"
            ),
            Err(e) => tracing::error!(
                session = %job.session_id,
                turn = job.turn_index,
                error = %e,
                "failed to enqueue scoring job"
            ),
        }
    }

    /// Reads a completed scoring artifact, if the worker has produced one.
    pub fn load_artifact(
        &self,
        session_id: &str,
        turn_index: usize,
    ) -> CoreResult<serde_json::Value> {
        let path = self
            .feedback_root
            .join(session_id)
            .join(format!("{turn_index}.json"));
        let bytes = std::fs::read(&path).map_err(|_| {
            CoreError::NotFound(format!("no feedback for {session_id}/{turn_index}"))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// All queued jobs for a session, used by tests and the drain tooling.
    pub fn queued_jobs(&self, session_id: &str) -> Vec<ScoringJob> {
        let queue_dir = self.feedback_root.join("queue");
        let Ok(entries) = std::fs::read_dir(&queue_dir) else {
            return Vec::new();
        };
        let prefix = format!("{session_id}-");
        let mut jobs: Vec<ScoringJob> = entries
            .flatten()
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with(&prefix)
            })
            .filter_map(|entry| {
                let bytes = std::fs::read(entry.path()).ok()?;
                serde_json::from_slice(&bytes).ok()
            })
            .collect();
        jobs.sort_by_key(|job: &ScoringJob| job.turn_index);
        jobs
    }

    pub fn audio_root(&self) -> &Path {
        &self.audio_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (FeedbackSink, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let sink = FeedbackSink::new(dir.path().join("audio"), dir.path().join("feedback"));
        (sink, dir)
    }

    fn job(session: &str, turn: usize) -> ScoringJob {
        ScoringJob {
            session_id: session.into(),
            turn_index: turn,
            audio_path: format!("/audio/{session}/{turn}.wav"),
            reference_text: "Bonjour, je m'appelle Marie.".into(),
            language: "fr".into(),
            scenario_step: Some("presentation".into()),
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn test_segment_audio_lands_under_session_dir() {
        let (sink, dir) = sink();
        let pcm = vec![0u8; 640];
        let path = sink.save_segment_audio("s1", 1, &pcm).unwrap();
        assert!(path.ends_with("s1/1.wav"));
        assert!(path.exists());
        drop(dir);
    }

    #[test]
    fn test_submit_is_idempotent_per_turn() {
        let (sink, _dir) = sink();
        sink.submit(&job("s1", 1));
        sink.submit(&job("s1", 1));
        sink.submit(&job("s1", 2));

        let jobs = sink.queued_jobs("s1");
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].turn_index, 1);
        assert_eq!(jobs[1].turn_index, 2);
    }

    #[test]
    fn test_queued_jobs_are_scoped_per_session() {
        let (sink, _dir) = sink();
        sink.submit(&job("s1", 1));
        sink.submit(&job("s2", 1));
        assert_eq!(sink.queued_jobs("s1").len(), 1);
    }

    #[test]
    fn test_missing_artifact_is_not_found() {
        let (sink, _dir) = sink();
        let err = sink.load_artifact("s1", 9).unwrap_err();
        assert_eq!(err.code(), eloquence_types::ErrorCode::NotFound);
    }

    #[test]
    fn test_artifact_round_trip() {
        let (sink, dir) = sink();
        let artifact_dir = dir.path().join("feedback").join("s1");
        std::fs::create_dir_all(&artifact_dir).unwrap();
        std::fs::write(
            artifact_dir.join("1.json"),
            r#"{"score": 0.82, "phonemes": []}"#,
        )
        .unwrap();

        let value = sink.load_artifact("s1", 1).unwrap();
        assert_eq!(value["score"], 0.82);
    }
}
