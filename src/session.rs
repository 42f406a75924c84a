//! Guided-session state and registry.
//!
//! Each user has at most one live [`GuidedSession`]: a decomposed process,
//! a cursor over its steps, and the set of completed steps. Sessions live
//! in an in-process [`SessionStore`]; they do not survive a restart and
//! are not shared across instances, so multi-instance deployments must
//! externalize this registry.
//!
//! Messages addressed to an active session are interpreted through
//! [`SessionCommand::parse`], a total function over the lowercased text.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::models::{ProcessDefinition, ProcessStep, Progress};

/// A per-user walkthrough of one document's decomposed steps.
///
/// Invariant: `0 <= current_step_index < process.steps.len()`, and
/// `completed_steps` only holds indices in that range. The process always
/// has at least one step; decomposition guarantees this via its skeleton
/// fallback.
#[derive(Debug, Clone)]
pub struct GuidedSession {
    pub user_id: String,
    pub source_document_id: String,
    pub process: ProcessDefinition,
    pub current_step_index: usize,
    pub completed_steps: HashSet<usize>,
    pub started_at: DateTime<Utc>,
}

impl GuidedSession {
    pub fn new(user_id: String, source_document_id: String, process: ProcessDefinition) -> Self {
        debug_assert!(!process.steps.is_empty());
        GuidedSession {
            user_id,
            source_document_id,
            process,
            current_step_index: 0,
            completed_steps: HashSet::new(),
            started_at: Utc::now(),
        }
    }

    pub fn current_step(&self) -> &ProcessStep {
        &self.process.steps[self.current_step_index]
    }

    /// Advance to the next step. Returns false when already at the last.
    pub fn advance(&mut self) -> bool {
        if self.current_step_index + 1 < self.process.steps.len() {
            self.current_step_index += 1;
            true
        } else {
            false
        }
    }

    /// Step back. Returns false when already at the first step.
    pub fn step_back(&mut self) -> bool {
        if self.current_step_index > 0 {
            self.current_step_index -= 1;
            true
        } else {
            false
        }
    }

    pub fn mark_step_completed(&mut self) {
        self.completed_steps.insert(self.current_step_index);
    }

    pub fn is_last_step(&self) -> bool {
        self.current_step_index + 1 == self.process.steps.len()
    }

    pub fn is_completed(&self) -> bool {
        self.completed_steps.len() == self.process.steps.len()
    }

    pub fn progress(&self) -> Progress {
        let total = self.process.steps.len();
        let completed = self.completed_steps.len();
        Progress {
            current_step: self.current_step_index + 1,
            total_steps: total,
            completed_steps: completed,
            progress_percentage: ((completed as f64 / total as f64) * 100.0).round() as u32,
        }
    }
}

/// How a message addressed to an active session is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Next,
    Previous,
    Stop,
    CompleteStep,
    Question,
}

/// Words that signal the current step has been carried out.
const COMPLETION_INDICATORS: &[&str] = &[
    "done",
    "finished",
    "completed",
    "ok",
    "good",
    "validated",
    "sent",
    "created",
    "configured",
];

impl SessionCommand {
    /// Total over all inputs: anything that is not a recognized command is
    /// a question about the current step. Checks run in priority order on
    /// the lowercased message.
    pub fn parse(message: &str) -> SessionCommand {
        let lower = message.to_lowercase();
        if lower.contains("next") {
            SessionCommand::Next
        } else if lower.contains("previous") {
            SessionCommand::Previous
        } else if lower.contains("stop") || lower.contains("quit") {
            SessionCommand::Stop
        } else if COMPLETION_INDICATORS.iter().any(|w| lower.contains(w)) {
            SessionCommand::CompleteStep
        } else {
            SessionCommand::Question
        }
    }
}

struct SessionEntry {
    started_at: DateTime<Utc>,
    session: Arc<tokio::sync::Mutex<GuidedSession>>,
}

/// In-process session registry, keyed by user id.
///
/// Each session sits behind its own async mutex, so concurrent requests
/// from the same user serialize while different users proceed in
/// parallel. Constructed at service start; `clear` resets state for tests.
#[derive(Default)]
pub struct SessionStore {
    entries: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore::default()
    }

    /// Store a session, silently replacing any existing session for the
    /// same user.
    pub fn insert(&self, session: GuidedSession) -> Arc<tokio::sync::Mutex<GuidedSession>> {
        let user_id = session.user_id.clone();
        let started_at = session.started_at;
        let handle = Arc::new(tokio::sync::Mutex::new(session));
        self.entries.lock().expect("session lock").insert(
            user_id,
            SessionEntry {
                started_at,
                session: handle.clone(),
            },
        );
        handle
    }

    pub fn get(&self, user_id: &str) -> Option<Arc<tokio::sync::Mutex<GuidedSession>>> {
        self.entries
            .lock()
            .expect("session lock")
            .get(user_id)
            .map(|e| e.session.clone())
    }

    pub fn remove(&self, user_id: &str) -> bool {
        self.entries
            .lock()
            .expect("session lock")
            .remove(user_id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("session lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().expect("session lock").clear();
    }

    /// Remove sessions whose creation time is older than `max_age`,
    /// returning how many were removed. The basis is deliberately the
    /// creation time, not the last interaction.
    pub fn sweep_idle(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let mut entries = self.entries.lock().expect("session lock");
        let before = entries.len();
        entries.retain(|user_id, entry| {
            let keep = now - entry.started_at <= max_age;
            if !keep {
                tracing::info!(user = %user_id, "removing idle guided session");
            }
            keep
        });
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_process(step_count: usize) -> ProcessDefinition {
        ProcessDefinition {
            title: "Customer Onboarding".to_string(),
            description: "Bring a new customer live".to_string(),
            estimated_duration: Some("1 hour".to_string()),
            steps: (0..step_count)
                .map(|i| ProcessStep {
                    id: format!("step_{}", i + 1),
                    title: format!("Step {}", i + 1),
                    description: format!("Do thing {}", i + 1),
                    estimated_time: None,
                    checkpoints: Vec::new(),
                    tools: Vec::new(),
                    tips: None,
                })
                .collect(),
        }
    }

    fn make_session(step_count: usize) -> GuidedSession {
        GuidedSession::new("u1".to_string(), "d1".to_string(), make_process(step_count))
    }

    #[test]
    fn test_advance_stops_at_last_step() {
        let mut session = make_session(3);
        assert!(session.advance());
        assert!(session.advance());
        assert!(!session.advance());
        assert_eq!(session.current_step_index, 2);
        assert!(session.is_last_step());
    }

    #[test]
    fn test_step_back_stops_at_first_step() {
        let mut session = make_session(3);
        assert!(!session.step_back());
        session.advance();
        assert!(session.step_back());
        assert_eq!(session.current_step_index, 0);
    }

    #[test]
    fn test_progress_percentage() {
        let mut session = make_session(3);
        assert_eq!(session.progress().progress_percentage, 0);
        session.mark_step_completed();
        assert_eq!(session.progress().progress_percentage, 33);
        session.advance();
        session.mark_step_completed();
        session.advance();
        session.mark_step_completed();
        assert_eq!(session.progress().progress_percentage, 100);
        assert!(session.is_completed());
    }

    #[test]
    fn test_marking_same_step_twice_counts_once() {
        let mut session = make_session(2);
        session.mark_step_completed();
        session.mark_step_completed();
        assert_eq!(session.progress().completed_steps, 1);
    }

    #[test]
    fn test_command_parse_priority() {
        assert_eq!(SessionCommand::parse("Next please"), SessionCommand::Next);
        assert_eq!(
            SessionCommand::parse("go to the previous one"),
            SessionCommand::Previous
        );
        assert_eq!(SessionCommand::parse("STOP"), SessionCommand::Stop);
        assert_eq!(SessionCommand::parse("quit now"), SessionCommand::Stop);
        assert_eq!(
            SessionCommand::parse("ok that's done"),
            SessionCommand::CompleteStep
        );
        assert_eq!(
            SessionCommand::parse("what tool do I use here?"),
            SessionCommand::Question
        );
    }

    #[test]
    fn test_command_parse_next_beats_completion_words() {
        assert_eq!(
            SessionCommand::parse("done, next step"),
            SessionCommand::Next
        );
    }

    #[test]
    fn test_store_overwrites_existing_session() {
        let store = SessionStore::new();
        store.insert(make_session(3));
        let mut replacement = make_session(2);
        replacement.process.title = "Offboarding".to_string();
        store.insert(replacement);
        assert_eq!(store.len(), 1);
        let handle = store.get("u1").unwrap();
        let session = handle.blocking_lock();
        assert_eq!(session.process.title, "Offboarding");
    }

    #[test]
    fn test_remove_and_clear() {
        let store = SessionStore::new();
        store.insert(make_session(1));
        assert!(store.remove("u1"));
        assert!(!store.remove("u1"));
        store.insert(make_session(1));
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_sweep_removes_old_sessions_by_creation_time() {
        let store = SessionStore::new();
        let mut old = make_session(2);
        old.started_at = Utc::now() - Duration::hours(2);
        store.insert(old);

        let mut fresh = make_session(2);
        fresh.user_id = "u2".to_string();
        store.insert(fresh);

        let removed = store.sweep_idle(Utc::now(), Duration::minutes(30));
        assert_eq!(removed, 1);
        assert!(store.get("u1").is_none());
        assert!(store.get("u2").is_some());
    }
}
