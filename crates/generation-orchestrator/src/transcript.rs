//! Bounded per-session chat transcripts.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// In-memory transcripts keyed by session, each capped at `max_turns`.
#[derive(Debug)]
pub struct TranscriptStore {
    max_turns: usize,
    sessions: Mutex<HashMap<String, VecDeque<ChatTurn>>>,
}

impl TranscriptStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns: max_turns.max(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Current transcript for `session`, oldest turn first.
    pub fn history(&self, session: &str) -> Vec<ChatTurn> {
        self.lock()
            .get(session)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Replace the transcript, keeping only the most recent turns.
    pub fn replace(&self, session: &str, turns: Vec<ChatTurn>) {
        let skip = turns.len().saturating_sub(self.max_turns);
        let retained: VecDeque<ChatTurn> = turns.into_iter().skip(skip).collect();
        self.lock().insert(session.to_string(), retained);
    }

    /// Append `turns` to the current transcript under one lock, dropping the
    /// oldest turns past the cap.
    pub fn append(&self, session: &str, turns: impl IntoIterator<Item = ChatTurn>) {
        let mut sessions = self.lock();
        let transcript = sessions.entry(session.to_string()).or_default();
        transcript.extend(turns);
        while transcript.len() > self.max_turns {
            transcript.pop_front();
        }
    }

    /// Forget `session`; returns whether a transcript existed.
    pub fn clear(&self, session: &str) -> bool {
        self.lock().remove(session).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<ChatTurn>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
