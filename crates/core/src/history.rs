//! Dialog history and turn bookkeeping
//!
//! The history is owned exclusively by the turn controller. Entries
//! strictly alternate roles: a turn whose assistant side ends up empty
//! (empty LLM output, or a barge-in before anything was delivered) is
//! removed entirely rather than leaving a dangling user entry.

use serde::{Deserialize, Serialize};

/// Monotonic per-session turn identifier.
pub type TurnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry in the dialog history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub turn_id: TurnId,
}

/// One user-utterance-plus-agent-reply exchange.
#[derive(Debug, Clone)]
pub struct Turn {
    pub id: TurnId,
    /// Generation at creation; downstream work tagged with an older
    /// generation is discarded.
    pub generation: u64,
    pub user_text: String,
    pub assistant_text: String,
    pub interrupted: bool,
    pub audio_chunk_ids: Vec<String>,
}

impl Turn {
    pub fn new(id: TurnId, generation: u64, user_text: impl Into<String>) -> Self {
        Self {
            id,
            generation,
            user_text: user_text.into(),
            assistant_text: String::new(),
            interrupted: false,
            audio_chunk_ids: Vec::new(),
        }
    }
}

/// Ordered dialog history with strict role alternation.
#[derive(Debug, Default)]
pub struct DialogHistory {
    entries: Vec<HistoryEntry>,
    next_turn_id: TurnId,
}

impl DialogHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent `max` entries, oldest first.
    pub fn window(&self, max: usize) -> &[HistoryEntry] {
        let start = self.entries.len().saturating_sub(max);
        &self.entries[start..]
    }

    /// Seed an empty history from client-supplied entries.
    ///
    /// Entries that would break alternation are skipped with a warning.
    pub fn seed(&mut self, entries: impl IntoIterator<Item = (Role, String)>) {
        if !self.entries.is_empty() {
            tracing::warn!("ignoring seed for non-empty history");
            return;
        }
        for (role, content) in entries {
            if self.entries.last().map(|e| e.role) == Some(role) {
                tracing::warn!(?role, "skipping seed entry that breaks alternation");
                continue;
            }
            let turn_id = self.next_turn_id;
            if role == Role::Assistant {
                self.next_turn_id += 1;
            }
            self.entries.push(HistoryEntry {
                role,
                content,
                turn_id,
            });
        }
        // A trailing user entry has no assistant reply; drop it so the
        // next turn starts clean.
        if self.entries.last().map(|e| e.role) == Some(Role::User) {
            self.entries.pop();
        }
    }

    /// Open a new turn with the user's final transcript.
    ///
    /// If the previous turn never produced an assistant entry, its user
    /// entry is retired first to keep alternation.
    pub fn begin_turn(&mut self, generation: u64, user_text: impl Into<String>) -> Turn {
        if self.entries.last().map(|e| e.role) == Some(Role::User) {
            let stale = self.entries.pop();
            tracing::debug!(
                turn_id = stale.map(|e| e.turn_id),
                "retired user entry from turn with no assistant reply"
            );
        }
        let id = self.next_turn_id;
        self.next_turn_id += 1;
        let turn = Turn::new(id, generation, user_text);
        self.entries.push(HistoryEntry {
            role: Role::User,
            content: turn.user_text.clone(),
            turn_id: id,
        });
        turn
    }

    /// Close a turn with its full assistant text.
    ///
    /// Empty assistant text removes the whole turn from history.
    pub fn commit_assistant(&mut self, turn: &Turn, text: &str) {
        if text.is_empty() {
            self.remove_turn(turn.id);
            return;
        }
        debug_assert_eq!(self.entries.last().map(|e| e.role), Some(Role::User));
        self.entries.push(HistoryEntry {
            role: Role::Assistant,
            content: text.to_string(),
            turn_id: turn.id,
        });
    }

    /// Close a superseded turn.
    ///
    /// `delivered` is the assistant text actually emitted to the client
    /// before the barge-in; when empty the whole turn is removed, when
    /// non-empty it is retained exactly as delivered.
    pub fn abort_turn(&mut self, turn: &Turn, delivered: &str) {
        if delivered.is_empty() {
            self.remove_turn(turn.id);
        } else {
            self.commit_assistant(turn, delivered);
        }
    }

    fn remove_turn(&mut self, turn_id: TurnId) {
        self.entries.retain(|e| e.turn_id != turn_id);
    }

    /// Alternation check used by tests and debug assertions.
    pub fn is_alternating(&self) -> bool {
        self.entries
            .windows(2)
            .all(|w| w[0].role != w[1].role)
    }
}
