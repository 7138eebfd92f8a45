//! Case identity and the buffered conversation state kept per case.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::legal::policy::{classify_role, is_valid_case_id};

/// A validated case identifier (`^[a-zA-Z0-9-]+$`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CaseId(String);

impl CaseId {
    /// Returns `None` for empty or malformed IDs.
    pub fn parse(raw: &str) -> Option<Self> {
        is_valid_case_id(raw).then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Side of the trial a buffered utterance belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Defense,
    Prosecutor,
}

/// One role-tagged utterance as posted by the browser client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub text: String,
}

/// Buffered, not-yet-delivered conversation for a single case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseRecord {
    pub defense_buffer: Vec<String>,
    pub prosecutor_buffer: Vec<String>,
    /// Number of drains performed since the case was created or last cleared.
    pub thread_id: u64,
}

/// Number of undelivered entries per side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCounts {
    pub defense: usize,
    pub prosecutor: usize,
}

/// Everything delivered by one drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drained {
    pub case_id: CaseId,
    /// Generation delivered by this drain (the counter value before it advanced).
    pub thread_id: u64,
    pub defense: String,
    pub prosecutor: String,
}

impl CaseRecord {
    /// Buffer every non-blank turn on its side, in order.
    pub fn append(&mut self, turns: &[ConversationTurn]) -> PendingCounts {
        for turn in turns {
            let text = turn.text.trim();
            if text.is_empty() {
                continue;
            }
            match classify_role(&turn.role) {
                Party::Defense => self.defense_buffer.push(text.to_string()),
                Party::Prosecutor => self.prosecutor_buffer.push(text.to_string()),
            }
        }
        self.pending()
    }

    pub fn pending(&self) -> PendingCounts {
        PendingCounts {
            defense: self.defense_buffer.len(),
            prosecutor: self.prosecutor_buffer.len(),
        }
    }

    /// Join and empty both buffers, then advance the thread counter.
    pub fn drain(&mut self, case_id: CaseId) -> Drained {
        let defense = std::mem::take(&mut self.defense_buffer).join(" ");
        let prosecutor = std::mem::take(&mut self.prosecutor_buffer).join(" ");
        let thread_id = self.thread_id;
        self.thread_id += 1;
        Drained {
            case_id,
            thread_id,
            defense,
            prosecutor,
        }
    }
}
