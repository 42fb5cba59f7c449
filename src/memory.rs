use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Context,
    Result,
    State,
    Plan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: Value,
    pub kind: MemoryKind,
    pub timestamp: DateTime<Utc>,
    /// Write order; breaks timestamp ties.
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    Observation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Working memory of one orchestrator run: keyed facts namespaced by kind,
/// plus a bounded conversation log. Not persisted.
///
/// Age pruning happens only when [`AgentMemory::cleanup`] is called.
#[derive(Debug, Default)]
pub struct AgentMemory {
    entries: HashMap<(MemoryKind, String), MemoryEntry>,
    turns: VecDeque<ConversationTurn>,
    max_turns: usize,
    seq: u64,
}

impl AgentMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            entries: HashMap::new(),
            turns: VecDeque::new(),
            max_turns: max_turns.max(1),
            seq: 0,
        }
    }

    /// Insert or replace the entry for `key` within `kind`'s namespace.
    pub fn remember(&mut self, key: impl Into<String>, value: Value, kind: MemoryKind) {
        let key = key.into();
        self.seq += 1;
        let entry = MemoryEntry {
            key: key.clone(),
            value,
            kind,
            timestamp: Utc::now(),
            seq: self.seq,
        };
        self.entries.insert((kind, key), entry);
    }

    /// Most recent entry with this key in any namespace.
    pub fn recall(&self, key: &str) -> Option<&MemoryEntry> {
        self.entries
            .values()
            .filter(|e| e.key == key)
            .max_by_key(|e| e.seq)
    }

    pub fn recall_in(&self, kind: MemoryKind, key: &str) -> Option<&MemoryEntry> {
        self.entries.get(&(kind, key.to_string()))
    }

    /// All entries of one kind, oldest first.
    pub fn recall_by_kind(&self, kind: MemoryKind) -> Vec<&MemoryEntry> {
        let mut found: Vec<&MemoryEntry> = self.entries.values().filter(|e| e.kind == kind).collect();
        found.sort_by_key(|e| e.seq);
        found
    }

    /// The last `limit` entries of one kind, oldest first.
    pub fn recent_by_kind(&self, kind: MemoryKind, limit: usize) -> Vec<&MemoryEntry> {
        let all = self.recall_by_kind(kind);
        let skip = all.len().saturating_sub(limit);
        all.into_iter().skip(skip).collect()
    }

    pub fn append_turn(&mut self, role: TurnRole, content: impl Into<String>) {
        self.turns.push_back(ConversationTurn {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        });
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    /// The last `limit` turns, oldest first.
    pub fn recent_turns(&self, limit: usize) -> Vec<&ConversationTurn> {
        let skip = self.turns.len().saturating_sub(limit);
        self.turns.iter().skip(skip).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// Drop entries and turns older than `max_age`.
    pub fn cleanup(&mut self, max_age: Duration) -> usize {
        let age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now().checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.cleanup_before(cutoff)
    }

    pub fn cleanup_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len() + self.turns.len();
        self.entries.retain(|_, e| e.timestamp >= cutoff);
        self.turns.retain(|t| t.timestamp >= cutoff);
        let removed = before - (self.entries.len() + self.turns.len());
        if removed > 0 {
            debug!(removed, "pruned stale memory");
        }
        removed
    }
}
