//! Tagged, bounded conversation memory.
//!
//! Memory is an ordered sliding window of turns. Any turn can carry tags,
//! which act as checkpoints: the generation engine tags failed attempts and
//! correction turns, then rewinds or excises them once a valid answer arrives.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::defaults;
use crate::error::LlmError;
use crate::types::{CandidateResult, ChatTurn};

/// Memory shared between generations. Callers serialize access through the lock.
pub type SharedMemory = Arc<tokio::sync::Mutex<TaggedMemory>>;

/// One stored turn with its tags.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntry {
    pub turn: ChatTurn,
    pub tags: BTreeSet<String>,
}

impl MemoryEntry {
    fn new(turn: ChatTurn) -> Self {
        Self {
            turn,
            tags: BTreeSet::new(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

#[derive(Debug, Clone)]
pub struct TaggedMemory {
    entries: VecDeque<MemoryEntry>,
    limit: usize,
}

impl Default for TaggedMemory {
    fn default() -> Self {
        Self::new(defaults::memory::LIMIT)
    }
}

impl TaggedMemory {
    /// Create a memory holding at most `limit` turns (at least one).
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Wrap into a [`SharedMemory`].
    pub fn shared(self) -> SharedMemory {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a turn, evicting the oldest turns beyond the limit.
    pub fn add(&mut self, turn: ChatTurn) {
        self.entries.push_back(MemoryEntry::new(turn));
        self.evict();
    }

    pub fn add_all(&mut self, turns: impl IntoIterator<Item = ChatTurn>) {
        self.entries.extend(turns.into_iter().map(MemoryEntry::new));
        self.evict();
    }

    fn evict(&mut self) {
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    /// Append a model result as an assistant turn. Empty results are skipped.
    pub fn add_result(&mut self, result: &CandidateResult) {
        if result.is_empty() {
            return;
        }
        self.add(ChatTurn::assistant_with_calls(
            result.content.clone(),
            result.function_calls.clone(),
        ));
    }

    /// Replace the most recent turn, which must be an assistant turn.
    pub fn update_result(&mut self, result: &CandidateResult) -> Result<(), LlmError> {
        match self.entries.back_mut() {
            Some(entry) if matches!(entry.turn, ChatTurn::Assistant { .. }) => {
                entry.turn =
                    ChatTurn::assistant_with_calls(result.content.clone(), result.function_calls.clone());
                Ok(())
            }
            _ => Err(LlmError::NoAssistantTurn),
        }
    }

    /// Tag the most recent turn. No-op on empty memory.
    pub fn add_tag(&mut self, tag: &str) {
        if let Some(entry) = self.entries.back_mut() {
            entry.tags.insert(tag.to_string());
        }
    }

    /// Tag the turn `back` positions before the most recent one. No-op when out of range.
    pub fn add_tag_from_end(&mut self, back: usize, tag: &str) {
        let Some(index) = self.entries.len().checked_sub(back + 1) else {
            return;
        };
        if let Some(entry) = self.entries.get_mut(index) {
            entry.tags.insert(tag.to_string());
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.entries.iter().any(|e| e.has_tag(tag))
    }

    /// Remove the first turn carrying `tag` and everything after it.
    ///
    /// Returns the removed turns in order.
    pub fn rewind_to_tag(&mut self, tag: &str) -> Result<Vec<ChatTurn>, LlmError> {
        let index = self
            .entries
            .iter()
            .position(|e| e.has_tag(tag))
            .ok_or_else(|| LlmError::TagNotFound(tag.to_string()))?;
        let removed: Vec<ChatTurn> = self.entries.drain(index..).map(|e| e.turn).collect();
        debug!(tag, removed = removed.len(), "rewound memory");
        Ok(removed)
    }

    /// Remove every turn carrying `tag`, wherever it sits.
    pub fn remove_by_tag(&mut self, tag: &str) -> Result<Vec<ChatTurn>, LlmError> {
        if !self.has_tag(tag) {
            return Err(LlmError::TagNotFound(tag.to_string()));
        }
        let (removed, kept): (Vec<_>, Vec<_>) =
            self.entries.drain(..).partition(|e| e.has_tag(tag));
        self.entries = kept.into();
        debug!(tag, removed = removed.len(), "removed tagged turns");
        Ok(removed.into_iter().map(|e| e.turn).collect())
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Stored turns in order.
    pub fn history(&self) -> Vec<ChatTurn> {
        self.entries.iter().map(|e| e.turn.clone()).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&MemoryEntry> {
        self.entries.back()
    }
}
