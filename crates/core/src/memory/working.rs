use std::ops::{Bound, RangeBounds};
use std::sync::Arc;

use milton_llm::provider::ChatMessage;

use crate::types::MemoryEntry;

/// Ordered conversational context the soul reasons over.
///
/// Values are immutable: every operation returns a new view and leaves the
/// receiver untouched, so derived views never alias each other. The host owns
/// the canonical log and persists whichever view the controller returns.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingMemory {
    soul_name: Arc<str>,
    entries: Arc<Vec<MemoryEntry>>,
}

impl WorkingMemory {
    pub fn new(soul_name: impl Into<Arc<str>>) -> Self {
        Self {
            soul_name: soul_name.into(),
            entries: Arc::new(Vec::new()),
        }
    }

    pub fn from_entries(soul_name: impl Into<Arc<str>>, entries: Vec<MemoryEntry>) -> Self {
        Self {
            soul_name: soul_name.into(),
            entries: Arc::new(entries),
        }
    }

    pub fn soul_name(&self) -> &str {
        &self.soul_name
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<&MemoryEntry> {
        self.entries.first()
    }

    pub fn last(&self) -> Option<&MemoryEntry> {
        self.entries.last()
    }

    /// New view with `entry` appended.
    pub fn with_memory(&self, entry: MemoryEntry) -> Self {
        let mut entries = Vec::with_capacity(self.entries.len() + 1);
        entries.extend_from_slice(&self.entries);
        entries.push(entry);
        self.derive(entries)
    }

    /// New view containing `range` of this one. Out-of-range bounds are clamped.
    pub fn slice(&self, range: impl RangeBounds<usize>) -> Self {
        let len = self.entries.len();
        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s.saturating_add(1),
            Bound::Unbounded => 0,
        }
        .min(len);
        let end = match range.end_bound() {
            Bound::Included(&e) => e.saturating_add(1),
            Bound::Excluded(&e) => e,
            Bound::Unbounded => len,
        }
        .clamp(start, len);
        self.derive(self.entries[start..end].to_vec())
    }

    /// The last `n` entries (all of them if shorter).
    pub fn tail(&self, n: usize) -> Self {
        self.slice(self.entries.len().saturating_sub(n)..)
    }

    /// Everything but the most recent entry.
    pub fn without_last(&self) -> Self {
        self.slice(..self.entries.len().saturating_sub(1))
    }

    /// New view with `other`'s entries appended after this one's.
    pub fn concat(&self, other: &WorkingMemory) -> Self {
        let mut entries = Vec::with_capacity(self.entries.len() + other.entries.len());
        entries.extend_from_slice(&self.entries);
        entries.extend_from_slice(&other.entries);
        self.derive(entries)
    }

    pub fn find(&self, predicate: impl Fn(&MemoryEntry) -> bool) -> Option<&MemoryEntry> {
        self.entries.iter().find(|e| predicate(e))
    }

    /// First entry whose metadata carries a truthy `key`.
    pub fn find_tagged(&self, key: &str) -> Option<&MemoryEntry> {
        self.find(|e| e.is_tagged(key))
    }

    /// New view with every entry passed through `f`.
    pub fn map(&self, f: impl Fn(&MemoryEntry) -> MemoryEntry) -> Self {
        self.derive(self.entries.iter().map(f).collect())
    }

    pub fn to_messages(&self) -> Vec<ChatMessage> {
        self.entries.iter().map(MemoryEntry::to_chat_message).collect()
    }

    fn derive(&self, entries: Vec<MemoryEntry>) -> Self {
        Self {
            soul_name: self.soul_name.clone(),
            entries: Arc::new(entries),
        }
    }
}
