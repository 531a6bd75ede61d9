//! Reflection memory: bounded notes carried from one episode to the next.
//!
//! Capacity is fixed at construction and eviction is first-in first-out.
//! Notes can be persisted as JSON lines so a later run can pick up where a
//! previous one stopped.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// One agent's reflection notes, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionMemory {
    capacity: usize,
    notes: VecDeque<String>,
}

impl ReflectionMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            notes: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a note, evicting the oldest ones past capacity.
    pub fn add_memory(&mut self, note: impl Into<String>) {
        self.notes.push_back(note.into());
        while self.notes.len() > self.capacity {
            self.notes.pop_front();
        }
    }

    /// Notes in insertion order, most recent last.
    pub fn contents(&self) -> Vec<&str> {
        self.notes.iter().map(String::as_str).collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Load notes from a JSON-lines file. A missing file yields an empty
    /// memory; corrupted lines are skipped.
    pub fn load(path: &Path, capacity: usize) -> Self {
        let mut memory = Self::new(capacity);
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return memory,
        };

        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<String>(line) {
                Ok(note) => memory.add_memory(note),
                Err(e) => warn!(error = %e, "Skipping corrupted reflection note"),
            }
        }
        debug!(path = %path.display(), count = memory.len(), "Reflection memory loaded");
        memory
    }

    /// Write every note to `path` as JSON lines, creating parent directories.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(path)?;
        for note in &self.notes {
            let line = serde_json::to_string(note)?;
            writeln!(file, "{line}")?;
        }
        Ok(())
    }
}
