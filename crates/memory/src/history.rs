//! Episode history: the labeled transcript one agent accumulates.
//!
//! Entries are appended in order and never reordered. The only removal is
//! bulk removal by label. Rendering goes through a [`HistoryView`], which
//! filters and truncates the transcript without touching storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Labels the history seeds itself with.
pub const LABEL_EXPLAIN: &str = "explain";
pub const LABEL_TASK: &str = "task";
pub const LABEL_MEMORY: &str = "memory";

/// One labeled line of the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub label: String,
    pub content: String,
    pub recorded_at: DateTime<Utc>,
}

/// One agent's episode transcript.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// A history opened with the episode briefing, the agent's mission, and
    /// its reflection notes from earlier episodes.
    pub fn seeded<S: AsRef<str>>(explain: &str, mission: &str, reflections: &[S]) -> Self {
        let mut history = Self::new();
        if !explain.is_empty() {
            history.add(LABEL_EXPLAIN, explain);
        }
        history.add(LABEL_TASK, mission);
        for note in reflections {
            history.add(LABEL_MEMORY, note.as_ref());
        }
        history
    }

    /// Append one entry.
    pub fn add(&mut self, label: impl Into<String>, content: impl Into<String>) {
        self.entries.push(HistoryEntry {
            label: label.into(),
            content: content.into(),
            recorded_at: Utc::now(),
        });
    }

    /// Remove every entry carrying `label`. Returns how many were removed.
    pub fn remove(&mut self, label: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.label != label);
        before - self.entries.len()
    }

    /// Render the entries `view` admits, one `label: content` line each,
    /// in chronological order.
    pub fn render(&self, view: &HistoryView) -> String {
        let mut totals: HashMap<&str, usize> = HashMap::new();
        for entry in &self.entries {
            *totals.entry(entry.label.as_str()).or_default() += 1;
        }

        let mut seen: HashMap<&str, usize> = HashMap::new();
        let mut lines = Vec::new();
        for entry in &self.entries {
            let label = entry.label.as_str();
            let index = seen.entry(label).or_default();
            let position = *index;
            *index += 1;

            if !view.allows(label) {
                continue;
            }
            // Keep only the most recent `limit` entries of this label
            if let Some(limit) = view.limit_for(label) {
                let total = totals.get(label).copied().unwrap_or(0);
                if position + limit < total {
                    continue;
                }
            }
            lines.push(format!("{}: {}", entry.label, entry.content));
        }
        lines.join("\n")
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Number of entries carrying `label`.
    pub fn count(&self, label: &str) -> usize {
        self.entries.iter().filter(|e| e.label == label).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Which entries a rendered history shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryView {
    /// Most recent entries kept per label. `None` keeps all.
    pub length: Option<usize>,
    /// Allowed labels. Empty allows every label.
    pub labels: Vec<String>,
    /// Per-label overrides of `length`.
    pub labels_len: BTreeMap<String, usize>,
}

impl HistoryView {
    /// Show everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(
        length: Option<usize>,
        labels: Vec<String>,
        labels_len: BTreeMap<String, usize>,
    ) -> Self {
        Self {
            length,
            labels,
            labels_len,
        }
    }

    /// A copy of this view with `label` limited to `len` entries.
    pub fn with_label_len(&self, label: &str, len: usize) -> Self {
        let mut view = self.clone();
        view.labels_len.insert(label.to_string(), len);
        view
    }

    fn allows(&self, label: &str) -> bool {
        self.labels.is_empty() || self.labels.iter().any(|l| l == label)
    }

    fn limit_for(&self, label: &str) -> Option<usize> {
        self.labels_len.get(label).copied().or(self.length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> History {
        let mut h = History::new();
        h.add("action", "a1");
        h.add("message", "m1");
        h.add("action", "a2");
        h.add("consideration", "c1");
        h.add("action", "a3");
        h.add("message", "m2");
        h
    }

    #[test]
    fn seeded_history_opens_with_briefing() {
        let h = History::seeded("grid world", "open the door", &["r1", "r2"]);
        let labels: Vec<&str> = h.entries().iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["explain", "task", "memory", "memory"]);
        assert_eq!(h.entries()[3].content, "r2");
    }

    #[test]
    fn seeded_history_skips_empty_briefing() {
        let h = History::seeded::<&str>("", "mission", &[]);
        assert_eq!(h.len(), 1);
        assert_eq!(h.count(LABEL_TASK), 1);
    }

    #[test]
    fn remove_drops_only_matching_entries() {
        let mut h = sample();
        assert_eq!(h.remove("action"), 3);
        let contents: Vec<&str> = h.entries().iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["m1", "c1", "m2"]);
        assert_eq!(h.remove("action"), 0);
    }

    #[test]
    fn render_all_is_chronological() {
        let h = sample();
        let text = h.render(&HistoryView::all());
        assert_eq!(
            text,
            "action: a1\nmessage: m1\naction: a2\nconsideration: c1\naction: a3\nmessage: m2"
        );
    }

    #[test]
    fn render_filters_labels() {
        let h = sample();
        let view = HistoryView::new(None, vec!["message".into()], BTreeMap::new());
        assert_eq!(h.render(&view), "message: m1\nmessage: m2");
    }

    #[test]
    fn render_keeps_most_recent_per_label() {
        let h = sample();
        let view = HistoryView::new(Some(1), vec![], BTreeMap::new());
        assert_eq!(
            h.render(&view),
            "consideration: c1\naction: a3\nmessage: m2"
        );
    }

    #[test]
    fn label_len_overrides_global_length() {
        let h = sample();
        let view = HistoryView::new(Some(1), vec![], BTreeMap::new()).with_label_len("action", 2);
        assert_eq!(
            h.render(&view),
            "action: a2\nconsideration: c1\naction: a3\nmessage: m2"
        );
    }

    #[test]
    fn zero_label_len_hides_label() {
        let h = sample();
        let base = HistoryView::all();
        let narrowed = base.with_label_len("consideration", 0);
        assert!(!h.render(&narrowed).contains("consideration"));
        // Override is a copy; the base view is untouched
        assert!(h.render(&base).contains("consideration"));
    }

    #[test]
    fn render_leaves_storage_untouched() {
        let h = sample();
        let _ = h.render(&HistoryView::new(Some(0), vec![], BTreeMap::new()));
        assert_eq!(h.len(), 6);
    }

    #[test]
    fn empty_history_renders_empty() {
        assert_eq!(History::new().render(&HistoryView::all()), "");
    }
}
