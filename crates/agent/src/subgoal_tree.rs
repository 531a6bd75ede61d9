//! Subgoal tree: one agent's hierarchical plan.
//!
//! The root is the mission. Each child refines its parent into something
//! more concrete, so children are resolved before the goal they refine and
//! execution order is post-order. A single cursor marks the subgoal being
//! pursued; refinement pushes it down, achievement pops it up.
//!
//! ```text
//!        mission            ← root, resolved last
//!       /       \
//!  get key    open door     ← refinements, left to right
//!     |
//!  go to key                ← cursor (deepest pending node)
//! ```

use serde::{Deserialize, Serialize};

/// Index of a node in the tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubgoalStatus {
    #[default]
    Pending,
    Achieved,
    Failed,
}

impl SubgoalStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Failed => 1,
            Self::Achieved => 2,
        }
    }

    /// The more resolved of two statuses (achieved > failed > pending).
    fn strongest(self, other: Self) -> Self {
        if other.rank() > self.rank() { other } else { self }
    }
}

/// A node in the arena.
#[derive(Debug, Clone)]
pub struct SubgoalNode {
    pub label: String,
    pub status: SubgoalStatus,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Owned, serializable form of a (sub)tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubgoalRecord {
    pub label: String,
    #[serde(default)]
    pub status: SubgoalStatus,
    #[serde(default)]
    pub children: Vec<SubgoalRecord>,
}

impl SubgoalRecord {
    pub fn new(label: impl Into<String>, status: SubgoalStatus) -> Self {
        Self {
            label: label.into(),
            status,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<SubgoalRecord>) -> Self {
        self.children = children;
        self
    }
}

/// Hierarchical plan with a traversal cursor.
#[derive(Debug, Clone, Default)]
pub struct SubgoalTree {
    nodes: Vec<SubgoalNode>,
    cursor: Option<NodeId>,
}

impl SubgoalTree {
    /// A tree holding only the mission.
    pub fn new(mission: impl Into<String>) -> Self {
        let mut tree = Self::default();
        tree.append(mission);
        tree
    }

    // ── Episode operations ─────────────────────────────────────────────

    /// Add a pending refinement under the cursor and move the cursor to
    /// it. On an empty tree this creates the root.
    pub fn append(&mut self, label: impl Into<String>) -> NodeId {
        let id = NodeId(self.nodes.len());
        let parent = self.cursor;
        self.nodes.push(SubgoalNode {
            label: label.into(),
            status: SubgoalStatus::Pending,
            parent,
            children: Vec::new(),
        });
        if let Some(p) = parent {
            self.nodes[p.0].children.push(id);
        }
        self.cursor = Some(id);
        id
    }

    /// Labels from the mission down to the cursor.
    pub fn subgoals(&self) -> Vec<String> {
        let mut path: Vec<String> = self
            .path_to_root()
            .into_iter()
            .map(|id| self.nodes[id.0].label.clone())
            .collect();
        path.reverse();
        path
    }

    /// `(achieved, not_achieved)`: achieved subgoals resolved before the
    /// cursor in execution order, then the cursor and every unresolved
    /// goal above it up to the mission.
    pub fn achieved_not_achieved(&self) -> (Vec<String>, Vec<String>) {
        let Some(cursor) = self.cursor else {
            return (Vec::new(), Vec::new());
        };

        let mut achieved = Vec::new();
        for id in self.post_order() {
            if id == cursor {
                if self.nodes[id.0].status == SubgoalStatus::Achieved {
                    achieved.push(self.nodes[id.0].label.clone());
                }
                break;
            }
            if self.nodes[id.0].status == SubgoalStatus::Achieved {
                achieved.push(self.nodes[id.0].label.clone());
            }
        }

        let not_achieved = self
            .path_to_root()
            .into_iter()
            .filter(|id| self.nodes[id.0].status != SubgoalStatus::Achieved)
            .map(|id| self.nodes[id.0].label.clone())
            .collect();

        (achieved, not_achieved)
    }

    /// Mark the cursor achieved and move on to the next pending node in
    /// execution order: the deepest first-pending node of a later pending
    /// sibling, else the parent. At the mission the cursor stays put and
    /// the tree is complete. Returns `false` when there was no pending
    /// cursor to mark.
    pub fn mark_achieved(&mut self) -> bool {
        let Some(cursor) = self.cursor else {
            return false;
        };
        let node = &mut self.nodes[cursor.0];
        if node.status != SubgoalStatus::Pending {
            return false;
        }
        node.status = SubgoalStatus::Achieved;
        let Some(parent) = node.parent else {
            return true;
        };

        let next_sibling = self.nodes[parent.0]
            .children
            .iter()
            .copied()
            .skip_while(|c| *c != cursor)
            .skip(1)
            .find(|c| self.nodes[c.0].status == SubgoalStatus::Pending);
        self.cursor = Some(match next_sibling {
            Some(sibling) => self.first_pending_leaf(sibling),
            None => parent,
        });
        true
    }

    /// Mark every pending goal from the cursor up to the mission as failed.
    pub fn append_failed_node(&mut self) {
        for id in self.path_to_root() {
            let node = &mut self.nodes[id.0];
            if node.status == SubgoalStatus::Pending {
                node.status = SubgoalStatus::Failed;
            }
        }
    }

    /// `(achieved, failed)` over the whole tree in execution order.
    pub fn all_sequence(&self) -> (Vec<String>, Vec<String>) {
        let mut achieved = Vec::new();
        let mut failed = Vec::new();
        for id in self.post_order() {
            let node = &self.nodes[id.0];
            match node.status {
                SubgoalStatus::Achieved => achieved.push(node.label.clone()),
                SubgoalStatus::Failed => failed.push(node.label.clone()),
                SubgoalStatus::Pending => {}
            }
        }
        (achieved, failed)
    }

    // ── Serialization ──────────────────────────────────────────────────

    /// Snapshot of the whole tree, `None` when empty.
    pub fn to_record(&self) -> Option<SubgoalRecord> {
        self.root().map(|root| self.record_of(root))
    }

    /// Replace the tree with `record`. The cursor lands on the root.
    pub fn set_record(&mut self, record: &SubgoalRecord) {
        self.nodes.clear();
        self.push_record(record, None);
        self.cursor = self.root();
    }

    // ── Replay maintenance ─────────────────────────────────────────────

    /// Put the cursor on the root.
    pub fn reset_access(&mut self) {
        self.cursor = self.root();
    }

    /// Normalize labels and collapse duplicates until stable: a child
    /// labeled like its parent is spliced into the parent, and adjacent
    /// equal siblings merge into the first one.
    ///
    /// Leaves the cursor on the root.
    pub fn reduction(&mut self) {
        let Some(mut record) = self.to_record() else {
            return;
        };
        normalize(&mut record);
        while reduce(&mut record) {}
        self.set_record(&record);
    }

    /// Reopen the mission for a new attempt and resolve everything under
    /// an achieved goal as achieved.
    pub fn extract(&mut self) {
        let Some(root) = self.root() else {
            return;
        };
        for id in self.pre_order() {
            let node = &self.nodes[id.0];
            if node.status == SubgoalStatus::Achieved {
                let children = node.children.clone();
                for child in children {
                    self.nodes[child.0].status = SubgoalStatus::Achieved;
                }
            }
        }
        self.nodes[root.0].status = SubgoalStatus::Pending;
    }

    /// Drop every failed subtree below the root. Leaves the cursor on the
    /// root.
    pub fn remove_failed_node(&mut self) {
        let Some(mut record) = self.to_record() else {
            return;
        };
        prune_failed(&mut record);
        self.set_record(&record);
    }

    /// From the root, descend into the first pending child until none is
    /// left.
    pub fn move_to_leaf(&mut self) {
        if let Some(root) = self.root() {
            self.cursor = Some(self.first_pending_leaf(root));
        }
    }

    // ── Accessors ──────────────────────────────────────────────────────

    pub fn cursor(&self) -> Option<NodeId> {
        self.cursor
    }

    pub fn cursor_label(&self) -> Option<&str> {
        self.cursor.map(|id| self.nodes[id.0].label.as_str())
    }

    pub fn mission(&self) -> Option<&str> {
        self.nodes.first().map(|n| n.label.as_str())
    }

    /// The mission has been achieved.
    pub fn is_complete(&self) -> bool {
        self.nodes
            .first()
            .is_some_and(|n| n.status == SubgoalStatus::Achieved)
    }

    pub fn get(&self, id: NodeId) -> Option<&SubgoalNode> {
        self.nodes.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn root(&self) -> Option<NodeId> {
        (!self.nodes.is_empty()).then_some(NodeId(0))
    }

    /// Descend from `from` into the first pending child until none is left.
    fn first_pending_leaf(&self, from: NodeId) -> NodeId {
        let mut at = from;
        while let Some(next) = self.nodes[at.0]
            .children
            .iter()
            .copied()
            .find(|c| self.nodes[c.0].status == SubgoalStatus::Pending)
        {
            at = next;
        }
        at
    }

    /// Cursor first, root last.
    fn path_to_root(&self) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut at = self.cursor;
        while let Some(id) = at {
            path.push(id);
            at = self.nodes[id.0].parent;
        }
        path
    }

    fn post_order(&self) -> Vec<NodeId> {
        fn walk(tree: &SubgoalTree, id: NodeId, out: &mut Vec<NodeId>) {
            for &child in &tree.nodes[id.0].children {
                walk(tree, child, out);
            }
            out.push(id);
        }
        let mut out = Vec::with_capacity(self.nodes.len());
        if let Some(root) = self.root() {
            walk(self, root, &mut out);
        }
        out
    }

    fn pre_order(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.root().into_iter().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.nodes[id.0].children.iter().rev().copied());
        }
        out
    }

    fn record_of(&self, id: NodeId) -> SubgoalRecord {
        let node = &self.nodes[id.0];
        SubgoalRecord {
            label: node.label.clone(),
            status: node.status,
            children: node.children.iter().map(|&c| self.record_of(c)).collect(),
        }
    }

    fn push_record(&mut self, record: &SubgoalRecord, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(SubgoalNode {
            label: record.label.clone(),
            status: record.status,
            parent,
            children: Vec::new(),
        });
        for child in &record.children {
            let child_id = self.push_record(child, Some(id));
            self.nodes[id.0].children.push(child_id);
        }
        id
    }
}

fn normalize(record: &mut SubgoalRecord) {
    record.label = record.label.trim().to_lowercase();
    for child in &mut record.children {
        normalize(child);
    }
}

/// One reduction pass. Returns whether anything changed.
fn reduce(record: &mut SubgoalRecord) -> bool {
    let mut changed = false;

    let mut spliced = Vec::with_capacity(record.children.len());
    for child in std::mem::take(&mut record.children) {
        if child.label == record.label {
            record.status = record.status.strongest(child.status);
            spliced.extend(child.children);
            changed = true;
        } else {
            spliced.push(child);
        }
    }

    let mut merged: Vec<SubgoalRecord> = Vec::with_capacity(spliced.len());
    for child in spliced {
        match merged.last_mut() {
            Some(prev) if prev.label == child.label => {
                prev.status = prev.status.strongest(child.status);
                prev.children.extend(child.children);
                changed = true;
            }
            _ => merged.push(child),
        }
    }
    record.children = merged;

    for child in &mut record.children {
        changed |= reduce(child);
    }
    changed
}

fn prune_failed(record: &mut SubgoalRecord) {
    record
        .children
        .retain(|c| c.status != SubgoalStatus::Failed);
    for child in &mut record.children {
        prune_failed(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SubgoalStatus::*;

    fn labels(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn chain(mission: &str, refinements: &[&str]) -> SubgoalTree {
        let mut tree = SubgoalTree::new(mission);
        for r in refinements {
            tree.append(*r);
        }
        tree
    }

    #[test]
    fn appends_on_empty_tree_form_the_plan() {
        let mut tree = SubgoalTree::default();
        assert!(tree.subgoals().is_empty());
        for label in ["open door", "get key", "go to key"] {
            tree.append(label);
        }
        assert_eq!(tree.subgoals(), labels(&["open door", "get key", "go to key"]));
        assert_eq!(tree.mission(), Some("open door"));
        assert_eq!(tree.cursor_label(), Some("go to key"));
    }

    #[test]
    fn new_tree_holds_only_the_mission() {
        let tree = SubgoalTree::new("open door");
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.subgoals(), labels(&["open door"]));
        let (achieved, not_achieved) = tree.achieved_not_achieved();
        assert!(achieved.is_empty());
        assert_eq!(not_achieved, labels(&["open door"]));
    }

    #[test]
    fn mark_achieved_walks_up_the_chain() {
        let mut tree = chain("open door", &["get key", "go to key"]);

        assert!(tree.mark_achieved());
        assert_eq!(tree.cursor_label(), Some("get key"));
        let (achieved, not_achieved) = tree.achieved_not_achieved();
        assert_eq!(achieved, labels(&["go to key"]));
        assert_eq!(not_achieved, labels(&["get key", "open door"]));

        assert!(tree.mark_achieved());
        assert!(tree.mark_achieved());
        assert!(tree.is_complete());
        assert_eq!(tree.cursor_label(), Some("open door"));

        // Complete tree: nothing left to mark
        assert!(!tree.mark_achieved());
        let (achieved, not_achieved) = tree.achieved_not_achieved();
        assert_eq!(achieved, labels(&["go to key", "get key", "open door"]));
        assert!(not_achieved.is_empty());
    }

    #[test]
    fn refinement_after_achievement_adds_sibling() {
        let mut tree = chain("open door", &["get key"]);
        tree.mark_achieved();
        tree.append("go to door");
        assert_eq!(tree.subgoals(), labels(&["open door", "go to door"]));
        let (achieved, not_achieved) = tree.achieved_not_achieved();
        assert_eq!(achieved, labels(&["get key"]));
        assert_eq!(not_achieved, labels(&["go to door", "open door"]));
    }

    #[test]
    fn failure_marks_only_pending_chain() {
        let mut tree = chain("open door", &["get key", "go to key"]);
        tree.mark_achieved();
        tree.append_failed_node();

        let (achieved, failed) = tree.all_sequence();
        assert_eq!(achieved, labels(&["go to key"]));
        assert_eq!(failed, labels(&["get key", "open door"]));
    }

    #[test]
    fn failure_leaves_side_branches_alone() {
        let mut tree = chain("mission", &["a"]);
        tree.mark_achieved();
        tree.append("b");
        tree.append("b1");
        tree.mark_achieved();
        tree.mark_achieved();
        tree.append("c");
        tree.append_failed_node();

        let (achieved, failed) = tree.all_sequence();
        assert_eq!(achieved, labels(&["a", "b1", "b"]));
        assert_eq!(failed, labels(&["c", "mission"]));
    }

    #[test]
    fn record_roundtrip_preserves_structure() {
        let mut tree = chain("mission", &["a", "a1"]);
        tree.mark_achieved();
        tree.append("a2");

        let record = tree.to_record().unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["label"], "mission");
        assert_eq!(json["children"][0]["children"][0]["status"], "achieved");

        let mut restored = SubgoalTree::default();
        restored.set_record(&record);
        assert_eq!(restored.to_record().unwrap(), record);
        assert_eq!(restored.cursor_label(), Some("mission"));
    }

    #[test]
    fn record_defaults_missing_fields() {
        let record: SubgoalRecord = serde_json::from_str(r#"{"label":"mission"}"#).unwrap();
        assert_eq!(record.status, Pending);
        assert!(record.children.is_empty());
    }

    #[test]
    fn reduction_splices_and_merges() {
        let record = SubgoalRecord::new("Open Door", Failed).with_children(vec![
            SubgoalRecord::new(" open door", Pending)
                .with_children(vec![SubgoalRecord::new("get key", Achieved)]),
            SubgoalRecord::new("get key", Pending)
                .with_children(vec![SubgoalRecord::new("go to key", Achieved)]),
            SubgoalRecord::new("go to door", Failed),
        ]);
        let mut tree = SubgoalTree::default();
        tree.set_record(&record);
        tree.reduction();

        let expected = SubgoalRecord::new("open door", Failed).with_children(vec![
            SubgoalRecord::new("get key", Achieved)
                .with_children(vec![SubgoalRecord::new("go to key", Achieved)]),
            SubgoalRecord::new("go to door", Failed),
        ]);
        assert_eq!(tree.to_record().unwrap(), expected);
        assert_eq!(tree.cursor_label(), Some("open door"));
    }

    #[test]
    fn extract_reopens_mission_and_settles_achieved_subtrees() {
        let record = SubgoalRecord::new("mission", Failed).with_children(vec![
            SubgoalRecord::new("a", Achieved)
                .with_children(vec![SubgoalRecord::new("a1", Failed)]),
            SubgoalRecord::new("b", Failed),
        ]);
        let mut tree = SubgoalTree::default();
        tree.set_record(&record);
        tree.extract();

        let expected = SubgoalRecord::new("mission", Pending).with_children(vec![
            SubgoalRecord::new("a", Achieved)
                .with_children(vec![SubgoalRecord::new("a1", Achieved)]),
            SubgoalRecord::new("b", Failed),
        ]);
        assert_eq!(tree.to_record().unwrap(), expected);
    }

    #[test]
    fn replay_sequence_restores_cursor_invariant() {
        // Previous episode: achieved "get key", failed on "open door" chain
        let mut previous = chain("open door", &["get key", "go to key"]);
        previous.mark_achieved();
        previous.mark_achieved();
        previous.append("go to door");
        previous.append_failed_node();
        let record = previous.to_record().unwrap();

        let mut tree = SubgoalTree::new("open door");
        tree.set_record(&record);
        tree.reset_access();
        tree.reduction();
        tree.extract();
        tree.remove_failed_node();
        tree.move_to_leaf();

        assert_eq!(tree.cursor_label(), Some("open door"));
        let (achieved, not_achieved) = tree.achieved_not_achieved();
        assert_eq!(achieved, labels(&["go to key", "get key"]));
        assert_eq!(not_achieved, labels(&["open door"]));
        let (_, failed) = tree.all_sequence();
        assert!(failed.is_empty());
    }

    #[test]
    fn move_to_leaf_finds_first_pending_in_execution_order() {
        let record = SubgoalRecord::new("mission", Pending).with_children(vec![
            SubgoalRecord::new("a", Achieved),
            SubgoalRecord::new("b", Pending).with_children(vec![
                SubgoalRecord::new("b1", Achieved),
                SubgoalRecord::new("b2", Pending),
            ]),
            SubgoalRecord::new("c", Pending),
        ]);
        let mut tree = SubgoalTree::default();
        tree.set_record(&record);
        tree.move_to_leaf();

        assert_eq!(tree.cursor_label(), Some("b2"));
        assert_eq!(tree.subgoals(), labels(&["mission", "b", "b2"]));
        let (achieved, _) = tree.achieved_not_achieved();
        assert_eq!(achieved, labels(&["a", "b1"]));
    }

    #[test]
    fn mark_achieved_moves_to_next_pending_sibling() {
        let record = SubgoalRecord::new("mission", Pending).with_children(vec![
            SubgoalRecord::new("a", Achieved),
            SubgoalRecord::new("b", Pending),
            SubgoalRecord::new("c", Pending).with_children(vec![
                SubgoalRecord::new("c1", Achieved),
                SubgoalRecord::new("c2", Pending),
            ]),
        ]);
        let mut tree = SubgoalTree::default();
        tree.set_record(&record);
        tree.move_to_leaf();
        assert_eq!(tree.cursor_label(), Some("b"));

        assert!(tree.mark_achieved());
        assert_eq!(tree.cursor_label(), Some("c2"));
        assert_eq!(tree.subgoals(), labels(&["mission", "c", "c2"]));
        let (achieved, not_achieved) = tree.achieved_not_achieved();
        assert_eq!(achieved, labels(&["a", "b", "c1"]));
        assert_eq!(not_achieved, labels(&["c2", "c", "mission"]));

        assert!(tree.mark_achieved());
        assert_eq!(tree.cursor_label(), Some("c"));
        assert!(tree.mark_achieved());
        assert_eq!(tree.cursor_label(), Some("mission"));
        assert!(tree.mark_achieved());
        assert!(tree.is_complete());
    }

    #[test]
    fn maintenance_on_empty_tree_is_noop() {
        let mut tree = SubgoalTree::default();
        tree.reduction();
        tree.extract();
        tree.remove_failed_node();
        tree.move_to_leaf();
        tree.append_failed_node();
        assert!(tree.is_empty());
        assert!(tree.to_record().is_none());
        assert!(!tree.mark_achieved());
    }
}
