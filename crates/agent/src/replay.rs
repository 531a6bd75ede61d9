//! Replay log: subgoal trees saved from an earlier run.
//!
//! A run can start from the plans a previous run ended with instead of
//! asking the model for fresh ones. The log stores one serialized tree per
//! agent under `subgoal_tree`.

use coplan_core::error::{ReplayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::subgoal_tree::SubgoalRecord;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayLog {
    pub subgoal_tree: Vec<SubgoalRecord>,
}

impl ReplayLog {
    pub fn new(subgoal_tree: Vec<SubgoalRecord>) -> Self {
        Self { subgoal_tree }
    }

    /// Accept either a single `{"subgoal_tree": [...]}` mapping or a list
    /// of per-step records, taking the first record that carries trees.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(records) => {
                let record = records
                    .into_iter()
                    .find(|r| r.get("subgoal_tree").is_some())
                    .ok_or(ReplayError::MissingTrees)?;
                Self::from_value(record)
            }
            Value::Object(map) if map.contains_key("subgoal_tree") => {
                Ok(serde_json::from_value(Value::Object(map))?)
            }
            _ => Err(ReplayError::MissingTrees.into()),
        }
    }

    /// Take the first record that carries trees.
    pub fn from_records(records: Vec<Value>) -> Result<Self> {
        Self::from_value(Value::Array(records))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&content)?;
        let log = Self::from_value(value)?;
        debug!(path = %path.display(), trees = log.subgoal_tree.len(), "Replay log loaded");
        Ok(log)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn agent_num(&self) -> usize {
        self.subgoal_tree.len()
    }
}
