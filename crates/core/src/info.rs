//! Per-step diagnostics recorded by policy stages.

use serde::{Deserialize, Serialize};

use crate::environment::ActionId;

/// Everything a policy pipeline recorded while choosing one step's actions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepInfo {
    /// Every prompt sent to the model during the step, in call order.
    #[serde(default)]
    pub queries: Vec<QueryRecord>,

    /// Messages delivered between agents.
    #[serde(default)]
    pub messages: Vec<MessageRecord>,

    /// Achievement verdicts from the subgoal judge.
    #[serde(default)]
    pub achievements: Vec<AchievementRecord>,

    /// Active plan of each agent after the step, root first.
    #[serde(default)]
    pub subgoals: Vec<Vec<String>>,

    /// Stages skipped by a gate this step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,

    /// Chosen actions, one per agent.
    #[serde(default)]
    pub actions: Vec<ActionId>,
}

/// One model round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub stage: String,
    pub agent_id: usize,
    pub prompt: String,
    pub response: String,
}

/// A message one agent sent to the others.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub sender: usize,
    pub sender_name: String,
    pub text: String,

    /// Parsed structured payload, when the structured protocol was used
    /// and the reply parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Value>,
}

/// The judge's verdict on one subgoal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementRecord {
    pub agent_id: usize,
    pub subgoal: String,
    pub achieved: bool,
}

impl StepInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a model round-trip.
    pub fn record_query(
        &mut self,
        stage: &str,
        agent_id: usize,
        prompt: impl Into<String>,
        response: impl Into<String>,
    ) {
        self.queries.push(QueryRecord {
            stage: stage.to_string(),
            agent_id,
            prompt: prompt.into(),
            response: response.into(),
        });
    }

    /// Queries recorded by one stage.
    pub fn queries_for(&self, stage: &str) -> impl Iterator<Item = &QueryRecord> {
        self.queries.iter().filter(move |q| q.stage == stage)
    }
}
