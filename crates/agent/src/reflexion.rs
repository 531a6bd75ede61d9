//! Reflexion: per-agent episode state and post-episode reflection.
//!
//! Owns, per agent, one [`History`] and one [`SubgoalTree`] that live for a
//! single episode, and one [`ReflectionMemory`] that lives for the whole
//! run. At each reset the history is reseeded from memory and the tree
//! restarts from the mission; only memory crosses episode boundaries.
//!
//! ```text
//!   reset ──▶ steps (policy writes history / tree) ──▶ add_result ──▶ run
//!     ▲                                                               │
//!     └──────────────────── memory carries over ◀─────────────────────┘
//! ```

use std::sync::Arc;

use coplan_config::{AppConfig, HistoryWindow, ReflectionKind, ReflectionMode, VisionConfig};
use coplan_core::{Environment, Error, Frame, Model, ReplayError, Result};
use coplan_memory::{History, HistoryView, ReflectionMemory};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::instructions::{Instructions, Speaker, Utterance, list_text};
use crate::parse::parse_subgoal_list;
use crate::replay::ReplayLog;
use crate::subgoal_tree::SubgoalTree;

pub const LABEL_ACTION: &str = "action";
pub const LABEL_CONSIDERATION: &str = "consideration";
pub const LABEL_MESSAGE: &str = "message";
pub const LABEL_RESULT: &str = "result";
pub const LABEL_SUBGOAL: &str = "subgoal";

/// How reflection runs after a failed episode. Chosen once at
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectionProtocol {
    Disabled,
    /// Each agent reflects on its own history.
    Individual { kind: ReflectionKind },
    /// Agents discuss for `rounds` rounds, then share one summary.
    Group { kind: ReflectionKind, rounds: usize },
}

impl ReflectionProtocol {
    pub fn from_config(config: &AppConfig) -> Self {
        let kind = config.reflexion.kind;
        if kind == ReflectionKind::None {
            return Self::Disabled;
        }
        match config.reflexion.mode {
            ReflectionMode::Individual => Self::Individual { kind },
            ReflectionMode::Group => Self::Group {
                kind,
                rounds: config.reflexion.discussion_rounds,
            },
        }
    }
}

/// What a reflection run produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReflectionOutcome {
    /// Every prompt sent, in call order.
    pub queries: Vec<String>,
    /// Group discussion, round-major then agent-minor. Empty in individual mode.
    pub transcript: Vec<Utterance>,
    /// Group summary as returned by the model.
    pub summary: Option<String>,
}

/// What initial planning produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitialSubgoals {
    pub queries: Vec<String>,
    pub responses: Vec<String>,
    /// Per agent, the subgoals appended (model) or the restored plan (replay).
    pub lists: Vec<Vec<String>>,
}

fn view_of(window: &HistoryWindow) -> HistoryView {
    HistoryView::new(window.size, window.labels.clone(), window.labels_len.clone())
}

/// Per-agent planning and memory state.
pub struct Reflexion {
    model: Arc<dyn Model>,
    instructions: Arc<dyn Instructions>,
    agent_num: usize,
    protocol: ReflectionProtocol,
    history_view: HistoryView,
    reflexion_view: HistoryView,
    tom_message_len: usize,
    vision: VisionConfig,

    names: Vec<String>,
    actions: Vec<String>,
    missions: Vec<String>,
    histories: Vec<History>,
    trees: Vec<SubgoalTree>,
    memories: Vec<ReflectionMemory>,
}

impl Reflexion {
    /// Create the state for `config.agent_num` agents and reset it to the
    /// environment's current episode.
    pub fn new(
        model: Arc<dyn Model>,
        instructions: Arc<dyn Instructions>,
        config: &AppConfig,
        env: &dyn Environment,
    ) -> Result<Self> {
        config.validate().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;
        if env.agent_num() != config.agent_num {
            return Err(Error::Config {
                message: format!(
                    "environment has {} agents but agent_num is {}",
                    env.agent_num(),
                    config.agent_num
                ),
            });
        }

        let agent_num = config.agent_num;
        let mut reflexion = Self {
            model,
            instructions,
            agent_num,
            protocol: ReflectionProtocol::from_config(config),
            history_view: view_of(&config.history),
            reflexion_view: view_of(&config.reflexion_history),
            tom_message_len: config.tom_message_history_size,
            vision: config.vision.clone(),
            names: Vec::new(),
            actions: Vec::new(),
            missions: Vec::new(),
            histories: Vec::new(),
            trees: Vec::new(),
            memories: (0..agent_num)
                .map(|_| ReflectionMemory::new(config.reflexion.memory_size))
                .collect(),
        };
        reflexion.reset(env)?;
        Ok(reflexion)
    }

    // ── Episode lifecycle ──────────────────────────────────────────────

    /// Start a new episode: fresh histories seeded from memory, fresh
    /// trees holding only each agent's mission.
    pub fn reset(&mut self, env: &dyn Environment) -> Result<()> {
        let briefing = env.briefing();
        if briefing.missions.len() != self.agent_num {
            return Err(Error::Config {
                message: format!(
                    "briefing has {} missions for {} agents",
                    briefing.missions.len(),
                    self.agent_num
                ),
            });
        }

        self.names = (0..self.agent_num).map(|i| env.agent_name(i)).collect();
        self.actions = env.action_names();
        self.histories = briefing
            .missions
            .iter()
            .zip(&self.memories)
            .map(|(mission, memory)| {
                History::seeded(&briefing.explain, mission, &memory.contents())
            })
            .collect();
        self.trees = briefing.missions.iter().map(SubgoalTree::new).collect();
        self.missions = briefing.missions;

        info!(agents = self.agent_num, "Episode reset");
        Ok(())
    }

    /// Record the episode result. On failure every pending goal on each
    /// agent's active chain is marked failed.
    pub fn add_result(&mut self, success: bool) {
        let marker = if success { "SUCCESS" } else { "FAILED" };
        self.add_histories(LABEL_RESULT, marker);
        if !success {
            for tree in &mut self.trees {
                tree.append_failed_node();
            }
        }
    }

    /// Reflect on a failed episode and store the result in memory. Does
    /// nothing after a success or when reflection is disabled.
    pub async fn run(
        &mut self,
        success: bool,
        reason: &str,
        env: &dyn Environment,
    ) -> Result<ReflectionOutcome> {
        if success {
            return Ok(ReflectionOutcome::default());
        }

        match self.protocol {
            ReflectionProtocol::Disabled => Ok(ReflectionOutcome::default()),
            ReflectionProtocol::Individual { kind } => {
                self.reflect_individually(kind, reason, env).await
            }
            ReflectionProtocol::Group { kind, rounds } => {
                self.reflect_as_group(kind, rounds, reason, env).await
            }
        }
    }

    async fn reflect_individually(
        &mut self,
        kind: ReflectionKind,
        reason: &str,
        env: &dyn Environment,
    ) -> Result<ReflectionOutcome> {
        let images = self.images(env);
        let mut outcome = ReflectionOutcome::default();

        for agent_id in 0..self.agent_num {
            let prompt = self.reflexion_prompt(agent_id, kind, reason);
            let generation = self.model.generate(&prompt, images[agent_id].as_ref()).await?;
            debug!(agent_id, len = generation.text.len(), "Reflection written");
            self.memories[agent_id].add_memory(generation.text);
            outcome.queries.push(prompt);
        }

        info!(agents = self.agent_num, reason, "Individual reflection complete");
        Ok(outcome)
    }

    async fn reflect_as_group(
        &mut self,
        kind: ReflectionKind,
        rounds: usize,
        reason: &str,
        env: &dyn Environment,
    ) -> Result<ReflectionOutcome> {
        let images = self.images(env);
        let mut outcome = ReflectionOutcome::default();

        for round in 0..rounds {
            for agent_id in 0..self.agent_num {
                let prompt =
                    self.group_reflection_prompt(agent_id, kind, reason, &outcome.transcript);
                let generation = self.model.generate(&prompt, images[agent_id].as_ref()).await?;
                outcome.transcript.push(Utterance {
                    turn: round,
                    agent_id,
                    name: self.names[agent_id].clone(),
                    text: generation.text,
                });
                outcome.queries.push(prompt);
            }
            debug!(round, "Discussion round complete");
        }

        let summary_prompt = self.instructions.group_summary(reason, &outcome.transcript);
        let image = images.first().and_then(Option::as_ref);
        let summary = self.model.generate(&summary_prompt, image).await?.text;
        outcome.queries.push(summary_prompt);

        let note = format!("Team Strategy: {summary}");
        for memory in &mut self.memories {
            memory.add_memory(note.clone());
        }
        outcome.summary = Some(summary);

        info!(
            agents = self.agent_num,
            rounds,
            messages = outcome.transcript.len(),
            "Group reflection complete"
        );
        Ok(outcome)
    }

    /// Build each agent's starting plan: from a replay log when given,
    /// otherwise by asking the model for a subgoal list.
    pub async fn init_subgoal(
        &mut self,
        log: Option<&ReplayLog>,
        env: &dyn Environment,
    ) -> Result<InitialSubgoals> {
        match log {
            Some(log) => self.subgoals_from_log(log),
            None => self.subgoals_from_model(env).await,
        }
    }

    async fn subgoals_from_model(&mut self, env: &dyn Environment) -> Result<InitialSubgoals> {
        let frame = self
            .vision
            .any(self.agent_num)
            .then(|| env.render_no_highlight());
        let scene = env.describe_scene();
        let mut initial = InitialSubgoals::default();

        for agent_id in 0..self.agent_num {
            let prompt = self.init_subgoal_prompt(agent_id, &scene);
            let image = frame.as_ref().filter(|_| self.vision.uses_vision(agent_id));
            let text = self.model.generate_high(&prompt, image).await?.text;

            let mut subgoals = parse_subgoal_list(&text);
            if subgoals.is_empty() {
                warn!(agent_id, "Initial subgoal list did not parse, keeping mission only");
            }
            // The last item is the mission, already the root
            subgoals.pop();
            subgoals.reverse();
            let subgoals: Vec<String> = subgoals.iter().map(|s| s.to_lowercase()).collect();
            for subgoal in &subgoals {
                self.trees[agent_id].append(subgoal.clone());
            }

            initial.queries.push(prompt);
            initial.responses.push(text);
            initial.lists.push(subgoals);
        }

        info!(agents = self.agent_num, "Initial subgoals generated");
        Ok(initial)
    }

    fn subgoals_from_log(&mut self, log: &ReplayLog) -> Result<InitialSubgoals> {
        if log.agent_num() != self.agent_num {
            return Err(ReplayError::AgentCountMismatch {
                expected: self.agent_num,
                found: log.agent_num(),
            }
            .into());
        }

        let mut initial = InitialSubgoals::default();
        for (tree, record) in self.trees.iter_mut().zip(&log.subgoal_tree) {
            tree.set_record(record);
            tree.reset_access();
            tree.reduction();
            tree.extract();
            tree.remove_failed_node();
            tree.move_to_leaf();
            initial.lists.push(tree.subgoals());
        }

        info!(agents = self.agent_num, "Initial subgoals restored from replay log");
        Ok(initial)
    }

    /// The current trees as a replay log.
    pub fn snapshot(&self) -> ReplayLog {
        ReplayLog::new(
            self.trees
                .iter()
                .map(|t| t.to_record().unwrap_or_default())
                .collect(),
        )
    }

    // ── History writes ─────────────────────────────────────────────────

    /// Append the same entry to every agent's history.
    pub fn add_histories(&mut self, label: &str, content: &str) {
        for history in &mut self.histories {
            history.add(label, content);
        }
    }

    /// Append one entry per agent, `contents[i]` to agent `i`.
    pub fn add_histories_each(&mut self, label: &str, contents: &[String]) {
        for (history, content) in self.histories.iter_mut().zip(contents) {
            history.add(label, content.as_str());
        }
    }

    pub fn add_history(&mut self, agent_id: usize, label: &str, content: &str) {
        self.histories[agent_id].add(label, content);
    }

    /// Deliver a message from `sender_name` into `agent_id`'s history.
    pub fn add_message(&mut self, agent_id: usize, sender_name: &str, text: &str) {
        self.histories[agent_id].add(LABEL_MESSAGE, format!("{sender_name}:{text}"));
    }

    /// Publish each agent's active plan under the `subgoal` label.
    pub fn add_now_subgoal(&mut self) {
        for (history, tree) in self.histories.iter_mut().zip(&self.trees) {
            history.add(LABEL_SUBGOAL, list_text(&tree.subgoals()));
        }
    }

    /// Remove `label` from every agent's history.
    pub fn remove_label(&mut self, label: &str) {
        for history in &mut self.histories {
            history.remove(label);
        }
    }

    // ── Prompt builders ────────────────────────────────────────────────

    /// Rendered history, a blank line, then `instruction`.
    pub fn prompt(&self, agent_id: usize, instruction: &str) -> String {
        self.prompt_with(agent_id, &self.history_view, instruction)
    }

    fn prompt_with(&self, agent_id: usize, view: &HistoryView, instruction: &str) -> String {
        let history = self.histories[agent_id].render(view);
        format!("{history}\n\n{instruction}")
    }

    pub fn reflexion_prompt(&self, agent_id: usize, kind: ReflectionKind, reason: &str) -> String {
        let speaker = self.speaker(agent_id);
        let instruction = match kind {
            ReflectionKind::General => self.instructions.general_reflection(&speaker, reason),
            ReflectionKind::Subgoal => {
                let (achieved, failed) = self.trees[agent_id].all_sequence();
                self.instructions
                    .subgoal_reflection(&speaker, reason, &achieved, &failed)
            }
            ReflectionKind::None => String::new(),
        };
        self.prompt_with(agent_id, &self.reflexion_view, &instruction)
    }

    pub fn group_reflection_prompt(
        &self,
        agent_id: usize,
        kind: ReflectionKind,
        reason: &str,
        transcript: &[Utterance],
    ) -> String {
        let speaker = self.speaker(agent_id);
        let instruction = self
            .instructions
            .group_reflection(&speaker, kind, reason, transcript);
        self.prompt_with(agent_id, &self.reflexion_view, &instruction)
    }

    pub fn message_prompt(&self, agent_id: usize) -> String {
        let instruction = self
            .instructions
            .message(&self.speaker(agent_id), &self.targets(agent_id));
        self.prompt(agent_id, &instruction)
    }

    pub fn conversation_prompt(
        &self,
        agent_id: usize,
        transcript: &[Utterance],
        is_last: bool,
    ) -> String {
        let instruction = self.instructions.conversation(
            &self.speaker(agent_id),
            &self.targets(agent_id),
            transcript,
            is_last,
        );
        self.prompt(agent_id, &instruction)
    }

    pub fn structured_conversation_prompt(
        &self,
        agent_id: usize,
        transcript: &[Utterance],
        is_last: bool,
    ) -> String {
        let instruction = self.instructions.structured_conversation(
            &self.speaker(agent_id),
            &self.targets(agent_id),
            transcript,
            is_last,
        );
        self.prompt(agent_id, &instruction)
    }

    pub fn action_prompt(&self, agent_id: usize) -> String {
        let instruction = self.instructions.action(&self.speaker(agent_id));
        self.prompt(agent_id, &instruction)
    }

    pub fn consideration_prompt(&self, agent_id: usize) -> String {
        let (achieved, not_achieved) = self.trees[agent_id].achieved_not_achieved();
        let instruction =
            self.instructions
                .consideration(&self.speaker(agent_id), &achieved, &not_achieved);
        self.prompt(agent_id, &instruction)
    }

    pub fn subgoal_prompt(&self, agent_id: usize) -> String {
        let (achieved, not_achieved) = self.trees[agent_id].achieved_not_achieved();
        let instruction =
            self.instructions
                .subgoal(&self.speaker(agent_id), &achieved, &not_achieved);
        self.prompt(agent_id, &instruction)
    }

    /// Action prompt for the current subgoal. Considerations are left out
    /// of the rendered history for this call.
    pub fn subgoal_to_action_prompt(&self, agent_id: usize, plan: &[String]) -> String {
        let view = self.history_view.with_label_len(LABEL_CONSIDERATION, 0);
        let instruction = self
            .instructions
            .subgoal_to_action(&self.speaker(agent_id), plan);
        self.prompt_with(agent_id, &view, &instruction)
    }

    pub fn subgoal_achieved_prompt(&self, agent_id: usize, plan: &[String]) -> String {
        let instruction = self
            .instructions
            .subgoal_achieved(&self.speaker(agent_id), plan);
        self.prompt(agent_id, &instruction)
    }

    pub fn all_subgoals_achieved_prompt(&self, agent_id: usize, plan: &[String]) -> String {
        let instruction = self
            .instructions
            .all_subgoals_achieved(&self.speaker(agent_id), plan);
        self.prompt(agent_id, &instruction)
    }

    /// Initial planning prompt. Carries no history.
    pub fn init_subgoal_prompt(&self, agent_id: usize, scene: &str) -> String {
        self.instructions
            .initial_subgoals(&self.speaker(agent_id), &self.missions[agent_id], scene)
    }

    /// Theory-of-mind prompt about `target_id`, with the message window
    /// widened so old conversations stay visible.
    pub fn tom_prompt(&self, agent_id: usize, target_id: usize) -> String {
        let view = self
            .history_view
            .with_label_len(LABEL_MESSAGE, self.tom_message_len);
        let instruction = self
            .instructions
            .theory_of_mind(&self.speaker(agent_id), &self.names[target_id]);
        self.prompt_with(agent_id, &view, &instruction)
    }

    // ── Accessors ──────────────────────────────────────────────────────

    /// Per-agent images for a model call, `None` for agents without vision.
    pub fn images(&self, env: &dyn Environment) -> Vec<Option<Frame>> {
        if !self.vision.any(self.agent_num) {
            return vec![None; self.agent_num];
        }
        let views = env.render_masked();
        (0..self.agent_num)
            .map(|i| {
                if self.vision.uses_vision(i) {
                    views.get(i).cloned()
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn speaker(&self, agent_id: usize) -> Speaker {
        Speaker {
            agent_id,
            name: self.names[agent_id].clone(),
            agent_num: self.agent_num,
            image_token: self
                .vision
                .uses_vision(agent_id)
                .then(|| self.model.image_token().to_string()),
            actions: self.actions.clone(),
        }
    }

    /// Names of every agent except `agent_id`.
    pub fn targets(&self, agent_id: usize) -> Vec<String> {
        self.names
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != agent_id)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn model(&self) -> &Arc<dyn Model> {
        &self.model
    }

    pub fn protocol(&self) -> ReflectionProtocol {
        self.protocol
    }

    pub fn agent_num(&self) -> usize {
        self.agent_num
    }

    pub fn agent_name(&self, agent_id: usize) -> &str {
        &self.names[agent_id]
    }

    pub fn history(&self, agent_id: usize) -> &History {
        &self.histories[agent_id]
    }

    pub fn tree(&self, agent_id: usize) -> &SubgoalTree {
        &self.trees[agent_id]
    }

    pub fn tree_mut(&mut self, agent_id: usize) -> &mut SubgoalTree {
        &mut self.trees[agent_id]
    }

    pub fn memory(&self, agent_id: usize) -> &ReflectionMemory {
        &self.memories[agent_id]
    }

    /// Replace `agent_id`'s memory, e.g. with notes saved by an earlier
    /// run. Takes effect at the next reset.
    pub fn set_memory(&mut self, agent_id: usize, memory: ReflectionMemory) {
        self.memories[agent_id] = memory;
    }
}
