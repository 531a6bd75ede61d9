//! Policy dispatch: named step pipelines.
//!
//! A policy is a fixed sequence of stages run once per environment step.
//! Stages read and write the agents' histories and subgoal trees through
//! [`Reflexion`] and call the model; the last action-producing stage
//! decides the step's actions.
//!
//! | Policy                  | Pipeline                                        |
//! |-------------------------|-------------------------------------------------|
//! | `simple`                | consider → act                                  |
//! | `message`               | message → consider → act                        |
//! | `conversation`          | converse → consider → act                       |
//! | `interval_conversation` | converse (every N steps) → consider → act       |
//! | `subgoal`               | judge → consider → act via hierarchy            |
//! | `simple_subgoal`        | judge → publish subgoals → consider → act       |
//! | `random`                | sample                                          |

use std::fmt;
use std::str::FromStr;

use coplan_config::{AppConfig, JudgeMode};
use coplan_core::{
    AchievementRecord, ActionId, Environment, Error, Frame, MessageRecord, PolicyError, Result,
    StepInfo,
};
use tracing::{debug, warn};

use crate::instructions::Utterance;
use crate::parse::{parse_single_subgoal, parse_structured_message, parse_yes_no, parse_yes_no_list};
use crate::reflexion::{LABEL_ACTION, LABEL_CONSIDERATION, LABEL_SUBGOAL, Reflexion};
use crate::subgoal_tree::SubgoalTree;

/// Registered policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Simple,
    Message,
    Conversation,
    IntervalConversation,
    Subgoal,
    SimpleSubgoal,
    Random,
}

/// One step of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ExchangeMessage,
    HoldConversation,
    JudgeSubgoalAchievement,
    PublishSubgoals,
    BuildConsideration,
    ActViaHierarchy,
    ActDirectly,
    SampleRandom,
}

/// When a stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Always,
    /// Only on steps divisible by the communication interval.
    EveryInterval,
}

use Gate::*;
use Stage::*;

const SIMPLE: &[(Stage, Gate)] = &[(BuildConsideration, Always), (ActDirectly, Always)];
const MESSAGE: &[(Stage, Gate)] = &[
    (ExchangeMessage, Always),
    (BuildConsideration, Always),
    (ActDirectly, Always),
];
const CONVERSATION: &[(Stage, Gate)] = &[
    (HoldConversation, Always),
    (BuildConsideration, Always),
    (ActDirectly, Always),
];
const INTERVAL_CONVERSATION: &[(Stage, Gate)] = &[
    (HoldConversation, EveryInterval),
    (BuildConsideration, Always),
    (ActDirectly, Always),
];
const SUBGOAL: &[(Stage, Gate)] = &[
    (JudgeSubgoalAchievement, Always),
    (BuildConsideration, Always),
    (ActViaHierarchy, Always),
];
const SIMPLE_SUBGOAL: &[(Stage, Gate)] = &[
    (JudgeSubgoalAchievement, Always),
    (PublishSubgoals, Always),
    (BuildConsideration, Always),
    (ActDirectly, Always),
];
const RANDOM: &[(Stage, Gate)] = &[(SampleRandom, Always)];

impl PolicyKind {
    pub const ALL: [PolicyKind; 7] = [
        PolicyKind::Simple,
        PolicyKind::Message,
        PolicyKind::Conversation,
        PolicyKind::IntervalConversation,
        PolicyKind::Subgoal,
        PolicyKind::SimpleSubgoal,
        PolicyKind::Random,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PolicyKind::Simple => "simple",
            PolicyKind::Message => "message",
            PolicyKind::Conversation => "conversation",
            PolicyKind::IntervalConversation => "interval_conversation",
            PolicyKind::Subgoal => "subgoal",
            PolicyKind::SimpleSubgoal => "simple_subgoal",
            PolicyKind::Random => "random",
        }
    }

    pub fn pipeline(self) -> &'static [(Stage, Gate)] {
        match self {
            PolicyKind::Simple => SIMPLE,
            PolicyKind::Message => MESSAGE,
            PolicyKind::Conversation => CONVERSATION,
            PolicyKind::IntervalConversation => INTERVAL_CONVERSATION,
            PolicyKind::Subgoal => SUBGOAL,
            PolicyKind::SimpleSubgoal => SIMPLE_SUBGOAL,
            PolicyKind::Random => RANDOM,
        }
    }
}

impl FromStr for PolicyKind {
    type Err = PolicyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| PolicyError::Unknown(s.to_string()))
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            ExchangeMessage => "message",
            HoldConversation => "conversation",
            JudgeSubgoalAchievement => "judge_subgoal",
            PublishSubgoals => "publish_subgoals",
            BuildConsideration => "consideration",
            ActViaHierarchy => "act_via_hierarchy",
            ActDirectly => "action",
            SampleRandom => "random",
        }
    }
}

/// Query labels recorded inside the hierarchy stage.
const QUERY_SUBGOAL: &str = "subgoal";
const QUERY_SUBGOAL_TO_ACTION: &str = "subgoal_to_action";

/// Actions chosen for one step and what the stages recorded on the way.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub actions: Vec<ActionId>,
    pub info: StepInfo,
}

/// A resolved policy with its stage settings.
#[derive(Debug, Clone)]
pub struct Policy {
    kind: PolicyKind,
    communication_interval: usize,
    conversation_turns: usize,
    structured: bool,
    judge_mode: JudgeMode,
    max_refinements: usize,
}

impl Policy {
    pub fn new(kind: PolicyKind) -> Self {
        Self::with_config(kind, &AppConfig::default())
    }

    /// Resolve the configured policy name. Unknown names and invalid
    /// settings are an error.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;
        let kind: PolicyKind = config.policy.name.parse()?;
        Ok(Self::with_config(kind, config))
    }

    fn with_config(kind: PolicyKind, config: &AppConfig) -> Self {
        let p = &config.policy;
        Self {
            kind,
            communication_interval: p.communication_interval.max(1),
            conversation_turns: p.conversation_turns,
            structured: p.structured_conversation,
            judge_mode: p.judge_mode,
            max_refinements: p.max_refinements,
        }
    }

    pub fn kind(&self) -> PolicyKind {
        self.kind
    }

    /// Run the pipeline for the current step.
    pub async fn act(
        &self,
        env: &dyn Environment,
        reflexion: &mut Reflexion,
        info: &mut StepInfo,
    ) -> Result<Vec<ActionId>> {
        let mut actions = None;

        for &(stage, gate) in self.kind.pipeline() {
            if !self.gate_open(gate, env) {
                debug!(stage = stage.name(), step = env.now_step(), "Stage skipped by gate");
                info.skipped.push(stage.name().to_string());
                continue;
            }

            debug!(policy = self.kind.name(), stage = stage.name(), "Running stage");
            match stage {
                ExchangeMessage => self.exchange_messages(env, reflexion, info).await?,
                HoldConversation => self.hold_conversation(env, reflexion, info).await?,
                JudgeSubgoalAchievement => self.judge_subgoals(env, reflexion, info).await?,
                PublishSubgoals => {
                    reflexion.remove_label(LABEL_SUBGOAL);
                    reflexion.add_now_subgoal();
                }
                BuildConsideration => self.consider(env, reflexion, info).await?,
                ActViaHierarchy => {
                    actions = Some(self.act_via_hierarchy(env, reflexion, info).await?)
                }
                ActDirectly => actions = Some(self.act_directly(env, reflexion, info).await?),
                SampleRandom => actions = Some(env.sample_actions()),
            }
        }

        let actions =
            actions.ok_or_else(|| PolicyError::NoActions(self.kind.name().to_string()))?;
        info.subgoals = (0..reflexion.agent_num())
            .map(|i| reflexion.tree(i).subgoals())
            .collect();
        info.actions = actions.clone();

        debug!(policy = self.kind.name(), actions = ?actions, "Step actions chosen");
        Ok(actions)
    }

    fn gate_open(&self, gate: Gate, env: &dyn Environment) -> bool {
        match gate {
            Always => true,
            EveryInterval => env.now_step() % self.communication_interval == 0,
        }
    }

    // ── Communication ──────────────────────────────────────────────────

    /// Every agent writes one message; all are delivered afterwards.
    async fn exchange_messages(
        &self,
        env: &dyn Environment,
        reflexion: &mut Reflexion,
        info: &mut StepInfo,
    ) -> Result<()> {
        let images = reflexion.images(env);
        let mut sent = Vec::with_capacity(reflexion.agent_num());

        for agent_id in 0..reflexion.agent_num() {
            let prompt = reflexion.message_prompt(agent_id);
            let text = ask(
                reflexion,
                info,
                ExchangeMessage.name(),
                agent_id,
                prompt,
                images[agent_id].as_ref(),
            )
            .await?;
            sent.push((agent_id, text, None));
        }

        deliver(reflexion, info, sent);
        Ok(())
    }

    /// Agents speak in turn for `conversation_turns` rounds, each seeing
    /// the running transcript; everything is delivered at the end.
    async fn hold_conversation(
        &self,
        env: &dyn Environment,
        reflexion: &mut Reflexion,
        info: &mut StepInfo,
    ) -> Result<()> {
        let images = reflexion.images(env);
        let mut transcript: Vec<Utterance> = Vec::new();
        let mut sent = Vec::new();

        for turn in 0..self.conversation_turns {
            let is_last = turn + 1 == self.conversation_turns;
            for agent_id in 0..reflexion.agent_num() {
                let prompt = if self.structured {
                    reflexion.structured_conversation_prompt(agent_id, &transcript, is_last)
                } else {
                    reflexion.conversation_prompt(agent_id, &transcript, is_last)
                };
                let text = ask(
                    reflexion,
                    info,
                    HoldConversation.name(),
                    agent_id,
                    prompt,
                    images[agent_id].as_ref(),
                )
                .await?;

                let structured = if self.structured {
                    let parsed = parse_structured_message(&text);
                    if parsed.is_none() {
                        warn!(agent_id, turn, "Structured reply did not parse, keeping raw text");
                    }
                    parsed.and_then(|m| serde_json::to_value(m).ok())
                } else {
                    None
                };

                transcript.push(Utterance {
                    turn,
                    agent_id,
                    name: reflexion.agent_name(agent_id).to_string(),
                    text: text.clone(),
                });
                sent.push((agent_id, text, structured));
            }
        }

        debug!(messages = sent.len(), "Conversation finished");
        deliver(reflexion, info, sent);
        Ok(())
    }

    // ── Planning ───────────────────────────────────────────────────────

    /// Ask each agent whether its plan advanced and move the cursor.
    async fn judge_subgoals(
        &self,
        env: &dyn Environment,
        reflexion: &mut Reflexion,
        info: &mut StepInfo,
    ) -> Result<()> {
        let images = reflexion.images(env);
        let stage = JudgeSubgoalAchievement.name();

        for agent_id in 0..reflexion.agent_num() {
            if reflexion.tree(agent_id).is_complete() {
                continue;
            }
            let plan = current_first(reflexion.tree(agent_id));
            let image = images[agent_id].as_ref();

            match self.judge_mode {
                JudgeMode::Cursor => {
                    let prompt = reflexion.subgoal_achieved_prompt(agent_id, &plan);
                    let text = ask(reflexion, info, stage, agent_id, prompt, image).await?;
                    let achieved = parse_yes_no(&text).unwrap_or_else(|| {
                        warn!(
                            agent_id,
                            "Achievement verdict did not parse, treating as not achieved"
                        );
                        false
                    });
                    info.achievements.push(AchievementRecord {
                        agent_id,
                        subgoal: plan[0].clone(),
                        achieved,
                    });
                    if achieved {
                        reflexion.tree_mut(agent_id).mark_achieved();
                    }
                }
                JudgeMode::Chain => {
                    let prompt = reflexion.all_subgoals_achieved_prompt(agent_id, &plan);
                    let text = ask(reflexion, info, stage, agent_id, prompt, image).await?;
                    let verdicts = parse_yes_no_list(&text);
                    if verdicts.is_empty() {
                        warn!(agent_id, "Achievement list did not parse, treating as not achieved");
                    }
                    for (subgoal, achieved) in plan.iter().zip(verdicts) {
                        info.achievements.push(AchievementRecord {
                            agent_id,
                            subgoal: subgoal.clone(),
                            achieved,
                        });
                        if !achieved {
                            break;
                        }
                        reflexion.tree_mut(agent_id).mark_achieved();
                    }
                }
            }
            debug!(agent_id, cursor = ?reflexion.tree(agent_id).cursor_label(), "Subgoals judged");
        }
        Ok(())
    }

    async fn consider(
        &self,
        env: &dyn Environment,
        reflexion: &mut Reflexion,
        info: &mut StepInfo,
    ) -> Result<()> {
        let images = reflexion.images(env);
        for agent_id in 0..reflexion.agent_num() {
            let prompt = reflexion.consideration_prompt(agent_id);
            let text = ask(
                reflexion,
                info,
                BuildConsideration.name(),
                agent_id,
                prompt,
                images[agent_id].as_ref(),
            )
            .await?;
            reflexion.add_history(agent_id, LABEL_CONSIDERATION, &text);
        }
        Ok(())
    }

    // ── Acting ─────────────────────────────────────────────────────────

    /// Refine the current subgoal until it names an action (or the
    /// refinement budget runs out), then turn it into an action.
    async fn act_via_hierarchy(
        &self,
        env: &dyn Environment,
        reflexion: &mut Reflexion,
        info: &mut StepInfo,
    ) -> Result<Vec<ActionId>> {
        let images = reflexion.images(env);
        let mut actions = Vec::with_capacity(reflexion.agent_num());

        for agent_id in 0..reflexion.agent_num() {
            let image = images[agent_id].as_ref();

            for _ in 0..self.max_refinements {
                let tree = reflexion.tree(agent_id);
                if tree.is_complete() {
                    break;
                }
                let Some(cursor) = tree.cursor_label().map(str::to_string) else {
                    break;
                };
                if env.matches_action(&cursor).is_some() {
                    break;
                }

                let prompt = reflexion.subgoal_prompt(agent_id);
                let text = ask(reflexion, info, QUERY_SUBGOAL, agent_id, prompt, image).await?;
                let subgoal = parse_single_subgoal(&text);
                if subgoal.is_empty() || subgoal == cursor {
                    debug!(agent_id, "Refinement stopped, no new subgoal");
                    break;
                }
                reflexion.tree_mut(agent_id).append(subgoal);
            }

            let plan = current_first(reflexion.tree(agent_id));
            let prompt = reflexion.subgoal_to_action_prompt(agent_id, &plan);
            let text = ask(
                reflexion,
                info,
                QUERY_SUBGOAL_TO_ACTION,
                agent_id,
                prompt,
                image,
            )
            .await?;
            actions.push(env.parse_action(&text));
            reflexion.add_history(agent_id, LABEL_ACTION, &text);
        }
        Ok(actions)
    }

    async fn act_directly(
        &self,
        env: &dyn Environment,
        reflexion: &mut Reflexion,
        info: &mut StepInfo,
    ) -> Result<Vec<ActionId>> {
        let images = reflexion.images(env);
        let mut actions = Vec::with_capacity(reflexion.agent_num());

        for agent_id in 0..reflexion.agent_num() {
            let prompt = reflexion.action_prompt(agent_id);
            let text = ask(
                reflexion,
                info,
                ActDirectly.name(),
                agent_id,
                prompt,
                images[agent_id].as_ref(),
            )
            .await?;
            actions.push(env.parse_action(&text));
            reflexion.add_history(agent_id, LABEL_ACTION, &text);
        }
        Ok(actions)
    }
}

/// Resolve the configured policy and run it for the current step.
pub async fn get_action(
    env: &dyn Environment,
    reflexion: &mut Reflexion,
    config: &AppConfig,
) -> Result<StepOutcome> {
    let policy = Policy::from_config(config)?;
    let mut info = StepInfo::new();
    let actions = policy.act(env, reflexion, &mut info).await?;
    Ok(StepOutcome { actions, info })
}

/// One model round-trip, recorded in the step diagnostics.
async fn ask(
    reflexion: &Reflexion,
    info: &mut StepInfo,
    stage: &str,
    agent_id: usize,
    prompt: String,
    image: Option<&Frame>,
) -> Result<String> {
    let text = reflexion.model().generate(&prompt, image).await?.text;
    info.record_query(stage, agent_id, prompt, text.clone());
    Ok(text)
}

/// Deliver `(sender, text, structured)` messages to every agent in
/// sender order.
fn deliver(
    reflexion: &mut Reflexion,
    info: &mut StepInfo,
    sent: Vec<(usize, String, Option<serde_json::Value>)>,
) {
    for (sender, text, structured) in sent {
        let sender_name = reflexion.agent_name(sender).to_string();
        for receiver in 0..reflexion.agent_num() {
            reflexion.add_message(receiver, &sender_name, &text);
        }
        info.messages.push(MessageRecord {
            sender,
            sender_name,
            text,
            structured,
        });
    }
}

/// The active plan, current subgoal first.
fn current_first(tree: &SubgoalTree) -> Vec<String> {
    let mut plan = tree.subgoals();
    plan.reverse();
    plan
}
