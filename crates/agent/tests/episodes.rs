//! Episode-level integration tests for the coplan planning core.
//!
//! These tests drive whole episodes through the public API: initial
//! planning, policy steps, failure reflection, and memory carried into the
//! next episode or the next run.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use coplan_agent::{PlainInstructions, Reflexion, ReplayLog, get_action};
use coplan_config::{AppConfig, ReflectionKind, ReflectionMode};
use coplan_core::environment::{ActionId, Briefing, Environment, Frame};
use coplan_core::error::ModelError;
use coplan_core::model::{Generation, Model};
use coplan_memory::{HistoryView, ReflectionMemory};

// ── Mock Model ───────────────────────────────────────────────────────────

/// A mock model that returns scripted replies in sequence.
struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Model for ScriptedModel {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn generate(
        &self,
        prompt: &str,
        _image: Option<&Frame>,
    ) -> Result<Generation, ModelError> {
        let mut prompts = self.prompts.lock().unwrap();
        prompts.push(prompt.to_string());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedModel exhausted: call #{}", prompts.len()));
        Ok(Generation::text(reply))
    }
}

// ── Mock Environment ─────────────────────────────────────────────────────

const ACTIONS: [&str; 4] = ["left", "right", "forward", "pickup"];

struct GridWorld {
    missions: Vec<String>,
    step: usize,
}

impl GridWorld {
    fn new(missions: &[&str]) -> Self {
        Self {
            missions: missions.iter().map(|m| m.to_string()).collect(),
            step: 0,
        }
    }
}

impl Environment for GridWorld {
    fn agent_num(&self) -> usize {
        self.missions.len()
    }

    fn now_step(&self) -> usize {
        self.step
    }

    fn briefing(&self) -> Briefing {
        Briefing {
            explain: "You are in a 6x6 room with a locked door.".into(),
            missions: self.missions.clone(),
        }
    }

    fn render(&self) -> Frame {
        Frame::blank(6, 6)
    }

    fn render_masked(&self) -> Vec<Frame> {
        vec![Frame::blank(3, 3); self.missions.len()]
    }

    fn action_names(&self) -> Vec<String> {
        ACTIONS.iter().map(|a| a.to_string()).collect()
    }

    fn parse_action(&self, text: &str) -> ActionId {
        let text = text.to_lowercase();
        ACTIONS.iter().position(|a| text.contains(a)).unwrap_or(0)
    }

    fn matches_action(&self, text: &str) -> Option<ActionId> {
        ACTIONS.iter().position(|a| *a == text.trim())
    }

    fn sample_actions(&self) -> Vec<ActionId> {
        vec![0; self.missions.len()]
    }
}

fn config(agent_num: usize) -> AppConfig {
    AppConfig {
        agent_num,
        ..AppConfig::default()
    }
}

fn reflexion(model: &Arc<ScriptedModel>, config: &AppConfig, env: &GridWorld) -> Reflexion {
    Reflexion::new(model.clone(), Arc::new(PlainInstructions), config, env).unwrap()
}

// ── Reflection across episodes ───────────────────────────────────────────

#[tokio::test]
async fn memory_keeps_most_recent_reflections() {
    let env = GridWorld::new(&["open the door"]);
    let model = Arc::new(ScriptedModel::new(&["r1", "r2", "r3"]));
    let mut config = config(1);
    config.reflexion.memory_size = 2;
    let mut r = reflexion(&model, &config, &env);

    for _ in 0..3 {
        r.add_result(false);
        r.run(false, "the step limit was reached", &env).await.unwrap();
        r.reset(&env).unwrap();
    }

    assert_eq!(r.memory(0).contents(), vec!["r2", "r3"]);
    let history = r.history(0).render(&HistoryView::all());
    assert!(history.contains("memory: r2\nmemory: r3"));
    assert!(!history.contains("r1"));

    // The last reflection saw the previous two notes in its history
    let last = model.prompts().pop().unwrap();
    assert!(last.contains("memory: r1\nmemory: r2"));
}

#[tokio::test]
async fn success_skips_reflection() {
    let env = GridWorld::new(&["open the door"]);
    let model = Arc::new(ScriptedModel::new(&[]));
    let mut r = reflexion(&model, &config(1), &env);

    r.add_result(true);
    let outcome = r.run(true, "", &env).await.unwrap();

    assert!(outcome.queries.is_empty());
    assert!(r.memory(0).is_empty());
    assert!(model.prompts().is_empty());
}

#[tokio::test]
async fn group_reflection_discusses_in_rounds() {
    let env = GridWorld::new(&["get the key", "open the door", "reach the goal"]);
    let model = Arc::new(ScriptedModel::new(&[
        "m1",
        "m2",
        "m3",
        "m4",
        "m5",
        "m6",
        "split the room",
    ]));
    let mut config = config(3);
    config.reflexion.mode = ReflectionMode::Group;
    config.reflexion.kind = ReflectionKind::General;
    config.reflexion.discussion_rounds = 2;
    let mut r = reflexion(&model, &config, &env);

    r.add_result(false);
    let outcome = r.run(false, "agents blocked each other", &env).await.unwrap();

    assert_eq!(outcome.transcript.len(), 6);
    let speakers: Vec<usize> = outcome.transcript.iter().map(|u| u.agent_id).collect();
    assert_eq!(speakers, vec![0, 1, 2, 0, 1, 2]);
    assert_eq!(outcome.summary.as_deref(), Some("split the room"));

    let summary_prompt = model.prompts().pop().unwrap();
    let positions: Vec<usize> = (1..=6)
        .map(|n| summary_prompt.find(&format!(": m{n}")).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));

    // The fourth speaker saw the whole first round
    let fourth = &model.prompts()[3];
    assert!(fourth.contains("m1") && fourth.contains("m3"));

    for agent_id in 0..3 {
        assert_eq!(
            r.memory(agent_id).contents(),
            vec!["Team Strategy: split the room"]
        );
    }
}

#[tokio::test]
async fn memory_survives_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory").join("agent0.jsonl");
    let env = GridWorld::new(&["open the door"]);

    let model = Arc::new(ScriptedModel::new(&["check the corners first"]));
    let mut r = reflexion(&model, &config(1), &env);
    r.add_result(false);
    r.run(false, "the step limit was reached", &env).await.unwrap();
    r.memory(0).save(&path).unwrap();

    let fresh = Arc::new(ScriptedModel::new(&[]));
    let mut next = reflexion(&fresh, &config(1), &env);
    next.set_memory(0, ReflectionMemory::load(&path, 3));
    next.reset(&env).unwrap();

    let history = next.history(0).render(&HistoryView::all());
    assert!(history.ends_with("memory: check the corners first"));
}

// ── Planning and acting ──────────────────────────────────────────────────

#[tokio::test]
async fn subgoal_episode_resumes_from_replay() {
    let mut env = GridWorld::new(&["open door"]);
    let model = Arc::new(ScriptedModel::new(&[
        "['go to key', 'pick up key', 'open door']",
        // step 0
        "No",
        "The key is ahead.",
        "forward",
        "forward",
        // step 1
        "Yes",
        "I am next to the key.",
        "go to key",
        "turn left",
        // step 2
        "Yes",
        "I should pick it up.",
        "pick up key",
        "pickup",
    ]));
    let mut config = config(1);
    config.policy.name = "subgoal".into();
    let mut r = reflexion(&model, &config, &env);

    let initial = r.init_subgoal(None, &env).await.unwrap();
    assert_eq!(initial.lists, vec![vec!["pick up key", "go to key"]]);
    assert_eq!(r.tree(0).cursor_label(), Some("go to key"));

    let mut actions = Vec::new();
    for step in 0..3 {
        env.step = step;
        let outcome = get_action(&env, &mut r, &config).await.unwrap();
        actions.push(outcome.actions[0]);
    }

    assert_eq!(actions, vec![2, 0, 3]);
    assert_eq!(model.remaining(), 0);
    assert_eq!(r.tree(0).cursor_label(), Some("pick up key"));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("replay.json");
    r.snapshot().save(&path).unwrap();

    let log = ReplayLog::load(&path).unwrap();
    let replay_model = Arc::new(ScriptedModel::new(&[]));
    let mut resumed = reflexion(&replay_model, &config, &GridWorld::new(&["open door"]));
    let restored = resumed.init_subgoal(Some(&log), &env).await.unwrap();

    assert_eq!(restored.lists, vec![vec!["open door", "pick up key"]]);
    assert!(replay_model.prompts().is_empty());
}

#[tokio::test]
async fn replay_for_wrong_team_size_is_rejected() {
    let env = GridWorld::new(&["a", "b"]);
    let model = Arc::new(ScriptedModel::new(&[]));
    let mut r = reflexion(&model, &config(2), &env);

    let log = ReplayLog::new(Vec::new());
    assert!(r.init_subgoal(Some(&log), &env).await.is_err());
}

#[tokio::test]
async fn message_policy_shares_plans_between_agents() {
    let env = GridWorld::new(&["get the key", "open the door"]);
    let model = Arc::new(ScriptedModel::new(&[
        "I will get the key.",
        "I will wait by the door.",
        "Head to the key.",
        "Stay put.",
        "forward",
        "left",
    ]));
    let mut config = config(2);
    config.policy.name = "message".into();
    let mut r = reflexion(&model, &config, &env);

    let outcome = get_action(&env, &mut r, &config).await.unwrap();

    assert_eq!(outcome.actions, vec![2, 0]);
    assert_eq!(outcome.info.messages.len(), 2);
    let history = r.history(1).render(&HistoryView::all());
    assert!(history.contains("message: agent0:I will get the key."));

    // Agent 1 acted knowing what agent 0 planned
    let prompts = model.prompts();
    assert!(prompts[5].contains("I will get the key."));
}
