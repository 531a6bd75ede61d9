//! Shared test helpers: a scripted model and a stub environment.

use async_trait::async_trait;
use coplan_core::environment::{ActionId, Briefing, Environment, Frame};
use coplan_core::error::ModelError;
use coplan_core::model::{Generation, Model};
use std::collections::VecDeque;
use std::sync::Mutex;

/// A model that replays canned replies and records every prompt.
///
/// Each call returns the next reply in the queue. Once the queue is empty
/// the fallback reply is used; without one, the call panics.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
    images: Mutex<Vec<Option<Frame>>>,
    high_calls: Mutex<usize>,
}

impl ScriptedModel {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
            images: Mutex::new(Vec::new()),
            high_calls: Mutex::new(0),
        }
    }

    /// A model that answers every prompt with `reply`.
    pub fn repeating(reply: &str) -> Self {
        let mut model = Self::new(&[]);
        model.fallback = Some(reply.to_string());
        model
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn images(&self) -> Vec<Option<Frame>> {
        self.images.lock().unwrap().clone()
    }

    pub fn high_calls(&self) -> usize {
        *self.high_calls.lock().unwrap()
    }

    fn next_reply(&self, prompt: &str, image: Option<&Frame>) -> String {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.images.lock().unwrap().push(image.cloned());
        let mut replies = self.replies.lock().unwrap();
        match replies.pop_front() {
            Some(reply) => reply,
            None => match &self.fallback {
                Some(reply) => reply.clone(),
                None => panic!(
                    "ScriptedModel: no more replies (call #{})",
                    self.prompts.lock().unwrap().len()
                ),
            },
        }
    }
}

#[async_trait]
impl Model for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        prompt: &str,
        image: Option<&Frame>,
    ) -> Result<Generation, ModelError> {
        Ok(Generation::text(self.next_reply(prompt, image)))
    }

    async fn generate_high(
        &self,
        prompt: &str,
        image: Option<&Frame>,
    ) -> Result<Generation, ModelError> {
        *self.high_calls.lock().unwrap() += 1;
        self.generate(prompt, image).await
    }
}

/// A model whose every call fails.
pub struct FailingModel;

#[async_trait]
impl Model for FailingModel {
    fn name(&self) -> &str {
        "failing"
    }

    async fn generate(
        &self,
        _prompt: &str,
        _image: Option<&Frame>,
    ) -> Result<Generation, ModelError> {
        Err(ModelError::Backend("connection refused".into()))
    }
}

/// A grid-world stand-in with actions `left`, `right`, `forward`.
pub struct StubEnvironment {
    pub missions: Vec<String>,
    pub explain: String,
    pub step: usize,
    pub scene: String,
}

pub const STUB_ACTIONS: [&str; 3] = ["left", "right", "forward"];

impl StubEnvironment {
    pub fn new(missions: &[&str]) -> Self {
        Self {
            missions: missions.iter().map(|m| m.to_string()).collect(),
            explain: "You are in a grid world.".into(),
            step: 0,
            scene: String::new(),
        }
    }
}

impl Environment for StubEnvironment {
    fn agent_num(&self) -> usize {
        self.missions.len()
    }

    fn now_step(&self) -> usize {
        self.step
    }

    fn briefing(&self) -> Briefing {
        Briefing {
            explain: self.explain.clone(),
            missions: self.missions.clone(),
        }
    }

    fn render(&self) -> Frame {
        Frame::blank(2, 2)
    }

    /// Agent `i` sees a 1x1 frame filled with `i`.
    fn render_masked(&self) -> Vec<Frame> {
        (0..self.missions.len())
            .map(|i| Frame::new(1, 1, vec![i as u8; 3]))
            .collect()
    }

    fn describe_scene(&self) -> String {
        self.scene.clone()
    }

    fn action_names(&self) -> Vec<String> {
        STUB_ACTIONS.iter().map(|a| a.to_string()).collect()
    }

    fn parse_action(&self, text: &str) -> ActionId {
        let text = text.to_lowercase();
        STUB_ACTIONS
            .iter()
            .position(|a| text.contains(a))
            .unwrap_or(0)
    }

    fn matches_action(&self, text: &str) -> Option<ActionId> {
        let text = text.trim().to_lowercase();
        STUB_ACTIONS.iter().position(|a| *a == text)
    }

    fn sample_actions(&self) -> Vec<ActionId> {
        vec![1; self.missions.len()]
    }
}
