//! Environment trait: the simulated world the agents act in.
//!
//! The core never steps the environment itself. It only reads what it
//! needs to build prompts (briefing, names, rendered views) and asks the
//! environment to turn model text into action ids.

use serde::{Deserialize, Serialize};

/// Index into the environment's action space.
pub type ActionId = usize;

/// An RGB8 image produced by one of the render calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Row-major RGB bytes, `width * height * 3` long.
    pub pixels: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// An all-black frame.
    pub fn blank(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * 3;
        Self::new(width, height, vec![0; len])
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

/// Text the environment provides at the start of an episode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Briefing {
    /// Shared explanation of the world and the action space.
    pub explain: String,
    /// One mission string per agent, in agent order.
    pub missions: Vec<String>,
}

/// The environment collaborator.
pub trait Environment: Send + Sync {
    /// Number of agents acting in this environment.
    fn agent_num(&self) -> usize;

    /// Steps taken in the current episode.
    fn now_step(&self) -> usize;

    /// Briefing and missions for the current episode.
    fn briefing(&self) -> Briefing;

    /// Display name of an agent, used in messages and prompts.
    fn agent_name(&self, agent_id: usize) -> String {
        format!("agent{agent_id}")
    }

    /// Full view of the world.
    fn render(&self) -> Frame;

    /// One partial view per agent.
    fn render_masked(&self) -> Vec<Frame>;

    /// Full view without agent highlighting.
    fn render_no_highlight(&self) -> Frame {
        self.render()
    }

    /// Text description of the world, used for initial planning.
    fn describe_scene(&self) -> String {
        String::new()
    }

    /// Map free-form model output to an action. Unrecognized text maps
    /// to the environment's default action.
    fn parse_action(&self, text: &str) -> ActionId;

    /// Human-readable names of the action space, in id order.
    fn action_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// `Some` when `text` names an action exactly enough to act on.
    fn matches_action(&self, _text: &str) -> Option<ActionId> {
        None
    }

    /// One random action per agent.
    fn sample_actions(&self) -> Vec<ActionId>;
}
