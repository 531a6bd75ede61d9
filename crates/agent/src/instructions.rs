//! Instruction texts: the natural-language half of every prompt.
//!
//! A prompt is a rendered history followed by one instruction. The
//! [`Instructions`] trait produces the instruction; [`PlainInstructions`]
//! is a compact English default. Environments with their own vocabulary
//! (coordinates, colors, object names) supply their own implementation.

use coplan_config::ReflectionKind;
use serde::{Deserialize, Serialize};

/// Who an instruction is addressed to.
#[derive(Debug, Clone)]
pub struct Speaker {
    pub agent_id: usize,
    pub name: String,
    pub agent_num: usize,
    /// Image marker, present when this agent's call carries an image.
    pub image_token: Option<String>,
    /// Names of the environment's actions.
    pub actions: Vec<String>,
}

impl Speaker {
    /// `"You are {name}. "` in multi-agent runs, empty otherwise.
    pub fn profile(&self) -> String {
        if self.agent_num > 1 {
            format!("You are {}. ", self.name)
        } else {
            String::new()
        }
    }

    /// Image preamble, empty without vision.
    pub fn image_explain(&self) -> String {
        match &self.image_token {
            Some(token) => format!("{token} This image is your view of the world. "),
            None => String::new(),
        }
    }

    /// Actions joined as `a, b or c`.
    pub fn actions_text(&self) -> String {
        match self.actions.split_last() {
            None => "the available actions".to_string(),
            Some((last, [])) => last.clone(),
            Some((last, rest)) => format!("{} or {last}", rest.join(", ")),
        }
    }
}

/// One line of a discussion: a conversation turn or a reflection round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    /// Conversation turn or discussion round, from 0.
    pub turn: usize,
    pub agent_id: usize,
    pub name: String,
    pub text: String,
}

/// Render a list the way the model is asked to answer: `['a', 'b']`.
pub fn list_text(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| format!("'{s}'")).collect();
    format!("[{}]", quoted.join(", "))
}

/// Render a transcript as `name: text` lines.
pub fn transcript_text(transcript: &[Utterance]) -> String {
    transcript
        .iter()
        .map(|u| format!("{}: {}", u.name, u.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Produces the instruction part of each prompt.
///
/// Plans are passed current subgoal first, mission last.
pub trait Instructions: Send + Sync {
    fn general_reflection(&self, speaker: &Speaker, reason: &str) -> String;

    fn subgoal_reflection(
        &self,
        speaker: &Speaker,
        reason: &str,
        achieved: &[String],
        failed: &[String],
    ) -> String;

    /// One agent's turn in a group reflection.
    fn group_reflection(
        &self,
        speaker: &Speaker,
        kind: ReflectionKind,
        reason: &str,
        transcript: &[Utterance],
    ) -> String;

    /// Summary of a finished group reflection. The whole prompt; no
    /// history is prepended.
    fn group_summary(&self, reason: &str, transcript: &[Utterance]) -> String;

    fn message(&self, speaker: &Speaker, targets: &[String]) -> String;

    fn conversation(
        &self,
        speaker: &Speaker,
        targets: &[String],
        transcript: &[Utterance],
        is_last: bool,
    ) -> String;

    fn structured_conversation(
        &self,
        speaker: &Speaker,
        targets: &[String],
        transcript: &[Utterance],
        is_last: bool,
    ) -> String;

    fn action(&self, speaker: &Speaker) -> String;

    fn consideration(&self, speaker: &Speaker, achieved: &[String], not_achieved: &[String])
    -> String;

    fn subgoal(&self, speaker: &Speaker, achieved: &[String], not_achieved: &[String]) -> String;

    fn subgoal_to_action(&self, speaker: &Speaker, plan: &[String]) -> String;

    fn subgoal_achieved(&self, speaker: &Speaker, plan: &[String]) -> String;

    fn all_subgoals_achieved(&self, speaker: &Speaker, plan: &[String]) -> String;

    /// Ask for the whole subgoal list of an episode, mission last. The
    /// whole prompt; no history is prepended.
    fn initial_subgoals(&self, speaker: &Speaker, mission: &str, scene: &str) -> String;

    fn theory_of_mind(&self, speaker: &Speaker, target: &str) -> String;
}

/// Compact English instructions.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainInstructions;

const PLAN_REQUEST: &str = "Do not describe the environment. Think about the strategy that \
    would complete the task, which actions helped and which should change, and write a new \
    plan from start to finish in 3 to 6 sentences.\nYour plan:";

fn failure_preamble(reason: &str) -> String {
    format!(
        "Above is the history of a past attempt at your task. The attempt failed because of \
         {reason}. "
    )
}

impl Instructions for PlainInstructions {
    fn general_reflection(&self, speaker: &Speaker, reason: &str) -> String {
        format!(
            "{}{}{}{PLAN_REQUEST}",
            speaker.profile(),
            speaker.image_explain(),
            failure_preamble(reason)
        )
    }

    fn subgoal_reflection(
        &self,
        speaker: &Speaker,
        reason: &str,
        achieved: &[String],
        failed: &[String],
    ) -> String {
        format!(
            "{}{}{}You achieved the subgoals {} but not the subgoals {}. \
             Focus on how the subgoals were planned. {PLAN_REQUEST}",
            speaker.profile(),
            speaker.image_explain(),
            failure_preamble(reason),
            list_text(achieved),
            list_text(failed)
        )
    }

    fn group_reflection(
        &self,
        speaker: &Speaker,
        kind: ReflectionKind,
        reason: &str,
        transcript: &[Utterance],
    ) -> String {
        let focus = match kind {
            ReflectionKind::Subgoal => "how the team split and ordered its subgoals",
            _ => "the team's strategy",
        };
        let mut prompt = format!(
            "You are {}. {}Your team failed the task because of {reason}. \
             Discuss {focus} with your teammates and propose what to do differently. \
             Answer in 2 to 4 sentences.",
            speaker.name,
            speaker.image_explain()
        );
        if !transcript.is_empty() {
            prompt.push_str("\nDiscussion so far:\n");
            prompt.push_str(&transcript_text(transcript));
        }
        prompt.push_str(&format!("\n{}:", speaker.name));
        prompt
    }

    fn group_summary(&self, reason: &str, transcript: &[Utterance]) -> String {
        format!(
            "The team failed the task because of {reason}. Summarize the discussion below into \
             one concrete strategy for the next attempt.\nDiscussion:\n{}\n\
             Output only the strategy in 3 to 6 sentences.",
            transcript_text(transcript)
        )
    }

    fn message(&self, speaker: &Speaker, targets: &[String]) -> String {
        let targets = targets.join(" and ");
        format!(
            "{}You are {}. You cooperate with {targets}. So that the team can split up and \
             work efficiently, write a message to {targets} in 2 to 5 sentences.\n\
             Your message to {targets}:",
            speaker.image_explain(),
            speaker.name
        )
    }

    fn conversation(
        &self,
        speaker: &Speaker,
        targets: &[String],
        transcript: &[Utterance],
        is_last: bool,
    ) -> String {
        let mut prompt = format!(
            "{}You are {}. You cooperate with {} and are deciding the next action together. \
             The mission is not accomplished yet.",
            speaker.image_explain(),
            speaker.name,
            targets.join(" and ")
        );
        if is_last {
            prompt.push_str(" This is the last turn of the conversation.");
        }
        prompt.push_str(&format!(
            " Share what you see and what you plan in 1 to 3 sentences, and agree on a plan by \
             the end. You act only after the conversation, in {}.",
            speaker.actions_text()
        ));
        for u in transcript {
            prompt.push_str(&format!("\n{}:{}", u.name, u.text));
        }
        prompt.push_str(&format!("\n{}:", speaker.name));
        prompt
    }

    fn structured_conversation(
        &self,
        speaker: &Speaker,
        targets: &[String],
        transcript: &[Utterance],
        is_last: bool,
    ) -> String {
        let last = if is_last {
            " This is the last turn. Reach a consensus and answer with intent AGREE."
        } else {
            ""
        };
        format!(
            "You are {}. You are talking with {} to solve the task. Answer with one JSON \
             object and nothing else:\n\
             {{\"intent\": \"PROPOSE | INFORM | REQUEST | AGREE | REJECT\", \
             \"target_object\": \"object name or null\", \
             \"target_coordinate\": [x, y] or null, \
             \"action_plan\": \"your planned action\", \
             \"message\": \"a short message to your partners\"}}\n\
             Conversation so far:\n{}{last}",
            speaker.name,
            targets.join(", "),
            transcript_text(transcript)
        )
    }

    fn action(&self, speaker: &Speaker) -> String {
        format!(
            "{}{}What is the best action for your task: {}? Output only the action.\n\
             Your action:",
            speaker.profile(),
            speaker.image_explain(),
            speaker.actions_text()
        )
    }

    fn consideration(
        &self,
        speaker: &Speaker,
        _achieved: &[String],
        _not_achieved: &[String],
    ) -> String {
        format!(
            "{}{}Think step by step and outline, in 2 to 3 sentences, a plan that would \
             accomplish the task from the current situation.\nYour thought:",
            speaker.profile(),
            speaker.image_explain()
        )
    }

    fn subgoal(&self, speaker: &Speaker, achieved: &[String], not_achieved: &[String]) -> String {
        let mut prompt = format!(
            "{}{}You already achieved {}. You think you should achieve {} in order. ",
            speaker.profile(),
            speaker.image_explain(),
            list_text(achieved),
            list_text(not_achieved)
        );
        match not_achieved {
            [next, then, ..] => prompt.push_str(&format!(
                "Output a more concrete subgoal that achieves '{next}' on the way to '{then}'. "
            )),
            [next] => prompt.push_str(&format!(
                "Output a more concrete subgoal that achieves '{next}'. "
            )),
            [] => {}
        }
        prompt.push_str(&format!(
            "Do not repeat a subgoal, do not use relative directions, and if one of the actions \
             {} achieves it directly, output that action name. Output one subgoal in a few \
             words.\nYour subgoal:",
            speaker.actions_text()
        ));
        prompt
    }

    fn subgoal_to_action(&self, speaker: &Speaker, plan: &[String]) -> String {
        let current = plan.first().map(String::as_str).unwrap_or_default();
        format!(
            "{}{}You think you should achieve {}. To achieve '{current}', what is the best \
             action among {}? Output only the action name.\nYour action:",
            speaker.profile(),
            speaker.image_explain(),
            list_text(plan),
            speaker.actions_text()
        )
    }

    fn subgoal_achieved(&self, speaker: &Speaker, plan: &[String]) -> String {
        let current = plan.first().map(String::as_str).unwrap_or_default();
        format!(
            "{}{}In the previous step you planned to achieve {}. Is the subgoal '{current}' \
             achieved now? Output only 'Yes' or 'No'.\nYes or No:",
            speaker.profile(),
            speaker.image_explain(),
            list_text(plan)
        )
    }

    fn all_subgoals_achieved(&self, speaker: &Speaker, plan: &[String]) -> String {
        format!(
            "{}{}In the previous step you planned to achieve {}. Was each subgoal achieved? \
             Output only a list such as ['Yes', 'No', ...].\nList:",
            speaker.profile(),
            speaker.image_explain(),
            list_text(plan)
        )
    }

    fn initial_subgoals(&self, speaker: &Speaker, mission: &str, scene: &str) -> String {
        let scene = if scene.is_empty() {
            String::new()
        } else {
            format!("{scene} ")
        };
        format!(
            "{}{}You act in an environment to solve a task. {scene}Your mission is '{mission}'. \
             Each step you can act in {}. List the abstract subgoals that lead to the mission \
             in the format ['A', 'B', ..., '{mission}'], ending with the mission itself. \
             Output only the list.\nSubgoal list:",
            speaker.profile(),
            speaker.image_explain(),
            speaker.actions_text()
        )
    }

    fn theory_of_mind(&self, speaker: &Speaker, target: &str) -> String {
        format!(
            "{}{}Infer the situation and intent of {target}. If {target} is in view, check \
             what they are doing. Otherwise reason from the past messages and the agreed plan. \
             Predict which subgoal {target} pursues and what they will do next, in 2 to 3 \
             sentences.\nPrediction for {target}:",
            speaker.profile(),
            speaker.image_explain()
        )
    }
}
