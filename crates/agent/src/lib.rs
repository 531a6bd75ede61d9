//! The planning core of coplan.
//!
//! Each environment step runs a **policy**: a fixed pipeline of stages
//! (communicate, judge subgoals, consider, act) that prompts the model on
//! behalf of every agent. Between episodes, **reflexion** turns a failure
//! into notes that seed the next attempt.
//!
//! 1. [`Reflexion::reset`] seeds each agent's history from its memory
//! 2. [`Reflexion::init_subgoal`] plans an initial subgoal list, or
//!    restores one from a [`ReplayLog`]
//! 3. [`get_action`] runs the configured [`Policy`] once per step
//! 4. [`Reflexion::add_result`] and [`Reflexion::run`] close the episode
//!
//! Every model call is awaited before the next one starts, so prompts see
//! the history written by the calls before them.

pub mod instructions;
pub mod parse;
pub mod policy;
pub mod reflexion;
pub mod replay;
pub mod subgoal_tree;

#[cfg(test)]
mod test_helpers;

pub use instructions::{Instructions, PlainInstructions, Speaker, Utterance};
pub use parse::{Intent, StructuredMessage};
pub use policy::{Gate, Policy, PolicyKind, Stage, StepOutcome, get_action};
pub use reflexion::{InitialSubgoals, ReflectionOutcome, ReflectionProtocol, Reflexion};
pub use replay::ReplayLog;
pub use subgoal_tree::{NodeId, SubgoalNode, SubgoalRecord, SubgoalStatus, SubgoalTree};
